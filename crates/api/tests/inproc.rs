#![forbid(unsafe_code)]

use std::time::Duration;

use binsight_api::{DashboardApi, InProcApi};
use binsight_core::{
    ActivityKind, ActivityPayload, AlertKind, AlertPayload, BinStatus, BinUpdate, Event,
};
use binsight_feed::FeedConfig;
use binsight_notify::{NotificationKind, Phase};
use chrono::Utc;
use tokio::time::timeout;

async fn wait_for_epoch(api: &InProcApi, target: u64) {
    let mut rx = api.subscribe_epoch();
    timeout(Duration::from_secs(5), rx.wait_for(|e| *e >= target))
        .await
        .expect("ingest timed out")
        .expect("epoch channel closed");
}

#[tokio::test]
async fn critical_bin_update_lands_in_snapshot_and_toasts() {
    let api = InProcApi::new(FeedConfig::default());
    let channel = api.channel();

    channel.publish(&Event::BinUpdate(BinUpdate {
        bin_id: "BIN007".into(),
        fill_level: 85,
        temperature: 30.0,
        timestamp: Utc::now(),
    }));
    wait_for_epoch(&api, 1).await;

    let snap = api.snapshot().await.unwrap();
    let bin = &snap.bins["BIN007"];
    assert_eq!(bin.fill_level, 85);
    assert_eq!(bin.status, BinStatus::Critical);
    // Roster fields survived the live reading.
    assert!(bin.address.is_some());

    let toasts = api.notifications();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].kind, NotificationKind::Warning);
    assert!(toasts[0].message.contains("BIN007"));
    assert!(toasts[0].message.contains("85"));
}

#[tokio::test]
async fn critical_alert_is_recorded_unread_and_toasted() {
    let api = InProcApi::new(FeedConfig::default());
    api.channel().publish(&Event::Alert(AlertPayload {
        kind: AlertKind::Critical,
        message: "Bin BIN003 critically full".into(),
        bin_id: Some("BIN003".into()),
        timestamp: Utc::now(),
    }));
    wait_for_epoch(&api, 1).await;

    let snap = api.snapshot().await.unwrap();
    assert_eq!(snap.alerts.len(), 1);
    assert!(!snap.alerts[0].read);
    assert_eq!(api.stats().await.unwrap().unread_alerts, 1);

    let toasts = api.notifications();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].kind, NotificationKind::Error);
    assert_eq!(toasts[0].title, "Critical Alert");
}

#[tokio::test]
async fn activity_log_keeps_the_newest_ten() {
    let api = InProcApi::new(FeedConfig::default());
    for i in 0..11 {
        api.channel().publish(&Event::Activity(ActivityPayload {
            kind: ActivityKind::Collection,
            message: format!("BIN{:03} collected successfully", i + 1),
            bin_id: Some(format!("BIN{:03}", i + 1)),
            truck_id: None,
            timestamp: Utc::now(),
        }));
    }
    wait_for_epoch(&api, 11).await;

    let snap = api.snapshot().await.unwrap();
    assert_eq!(snap.activity.len(), 10);
    assert_eq!(snap.activity[0].message, "BIN011 collected successfully");
    assert!(!snap
        .activity
        .iter()
        .any(|a| a.message == "BIN001 collected successfully"));
}

#[tokio::test]
async fn seeded_world_is_visible_before_any_event() {
    let api = InProcApi::new(FeedConfig::default());
    let stats = api.stats().await.unwrap();
    assert_eq!(stats.bins_total, 20);
    assert_eq!(stats.trucks_total, 5);
    assert_eq!(stats.unread_alerts, 0);
}

#[tokio::test]
async fn dismiss_relays_to_the_notifier() {
    let api = InProcApi::new(FeedConfig::default());
    api.channel().publish(&Event::Alert(AlertPayload {
        kind: AlertKind::Warning,
        message: "Bin BIN004 temperature warning (37°C)".into(),
        bin_id: Some("BIN004".into()),
        timestamp: Utc::now(),
    }));

    let toasts = api.notifications();
    assert_eq!(toasts.len(), 1);
    let id = toasts[0].id;
    assert!(api.dismiss(id));
    assert!(!api.dismiss(id));
    assert_eq!(api.notifications()[0].phase, Phase::Exiting);
}

#[tokio::test]
async fn connect_and_disconnect_are_idempotent() {
    let api = InProcApi::new(FeedConfig {
        interval: Duration::from_secs(3600),
        connect_delay: Duration::from_millis(1),
        ..FeedConfig::default()
    });
    api.connect().await.unwrap();
    api.connect().await.unwrap();
    api.disconnect().await.unwrap();
    api.disconnect().await.unwrap();
}
