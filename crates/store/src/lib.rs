//! binsight store: folds telemetry events into versioned fleet snapshots.
//!
//! Readers hold an [`StoreHandle`] and always see a complete snapshot behind
//! an `ArcSwap`; the ingest loop is the single writer. Every applied event
//! produces a new snapshot version (no coalescing), so the snapshot for a
//! given id reflects the last event received for it.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use binsight_channel::{EventChannel, SubscriptionId};
use binsight_core::{
    ActivityRecord, AlertRecord, BinRecord, BinStatus, Event, EventKind, FleetSnapshot,
    InvalidEvent, TruckRecord, ACTIVITY_LOG_CAP,
};
use binsight_feed::WorldSeed;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid event: {0}")]
    Invalid(#[from] InvalidEvent),
}

/// Builds successive [`FleetSnapshot`] versions from events.
///
/// `apply` is deterministic in (state, event): it reads no wall clock beyond
/// the event's own timestamp and consults nothing outside the working state.
/// A rejected event leaves the state untouched.
pub struct SnapshotBuilder {
    state: FleetSnapshot,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            state: FleetSnapshot::default(),
        }
    }

    /// Start from a primed roster instead of an empty world.
    pub fn with_seed(seed: WorldSeed) -> Self {
        let mut state = FleetSnapshot::default();
        for bin in seed.bins {
            state.bins.insert(bin.id.clone(), bin);
        }
        for truck in seed.trucks {
            state.trucks.insert(truck.id.clone(), truck);
        }
        Self { state }
    }

    pub fn epoch(&self) -> u64 {
        self.state.epoch
    }

    /// Fold one event into the working state. Unknown bin/truck ids are
    /// upserted; there is no referential-integrity failure mode here.
    pub fn apply(&mut self, event: &Event) -> Result<(), ReconcileError> {
        event.validate()?;
        match event {
            Event::BinUpdate(p) => {
                let bin = self
                    .state
                    .bins
                    .entry(p.bin_id.clone())
                    .or_insert_with(|| BinRecord::unseen(p.bin_id.clone()));
                // Reading replaced wholesale; roster fields survive.
                bin.fill_level = p.fill_level;
                bin.temperature = p.temperature;
                bin.status = BinStatus::from_fill(p.fill_level);
                bin.last_reading = Some(p.timestamp);
            }
            Event::TruckUpdate(p) => {
                let truck = self
                    .state
                    .trucks
                    .entry(p.truck_id.clone())
                    .or_insert_with(|| TruckRecord::unseen(p.truck_id.clone()));
                truck.location = Some(p.location);
                truck.status = p.status;
                truck.last_update = Some(p.timestamp);
            }
            Event::Alert(p) => {
                self.state.alerts.insert(
                    0,
                    AlertRecord {
                        id: Uuid::new_v4(),
                        kind: p.kind,
                        message: p.message.clone(),
                        bin_id: p.bin_id.clone(),
                        timestamp: p.timestamp,
                        read: false,
                    },
                );
            }
            Event::Activity(p) => {
                self.state.activity.insert(
                    0,
                    ActivityRecord {
                        id: Uuid::new_v4(),
                        kind: p.kind,
                        message: p.message.clone(),
                        bin_id: p.bin_id.clone(),
                        truck_id: p.truck_id.clone(),
                        timestamp: p.timestamp,
                    },
                );
                self.state.activity.truncate(ACTIVITY_LOG_CAP);
            }
        }
        self.state.epoch = self.state.epoch.saturating_add(1);
        Ok(())
    }

    /// Freeze the working state into an immutable snapshot version.
    pub fn freeze(&self) -> Arc<FleetSnapshot> {
        Arc::new(self.state.clone())
    }
}

/// Handle for readers: current snapshot plus a change notification.
#[derive(Clone)]
pub struct StoreHandle {
    snap: Arc<ArcSwap<FleetSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl StoreHandle {
    pub fn current(&self) -> Arc<FleetSnapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }
}

fn queue_cap() -> usize {
    std::env::var("BINSIGHT_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(2048)
}

/// Subscription tokens held by the ingest wiring; detaching unsubscribes.
pub struct IngestGuard {
    channel: Arc<EventChannel>,
    subs: Vec<(EventKind, SubscriptionId)>,
}

impl Drop for IngestGuard {
    fn drop(&mut self) {
        for (kind, id) in self.subs.drain(..) {
            self.channel.unsubscribe(kind, id);
        }
    }
}

/// Subscribe to all four event kinds on `channel` and spawn the ingest loop:
/// receive → apply → freeze → swap → notify. Returns a reader handle and the
/// subscription guard. One bounded queue keeps receipt order across kinds;
/// overflow drops the event and counts it rather than blocking the publisher.
pub fn spawn_ingest(
    channel: Arc<EventChannel>,
    seed: Option<WorldSeed>,
) -> (StoreHandle, IngestGuard) {
    let cap = queue_cap();
    let (tx, mut rx) = mpsc::channel::<Event>(cap);

    let mut subs = Vec::with_capacity(EventKind::ALL.len());
    for kind in EventKind::ALL {
        let tx = tx.clone();
        let id = channel.subscribe(kind, move |event| {
            if let Err(e) = tx.try_send(event.clone()) {
                metrics::counter!("store_ingest_dropped_total", 1u64);
                warn!(kind = %event.kind(), error = %e, "ingest queue full; dropping event");
            }
            Ok(())
        });
        subs.push((kind, id));
    }
    drop(tx);

    let builder = match seed {
        Some(seed) => SnapshotBuilder::with_seed(seed),
        None => SnapshotBuilder::new(),
    };
    let first = builder.freeze();
    let snap = Arc::new(ArcSwap::from(first));
    let (epoch_tx, epoch_rx) = watch::channel(builder.epoch());
    let snap_clone = Arc::clone(&snap);

    tokio::spawn(async move {
        let mut builder = builder;
        while let Some(event) = rx.recv().await {
            match builder.apply(&event) {
                Ok(()) => {
                    let next = builder.freeze();
                    let epoch = next.epoch;
                    snap_clone.store(next);
                    let _ = epoch_tx.send(epoch);
                    debug!(epoch, kind = %event.kind(), "snapshot advanced");
                }
                Err(e) => {
                    metrics::counter!("store_reconcile_skips_total", 1u64, "kind" => event.kind().as_str());
                    warn!(kind = %event.kind(), error = %e, "event rejected; snapshot unchanged");
                }
            }
        }
        info!("ingest loop stopped");
    });

    (
        StoreHandle { snap, epoch_rx },
        IngestGuard { channel, subs },
    )
}
