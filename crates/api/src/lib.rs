//! binsight public API façade (in-process).
//!
//! This crate defines the stable surface a frontend (CLI, GUI, web renderer)
//! depends on: the current snapshot, its change notification, and the live
//! toast list. The in-process implementation composes the core components
//! explicitly; a remote (RPC) implementation can stand behind the same trait
//! later.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use binsight_channel::EventChannel;
use binsight_core::{FleetSnapshot, FleetStats};
use binsight_feed::{seed_world, FeedConfig, TelemetryFeed};
use binsight_notify::{spawn_tick_driver, Notification, NotificationManager, NotifyGuard};
use binsight_store::{spawn_ingest, IngestGuard, StoreHandle};

/// Cadence of the toast lifecycle sweep.
const NOTIFY_TICK: Duration = Duration::from_millis(25);

/// API errors suitable for transport over RPC later.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Declarative binsight API surface: the renderer boundary.
#[async_trait::async_trait]
pub trait DashboardApi: Send + Sync {
    /// Start the telemetry feed; idempotent.
    async fn connect(&self) -> ApiResult<()>;

    /// Stop the telemetry feed; safe to call when not connected.
    async fn disconnect(&self) -> ApiResult<()>;

    /// The current snapshot. Complete at one version; never a partial view.
    async fn snapshot(&self) -> ApiResult<Arc<FleetSnapshot>>;

    /// Aggregate counts for the current snapshot.
    async fn stats(&self) -> ApiResult<FleetStats>;

    /// Change notification: receives the epoch of each new snapshot version.
    fn subscribe_epoch(&self) -> watch::Receiver<u64>;

    /// Live toasts with phases, for the renderer to draw.
    fn notifications(&self) -> Vec<Notification>;

    /// Relay of a user dismiss action; no-op on unknown or exiting toasts.
    fn dismiss(&self, id: u64) -> bool;
}

/// In-process implementation wiring the channel, store, notifier and feed
/// together. The channel instance is owned here and handed to collaborators
/// by reference; nothing in the core is process-global.
pub struct InProcApi {
    channel: Arc<EventChannel>,
    feed: TelemetryFeed,
    store: StoreHandle,
    notifier: Arc<NotificationManager>,
    driver: JoinHandle<()>,
    _ingest_guard: IngestGuard,
    _notify_guard: NotifyGuard,
}

impl InProcApi {
    /// Compose the core. Must run inside a tokio runtime: the store ingest
    /// loop and the toast sweep driver are spawned here.
    pub fn new(config: FeedConfig) -> Self {
        let channel = Arc::new(EventChannel::new());
        let (store, ingest_guard) =
            spawn_ingest(Arc::clone(&channel), Some(seed_world(&config)));
        let notifier = Arc::new(NotificationManager::new());
        let notify_guard = binsight_notify::attach(Arc::clone(&notifier), Arc::clone(&channel));
        let driver = spawn_tick_driver(Arc::clone(&notifier), NOTIFY_TICK);
        let feed = TelemetryFeed::new(Arc::clone(&channel), config);
        info!("in-process api composed");
        Self {
            channel,
            feed,
            store,
            notifier,
            driver,
            _ingest_guard: ingest_guard,
            _notify_guard: notify_guard,
        }
    }

    /// The event channel, for hosts that wire a real transport in place of
    /// the simulated feed. Inbound messages republished here with the same
    /// payload shapes reach the store and notifier unchanged.
    pub fn channel(&self) -> Arc<EventChannel> {
        Arc::clone(&self.channel)
    }
}

impl Drop for InProcApi {
    fn drop(&mut self) {
        self.feed.disconnect();
        self.driver.abort();
    }
}

#[async_trait::async_trait]
impl DashboardApi for InProcApi {
    async fn connect(&self) -> ApiResult<()> {
        self.feed.connect();
        Ok(())
    }

    async fn disconnect(&self) -> ApiResult<()> {
        self.feed.disconnect();
        Ok(())
    }

    async fn snapshot(&self) -> ApiResult<Arc<FleetSnapshot>> {
        Ok(self.store.current())
    }

    async fn stats(&self) -> ApiResult<FleetStats> {
        Ok(self.store.current().stats())
    }

    fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.store.subscribe_epoch()
    }

    fn notifications(&self) -> Vec<Notification> {
        self.notifier.live()
    }

    fn dismiss(&self, id: u64) -> bool {
        self.notifier.dismiss(id)
    }
}
