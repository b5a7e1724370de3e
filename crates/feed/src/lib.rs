//! binsight telemetry feed: a bounded-rate event producer with no network
//! dependency. Stands in for a real transport; a replacement republishes
//! inbound messages onto the same event kinds with the same payload shapes.

#![forbid(unsafe_code)]

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use binsight_channel::EventChannel;
use binsight_core::{
    ActivityKind, ActivityPayload, AlertKind, AlertPayload, BinId, BinRecord, BinStatus,
    BinUpdate, Event, GeoPoint, SensorHealth, TruckId, TruckRecord, TruckStatus, TruckUpdate,
};

/// Colombo city center; truck positions are jittered around it.
pub const CITY_CENTER: GeoPoint = GeoPoint { lat: 6.9271, lng: 79.8612 };

pub fn bin_id(n: u32) -> BinId {
    format!("BIN{:03}", n)
}

pub fn truck_id(n: u32) -> TruckId {
    format!("TRUCK{:03}", n)
}

/// Feed tunables. Env overrides: `BINSIGHT_FEED_INTERVAL_MS`,
/// `BINSIGHT_FEED_CONNECT_DELAY_MS`.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// One event per interval while connected.
    pub interval: Duration,
    /// Models connection handshake latency.
    pub connect_delay: Duration,
    pub bin_count: u32,
    pub truck_count: u32,
    pub center: GeoPoint,
    /// Max positional jitter per axis, in degrees.
    pub jitter_deg: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10_000),
            connect_delay: Duration::from_millis(1_000),
            bin_count: 20,
            truck_count: 5,
            center: CITY_CENTER,
            jitter_deg: 0.05,
        }
    }
}

fn env_ms(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(d) = env_ms("BINSIGHT_FEED_INTERVAL_MS") {
            cfg.interval = d;
        }
        if let Some(d) = env_ms("BINSIGHT_FEED_CONNECT_DELAY_MS") {
            cfg.connect_delay = d;
        }
        cfg
    }
}

/// Producer abstraction. The simulated source below is the default; tests
/// substitute a deterministic one.
pub trait TelemetrySource: Send {
    fn next_event(&mut self, now: DateTime<Utc>) -> Event;
}

/// Uniform-random event generator: one of the four kinds per tick, with
/// kind-specific payload ranges.
pub struct SimulatedSource<R: Rng> {
    bin_count: u32,
    truck_count: u32,
    center: GeoPoint,
    jitter_deg: f64,
    rng: R,
}

impl SimulatedSource<StdRng> {
    pub fn new(config: &FeedConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }
}

impl<R: Rng> SimulatedSource<R> {
    pub fn with_rng(config: &FeedConfig, rng: R) -> Self {
        Self {
            bin_count: config.bin_count,
            truck_count: config.truck_count,
            center: config.center,
            jitter_deg: config.jitter_deg,
            rng,
        }
    }

    fn random_bin(&mut self) -> BinId {
        let n = self.rng.random_range(1..=self.bin_count);
        bin_id(n)
    }

    fn random_truck(&mut self) -> TruckId {
        let n = self.rng.random_range(1..=self.truck_count);
        truck_id(n)
    }
}

impl<R: Rng + Send> TelemetrySource for SimulatedSource<R> {
    fn next_event(&mut self, now: DateTime<Utc>) -> Event {
        match self.rng.random_range(0..4u8) {
            0 => Event::BinUpdate(BinUpdate {
                bin_id: self.random_bin(),
                fill_level: self.rng.random_range(0..100),
                temperature: 25.0 + self.rng.random_range(0.0..15.0),
                timestamp: now,
            }),
            1 => {
                let j = self.jitter_deg;
                Event::TruckUpdate(TruckUpdate {
                    truck_id: self.random_truck(),
                    location: GeoPoint {
                        lat: self.center.lat + self.rng.random_range(-j..j),
                        lng: self.center.lng + self.rng.random_range(-j..j),
                    },
                    status: match self.rng.random_range(0..3u8) {
                        0 => TruckStatus::Idle,
                        1 => TruckStatus::EnRoute,
                        _ => TruckStatus::Collecting,
                    },
                    timestamp: now,
                })
            }
            2 => {
                let bin = self.random_bin();
                let (kind, message) = if self.rng.random_bool(0.5) {
                    let pct: u8 = self.rng.random_range(85..100);
                    (
                        AlertKind::Critical,
                        format!("Bin #{} critically full ({}%)", bin, pct),
                    )
                } else {
                    let temp: u8 = self.rng.random_range(35..40);
                    (
                        AlertKind::Warning,
                        format!("Bin #{} temperature warning ({}°C)", bin, temp),
                    )
                };
                Event::Alert(AlertPayload {
                    kind,
                    message,
                    bin_id: Some(bin),
                    timestamp: now,
                })
            }
            _ => {
                let (kind, template) = match self.rng.random_range(0..3u8) {
                    0 => (ActivityKind::Collection, "collected successfully"),
                    1 => (ActivityKind::Route, "started route"),
                    _ => (ActivityKind::Maintenance, "requires inspection"),
                };
                let (subject, bin, truck) = if kind == ActivityKind::Route {
                    let t = self.random_truck();
                    (t.clone(), None, Some(t))
                } else {
                    let b = self.random_bin();
                    (b.clone(), Some(b), None)
                };
                Event::Activity(ActivityPayload {
                    kind,
                    message: format!("{} {}", subject, template),
                    bin_id: bin,
                    truck_id: truck,
                    timestamp: now,
                })
            }
        }
    }
}

type SourceFactory = Box<dyn Fn() -> Box<dyn TelemetrySource> + Send + Sync>;

/// Interval-driven producer lifecycle. `connect` starts emitting after the
/// configured handshake delay; `disconnect` stops immediately. Both are
/// idempotent.
pub struct TelemetryFeed {
    channel: std::sync::Arc<EventChannel>,
    config: FeedConfig,
    make_source: SourceFactory,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryFeed {
    pub fn new(channel: std::sync::Arc<EventChannel>, config: FeedConfig) -> Self {
        let cfg = config.clone();
        Self::with_source_factory(channel, config, move || -> Box<dyn TelemetrySource> {
            Box::new(SimulatedSource::new(&cfg))
        })
    }

    /// Build a feed around a custom producer; the factory runs once per
    /// `connect` so a reconnect starts from a fresh source.
    pub fn with_source_factory(
        channel: std::sync::Arc<EventChannel>,
        config: FeedConfig,
        make_source: impl Fn() -> Box<dyn TelemetrySource> + Send + Sync + 'static,
    ) -> Self {
        Self {
            channel,
            config,
            make_source: Box::new(make_source),
            task: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.task.lock().unwrap().is_some()
    }

    pub fn connect(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            debug!("feed already connected");
            return;
        }
        info!(delay_ms = self.config.connect_delay.as_millis() as u64, "feed connecting");
        let channel = std::sync::Arc::clone(&self.channel);
        let connect_delay = self.config.connect_delay;
        let interval = self.config.interval;
        let mut source = (self.make_source)();
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(connect_delay).await;
            info!(interval_ms = interval.as_millis() as u64, "feed connected");
            let mut ticker = tokio::time::interval(interval);
            // interval fires immediately; the first event waits a full period
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let event = source.next_event(Utc::now());
                metrics::counter!("feed_events_emitted_total", 1u64, "kind" => event.kind().as_str());
                debug!(kind = %event.kind(), "feed emit");
                channel.publish(&event);
            }
        }));
    }

    /// Stops future emissions; events already delivered stay delivered.
    pub fn disconnect(&self) {
        let mut task = self.task.lock().unwrap();
        match task.take() {
            Some(handle) => {
                handle.abort();
                info!("feed disconnected");
            }
            None => debug!("feed already disconnected"),
        }
    }
}

impl Drop for TelemetryFeed {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

// ---- Initial roster ----

/// Seed snapshot contents for a fresh process: the bin and truck roster the
/// live feed then updates in place.
#[derive(Debug, Clone, Default)]
pub struct WorldSeed {
    pub bins: Vec<BinRecord>,
    pub trucks: Vec<TruckRecord>,
}

const DRIVERS: [&str; 5] = [
    "A. Perera",
    "K. Silva",
    "R. Fernando",
    "S. Jayawardena",
    "M. Dissanayake",
];

const ROUTES: [&str; 5] = [
    "Route A - Fort",
    "Route B - Pettah",
    "Route C - Kollupitiya",
    "Route D - Borella",
    "Route E - Dehiwala",
];

/// Deterministic roster laid out on a grid around the city center. Bins are
/// assigned to trucks round-robin.
pub fn seed_world(config: &FeedConfig) -> WorldSeed {
    let mut bins = Vec::with_capacity(config.bin_count as usize);
    for n in 1..=config.bin_count {
        let i = (n - 1) as i64;
        let fill = ((i * 7 + 13) % 100) as u8;
        bins.push(BinRecord {
            id: bin_id(n),
            location: Some(GeoPoint {
                lat: config.center.lat + ((i % 5) - 2) as f64 * 0.012,
                lng: config.center.lng + ((i / 5) - 2) as f64 * 0.012,
            }),
            address: Some(format!("Ward {:02}, Colombo", n)),
            sensor_health: if n % 9 == 0 {
                SensorHealth::Offline
            } else {
                SensorHealth::Online
            },
            fill_level: fill,
            temperature: 26.0 + (i % 6) as f64,
            status: BinStatus::from_fill(fill),
            last_reading: None,
        });
    }

    let mut trucks = Vec::with_capacity(config.truck_count as usize);
    for n in 1..=config.truck_count {
        let i = (n - 1) as usize;
        let assigned: SmallVec<[BinId; 8]> = (1..=config.bin_count)
            .filter(|b| (b - 1) % config.truck_count == n - 1)
            .map(bin_id)
            .collect();
        trucks.push(TruckRecord {
            id: truck_id(n),
            driver: Some(DRIVERS[i % DRIVERS.len()].to_string()),
            route: Some(ROUTES[i % ROUTES.len()].to_string()),
            capacity_kg: 1_000,
            current_load_kg: ((i as u32 * 237) % 900) + 50,
            assigned_bins: assigned,
            location: Some(GeoPoint {
                lat: config.center.lat + (i as f64 - 2.0) * 0.015,
                lng: config.center.lng - (i as f64 - 2.0) * 0.015,
            }),
            status: TruckStatus::Idle,
            last_update: None,
        });
    }

    WorldSeed { bins, trucks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binsight_core::EventKind;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn simulated_payloads_stay_in_range() {
        let cfg = FeedConfig::default();
        let mut src = SimulatedSource::with_rng(&cfg, StdRng::seed_from_u64(42));
        let mut kinds_seen = HashSet::new();
        for _ in 0..200 {
            let ev = src.next_event(Utc::now());
            assert_eq!(ev.validate(), Ok(()));
            kinds_seen.insert(ev.kind());
            match ev {
                Event::BinUpdate(p) => {
                    assert!(p.fill_level < 100);
                    assert!(p.temperature >= 25.0 && p.temperature < 40.0);
                    assert!(p.bin_id.starts_with("BIN"));
                }
                Event::TruckUpdate(p) => {
                    assert!((p.location.lat - cfg.center.lat).abs() <= cfg.jitter_deg);
                    assert!((p.location.lng - cfg.center.lng).abs() <= cfg.jitter_deg);
                    assert!(p.truck_id.starts_with("TRUCK"));
                }
                Event::Alert(p) => {
                    assert!(p.bin_id.is_some());
                    match p.kind {
                        AlertKind::Critical => assert!(p.message.contains("critically full")),
                        AlertKind::Warning => assert!(p.message.contains("temperature warning")),
                    }
                }
                Event::Activity(p) => {
                    if p.kind == ActivityKind::Route {
                        assert!(p.truck_id.is_some() && p.bin_id.is_none());
                    } else {
                        assert!(p.bin_id.is_some() && p.truck_id.is_none());
                    }
                }
            }
        }
        assert_eq!(kinds_seen.len(), EventKind::ALL.len());
    }

    #[test]
    fn seed_world_covers_the_roster() {
        let cfg = FeedConfig::default();
        let seed = seed_world(&cfg);
        assert_eq!(seed.bins.len(), 20);
        assert_eq!(seed.trucks.len(), 5);

        let ids: HashSet<_> = seed.bins.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids.len(), 20);
        for b in &seed.bins {
            assert_eq!(b.status, BinStatus::from_fill(b.fill_level));
        }

        let assigned: usize = seed.trucks.iter().map(|t| t.assigned_bins.len()).sum();
        assert_eq!(assigned, 20);
        for t in &seed.trucks {
            assert!(t.driver.is_some() && t.route.is_some());
            assert!(t.current_load_kg <= t.capacity_kg);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn feed_lifecycle_emits_and_stops() {
        let channel = Arc::new(EventChannel::new());
        let count = Arc::new(AtomicUsize::new(0));
        for kind in EventKind::ALL {
            let count = Arc::clone(&count);
            channel.subscribe(kind, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let cfg = FeedConfig::default();
        let feed = TelemetryFeed::new(Arc::clone(&channel), cfg.clone());
        feed.connect();
        feed.connect(); // idempotent: no second producer task

        // connect delay (1s) + three intervals (10s each)
        tokio::time::sleep(cfg.connect_delay + cfg.interval * 3 + Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        feed.disconnect();
        assert!(!feed.is_connected());
        tokio::time::sleep(cfg.interval * 2).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        feed.disconnect(); // safe when not connected
    }

    #[tokio::test(start_paused = true)]
    async fn custom_source_replaces_the_simulation() {
        struct Scripted(u8);
        impl TelemetrySource for Scripted {
            fn next_event(&mut self, now: DateTime<Utc>) -> Event {
                self.0 += 1;
                Event::BinUpdate(BinUpdate {
                    bin_id: bin_id(self.0 as u32),
                    fill_level: 50,
                    temperature: 26.0,
                    timestamp: now,
                })
            }
        }

        let channel = Arc::new(EventChannel::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        channel.subscribe(EventKind::BinUpdate, move |ev| {
            if let Event::BinUpdate(p) = ev {
                seen2.lock().unwrap().push(p.bin_id.clone());
            }
            Ok(())
        });

        let cfg = FeedConfig {
            interval: Duration::from_millis(100),
            connect_delay: Duration::from_millis(10),
            ..FeedConfig::default()
        };
        let feed = TelemetryFeed::with_source_factory(Arc::clone(&channel), cfg, || {
            Box::new(Scripted(0)) as Box<dyn TelemetrySource>
        });
        feed.connect();
        tokio::time::sleep(Duration::from_millis(10 + 100 * 2 + 5)).await;
        feed.disconnect();
        assert_eq!(*seen.lock().unwrap(), vec![bin_id(1), bin_id(2)]);
    }
}
