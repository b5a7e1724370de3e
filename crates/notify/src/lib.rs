//! binsight notifications: a derived, strictly time-bounded view of selected
//! events. Never the system of record; a toast that expires is gone.
//!
//! Lifecycle per notification: `Entering → Visible → Exiting → Removed`.
//! Every transition is driven by a caller-supplied `Instant`, so the whole
//! machine is testable without a real clock; live wiring sweeps it from a
//! small driver task.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

use binsight_channel::{EventChannel, SubscriptionId};
use binsight_core::{AlertKind, Event, EventKind, CRITICAL_FILL_PCT};

/// Entry transition hold before a toast counts as visible.
pub const ENTER_DELAY: Duration = Duration::from_millis(10);
/// Exit transition hold before a toast is dropped from the live set.
pub const EXIT_DELAY: Duration = Duration::from_millis(300);
/// Default time a toast stays up, measured from creation.
pub const DEFAULT_DURATION: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }
}

/// `Removed` is terminal; a removed toast is dropped from the live set and
/// never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Entering,
    Visible,
    Exiting,
    Removed,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub duration: Duration,
    pub phase: Phase,
    created: Instant,
    exit_started: Option<Instant>,
}

struct Inner {
    toasts: Vec<Notification>,
    next_id: u64,
}

/// Owns the live toast set. Dismissal and expiry both route through
/// `Exiting`; removal is irreversible and redundant removal is a no-op.
pub struct NotificationManager {
    inner: Mutex<Inner>,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                toasts: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Create a toast in `Entering` phase at `now`; returns its id.
    pub fn push_at(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        duration: Duration,
        now: Instant,
    ) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        metrics::counter!("notify_toasts_shown_total", 1u64, "kind" => kind.as_str());
        inner.toasts.push(Notification {
            id,
            kind,
            title: title.into(),
            message: message.into(),
            duration,
            phase: Phase::Entering,
            created: now,
            exit_started: None,
        });
        id
    }

    pub fn push(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> u64 {
        self.push_at(kind, title, message, DEFAULT_DURATION, Instant::now())
    }

    /// Derive a toast from a telemetry event, if it qualifies: a bin reading
    /// at or above the critical fill, or any alert. Returns the toast id.
    pub fn observe_at(&self, event: &Event, now: Instant) -> Option<u64> {
        match event {
            Event::BinUpdate(p) if p.fill_level >= CRITICAL_FILL_PCT => Some(self.push_at(
                NotificationKind::Warning,
                "Critical Bin Alert",
                format!("Bin #{} is {}% full", p.bin_id, p.fill_level),
                DEFAULT_DURATION,
                now,
            )),
            Event::Alert(p) => {
                let (kind, title) = match p.kind {
                    AlertKind::Critical => (NotificationKind::Error, "Critical Alert"),
                    AlertKind::Warning => (NotificationKind::Warning, "Warning"),
                };
                Some(self.push_at(kind, title, p.message.clone(), DEFAULT_DURATION, now))
            }
            _ => None,
        }
    }

    /// Advance every toast to the phase `now` implies, dropping the ones
    /// whose exit completed. Idempotent; transitions use the scheduled
    /// boundary instants, not `now`, so a late sweep stays on schedule.
    pub fn tick_at(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.toasts.retain_mut(|t| {
            if t.phase == Phase::Entering && now >= t.created + ENTER_DELAY {
                t.phase = Phase::Visible;
            }
            if (t.phase == Phase::Entering || t.phase == Phase::Visible)
                && now >= t.created + t.duration
            {
                t.phase = Phase::Exiting;
                t.exit_started = Some(t.created + t.duration);
            }
            if t.phase == Phase::Exiting {
                let started = t.exit_started.unwrap_or(t.created);
                if now >= started + EXIT_DELAY {
                    t.phase = Phase::Removed;
                    debug!(id = t.id, "toast removed");
                    return false;
                }
            }
            true
        });
    }

    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Explicit dismissal: an `Entering` or `Visible` toast moves to
    /// `Exiting` immediately, then leaves through the normal exit delay.
    /// Dismissing anything else (already exiting, unknown, removed) is a
    /// no-op. Returns whether a toast changed phase.
    pub fn dismiss_at(&self, id: u64, now: Instant) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(t) = inner.toasts.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        match t.phase {
            Phase::Entering | Phase::Visible => {
                t.phase = Phase::Exiting;
                t.exit_started = Some(now);
                metrics::counter!("notify_dismissed_total", 1u64);
                debug!(id, "toast dismissed");
                true
            }
            Phase::Exiting | Phase::Removed => false,
        }
    }

    pub fn dismiss(&self, id: u64) -> bool {
        self.dismiss_at(id, Instant::now())
    }

    /// Current toasts with phases, oldest first. Removed toasts never appear.
    pub fn live(&self) -> Vec<Notification> {
        self.inner.lock().unwrap().toasts.clone()
    }
}

/// Subscription tokens for the manager's channel attachment; detaching
/// unsubscribes.
pub struct NotifyGuard {
    channel: Arc<EventChannel>,
    subs: Vec<(EventKind, SubscriptionId)>,
}

impl Drop for NotifyGuard {
    fn drop(&mut self) {
        for (kind, id) in self.subs.drain(..) {
            self.channel.unsubscribe(kind, id);
        }
    }
}

/// Register the trigger subscriptions (`binUpdate`, `alert`) on `channel`.
pub fn attach(manager: Arc<NotificationManager>, channel: Arc<EventChannel>) -> NotifyGuard {
    let mut subs = Vec::with_capacity(2);
    for kind in [EventKind::BinUpdate, EventKind::Alert] {
        let manager = Arc::clone(&manager);
        let id = channel.subscribe(kind, move |event| {
            manager.observe_at(event, Instant::now());
            Ok(())
        });
        subs.push((kind, id));
    }
    NotifyGuard { channel, subs }
}

/// Sweep the manager on a fixed cadence. The caller owns the handle and
/// aborts it on teardown.
pub fn spawn_tick_driver(manager: Arc<NotificationManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            manager.tick();
        }
    })
}
