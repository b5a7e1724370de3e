//! binsight event channel: decouples the telemetry producer from the store
//! and the notification manager.
//!
//! The channel is an explicitly constructed instance passed by reference to
//! its collaborators; making one process-wide is a composition choice at the
//! host boundary, not something this crate decides.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, warn};

use binsight_core::{Event, EventKind};

/// Handler invoked synchronously on the publishing context. An `Err` is
/// reported to the log sink and never propagated to the publisher.
pub type Handler = Box<dyn Fn(&Event) -> anyhow::Result<()> + Send>;

/// Token returned by [`EventChannel::subscribe`]; used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

/// Typed publish/subscribe registry over the four telemetry event kinds.
///
/// Handlers for one kind run in registration order within a single publish;
/// no ordering is guaranteed across kinds. Handlers must not publish back
/// into the channel from within delivery.
pub struct EventChannel {
    subscribers: Mutex<FxHashMap<EventKind, SmallVec<[Subscriber; 4]>>>,
    next_id: AtomicU64,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `kind`. Multiple handlers per kind are allowed.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) -> anyhow::Result<()> + Send + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.lock().unwrap();
        subs.entry(kind).or_default().push(Subscriber {
            id,
            handler: Box::new(handler),
        });
        debug!(kind = %kind, id = id.0, "subscribed");
        id
    }

    /// Remove a previously registered handler. Returns false (not an error)
    /// when the token is not currently registered for `kind`.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.lock().unwrap();
        let Some(list) = subs.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if removed {
            debug!(kind = %kind, id = id.0, "unsubscribed");
        }
        removed
    }

    /// Synchronously invoke every handler registered for the event's kind,
    /// in registration order, on the calling context. A failing handler is
    /// logged and skipped; delivery to the remaining handlers continues.
    /// Publishing with zero subscribers is a no-op.
    pub fn publish(&self, event: &Event) {
        let kind = event.kind();
        metrics::counter!("channel_published_total", 1u64, "kind" => kind.as_str());
        let subs = self.subscribers.lock().unwrap();
        let Some(list) = subs.get(&kind) else {
            return;
        };
        for sub in list.iter() {
            if let Err(e) = (sub.handler)(event) {
                metrics::counter!("channel_handler_errors_total", 1u64, "kind" => kind.as_str());
                warn!(kind = %kind, id = sub.id.0, error = %e, "subscriber failed; continuing delivery");
            }
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(&kind)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binsight_core::{ActivityKind, ActivityPayload, BinUpdate};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bin_event(id: &str, fill: u8) -> Event {
        Event::BinUpdate(BinUpdate {
            bin_id: id.into(),
            fill_level: fill,
            temperature: 27.5,
            timestamp: chrono::Utc::now(),
        })
    }

    fn activity_event(msg: &str) -> Event {
        Event::Activity(ActivityPayload {
            kind: ActivityKind::Collection,
            message: msg.into(),
            bin_id: Some("BIN001".into()),
            truck_id: None,
            timestamp: chrono::Utc::now(),
        })
    }

    #[test]
    fn publish_with_no_subscribers_is_noop() {
        let ch = EventChannel::new();
        ch.publish(&bin_event("BIN001", 10));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let ch = EventChannel::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            ch.subscribe(EventKind::BinUpdate, move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }
        ch.publish(&bin_event("BIN001", 10));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_handler_does_not_block_later_ones() {
        let ch = EventChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        ch.subscribe(EventKind::Alert, |_| anyhow::bail!("boom"));
        let hits2 = Arc::clone(&hits);
        ch.subscribe(EventKind::Alert, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        ch.publish(&Event::Alert(binsight_core::AlertPayload {
            kind: binsight_core::AlertKind::Warning,
            message: "m".into(),
            bin_id: None,
            timestamp: chrono::Utc::now(),
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let ch = EventChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let id = ch.subscribe(EventKind::Activity, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        ch.publish(&activity_event("one"));
        assert!(ch.unsubscribe(EventKind::Activity, id));
        assert!(!ch.unsubscribe(EventKind::Activity, id));
        ch.publish(&activity_event("two"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kinds_are_isolated() {
        let ch = EventChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        ch.subscribe(EventKind::TruckUpdate, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        ch.publish(&bin_event("BIN001", 10));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(ch.subscriber_count(EventKind::TruckUpdate), 1);
        assert_eq!(ch.subscriber_count(EventKind::BinUpdate), 0);
    }
}
