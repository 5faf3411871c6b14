//! Per-feature dispatch between the transport and a cache: filter the
//! envelope stream down to one feature's events and turn each match into a
//! cache invalidation. Unknown envelope types are ignored, never an error.

use serde_json::Value;
use tokio::sync::mpsc;

use super::transport::{TransportEvent, TransportSession};
use crate::realtime::event_kinds;

/// Reconciliation target for push invalidations, typically an
/// `OptimisticMutationCache` refetching canonical state.
pub trait CacheInvalidator: Send + 'static {
    fn invalidate(&self) -> impl Future<Output = ()> + Send;
}

/// Which envelopes belong to one feature's subscription.
#[derive(Debug, Clone)]
pub struct EventFilter {
    kind: &'static str,
    id_field: &'static str,
    id: String,
}

impl EventFilter {
    pub fn chat_thread(thread_id: impl Into<String>) -> Self {
        Self {
            kind: event_kinds::CHAT_MESSAGE,
            id_field: "thread_id",
            id: thread_id.into(),
        }
    }

    pub fn poll(poll_id: impl Into<String>) -> Self {
        Self {
            kind: event_kinds::POLL_UPDATE,
            id_field: "poll_id",
            id: poll_id.into(),
        }
    }

    fn matches(&self, kind: &str, payload: &Value) -> bool {
        kind == self.kind
            && payload.get(self.id_field).and_then(Value::as_str) == Some(self.id.as_str())
    }
}

/// One router per active subscription. Holds a handle on the underlying
/// session; unsubscribing drops it, which closes the session once no other
/// consumer holds one.
pub struct SubscriptionRouter {
    session: TransportSession,
    _task: tokio::task::JoinHandle<()>,
}

impl SubscriptionRouter {
    pub fn attach<T: CacheInvalidator>(
        session: TransportSession,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        filter: EventFilter,
        target: T,
    ) -> Self {
        let task = tokio::spawn(route_events(events, filter, target));
        Self {
            session,
            _task: task,
        }
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    /// Stops routing for this feature. The dispatch task drains on its own
    /// once the session's event stream ends.
    pub fn unsubscribe(self) {
        drop(self.session);
    }
}

async fn route_events<T: CacheInvalidator>(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    filter: EventFilter,
    target: T,
) {
    while let Some(event) = events.recv().await {
        if let TransportEvent::Message { kind, payload } = event {
            if filter.matches(&kind, &payload) {
                target.invalidate().await;
            } else {
                tracing::trace!(kind, "envelope ignored by subscription filter");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct CountingTarget(Arc<AtomicUsize>);

    impl CacheInvalidator for CountingTarget {
        async fn invalidate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn message(kind: &str, payload: Value) -> TransportEvent {
        TransportEvent::Message {
            kind: kind.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn matching_envelopes_invalidate_once_each() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(message("chat.message", serde_json::json!({"thread_id": "t-1"})))
            .unwrap();
        tx.send(message("chat.message", serde_json::json!({"thread_id": "t-1"})))
            .unwrap();
        drop(tx);

        route_events(
            rx,
            EventFilter::chat_thread("t-1"),
            CountingTarget(hits.clone()),
        )
        .await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn foreign_threads_and_kinds_are_ignored() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        // Same kind, different feature.
        tx.send(message("chat.message", serde_json::json!({"thread_id": "t-2"})))
            .unwrap();
        // Different kind entirely.
        tx.send(message("poll.update", serde_json::json!({"poll_id": "t-1"})))
            .unwrap();
        // Unrecognized kind: ignored, not an error.
        tx.send(message("presence.join", serde_json::json!({"thread_id": "t-1"})))
            .unwrap();
        // Payload missing the id field.
        tx.send(message("chat.message", serde_json::json!({})))
            .unwrap();
        drop(tx);

        route_events(
            rx,
            EventFilter::chat_thread("t-1"),
            CountingTarget(hits.clone()),
        )
        .await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lifecycle_events_do_not_invalidate() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(TransportEvent::Opened).unwrap();
        tx.send(TransportEvent::Closed { will_retry: true }).unwrap();
        tx.send(TransportEvent::GaveUp).unwrap();
        drop(tx);

        route_events(rx, EventFilter::poll("p-1"), CountingTarget(hits.clone())).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn poll_filter_matches_on_poll_id() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(message("poll.update", serde_json::json!({"poll_id": "p-1"})))
            .unwrap();
        tx.send(message("poll.update", serde_json::json!({"poll_id": "p-2"})))
            .unwrap();
        drop(tx);

        route_events(rx, EventFilter::poll("p-1"), CountingTarget(hits.clone())).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
