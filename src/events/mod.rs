//! Process-wide publish/subscribe bus for session events.
//!
//! The bus is an ordinary value: the process container creates one and hands
//! clones to every session. Publishing iterates a snapshot of the handlers
//! registered for the event's type, so subscribe/unsubscribe from another
//! session never races with delivery.

mod types;

pub use types::{Event, EventPayload, EventType, Speaker, TranscriptEvent, TranscriptNotice};

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{trace, warn};

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_type: HashMap<EventType, Vec<Subscription>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

struct FnHandler<F>(F);

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .by_type
            .entry(event_type)
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    pub fn subscribe_fn<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(FnHandler(handler)))
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for subscriptions in registry.by_type.values_mut() {
            let before = subscriptions.len();
            subscriptions.retain(|subscription| subscription.id != id);
            removed |= subscriptions.len() != before;
        }
        registry.by_type.retain(|_, subscriptions| !subscriptions.is_empty());
        removed
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_type
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to every handler registered for its type, in
    /// subscription order. Handler failures are logged and skipped.
    /// Returns the number of handlers that accepted the event.
    pub fn publish(&self, event: Event) -> usize {
        let event_type = event.event_type();
        let snapshot: Vec<(SubscriptionId, Arc<dyn EventHandler>)> = {
            let registry = self
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match registry.by_type.get(&event_type) {
                Some(subscriptions) => subscriptions
                    .iter()
                    .map(|subscription| (subscription.id, Arc::clone(&subscription.handler)))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler.handle_event(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => warn!(
                    target: "event_bus",
                    event_type = event_type.as_str(),
                    session_id = event.session_id(),
                    subscription = id.0,
                    %err,
                    "event handler failed"
                ),
                Err(_) => warn!(
                    target: "event_bus",
                    event_type = event_type.as_str(),
                    session_id = event.session_id(),
                    subscription = id.0,
                    "event handler panicked"
                ),
            }
        }

        trace!(
            target: "event_bus",
            event_type = event_type.as_str(),
            delivered,
            "event published"
        );
        delivered
    }
}
