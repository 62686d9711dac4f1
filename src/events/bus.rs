//! Event bus for delivering domain events to in-process subscribers

use super::types::{DomainEvent, EventKind};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Callback invoked synchronously on publish
pub type EventHandler = Arc<dyn Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
    once: bool,
}

/// Typed publish/subscribe channel.
///
/// `publish` runs every handler registered for the event's kind, in
/// subscription order, on the caller's thread. A failing or panicking
/// handler is logged and skipped; the publisher never sees it.
/// Without subscribers the event is dropped.
///
/// Every event is also fanned out on a `tokio::sync::broadcast` channel
/// (`watch`) for async observers. That side is fire-and-forget: lagging
/// receivers lose events, the publisher is never blocked.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given broadcast capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register `handler` for every future event of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler), false)
    }

    /// Register `handler` for the next event of `kind` only
    pub fn subscribe_once<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler), true)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Async stream of every published event, for external observers
    pub fn watch(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Number of handlers registered for `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Deliver `event` to every current subscriber of its kind
    pub fn publish(&self, event: DomainEvent) {
        let kind = event.kind();

        // Snapshot under the lock, call outside it: handlers may (un)subscribe
        // or publish themselves. One-shot subscriptions are removed before
        // delivery so a re-entrant publish cannot hit them twice.
        let handlers: Vec<(SubscriptionId, EventHandler)> = {
            let mut subs = self
                .subscriptions
                .write()
                .unwrap_or_else(|e| e.into_inner());
            let matched = subs
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| (s.id, s.handler.clone()))
                .collect();
            subs.retain(|s| !(s.once && s.kind == kind));
            matched
        };

        for (id, handler) in &handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(event = %kind, subscription = id.0, "Event handler failed: {:#}", e);
                }
                Err(_) => {
                    error!(event = %kind, subscription = id.0, "Event handler panicked");
                }
            }
        }

        if !handlers.is_empty() {
            debug!(event = %kind, handlers = handlers.len(), "Domain event delivered");
        }

        // No watchers is expected and fine
        let _ = self.sender.send(event);
    }

    fn register(&self, kind: EventKind, handler: EventHandler, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription {
                id,
                kind,
                handler,
                once,
            });
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subs = self
            .subscriptions
            .read()
            .map(|s| s.len())
            .unwrap_or_default();
        f.debug_struct("EventBus")
            .field("subscriptions", &subs)
            .field("watchers", &self.sender.receiver_count())
            .finish()
    }
}

/// Log WRITE_OPERATION and ERROR events at debug level
pub fn install_debug_logging(bus: &EventBus) -> [SubscriptionId; 2] {
    let writes = bus.subscribe(EventKind::WriteOperation, |event| {
        debug!(sequence = ?event.sequence(), "Database write operation");
        Ok(())
    });
    let errors = bus.subscribe(EventKind::Error, |event| {
        debug!(payload = ?event.payload, "Database event error");
        Ok(())
    });
    [writes, errors]
}
