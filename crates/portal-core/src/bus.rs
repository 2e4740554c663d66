//! Typed publish/subscribe event bus
//!
//! Every component in the client coordinates through an [`EventBus`]. Events
//! are values of a closed enum implementing [`BusEvent`]; subscribers register
//! against the enum's kind tag, so a handler only ever sees the payload shape
//! belonging to the kind it subscribed to.
//!
//! ## Semantics
//!
//! - Handlers for one kind run synchronously, in registration order, on the
//!   caller of [`EventBus::emit`].
//! - A handler returning `Err` aborts the remaining handlers of that emit. The
//!   error is logged and never reaches the emitter.
//! - `once` handlers are removed after their first successful run.
//! - The bus lock is never held while a handler runs, so handlers may emit,
//!   subscribe or unsubscribe re-entrantly.

use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// An event that can be dispatched on an [`EventBus`]
pub trait BusEvent: Send + Sync + 'static {
    /// Tag identifying which subscribers receive the event
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// The kind of this event
    fn kind(&self) -> Self::Kind;
}

/// Handle identifying a single subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) -> Result<()> + Send + Sync>;

struct Subscription<E> {
    id: SubscriptionId,
    handler: Handler<E>,
    once: bool,
    /// Set while a `once` handler is running or after it has fired
    claimed: Arc<AtomicBool>,
}

impl<E> Clone for Subscription<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
            once: self.once,
            claimed: Arc::clone(&self.claimed),
        }
    }
}

/// Named-event registry with durable and one-shot subscriptions
pub struct EventBus<E: BusEvent> {
    subscriptions: Mutex<HashMap<E::Kind, Vec<Subscription<E>>>>,
    next_id: AtomicU64,
}

impl<E: BusEvent> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a durable handler
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(handler), false)
    }

    /// Register a handler that is removed after its first successful run
    pub fn once<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(handler), true)
    }

    fn subscribe(&self, kind: E::Kind, handler: Handler<E>, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.subscriptions
            .lock()
            .entry(kind)
            .or_default()
            .push(Subscription {
                id,
                handler,
                once,
                claimed: Arc::new(AtomicBool::new(false)),
            });

        trace!(?kind, ?id, once, "Subscribed");
        id
    }

    /// Dispatch an event to every handler registered for its kind
    ///
    /// Returns the number of handlers that ran successfully.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();

        let snapshot = match self.subscriptions.lock().get(&kind) {
            Some(subs) if !subs.is_empty() => subs.clone(),
            _ => {
                trace!(?kind, "No subscribers");
                return 0;
            }
        };

        let mut delivered = 0;
        for sub in snapshot {
            // A once handler already running (or fired) must not run again
            if sub.once && sub.claimed.swap(true, Ordering::AcqRel) {
                continue;
            }

            match (sub.handler)(event) {
                Ok(()) => {
                    delivered += 1;
                    if sub.once {
                        self.unsubscribe(kind, sub.id);
                    }
                }
                Err(e) => {
                    if sub.once {
                        sub.claimed.store(false, Ordering::Release);
                    }
                    warn!(?kind, error = %e, "Event handler failed, skipping remaining handlers");
                    break;
                }
            }
        }

        delivered
    }

    /// Remove a single subscription
    ///
    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, kind: E::Kind, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let Some(subs) = subscriptions.get_mut(&kind) else {
            return false;
        };

        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;

        if subs.is_empty() {
            subscriptions.remove(&kind);
        }
        removed
    }

    /// Remove every handler registered for a kind
    pub fn remove_listener(&self, kind: E::Kind) {
        if self.subscriptions.lock().remove(&kind).is_none() {
            debug!(?kind, "No listeners to remove");
        }
    }

    /// Remove every handler for every kind
    pub fn reset(&self) {
        self.subscriptions.lock().clear();
    }

    /// Number of handlers registered for a kind
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.subscriptions
            .lock()
            .get(&kind)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Check whether anything listens for a kind
    pub fn has_listeners(&self, kind: E::Kind) -> bool {
        self.listener_count(kind) > 0
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscriptions = self.subscriptions.lock();
        let counts: HashMap<_, _> = subscriptions
            .iter()
            .map(|(kind, subs)| (*kind, subs.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
