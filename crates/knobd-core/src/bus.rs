use std::collections::BTreeMap;
use std::sync::Arc;

use crate::gesture::{Gesture, GestureKind};

/// A gesture subscriber. Identity is the `Arc` allocation, so registering a
/// clone of the same handler twice has no effect.
pub type Handler = Arc<dyn Fn(&Gesture) + Send + Sync>;

/// Publish/subscribe registry from gesture kind to an ordered set of handlers.
///
/// Handlers run synchronously on the publishing thread in registration order.
#[derive(Default)]
pub struct EventBus {
    handlers: BTreeMap<GestureKind, Vec<Handler>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<_, _> = self
            .handlers
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` for `kind`. Returns false if it was already registered.
    pub fn register(&mut self, kind: GestureKind, handler: &Handler) -> bool {
        let list = self.handlers.entry(kind).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, handler)) {
            return false;
        }
        list.push(Arc::clone(handler));
        true
    }

    /// Register `handler` for every gesture kind.
    pub fn register_all(&mut self, handler: &Handler) {
        for kind in GestureKind::ALL {
            self.register(kind, handler);
        }
    }

    /// Remove `handler` from `kind`. Removing an absent handler is a no-op.
    pub fn unregister(&mut self, kind: GestureKind, handler: &Handler) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(&kind);
        }
        removed
    }

    /// Drop every handler. Used on shutdown.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    #[must_use]
    pub fn handler_count(&self, kind: GestureKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke every handler registered for the gesture's kind.
    /// Returns the number of handlers called.
    pub fn publish(&self, gesture: &Gesture) -> usize {
        let Some(list) = self.handlers.get(&gesture.kind()) else {
            return 0;
        };
        for handler in list {
            handler(gesture);
        }
        list.len()
    }
}
