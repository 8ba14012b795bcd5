//! Reversible listener registration for a connection.
//!
//! Every callback attached to a [`Connection`](super::Connection) goes
//! through [`ListenerRegistry::add`] and gets a [`ListenerId`] back, so it
//! can be removed individually or in bulk when the connection is torn down.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

// ============================================================================
// CloseInfo
// ============================================================================

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when a close frame carries no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason or transport error text.
    pub reason: String,
    /// `true` if this side initiated the close.
    pub manual: bool,
}

impl CloseInfo {
    /// Creates close info.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>, manual: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            manual,
        }
    }

    /// Returns `true` if the close should trigger the reconnect policy.
    ///
    /// Codes 1002..=1015 are abnormal unless this side closed the socket.
    #[inline]
    #[must_use]
    pub fn is_abnormal(&self) -> bool {
        !self.manual && (1002..=1015).contains(&self.code)
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Event delivered to connection listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Message(String),
    /// A socket error (always followed by [`TransportEvent::Close`]).
    Error(String),
    /// The connection ended.
    Close(CloseInfo),
}

impl TransportEvent {
    /// Returns the kind of this event.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Message(_) => EventKind::Message,
            TransportEvent::Error(_) => EventKind::Error,
            TransportEvent::Close(_) => EventKind::Close,
        }
    }
}

/// Listener subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Text frames.
    Message,
    /// Socket errors.
    Error,
    /// Connection closed.
    Close,
}

// ============================================================================
// Listener Types
// ============================================================================

/// Listener callback.
///
/// Called on the connection's event loop task; must not block.
pub type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Handle of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Per-connection table of listeners by event kind.
#[derive(Default)]
pub struct ListenerRegistry {
    /// Next listener id.
    next_id: AtomicU64,
    /// Registered listeners.
    entries: Mutex<FxHashMap<EventKind, FxHashMap<ListenerId, Listener>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one event kind.
    pub fn add(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .entry(kind)
            .or_default()
            .insert(id, listener);
        id
    }

    /// Removes one listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries
            .values_mut()
            .any(|listeners| listeners.remove(&id).is_some());
        entries.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    /// Removes every listener and returns how many were registered.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.values().map(FxHashMap::len).sum();
        entries.clear();
        count
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(FxHashMap::len).sum()
    }

    /// Returns `true` if no listener is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of listeners for one event kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.lock().get(&kind).map_or(0, FxHashMap::len)
    }

    /// Calls every listener registered for the event's kind.
    ///
    /// Listeners run outside the registry lock, so they may add or remove
    /// listeners themselves.
    pub fn dispatch(&self, event: &TransportEvent) {
        let listeners: Vec<Listener> = self
            .entries
            .lock()
            .get(&event.kind())
            .map(|listeners| listeners.values().cloned().collect())
            .unwrap_or_default();

        for listener in listeners {
            listener(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let listener: Listener = Arc::new(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        (hits, listener)
    }

    #[test]
    fn test_close_classification() {
        assert!(CloseInfo::new(1006, "", false).is_abnormal());
        assert!(CloseInfo::new(1002, "", false).is_abnormal());
        assert!(CloseInfo::new(1015, "", false).is_abnormal());
        assert!(!CloseInfo::new(1000, "", false).is_abnormal());
        assert!(!CloseInfo::new(1001, "", false).is_abnormal());
        assert!(!CloseInfo::new(1016, "", false).is_abnormal());
        assert!(!CloseInfo::new(1006, "", true).is_abnormal());
    }

    #[test]
    fn test_dispatch_by_kind() {
        let registry = ListenerRegistry::new();
        let (messages, on_message) = counter();
        let (closes, on_close) = counter();
        registry.add(EventKind::Message, on_message);
        registry.add(EventKind::Close, on_close);

        registry.dispatch(&TransportEvent::Message("{}".into()));
        registry.dispatch(&TransportEvent::Message("{}".into()));
        registry.dispatch(&TransportEvent::Error("boom".into()));

        assert_eq!(messages.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_single_listener() {
        let registry = ListenerRegistry::new();
        let (hits, listener) = counter();
        let id = registry.add(EventKind::Message, listener);
        let (_, other) = counter();
        registry.add(EventKind::Message, other);

        assert_eq!(registry.len(), 2);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.count(EventKind::Message), 1);

        registry.dispatch(&TransportEvent::Message("{}".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = ListenerRegistry::new();
        for kind in [EventKind::Message, EventKind::Error, EventKind::Close] {
            let (_, listener) = counter();
            registry.add(kind, listener);
        }

        assert_eq!(registry.clear(), 3);
        assert!(registry.is_empty());
        assert_eq!(registry.clear(), 0);
    }

    #[test]
    fn test_listener_may_remove_itself() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let registry_clone = Arc::clone(&registry);
        let slot_clone = Arc::clone(&slot);
        let id = registry.add(
            EventKind::Message,
            Arc::new(move |_| {
                if let Some(id) = *slot_clone.lock() {
                    registry_clone.remove(id);
                }
            }),
        );
        *slot.lock() = Some(id);

        registry.dispatch(&TransportEvent::Message("{}".into()));
        assert!(registry.is_empty());
    }
}
