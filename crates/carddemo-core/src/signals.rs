//! Client-local publish/subscribe for session invalidation.
//!
//! Two signals exist: the gateway publishes [`Signal::CredentialRejected`]
//! when the server answers 401, and the session manager publishes
//! [`Signal::SessionCleared`] once it has dropped a session it held.
//!
//! Handlers registered with [`SignalBus::subscribe`] run synchronously inside
//! `publish`, in registration order, before `publish` returns. UI layers that
//! prefer a queue can take a `broadcast` receiver from [`SignalBus::stream`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered signals per stream subscriber before it starts lagging.
const STREAM_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SignalKind {
    CredentialRejected,
    SessionCleared,
}

/// Why a held session was dropped without the user asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ClearReason {
    CredentialRejected,
    Expired,
    /// The persisted record vanished while a session was held.
    Missing,
    RevalidationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Signal {
    CredentialRejected { correlation_id: Option<String> },
    SessionCleared { reason: ClearReason },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::CredentialRejected { .. } => SignalKind::CredentialRejected,
            Signal::SessionCleared { .. } => SignalKind::SessionCleared,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Signal) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: SignalKind,
    handler: Handler,
}

struct BusInner {
    handlers: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<Signal>,
}

/// Shared handle to the signal channel. Clone is cheap.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<BusInner>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(STREAM_BUFFER);
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                stream,
            }),
        }
    }

    /// Register `handler` for every future signal of `kind`.
    pub fn subscribe<F>(&self, kind: SignalKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_handlers().push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock_handlers();
        let before = handlers.len();
        handlers.retain(|s| s.id != id);
        handlers.len() != before
    }

    /// Receive every published signal through a bounded queue.
    pub fn stream(&self) -> broadcast::Receiver<Signal> {
        self.inner.stream.subscribe()
    }

    /// Deliver `signal` to all matching handlers, then to stream receivers.
    ///
    /// The handler list is snapshotted first, so handlers may themselves
    /// publish or subscribe.
    pub fn publish(&self, signal: Signal) {
        let kind = signal.kind();
        let matching: Vec<Handler> = self
            .lock_handlers()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        debug!(signal = ?kind, handlers = matching.len(), "Publishing signal");
        for handler in matching {
            handler(&signal);
        }

        // No receivers is fine
        let _ = self.inner.stream.send(signal);
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.inner.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("handlers", &self.lock_handlers().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_handlers_only_see_their_kind() {
        let bus = SignalBus::new();
        let rejected = Arc::new(AtomicUsize::new(0));
        let cleared = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&rejected);
        bus.subscribe(SignalKind::CredentialRejected, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&cleared);
        bus.subscribe(SignalKind::SessionCleared, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Signal::CredentialRejected { correlation_id: None });
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(cleared.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_can_publish_follow_up() {
        let bus = SignalBus::new();
        let inner_bus = bus.clone();
        let follow_up = bus.subscribe(SignalKind::CredentialRejected, move |_| {
            inner_bus.publish(Signal::SessionCleared {
                reason: ClearReason::CredentialRejected,
            });
        });

        let cleared = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&cleared);
        bus.subscribe(SignalKind::SessionCleared, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Signal::CredentialRejected { correlation_id: None });
        assert_eq!(cleared.load(Ordering::SeqCst), 1);

        // The handler owns a clone of the bus; removing it breaks the cycle
        assert!(bus.unsubscribe(follow_up));
    }

    #[test]
    fn test_unsubscribe() {
        let bus = SignalBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = bus.subscribe(SignalKind::SessionCleared, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(Signal::SessionCleared { reason: ClearReason::Expired });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_receives_published_signals() {
        let bus = SignalBus::new();
        let mut rx = bus.stream();

        bus.publish(Signal::SessionCleared { reason: ClearReason::Expired });

        let signal = rx.recv().await.expect("stream should receive signal");
        assert_eq!(signal, Signal::SessionCleared { reason: ClearReason::Expired });
    }
}
