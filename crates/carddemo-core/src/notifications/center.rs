use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Notification, NotificationEvent, NotificationId, NotificationType, RemovalReason};
use crate::clock::Clock;
use crate::config::NotificationConfig;

/// Buffered change events per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 64;

/// A live notification and the handle of its pending dismiss timer.
struct Entry {
    notification: Notification,
    dismiss_timer: Option<AbortHandle>,
}

impl Entry {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.dismiss_timer.take() {
            timer.abort();
        }
    }
}

struct Queue {
    entries: VecDeque<Entry>,
    next_id: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    events: broadcast::Sender<NotificationEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: NotificationId, reason: RemovalReason) -> bool {
        let removed = {
            let mut queue = self.lock();
            let Some(pos) = queue.entries.iter().position(|e| e.notification.id == id) else {
                return false;
            };
            queue.entries.remove(pos)
        };
        if let Some(mut entry) = removed {
            if reason == RemovalReason::Expired {
                // The timer is the caller; nothing left to cancel.
                entry.dismiss_timer = None;
            } else {
                entry.cancel_timer();
            }
            debug!(id = %id, reason = ?reason, "Notification removed");
            let _ = self.events.send(NotificationEvent::Removed { id, reason });
            true
        } else {
            false
        }
    }

    fn remove_where(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        let removed: Vec<Entry> = {
            let mut queue = self.lock();
            let (matched, kept): (VecDeque<Entry>, VecDeque<Entry>) = queue
                .entries
                .drain(..)
                .partition(|e| predicate(&e.notification));
            queue.entries = kept;
            matched.into_iter().collect()
        };

        let count = removed.len();
        for mut entry in removed {
            entry.cancel_timer();
            let _ = self.events.send(NotificationEvent::Removed {
                id: entry.notification.id,
                reason: RemovalReason::Dismissed,
            });
        }
        count
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let queue = self.queue.get_mut().unwrap_or_else(|e| e.into_inner());
        for entry in queue.entries.iter_mut() {
            entry.cancel_timer();
        }
    }
}

/// Capacity-bounded, newest-first queue of user-facing alerts.
///
/// Clone is cheap and shares the same queue. Auto-dismiss timers are spawned
/// on the ambient tokio runtime; outside a runtime, entries simply stay until
/// removed.
#[derive(Clone)]
pub struct NotificationCenter {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    default_duration: Duration,
    error_duration: Duration,
}

impl NotificationCenter {
    pub fn new(config: &NotificationConfig, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    entries: VecDeque::new(),
                    next_id: 1,
                }),
                events,
            }),
            clock,
            capacity: config.capacity.max(1),
            default_duration: Duration::from_millis(config.default_duration_ms),
            error_duration: Duration::from_millis(config.error_duration_ms),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Default auto-dismiss delay for `kind`.
    pub fn default_duration(&self, kind: NotificationType) -> Duration {
        if kind.is_error() {
            self.error_duration
        } else {
            self.default_duration
        }
    }

    /// Insert a notification at the head of the queue.
    ///
    /// Oldest entries beyond capacity are evicted, persistent or not.
    /// Unless `persistent`, the entry dismisses itself after `duration`
    /// (or the type default).
    pub fn add(
        &self,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        duration: Option<Duration>,
        persistent: bool,
    ) -> NotificationId {
        let duration = (!persistent).then(|| duration.unwrap_or_else(|| self.default_duration(kind)));

        let (notification, evicted) = {
            let mut queue = self.shared.lock();
            let id = NotificationId(queue.next_id);
            queue.next_id += 1;

            let notification = Notification {
                id,
                kind,
                title: title.into(),
                message: message.into(),
                created_at: self.clock.now(),
                duration_ms: duration.map(|d| d.as_millis() as u64),
                persistent,
            };
            let dismiss_timer = duration.and_then(|d| self.schedule_dismiss(id, d));
            queue.entries.push_front(Entry {
                notification: notification.clone(),
                dismiss_timer,
            });

            let mut evicted = Vec::new();
            while queue.entries.len() > self.capacity {
                if let Some(mut oldest) = queue.entries.pop_back() {
                    oldest.cancel_timer();
                    evicted.push(oldest.notification.id);
                }
            }
            (notification, evicted)
        };

        let id = notification.id;
        debug!(id = %id, kind = ?kind, persistent, "Notification added");
        let _ = self.shared.events.send(NotificationEvent::Added(notification));
        for evicted_id in evicted {
            debug!(id = %evicted_id, "Notification evicted at capacity");
            let _ = self.shared.events.send(NotificationEvent::Removed {
                id: evicted_id,
                reason: RemovalReason::Evicted,
            });
        }
        id
    }

    fn schedule_dismiss(&self, id: NotificationId, after: Duration) -> Option<AbortHandle> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(id = %id, "No async runtime, notification will not auto-dismiss");
                return None;
            }
        };
        let Some(deadline) = Instant::now().checked_add(after) else {
            warn!(id = %id, "Dismiss delay out of range, notification will not auto-dismiss");
            return None;
        };
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = shared.upgrade() {
                shared.remove(id, RemovalReason::Expired);
            }
        });
        Some(task.abort_handle())
    }

    pub fn success(&self, title: impl Into<String>, message: impl Into<String>, duration: Option<Duration>) -> NotificationId {
        self.add(NotificationType::Success, title, message, duration, false)
    }

    pub fn error(&self, title: impl Into<String>, message: impl Into<String>, duration: Option<Duration>) -> NotificationId {
        self.add(NotificationType::Error, title, message, duration, false)
    }

    pub fn warning(&self, title: impl Into<String>, message: impl Into<String>, duration: Option<Duration>) -> NotificationId {
        self.add(NotificationType::Warning, title, message, duration, false)
    }

    pub fn info(&self, title: impl Into<String>, message: impl Into<String>, duration: Option<Duration>) -> NotificationId {
        self.add(NotificationType::Info, title, message, duration, false)
    }

    /// Remove one notification and cancel its timer. Returns false if it was already gone.
    pub fn remove(&self, id: NotificationId) -> bool {
        self.shared.remove(id, RemovalReason::Dismissed)
    }

    pub fn clear_all(&self) -> usize {
        self.shared.remove_where(|_| true)
    }

    pub fn clear_non_persistent(&self) -> usize {
        self.shared.remove_where(|n| !n.persistent)
    }

    /// Snapshot of the live notifications, newest first.
    pub fn list(&self) -> Vec<Notification> {
        self.shared
            .lock()
            .entries
            .iter()
            .map(|e| e.notification.clone())
            .collect()
    }

    pub fn get(&self, id: NotificationId) -> Option<Notification> {
        self.shared
            .lock()
            .entries
            .iter()
            .find(|e| e.notification.id == id)
            .map(|e| e.notification.clone())
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream of additions and removals, for UI layers that render the queue.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.shared.events.subscribe()
    }

    #[cfg(test)]
    fn pending_timers(&self) -> usize {
        self.shared
            .lock()
            .entries
            .iter()
            .filter(|e| e.dismiss_timer.as_ref().map(|t| !t.is_finished()).unwrap_or(false))
            .count()
    }
}
