//! Event Bus (spec.md C9). A per-session bounded FIFO of live events with a
//! non-blocking, drop-oldest producer and a single async consumer. Queues
//! are created lazily on first publish/subscribe and reclaimed once both
//! the agent loop and the SSE stream have dropped their handle (spec.md
//! §4.9, §9 "Per-session event fan-out").

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::Notify;

/// The fixed event names surfaced on the SSE wire (spec.md §4.9, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    Sync,
    Thinking,
    ThinkingDelta,
    ToolCalling,
    ToolExecuting,
    ToolCompleted,
    Failed,
    Completed,
    TodosUpdate,
    Done,
    Error,
    Ping,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Sync => "sync",
            EventName::Thinking => "thinking",
            EventName::ThinkingDelta => "thinking_delta",
            EventName::ToolCalling => "tool_calling",
            EventName::ToolExecuting => "tool_executing",
            EventName::ToolCompleted => "tool_completed",
            EventName::Failed => "failed",
            EventName::Completed => "completed",
            EventName::TodosUpdate => "todos_update",
            EventName::Done => "done",
            EventName::Error => "error",
            EventName::Ping => "ping",
        }
    }

    /// Terminal events cause the SSE endpoint to emit and close (spec.md
    /// §4.10 step 3).
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventName::Completed | EventName::Failed | EventName::Done)
    }
}

/// One entry on a session's event queue.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: u64,
    pub name: EventName,
    pub payload: Value,
}

struct Inner {
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    next_id: AtomicU64,
}

/// A session's live event queue. Cloning is cheap (it's an `Arc` handle);
/// the underlying queue is reclaimed once every handle for a session is
/// dropped.
#[derive(Clone)]
pub struct SessionQueue {
    inner: Arc<Inner>,
}

impl SessionQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Enqueue an event. Never blocks: if the queue is at capacity the
    /// oldest entry is evicted (and logged) before the new one is pushed.
    pub fn publish(&self, name: EventName, payload: Value) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let event = Event { id, name, payload };
        let mut queue = self.inner.queue.lock().expect("event queue mutex poisoned");
        if queue.len() >= self.inner.capacity {
            if let Some(evicted) = queue.pop_front() {
                tracing::warn!(
                    evicted_event_id = evicted.id,
                    evicted_event_name = evicted.name.as_str(),
                    "event queue full, dropping oldest event"
                );
            }
        }
        queue.push_back(event);
        drop(queue);
        self.inner.notify.notify_one();
    }

    /// Wait for the next event. Cancellation-safe: if the returned future
    /// is dropped before completion (e.g. by `tokio::time::timeout`), no
    /// event is lost.
    pub async fn recv(&self) -> Event {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut queue = self.inner.queue.lock().expect("event queue mutex poisoned");
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            notified.await;
        }
    }
}

static QUEUES: Lazy<Mutex<HashMap<String, Weak<Inner>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Default capacity Q for a newly created session queue.
pub const DEFAULT_CAPACITY: usize = 256;

/// Global façade over the session→queue map (spec.md §9 "Global mutable
/// process state"). Looks up or lazily creates the queue for a session;
/// dead entries (every handle dropped) are pruned opportunistically.
pub fn get_or_create(session_id: &str, capacity: usize) -> SessionQueue {
    let mut map = QUEUES.lock().expect("event queue map mutex poisoned");
    if let Some(weak) = map.get(session_id) {
        if let Some(inner) = weak.upgrade() {
            return SessionQueue { inner };
        }
    }
    let queue = SessionQueue::new(capacity);
    map.insert(session_id.to_string(), Arc::downgrade(&queue.inner));
    map.retain(|_, weak| weak.strong_count() > 0);
    queue
}

/// Look up a session's queue without creating one. Used by the SSE
/// endpoint when there may be no in-flight loop (e.g. nothing to sync on
/// a quiet session).
pub fn lookup(session_id: &str) -> Option<SessionQueue> {
    let map = QUEUES.lock().expect("event queue map mutex poisoned");
    map.get(session_id).and_then(|weak| weak.upgrade()).map(|inner| SessionQueue { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_then_recv_preserves_order() {
        let queue = SessionQueue::new(10);
        queue.publish(EventName::Thinking, json!({"n": 1}));
        queue.publish(EventName::ThinkingDelta, json!({"n": 2}));
        let first = queue.recv().await;
        let second = queue.recv().await;
        assert_eq!(first.name, EventName::Thinking);
        assert_eq!(second.name, EventName::ThinkingDelta);
        assert!(first.id < second.id);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queue = SessionQueue::new(2);
        queue.publish(EventName::Thinking, json!({"n": 1}));
        queue.publish(EventName::ThinkingDelta, json!({"n": 2}));
        queue.publish(EventName::Done, json!({"n": 3}));

        let first = queue.recv().await;
        let second = queue.recv().await;
        assert_eq!(first.name, EventName::ThinkingDelta);
        assert_eq!(second.name, EventName::Done);
    }

    #[tokio::test]
    async fn get_or_create_returns_same_queue_for_same_session() {
        let a = get_or_create("session-1", DEFAULT_CAPACITY);
        a.publish(EventName::Ping, json!({}));
        let b = get_or_create("session-1", DEFAULT_CAPACITY);
        let event = b.recv().await;
        assert_eq!(event.name, EventName::Ping);
    }

    #[tokio::test]
    async fn lookup_returns_none_for_unknown_session() {
        assert!(lookup("no-such-session-xyz").is_none());
    }
}
