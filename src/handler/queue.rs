use crate::handler::SessionEvent;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::sync::Notify;
use tracing::trace;

/// Bounded hand-off between the reader task and consumers. A full queue
/// drops its oldest event and bumps the drop counter; the producer never
/// waits. Consumers that need lossless delivery must persist on their own
/// hot path.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    buf: Mutex<VecDeque<SessionEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl EventQueue {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                buf: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueues one event, evicting the oldest when full. No-op after close.
    pub fn push(&self, event: SessionEvent) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut buf = self.inner.buf.lock().unwrap_or_else(|e| e.into_inner());
            if buf.len() == self.inner.capacity {
                buf.pop_front();
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("event queue full, dropped oldest (total dropped: {})", dropped);
            }
            buf.push_back(event);
        }
        self.inner.notify.notify_one();
    }

    /// Waits for the next event. `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<SessionEvent> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(event) = self
                .inner
                .buf
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
            {
                return Some(event);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking take, for polling consumers.
    pub fn try_recv(&self) -> Option<SessionEvent> {
        self.inner
            .buf
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Events evicted because a consumer fell behind. Monotonic.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner
            .buf
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
