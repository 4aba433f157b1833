//! Per-session frame queue.
//!
//! One queue exists per session attempt. The producer pushes without ever
//! blocking; the delivery loop pops and suspends while the queue is empty.

use crate::frame::Frame;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Entry in a frame queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueItem {
    Frame(Frame),
    /// Ends the current session with a terminator frame
    EndOfSession,
}

/// What to discard when a bounded queue is full
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest queued frame to make room
    #[default]
    DropOldest,
    /// Drop the frame being pushed
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_oldest" | "drop-oldest" | "oldest" => Ok(Self::DropOldest),
            "drop_newest" | "drop-newest" | "newest" => Ok(Self::DropNewest),
            other => Err(format!("unknown overflow policy: {}", other)),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropOldest => write!(f, "drop_oldest"),
            Self::DropNewest => write!(f, "drop_newest"),
        }
    }
}

/// Queue sizing. Unbounded unless a capacity is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of queued frames
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            overflow,
        }
    }
}

/// Result of a push
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest frame
    DroppedOldest,
    /// Discarded, the queue was full
    DroppedNewest,
}

struct Inner {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    config: QueueConfig,
    dropped: AtomicU64,
    generation: u64,
}

/// FIFO shared by one producer and one consumer.
///
/// The end-of-session sentinel is never subject to the capacity limit.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<Inner>,
}

fn count_frames(items: &VecDeque<QueueItem>) -> usize {
    items.iter().filter(|i| matches!(i, QueueItem::Frame(_))).count()
}

impl FrameQueue {
    pub fn new(config: QueueConfig, generation: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                config,
                dropped: AtomicU64::new(0),
                generation,
            }),
        }
    }

    /// Enqueue an item. Never blocks.
    pub fn push(&self, item: QueueItem) -> PushOutcome {
        let outcome = {
            let mut items = self.inner.items.lock();
            let mut outcome = PushOutcome::Queued;

            if let (QueueItem::Frame(_), Some(capacity)) = (&item, self.inner.config.capacity) {
                if count_frames(&items) >= capacity {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    match self.inner.config.overflow {
                        OverflowPolicy::DropNewest => return PushOutcome::DroppedNewest,
                        OverflowPolicy::DropOldest => {
                            if let Some(pos) = items.iter().position(|i| matches!(i, QueueItem::Frame(_))) {
                                items.remove(pos);
                            }
                            outcome = PushOutcome::DroppedOldest;
                        }
                    }
                }
            }

            items.push_back(item);
            outcome
        };

        self.inner.notify.notify_one();
        outcome
    }

    /// Dequeue the next item, waiting until one is available
    pub async fn pop(&self) -> QueueItem {
        loop {
            let next = self.inner.items.lock().pop_front();
            if let Some(item) = next {
                return item;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<QueueItem> {
        self.inner.items.lock().pop_front()
    }

    /// Queued items, including a pending end-of-session marker
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Queued frames only
    pub fn frame_count(&self) -> usize {
        count_frames(&self.inner.items.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// Frames discarded by the overflow policy
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Session attempt this queue belongs to
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn config(&self) -> QueueConfig {
        self.inner.config
    }
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("generation", &self.generation())
            .field("len", &self.len())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}
