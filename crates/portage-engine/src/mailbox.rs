//! MessageBox — bounded, application-facing FIFO feeding the engine.
//!
//! Producers (application code) enqueue, the owning job dequeues. Capacity
//! is fixed at construction: a failed enqueue is the backpressure signal,
//! never a silent drop and never an indefinite block. The timed-wait
//! variants replace sleep-and-poll retry loops with a bounded wait on a
//! notification, preserving the same timeout semantics without busy-waiting.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use portage_core::frame::Message;

/// Bounded FIFO queue of Messages scoped to one logical channel.
pub struct MessageBox {
    id: u32,
    capacity: usize,
    queue: Mutex<VecDeque<Message>>,
    /// Signalled when space frees up.
    space: Notify,
    /// Signalled when a message arrives.
    items: Notify,
}

impl MessageBox {
    /// Create a box with a stable id and a fixed capacity. Never resized.
    pub fn new(id: u32, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            space: Notify::new(),
            items: Notify::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking enqueue. A full box returns the message back to the
    /// caller — "try again later".
    pub async fn enqueue(&self, msg: Message) -> Result<(), Message> {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            return Err(msg);
        }
        queue.push_back(msg);
        drop(queue);
        self.items.notify_one();
        Ok(())
    }

    /// Non-blocking FIFO dequeue. Empty box returns None.
    pub async fn dequeue(&self) -> Option<Message> {
        let mut queue = self.queue.lock().await;
        let msg = queue.pop_front();
        drop(queue);
        if msg.is_some() {
            self.space.notify_one();
        }
        msg
    }

    /// Non-destructive peek at the head of the queue.
    pub async fn peek(&self) -> Option<Message> {
        self.queue.lock().await.front().cloned()
    }

    /// Dequeue, waiting up to `wait` for a message to arrive.
    pub async fn dequeue_timeout(&self, wait: Duration) -> Option<Message> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(msg) = self.dequeue().await {
                return Some(msg);
            }
            let notified = self.items.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // Deadline hit — one final non-blocking attempt.
                return self.dequeue().await;
            }
        }
    }

    /// Enqueue, waiting up to `wait` for space. On timeout the message is
    /// returned to the caller, exactly like a failed [`MessageBox::enqueue`].
    pub async fn enqueue_timeout(&self, msg: Message, wait: Duration) -> Result<(), Message> {
        let deadline = Instant::now() + wait;
        let mut msg = msg;
        loop {
            msg = match self.enqueue(msg).await {
                Ok(()) => return Ok(()),
                Err(back) => back,
            };
            let notified = self.space.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.enqueue(msg).await;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}

// ── BoxSet ───────────────────────────────────────────────────────────────────

/// The set of MessageBoxes one job serves, keyed by box id.
///
/// Mutable at runtime (boxes may be wired in while the job runs), scanned
/// in insertion order: the earliest-registered box with pending work wins
/// the tick.
#[derive(Default)]
pub struct BoxSet {
    boxes: DashMap<u32, Arc<MessageBox>>,
    order: std::sync::Mutex<Vec<u32>>,
}

impl BoxSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build a set of `count` boxes with ids `1..=count`.
    pub fn with_boxes(count: u32, capacity: usize) -> Arc<Self> {
        let set = Self::new();
        for id in 1..=count {
            set.insert(MessageBox::new(id, capacity));
        }
        set
    }

    pub fn insert(&self, mailbox: Arc<MessageBox>) {
        let id = mailbox.id();
        if self.boxes.insert(id, mailbox).is_none() {
            self.order.lock().expect("box order lock poisoned").push(id);
        }
    }

    pub fn get(&self, id: u32) -> Option<Arc<MessageBox>> {
        self.boxes.get(&id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: u32) -> bool {
        self.boxes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Box ids in scan order.
    pub fn ids(&self) -> Vec<u32> {
        self.order.lock().expect("box order lock poisoned").clone()
    }

    /// The earliest-registered box holding at least one message.
    /// No fairness beyond that: the same box wins as long as it has work.
    pub async fn first_with_work(&self) -> Option<Arc<MessageBox>> {
        for id in self.ids() {
            if let Some(mailbox) = self.get(id) {
                if !mailbox.is_empty().await {
                    return Some(mailbox);
                }
            }
        }
        None
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
