//! Fixed capacity correlation queue
//!
//! This is a small ring buffer guarded by a single mutex. It is not a
//! blocking queue: producers never wait for space, instead the oldest
//! entry is overwritten once the ring is full, and consumers never wait
//! for data. This makes it a "most recent N" buffer, which is what we
//! want when pairing tracking samples with the frames rendered from them.
//!
//! ```
//! use utils::CorrelationQueue;
//!
//! let queue = CorrelationQueue::with_capacity(2);
//! queue.push(1);
//! queue.push(2);
//! // full, so this drops 1
//! assert_eq!(queue.push(3), Some(1));
//! assert_eq!(queue.pop(), Some(2));
//! assert_eq!(queue.pop(), Some(3));
//! assert_eq!(queue.pop(), None);
//! ```
use std::sync::{Mutex, MutexGuard};

/// Default number of entries held by a queue
pub const CORRELATION_QUEUE_CAPACITY: usize = 100;

/// The ring itself
///
/// `rear` always equals `(front + size) % capacity`. All three are only
/// ever updated together under the queue's lock.
struct Ring<T> {
    r_items: Vec<Option<T>>,
    r_front: usize,
    r_rear: usize,
    r_size: usize,
}

impl<T> Ring<T> {
    fn capacity(&self) -> usize {
        self.r_items.len()
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.r_size == 0 {
            return None;
        }

        let item = self.r_items[self.r_front].take();
        self.r_front = (self.r_front + 1) % self.capacity();
        self.r_size -= 1;
        item
    }
}

/// A lock protected, overwrite-oldest ring buffer
pub struct CorrelationQueue<T> {
    cq_ring: Mutex<Ring<T>>,
}

impl<T> CorrelationQueue<T> {
    /// Create a queue holding `CORRELATION_QUEUE_CAPACITY` entries
    pub fn new() -> Self {
        Self::with_capacity(CORRELATION_QUEUE_CAPACITY)
    }

    /// Create a queue holding at most `capacity` entries
    ///
    /// A capacity of zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut items = Vec::with_capacity(capacity);
        items.resize_with(capacity, || None);

        Self {
            cq_ring: Mutex::new(Ring {
                r_items: items,
                r_front: 0,
                r_rear: 0,
                r_size: 0,
            }),
        }
    }

    // The ring is always left consistent between statements, so a panic
    // on another thread doesn't invalidate it.
    fn lock(&self) -> MutexGuard<Ring<T>> {
        self.cq_ring.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `item` to the back of the queue
    ///
    /// If the queue is full the oldest entry is dropped to make room and
    /// returned to the caller.
    pub fn push(&self, item: T) -> Option<T> {
        let mut ring = self.lock();
        let cap = ring.capacity();

        let rear = ring.r_rear;
        let evicted = if ring.r_size == cap {
            // rear == front here, so this slot holds the oldest entry
            ring.r_front = (ring.r_front + 1) % cap;
            ring.r_items[rear].take()
        } else {
            ring.r_size += 1;
            None
        };

        ring.r_items[rear] = Some(item);
        ring.r_rear = (rear + 1) % cap;

        evicted
    }

    /// Remove the oldest entry
    ///
    /// Returns None if there is nothing queued. This never waits for
    /// a producer.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove the oldest entry only if `pred` accepts it
    ///
    /// The check and the removal happen in the same critical section,
    /// so a concurrent push that overwrites the front can't cause a
    /// different entry to be removed than the one that was inspected.
    pub fn pop_if<F: FnOnce(&T) -> bool>(&self, pred: F) -> Option<T> {
        let mut ring = self.lock();
        if ring.r_size == 0 {
            return None;
        }

        let front = ring.r_front;
        let accepted = ring.r_items[front].as_ref().map(pred).unwrap_or(false);
        match accepted {
            true => ring.pop_front(),
            false => None,
        }
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.lock().r_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Drop everything queued
    pub fn clear(&self) {
        let mut ring = self.lock();
        for item in ring.r_items.iter_mut() {
            *item = None;
        }
        ring.r_front = 0;
        ring.r_rear = 0;
        ring.r_size = 0;
    }
}

impl<T: Clone> CorrelationQueue<T> {
    /// Get a copy of the oldest entry without removing it
    pub fn peek(&self) -> Option<T> {
        let ring = self.lock();
        if ring.r_size == 0 {
            return None;
        }
        ring.r_items[ring.r_front].clone()
    }
}

impl<T> Default for CorrelationQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
