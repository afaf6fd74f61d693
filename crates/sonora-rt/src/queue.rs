//! Fixed-capacity handoff between a real-time thread and everyone else.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Returned by [`RtQueue::push`] when the queue is full, carrying the value
/// that did not fit.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("real-time queue is full")]
pub struct Full<T>(pub T);

/// A cloneable, lock-free FIFO. Neither side ever blocks or allocates after
/// construction.
pub struct RtQueue<T> {
    slots: Arc<ArrayQueue<T>>,
}

impl<T> Clone for RtQueue<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T> RtQueue<T> {
    /// A zero capacity is rounded up to one slot.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        self.slots.push(value).map_err(Full)
    }

    /// Makes room by dropping the oldest entry, which is handed back.
    pub fn push_evicting(&self, value: T) -> Option<T> {
        self.slots.force_push(value)
    }

    pub fn pop(&self) -> Option<T> {
        self.slots.pop()
    }

    /// Empties the queue, oldest first.
    pub fn take_all(&self) -> Vec<T> {
        let mut taken = Vec::with_capacity(self.slots.len());
        while let Some(value) = self.slots.pop() {
            taken.push(value);
        }
        taken
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}
