//! Bounded, lossy, thread-safe FIFO buffer.
//!
//! Producers never block on a full buffer: the oldest item is overwritten and
//! a drop counter is bumped. The consumer drains items and the drop count in
//! one step, so every dropped item is counted exactly once.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::config::DEFAULT_BUFFER_CAPACITY;

/// Items and drop count removed by a single [`ExposureBuffer::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drained<T> {
    /// Buffered items, oldest first.
    pub items: Vec<T>,
    /// Items overwritten since the previous drain.
    pub dropped: u64,
}

impl<T> Drained<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug)]
struct BufferState<T> {
    items: VecDeque<T>,
    dropped: u64,
}

/// Fixed-capacity ring buffer shared by many producers and one consumer.
#[derive(Debug)]
pub struct ExposureBuffer<T> {
    capacity: usize,
    state: Mutex<BufferState<T>>,
}

impl<T> ExposureBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// A zero-capacity buffer keeps nothing and counts every push as dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(BufferState {
                items: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
        }
    }

    /// Add an item, overwriting the oldest one when full.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();

        if self.capacity == 0 {
            state.dropped += 1;
            return;
        }

        if state.items.len() >= self.capacity {
            state.items.pop_front();
            state.dropped += 1;
        }
        state.items.push_back(item);
    }

    /// Remove every buffered item and reset the drop counter.
    pub fn drain(&self) -> Drained<T> {
        let mut state = self.state.lock();
        let items = std::mem::replace(&mut state.items, VecDeque::with_capacity(self.capacity));
        let dropped = std::mem::take(&mut state.dropped);

        Drained {
            items: items.into(),
            dropped,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for ExposureBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
