use std::collections::VecDeque;

use crate::utils::error::BrokerError;

/// Fixed-capacity ring of the most recent items pushed into it.
///
/// Each topic owns one of these so that late subscribers can catch up on
/// recent history. Once full, every `push` overwrites the oldest entry;
/// the buffer never grows past the capacity chosen at construction.
#[derive(Debug)]
pub struct ReplayBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> ReplayBuffer<T> {
    /// Creates a buffer holding at most `capacity` items.
    ///
    /// Fails with `InvalidArgument` for a zero capacity: a topic that can
    /// replay nothing should not have a buffer at all.
    pub fn new(capacity: usize) -> Result<Self, BrokerError> {
        if capacity < 1 {
            return Err(BrokerError::InvalidArgument(format!(
                "replay capacity must be >= 1, got {capacity}"
            )));
        }
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `item`, evicting the oldest entry if the buffer is full.
    pub fn push(&mut self, item: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(item);
    }

    /// The `n` most recent items in push order, freshly allocated.
    /// `n` is clamped to the current length; `n = 0` yields an empty Vec.
    pub fn last_n(&self, n: usize) -> Vec<T>
    where
        T: Clone,
    {
        let take = n.min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - take)
            .cloned()
            .collect()
    }

    /// Drops all entries; the capacity is unchanged.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
