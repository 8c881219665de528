//! Simple pull based FIFO queue
//!
//! Not used by the dispatch path; available as a building block for callers
//! that want to feed requests into a [`crate::Manager`] one at a time.

use std::collections::VecDeque;

/// Owned first-in first-out queue.
///
/// Cloning copies the elements, so mutating one queue is never observed
/// through another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue<T> {
    storage: VecDeque<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            storage: VecDeque::new(),
        }
    }

    /// Add a value at the back of the queue
    pub fn enqueue(&mut self, value: T) {
        self.storage.push_back(value);
    }

    /// Take the value at the front of the queue
    pub fn dequeue(&mut self) -> Option<T> {
        self.storage.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.storage.front()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.storage.iter()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for Queue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            storage: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Queue<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.storage.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Queue<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.storage.iter()
    }
}
