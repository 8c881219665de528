//! Task identifier allocation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identifier of a task, `"{request identifier}#{sequence}"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(request_identifier: &str, sequence: u64) -> Self {
        Self(format!("{request_identifier}#{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic sequence source for task identifiers.
///
/// Hands out `1..=max`; after `max` it wraps back to 1, never 0.
#[derive(Debug)]
pub struct TaskIdAllocator {
    next: AtomicU64,
    max: u64,
}

impl TaskIdAllocator {
    pub fn new() -> Self {
        Self::with_max(u64::MAX)
    }

    /// Allocator wrapping after `max` (clamped to at least 1)
    pub fn with_max(max: u64) -> Self {
        Self {
            next: AtomicU64::new(1),
            max: max.max(1),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        let max = self.max;
        let previous = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(if current >= max { 1 } else { current + 1 })
            })
            .unwrap_or(1);

        previous.clamp(1, max)
    }

    pub fn allocate(&self, request_identifier: &str) -> TaskId {
        TaskId::new(request_identifier, self.next_sequence())
    }
}

impl Default for TaskIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
