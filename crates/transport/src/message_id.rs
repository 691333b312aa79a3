//! Process-wide message-id counter.

use std::sync::atomic::{AtomicI32, Ordering};

/// Monotonically increasing i32 counter that wraps to 0 past `i32::MAX`.
///
/// One instance is process-wide; packets of one logical message share the id
/// it hands out. Wrapping to 0 (not `i32::MIN`) keeps ids non-negative on
/// the wire.
#[derive(Debug)]
pub struct MessageIdCounter {
    next: AtomicI32,
}

impl MessageIdCounter {
    pub const fn new() -> Self {
        Self {
            next: AtomicI32::new(0),
        }
    }

    #[cfg(test)]
    fn starting_at(value: i32) -> Self {
        Self {
            next: AtomicI32::new(value),
        }
    }

    /// Hand out the next id.
    pub fn next(&self) -> i32 {
        let result = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(if current == i32::MAX { 0 } else { current + 1 })
            });
        match result {
            Ok(previous) => previous,
            // fetch_update only fails when the closure returns None.
            Err(previous) => previous,
        }
    }
}

impl Default for MessageIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: MessageIdCounter = MessageIdCounter::new();

/// Next id from the process-wide counter.
pub fn next_message_id() -> i32 {
    GLOBAL.next()
}
