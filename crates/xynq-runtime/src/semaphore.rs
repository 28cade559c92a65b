//! Counting semaphore for fiber fan-out.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::context::TaskContext;

/// Starts at `count`; every `signal` decrements; `wait` yields the calling
/// task until the counter reaches zero.
#[repr(align(64))]
pub struct TaskSemaphore {
    count: AtomicU32,
}

impl TaskSemaphore {
    pub fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
        }
    }

    pub fn signal(&self) {
        let prev = self.count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0);
    }

    pub fn wait(&self, tc: &TaskContext) {
        while self.count.load(Ordering::Acquire) != 0 {
            tc.yield_now();
        }
    }
}
