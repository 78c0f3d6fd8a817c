//! Control-response chain
//!
//! FIFO between the WRITE path, which produces responses, and the READ
//! path, which consumes exactly one per READ CCW. It has its own lock,
//! separate from the group state and the data-path control.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// One queued control response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResponse {
    pub data: Vec<u8>,
    /// Short description for logs
    pub tag: &'static str,
}

#[derive(Debug, Default)]
struct ChainInner {
    queue: VecDeque<PendingResponse>,
    /// Readers currently blocked in `wait_next`
    waiters: usize,
    /// Set by `halt`, cleared when the next READ starts
    halted: bool,
}

#[derive(Debug, Default)]
pub struct ResponseChain {
    inner: Mutex<ChainInner>,
    cond: Condvar,
}

impl ResponseChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, data: Vec<u8>, tag: &'static str) {
        let mut inner = self.inner.lock();
        inner.queue.push_back(PendingResponse { data, tag });
        self.cond.notify_one();
    }

    /// A READ CCW starts: a halt aimed at an earlier one no longer applies
    pub fn begin_read(&self) {
        self.inner.lock().halted = false;
    }

    /// Dequeue without blocking
    pub fn try_next(&self) -> Option<PendingResponse> {
        self.inner.lock().queue.pop_front()
    }

    /// Block until a response is queued; `None` once halted
    pub fn wait_next(&self) -> Option<PendingResponse> {
        let mut inner = self.inner.lock();
        inner.waiters += 1;
        let result = loop {
            if inner.halted {
                break None;
            }
            if let Some(resp) = inner.queue.pop_front() {
                break Some(resp);
            }
            self.cond.wait(&mut inner);
        };
        inner.waiters -= 1;
        result
    }

    /// End the READ in progress without data. Sticks until `begin_read`, so
    /// a reader that has not started waiting yet still sees it.
    pub fn halt(&self) {
        let mut inner = self.inner.lock();
        inner.halted = true;
        self.cond.notify_all();
    }

    /// Drop every queued response
    pub fn clear(&self) {
        self.inner.lock().queue.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn waiters(&self) -> usize {
        self.inner.lock().waiters
    }
}
