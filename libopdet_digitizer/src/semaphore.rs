use std::sync::{Condvar, Mutex, PoisonError};

/// A blocking counting semaphore with bulk increment and decrement.
///
/// This is the only primitive the DigitizerPool uses to move work between the
/// orchestrating thread and its workers. `increment` makes tokens available and
/// wakes any waiters; `decrement` blocks until enough tokens exist and takes them
/// all at once. There is no timeout.
///
/// Everything written by a thread before it calls `increment` is visible to the
/// thread whose `decrement` consumes those tokens (both go through the same mutex).
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `count` tokens
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    /// Add `n` tokens and wake all waiters
    pub fn increment(&self, n: usize) {
        // The counter is a plain integer, it can't be left half-updated by a panic
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += n;
        self.cv.notify_all();
    }

    /// Block until at least `n` tokens are available, then take `n` of them
    pub fn decrement(&self, n: usize) {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let mut count = self
            .cv
            .wait_while(count, |c| *c < n)
            .unwrap_or_else(PoisonError::into_inner);
        *count -= n;
    }

    /// Number of tokens currently held
    pub fn available(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
