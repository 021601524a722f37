//! A counting semaphore: state word is the permit count, acquired/released
//! in shared mode.

use super::state::AtomicStateWord;
use super::synchronizer::{AcquireRelease, CancelToken, Synchronizer};
use crate::error::SyncResult;
use std::time::Duration;

struct SemaphoreSync;

impl AcquireRelease for SemaphoreSync {
    fn try_acquire_shared(&self, state: &AtomicStateWord, arg: i32) -> i32 {
        loop {
            let available = state.get();
            let remaining = available - arg;
            if remaining < 0 {
                return remaining;
            }
            if state.compare_and_set(available, remaining) {
                return remaining;
            }
        }
    }

    fn try_release_shared(&self, state: &AtomicStateWord, arg: i32) -> bool {
        loop {
            let current = state.get();
            let next = current
                .checked_add(arg)
                .expect("semaphore permit count overflowed i32");
            if state.compare_and_set(current, next) {
                return true;
            }
        }
    }
}

/// A fair counting semaphore: `acquire(n)` blocks until `n` permits are
/// available, `release(n)` returns them.
pub struct Semaphore {
    sync: Synchronizer<SemaphoreSync>,
}

impl Semaphore {
    pub fn new(permits: i32) -> Self {
        Self { sync: Synchronizer::new(permits, SemaphoreSync) }
    }

    pub fn acquire(&self, permits: i32) {
        self.sync.acquire_shared(permits);
    }

    pub fn acquire_cancellable(&self, permits: i32, token: &CancelToken) -> SyncResult<()> {
        self.sync.acquire_shared_cancellable(permits, token)
    }

    pub fn try_acquire_timeout(&self, permits: i32, timeout: Duration) -> bool {
        self.sync.try_acquire_shared_timeout(permits, timeout, None)
    }

    /// Non-blocking; returns `false` without waiting if not enough permits
    /// are currently available.
    pub fn try_acquire(&self, permits: i32) -> bool {
        self.try_acquire_timeout(permits, Duration::ZERO)
    }

    pub fn release(&self, permits: i32) {
        self.sync.release_shared(permits);
    }

    pub fn available_permits(&self) -> i32 {
        self.sync.state()
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_blocks_until_permits_available() {
        let sem = Arc::new(Semaphore::new(0));
        let s2 = sem.clone();
        let handle = thread::spawn(move || {
            s2.acquire(1);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(sem.has_queued_threads());
        sem.release(1);
        handle.join().unwrap();
    }

    #[test]
    fn try_acquire_fails_fast_when_empty() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire(1));
        assert!(!sem.try_acquire(1));
        sem.release(1);
        assert!(sem.try_acquire(1));
    }

    #[test]
    fn permits_never_exceed_bookkeeping_under_contention() {
        let sem = Arc::new(Semaphore::new(4));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || {
                    sem.acquire(1);
                    thread::sleep(Duration::from_millis(1));
                    sem.release(1);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sem.available_permits(), 4);
    }
}
