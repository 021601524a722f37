//! A one-shot countdown gate: state word is the remaining count,
//! shared-mode acquire just checks it has reached zero.

use super::state::AtomicStateWord;
use super::synchronizer::{AcquireRelease, CancelToken, Synchronizer};
use crate::error::SyncResult;
use std::time::Duration;

struct LatchSync;

impl AcquireRelease for LatchSync {
    fn try_acquire_shared(&self, state: &AtomicStateWord, _arg: i32) -> i32 {
        if state.get() == 0 {
            1
        } else {
            -1
        }
    }

    fn try_release_shared(&self, state: &AtomicStateWord, _arg: i32) -> bool {
        loop {
            let count = state.get();
            if count == 0 {
                return false;
            }
            let next = count - 1;
            if state.compare_and_set(count, next) {
                return next == 0;
            }
        }
    }
}

/// A latch that opens once `count_down` has been called `count` times;
/// waiters parked before it opens are all released together.
pub struct CountDownLatch {
    sync: Synchronizer<LatchSync>,
}

impl CountDownLatch {
    pub fn new(count: i32) -> Self {
        Self { sync: Synchronizer::new(count, LatchSync) }
    }

    pub fn count_down(&self) {
        self.sync.release_shared(1);
    }

    pub fn wait(&self) {
        self.sync.acquire_shared(1);
    }

    pub fn wait_cancellable(&self, token: &CancelToken) -> SyncResult<()> {
        self.sync.acquire_shared_cancellable(1, token)
    }

    /// Returns `true` if the latch opened before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.sync.try_acquire_shared_timeout(1, timeout, None)
    }

    pub fn count(&self) -> i32 {
        self.sync.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn waiters_released_on_final_count_down() {
        let latch = Arc::new(CountDownLatch::new(3));
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(10));
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 1);
        latch.count_down();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn zero_count_never_blocks() {
        let latch = CountDownLatch::new(0);
        latch.wait();
        assert!(latch.wait_timeout(Duration::ZERO));
    }
}
