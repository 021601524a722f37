//! The 32-bit state word shared by every [`crate::sync::Synchronizer`].
//!
//! The framework never interprets the bits itself; subclass hooks
//! (`AcquireRelease`) give them meaning. What the framework guarantees is the
//! memory-ordering contract: every mutation is an atomic CAS or a volatile
//! store, and every cross-thread observation is sequentially consistent. This
//! is never weakened on a case-by-case basis.

use core::fmt;
use core::sync::atomic::{AtomicI32, Ordering};

/// Atomic holder for a synchronizer's state word.
///
/// All operations use `Ordering::SeqCst`. This is stronger than the queue
/// link ordering (`Acquire`/`Release`, see [`crate::sync::node`]) by design:
/// the state word is the single source of truth subclasses branch on, so it
/// gets the strongest ordering the platform offers rather than the weakest
/// ordering that happens to be sufficient.
pub struct AtomicStateWord {
    value: AtomicI32,
}

impl AtomicStateWord {
    #[inline]
    pub const fn new(initial: i32) -> Self {
        Self { value: AtomicI32::new(initial) }
    }

    #[inline(always)]
    pub fn get(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub fn set(&self, new: i32) {
        self.value.store(new, Ordering::SeqCst);
    }

    /// Returns `true` if the swap from `expect` to `update` succeeded.
    #[inline(always)]
    pub fn compare_and_set(&self, expect: i32, update: i32) -> bool {
        self.value
            .compare_exchange(expect, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl fmt::Debug for AtomicStateWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicStateWord").field("value", &self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn cas_is_exclusive_under_contention() {
        let word = Arc::new(AtomicStateWord::new(0));
        let threads = 8;
        let per_thread = 10_000;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let word = word.clone();
                thread::spawn(move || {
                    let mut won = 0;
                    for _ in 0..per_thread {
                        loop {
                            let cur = word.get();
                            if word.compare_and_set(cur, cur + 1) {
                                won += 1;
                                break;
                            }
                        }
                    }
                    won
                })
            })
            .collect();
        let total: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, threads * per_thread);
        assert_eq!(word.get(), threads * per_thread);
    }
}
