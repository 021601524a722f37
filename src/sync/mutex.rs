//! A fair, queue-backed mutual exclusion lock built on [`Synchronizer`].
//!
//! State word: `0` unlocked, `1` locked. Non-reentrant — re-locking from the
//! thread that already holds it deadlocks, exactly like `std::sync::Mutex`.

use super::synchronizer::{AcquireRelease, CancelToken, Synchronizer};
use super::state::AtomicStateWord;
use crate::error::SyncResult;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex as StdMutex;
use std::thread::ThreadId;
use std::time::Duration;

pub(crate) struct MutexSync {
    owner: StdMutex<Option<ThreadId>>,
}

impl AcquireRelease for MutexSync {
    fn try_acquire(&self, state: &AtomicStateWord, _arg: i32) -> bool {
        if state.compare_and_set(0, 1) {
            *self.owner.lock().unwrap() = Some(std::thread::current().id());
            true
        } else {
            false
        }
    }

    fn try_release(&self, state: &AtomicStateWord, _arg: i32) -> bool {
        *self.owner.lock().unwrap() = None;
        state.set(0);
        true
    }

    fn is_held_exclusively(&self, _state: &AtomicStateWord) -> bool {
        *self.owner.lock().unwrap() == Some(std::thread::current().id())
    }
}

/// A mutual-exclusion lock with FIFO wakeup order among waiters.
pub struct Mutex<T> {
    sync: Synchronizer<MutexSync>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            sync: Synchronizer::new(0, MutexSync { owner: StdMutex::new(None) }),
            data: UnsafeCell::new(value),
        }
    }

    /// Block uninterruptibly until acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.sync.acquire(1);
        MutexGuard { mutex: self }
    }

    /// Acquire, returning early if `token` is cancelled first.
    pub fn lock_cancellable(&self, token: &CancelToken) -> SyncResult<MutexGuard<'_, T>> {
        self.sync.acquire_cancellable(1, token)?;
        Ok(MutexGuard { mutex: self })
    }

    /// Acquire within `timeout`, returning `None` on expiry.
    pub fn try_lock_timeout(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        if self.sync.try_acquire_timeout(1, timeout, None) {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Non-blocking attempt.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.try_lock_timeout(Duration::ZERO)
    }

    /// A condition queue tied to this mutex. Must only be waited
    /// on while holding the lock.
    pub fn new_condition(&self) -> super::condition::Condition<'_, MutexSync> {
        self.sync.new_condition()
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    pub fn has_contended(&self) -> bool {
        self.sync.has_contended()
    }

    pub fn first_queued_thread(&self) -> Option<std::thread::Thread> {
        self.sync.first_queued_thread()
    }
}

/// RAII guard releasing the mutex on drop, in the style of
/// `std::sync::MutexGuard`.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.sync.release(0);
    }
}
