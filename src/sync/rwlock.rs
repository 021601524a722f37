//! A fair reader/writer lock built on the synchronizer's shared-mode half.
//!
//! State word follows the classic AQS `ReentrantReadWriteLock` packing: the
//! upper 16 bits count active readers, the lower 16 bits are `0` or `1` for
//! "a writer holds it" (non-reentrant, so never more than `1`). Readers and
//! the writer are mutually exclusive; multiple readers may hold it at once.

use super::state::AtomicStateWord;
use super::synchronizer::{AcquireRelease, CancelToken, Synchronizer};
use crate::error::SyncResult;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex as StdMutex;
use std::thread::ThreadId;
use std::time::Duration;

const SHARED_UNIT: i32 = 1 << 16;
const EXCLUSIVE_MASK: i32 = (1 << 16) - 1;

fn shared_count(state: i32) -> i32 {
    ((state as u32) >> 16) as i32
}

fn exclusive_count(state: i32) -> i32 {
    state & EXCLUSIVE_MASK
}

pub(crate) struct RwLockSync {
    owner: StdMutex<Option<ThreadId>>,
}

impl AcquireRelease for RwLockSync {
    fn try_acquire(&self, state: &AtomicStateWord, _arg: i32) -> bool {
        let c = state.get();
        if c != 0 {
            // Either a reader holds it (blocks the writer) or a writer
            // already does — non-reentrant, so a second write acquire from
            // the same thread is refused too.
            return false;
        }
        if !state.compare_and_set(c, c + 1) {
            return false;
        }
        *self.owner.lock().unwrap() = Some(std::thread::current().id());
        true
    }

    fn try_release(&self, state: &AtomicStateWord, _arg: i32) -> bool {
        *self.owner.lock().unwrap() = None;
        state.set(0);
        true
    }

    fn try_acquire_shared(&self, state: &AtomicStateWord, _arg: i32) -> i32 {
        loop {
            let c = state.get();
            if exclusive_count(c) != 0 {
                return -1;
            }
            let next = c + SHARED_UNIT;
            if state.compare_and_set(c, next) {
                return 1;
            }
        }
    }

    fn try_release_shared(&self, state: &AtomicStateWord, _arg: i32) -> bool {
        loop {
            let c = state.get();
            let next = c - SHARED_UNIT;
            if state.compare_and_set(c, next) {
                return next == 0;
            }
        }
    }

    fn is_held_exclusively(&self, state: &AtomicStateWord) -> bool {
        exclusive_count(state.get()) != 0 && *self.owner.lock().unwrap() == Some(std::thread::current().id())
    }
}

/// A reader/writer lock with FIFO-fair queueing between readers and the
/// writer.
pub struct RwLock<T> {
    sync: Synchronizer<RwLockSync>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            sync: Synchronizer::new(0, RwLockSync { owner: StdMutex::new(None) }),
            data: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        self.sync.acquire_shared(1);
        ReadGuard { lock: self }
    }

    pub fn read_cancellable(&self, token: &CancelToken) -> SyncResult<ReadGuard<'_, T>> {
        self.sync.acquire_shared_cancellable(1, token)?;
        Ok(ReadGuard { lock: self })
    }

    pub fn try_read_timeout(&self, timeout: Duration) -> Option<ReadGuard<'_, T>> {
        if self.sync.try_acquire_shared_timeout(1, timeout, None) {
            Some(ReadGuard { lock: self })
        } else {
            None
        }
    }

    pub fn write(&self) -> WriteGuard<'_, T> {
        self.sync.acquire(1);
        WriteGuard { lock: self }
    }

    pub fn write_cancellable(&self, token: &CancelToken) -> SyncResult<WriteGuard<'_, T>> {
        self.sync.acquire_cancellable(1, token)?;
        Ok(WriteGuard { lock: self })
    }

    pub fn try_write_timeout(&self, timeout: Duration) -> Option<WriteGuard<'_, T>> {
        if self.sync.try_acquire_timeout(1, timeout, None) {
            Some(WriteGuard { lock: self })
        } else {
            None
        }
    }
}

pub struct ReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.sync.release_shared(1);
    }
}

pub struct WriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.sync.release(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_readers_see_each_other() {
        let lock = Arc::new(RwLock::new(5));
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1, 5);
        assert_eq!(*r2, 5);
    }

    #[test]
    fn writer_excludes_readers() {
        let lock = Arc::new(RwLock::new(0));
        let guard = lock.write();
        let l2 = lock.clone();
        let handle = thread::spawn(move || {
            let r = l2.read();
            *r
        });
        thread::sleep(Duration::from_millis(20));
        assert!(lock.sync.has_queued_threads());
        drop(guard);
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let lock = RwLock::new(0);
        *lock.write() = 42;
        assert_eq!(*lock.read(), 42);
    }
}
