//! A reusable rendezvous point for a fixed number of parties.
//!
//! Unlike `Mutex`/`RwLock`/`Semaphore`/`CountDownLatch`, a cyclic barrier
//! isn't a state-word acquire at all — there is nothing to hand off, only a
//! count of parties that must all reach the same point before any of them
//! proceeds, and a fresh "generation" for the next round. Built directly on
//! `std::sync::{Mutex, Condvar}` rather than on [`super::Synchronizer`] for
//! that reason.

use crate::error::{SyncError, SyncResult};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct State {
    count: usize,
    /// Bumped every time a generation completes normally. A waiter compares
    /// the id it captured on entry against the live one to tell "my
    /// generation released" apart from a spurious wakeup.
    generation: u64,
    broken: bool,
}

/// A barrier for `parties` threads that blocks each caller of [`Self::await_barrier`]
/// until all of them have arrived, then releases them together and resets
/// for reuse.
pub struct CyclicBarrier {
    parties: usize,
    action: Option<Box<dyn Fn() + Send + Sync>>,
    state: Mutex<State>,
    released: Condvar,
}

impl CyclicBarrier {
    pub fn new(parties: usize) -> Self {
        Self::with_action(parties, None)
    }

    /// Like [`Self::new`], but runs `action` once per generation, in the
    /// thread that completes it, before releasing anyone else.
    pub fn with_barrier_action(parties: usize, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_action(parties, Some(Box::new(action)))
    }

    fn with_action(parties: usize, action: Option<Box<dyn Fn() + Send + Sync>>) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");
        Self {
            parties,
            action,
            state: Mutex::new(State { count: parties, generation: 0, broken: false }),
            released: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Block until every party has called this, returning this thread's
    /// zero-based arrival index (the last arriver — the one that ran the
    /// barrier action, if any — always gets index `0`).
    pub fn await_barrier(&self) -> SyncResult<usize> {
        self.await_deadline(None)
    }

    /// Like [`Self::await_barrier`], breaking the barrier for every party if
    /// `timeout` elapses before the last one arrives.
    pub fn await_timeout(&self, timeout: Duration) -> SyncResult<usize> {
        self.await_deadline(Some(Instant::now() + timeout))
    }

    fn await_deadline(&self, deadline: Option<Instant>) -> SyncResult<usize> {
        let mut guard = self.state.lock().unwrap();
        if guard.broken {
            return Err(SyncError::BrokenBarrier);
        }
        let my_generation = guard.generation;
        let index = guard.count - 1;
        guard.count -= 1;

        if guard.count == 0 {
            if let Some(action) = &self.action {
                action();
            }
            guard.count = self.parties;
            guard.generation = guard.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(0);
        }

        loop {
            if guard.broken {
                return Err(SyncError::BrokenBarrier);
            }
            if guard.generation != my_generation {
                return Ok(index);
            }
            guard = match deadline {
                None => self.released.wait(guard).unwrap(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        guard.broken = true;
                        self.released.notify_all();
                        return Err(SyncError::BrokenBarrier);
                    }
                    self.released.wait_timeout(guard, remaining).unwrap().0
                }
            };
        }
    }

    /// Forcibly breaks the current generation; every party already waiting,
    /// and every subsequent `await_barrier` call, gets `BrokenBarrier` until
    /// the barrier is manually reset.
    pub fn reset(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.broken = true;
        self.released.notify_all();
        guard.count = self.parties;
        guard.broken = false;
    }

    pub fn waiting_parties(&self) -> usize {
        self.parties - self.state.lock().unwrap().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn all_parties_release_together() {
        let barrier = Arc::new(CyclicBarrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.await_barrier().unwrap())
            })
            .collect();
        let mut indices: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn barrier_action_runs_once_per_generation() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = runs.clone();
        let barrier = Arc::new(CyclicBarrier::with_barrier_action(2, move || {
            runs2.fetch_add(1, Ordering::SeqCst);
        }));
        for _ in 0..3 {
            let b2 = barrier.clone();
            let handle = thread::spawn(move || b2.await_barrier().unwrap());
            barrier.await_barrier().unwrap();
            handle.join().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn timeout_breaks_barrier_for_all_parties() {
        let barrier = Arc::new(CyclicBarrier::new(2));
        let result = barrier.await_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(SyncError::BrokenBarrier)));
    }
}
