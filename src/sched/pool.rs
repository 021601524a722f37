//! A minimal fixed-size worker pool acting as `ScheduledCore`'s external
//! collaborator.
//!
//! Real thread-pool concerns — work-stealing, dynamic core/max sizing,
//! keep-alive reaping — are out of scope here; `ScheduledCore` only needs
//! something that honors `ensure_prestart`/`PoolState` so it can actually be
//! exercised and tested. `N` named OS threads, each looping
//! `DelayHeap::take()` then running whatever `ScheduledCore` handed them, is
//! that something.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Lifecycle states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    Running = 0,
    Shutdown = 1,
    Stop = 2,
    Tidying = 3,
    Terminated = 4,
}

impl PoolState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PoolState::Running,
            1 => PoolState::Shutdown,
            2 => PoolState::Stop,
            3 => PoolState::Tidying,
            _ => PoolState::Terminated,
        }
    }
}

/// Names worker threads `"{prefix}-{n}"`, in the naming-builder idiom common
/// to thread-pool implementations (e.g. a `rayon`-style named registry).
pub struct ThreadFactory {
    prefix: &'static str,
    counter: AtomicUsize,
}

impl ThreadFactory {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, counter: AtomicUsize::new(0) }
    }

    fn spawn(&self, f: impl FnOnce() + Send + 'static) {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        std::thread::Builder::new()
            .name(format!("{}-{}", self.prefix, n))
            .spawn(f)
            .expect("failed to spawn scheduled-core worker thread");
    }
}

/// The contract `ScheduledCore` needs from its worker pool: a way to read
/// its shutdown state and a way to launch a worker up to capacity.
pub trait PoolCollaborator: Send + Sync {
    fn pool_state(&self) -> PoolState;
    /// Launch a new worker up to the configured core count, if one isn't
    /// already running.
    fn ensure_prestart(&self);
}

/// A fixed-size pool of worker threads, each running the closure it was
/// constructed with in a loop until the pool stops.
pub struct WorkerPool {
    core_pool_size: usize,
    state: AtomicU8,
    started: AtomicUsize,
    factory: ThreadFactory,
    worker_loop: Box<dyn Fn() + Send + Sync>,
    /// Late-bound handle to itself, same idiom as `ScheduledTask::outer_task`:
    /// set once right after construction so spawned workers can upgrade a
    /// `'static` strong reference without `WorkerPool` needing to borrow
    /// from the closures it hands out to its own factory.
    self_ref: OnceCell<Weak<WorkerPool>>,
}

impl WorkerPool {
    pub fn new(core_pool_size: usize, factory: ThreadFactory, worker_loop: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        let pool = Arc::new(Self {
            core_pool_size,
            state: AtomicU8::new(PoolState::Running as u8),
            started: AtomicUsize::new(0),
            factory,
            worker_loop: Box::new(worker_loop),
            self_ref: OnceCell::new(),
        });
        let _ = pool.self_ref.set(Arc::downgrade(&pool));
        pool
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PoolState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Stop accepting delayed work that the current policy disallows, but
    /// let already-running and permitted-delayed workers keep going.
    pub fn shutdown(&self) {
        let _ = self.state.compare_exchange(
            PoolState::Running as u8,
            PoolState::Shutdown as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Halt immediately; workers observe `Stop` on their next loop turn.
    pub fn shutdown_now(&self) {
        self.set_state(PoolState::Stop);
    }
}

impl PoolCollaborator for WorkerPool {
    fn pool_state(&self) -> PoolState {
        self.state()
    }

    fn ensure_prestart(&self) {
        if !matches!(self.state(), PoolState::Running | PoolState::Shutdown) {
            return;
        }
        loop {
            let started = self.started.load(Ordering::Acquire);
            if started >= self.core_pool_size {
                return;
            }
            if self
                .started
                .compare_exchange(started, started + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        let Some(strong) = self.self_ref.get().and_then(Weak::upgrade) else { return };
        self.factory.spawn(move || {
            while matches!(strong.state(), PoolState::Running | PoolState::Shutdown) {
                (strong.worker_loop)();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::time::Duration;

    #[test]
    fn ensure_prestart_caps_at_core_size() {
        let runs = Arc::new(Counter::new(0));
        let runs2 = runs.clone();
        let pool = WorkerPool::new(2, ThreadFactory::new("test-worker"), move || {
            runs2.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
        });
        for _ in 0..5 {
            pool.ensure_prestart();
        }
        std::thread::sleep(Duration::from_millis(30));
        pool.shutdown_now();
        std::thread::sleep(Duration::from_millis(10));
        assert!(runs.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn shutdown_now_stops_workers() {
        let pool = WorkerPool::new(1, ThreadFactory::new("test-worker"), || {
            std::thread::sleep(Duration::from_millis(1));
        });
        pool.ensure_prestart();
        pool.shutdown_now();
        assert_eq!(pool.state(), PoolState::Stop);
    }
}
