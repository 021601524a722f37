//! The queued synchronizer framework and its substrate.
//!
//! `state`/`node`/`queue` are the plumbing; `synchronizer`/`condition` are the
//! acquire/release engine built on top of them; everything below that
//! (`mutex`, `rwlock`, `semaphore`, `countdown_latch`, `barrier`) is a
//! concrete state-word interpretation: each subclass defines mutexes,
//! read-write locks, semaphores, countdown latches, and barriers merely by
//! defining how the state word is interpreted.

mod state;
mod node;
mod queue;
mod synchronizer;
mod condition;

mod mutex;
mod rwlock;
mod semaphore;
mod countdown_latch;
mod barrier;

pub use state::AtomicStateWord;
pub use node::{Mode, WaitNode};
pub use queue::SyncQueue;
pub use synchronizer::{AcquireRelease, CancelToken, Synchronizer};
pub use condition::Condition;

pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwLock, ReadGuard, WriteGuard};
pub use semaphore::Semaphore;
pub use countdown_latch::CountDownLatch;
pub use barrier::CyclicBarrier;
