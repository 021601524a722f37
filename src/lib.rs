//! A queued synchronizer framework (mutex, read-write lock, semaphore,
//! countdown latch, cyclic barrier) built on a CAS-based CLH wait queue, and
//! a scheduled executor core (one-shot and periodic tasks on an indexed
//! delay heap) built on top of it.
//!
//! See [`sync`] for the blocking primitives and [`sched`] for the scheduler.

pub mod error;
pub mod sched;
pub mod sync;

pub use error::{SchedError, SchedResult, SyncError, SyncResult};
