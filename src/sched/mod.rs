//! The scheduled executor core and its substrate.
//!
//! `task`/`heap` are the delay-queue plumbing; `core` is the scheduling
//! engine; `pool` is the external worker-thread collaborator that `core`
//! needs something to exercise it against.

mod heap;
mod task;
mod core;
mod pool;

pub use heap::DelayHeap;
pub use task::{ScheduledTask, NO_HEAP_INDEX};
pub use core::{Policies, ScheduledCore};
pub use pool::{PoolCollaborator, PoolState, ThreadFactory, WorkerPool};
