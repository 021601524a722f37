//! Error taxonomy for the synchronizer framework and scheduled executor core.
//!
//! None of these are returned from hot, lock-free paths (queue splicing,
//! cancellation cleanup) — those are best-effort and never fail outwardly.
//! Errors surface only at the public acquire/release/schedule boundary.

/// Errors produced by [`crate::sync`] operations.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// A [`crate::sync::CancelToken`] was tripped while the calling thread was
    /// parked in an interruptible or timed acquire.
    #[error("acquire interrupted via cancel token")]
    Interrupted,
    /// A thread tried to release or signal a synchronizer it does not
    /// exclusively hold.
    #[error("current thread does not hold this synchronizer exclusively")]
    IllegalMonitorState,
    /// A [`crate::sync::CyclicBarrier`] party broke the barrier by timing
    /// out, cancelling, or panicking inside the barrier action; every other
    /// waiter for that generation is released with this error.
    #[error("barrier broken by another waiting party")]
    BrokenBarrier,
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors produced by [`crate::sched`] operations.
#[derive(thiserror::Error, Debug)]
pub enum SchedError {
    /// `schedule_at_fixed_rate`/`schedule_with_fixed_delay` were given a
    /// non-positive period/delay, or a zero duration where one is not
    /// meaningful.
    #[error("illegal argument: {0}")]
    IllegalArgument(&'static str),
    /// A task was submitted to a core whose [`crate::sched::PoolState`]
    /// does not allow it, and no rejection handler recovered.
    #[error("task rejected by scheduled core")]
    Rejected,
}

pub type SchedResult<T> = Result<T, SchedError>;
