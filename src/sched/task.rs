//! `ScheduledTask`: payload, trigger time, period, sequence, heap index, and
//! a late-bound `outer_task` back-reference.

use once_cell::sync::{Lazy, OnceCell};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicIsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Monotonic-clock origin; every trigger time is stored as nanoseconds
/// elapsed since this instant so it fits in an `AtomicI64` rather than an
/// `Instant` (which carries no atomic representation).
static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

pub(crate) fn now_nanos() -> i64 {
    ORIGIN.elapsed().as_nanos() as i64
}

/// Sentinel `heap_index` for "not currently in a heap".
pub const NO_HEAP_INDEX: isize = -1;

/// A task queued on a [`super::heap::DelayHeap`].
///
/// `period == 0` is one-shot, `period > 0` is fixed-rate, `period < 0` is
/// fixed-delay (encoded as `-period`).
pub struct ScheduledTask {
    action: Mutex<Box<dyn FnMut() + Send>>,
    time: AtomicI64,
    period: i64,
    sequence: u64,
    heap_index: AtomicIsize,
    cancelled: AtomicBool,
    done: AtomicBool,
    /// Non-owning back-reference to the decorated wrapper this task should
    /// re-enqueue itself as on periodic reschedule. The wrapper owns the
    /// inner task; the inner task only ever upgrades this to look the
    /// wrapper up by identity, never to keep it alive.
    outer_task: OnceCell<Weak<ScheduledTask>>,
}

impl ScheduledTask {
    pub(crate) fn new(action: Box<dyn FnMut() + Send>, trigger_nanos: i64, period: i64, sequence: u64) -> Self {
        Self {
            action: Mutex::new(action),
            time: AtomicI64::new(trigger_nanos),
            period,
            sequence,
            heap_index: AtomicIsize::new(NO_HEAP_INDEX),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            outer_task: OnceCell::new(),
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.period != 0
    }

    pub(crate) fn is_fixed_rate(&self) -> bool {
        self.period > 0
    }

    pub(crate) fn period_nanos(&self) -> i64 {
        self.period.abs()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn trigger_nanos(&self) -> i64 {
        self.time.load(Ordering::Acquire)
    }

    pub(crate) fn set_trigger_nanos(&self, value: i64) {
        self.time.store(value, Ordering::Release);
    }

    /// Remaining delay until trigger, floored at zero (never negative).
    pub fn get_delay(&self) -> Duration {
        let remaining = self.trigger_nanos() - now_nanos();
        if remaining <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(remaining as u64)
        }
    }

    pub(crate) fn heap_index(&self) -> isize {
        self.heap_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_heap_index(&self, index: isize) {
        self.heap_index.store(index, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Marks the task cancelled; returns `true` if this call is the one
    /// that transitioned it, `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        let was_cancelled = self.cancelled.swap(true, Ordering::AcqRel);
        if !was_cancelled {
            self.done.store(true, Ordering::Release);
        }
        !was_cancelled
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub(crate) fn run(&self) {
        (self.action.lock().unwrap())();
    }

    pub(crate) fn bind_outer(self: &Arc<Self>, outer: &Arc<ScheduledTask>) {
        let _ = self.outer_task.set(Arc::downgrade(outer));
    }

    /// The decorated wrapper to re-enqueue for the next periodic run, or
    /// `self` if no decorator was ever bound.
    pub(crate) fn outer_or_self(self: &Arc<Self>) -> Arc<ScheduledTask> {
        self.outer_task.get().and_then(Weak::upgrade).unwrap_or_else(|| self.clone())
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.trigger_nanos() == other.trigger_nanos() && self.sequence == other.sequence
    }
}
impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by trigger time, breaking ties FIFO by `sequence`.
impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.trigger_nanos()
            .cmp(&other.trigger_nanos())
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_breaks_ties_by_sequence() {
        let a = ScheduledTask::new(Box::new(|| {}), 100, 0, 1);
        let b = ScheduledTask::new(Box::new(|| {}), 100, 0, 2);
        assert!(a < b);
    }

    #[test]
    fn cancel_is_idempotent_and_reports_first_caller() {
        let t = ScheduledTask::new(Box::new(|| {}), 0, 0, 0);
        assert!(t.cancel());
        assert!(!t.cancel());
        assert!(t.is_cancelled());
        assert!(t.is_done());
    }
}
