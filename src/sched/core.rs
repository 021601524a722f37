//! `ScheduledCore`: submission, overflow-avoidance clamping, task execution,
//! and periodic re-enqueue.

use super::heap::DelayHeap;
use super::pool::{PoolCollaborator, PoolState, ThreadFactory, WorkerPool};
use super::task::{now_nanos, ScheduledTask};
use crate::error::{SchedError, SchedResult};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The three process-wide boolean policies names.
pub struct Policies {
    pub continue_periodic_after_shutdown: AtomicBool,
    pub execute_delayed_after_shutdown: AtomicBool,
    pub remove_on_cancel: AtomicBool,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            continue_periodic_after_shutdown: AtomicBool::new(false),
            execute_delayed_after_shutdown: AtomicBool::new(true),
            remove_on_cancel: AtomicBool::new(false),
        }
    }
}

/// Owns a [`DelayHeap`] and dispatches triggered tasks to worker threads
/// supplied by a [`PoolCollaborator`].
///
/// `pool` is set once, immediately after construction, via the same
/// late-bound-reference idiom as `ScheduledTask::outer_task`:
/// `WorkerPool`'s worker closure needs a `'static` handle back to this core,
/// which can't exist until the core itself is already behind an `Arc`.
pub struct ScheduledCore<P: PoolCollaborator = WorkerPool> {
    heap: Arc<DelayHeap>,
    policies: Policies,
    pool: OnceCell<Arc<P>>,
    sequencer: AtomicU64,
}

impl ScheduledCore<WorkerPool> {
    /// Build a core backed by `core_pool_size` named worker threads.
    pub fn new(core_pool_size: usize, thread_name_prefix: &'static str) -> Arc<Self> {
        let core = Arc::new(Self {
            heap: Arc::new(DelayHeap::new()),
            policies: Policies::default(),
            pool: OnceCell::new(),
            sequencer: AtomicU64::new(0),
        });
        let worker_core = Arc::downgrade(&core);
        let pool = WorkerPool::new(core_pool_size, ThreadFactory::new(thread_name_prefix), move || {
            if let Some(core) = worker_core.upgrade() {
                let task = core.heap.take();
                core.run_task(&task);
            }
        });
        let _ = core.pool.set(pool);
        core
    }

    pub fn shutdown(&self) {
        self.pool().shutdown();
        self.on_shutdown();
    }

    pub fn shutdown_now(&self) {
        self.pool().shutdown_now();
        self.on_shutdown();
    }

    pub fn pool_state(&self) -> PoolState {
        self.pool().pool_state()
    }
}

impl<P: PoolCollaborator> ScheduledCore<P> {
    fn pool(&self) -> &Arc<P> {
        self.pool.get().expect("ScheduledCore::pool read before construction finished")
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    fn next_sequence(&self) -> u64 {
        self.sequencer.fetch_add(1, Ordering::Relaxed)
    }

    /// overflow-avoidance clamp.
    fn trigger_time(&self, delay_nanos: i64) -> i64 {
        let delay_nanos = delay_nanos.max(0);
        if delay_nanos < i64::MAX >> 1 {
            now_nanos().wrapping_add(delay_nanos)
        } else {
            now_nanos().wrapping_add(self.overflow_free(delay_nanos))
        }
    }

    fn overflow_free(&self, delay_nanos: i64) -> i64 {
        match self.heap.peek_delay_nanos() {
            Some(head_delay) if head_delay < 0 && delay_nanos.wrapping_sub(head_delay) < 0 => i64::MAX.wrapping_add(head_delay),
            _ => delay_nanos,
        }
    }

    /// One-shot submission.
    pub fn schedule(&self, action: impl FnMut() + Send + 'static, delay: Duration) -> SchedResult<Arc<ScheduledTask>> {
        let trigger = self.trigger_time(delay.as_nanos() as i64);
        let task = Arc::new(ScheduledTask::new(Box::new(action), trigger, 0, self.next_sequence()));
        self.delayed_execute(task.clone())?;
        Ok(task)
    }

    pub fn schedule_at_fixed_rate(
        &self,
        action: impl FnMut() + Send + 'static,
        initial_delay: Duration,
        period: Duration,
    ) -> SchedResult<Arc<ScheduledTask>> {
        if period.is_zero() {
            return Err(SchedError::IllegalArgument("fixed-rate period must be positive"));
        }
        let trigger = self.trigger_time(initial_delay.as_nanos() as i64);
        let task = Arc::new(ScheduledTask::new(Box::new(action), trigger, period.as_nanos() as i64, self.next_sequence()));
        self.delayed_execute(task.clone())?;
        Ok(task)
    }

    pub fn schedule_with_fixed_delay(
        &self,
        action: impl FnMut() + Send + 'static,
        initial_delay: Duration,
        delay: Duration,
    ) -> SchedResult<Arc<ScheduledTask>> {
        if delay.is_zero() {
            return Err(SchedError::IllegalArgument("fixed-delay gap must be positive"));
        }
        let trigger = self.trigger_time(initial_delay.as_nanos() as i64);
        let task = Arc::new(ScheduledTask::new(Box::new(action), trigger, -(delay.as_nanos() as i64), self.next_sequence()));
        self.delayed_execute(task.clone())?;
        Ok(task)
    }

    /// Cancel `task`, removing it from the heap immediately if the
    /// `remove_on_cancel` policy is set and it's still present there.
    ///
    /// Returns `true` if this call is the one that transitioned the task to
    /// cancelled (matching [`crate::sched::ScheduledTask::cancel`]'s own
    /// return convention).
    pub fn cancel(&self, task: &Arc<ScheduledTask>) -> bool {
        let transitioned = task.cancel();
        if self.policies.remove_on_cancel.load(Ordering::Acquire) && task.heap_index() >= 0 {
            self.heap.remove(task);
        }
        transitioned
    }

    /// Submit `task` to the heap, then either run it immediately (starting
    /// a worker if needed) or roll it back out if the pool no longer
    /// permits work of its kind.
    fn delayed_execute(&self, task: Arc<ScheduledTask>) -> SchedResult<()> {
        if self.pool().pool_state() != PoolState::Running {
            self.reject(&task);
            return Err(SchedError::Rejected);
        }
        self.heap.offer(task.clone());
        if !self.can_run_in_current_run_state(task.is_periodic()) {
            if task.cancel() {
                self.heap.remove(&task);
            }
        } else {
            self.pool().ensure_prestart();
        }
        Ok(())
    }

    fn reject(&self, task: &ScheduledTask) {
        task.cancel();
        warn!("scheduled task rejected: pool state does not accept new submissions");
    }

    /// Whether a task of this kind (periodic or one-shot) is allowed to run
    /// given the pool's current lifecycle state and the configured shutdown
    /// policies.
    pub fn can_run_in_current_run_state(&self, is_periodic: bool) -> bool {
        match self.pool().pool_state() {
            PoolState::Running => true,
            PoolState::Shutdown => {
                if is_periodic {
                    self.policies.continue_periodic_after_shutdown.load(Ordering::Acquire)
                } else {
                    self.policies.execute_delayed_after_shutdown.load(Ordering::Acquire)
                }
            }
            PoolState::Stop | PoolState::Tidying | PoolState::Terminated => false,
        }
    }

    /// Run one triggered task (called by the worker loop after
    /// `DelayHeap::take()`), then reschedule it if it's periodic and still
    /// permitted.
    pub(crate) fn run_task(&self, task: &Arc<ScheduledTask>) {
        if !self.can_run_in_current_run_state(task.is_periodic()) {
            task.cancel();
            return;
        }
        if !task.is_periodic() {
            if !task.is_cancelled() {
                task.run();
                task.mark_done();
            }
            return;
        }
        if task.is_cancelled() {
            return;
        }
        task.run();
        if task.is_cancelled() {
            return;
        }
        let next = if task.is_fixed_rate() {
            task.trigger_nanos().wrapping_add(task.period_nanos())
        } else {
            now_nanos().wrapping_add(task.period_nanos())
        };
        task.set_trigger_nanos(next);
        self.re_execute_periodic(&task.outer_or_self());
    }

    /// Re-offer a periodic task for its next run, cancelling it instead if
    /// the pool no longer permits periodic work.
    fn re_execute_periodic(&self, task: &Arc<ScheduledTask>) {
        if self.can_run_in_current_run_state(true) {
            self.heap.offer(task.clone());
            if !self.can_run_in_current_run_state(true) {
                if task.cancel() {
                    self.heap.remove(task);
                }
            } else {
                self.pool().ensure_prestart();
            }
        } else {
            task.cancel();
        }
    }

    /// Invoked during graceful shutdown: cancel and drop anything the
    /// current policy no longer allows to run.
    pub fn on_shutdown(&self) {
        for task in self.heap.snapshot() {
            if task.is_cancelled() || !self.can_run_in_current_run_state(task.is_periodic()) {
                if task.cancel() {
                    debug!(sequence = task.sequence(), "on_shutdown: dropping disallowed task");
                }
                self.heap.remove(&task);
            }
        }
    }

    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn one_shot_runs_once() {
        let core = ScheduledCore::new(2, "core-test");
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        core.schedule(move || { c2.fetch_add(1, Ordering::SeqCst); }, Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_trigger_prevents_execution() {
        let core = ScheduledCore::new(1, "core-test-cancel");
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let task = core.schedule(move || { c2.fetch_add(1, Ordering::SeqCst); }, Duration::from_secs(10)).unwrap();
        assert!(task.cancel());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_with_remove_on_cancel_shrinks_heap() {
        let core = ScheduledCore::new(1, "core-test-cancel-removal");
        let before = core.heap_len();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let task = core.schedule(move || { c2.fetch_add(1, Ordering::SeqCst); }, Duration::from_secs(10)).unwrap();
        assert_eq!(core.heap_len(), before + 1);
        core.policies().remove_on_cancel.store(true, Ordering::SeqCst);
        assert!(core.cancel(&task));
        assert_eq!(core.heap_len(), before);
    }

    #[test]
    fn fixed_rate_runs_are_spaced_by_period_not_duration() {
        let core = ScheduledCore::new(2, "core-test-rate");
        let runs = Arc::new(Mutex::new(Vec::new()));
        let runs2 = runs.clone();
        let start = std::time::Instant::now();
        let _task = core
            .schedule_at_fixed_rate(
                move || {
                    runs2.lock().unwrap().push(start.elapsed());
                },
                Duration::from_millis(0),
                Duration::from_millis(40),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(180));
        let recorded = runs.lock().unwrap();
        assert!(recorded.len() >= 3, "expected at least 3 runs, got {}", recorded.len());
    }

    #[test]
    fn shutdown_drops_periodic_tasks_by_default() {
        let core = ScheduledCore::new(1, "core-test-shutdown");
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let task = core
            .schedule_with_fixed_delay(move || { c2.fetch_add(1, Ordering::SeqCst); }, Duration::from_millis(5), Duration::from_millis(20))
            .unwrap();
        std::thread::sleep(Duration::from_millis(15));
        core.shutdown();
        assert!(task.is_cancelled());
    }
}
