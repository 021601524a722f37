//! `Synchronizer` — the acquire/release engine.
//!
//! This is the framework core. Concrete primitives (`Mutex`, `RwLock`,
//! `Semaphore`, `CountDownLatch`, `CyclicBarrier`) are thin
//! [`AcquireRelease`] implementations layered on top: each one defines
//! mutexes, read-write locks, semaphores, countdown latches, and barriers
//! merely by defining how the state word is interpreted.

use super::node::{Mode, WaitNode, CANCELLED, PROPAGATE, SIGNAL};
use super::queue::SyncQueue;
use super::state::AtomicStateWord;
use crate::error::{SyncError, SyncResult};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::Thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// Hooks a concrete synchronizer (mutex, rwlock, ...) provides to interpret
/// the shared state word, modeled as an interface rather than inheritance.
///
/// Every default implementation panics with an "unsupported" message: a
/// synchronizer that only ever acquires exclusively need not implement the
/// shared-mode hooks, and vice versa.
pub trait AcquireRelease {
    fn try_acquire(&self, _state: &AtomicStateWord, _arg: i32) -> bool {
        panic!("try_acquire: unsupported by this AcquireRelease impl")
    }
    fn try_release(&self, _state: &AtomicStateWord, _arg: i32) -> bool {
        panic!("try_release: unsupported by this AcquireRelease impl")
    }
    fn try_acquire_shared(&self, _state: &AtomicStateWord, _arg: i32) -> i32 {
        panic!("try_acquire_shared: unsupported by this AcquireRelease impl")
    }
    fn try_release_shared(&self, _state: &AtomicStateWord, _arg: i32) -> bool {
        panic!("try_release_shared: unsupported by this AcquireRelease impl")
    }
    fn is_held_exclusively(&self, _state: &AtomicStateWord) -> bool {
        panic!("is_held_exclusively: unsupported by this AcquireRelease impl")
    }
}

/// A cooperative cancellation handle passed to the `*_cancellable` acquire
/// family. Rust has no ambient per-thread interrupt flag to observe, so
/// callers cooperate explicitly by cloning and cancelling one of these.
///
/// While a thread is parked waiting on a token, it registers itself as the
/// token's current waiter; `cancel` unparks that thread directly instead of
/// relying on some unrelated release to wake it up.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<CancelTokenInner>);

#[derive(Default)]
struct CancelTokenInner {
    cancelled: AtomicBool,
    waiter: Mutex<Option<Thread>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token and immediately unpark whichever thread is currently
    /// registered as waiting on it, if any.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
        if let Some(thread) = self.0.waiter.lock().unwrap().as_ref() {
            thread.unpark();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Record the current thread as this token's waiter for the duration of
    /// a parking loop. Must be paired with [`Self::unregister_waiter`] once
    /// the wait is over.
    pub(crate) fn register_waiter(&self) {
        *self.0.waiter.lock().unwrap() = Some(std::thread::current());
    }

    pub(crate) fn unregister_waiter(&self) {
        *self.0.waiter.lock().unwrap() = None;
    }
}

/// The spin threshold below which a timed park is not worth its own overhead.
const SPIN_THRESHOLD: Duration = Duration::from_nanos(1000);

pub struct Synchronizer<S> {
    pub(crate) state: AtomicStateWord,
    pub(crate) queue: SyncQueue,
    pub(crate) sync: S,
}

impl<S: AcquireRelease> Synchronizer<S> {
    pub const fn new(initial_state: i32, sync: S) -> Self {
        Self {
            state: AtomicStateWord::new(initial_state),
            queue: SyncQueue::new(),
            sync,
        }
    }

    pub fn state(&self) -> i32 {
        self.state.get()
    }

    pub fn hooks(&self) -> &S {
        &self.sync
    }

    // ---- exclusive acquire -------------------------------------------------

    /// Uninterruptible, unbounded exclusive acquire.
    pub fn acquire(&self, arg: i32) {
        if self.sync.try_acquire(&self.state, arg) {
            return;
        }
        self.acquire_queued(arg, None, None);
    }

    /// Exclusive acquire that returns early with [`SyncError::Interrupted`]
    /// if `token` is cancelled before acquisition completes.
    pub fn acquire_cancellable(&self, arg: i32, token: &CancelToken) -> SyncResult<()> {
        if self.sync.try_acquire(&self.state, arg) {
            return Ok(());
        }
        if self.acquire_queued(arg, None, Some(token)) {
            Err(SyncError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Exclusive acquire bounded by `timeout`. Returns `true` if acquired.
    pub fn try_acquire_timeout(&self, arg: i32, timeout: Duration, token: Option<&CancelToken>) -> bool {
        if self.sync.try_acquire(&self.state, arg) {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        !self.acquire_queued(arg, Some(deadline), token)
    }

    /// Core acquire loop shared by every exclusive acquire variant.
    ///
    /// The node is heap-allocated and leaked (see the allocation note on
    /// [`WaitNode`]) so its address stays valid for as long as `SyncQueue` or
    /// any predecessor/successor might hold a raw pointer to it — including
    /// well past the point where this function returns, since a node that
    /// wins acquisition becomes `head`, which outlives this call.
    ///
    /// Returns `true` on cancel/timeout (acquisition abandoned), `false` on
    /// success.
    fn acquire_queued(&self, arg: i32, deadline: Option<Instant>, token: Option<&CancelToken>) -> bool {
        let node: &WaitNode = Box::leak(Box::new(WaitNode::new(Mode::Exclusive)));
        self.queue.enqueue(node);
        self.dequeue_and_acquire(node, arg, deadline, token)
    }

    /// Spins/parks `node` (already linked into the sync queue) until it
    /// becomes acquirable. Shared by fresh acquires and by
    /// [`Condition::await`]'s reacquire-after-wait step.
    pub(crate) fn dequeue_and_acquire(
        &self,
        node: &WaitNode,
        arg: i32,
        deadline: Option<Instant>,
        token: Option<&CancelToken>,
    ) -> bool {
        if let Some(t) = token {
            t.register_waiter();
        }
        let abandoned = loop {
            let p = node.prev();
            if !p.is_null() && p == self.queue.head() && self.sync.try_acquire(&self.state, arg) {
                self.queue.set_head(node);
                unsafe { (*p).set_next(ptr::null_mut()) };
                break false;
            }
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break true;
                }
                if should_park_after_failed_acquire(node, p) {
                    if remaining > SPIN_THRESHOLD {
                        std::thread::park_timeout(remaining);
                    }
                    if token.map_or(false, |t| t.is_cancelled()) {
                        break true;
                    }
                }
            } else if should_park_after_failed_acquire(node, p) {
                std::thread::park();
                if token.map_or(false, |t| t.is_cancelled()) {
                    break true;
                }
            }
        };
        if let Some(t) = token {
            t.unregister_waiter();
        }
        if abandoned {
            self.cancel_acquire(node);
        }
        abandoned
    }

    // ---- shared acquire -----------------------------------------------------

    pub fn acquire_shared(&self, arg: i32) {
        if self.sync.try_acquire_shared(&self.state, arg) >= 0 {
            return;
        }
        self.acquire_shared_queued(arg, None, None);
    }

    pub fn acquire_shared_cancellable(&self, arg: i32, token: &CancelToken) -> SyncResult<()> {
        if self.sync.try_acquire_shared(&self.state, arg) >= 0 {
            return Ok(());
        }
        if self.acquire_shared_queued(arg, None, Some(token)) {
            Err(SyncError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub fn try_acquire_shared_timeout(&self, arg: i32, timeout: Duration, token: Option<&CancelToken>) -> bool {
        if self.sync.try_acquire_shared(&self.state, arg) >= 0 {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        !self.acquire_shared_queued(arg, Some(deadline), token)
    }

    fn acquire_shared_queued(&self, arg: i32, deadline: Option<Instant>, token: Option<&CancelToken>) -> bool {
        let node: &WaitNode = Box::leak(Box::new(WaitNode::new(Mode::Shared)));
        self.queue.enqueue(node);
        if let Some(t) = token {
            t.register_waiter();
        }
        let abandoned = loop {
            let p = node.prev();
            if !p.is_null() && p == self.queue.head() {
                let r = self.sync.try_acquire_shared(&self.state, arg);
                if r >= 0 {
                    self.set_head_and_propagate(node, r);
                    unsafe { (*p).set_next(ptr::null_mut()) };
                    break false;
                }
            }
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break true;
                }
                if should_park_after_failed_acquire(node, p) {
                    if remaining > SPIN_THRESHOLD {
                        std::thread::park_timeout(remaining);
                    }
                    if token.map_or(false, |t| t.is_cancelled()) {
                        break true;
                    }
                }
            } else if should_park_after_failed_acquire(node, p) {
                std::thread::park();
                if token.map_or(false, |t| t.is_cancelled()) {
                    break true;
                }
            }
        };
        if let Some(t) = token {
            t.unregister_waiter();
        }
        if abandoned {
            self.cancel_acquire(node);
        }
        abandoned
    }

    fn set_head_and_propagate(&self, node: &WaitNode, propagate: i32) {
        let old_head = self.queue.head();
        self.queue.set_head(node);
        let old_head_status = if old_head.is_null() { 0 } else { unsafe { (*old_head).status() } };
        let new_head_status = node.status();
        if propagate > 0 || old_head_status < 0 || new_head_status < 0 {
            let s = node.next();
            if s.is_null() || unsafe { (*s).mode == Mode::Shared } {
                self.do_release_shared();
            }
        }
    }

    // ---- release ------------------------------------------------------------

    /// Exclusive release. Returns whatever `try_release` returned.
    pub fn release(&self, arg: i32) -> bool {
        if self.sync.try_release(&self.state, arg) {
            let h = self.queue.head();
            if !h.is_null() && unsafe { (*h).status() } != 0 {
                self.queue.unpark_successor(unsafe { &*h });
            }
            true
        } else {
            false
        }
    }

    pub fn release_shared(&self, arg: i32) -> bool {
        if self.sync.try_release_shared(&self.state, arg) {
            self.do_release_shared();
            true
        } else {
            false
        }
    }

    /// Propagate a shared release forward: wake the head's successor if
    /// it's waiting on a signal, otherwise mark the head for propagation so
    /// a concurrent release doesn't lose the wakeup.
    pub(crate) fn do_release_shared(&self) {
        loop {
            let h = self.queue.head();
            let t = self.queue.tail();
            if !h.is_null() && h != t {
                let ws = unsafe { (*h).status() };
                if ws == SIGNAL {
                    if !unsafe { (*h).cas_status(SIGNAL, 0) } {
                        continue;
                    }
                    self.queue.unpark_successor(unsafe { &*h });
                } else if ws == 0 {
                    if !unsafe { (*h).cas_status(0, PROPAGATE) } {
                        continue;
                    }
                }
            }
            if self.queue.head() == h {
                break;
            }
        }
    }

    // ---- cancellation ---------------------------------------------------------

    /// Invoked whenever an acquire attempt aborts (timeout or cancel token
    /// tripped) to splice the abandoned node out of the queue.
    fn cancel_acquire(&self, node: &WaitNode) {
        node.clear_thread();
        let mut pred = node.prev();
        while !pred.is_null() && unsafe { (*pred).status() } > 0 {
            pred = unsafe { (*pred).prev() };
        }
        node.set_prev(pred);
        let pred_next = if pred.is_null() { ptr::null_mut() } else { unsafe { (*pred).next() } };

        node.set_status(CANCELLED);

        let node_ptr = node as *const WaitNode as *mut WaitNode;
        if node_ptr == self.queue.tail() {
            if self.compare_and_set_tail(node_ptr, pred) {
                self.compare_and_set_next(pred, pred_next, ptr::null_mut());
            }
        } else {
            let pred_is_head = pred == self.queue.head();
            if !pred.is_null() && !pred_is_head {
                let pred_ws = unsafe { (*pred).status() };
                let pred_ok = pred_ws == SIGNAL || (pred_ws <= 0 && unsafe { (*pred).cas_status(pred_ws, SIGNAL) });
                if pred_ok {
                    let next = node.next();
                    if !next.is_null() && unsafe { (*next).status() } <= 0 {
                        self.compare_and_set_next(pred, pred_next, next);
                        trace!("cancel_acquire: unlinked cancelled node via predecessor splice");
                        node.set_next(node_ptr);
                        return;
                    }
                }
            }
            self.queue.unpark_successor(node);
        }
        node.set_next(node_ptr);
    }

    fn compare_and_set_tail(&self, expect: *mut WaitNode, update: *mut WaitNode) -> bool {
        // `tail` lives on `SyncQueue`; expose the CAS through a tiny trampoline
        // so `cancel_acquire` doesn't need a second way to reach it.
        self.queue.cas_tail(expect, update)
    }

    fn compare_and_set_next(&self, node: *mut WaitNode, expect: *mut WaitNode, update: *mut WaitNode) {
        if node.is_null() {
            return;
        }
        unsafe { (*node).cas_next(expect, update) };
    }

    // ---- inspection ----------------------------------------------------

    pub fn has_queued_threads(&self) -> bool {
        self.queue.has_queued_threads()
    }

    pub fn queue_length(&self) -> usize {
        self.queue.queue_length()
    }

    /// The longest-waiting queued thread, if any.
    pub fn first_queued_thread(&self) -> Option<std::thread::Thread> {
        self.queue.first_queued_thread()
    }

    /// `true` if any thread has ever had to queue for this synchronizer.
    /// Unlike `has_queued_threads`, this never resets once a queue has been
    /// lazily installed: it answers "has this ever been contended", not
    /// "is it contended right now".
    pub fn has_contended(&self) -> bool {
        !self.queue.head().is_null()
    }

    /// A fresh condition queue tied to this synchronizer.
    pub fn new_condition(&self) -> super::condition::Condition<'_, S> {
        super::condition::Condition::new(self)
    }
}

/// After a failed acquire attempt, decides whether the caller should park:
/// splices past already-cancelled predecessors and arms the predecessor's
/// signal bit first if needed.
fn should_park_after_failed_acquire(node: &WaitNode, pred: *mut WaitNode) -> bool {
    if pred.is_null() {
        return false;
    }
    let ws = unsafe { (*pred).status() };
    if ws == SIGNAL {
        return true;
    }
    if ws > 0 {
        // Splice past cancelled predecessors.
        let mut p = pred;
        let mut cur = unsafe { (*p).prev() };
        while !cur.is_null() && unsafe { (*cur).status() } > 0 {
            p = cur;
            cur = unsafe { (*p).prev() };
        }
        node.set_prev(cur);
        if !cur.is_null() {
            unsafe { (*cur).set_next(node as *const WaitNode as *mut WaitNode) };
        }
        false
    } else {
        unsafe { (*pred).cas_status(ws, SIGNAL) };
        false
    }
}

unsafe impl<S: Send> Send for Synchronizer<S> {}
unsafe impl<S: Sync> Sync for Synchronizer<S> {}
