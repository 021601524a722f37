//! Condition sub-queues.
//!
//! Every `Condition` is a singly-linked list of `CONDITION`-status nodes
//! chained through `next_waiter`, private to the `Synchronizer` it was
//! created from. Every operation requires the calling thread to hold that
//! synchronizer exclusively — checked via `AcquireRelease::is_held_exclusively`
//! on every entry point.

use super::node::{Mode, WaitNode, CANCELLED, CONDITION};
use super::synchronizer::{AcquireRelease, CancelToken, Synchronizer};
use crate::error::{SyncError, SyncResult};
use std::ptr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct ListState {
    first: *mut WaitNode,
    last: *mut WaitNode,
}

// SAFETY: `ListState` is only ever touched from inside a `Mutex`, and every
// public `Condition` method first asserts the caller holds the backing
// synchronizer exclusively, so there is at most one logical owner at a time;
// the mutex exists to give `Condition` `Sync` rather than to arbitrate real
// contention.
unsafe impl Send for ListState {}

/// A per-synchronizer condition queue, obtained from
/// [`Synchronizer::new_condition`].
pub struct Condition<'a, S> {
    sync: &'a Synchronizer<S>,
    list: Mutex<ListState>,
}

impl<'a, S: AcquireRelease> Condition<'a, S> {
    pub(crate) fn new(sync: &'a Synchronizer<S>) -> Self {
        Self {
            sync,
            list: Mutex::new(ListState { first: ptr::null_mut(), last: ptr::null_mut() }),
        }
    }

    fn require_held(&self) -> SyncResult<()> {
        if self.sync.hooks().is_held_exclusively(&self.sync.state) {
            Ok(())
        } else {
            Err(SyncError::IllegalMonitorState)
        }
    }

    /// Append a fresh condition node, purging any cancelled nodes found at
    /// the list head along the way.
    fn add_condition_waiter(&self) -> &'static WaitNode {
        let node: &'static WaitNode = Box::leak(Box::new(WaitNode::new(Mode::Exclusive)));
        node.set_status(CONDITION);
        let mut list = self.list.lock().unwrap();
        if !list.last.is_null() && unsafe { (*list.last).status() } != CONDITION {
            self.unlink_cancelled_waiters(&mut list);
        }
        let node_ptr = node as *const WaitNode as *mut WaitNode;
        if list.last.is_null() {
            list.first = node_ptr;
        } else {
            unsafe { (*list.last).next_waiter.store(node_ptr, std::sync::atomic::Ordering::Release) };
        }
        list.last = node_ptr;
        node
    }

    fn unlink_cancelled_waiters(&self, list: &mut ListState) {
        let mut trail: *mut WaitNode = ptr::null_mut();
        let mut cur = list.first;
        while !cur.is_null() {
            let next = unsafe { (*cur).next_waiter.load(std::sync::atomic::Ordering::Acquire) };
            if unsafe { (*cur).status() } != CONDITION {
                unsafe { (*cur).next_waiter.store(ptr::null_mut(), std::sync::atomic::Ordering::Release) };
                if trail.is_null() {
                    list.first = next;
                } else {
                    unsafe { (*trail).next_waiter.store(next, std::sync::atomic::Ordering::Release) };
                }
                if next.is_null() {
                    list.last = trail;
                }
            } else {
                trail = cur;
            }
            cur = next;
        }
    }

    /// Transfer `node` from the condition list onto the sync queue: CAS
    /// `CONDITION -> 0`, enqueue, and if the new predecessor can't be
    /// trusted to wake it (cancelled, or can't be CAS'd to `SIGNAL`) unpark
    /// it immediately so it drives its own reacquire loop instead of
    /// waiting on a predecessor that may never signal it.
    fn transfer_for_signal(&self, node: &WaitNode) -> bool {
        if !node.cas_status(CONDITION, 0) {
            return false;
        }
        let pred = self.sync.queue.enqueue(node);
        let pred_ws = if pred.is_null() { 0 } else { unsafe { (*pred).status() } };
        if pred_ws > 0 || !unsafe { pred.is_null() || (*pred).cas_status(pred_ws, super::node::SIGNAL) } {
            node.unpark();
        }
        true
    }

    fn is_on_sync_queue(&self, node: &WaitNode) -> bool {
        if node.status() == CONDITION || node.prev().is_null() {
            return false;
        }
        if !node.next().is_null() {
            return true;
        }
        let mut t = self.sync.queue.tail();
        while !t.is_null() {
            if t == node as *const WaitNode as *mut WaitNode {
                return true;
            }
            t = unsafe { (*t).prev() };
        }
        false
    }

    /// Block until signalled or `deadline` elapses (if given), then
    /// reacquire exclusively at `saved_state`. Shared by [`Self::wait`],
    /// [`Self::await_cancellable`], and [`Self::await_timeout`].
    fn do_wait(&self, saved_state: i32, deadline: Option<Instant>, token: Option<&CancelToken>) -> SyncResult<bool> {
        self.require_held()?;
        let node = self.add_condition_waiter();
        if !self.sync.release(saved_state) {
            node.set_status(CANCELLED);
            return Err(SyncError::IllegalMonitorState);
        }
        if let Some(t) = token {
            t.register_waiter();
        }
        let mut timed_out = false;
        let mut interrupted = false;
        while !self.is_on_sync_queue(node) {
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    timed_out = self.transfer_after_cancelled_wait(node);
                    break;
                }
                std::thread::park_timeout(remaining);
            } else {
                std::thread::park();
            }
            if token.map_or(false, |t| t.is_cancelled()) {
                interrupted = self.transfer_after_cancelled_wait(node);
                break;
            }
        }
        if let Some(t) = token {
            t.unregister_waiter();
        }
        self.sync.dequeue_and_acquire(node, saved_state, None, None);
        if !node.next_waiter.load(std::sync::atomic::Ordering::Acquire).is_null() {
            let mut list = self.list.lock().unwrap();
            self.unlink_cancelled_waiters(&mut list);
        }
        if interrupted {
            return Err(SyncError::Interrupted);
        }
        Ok(!timed_out)
    }

    /// If the node is still on the condition list (not already transferred
    /// by a racing `signal`), do the `CONDITION -> 0` transfer ourselves and
    /// report that *we* drove the transition rather than a racing `signal`.
    fn transfer_after_cancelled_wait(&self, node: &WaitNode) -> bool {
        if node.cas_status(CONDITION, 0) {
            self.sync.queue.enqueue(node);
            true
        } else {
            // `signal()` already moved it; wait for the transfer to finish
            // linking before proceeding.
            while !self.is_on_sync_queue(node) {
                std::thread::yield_now();
            }
            false
        }
    }

    /// Block until signalled, reacquiring exclusively afterward. There is no
    /// uninterruptible/interruptible distinction without a token; pass a
    /// [`CancelToken`] via [`Self::await_cancellable`] for interruptible
    /// behavior.
    pub fn wait(&self) -> SyncResult<()> {
        let saved = self.sync.state();
        self.do_wait(saved, None, None).map(|_| ())
    }

    pub fn await_cancellable(&self, token: &CancelToken) -> SyncResult<()> {
        let saved = self.sync.state();
        self.do_wait(saved, None, Some(token)).map(|_| ())
    }

    /// Returns `true` if signalled before `timeout` elapsed.
    pub fn await_timeout(&self, timeout: Duration, token: Option<&CancelToken>) -> SyncResult<bool> {
        let saved = self.sync.state();
        let deadline = Instant::now() + timeout;
        self.do_wait(saved, Some(deadline), token)
    }

    /// Wake the longest-waiting non-cancelled waiter.
    pub fn signal(&self) -> SyncResult<()> {
        self.require_held()?;
        loop {
            let first = {
                let list = self.list.lock().unwrap();
                list.first
            };
            if first.is_null() {
                return Ok(());
            }
            let next = unsafe { (*first).next_waiter.load(std::sync::atomic::Ordering::Acquire) };
            {
                let mut list = self.list.lock().unwrap();
                if list.first == first {
                    list.first = next;
                    if next.is_null() {
                        list.last = ptr::null_mut();
                    }
                }
            }
            unsafe { (*first).next_waiter.store(ptr::null_mut(), std::sync::atomic::Ordering::Release) };
            if self.transfer_for_signal(unsafe { &*first }) {
                return Ok(());
            }
            // `first` was already cancelled; loop to the next waiter.
        }
    }

    /// Wake every waiter, FIFO.
    pub fn signal_all(&self) -> SyncResult<()> {
        self.require_held()?;
        let mut cur = {
            let mut list = self.list.lock().unwrap();
            let first = list.first;
            list.first = ptr::null_mut();
            list.last = ptr::null_mut();
            first
        };
        while !cur.is_null() {
            let next = unsafe { (*cur).next_waiter.load(std::sync::atomic::Ordering::Acquire) };
            unsafe { (*cur).next_waiter.store(ptr::null_mut(), std::sync::atomic::Ordering::Release) };
            self.transfer_for_signal(unsafe { &*cur });
            cur = next;
        }
        Ok(())
    }
}
