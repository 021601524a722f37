//! `SyncQueue` — the CLH-variant FIFO wait queue underlying every
//! [`crate::sync::Synchronizer`].
//!
//! `prev` links are always walkable; `next` links may lag a
//! concurrent `enqueue` by one instruction and are reconstructed by walking
//! `prev` from `tail` when needed (cancellation, inspection).

use super::node::{WaitNode, CANCELLED};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

pub struct SyncQueue {
    head: AtomicPtr<WaitNode>,
    tail: AtomicPtr<WaitNode>,
}

impl SyncQueue {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    pub fn head(&self) -> *mut WaitNode {
        self.head.load(Ordering::Acquire)
    }

    #[inline]
    pub fn tail(&self) -> *mut WaitNode {
        self.tail.load(Ordering::Acquire)
    }

    /// Enqueue `node`, lazily installing a dummy head/tail pair on first
    /// contention. Returns the predecessor the node was linked behind.
    ///
    /// `node` must outlive its time in the queue — see the heap-allocation
    /// note on [`WaitNode`]; callers pass a leaked `Box`-backed reference.
    pub fn enqueue(&self, node: &WaitNode) -> *mut WaitNode {
        loop {
            let tail = self.tail();
            if tail.is_null() {
                // Lazily install a process-lifetime dummy node. Leaking one
                // small allocation per `SyncQueue` instance, bounded by the
                // number of distinct synchronizers a program creates, is the
                // price of not needing GC to reclaim it.
                let dummy = Box::into_raw(Box::new(WaitNode::new_dummy()));
                if self
                    .head
                    .compare_exchange(ptr::null_mut(), dummy, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.tail.store(dummy, Ordering::Release);
                } else {
                    // Lost the race; drop our unused dummy and retry.
                    unsafe { drop(Box::from_raw(dummy)) };
                }
                continue;
            }
            // Set prev first so tail-to-head traversals never see a null
            // prev mid-insertion.
            node.set_prev(tail);
            let node_ptr = node as *const WaitNode as *mut WaitNode;
            if self
                .tail
                .compare_exchange(tail, node_ptr, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // SAFETY: `tail` was live (we just observed and CAS'd it);
                // nothing but cancellation cleanup ever mutates another
                // node's `next`, and that cleanup always goes through a CAS
                // guarded by prev-chain validation.
                unsafe { (*tail).set_next(node_ptr) };
                return tail;
            }
        }
    }

    /// Install `node` as the new head after it has acquired. Only the thread
    /// that just acquired may call this for a given node.
    pub fn set_head(&self, node: &WaitNode) {
        self.head.store(node as *const WaitNode as *mut WaitNode, Ordering::Release);
        node.set_prev(ptr::null_mut());
        node.clear_thread();
    }

    /// Wake the first non-cancelled successor of `node`, if any.
    pub fn unpark_successor(&self, node: &WaitNode) {
        let ws = node.status();
        if ws < 0 {
            // Best-effort; a racing cancellation may already have moved it.
            let _ = node.cas_status(ws, 0);
        }
        let mut s = node.next();
        if s.is_null() || unsafe { (*s).status() } > 0 {
            s = ptr::null_mut();
            let mut t = self.tail();
            while !t.is_null() && t != node as *const WaitNode as *mut WaitNode {
                if unsafe { (*t).status() } <= 0 {
                    s = t;
                }
                t = unsafe { (*t).prev() };
            }
        }
        if !s.is_null() {
            unsafe { (*s).unpark() };
        }
    }

    /// Used only by cancellation cleanup; failures are acceptable, the
    /// caller never retries.
    pub fn cas_tail(&self, expect: *mut WaitNode, update: *mut WaitNode) -> bool {
        self.tail.compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// `true` if any thread is currently parked in this queue.
    pub fn has_queued_threads(&self) -> bool {
        let h = self.head();
        let t = self.tail();
        !h.is_null() && h != t
    }

    /// The longest-waiting queued thread, if any. Tries the cheap
    /// `head.next` path first, falling back to a tail-to-head walk if
    /// `next` links haven't caught up with a concurrent enqueue yet.
    pub fn first_queued_thread(&self) -> Option<std::thread::Thread> {
        let h = self.head();
        if h.is_null() {
            return None;
        }
        let s = unsafe { (*h).next() };
        if !s.is_null() {
            if let Some(t) = unsafe { (*s).thread() } {
                return Some(t);
            }
        }
        let mut cur = self.tail();
        while !cur.is_null() && cur != h {
            if let Some(t) = unsafe { (*cur).thread() } {
                return Some(t);
            }
            cur = unsafe { (*cur).prev() };
        }
        None
    }

    /// Walk `prev` from tail counting live (non-cancelled, non-dummy-head)
    /// nodes. O(n) and inspection-only; treat the result as an estimate
    /// under concurrent enqueue/cancel.
    pub fn queue_length(&self) -> usize {
        let mut n = 0;
        let head = self.head();
        let mut cur = self.tail();
        while !cur.is_null() && cur != head {
            unsafe {
                if (*cur).status() != CANCELLED {
                    n += 1;
                }
                cur = (*cur).prev();
            }
        }
        n
    }
}

// SAFETY: all mutable access goes through atomics or is guarded by the
// single-acquirer invariants documented on the methods above.
unsafe impl Send for SyncQueue {}
unsafe impl Sync for SyncQueue {}
