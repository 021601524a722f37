//! Intrusive wait-queue node.
//!
//! A node outlives the acquire call that created it: once it becomes `head`
//! it is load-bearing queue state until some later acquirer replaces it, so
//! (unlike a short-lived parking-call `Waiter`) it cannot live on the
//! acquiring thread's stack. Every node is therefore heap-allocated via
//! `Box::into_raw` and intentionally never freed, trading a bounded per-node
//! leak for not needing a hazard-pointer or epoch reclamation scheme. The
//! leak is bounded by the number of acquire *attempts* that ever contend a
//! given synchronizer over the life of the process.
//!
//! `mode` is a plain field set once at construction rather than packed into
//! another field as a sentinel; there's no pressure here to save a word.
//! `thread` is a `Mutex<Option<Thread>>` rather than a bare volatile
//! reference, since `std::thread::Thread` is not atomically swappable. The
//! mutex is uncontended on every real code path (at most the node's own
//! thread and one predecessor ever touch it).

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};
use std::sync::Mutex;
use std::thread::Thread;
use std::ptr;

/// Per-node wait-status.
pub const SIGNAL: i32 = -1;
pub const CANCELLED: i32 = 1;
pub const CONDITION: i32 = -2;
pub const PROPAGATE: i32 = -3;

/// Whether a node is queued for an exclusive or a shared acquire.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Mode {
    Exclusive,
    Shared,
}

/// A node in a [`crate::sync::queue::SyncQueue`] or a condition sub-queue.
///
/// `prev`/`next` link the sync queue; `next_waiter` links a condition
/// sub-queue. A node is in exactly one of those two queues at a time.
pub struct WaitNode {
    pub(crate) prev: AtomicPtr<WaitNode>,
    pub(crate) next: AtomicPtr<WaitNode>,
    pub(crate) next_waiter: AtomicPtr<WaitNode>,
    pub(crate) wait_status: AtomicI32,
    pub(crate) mode: Mode,
    thread: Mutex<Option<Thread>>,
}

impl WaitNode {
    /// A fresh node for the given acquire mode, parked on the current
    /// thread.
    pub fn new(mode: Mode) -> Self {
        Self {
            prev: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            next_waiter: AtomicPtr::new(ptr::null_mut()),
            wait_status: AtomicI32::new(0),
            mode,
            thread: Mutex::new(Some(std::thread::current())),
        }
    }

    /// A dummy/sentinel node used to lazily seed an empty queue's head+tail.
    /// Carries no thread and an arbitrary mode (never inspected on a head
    /// node, since a node becomes head only by acquiring, at which point its
    /// mode no longer matters).
    pub fn new_dummy() -> Self {
        Self {
            prev: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            next_waiter: AtomicPtr::new(ptr::null_mut()),
            wait_status: AtomicI32::new(0),
            mode: Mode::Exclusive,
            thread: Mutex::new(None),
        }
    }

    #[inline]
    pub fn status(&self) -> i32 {
        self.wait_status.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_status(&self, status: i32) {
        self.wait_status.store(status, Ordering::Release);
    }

    #[inline]
    pub fn cas_status(&self, expect: i32, update: i32) -> bool {
        self.wait_status
            .compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn prev(&self) -> *mut WaitNode {
        self.prev.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_prev(&self, p: *mut WaitNode) {
        self.prev.store(p, Ordering::Release);
    }

    #[inline]
    pub fn next(&self) -> *mut WaitNode {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_next(&self, n: *mut WaitNode) {
        self.next.store(n, Ordering::Release);
    }

    /// Used only by cancellation cleanup; failures are acceptable, the
    /// caller never retries.
    #[inline]
    pub fn cas_next(&self, expect: *mut WaitNode, update: *mut WaitNode) -> bool {
        self.next.compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Drop the owning thread handle once the node becomes head: nobody
    /// should unpark this node anymore.
    pub fn clear_thread(&self) {
        *self.thread.lock().unwrap() = None;
    }

    pub fn unpark(&self) {
        if let Some(t) = self.thread.lock().unwrap().as_ref() {
            t.unpark();
        }
    }

    /// A clone of the parked thread handle, if any.
    pub fn thread(&self) -> Option<Thread> {
        self.thread.lock().unwrap().clone()
    }
}

impl fmt::Debug for WaitNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status() {
            0 => "0".to_string(),
            SIGNAL => "SIGNAL".to_string(),
            CANCELLED => "CANCELLED".to_string(),
            CONDITION => "CONDITION".to_string(),
            PROPAGATE => "PROPAGATE".to_string(),
            other => other.to_string(),
        };
        f.debug_struct("WaitNode")
            .field("mode", &self.mode)
            .field("wait_status", &status)
            .field("prev", &self.prev())
            .field("next", &self.next())
            .finish()
    }
}

// SAFETY: a WaitNode is only ever shared across threads via raw pointers that
// are kept alive by the stack-frame invariant documented above; the `Thread`
// handle inside is guarded by a `Mutex`.
unsafe impl Sync for WaitNode {}
