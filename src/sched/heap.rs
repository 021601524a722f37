//! `DelayHeap` — an array-backed indexed binary min-heap with a
//! leader-follower `take()`.
//!
//! Backed by a `Vec` rather than a hand-rolled growable array starting at
//! capacity 16 and doubling by 50%: `Vec`'s own amortized-doubling growth
//! gives the same asymptotic guarantee the invariant actually cares about
//! (`offer` is amortized O(log n)), so the literal growth factor is not
//! reproduced — noted as a deliberate simplification in `DESIGN.md`.

use super::task::ScheduledTask;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

struct HeapState {
    items: Vec<Arc<ScheduledTask>>,
    leader: Option<ThreadId>,
}

pub struct DelayHeap {
    state: Mutex<HeapState>,
    available: Condvar,
}

impl DelayHeap {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeapState { items: Vec::with_capacity(16), leader: None }),
            available: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delay of the current root, without removing it. Used by the
    /// overflow-avoidance clamp in `ScheduledCore::trigger_time`.
    pub(crate) fn peek_delay_nanos(&self) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state.items.first().map(|t| t.trigger_nanos() - super::task::now_nanos())
    }

    /// Insert `task`, sift up, and wake one waiter if it became the new
    /// root.
    pub fn offer(&self, task: Arc<ScheduledTask>) {
        let mut state = self.state.lock().unwrap();
        task.set_heap_index(state.items.len() as isize);
        state.items.push(task.clone());
        let idx = state.items.len() - 1;
        Self::sift_up(&mut state.items, idx);
        if task.heap_index() == 0 {
            state.leader = None;
            self.available.notify_one();
        }
    }

    /// Non-blocking: `None` if empty or the root hasn't triggered yet.
    pub fn poll(&self) -> Option<Arc<ScheduledTask>> {
        let mut state = self.state.lock().unwrap();
        let ready = state.items.first().map(|t| t.get_delay().is_zero()).unwrap_or(false);
        if ready {
            Some(self.finish_poll(&mut state))
        } else {
            None
        }
    }

    /// Block until the root has triggered, using the leader-follower
    /// pattern: at most one thread ever does a timed wait for the head, the
    /// rest wait untimed until signalled.
    pub fn take(&self) -> Arc<ScheduledTask> {
        let mut state = self.state.lock().unwrap();
        let result = loop {
            if state.items.is_empty() {
                state = self.available.wait(state).unwrap();
                continue;
            }
            let delay = state.items[0].get_delay();
            if delay.is_zero() {
                break self.finish_poll(&mut state);
            }
            if state.leader.is_some() {
                state = self.available.wait(state).unwrap();
            } else {
                let me = std::thread::current().id();
                state.leader = Some(me);
                let (returned, _) = self.available.wait_timeout(state, delay).unwrap();
                state = returned;
                if state.leader == Some(me) {
                    state.leader = None;
                }
            }
        };
        if state.leader.is_none() && !state.items.is_empty() {
            self.available.notify_one();
        }
        result
    }

    fn finish_poll(&self, state: &mut HeapState) -> Arc<ScheduledTask> {
        // `swap_remove(0)` moves the last element into the root slot and
        // returns the evicted root in one step; only the replacement needs
        // a sift-down afterward.
        let root = state.items.swap_remove(0);
        root.set_heap_index(super::task::NO_HEAP_INDEX);
        if !state.items.is_empty() {
            state.items[0].set_heap_index(0);
            Self::sift_down(&mut state.items, 0);
        }
        root
    }

    /// O(1) via `task.heap_index()` when still valid, else a linear scan.
    pub fn remove(&self, task: &Arc<ScheduledTask>) -> bool {
        let mut state = self.state.lock().unwrap();
        let idx = task.heap_index();
        let idx = if idx >= 0 && (idx as usize) < state.items.len() && Arc::ptr_eq(&state.items[idx as usize], task) {
            idx as usize
        } else {
            match state.items.iter().position(|t| Arc::ptr_eq(t, task)) {
                Some(found) => found,
                None => return false,
            }
        };
        let last = state.items.len() - 1;
        if idx != last {
            state.items.swap(idx, last);
            state.items[idx].set_heap_index(idx as isize);
        }
        state.items.pop();
        task.set_heap_index(super::task::NO_HEAP_INDEX);
        if idx < state.items.len() {
            let moved = Self::sift_down(&mut state.items, idx);
            if !moved {
                Self::sift_up(&mut state.items, idx);
            }
        }
        true
    }

    /// A snapshot of every task currently in the heap, for the graceful
    /// shutdown sweep. Not a live view.
    pub fn snapshot(&self) -> Vec<Arc<ScheduledTask>> {
        self.state.lock().unwrap().items.clone()
    }

    fn sift_up(items: &mut [Arc<ScheduledTask>], mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if items[idx] < items[parent] {
                items.swap(idx, parent);
                items[idx].set_heap_index(idx as isize);
                items[parent].set_heap_index(parent as isize);
                idx = parent;
            } else {
                break;
            }
        }
        items[idx].set_heap_index(idx as isize);
    }

    /// Returns `true` if `idx` moved at least one level down.
    fn sift_down(items: &mut [Arc<ScheduledTask>], mut idx: usize) -> bool {
        let n = items.len();
        let mut moved = false;
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < n && items[left] < items[smallest] {
                smallest = left;
            }
            if right < n && items[right] < items[smallest] {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            items.swap(idx, smallest);
            items[idx].set_heap_index(idx as isize);
            items[smallest].set_heap_index(smallest as isize);
            idx = smallest;
            moved = true;
        }
        items[idx].set_heap_index(idx as isize);
        moved
    }
}

impl Default for DelayHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(trigger: i64, seq: u64) -> Arc<ScheduledTask> {
        Arc::new(ScheduledTask::new(Box::new(|| {}), trigger, 0, seq))
    }

    #[test]
    fn poll_returns_none_before_trigger() {
        let heap = DelayHeap::new();
        heap.offer(Arc::new(ScheduledTask::new(Box::new(|| {}), super::super::task::now_nanos() + 1_000_000_000, 0, 0)));
        assert!(heap.poll().is_none());
    }

    #[test]
    fn heap_index_tracks_position_through_mutation() {
        let heap = DelayHeap::new();
        let tasks: Vec<_> = (0..10).map(|i| task(-1000 + i, i as u64)).collect();
        for t in &tasks {
            heap.offer(t.clone());
        }
        for t in &tasks {
            assert!(t.heap_index() >= 0);
        }
        let removed = tasks[3].clone();
        assert!(heap.remove(&removed));
        assert_eq!(removed.heap_index(), super::super::task::NO_HEAP_INDEX);
        assert_eq!(heap.len(), 9);
    }

    #[test]
    fn fifo_tiebreak_on_equal_trigger() {
        let heap = DelayHeap::new();
        let a = task(-1, 0);
        let b = task(-1, 1);
        heap.offer(b.clone());
        heap.offer(a.clone());
        let first = heap.poll().unwrap();
        assert_eq!(first.sequence(), 0);
        let second = heap.poll().unwrap();
        assert_eq!(second.sequence(), 1);
    }
}
