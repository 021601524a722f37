//! Statistical/timing stress tests with randomized workloads and
//! contention.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use syncore::sched::ScheduledCore;
use syncore::sync::{CountDownLatch, Mutex, RwLock, Semaphore};

#[test]
fn mutex_survives_random_jitter_under_contention() {
    let mutex = Arc::new(Mutex::new(0u64));
    let threads = 12;
    let per_thread = 400;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let mutex = mutex.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..per_thread {
                    if rng.gen_bool(0.2) {
                        thread::sleep(Duration::from_micros(rng.gen_range(1, 50)));
                    }
                    *mutex.lock() += 1;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*mutex.lock(), threads as u64 * per_thread as u64);
}

#[test]
fn rwlock_readers_never_overlap_a_writer() {
    let lock = Arc::new(RwLock::new(0i64));
    let violations = Arc::new(AtomicUsize::new(0));
    let writer_active = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..8 {
        let lock = lock.clone();
        let violations = violations.clone();
        let writer_active = writer_active.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..200 {
                if i % 4 == 0 {
                    let mut guard = lock.write();
                    writer_active.fetch_add(1, Ordering::SeqCst);
                    *guard += 1;
                    thread::sleep(Duration::from_micros(rng.gen_range(1, 20)));
                    if writer_active.load(Ordering::SeqCst) != 1 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    writer_active.fetch_sub(1, Ordering::SeqCst);
                } else {
                    let _guard = lock.read();
                    if writer_active.load(Ordering::SeqCst) != 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn semaphore_never_overruns_permits_with_random_hold_times() {
    let sem = Arc::new(Semaphore::new(3));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..20 {
        let sem = sem.clone();
        let in_flight = in_flight.clone();
        let max_seen = max_seen.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            sem.acquire(1);
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(rng.gen_range(1, 200)));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            sem.release(1);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert!(max_seen.load(Ordering::SeqCst) <= 3);
}

#[test]
fn scheduled_core_handles_many_randomly_delayed_one_shots() {
    let core = ScheduledCore::new(4, "stress-sched");
    let latch = Arc::new(CountDownLatch::new(50));
    let mut rng = rand::thread_rng();
    for _ in 0..50 {
        let latch = latch.clone();
        let delay = Duration::from_millis(rng.gen_range(1, 60));
        core.schedule(move || latch.count_down(), delay).unwrap();
    }
    assert!(latch.wait_timeout(Duration::from_secs(2)));
}
