use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use sonora_rt::ThreadPool;

/// Submits each run followed by a barrier and returns how many jobs started
/// before every job of the previous runs had finished.
fn run_waves(pool: &ThreadPool, runs: &[usize], pause: Duration) -> (usize, usize) {
    let completed = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let mut finished_before = 0;
    for &size in runs {
        for _ in 0..size {
            let completed = Arc::clone(&completed);
            let violations = Arc::clone(&violations);
            let floor = finished_before;
            pool.submit(move || {
                if completed.load(Ordering::SeqCst) < floor {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(pause);
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.submit_barrier();
        finished_before += size;
    }
    pool.sync().unwrap();
    (
        violations.load(Ordering::SeqCst),
        completed.load(Ordering::SeqCst),
    )
}

#[test]
fn no_job_passes_a_barrier_early() {
    let pool = ThreadPool::with_threads(4).unwrap();
    let runs = [6, 3, 8, 1, 5];
    let (violations, completed) = run_waves(&pool, &runs, Duration::from_micros(300));
    assert_eq!(violations, 0);
    assert_eq!(completed, runs.iter().sum::<usize>());
    assert_eq!(pool.barriers_submitted(), runs.len() as u64);
}

#[test]
fn barrier_without_workers_is_a_no_op() {
    let pool = ThreadPool::new();
    pool.submit_barrier();
    assert_eq!(pool.barriers_submitted(), 0);
}

#[test]
fn stopping_runs_queued_jobs_first() {
    let mut pool = ThreadPool::with_threads(2).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    pool.stop();
    assert_eq!(counter.load(Ordering::SeqCst), 20);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn barriers_hold_for_arbitrary_runs(
        threads in 1usize..5,
        runs in proptest::collection::vec(1usize..7, 1..6),
    ) {
        let pool = ThreadPool::with_threads(threads).unwrap();
        let (violations, completed) = run_waves(&pool, &runs, Duration::from_micros(50));
        prop_assert_eq!(violations, 0);
        prop_assert_eq!(completed, runs.iter().sum::<usize>());
    }
}
