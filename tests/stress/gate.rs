//! Throttle gate stress tests

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use throttle_gate::{RejectionPolicy, ThrottleConfig, ThrottleError, ThrottleGate};
use tokio::time::sleep;

use super::ConcurrencyTracker;

fn gate(max: usize, window: Duration, policy: RejectionPolicy, queue: usize) -> ThrottleGate {
    ThrottleGate::new(
        ThrottleConfig::builder()
            .name("stress")
            .max_concurrent(max)
            .window_duration(window)
            .rejection_policy(policy)
            .queue_capacity(queue)
            .build()
            .unwrap(),
    )
}

/// Test: Thousands of blocked callers drain through a small gate
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn stress_large_queue() {
    let tracker = ConcurrencyTracker::new();
    let gate = gate(10, Duration::from_millis(5), RejectionPolicy::Block, 2000);

    let start = Instant::now();
    let mut handles = vec![];
    for _ in 0..1000 {
        let gate = gate.clone();
        let tracker = Arc::clone(&tracker);
        handles.push(tokio::spawn(async move {
            gate.run(async {
                tracker.enter();
                sleep(Duration::from_millis(2)).await;
                tracker.exit();
            })
            .await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            completed += 1;
        }
    }

    println!("1000 blocked callers through a gate of 10 per 5ms");
    println!("Completed in: {:?}", start.elapsed());
    println!("Peak concurrency: {}", tracker.peak());

    assert_eq!(completed, 1000, "All callers should complete");
    assert!(tracker.peak() <= 10, "Should not exceed max concurrency");
    assert_eq!(tracker.current(), 0);

    let snapshot = gate.snapshot();
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.waiting, 0);
}

/// Test: Rapid try_acquire/release churn from many tasks
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_permit_churn() {
    let gate = gate(16, Duration::from_millis(1), RejectionPolicy::Abort, 0);
    let admitted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = vec![];
    for _ in 0..32 {
        let gate = gate.clone();
        let admitted = Arc::clone(&admitted);
        let rejected = Arc::clone(&rejected);
        handles.push(tokio::spawn(async move {
            for _ in 0..10_000 {
                match gate.try_acquire() {
                    Ok(permit) => {
                        admitted.fetch_add(1, Ordering::Relaxed);
                        drop(permit);
                    }
                    Err(_) => {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let admitted = admitted.load(Ordering::Relaxed);
    let rejected = rejected.load(Ordering::Relaxed);
    println!("320k try_acquire calls in {:?}", start.elapsed());
    println!("Admitted: {}, rejected: {}", admitted, rejected);

    assert_eq!(admitted + rejected, 320_000);
    assert!(admitted > 0);
    assert_eq!(gate.snapshot().in_flight, 0);
}

/// Test: Waiters abandoning the queue at random moments
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn stress_cancellation_storm() {
    let gate = gate(4, Duration::from_millis(10), RejectionPolicy::Block, 5000);
    let cancelled = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..2000 {
        let gate = gate.clone();
        let cancelled = Arc::clone(&cancelled);
        let completed = Arc::clone(&completed);
        let patience = Duration::from_millis(rand::rng().random_range(0..200));
        handles.push(tokio::spawn(async move {
            match gate.acquire_timeout(patience).await {
                Ok(permit) => {
                    sleep(Duration::from_millis(1)).await;
                    drop(permit);
                    completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(ThrottleError::Cancelled) => {
                    cancelled.fetch_add(1, Ordering::Relaxed);
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let completed = completed.load(Ordering::Relaxed);
    let cancelled = cancelled.load(Ordering::Relaxed);
    println!("Completed: {}, cancelled: {}", completed, cancelled);

    assert_eq!(completed + cancelled, 2000);
    let snapshot = gate.snapshot();
    assert_eq!(snapshot.in_flight, 0, "Cancelled grants must be returned");
    assert_eq!(snapshot.waiting, 0, "Cancelled waiters must leave the queue");
}

/// Test: DiscardOldest under sustained overload
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn stress_discard_oldest_overload() {
    let tracker = ConcurrencyTracker::new();
    let gate = gate(8, Duration::from_millis(5), RejectionPolicy::DiscardOldest, 16);
    let discarded = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..2000 {
        let gate = gate.clone();
        let tracker = Arc::clone(&tracker);
        let discarded = Arc::clone(&discarded);
        handles.push(tokio::spawn(async move {
            let result = gate
                .run(async {
                    tracker.enter();
                    sleep(Duration::from_millis(1)).await;
                    tracker.exit();
                })
                .await;
            match result {
                Ok(()) => {}
                Err(ThrottleError::Discarded) => {
                    discarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    println!(
        "Discarded {} of 2000, peak {}",
        discarded.load(Ordering::Relaxed),
        tracker.peak()
    );

    assert!(discarded.load(Ordering::Relaxed) > 0);
    assert!(tracker.peak() <= 8);
    let snapshot = gate.snapshot();
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.waiting, 0);
}
