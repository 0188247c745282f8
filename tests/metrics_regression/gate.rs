//! Throttle gate metrics regression tests

use super::helpers::*;
use serial_test::serial;

use std::time::Duration;
use throttle_gate::{RejectionPolicy, ThrottleConfig, ThrottleGate, ThrottleLayer};
use tower::{Layer, Service, ServiceExt};

fn gate(name: &str, max: usize, policy: RejectionPolicy, queue: usize) -> ThrottleGate {
    ThrottleGate::new(
        ThrottleConfig::builder()
            .name(name)
            .max_concurrent(max)
            .window_duration(Duration::from_secs(10))
            .rejection_policy(policy)
            .queue_capacity(queue)
            .build()
            .unwrap(),
    )
}

#[tokio::test]
#[serial]
async fn gate_metrics_exist() {
    init_recorder();

    let gate = gate("test_gate", 5, RejectionPolicy::Block, 10);
    for _ in 0..3 {
        let permit = gate.acquire().await.unwrap();
        gate.release(permit);
    }

    assert_counter_exists("throttle_calls_admitted_total");
    assert_metric_has_label("throttle_calls_admitted_total", "gate", "test_gate");

    assert_histogram_exists("throttle_wait_duration_seconds");
    assert_metric_has_label("throttle_wait_duration_seconds", "gate", "test_gate");

    assert_gauge_exists("throttle_in_flight");
    assert_metric_has_label("throttle_in_flight", "gate", "test_gate");
    assert_gauge_exists("throttle_waiters");
}

#[tokio::test]
#[serial]
async fn gate_rejection_metrics() {
    init_recorder();

    let gate = gate("reject_gate", 1, RejectionPolicy::Abort, 0);
    let _held = gate.try_acquire().unwrap();
    for _ in 0..5 {
        let _ = gate.try_acquire();
    }

    assert_counter_exists("throttle_calls_rejected_total");
    assert_metric_has_label("throttle_calls_rejected_total", "gate", "reject_gate");
}

#[tokio::test]
#[serial]
async fn gate_discard_and_cancel_metrics() {
    init_recorder();

    let gate = gate("evict_gate", 1, RejectionPolicy::DiscardOldest, 0);
    let _old = gate.try_acquire().unwrap();
    let _new = gate.try_acquire().unwrap();

    assert_counter_exists("throttle_calls_discarded_total");
    assert_metric_has_label("throttle_calls_discarded_total", "gate", "evict_gate");

    let gate = self::gate("cancel_gate", 1, RejectionPolicy::Block, 4);
    let _held = gate.try_acquire().unwrap();
    let result = gate.acquire_timeout(Duration::from_millis(5)).await;
    assert!(result.unwrap_err().is_cancelled());

    assert_counter_exists("throttle_calls_cancelled_total");
    assert_metric_has_label("throttle_calls_cancelled_total", "gate", "cancel_gate");
}

#[tokio::test(start_paused = true)]
#[serial]
async fn gate_window_metrics() {
    init_recorder();

    let gate = ThrottleGate::new(
        ThrottleConfig::builder()
            .name("window_gate")
            .max_concurrent(2)
            .window_duration(Duration::from_millis(100))
            .build()
            .unwrap(),
    );
    drop(gate.try_acquire().unwrap());
    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = gate.snapshot();

    assert_counter_exists("throttle_windows_rolled_total");
    assert_metric_has_label("throttle_windows_rolled_total", "gate", "window_gate");
}

#[tokio::test]
#[serial]
async fn layer_records_under_gate_name() {
    init_recorder();

    let layer = ThrottleLayer::new(gate("layer_gate", 2, RejectionPolicy::Abort, 0));
    let service = tower::service_fn(|_: u64| async {
        Ok::<_, throttle_gate::ThrottleError>("success")
    });
    let mut service = layer.layer(service);

    for i in 0..3 {
        let _ = service.ready().await.unwrap().call(i).await;
    }

    assert_metric_has_label("throttle_calls_admitted_total", "gate", "layer_gate");
    assert_metric_has_label("throttle_calls_rejected_total", "gate", "layer_gate");
}
