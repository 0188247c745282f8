//! Seven callers race through a gate that admits five per window.
//!
//! Five get through straight away; the other two are held until the next
//! window opens.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use throttle_gate::{RejectionPolicy, ThrottleConfig, ThrottleGate};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let throttle_rate = 5;
    let message_count = throttle_rate + 2;

    let gate = ThrottleGate::new(
        ThrottleConfig::builder()
            .max_concurrent(throttle_rate)
            .window_duration(Duration::from_millis(500))
            .rejection_policy(RejectionPolicy::Block)
            .name("async-delayed")
            .on_window_rolled(|admitted| println!("window closed after {} admissions", admitted))
            .build()?,
    );

    let finished = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..message_count {
        let gate = gate.clone();
        let finished = Arc::clone(&finished);
        handles.push(tokio::spawn(async move {
            gate.run(async {
                let n = finished.fetch_add(1, Ordering::SeqCst) + 1;
                println!(
                    "message {} processed at {:?} ({} of {})",
                    i,
                    start.elapsed(),
                    n,
                    message_count
                );
            })
            .await
        }));
    }

    for handle in handles {
        handle.await??;
    }

    println!(
        "{} messages processed in {:?}",
        finished.load(Ordering::SeqCst),
        start.elapsed()
    );
    Ok(())
}
