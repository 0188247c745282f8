//! Stress tests for the throttle gate
//!
//! These tests push the gate to its limits to validate behavior under extreme conditions.
//! They are marked with `#[ignore]` and must be run explicitly:
//!
//! ```bash
//! # Run all stress tests
//! cargo test --test stress -- --ignored
//!
//! # Run with output
//! cargo test --test stress -- --ignored --nocapture
//! ```
//!
//! ## What We Test
//!
//! - **High concurrency**: Thousands of queued callers
//! - **Churn**: Rapid admission and release across threads
//! - **Cancellation storms**: Many waiters giving up at random times
//! - **State consistency**: Counters return to zero once the load drains

pub mod gate;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Utility: Track peak concurrent operations
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn enter(&self) {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}
