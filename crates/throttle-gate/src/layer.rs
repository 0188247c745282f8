//! Tower layer implementation for the throttle gate.

use crate::gate::ThrottleGate;
use crate::service::Throttle;
use tower_layer::Layer;

/// Layer that runs every call of the wrapped service through a shared gate.
///
/// All services produced by one layer share the same gate.
///
/// # Examples
///
/// ```
/// use throttle_gate::{ThrottleConfig, ThrottleGate, ThrottleLayer};
/// use std::time::Duration;
///
/// let gate = ThrottleGate::new(
///     ThrottleConfig::builder()
///         .max_concurrent(10)
///         .window_duration(Duration::from_secs(1))
///         .build()
///         .unwrap(),
/// );
/// let layer = ThrottleLayer::new(gate);
/// ```
#[derive(Clone, Debug)]
pub struct ThrottleLayer {
    gate: ThrottleGate,
}

impl ThrottleLayer {
    /// Creates a layer backed by `gate`.
    pub fn new(gate: ThrottleGate) -> Self {
        Self { gate }
    }

    /// Returns the gate shared by every wrapped service.
    pub fn gate(&self) -> &ThrottleGate {
        &self.gate
    }
}

impl From<ThrottleGate> for ThrottleLayer {
    fn from(gate: ThrottleGate) -> Self {
        Self::new(gate)
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = Throttle<S>;

    fn layer(&self, service: S) -> Self::Service {
        Throttle::new(service, self.gate.clone())
    }
}
