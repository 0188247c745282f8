//! Events emitted by the gate for observability.

use std::time::{Duration, Instant};
use tower_resilience_core::events::ResilienceEvent;

/// Something the gate did.
#[derive(Debug, Clone)]
pub enum ThrottleEvent {
    /// A caller was admitted.
    Admitted {
        gate: String,
        timestamp: Instant,
        /// How long the caller waited before admission.
        wait: Duration,
        /// Permits outstanding after this admission.
        in_flight: usize,
    },
    /// A caller found the gate full and started waiting.
    Queued {
        gate: String,
        timestamp: Instant,
        /// Zero-based position in the wait queue.
        position: usize,
    },
    /// A caller was turned away.
    Rejected {
        gate: String,
        timestamp: Instant,
        max_concurrent: usize,
    },
    /// A waiter or holder was evicted under `DiscardOldest`.
    Discarded {
        gate: String,
        timestamp: Instant,
        /// `true` if the evicted call had already been admitted.
        was_admitted: bool,
    },
    /// A waiter gave up before admission.
    Cancelled {
        gate: String,
        timestamp: Instant,
        waited: Duration,
    },
    /// A permit was returned.
    Released {
        gate: String,
        timestamp: Instant,
        held: Duration,
    },
    /// The admission window rolled over.
    WindowRolled {
        gate: String,
        timestamp: Instant,
        /// Admissions granted in the window that just closed.
        admitted_in_window: usize,
    },
}

impl ResilienceEvent for ThrottleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ThrottleEvent::Admitted { .. } => "admitted",
            ThrottleEvent::Queued { .. } => "queued",
            ThrottleEvent::Rejected { .. } => "rejected",
            ThrottleEvent::Discarded { .. } => "discarded",
            ThrottleEvent::Cancelled { .. } => "cancelled",
            ThrottleEvent::Released { .. } => "released",
            ThrottleEvent::WindowRolled { .. } => "window_rolled",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ThrottleEvent::Admitted { timestamp, .. }
            | ThrottleEvent::Queued { timestamp, .. }
            | ThrottleEvent::Rejected { timestamp, .. }
            | ThrottleEvent::Discarded { timestamp, .. }
            | ThrottleEvent::Cancelled { timestamp, .. }
            | ThrottleEvent::Released { timestamp, .. }
            | ThrottleEvent::WindowRolled { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            ThrottleEvent::Admitted { gate, .. }
            | ThrottleEvent::Queued { gate, .. }
            | ThrottleEvent::Rejected { gate, .. }
            | ThrottleEvent::Discarded { gate, .. }
            | ThrottleEvent::Cancelled { gate, .. }
            | ThrottleEvent::Released { gate, .. }
            | ThrottleEvent::WindowRolled { gate, .. } => gate,
        }
    }
}
