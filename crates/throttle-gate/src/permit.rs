//! Admission tokens.

use crate::gate::Shared;
use crate::state::Admission;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Proof of admission. The slot is returned when the permit is dropped or
/// passed to [`ThrottleGate::release`](crate::ThrottleGate::release), on every
/// exit path including panics.
///
/// Under `DiscardOldest` a permit can be evicted while held; see
/// [`is_discarded`](Self::is_discarded).
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    shared: Arc<Shared>,
    id: u64,
    admitted_at: Instant,
    evicted: oneshot::Receiver<()>,
    discarded: bool,
}

impl Permit {
    pub(crate) fn new(shared: Arc<Shared>, admission: Admission) -> Self {
        Self {
            shared,
            id: admission.id,
            admitted_at: admission.admitted_at,
            evicted: admission.evicted,
            discarded: false,
        }
    }

    pub(crate) fn issued_by(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// When the gate admitted this permit, by the gate's clock.
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }

    /// Time since admission, by the gate's clock.
    pub fn held_for(&self) -> Duration {
        self.shared.now().saturating_duration_since(self.admitted_at)
    }

    /// Returns `true` once the gate has evicted this permit to make room for
    /// a newer caller. An evicted permit no longer counts against the gate.
    pub fn is_discarded(&mut self) -> bool {
        if !self.discarded {
            // The gate drops the sender only on eviction while we are alive.
            self.discarded = !matches!(self.evicted.try_recv(), Err(TryRecvError::Empty));
        }
        self.discarded
    }

    /// Completes when the permit is evicted. Never completes otherwise.
    pub async fn discarded(&mut self) {
        if !self.discarded {
            let _ = (&mut self.evicted).await;
            self.discarded = true;
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("id", &self.id)
            .field("admitted_at", &self.admitted_at)
            .field("discarded", &self.discarded)
            .finish()
    }
}
