//! The throttle gate.

use crate::config::{ThrottleConfig, ThrottleConfigBuilder};
use crate::error::{Result, ThrottleError};
use crate::events::ThrottleEvent;
use crate::permit::Permit;
use crate::state::{Effect, Entry, GateSnapshot, GateState, Outbox, WaitOutcome};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

pub(crate) struct Shared {
    config: ThrottleConfig,
    state: Mutex<GateState>,
}

impl Shared {
    pub(crate) fn now(&self) -> Instant {
        self.config.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // State is only mutated by code that cannot panic mid-update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` inside the critical section, then reports what it did.
    fn with_state<R>(&self, f: impl FnOnce(&mut GateState, Instant, &mut Outbox) -> R) -> R {
        let mut out = Outbox::new();
        let (result, snapshot) = {
            let mut state = self.lock();
            let now = self.now();
            let result = f(&mut state, now, &mut out);
            (result, state.snapshot())
        };
        self.publish(out, snapshot);
        result
    }

    pub(crate) fn release(&self, id: u64) {
        self.with_state(|state, now, out| state.release(id, now, out));
    }

    fn time_to_window_end(&self) -> Duration {
        let end = self.lock().window_end();
        end.saturating_duration_since(self.now())
    }

    fn publish(&self, out: Outbox, snapshot: GateSnapshot) {
        if out.is_empty() {
            return;
        }
        let name = &self.config.name;
        let timestamp = Instant::now();

        for effect in out {
            #[cfg(feature = "tracing")]
            trace_effect(name, &effect);
            #[cfg(feature = "metrics")]
            record_effect(name, &effect);

            let event = match effect {
                Effect::Admitted { wait, in_flight } => ThrottleEvent::Admitted {
                    gate: name.clone(),
                    timestamp,
                    wait,
                    in_flight,
                },
                Effect::Queued { position } => ThrottleEvent::Queued {
                    gate: name.clone(),
                    timestamp,
                    position,
                },
                Effect::Rejected { .. } => ThrottleEvent::Rejected {
                    gate: name.clone(),
                    timestamp,
                    max_concurrent: self.config.max_concurrent,
                },
                Effect::Discarded { was_admitted } => ThrottleEvent::Discarded {
                    gate: name.clone(),
                    timestamp,
                    was_admitted,
                },
                Effect::Cancelled { waited } => ThrottleEvent::Cancelled {
                    gate: name.clone(),
                    timestamp,
                    waited,
                },
                Effect::Released { held } => ThrottleEvent::Released {
                    gate: name.clone(),
                    timestamp,
                    held,
                },
                Effect::WindowRolled { admitted_in_window } => ThrottleEvent::WindowRolled {
                    gate: name.clone(),
                    timestamp,
                    admitted_in_window,
                },
            };
            self.config.event_listeners.emit(&event);
        }

        #[cfg(feature = "metrics")]
        {
            gauge!("throttle_in_flight", "gate" => name.clone()).set(snapshot.in_flight as f64);
            gauge!("throttle_waiters", "gate" => name.clone()).set(snapshot.waiting as f64);
        }
        #[cfg(not(feature = "metrics"))]
        let _ = snapshot;
    }
}

#[cfg(feature = "tracing")]
fn trace_effect(name: &str, effect: &Effect) {
    match effect {
        Effect::Admitted { wait, in_flight } => {
            tracing::trace!(gate = name, ?wait, in_flight, "throttle admitted call")
        }
        Effect::Queued { position } => {
            tracing::debug!(gate = name, position, "throttle full, call queued")
        }
        Effect::Rejected { queued } => {
            tracing::debug!(gate = name, queued, "throttle rejected call")
        }
        Effect::Discarded { was_admitted } => {
            tracing::debug!(gate = name, was_admitted, "throttle discarded oldest call")
        }
        Effect::Cancelled { waited } => {
            tracing::debug!(gate = name, ?waited, "throttle waiter cancelled")
        }
        Effect::Released { held } => tracing::trace!(gate = name, ?held, "throttle permit released"),
        Effect::WindowRolled { admitted_in_window } => {
            tracing::trace!(gate = name, admitted_in_window, "throttle window rolled over")
        }
    }
}

#[cfg(feature = "metrics")]
fn record_effect(name: &str, effect: &Effect) {
    let gate = name.to_string();
    match effect {
        Effect::Admitted { wait, .. } => {
            counter!("throttle_calls_admitted_total", "gate" => gate.clone()).increment(1);
            histogram!("throttle_wait_duration_seconds", "gate" => gate).record(wait.as_secs_f64());
        }
        Effect::Rejected { .. } => {
            counter!("throttle_calls_rejected_total", "gate" => gate).increment(1)
        }
        Effect::Discarded { .. } => {
            counter!("throttle_calls_discarded_total", "gate" => gate).increment(1)
        }
        Effect::Cancelled { .. } => {
            counter!("throttle_calls_cancelled_total", "gate" => gate).increment(1)
        }
        Effect::WindowRolled { .. } => {
            counter!("throttle_windows_rolled_total", "gate" => gate).increment(1)
        }
        Effect::Queued { .. } | Effect::Released { .. } => {}
    }
}

#[cfg(feature = "metrics")]
fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        describe_counter!(
            "throttle_calls_admitted_total",
            "Total number of calls admitted through the throttle"
        );
        describe_counter!(
            "throttle_calls_rejected_total",
            "Total number of calls rejected by the throttle"
        );
        describe_counter!(
            "throttle_calls_discarded_total",
            "Total number of waiting or admitted calls evicted by the throttle"
        );
        describe_counter!(
            "throttle_calls_cancelled_total",
            "Total number of callers that gave up while waiting"
        );
        describe_counter!(
            "throttle_windows_rolled_total",
            "Total number of admission window rollovers"
        );
        describe_gauge!("throttle_in_flight", "Current number of outstanding permits");
        describe_gauge!("throttle_waiters", "Current number of waiting callers");
        describe_histogram!(
            "throttle_wait_duration_seconds",
            "Time spent waiting for admission"
        );
    });
}

/// A shared gate bounding concurrent admissions and admissions per window.
///
/// Cloning is cheap and every clone refers to the same gate.
///
/// # Example
///
/// ```rust
/// use throttle_gate::{RejectionPolicy, ThrottleConfig, ThrottleGate};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gate = ThrottleGate::new(
///     ThrottleConfig::builder()
///         .max_concurrent(5)
///         .window_duration(Duration::from_millis(100))
///         .rejection_policy(RejectionPolicy::Block)
///         .build()?,
/// );
///
/// let permit = gate.acquire().await?;
/// // ... do the throttled work ...
/// gate.release(permit);
/// # Ok(())
/// # }
/// ```
///
/// A permit can only be released once; it is consumed by
/// [`release`](Self::release):
///
/// ```compile_fail
/// # use throttle_gate::{ThrottleConfig, ThrottleGate};
/// # async fn example(gate: ThrottleGate) {
/// let permit = gate.acquire().await.unwrap();
/// gate.release(permit);
/// gate.release(permit);
/// # }
/// ```
#[derive(Clone)]
pub struct ThrottleGate {
    shared: Arc<Shared>,
}

impl ThrottleGate {
    /// Creates a gate from a validated configuration.
    pub fn new(config: ThrottleConfig) -> Self {
        #[cfg(feature = "metrics")]
        describe_metrics();

        let state = GateState::new(&config, config.clock.now());
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Shorthand for [`ThrottleConfig::builder`].
    pub fn builder() -> ThrottleConfigBuilder {
        ThrottleConfigBuilder::new()
    }

    /// Returns the configuration this gate was built with.
    pub fn config(&self) -> &ThrottleConfig {
        &self.shared.config
    }

    /// Returns the gate's name, as used in events and metric labels.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Current counters, after applying any pending window rollover.
    pub fn snapshot(&self) -> GateSnapshot {
        self.shared.with_state(|state, now, out| {
            state.tick(now, out);
            state.snapshot()
        })
    }

    /// Asks for admission without ever waiting.
    ///
    /// Under `Block` a full gate rejects instead of queueing. Under
    /// `DiscardOldest` with a queue capacity of zero the oldest holder is
    /// evicted to make room; with a queue the call is rejected, so it never
    /// overtakes waiting callers.
    pub fn try_acquire(&self) -> Result<Permit> {
        let admission = self
            .shared
            .with_state(|state, now, out| state.try_enter(now, out))?;
        Ok(Permit::new(Arc::clone(&self.shared), admission))
    }

    /// Waits for admission according to the rejection policy.
    ///
    /// Dropping the returned future withdraws the caller from the queue.
    pub async fn acquire(&self) -> Result<Permit> {
        self.acquire_until(std::future::pending()).await
    }

    /// Like [`acquire`](Self::acquire), failing with
    /// [`ThrottleError::Cancelled`] if not admitted within `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Permit> {
        self.acquire_until(tokio::time::sleep(timeout)).await
    }

    /// Like [`acquire`](Self::acquire), failing with
    /// [`ThrottleError::Cancelled`] once `cancel` completes.
    ///
    /// If `cancel` completes in the same poll that a grant arrives, the caller
    /// still observes `Cancelled` and the slot goes to the next waiter.
    pub async fn acquire_until<C>(&self, cancel: C) -> Result<Permit>
    where
        C: Future<Output = ()>,
    {
        let started = self.shared.now();
        let entry = self
            .shared
            .with_state(|state, now, out| state.enter(now, out))?;
        let (id, outcome) = match entry {
            Entry::Admitted(admission) => {
                return Ok(Permit::new(Arc::clone(&self.shared), admission))
            }
            Entry::Queued { id, outcome } => (id, outcome),
        };

        let mut waiting = Waiting {
            shared: &self.shared,
            id,
            started,
            outcome,
            settled: false,
        };
        tokio::pin!(cancel);

        loop {
            let until_rollover = self.shared.time_to_window_end();
            let step = tokio::select! {
                biased;
                () = &mut cancel => Step::Cancel,
                resolved = &mut waiting.outcome => Step::Resolved(resolved),
                () = tokio::time::sleep(until_rollover) => Step::Tick,
            };

            match step {
                Step::Tick => self.shared.with_state(|state, now, out| state.tick(now, out)),
                Step::Cancel => {
                    waiting.cancel();
                    return Err(ThrottleError::Cancelled);
                }
                Step::Resolved(resolved) => {
                    waiting.settled = true;
                    return match resolved {
                        Ok(Ok(admission)) => Ok(Permit::new(Arc::clone(&self.shared), admission)),
                        Ok(Err(err)) => Err(err),
                        // Waiters are only dropped by eviction, which sends first.
                        Err(_) => Err(ThrottleError::Discarded),
                    };
                }
            }
        }
    }

    /// Returns a permit to the gate. Dropping the permit does the same.
    ///
    /// # Panics
    ///
    /// Panics if `permit` was issued by a different gate.
    pub fn release(&self, permit: Permit) {
        assert!(
            permit.issued_by(&self.shared),
            "permit released on a throttle gate that did not issue it"
        );
        drop(permit);
    }

    /// Runs `work` while holding a permit.
    ///
    /// If the permit is evicted under `DiscardOldest`, `work` is dropped and
    /// the call fails with [`ThrottleError::Discarded`].
    pub async fn run<F>(&self, work: F) -> Result<F::Output>
    where
        F: Future,
    {
        let mut permit = self.acquire().await?;
        tokio::select! {
            biased;
            output = work => Ok(output),
            () = permit.discarded() => Err(ThrottleError::Discarded),
        }
    }
}

impl fmt::Debug for ThrottleGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleGate")
            .field("config", &self.shared.config)
            .field("state", &self.shared.lock().snapshot())
            .finish()
    }
}

enum Step {
    Cancel,
    Resolved(std::result::Result<WaitOutcome, oneshot::error::RecvError>),
    Tick,
}

/// A queued caller. Withdraws itself from the gate unless settled.
struct Waiting<'a> {
    shared: &'a Shared,
    id: u64,
    started: Instant,
    outcome: oneshot::Receiver<WaitOutcome>,
    settled: bool,
}

impl Waiting<'_> {
    fn cancel(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let (id, started) = (self.id, self.started);
        let outcome = &mut self.outcome;
        self.shared
            .with_state(|state, now, out| state.cancel(id, started, outcome, now, out));
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.cancel();
    }
}
