//! Admission state machine.
//!
//! Everything here runs under the gate's single mutex. Methods take the
//! current instant explicitly and record what happened in an [`Outbox`] so the
//! caller can emit events after the lock is dropped.

use crate::config::{RejectionPolicy, ThrottleConfig};
use crate::error::ThrottleError;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// What a waiter eventually receives: a grant or an eviction.
pub(crate) type WaitOutcome = Result<Admission, ThrottleError>;

/// A granted slot, handed to whoever builds the `Permit`.
#[derive(Debug)]
pub(crate) struct Admission {
    pub(crate) id: u64,
    pub(crate) admitted_at: Instant,
    pub(crate) evicted: oneshot::Receiver<()>,
}

/// Result of asking for a slot.
#[derive(Debug)]
pub(crate) enum Entry {
    Admitted(Admission),
    Queued {
        id: u64,
        outcome: oneshot::Receiver<WaitOutcome>,
    },
}

/// State changes to report once the lock is released.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    Admitted { wait: Duration, in_flight: usize },
    Queued { position: usize },
    Rejected { queued: usize },
    Discarded { was_admitted: bool },
    Cancelled { waited: Duration },
    Released { held: Duration },
    WindowRolled { admitted_in_window: usize },
}

pub(crate) type Outbox = Vec<Effect>;

#[derive(Debug)]
struct Waiter {
    id: u64,
    enqueued_at: Instant,
    outcome: oneshot::Sender<WaitOutcome>,
}

#[derive(Debug)]
struct Holder {
    admitted_at: Instant,
    epoch: u64,
    evict: oneshot::Sender<()>,
}

/// Point-in-time view of the gate's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSnapshot {
    /// Permits currently outstanding.
    pub in_flight: usize,
    /// Admissions granted in the current window.
    pub window_admissions: usize,
    /// Callers currently waiting.
    pub waiting: usize,
    /// Start of the current window.
    pub window_start: Instant,
}

#[derive(Debug)]
pub(crate) struct GateState {
    max_concurrent: usize,
    window: Duration,
    policy: RejectionPolicy,
    queue_capacity: usize,

    in_flight: usize,
    window_admissions: usize,
    window_start: Instant,
    /// Incremented at each rollover; lets a refund target the right window.
    epoch: u64,
    waiters: VecDeque<Waiter>,
    /// Ids are allocated in admission order, so the first key is the oldest.
    holders: BTreeMap<u64, Holder>,
    next_id: u64,
}

impl GateState {
    pub(crate) fn new(config: &ThrottleConfig, now: Instant) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            window: config.window_duration,
            policy: config.rejection_policy,
            queue_capacity: config.queue_capacity,
            in_flight: 0,
            window_admissions: 0,
            window_start: now,
            epoch: 0,
            waiters: VecDeque::new(),
            holders: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub(crate) fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            in_flight: self.in_flight,
            window_admissions: self.window_admissions,
            waiting: self.waiters.len(),
            window_start: self.window_start,
        }
    }

    /// When the current window closes.
    pub(crate) fn window_end(&self) -> Instant {
        self.window_start + self.window
    }

    /// Asks for a slot, queueing if the policy allows it.
    pub(crate) fn enter(&mut self, now: Instant, out: &mut Outbox) -> Result<Entry, ThrottleError> {
        self.roll(now, out);
        if let Some(admission) = self.admit_if_free(now, out) {
            return Ok(Entry::Admitted(admission));
        }

        let queue_has_room = self.waiters.len() < self.queue_capacity;
        match self.policy {
            RejectionPolicy::Abort => Err(self.reject(out)),
            RejectionPolicy::Block if queue_has_room => Ok(self.enqueue(now, out)),
            RejectionPolicy::Block => Err(self.reject(out)),
            RejectionPolicy::DiscardOldest if queue_has_room => Ok(self.enqueue(now, out)),
            RejectionPolicy::DiscardOldest if !self.waiters.is_empty() => {
                self.evict_oldest_waiter(out);
                Ok(self.enqueue(now, out))
            }
            RejectionPolicy::DiscardOldest => self
                .substitute_oldest_holder(now, out)
                .map(Entry::Admitted)
                .ok_or_else(|| self.reject(out)),
        }
    }

    /// Asks for a slot without ever queueing.
    pub(crate) fn try_enter(
        &mut self,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<Admission, ThrottleError> {
        self.roll(now, out);
        if let Some(admission) = self.admit_if_free(now, out) {
            return Ok(admission);
        }

        // Holders are only displaced when nobody may wait for them.
        let may_substitute = self.queue_capacity == 0 && self.waiters.is_empty();
        match self.policy {
            RejectionPolicy::DiscardOldest if may_substitute => self
                .substitute_oldest_holder(now, out)
                .ok_or_else(|| self.reject(out)),
            _ => Err(self.reject(out)),
        }
    }

    /// Returns a permit's slot and passes capacity to waiters.
    pub(crate) fn release(&mut self, id: u64, now: Instant, out: &mut Outbox) {
        self.roll(now, out);
        // Evicted permits were already accounted for.
        if let Some(holder) = self.holders.remove(&id) {
            self.in_flight -= 1;
            out.push(Effect::Released {
                held: now.saturating_duration_since(holder.admitted_at),
            });
            self.drain(now, out);
        }
    }

    /// Lazily applies window rollover. Called by waiters whose timer fired.
    pub(crate) fn tick(&mut self, now: Instant, out: &mut Outbox) {
        self.roll(now, out);
    }

    /// Withdraws a waiter.
    ///
    /// If a grant already sits in its channel, the grant is undone and handed
    /// to the next waiter, so cancellation always wins over a late admission.
    pub(crate) fn cancel(
        &mut self,
        id: u64,
        enqueued_at: Instant,
        outcome: &mut oneshot::Receiver<WaitOutcome>,
        now: Instant,
        out: &mut Outbox,
    ) {
        if let Some(pos) = self.waiters.iter().position(|w| w.id == id) {
            self.waiters.remove(pos);
            out.push(Effect::Cancelled {
                waited: now.saturating_duration_since(enqueued_at),
            });
            return;
        }

        // Not queued: either granted or evicted, both under this lock.
        if let Ok(Ok(admission)) = outcome.try_recv() {
            out.push(Effect::Cancelled {
                waited: now.saturating_duration_since(enqueued_at),
            });
            self.undo(admission.id);
            self.drain(now, out);
        }
    }

    /// Admits immediately when nobody is queued ahead and limits allow.
    fn admit_if_free(&mut self, now: Instant, out: &mut Outbox) -> Option<Admission> {
        if !self.waiters.is_empty() || !self.has_capacity() {
            return None;
        }
        let admission = self.admit(now);
        out.push(Effect::Admitted {
            wait: Duration::ZERO,
            in_flight: self.in_flight,
        });
        Some(admission)
    }

    fn has_capacity(&self) -> bool {
        self.in_flight < self.max_concurrent && self.window_admissions < self.max_concurrent
    }

    fn roll(&mut self, now: Instant, out: &mut Outbox) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return;
        }

        // Anchor to the window boundary, skipping idle windows.
        let into_window = elapsed.as_nanos() % self.window.as_nanos();
        self.window_start = now - Duration::from_nanos(into_window as u64);
        self.epoch += 1;
        out.push(Effect::WindowRolled {
            admitted_in_window: self.window_admissions,
        });
        self.window_admissions = 0;
        self.drain(now, out);
    }

    fn admit(&mut self, now: Instant) -> Admission {
        let id = self.next_id;
        self.next_id += 1;
        self.in_flight += 1;
        self.window_admissions += 1;

        let (evict, evicted) = oneshot::channel();
        self.holders.insert(
            id,
            Holder {
                admitted_at: now,
                epoch: self.epoch,
                evict,
            },
        );
        Admission {
            id,
            admitted_at: now,
            evicted,
        }
    }

    /// Reverses an admission that never reached its caller.
    fn undo(&mut self, id: u64) {
        if let Some(holder) = self.holders.remove(&id) {
            self.in_flight -= 1;
            if holder.epoch == self.epoch {
                self.window_admissions = self.window_admissions.saturating_sub(1);
            }
        }
    }

    /// Admits waiters in FIFO order while limits allow.
    fn drain(&mut self, now: Instant, out: &mut Outbox) {
        while self.has_capacity() {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            let admission = self.admit(now);
            match waiter.outcome.send(Ok(admission)) {
                Ok(()) => out.push(Effect::Admitted {
                    wait: now.saturating_duration_since(waiter.enqueued_at),
                    in_flight: self.in_flight,
                }),
                Err(Ok(admission)) => self.undo(admission.id),
                Err(Err(_)) => {}
            }
        }
    }

    fn enqueue(&mut self, now: Instant, out: &mut Outbox) -> Entry {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        out.push(Effect::Queued {
            position: self.waiters.len(),
        });
        self.waiters.push_back(Waiter {
            id,
            enqueued_at: now,
            outcome: tx,
        });
        Entry::Queued { id, outcome: rx }
    }

    fn reject(&self, out: &mut Outbox) -> ThrottleError {
        let queued = self.waiters.len();
        out.push(Effect::Rejected { queued });
        ThrottleError::Rejected {
            max_concurrent: self.max_concurrent,
            queued,
        }
    }

    fn evict_oldest_waiter(&mut self, out: &mut Outbox) {
        if let Some(waiter) = self.waiters.pop_front() {
            let _ = waiter.outcome.send(Err(ThrottleError::Discarded));
            out.push(Effect::Discarded {
                was_admitted: false,
            });
        }
    }

    /// Evicts the oldest holder and gives its slot to a new caller. Counters
    /// are unchanged: the newcomer inherits both the slot and the window
    /// admission.
    fn substitute_oldest_holder(&mut self, now: Instant, out: &mut Outbox) -> Option<Admission> {
        let (_, oldest) = self.holders.first_key_value()?;
        // A holder from an earlier window frees no budget in this one.
        let stale = oldest.epoch != self.epoch;
        if stale && self.window_admissions >= self.max_concurrent {
            return None;
        }

        let (_, victim) = self.holders.pop_first()?;
        let _ = victim.evict.send(());
        out.push(Effect::Discarded { was_admitted: true });
        if stale {
            self.window_admissions += 1;
        }

        let id = self.next_id;
        self.next_id += 1;
        let (evict, evicted) = oneshot::channel();
        self.holders.insert(
            id,
            Holder {
                admitted_at: now,
                epoch: self.epoch,
                evict,
            },
        );
        out.push(Effect::Admitted {
            wait: Duration::ZERO,
            in_flight: self.in_flight,
        });
        Some(Admission {
            id,
            admitted_at: now,
            evicted,
        })
    }
}
