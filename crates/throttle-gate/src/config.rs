//! Configuration for the throttle gate.

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::events::ThrottleEvent;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tower_resilience_core::events::{EventListeners, FnListener};

/// What the gate does with a caller that arrives while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectionPolicy {
    /// Wait in FIFO order, up to `queue_capacity` waiters. Callers beyond
    /// that are rejected.
    #[default]
    Block,
    /// Reject immediately.
    Abort,
    /// Make room by evicting the oldest waiter, or the oldest holder when
    /// nobody is allowed to wait.
    DiscardOldest,
}

/// Immutable gate configuration. Create one with [`ThrottleConfig::builder`].
#[derive(Clone)]
pub struct ThrottleConfig {
    pub(crate) max_concurrent: usize,
    pub(crate) window_duration: Duration,
    pub(crate) rejection_policy: RejectionPolicy,
    pub(crate) queue_capacity: usize,
    pub(crate) name: String,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) event_listeners: EventListeners<ThrottleEvent>,
}

impl ThrottleConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ThrottleConfigBuilder {
        ThrottleConfigBuilder::new()
    }

    /// Maximum permits outstanding at once, and admissions per window.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Length of one admission window.
    pub fn window_duration(&self) -> Duration {
        self.window_duration
    }

    /// What happens to callers that find the gate full.
    pub fn rejection_policy(&self) -> RejectionPolicy {
        self.rejection_policy
    }

    /// Maximum number of waiting callers.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Name used in events, logs and metric labels.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ThrottleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleConfig")
            .field("max_concurrent", &self.max_concurrent)
            .field("window_duration", &self.window_duration)
            .field("rejection_policy", &self.rejection_policy)
            .field("queue_capacity", &self.queue_capacity)
            .field("name", &self.name)
            .field("clock", &self.clock)
            .finish()
    }
}

/// Builder for [`ThrottleConfig`].
pub struct ThrottleConfigBuilder {
    max_concurrent: usize,
    window_duration: Duration,
    rejection_policy: RejectionPolicy,
    queue_capacity: usize,
    name: String,
    clock: Arc<dyn Clock>,
    event_listeners: EventListeners<ThrottleEvent>,
}

impl ThrottleConfigBuilder {
    /// Creates a new builder with default values.
    ///
    /// Defaults:
    /// - max_concurrent: 25
    /// - window_duration: 1 second
    /// - rejection_policy: [`RejectionPolicy::Block`]
    /// - queue_capacity: 250
    /// - name: `"throttle"`
    /// - clock: [`SystemClock`]
    pub fn new() -> Self {
        Self {
            max_concurrent: 25,
            window_duration: Duration::from_secs(1),
            rejection_policy: RejectionPolicy::Block,
            queue_capacity: 250,
            name: "throttle".to_string(),
            clock: Arc::new(SystemClock),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets how many calls may hold a permit at once. The same number bounds
    /// admissions per window.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the length of the admission window.
    pub fn window_duration(mut self, duration: Duration) -> Self {
        self.window_duration = duration;
        self
    }

    /// Sets the policy applied when the gate is full.
    pub fn rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    /// Sets how many callers may wait at once.
    ///
    /// Ignored under [`RejectionPolicy::Abort`].
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the name used in events, logs and metric labels.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the time source.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Registers a callback for every event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ThrottleEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback invoked on admission with the time spent waiting.
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ThrottleEvent::Admitted { wait, .. } = event {
                f(*wait);
            }
        }));
        self
    }

    /// Registers a callback invoked on rejection with the configured limit.
    ///
    /// # Example
    /// ```rust
    /// use throttle_gate::{RejectionPolicy, ThrottleConfig};
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    ///
    /// let rejections = Arc::new(AtomicUsize::new(0));
    /// let counter = Arc::clone(&rejections);
    ///
    /// let config = ThrottleConfig::builder()
    ///     .max_concurrent(5)
    ///     .rejection_policy(RejectionPolicy::Abort)
    ///     .on_rejected(move |_max| {
    ///         counter.fetch_add(1, Ordering::SeqCst);
    ///     })
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ThrottleEvent::Rejected { max_concurrent, .. } = event {
                f(*max_concurrent);
            }
        }));
        self
    }

    /// Registers a callback invoked when a call is evicted. The argument is
    /// `true` if the evicted call had already been admitted.
    pub fn on_discarded<F>(mut self, f: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ThrottleEvent::Discarded { was_admitted, .. } = event {
                f(*was_admitted);
            }
        }));
        self
    }

    /// Registers a callback invoked when a waiter gives up.
    pub fn on_cancelled<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ThrottleEvent::Cancelled { waited, .. } = event {
                f(*waited);
            }
        }));
        self
    }

    /// Registers a callback invoked at each window rollover with the number
    /// of admissions granted in the window that closed.
    pub fn on_window_rolled<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ThrottleEvent::WindowRolled {
                admitted_in_window, ..
            } = event
            {
                f(*admitted_in_window);
            }
        }));
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ThrottleConfig, ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroMaxConcurrent);
        }
        if self.window_duration.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }

        Ok(ThrottleConfig {
            max_concurrent: self.max_concurrent,
            window_duration: self.window_duration,
            rejection_policy: self.rejection_policy,
            queue_capacity: self.queue_capacity,
            name: self.name,
            clock: self.clock,
            event_listeners: self.event_listeners,
        })
    }
}

impl Default for ThrottleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
