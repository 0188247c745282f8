//! Concurrent rate-throttling gate.
//!
//! A [`ThrottleGate`] admits at most `max_concurrent` calls at once and at
//! most `max_concurrent` admissions per `window_duration`. Callers that find
//! the gate full are handled by the configured [`RejectionPolicy`]: they wait
//! in FIFO order (`Block`), fail fast (`Abort`), or push out the oldest
//! waiter or holder (`DiscardOldest`).
//!
//! The gate owns no threads and assumes no particular executor. Window
//! rollover is applied lazily whenever the gate is touched, and waiting
//! callers wake themselves at the end of the current window.
//!
//! # Basic Example
//!
//! ```rust
//! use throttle_gate::{ThrottleConfig, ThrottleGate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Five calls per 100ms, at most five in flight
//! let gate = ThrottleGate::new(
//!     ThrottleConfig::builder()
//!         .max_concurrent(5)
//!         .window_duration(Duration::from_millis(100))
//!         .name("delayed")
//!         .build()?,
//! );
//!
//! let answer = gate.run(async { 42 }).await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```
//!
//! # Rejection Policies
//!
//! ```rust
//! use throttle_gate::{RejectionPolicy, ThrottleConfig, ThrottleError, ThrottleGate};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = ThrottleGate::new(
//!     ThrottleConfig::builder()
//!         .max_concurrent(1)
//!         .rejection_policy(RejectionPolicy::Abort)
//!         .build()?,
//! );
//!
//! let _permit = gate.try_acquire()?;
//! assert!(matches!(
//!     gate.try_acquire(),
//!     Err(ThrottleError::Rejected { max_concurrent: 1, .. })
//! ));
//! # Ok(())
//! # }
//! ```
//!
//! # Tower Integration
//!
//! ```rust
//! use throttle_gate::{ThrottleConfig, ThrottleError, ThrottleGate, ThrottleLayer};
//! use tower::ServiceBuilder;
//!
//! # #[derive(Debug)]
//! # struct AppError;
//! # impl From<ThrottleError> for AppError {
//! #     fn from(_: ThrottleError) -> Self { AppError }
//! # }
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = ThrottleGate::new(ThrottleConfig::builder().max_concurrent(10).build()?);
//!
//! let service = ServiceBuilder::new()
//!     .layer(ThrottleLayer::new(gate))
//!     .service_fn(|req: String| async move { Ok::<_, AppError>(req) });
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
mod gate;
pub mod layer;
mod permit;
pub mod service;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RejectionPolicy, ThrottleConfig, ThrottleConfigBuilder};
pub use error::{ConfigError, Result, ThrottleError};
pub use events::ThrottleEvent;
pub use gate::ThrottleGate;
pub use layer::ThrottleLayer;
pub use permit::Permit;
pub use service::Throttle;
pub use state::GateSnapshot;
