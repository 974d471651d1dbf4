//! Deterministic callback executor for femto-ros
//!
//! The executor waits for readiness notifications on a fixed set of
//! asynchronous sources (subscriptions, timers, service clients and servers,
//! action clients and servers, guard conditions) and dispatches
//! user-registered callbacks in insertion order.
//!
//! # Architecture
//!
//! ```text
//! handle table → wait-set build → middleware wait → readiness flags
//!              → scheduler (take/execute) → user callbacks
//! ```
//!
//! Every heap allocation happens during configuration (`init`, endpoint
//! registration, the first `prepare`); the steady-state spin loop allocates
//! nothing. One executor instance is driven by exactly one thread.
//!
//! # Example
//!
//! ```ignore
//! use femto_ros_executor::{Executor, Invocation, Trigger};
//! use femto_ros_core::Duration;
//!
//! let mut executor = Executor::new();
//! executor.init(context, 4)?;
//! executor.add_subscription(&sub, 0i32, |msg: Option<&i32>| {
//!     if let Some(msg) = msg {
//!         println!("received {msg}");
//!     }
//! }, Invocation::OnNewData)?;
//!
//! // One cycle with a 100 ms wait:
//! executor.spin_some(Duration::from_millis(100))?;
//! // Or run until the middleware context is torn down:
//! executor.spin()?;
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod action;
pub mod executor;
pub mod handle;
pub mod scheduling;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{ActionClientCallbacks, GoalDecision};
pub use executor::{Executor, SpinOutcome, DEFAULT_WAIT_TIMEOUT};
pub use handle::{Endpoint, Handle, HandleCounters, HandleKind, Invocation};
pub use scheduling::Semantics;
pub use trigger::Trigger;

// Re-export the foundation crate so downstream users need a single dependency.
pub use femto_ros_core::{rmw, Duration, Error, GoalId, GoalInfo, GoalStatus};
