//! Core types, traits, and abstractions for femto-ros
//!
//! This crate provides the foundation shared by the executor and by
//! middleware implementations:
//! - `Error`: unified error type
//! - `Duration`: nanosecond duration used for timeouts and periods
//! - Action protocol types (`GoalId`, `GoalStatus`, `GoalInfo`, ...)
//! - The `rmw` module with the middleware trait surface the executor
//!   consumes (context, wait-set, endpoints)

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod action;
pub mod error;
pub mod rmw;
pub mod time;

pub use action::{transition, CancelCode, GoalEvent, GoalId, GoalInfo, GoalStatus};
pub use error::Error;
pub use time::Duration;
