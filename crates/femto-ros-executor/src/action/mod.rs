//! Action client and server sub-engines
//!
//! The executor advances per-goal state machines on behalf of action
//! endpoints. Goal state lives in fixed-size pools allocated at endpoint
//! registration; the spin loop itself allocates nothing.

pub mod client;
pub mod server;

pub(crate) mod pool;

pub use client::ActionClientCallbacks;
pub use server::GoalDecision;
