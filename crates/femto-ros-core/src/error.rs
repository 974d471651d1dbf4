//! Unified error types for femto-ros

use core::fmt;

/// Unified error type for femto-ros operations
///
/// `Timeout` never appears here: a wait that runs to its deadline is a value
/// (`WaitOutcome::TimedOut`), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A required parameter was invalid (null-equivalent, zero capacity, ...)
    InvalidArgument,
    /// The executor has not been initialized yet, or was finalized
    NotInitialized,
    /// The handle table is full
    CapacityExceeded,
    /// The given middleware reference is not registered
    NotFound,
    /// An allocation failed during configuration
    BadAlloc,
    /// A non-blocking take found no payload despite a readiness notification
    TakeFailed,
    /// The timer was canceled; its callback is skipped
    TimerCanceled,
    /// Any other middleware failure; fatal for the current cycle
    Middleware,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::NotInitialized => write!(f, "executor not initialized"),
            Error::CapacityExceeded => write!(f, "handle table capacity exceeded"),
            Error::NotFound => write!(f, "handle not found"),
            Error::BadAlloc => write!(f, "allocation failed"),
            Error::TakeFailed => write!(f, "take failed"),
            Error::TimerCanceled => write!(f, "timer canceled"),
            Error::Middleware => write!(f, "middleware error"),
        }
    }
}

impl From<alloc::collections::TryReserveError> for Error {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Error::BadAlloc
    }
}
