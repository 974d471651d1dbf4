//! Trigger predicates gating each dispatch cycle
//!
//! After readiness collection, the executor evaluates its trigger over the
//! handle table. If it returns `false`, no takes and no callbacks run in that
//! cycle.

use alloc::boxed::Box;
use core::fmt;

use crate::handle::{Endpoint, Handle};

/// The condition deciding whether a dispatch cycle fires
///
/// The default is [`Trigger::Any`], matching the behaviour of a conventional
/// single-threaded executor: process whatever became ready.
pub enum Trigger {
    /// Fire iff every registered handle has data available
    All,
    /// Fire iff at least one registered handle has data available
    Any,
    /// Fire iff the handle wrapping the given reference has data available
    One(Endpoint),
    /// Fire every cycle
    Always,
    /// User-supplied predicate over the handle table
    Custom(Box<dyn FnMut(&[Handle]) -> bool>),
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::Any
    }
}

impl Trigger {
    pub(crate) fn evaluate(&mut self, handles: &[Handle]) -> bool {
        match self {
            Trigger::All => handles.iter().all(Handle::has_data),
            Trigger::Any => handles.iter().any(Handle::has_data),
            Trigger::One(endpoint) => handles
                .iter()
                .any(|handle| handle.has_data() && handle.refers_to(endpoint)),
            Trigger::Always => true,
            Trigger::Custom(predicate) => predicate(handles),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::All => write!(f, "Trigger::All"),
            Trigger::Any => write!(f, "Trigger::Any"),
            Trigger::One(_) => write!(f, "Trigger::One"),
            Trigger::Always => write!(f, "Trigger::Always"),
            Trigger::Custom(_) => write!(f, "Trigger::Custom"),
        }
    }
}
