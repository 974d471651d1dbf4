//! Data-communication semantics: the two scheduling policies
//!
//! Both policies first refresh every handle's readiness from the wait-set,
//! then evaluate the trigger. They differ in how takes and executes
//! interleave once the trigger fires:
//!
//! - **Default** walks the table once, performing take-then-execute per
//!   handle. A later handle's execution observes outputs published by
//!   earlier handles in the same cycle.
//! - **LET** (logical execution time) walks the table twice: all takes
//!   first, then all executes. Every callback of a cycle runs on the input
//!   set latched at the start of the cycle, giving deterministic inputs
//!   regardless of what the callbacks publish.

use femto_ros_core::rmw::WaitSet;
use femto_ros_core::Error;

use crate::handle::Handle;
use crate::trigger::Trigger;

/// Scheduling policy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Semantics {
    /// Interleaved take-then-execute per handle
    #[default]
    RclcppLike,
    /// Logical execution time: take all, then execute all
    Let,
}

/// One cycle of the default policy
pub(crate) fn default_scheduling(
    handles: &mut [Handle],
    wait_set: &dyn WaitSet,
    trigger: &mut Trigger,
) -> Result<(), Error> {
    for handle in handles.iter_mut() {
        handle.refresh_readiness(wait_set);
    }
    if !trigger.evaluate(handles) {
        return Ok(());
    }
    for handle in handles.iter_mut() {
        handle.take_new_data()?;
        handle.execute()?;
    }
    Ok(())
}

/// One cycle of the LET policy
pub(crate) fn let_scheduling(
    handles: &mut [Handle],
    wait_set: &dyn WaitSet,
    trigger: &mut Trigger,
) -> Result<(), Error> {
    for handle in handles.iter_mut() {
        handle.refresh_readiness(wait_set);
    }
    if !trigger.evaluate(handles) {
        return Ok(());
    }
    for handle in handles.iter_mut() {
        handle.take_new_data()?;
    }
    for handle in handles.iter_mut() {
        handle.execute()?;
    }
    Ok(())
}
