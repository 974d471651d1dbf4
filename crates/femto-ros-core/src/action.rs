//! Action protocol types
//!
//! Actions provide asynchronous goal-based communication: a client submits a
//! goal, the server executes it and reports feedback during execution and a
//! result upon completion. Five underlying channels carry the protocol:
//!
//! - `send_goal` service: submit a new goal
//! - `cancel_goal` service: request cancellation
//! - `get_result` service: retrieve the final result
//! - `feedback` topic: progress updates during execution
//! - `status` topic: goal state transitions
//!
//! The executor advances per-goal state machines on behalf of action clients
//! and servers; the types here are the shared vocabulary of those machines.

use core::fmt;

/// Goal status states
///
/// A goal progresses through these states during its lifecycle. Legal
/// transitions are encoded in [`transition`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum GoalStatus {
    /// Status has not been set
    #[default]
    Unknown = 0,
    /// Goal has been accepted and is awaiting execution
    Accepted = 1,
    /// Goal is currently being executed
    Executing = 2,
    /// Goal is in the process of being canceled
    Canceling = 3,
    /// Goal completed successfully
    Succeeded = 4,
    /// Goal was canceled before completion
    Canceled = 5,
    /// Goal was aborted due to an error
    Aborted = 6,
}

impl GoalStatus {
    /// Check if the goal is in a terminal state (succeeded, canceled or aborted)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GoalStatus::Succeeded | GoalStatus::Canceled | GoalStatus::Aborted
        )
    }

    /// Check if the goal is still active (accepted, executing or canceling)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            GoalStatus::Accepted | GoalStatus::Executing | GoalStatus::Canceling
        )
    }

    /// Convert from i8 value
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            0 => Some(GoalStatus::Unknown),
            1 => Some(GoalStatus::Accepted),
            2 => Some(GoalStatus::Executing),
            3 => Some(GoalStatus::Canceling),
            4 => Some(GoalStatus::Succeeded),
            5 => Some(GoalStatus::Canceled),
            6 => Some(GoalStatus::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalStatus::Unknown => write!(f, "UNKNOWN"),
            GoalStatus::Accepted => write!(f, "ACCEPTED"),
            GoalStatus::Executing => write!(f, "EXECUTING"),
            GoalStatus::Canceling => write!(f, "CANCELING"),
            GoalStatus::Succeeded => write!(f, "SUCCEEDED"),
            GoalStatus::Canceled => write!(f, "CANCELED"),
            GoalStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Events that drive the goal state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalEvent {
    /// Execution of an accepted goal begins
    Execute,
    /// A cancel request arrives for the goal
    CancelGoal,
    /// The goal completes successfully
    Succeed,
    /// The goal is aborted by the server
    Abort,
    /// Cancellation completes
    Canceled,
}

/// Compute the successor state of a goal, or `None` for an illegal transition
///
/// This is the ROS 2 action goal state machine: cancellation is only possible
/// from `Accepted`, `Executing` or `Canceling`, and terminal states accept no
/// further events.
pub fn transition(status: GoalStatus, event: GoalEvent) -> Option<GoalStatus> {
    match (status, event) {
        (GoalStatus::Accepted, GoalEvent::Execute) => Some(GoalStatus::Executing),
        (GoalStatus::Accepted, GoalEvent::CancelGoal) => Some(GoalStatus::Canceling),
        (GoalStatus::Executing, GoalEvent::CancelGoal) => Some(GoalStatus::Canceling),
        (GoalStatus::Executing, GoalEvent::Succeed) => Some(GoalStatus::Succeeded),
        (GoalStatus::Executing, GoalEvent::Abort) => Some(GoalStatus::Aborted),
        (GoalStatus::Canceling, GoalEvent::Canceled) => Some(GoalStatus::Canceled),
        (GoalStatus::Canceling, GoalEvent::Succeed) => Some(GoalStatus::Succeeded),
        (GoalStatus::Canceling, GoalEvent::Abort) => Some(GoalStatus::Aborted),
        _ => None,
    }
}

/// Unique identifier for a goal
///
/// A 128-bit UUID identifying one goal across the action protocol channels.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GoalId {
    /// UUID bytes in standard format
    pub uuid: [u8; 16],
}

impl GoalId {
    /// Create a new GoalId from UUID bytes
    pub const fn new(uuid: [u8; 16]) -> Self {
        Self { uuid }
    }

    /// Create a zero/null GoalId
    pub const fn zero() -> Self {
        Self { uuid: [0; 16] }
    }

    /// Check if this is a zero/null GoalId
    pub fn is_zero(&self) -> bool {
        self.uuid == [0; 16]
    }

    /// Create a GoalId from a simple counter
    ///
    /// Produces a deterministic UUID-like identifier from a counter value.
    /// Not a true UUID, but useful on targets without a random source.
    pub fn from_counter(counter: u64) -> Self {
        let mut uuid = [0u8; 16];
        uuid[8..16].copy_from_slice(&counter.to_be_bytes());
        uuid[6] = (uuid[6] & 0x0f) | 0x40; // Version 4
        uuid[8] = (uuid[8] & 0x3f) | 0x80; // Variant 1
        Self { uuid }
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoalId({})", self)
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.uuid[0], self.uuid[1], self.uuid[2], self.uuid[3],
            self.uuid[4], self.uuid[5],
            self.uuid[6], self.uuid[7],
            self.uuid[8], self.uuid[9],
            self.uuid[10], self.uuid[11], self.uuid[12], self.uuid[13], self.uuid[14], self.uuid[15]
        )
    }
}

/// Information about a goal: its id and acceptance timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoalInfo {
    /// Unique identifier for the goal
    pub goal_id: GoalId,
    /// Seconds part of the acceptance timestamp
    pub stamp_sec: i32,
    /// Nanosecond part of the acceptance timestamp
    pub stamp_nanosec: u32,
}

impl GoalInfo {
    /// Create a new GoalInfo with the given id and timestamp
    pub const fn new(goal_id: GoalId, stamp_sec: i32, stamp_nanosec: u32) -> Self {
        Self {
            goal_id,
            stamp_sec,
            stamp_nanosec,
        }
    }

    /// Create a GoalInfo with zero timestamp
    pub const fn with_id(goal_id: GoalId) -> Self {
        Self {
            goal_id,
            stamp_sec: 0,
            stamp_nanosec: 0,
        }
    }
}

/// Cancel goal response codes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i8)]
pub enum CancelCode {
    /// No error, goal(s) will be canceled
    #[default]
    Ok = 0,
    /// Goal was rejected (not cancelable)
    Rejected = 1,
    /// Unknown goal id
    UnknownGoal = 2,
    /// Goal is already in a terminal state
    GoalTerminated = 3,
}

impl CancelCode {
    /// Convert from i8 value
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            0 => Some(CancelCode::Ok),
            1 => Some(CancelCode::Rejected),
            2 => Some(CancelCode::UnknownGoal),
            3 => Some(CancelCode::GoalTerminated),
            _ => None,
        }
    }
}
