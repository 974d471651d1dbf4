//! Middleware abstraction consumed by the executor
//!
//! The executor never talks to a wire; it drives a middleware through the
//! object-safe traits in this module. A middleware implementation provides:
//!
//! - a [`Context`]: validity query, monotonic clock, sleep, and the wait-set
//!   factory
//! - a [`WaitSet`]: the single blocking point, aggregating readiness over
//!   registered endpoints
//! - per-kind endpoints with non-blocking `take` primitives
//!
//! Message payloads cross this boundary as `&mut dyn Any`: the executor owns
//! type-erased user buffers and the middleware downcasts them to its concrete
//! message types. Endpoint identity (for removal and the `One` trigger) is
//! data-pointer equality on the shared `Rc`.
//!
//! All `take_*` operations may fail with [`Error::TakeFailed`] when a
//! readiness notification raced with an empty queue; that error is non-fatal
//! everywhere. Any other error aborts the current cycle.
//!
//! [`Error::TakeFailed`]: crate::Error::TakeFailed

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::any::Any;
use core::cell::RefCell;

use crate::action::{CancelCode, GoalId, GoalInfo, GoalStatus};
use crate::time::Duration;
use crate::Error;

/// Request id attached to service/client traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestId {
    /// Identifier of the writer that produced the request
    pub writer_guid: [u8; 16],
    /// Sequence number within that writer
    pub sequence_number: i64,
}

/// Per-kind capacities a wait-set is built with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitSetSizes {
    /// Number of subscription slots
    pub subscriptions: usize,
    /// Number of guard condition slots
    pub guard_conditions: usize,
    /// Number of timer slots
    pub timers: usize,
    /// Number of client slots
    pub clients: usize,
    /// Number of service slots
    pub services: usize,
    /// Number of event slots
    pub events: usize,
}

/// Number of primitive entities an action endpoint occupies in a wait-set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    /// Subscriptions contributed (feedback/status topics)
    pub subscriptions: usize,
    /// Guard conditions contributed
    pub guard_conditions: usize,
    /// Timers contributed (e.g. goal expiry)
    pub timers: usize,
    /// Service clients contributed (goal/cancel/result)
    pub clients: usize,
    /// Service servers contributed (goal/cancel/result)
    pub services: usize,
}

/// Outcome of a wait-set wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// At least one registered entity became ready
    Ready,
    /// The timeout elapsed with nothing ready
    TimedOut,
}

/// Readiness flags of an action client's sub-entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionClientReadiness {
    /// A feedback message is available
    pub feedback: bool,
    /// A status update is available
    pub status: bool,
    /// A goal response is available
    pub goal_response: bool,
    /// A cancel response is available
    pub cancel_response: bool,
    /// A result response is available
    pub result_response: bool,
}

impl ActionClientReadiness {
    /// Check if any sub-entity is ready
    pub fn any(&self) -> bool {
        self.feedback
            || self.status
            || self.goal_response
            || self.cancel_response
            || self.result_response
    }
}

/// Readiness flags of an action server's sub-entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionServerReadiness {
    /// A goal request is available
    pub goal_request: bool,
    /// A cancel request is available
    pub cancel_request: bool,
    /// A result request is available
    pub result_request: bool,
    /// One or more goals expired
    pub goal_expired: bool,
}

impl ActionServerReadiness {
    /// Check if any sub-entity is ready
    pub fn any(&self) -> bool {
        self.goal_request || self.cancel_request || self.result_request || self.goal_expired
    }
}

/// Header of a taken goal response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoalResponse {
    /// Sequence number of the goal request this response answers
    pub sequence_number: i64,
    /// Whether the server accepted the goal
    pub accepted: bool,
}

/// Header of a taken cancel response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelResponseInfo {
    /// Sequence number of the cancel request this response answers
    pub sequence_number: i64,
    /// Return code of the cancel request
    pub code: CancelCode,
    /// Number of entries written to the caller's goal-info buffer
    pub goals: usize,
}

/// One entry of a status-topic update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoalStatusUpdate {
    /// The goal the update refers to
    pub goal_id: GoalId,
    /// Its new status
    pub status: GoalStatus,
}

/// Middleware context: validity, time source and wait-set factory
pub trait Context {
    /// Check whether the middleware is still usable
    fn is_valid(&self) -> bool;

    /// Current monotonic time in nanoseconds
    fn now_nanos(&self) -> i64;

    /// Block the calling thread for the given duration
    fn sleep(&self, duration: Duration);

    /// Build a wait-set sized for the given per-kind capacities
    ///
    /// This is the only allocation a middleware performs on behalf of the
    /// executor after configuration.
    fn create_wait_set(&self, sizes: &WaitSetSizes) -> Result<Box<dyn WaitSet>, Error>;
}

/// Aggregated readiness over a set of registered endpoints
///
/// The executor registers every live handle each cycle, blocks in [`wait`],
/// then queries per-kind readiness by the index `add_*` returned.
///
/// [`wait`]: WaitSet::wait
pub trait WaitSet {
    /// Drop all registrations, keeping the allocated capacity
    fn clear(&mut self);

    /// Register a subscription, returning its slot index
    fn add_subscription(&mut self, subscription: &SubscriptionRef) -> Result<usize, Error>;

    /// Register a timer, returning its slot index
    fn add_timer(&mut self, timer: &TimerRef) -> Result<usize, Error>;

    /// Register a client, returning its slot index
    fn add_client(&mut self, client: &ClientRef) -> Result<usize, Error>;

    /// Register a service, returning its slot index
    fn add_service(&mut self, service: &ServiceRef) -> Result<usize, Error>;

    /// Register a guard condition, returning its slot index
    fn add_guard_condition(&mut self, guard_condition: &GuardConditionRef) -> Result<usize, Error>;

    /// Register an action client's sub-entities, returning its slot index
    fn add_action_client(&mut self, client: &ActionClientRef) -> Result<usize, Error>;

    /// Register an action server's sub-entities, returning its slot index
    fn add_action_server(&mut self, server: &ActionServerRef) -> Result<usize, Error>;

    /// Block until any registered entity is ready or the timeout elapses
    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, Error>;

    /// Check whether the subscription at `index` has data
    fn subscription_ready(&self, index: usize) -> bool;

    /// Check whether the timer at `index` elapsed
    fn timer_ready(&self, index: usize) -> bool;

    /// Check whether the client at `index` has a response
    fn client_ready(&self, index: usize) -> bool;

    /// Check whether the service at `index` has a request
    fn service_ready(&self, index: usize) -> bool;

    /// Check whether the guard condition at `index` was triggered
    fn guard_condition_ready(&self, index: usize) -> bool;

    /// Collect the readiness flags of an action client's sub-entities
    fn action_client_ready(&self, client: &ActionClientRef) -> ActionClientReadiness;

    /// Collect the readiness flags of an action server's sub-entities
    fn action_server_ready(&self, server: &ActionServerRef) -> ActionServerReadiness;
}

/// A message source
pub trait Subscription {
    /// Drain one message into the caller's buffer
    fn take(&mut self, message: &mut dyn Any) -> Result<(), Error>;
}

/// A middleware-scheduled timer
pub trait Timer {
    /// Advance the timer and invoke its registered callback
    ///
    /// Returns [`Error::TimerCanceled`] for a canceled timer, which the
    /// executor swallows.
    fn call(&mut self) -> Result<(), Error>;
}

/// The request-issuing side of a service pair
pub trait Client {
    /// Drain one response and its request id into the caller's buffers
    fn take_response(
        &mut self,
        request_id: &mut RequestId,
        response: &mut dyn Any,
    ) -> Result<(), Error>;
}

/// The request-serving side of a service pair
pub trait Service {
    /// Drain one request and its request id into the caller's buffers
    fn take_request(
        &mut self,
        request_id: &mut RequestId,
        request: &mut dyn Any,
    ) -> Result<(), Error>;

    /// Send the response for a previously taken request
    fn send_response(&mut self, request_id: &RequestId, response: &dyn Any) -> Result<(), Error>;
}

/// A manually triggerable readiness notification
pub trait GuardCondition {
    /// Mark the condition ready, waking a blocked wait
    fn trigger(&mut self) -> Result<(), Error>;
}

/// Client side of the action protocol
pub trait ActionClient {
    /// Number of primitive wait-set entities this endpoint occupies
    fn entity_counts(&self) -> EntityCounts;

    /// Drain one goal response header
    fn take_goal_response(&mut self) -> Result<GoalResponse, Error>;

    /// Drain one feedback message into `feedback`, returning its goal id
    fn take_feedback(&mut self, feedback: &mut dyn Any) -> Result<GoalId, Error>;

    /// Drain one status update list into `updates`, returning the entry count
    fn take_status(&mut self, updates: &mut [GoalStatusUpdate]) -> Result<usize, Error>;

    /// Drain one cancel response; canceling goals are written to `goals_canceling`
    fn take_cancel_response(
        &mut self,
        goals_canceling: &mut [GoalInfo],
    ) -> Result<CancelResponseInfo, Error>;

    /// Drain one result response into `result`, returning the request's
    /// sequence number
    fn take_result_response(&mut self, result: &mut dyn Any) -> Result<i64, Error>;

    /// Issue a result request for an accepted goal, returning its sequence
    /// number
    fn send_result_request(&mut self, goal_id: GoalId) -> Result<i64, Error>;
}

/// Server side of the action protocol
pub trait ActionServer {
    /// Number of primitive wait-set entities this endpoint occupies
    fn entity_counts(&self) -> EntityCounts;

    /// Drain one goal request into `storage`, returning its header and goal id
    fn take_goal_request(&mut self, storage: &mut [u8]) -> Result<(RequestId, GoalId), Error>;

    /// Drain one cancel request, returning its header and goal id
    fn take_cancel_request(&mut self) -> Result<(RequestId, GoalId), Error>;

    /// Drain one result request, returning its header and goal id
    fn take_result_request(&mut self) -> Result<(RequestId, GoalId), Error>;

    /// Answer a goal request
    fn send_goal_response(&mut self, request_id: &RequestId, accepted: bool) -> Result<(), Error>;

    /// Answer a cancel request with a return code and the goals being canceled
    fn send_cancel_response(
        &mut self,
        request_id: &RequestId,
        code: CancelCode,
        goals_canceling: &[GoalInfo],
    ) -> Result<(), Error>;
}

/// Shared middleware context
pub type ContextRef = Rc<dyn Context>;
/// Shared subscription endpoint
pub type SubscriptionRef = Rc<RefCell<dyn Subscription>>;
/// Shared timer endpoint
pub type TimerRef = Rc<RefCell<dyn Timer>>;
/// Shared client endpoint
pub type ClientRef = Rc<RefCell<dyn Client>>;
/// Shared service endpoint
pub type ServiceRef = Rc<RefCell<dyn Service>>;
/// Shared guard condition endpoint
pub type GuardConditionRef = Rc<RefCell<dyn GuardCondition>>;
/// Shared action client endpoint
pub type ActionClientRef = Rc<RefCell<dyn ActionClient>>;
/// Shared action server endpoint
pub type ActionServerRef = Rc<RefCell<dyn ActionServer>>;

/// Data-pointer equality of two shared endpoints
///
/// Vtable pointers are deliberately not compared; two `Rc`s are the same
/// endpoint iff they point at the same allocation.
pub fn same_endpoint<T: ?Sized, U: ?Sized>(a: &Rc<T>, b: &Rc<U>) -> bool {
    core::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
