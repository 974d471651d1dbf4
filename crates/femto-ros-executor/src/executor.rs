//! The executor: handle table lifecycle, readiness collection, spin loops
//!
//! An executor owns a fixed-capacity handle table, a wait-set, a trigger
//! predicate and a scheduling policy. Configuration (init, registration)
//! allocates; spinning does not.
//!
//! Lifecycle: a zero-initialized executor is inert; [`init`] allocates the
//! handle table exactly once; add/remove mutate the table and invalidate the
//! wait-set, which is rebuilt lazily by the next [`prepare`]; [`fini`]
//! releases everything and is idempotent.
//!
//! [`init`]: Executor::init
//! [`prepare`]: Executor::prepare
//! [`fini`]: Executor::fini

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;

use femto_ros_core::rmw::{
    same_endpoint, ActionClient as _, ActionClientReadiness, ActionClientRef,
    ActionServer as _, ActionServerReadiness, ActionServerRef, ClientRef, Context as _, ContextRef,
    EntityCounts, GuardConditionRef, RequestId, ServiceRef, SubscriptionRef, TimerRef, WaitOutcome,
    WaitSet,
};
use femto_ros_core::{Duration, Error, GoalId, GoalInfo, GoalStatus};

use crate::action::client::{ActionClientCallbacks, ActionClientEntry};
use crate::action::pool::Pool;
use crate::action::server::{ActionServerEntry, GoalDecision};
use crate::handle::{Endpoint, Entry, Handle, HandleCounters, Invocation};
use crate::scheduling::{self, Semantics};
use crate::trigger::Trigger;

/// Default wait timeout: one second
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of one dispatch cycle
///
/// A timed-out wait is a value, not an error; the spin loops keep going on
/// either variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinOutcome {
    /// The wait reported readiness and the cycle ran
    Completed,
    /// The wait ran to its deadline; the cycle still ran (an `Always`
    /// trigger may have fired callbacks)
    TimedOut,
}

/// Deterministic, statically-sized callback executor
///
/// See the crate documentation for an overview and examples.
pub struct Executor {
    context: Option<ContextRef>,
    handles: Vec<Handle>,
    capacity: usize,
    counters: HandleCounters,
    wait_set: Option<Box<dyn WaitSet>>,
    timeout: Duration,
    invocation_time: Option<i64>,
    trigger: Trigger,
    semantics: Semantics,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Create a zero-initialized, inert executor
    ///
    /// Every operation except [`init`] and [`fini`] fails with
    /// [`Error::NotInitialized`] until [`init`] is called.
    ///
    /// [`init`]: Executor::init
    /// [`fini`]: Executor::fini
    pub fn new() -> Self {
        Self {
            context: None,
            handles: Vec::new(),
            capacity: 0,
            counters: HandleCounters::default(),
            wait_set: None,
            timeout: DEFAULT_WAIT_TIMEOUT,
            invocation_time: None,
            trigger: Trigger::Any,
            semantics: Semantics::RclcppLike,
        }
    }

    /// Allocate the handle table and bind the middleware context
    ///
    /// The table is the single allocation of the executor proper; it is
    /// never grown. `capacity` must be at least 1.
    pub fn init(&mut self, context: ContextRef, capacity: usize) -> Result<(), Error> {
        if capacity == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut handles = Vec::new();
        handles.try_reserve_exact(capacity)?;

        *self = Self {
            context: Some(context),
            handles,
            capacity,
            ..Self::new()
        };
        log::debug!("executor initialized with capacity {}", capacity);
        Ok(())
    }

    /// Release the handle table and the wait-set
    ///
    /// Calling `fini` on an already-finalized or zero-initialized executor
    /// is a no-op success.
    pub fn fini(&mut self) -> Result<(), Error> {
        *self = Self::new();
        Ok(())
    }

    /// Set the wait timeout used by [`spin`] and the periodic spins
    ///
    /// [`spin`]: Executor::spin
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.require_initialized()?;
        self.timeout = timeout;
        Ok(())
    }

    /// Select the data-communication semantics
    pub fn set_semantics(&mut self, semantics: Semantics) -> Result<(), Error> {
        self.require_initialized()?;
        self.semantics = semantics;
        Ok(())
    }

    /// Replace the trigger predicate (default: [`Trigger::Any`])
    pub fn set_trigger(&mut self, trigger: Trigger) {
        self.trigger = trigger;
    }

    /// The handle table capacity chosen at init
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check whether no handles are registered
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Per-kind census of the live handles
    pub fn counters(&self) -> &HandleCounters {
        &self.counters
    }

    /// The configured wait timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The selected data-communication semantics
    pub fn semantics(&self) -> Semantics {
        self.semantics
    }

    /// Phase anchor of the periodic spins, in monotonic nanoseconds
    pub fn invocation_time(&self) -> Option<i64> {
        self.invocation_time
    }

    /// The live handles, in insertion order
    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    // ═══════════════════════════════════════════════════════════════════
    // REGISTRATION
    // ═══════════════════════════════════════════════════════════════════

    /// Register a subscription
    ///
    /// `message` is the buffer incoming payloads are drained into; the
    /// callback receives `Some(&message)` after a successful take, or `None`
    /// under the `Always` policy when no data arrived.
    pub fn add_subscription<M, F>(
        &mut self,
        subscription: &SubscriptionRef,
        message: M,
        callback: F,
        invocation: Invocation,
    ) -> Result<(), Error>
    where
        M: Any,
        F: FnMut(Option<&M>) + 'static,
    {
        self.require_slot()?;
        let mut callback = callback;
        let entry = Entry::Subscription {
            subscription: Rc::clone(subscription),
            message: Box::new(message),
            callback: Box::new(move |message: Option<&dyn Any>| {
                callback(message.and_then(|m| m.downcast_ref::<M>()));
            }),
        };
        self.push_handle(invocation, entry);
        self.counters.subscriptions += 1;
        log::debug!("added a subscription");
        Ok(())
    }

    /// Register a subscription whose callback carries a context value
    pub fn add_subscription_with_context<M, C, F>(
        &mut self,
        subscription: &SubscriptionRef,
        message: M,
        callback: F,
        context: C,
        invocation: Invocation,
    ) -> Result<(), Error>
    where
        M: Any,
        C: Any,
        F: FnMut(Option<&M>, &mut C) + 'static,
    {
        self.require_slot()?;
        let mut callback = callback;
        let entry = Entry::SubscriptionWithContext {
            subscription: Rc::clone(subscription),
            message: Box::new(message),
            context: Box::new(context),
            callback: Box::new(move |message: Option<&dyn Any>, context: &mut dyn Any| {
                if let Some(context) = context.downcast_mut::<C>() {
                    callback(message.and_then(|m| m.downcast_ref::<M>()), context);
                }
            }),
        };
        self.push_handle(invocation, entry);
        self.counters.subscriptions += 1;
        log::debug!("added a subscription");
        Ok(())
    }

    /// Register a timer; its callback lives inside the middleware timer and
    /// is invoked by the timer-call primitive when the timer elapsed
    pub fn add_timer(&mut self, timer: &TimerRef) -> Result<(), Error> {
        self.require_slot()?;
        let entry = Entry::Timer {
            timer: Rc::clone(timer),
        };
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.timers += 1;
        log::debug!("added a timer");
        Ok(())
    }

    /// Register a service client
    pub fn add_client<R, F>(
        &mut self,
        client: &ClientRef,
        response: R,
        callback: F,
    ) -> Result<(), Error>
    where
        R: Any,
        F: FnMut(&R) + 'static,
    {
        self.require_slot()?;
        let mut callback = callback;
        let entry = Entry::Client {
            client: Rc::clone(client),
            response: Box::new(response),
            request_id: RequestId::default(),
            callback: Box::new(move |response: &dyn Any| {
                if let Some(response) = response.downcast_ref::<R>() {
                    callback(response);
                }
            }),
        };
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.clients += 1;
        log::debug!("added a client");
        Ok(())
    }

    /// Register a service client whose callback receives the request id
    pub fn add_client_with_request_id<R, F>(
        &mut self,
        client: &ClientRef,
        response: R,
        callback: F,
    ) -> Result<(), Error>
    where
        R: Any,
        F: FnMut(&R, &RequestId) + 'static,
    {
        self.require_slot()?;
        let mut callback = callback;
        let entry = Entry::ClientWithRequestId {
            client: Rc::clone(client),
            response: Box::new(response),
            request_id: RequestId::default(),
            callback: Box::new(move |response: &dyn Any, request_id: &RequestId| {
                if let Some(response) = response.downcast_ref::<R>() {
                    callback(response, request_id);
                }
            }),
        };
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.clients += 1;
        log::debug!("added a client");
        Ok(())
    }

    /// Register a service server
    ///
    /// The callback fills the response buffer; the executor sends it back
    /// through the middleware after the callback returns.
    pub fn add_service<Q, R, F>(
        &mut self,
        service: &ServiceRef,
        request: Q,
        response: R,
        callback: F,
    ) -> Result<(), Error>
    where
        Q: Any,
        R: Any,
        F: FnMut(&Q, &mut R) + 'static,
    {
        self.require_slot()?;
        let mut callback = callback;
        let entry = Entry::Service {
            service: Rc::clone(service),
            request: Box::new(request),
            response: Box::new(response),
            request_id: RequestId::default(),
            callback: Box::new(move |request: &dyn Any, response: &mut dyn Any| {
                if let (Some(request), Some(response)) =
                    (request.downcast_ref::<Q>(), response.downcast_mut::<R>())
                {
                    callback(request, response);
                }
            }),
        };
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.services += 1;
        log::debug!("added a service");
        Ok(())
    }

    /// Register a service server whose callback receives the request id
    pub fn add_service_with_request_id<Q, R, F>(
        &mut self,
        service: &ServiceRef,
        request: Q,
        response: R,
        callback: F,
    ) -> Result<(), Error>
    where
        Q: Any,
        R: Any,
        F: FnMut(&Q, &RequestId, &mut R) + 'static,
    {
        self.require_slot()?;
        let mut callback = callback;
        let entry = Entry::ServiceWithRequestId {
            service: Rc::clone(service),
            request: Box::new(request),
            response: Box::new(response),
            request_id: RequestId::default(),
            callback: Box::new(
                move |request: &dyn Any, request_id: &RequestId, response: &mut dyn Any| {
                    if let (Some(request), Some(response)) =
                        (request.downcast_ref::<Q>(), response.downcast_mut::<R>())
                    {
                        callback(request, request_id, response);
                    }
                },
            ),
        };
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.services += 1;
        log::debug!("added a service");
        Ok(())
    }

    /// Register a service server whose callback carries a context value
    pub fn add_service_with_context<Q, R, C, F>(
        &mut self,
        service: &ServiceRef,
        request: Q,
        response: R,
        callback: F,
        context: C,
    ) -> Result<(), Error>
    where
        Q: Any,
        R: Any,
        C: Any,
        F: FnMut(&Q, &mut R, &mut C) + 'static,
    {
        self.require_slot()?;
        let mut callback = callback;
        let entry = Entry::ServiceWithContext {
            service: Rc::clone(service),
            request: Box::new(request),
            response: Box::new(response),
            request_id: RequestId::default(),
            context: Box::new(context),
            callback: Box::new(
                move |request: &dyn Any, response: &mut dyn Any, context: &mut dyn Any| {
                    if let (Some(request), Some(response), Some(context)) = (
                        request.downcast_ref::<Q>(),
                        response.downcast_mut::<R>(),
                        context.downcast_mut::<C>(),
                    ) {
                        callback(request, response, context);
                    }
                },
            ),
        };
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.services += 1;
        log::debug!("added a service");
        Ok(())
    }

    /// Register a guard condition with a no-argument callback
    pub fn add_guard_condition<F>(
        &mut self,
        guard_condition: &GuardConditionRef,
        callback: F,
    ) -> Result<(), Error>
    where
        F: FnMut() + 'static,
    {
        self.require_slot()?;
        let entry = Entry::GuardCondition {
            guard_condition: Rc::clone(guard_condition),
            callback: Box::new(callback),
        };
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.guard_conditions += 1;
        log::debug!("added a guard condition");
        Ok(())
    }

    /// Register an action client
    ///
    /// Allocates a goal pool of `max_goals` entries plus the pre-sized
    /// cancel-response and status scratch buffers. `feedback` and `result`
    /// are the buffers incoming payloads are drained into.
    pub fn add_action_client<Fb, Res>(
        &mut self,
        client: &ActionClientRef,
        max_goals: usize,
        feedback: Fb,
        result: Res,
        callbacks: ActionClientCallbacks,
    ) -> Result<(), Error>
    where
        Fb: Any,
        Res: Any,
    {
        self.require_slot()?;
        if max_goals == 0 {
            return Err(Error::InvalidArgument);
        }
        let entity_counts = client.borrow().entity_counts();
        let pool = Pool::new(max_goals)?;

        let mut cancel_goals = Vec::new();
        cancel_goals.try_reserve_exact(max_goals)?;
        cancel_goals.resize(max_goals, GoalInfo::default());

        let mut status_updates = Vec::new();
        status_updates.try_reserve_exact(max_goals)?;
        status_updates.resize(max_goals, Default::default());

        let entry = Entry::ActionClient(ActionClientEntry {
            client: Rc::clone(client),
            entity_counts,
            pool,
            feedback: Box::new(feedback),
            result: Box::new(result),
            cancel_goals: cancel_goals.into_boxed_slice(),
            status_updates: status_updates.into_boxed_slice(),
            ready: ActionClientReadiness::default(),
            callbacks,
        });
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.action_clients += 1;
        absorb_entity_counts(&mut self.counters, &entity_counts);
        log::debug!("added an action client");
        Ok(())
    }

    /// Register an action server
    ///
    /// `goal_storage` is the backing array goal request payloads are taken
    /// into: `max_goals` slots of `goal_request_size` bytes each, bound to
    /// pool slots by index.
    pub fn add_action_server<GF, CF>(
        &mut self,
        server: &ActionServerRef,
        max_goals: usize,
        goal_request_size: usize,
        goal_storage: Box<[u8]>,
        goal_callback: GF,
        cancel_callback: CF,
    ) -> Result<(), Error>
    where
        GF: FnMut(GoalId, &[u8]) -> GoalDecision + 'static,
        CF: FnMut(GoalId) -> bool + 'static,
    {
        self.require_slot()?;
        if max_goals == 0 || goal_request_size == 0 {
            return Err(Error::InvalidArgument);
        }
        if goal_storage.len() < max_goals * goal_request_size {
            return Err(Error::InvalidArgument);
        }
        let entity_counts = server.borrow().entity_counts();
        let pool = Pool::new(max_goals)?;

        let entry = Entry::ActionServer(ActionServerEntry {
            server: Rc::clone(server),
            entity_counts,
            pool,
            goal_storage,
            goal_request_size,
            ready: ActionServerReadiness::default(),
            goal_ended: false,
            goal_callback: Box::new(goal_callback),
            cancel_callback: Box::new(cancel_callback),
        });
        self.push_handle(Invocation::OnNewData, entry);
        self.counters.action_servers += 1;
        absorb_entity_counts(&mut self.counters, &entity_counts);
        log::debug!("added an action server");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // REMOVAL
    // ═══════════════════════════════════════════════════════════════════

    /// Remove a subscription (plain or with-context)
    pub fn remove_subscription(&mut self, subscription: &SubscriptionRef) -> Result<(), Error> {
        self.remove_endpoint(&Endpoint::Subscription(Rc::clone(subscription)))?;
        self.counters.subscriptions -= 1;
        log::debug!("removed a subscription");
        Ok(())
    }

    /// Remove a timer
    pub fn remove_timer(&mut self, timer: &TimerRef) -> Result<(), Error> {
        self.remove_endpoint(&Endpoint::Timer(Rc::clone(timer)))?;
        self.counters.timers -= 1;
        log::debug!("removed a timer");
        Ok(())
    }

    /// Remove a client (plain or with-request-id)
    pub fn remove_client(&mut self, client: &ClientRef) -> Result<(), Error> {
        self.remove_endpoint(&Endpoint::Client(Rc::clone(client)))?;
        self.counters.clients -= 1;
        log::debug!("removed a client");
        Ok(())
    }

    /// Remove a service (any variant)
    pub fn remove_service(&mut self, service: &ServiceRef) -> Result<(), Error> {
        self.remove_endpoint(&Endpoint::Service(Rc::clone(service)))?;
        self.counters.services -= 1;
        log::debug!("removed a service");
        Ok(())
    }

    /// Remove a guard condition
    pub fn remove_guard_condition(
        &mut self,
        guard_condition: &GuardConditionRef,
    ) -> Result<(), Error> {
        self.remove_endpoint(&Endpoint::GuardCondition(Rc::clone(guard_condition)))?;
        self.counters.guard_conditions -= 1;
        log::debug!("removed a guard condition");
        Ok(())
    }

    /// Remove an action client, dropping its goal pool
    pub fn remove_action_client(&mut self, client: &ActionClientRef) -> Result<(), Error> {
        let handle = self.remove_endpoint(&Endpoint::ActionClient(Rc::clone(client)))?;
        if let Entry::ActionClient(entry) = handle.into_entry() {
            shed_entity_counts(&mut self.counters, &entry.entity_counts);
            self.counters.action_clients -= 1;
        }
        log::debug!("removed an action client");
        Ok(())
    }

    /// Remove an action server, dropping its goal pool and backing storage
    pub fn remove_action_server(&mut self, server: &ActionServerRef) -> Result<(), Error> {
        let handle = self.remove_endpoint(&Endpoint::ActionServer(Rc::clone(server)))?;
        if let Entry::ActionServer(entry) = handle.into_entry() {
            shed_entity_counts(&mut self.counters, &entry.entity_counts);
            self.counters.action_servers -= 1;
        }
        log::debug!("removed an action server");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // ACTION GOAL SEAMS
    // ═══════════════════════════════════════════════════════════════════

    /// Register a user-issued goal with its action client's pool so the
    /// goal response can be matched by sequence number
    pub fn track_action_goal(
        &mut self,
        client: &ActionClientRef,
        goal_id: GoalId,
        sequence_number: i64,
    ) -> Result<(), Error> {
        self.require_initialized()?;
        self.action_client_entry_mut(client)?
            .track_goal(goal_id, sequence_number)
    }

    /// Record a user-issued cancel request's sequence number on its goal
    pub fn track_action_cancel(
        &mut self,
        client: &ActionClientRef,
        goal_id: GoalId,
        sequence_number: i64,
    ) -> Result<(), Error> {
        self.require_initialized()?;
        self.action_client_entry_mut(client)?
            .track_cancel(goal_id, sequence_number)
    }

    /// Mark a server goal terminated (`Succeeded`, `Canceled` or `Aborted`);
    /// the next execute pass releases its slot
    pub fn finish_action_goal(
        &mut self,
        server: &ActionServerRef,
        goal_id: GoalId,
        status: GoalStatus,
    ) -> Result<(), Error> {
        self.require_initialized()?;
        self.action_server_entry_mut(server)?
            .finish_goal(goal_id, status)
    }

    /// Free slots remaining in an action client's goal pool
    pub fn action_client_free_goals(&self, client: &ActionClientRef) -> Result<usize, Error> {
        self.handles
            .iter()
            .find_map(|handle| match handle.entry() {
                Entry::ActionClient(entry) if same_endpoint(&entry.client, client) => {
                    Some(entry.pool.free())
                }
                _ => None,
            })
            .ok_or(Error::NotFound)
    }

    /// Free slots remaining in an action server's goal pool
    pub fn action_server_free_goals(&self, server: &ActionServerRef) -> Result<usize, Error> {
        self.handles
            .iter()
            .find_map(|handle| match handle.entry() {
                Entry::ActionServer(entry) if same_endpoint(&entry.server, server) => {
                    Some(entry.pool.free())
                }
                _ => None,
            })
            .ok_or(Error::NotFound)
    }

    /// Status of a live server goal
    pub fn action_server_goal_status(
        &self,
        server: &ActionServerRef,
        goal_id: GoalId,
    ) -> Result<GoalStatus, Error> {
        let entry = self
            .handles
            .iter()
            .find_map(|handle| match handle.entry() {
                Entry::ActionServer(entry) if same_endpoint(&entry.server, server) => Some(entry),
                _ => None,
            })
            .ok_or(Error::NotFound)?;
        entry
            .pool
            .iter()
            .find(|goal| goal.goal_id == goal_id)
            .map(|goal| goal.status)
            .ok_or(Error::NotFound)
    }

    // ═══════════════════════════════════════════════════════════════════
    // DRIVING
    // ═══════════════════════════════════════════════════════════════════

    /// Ensure a valid wait-set sized to the current counters exists
    ///
    /// Rebuilds are deferred to this point so a batch of registrations costs
    /// one rebuild, not one per mutation.
    pub fn prepare(&mut self) -> Result<(), Error> {
        self.require_initialized()?;
        if self.wait_set.is_none() {
            let wait_set = {
                let context = self.context.as_ref().ok_or(Error::NotInitialized)?;
                context.create_wait_set(&self.counters.wait_set_sizes())?
            };
            self.wait_set = Some(wait_set);
            log::debug!("wait set rebuilt");
        }
        Ok(())
    }

    /// One dispatch cycle: collect readiness with `timeout`, then run the
    /// selected scheduling policy
    pub fn spin_some(&mut self, timeout: Duration) -> Result<SpinOutcome, Error> {
        self.require_initialized()?;
        {
            let context = self.context.as_ref().ok_or(Error::NotInitialized)?;
            if !context.is_valid() {
                log::error!("spin_some: middleware context is invalid");
                return Err(Error::Middleware);
            }
        }
        self.prepare()?;

        let wait_set = self.wait_set.as_mut().ok_or(Error::NotInitialized)?;
        wait_set.clear();
        for handle in self.handles.iter_mut() {
            handle.register(wait_set.as_mut())?;
        }

        let outcome = wait_set.wait(timeout)?;

        match self.semantics {
            Semantics::RclcppLike => scheduling::default_scheduling(
                &mut self.handles,
                wait_set.as_ref(),
                &mut self.trigger,
            )?,
            Semantics::Let => {
                scheduling::let_scheduling(&mut self.handles, wait_set.as_ref(), &mut self.trigger)?
            }
        }

        Ok(match outcome {
            WaitOutcome::Ready => SpinOutcome::Completed,
            WaitOutcome::TimedOut => SpinOutcome::TimedOut,
        })
    }

    /// Spin until the middleware context becomes invalid
    ///
    /// Each cycle waits with the configured timeout. Exits cleanly when the
    /// context is torn down; propagates any fatal cycle error.
    pub fn spin(&mut self) -> Result<(), Error> {
        self.require_initialized()?;
        log::debug!("spin: wait timeout {} ms", self.timeout.as_millis());
        while self.context_is_valid() {
            self.spin_some(self.timeout)?;
        }
        Ok(())
    }

    /// One cycle, then sleep out the remainder of `period`
    ///
    /// The phase anchor is seeded on the first call and advanced by exactly
    /// `period` on every call regardless of jitter, so the cycle cadence is
    /// drift-free. An overrunning cycle skips the sleep.
    pub fn spin_one_period(&mut self, period: Duration) -> Result<SpinOutcome, Error> {
        self.require_initialized()?;
        let context = self.context.clone().ok_or(Error::NotInitialized)?;

        let anchor = match self.invocation_time {
            Some(anchor) => anchor,
            None => {
                let now = context.now_nanos();
                self.invocation_time = Some(now);
                now
            }
        };

        let outcome = self.spin_some(self.timeout)?;

        let deadline = anchor + period.as_nanos() as i64;
        let now = context.now_nanos();
        if now < deadline {
            context.sleep(Duration::from_nanos((deadline - now) as u64));
        }
        self.invocation_time = Some(deadline);
        Ok(outcome)
    }

    /// Periodic spin until the middleware context becomes invalid
    pub fn spin_period(&mut self, period: Duration) -> Result<(), Error> {
        self.require_initialized()?;
        while self.context_is_valid() {
            self.spin_one_period(period)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // INTERNALS
    // ═══════════════════════════════════════════════════════════════════

    fn require_initialized(&self) -> Result<(), Error> {
        if self.capacity == 0 || self.context.is_none() {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn require_slot(&self) -> Result<(), Error> {
        self.require_initialized()?;
        if self.handles.len() == self.capacity {
            return Err(Error::CapacityExceeded);
        }
        Ok(())
    }

    fn context_is_valid(&self) -> bool {
        self.context.as_ref().map(|c| c.is_valid()).unwrap_or(false)
    }

    fn push_handle(&mut self, invocation: Invocation, entry: Entry) {
        self.handles
            .push(Handle::new(invocation, self.capacity, entry));
        // Stale until the next prepare resizes it to the new census.
        self.wait_set = None;
    }

    fn remove_endpoint(&mut self, endpoint: &Endpoint) -> Result<Handle, Error> {
        self.require_initialized()?;
        let position = self
            .handles
            .iter()
            .position(|handle| handle.refers_to(endpoint))
            .ok_or(Error::NotFound)?;
        let handle = self.handles.remove(position);
        self.wait_set = None;
        Ok(handle)
    }

    fn action_client_entry_mut(
        &mut self,
        client: &ActionClientRef,
    ) -> Result<&mut ActionClientEntry, Error> {
        self.handles
            .iter_mut()
            .find_map(|handle| handle.action_client_entry_mut(client))
            .ok_or(Error::NotFound)
    }

    fn action_server_entry_mut(
        &mut self,
        server: &ActionServerRef,
    ) -> Result<&mut ActionServerEntry, Error> {
        self.handles
            .iter_mut()
            .find_map(|handle| handle.action_server_entry_mut(server))
            .ok_or(Error::NotFound)
    }
}

fn absorb_entity_counts(counters: &mut HandleCounters, counts: &EntityCounts) {
    counters.subscriptions += counts.subscriptions;
    counters.guard_conditions += counts.guard_conditions;
    counters.timers += counts.timers;
    counters.clients += counts.clients;
    counters.services += counts.services;
}

fn shed_entity_counts(counters: &mut HandleCounters, counts: &EntityCounts) {
    counters.subscriptions -= counts.subscriptions;
    counters.guard_conditions -= counts.guard_conditions;
    counters.timers -= counts.timers;
    counters.clients -= counts.clients;
    counters.services -= counts.services;
}
