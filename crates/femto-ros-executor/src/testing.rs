//! In-memory mock middleware for the executor tests
//!
//! The mock plays the role of the middleware participant: a context with a
//! virtual monotonic clock, queue-backed endpoints of every kind, and a
//! wait-set that aggregates readiness over them. Endpoints register with the
//! context (the "hub") at construction; the wait-set resolves the type-erased
//! references it is handed back to the registered concrete endpoints by
//! identity.
//!
//! Payloads are plain `i32` values (or raw bytes for goal requests), which
//! keeps the queues in fixed-capacity `heapless` structures. Time never
//! advances by itself: `wait` adds its timeout when nothing is ready, `sleep`
//! adds its duration, and tests add "work" explicitly.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::{Cell, RefCell};

use femto_ros_core::rmw::{
    same_endpoint, ActionClient, ActionClientReadiness, ActionClientRef, ActionServer,
    ActionServerReadiness, ActionServerRef, CancelResponseInfo, Client, ClientRef, Context,
    ContextRef, GoalResponse, GoalStatusUpdate, GuardCondition, GuardConditionRef, RequestId,
    Service, ServiceRef, Subscription, SubscriptionRef, Timer, TimerRef, WaitOutcome, WaitSet,
    WaitSetSizes, EntityCounts,
};
use femto_ros_core::{CancelCode, Duration, Error, GoalId, GoalInfo};

// ─── Coercion helpers ────────────────────────────────────────────────

pub(crate) fn context_ref(context: &Rc<MockContext>) -> ContextRef {
    Rc::clone(context) as ContextRef
}

pub(crate) fn sub_ref(mock: &Rc<RefCell<MockSubscription>>) -> SubscriptionRef {
    Rc::clone(mock) as SubscriptionRef
}

pub(crate) fn timer_ref(mock: &Rc<RefCell<MockTimer>>) -> TimerRef {
    Rc::clone(mock) as TimerRef
}

pub(crate) fn client_ref(mock: &Rc<RefCell<MockClient>>) -> ClientRef {
    Rc::clone(mock) as ClientRef
}

pub(crate) fn service_ref(mock: &Rc<RefCell<MockService>>) -> ServiceRef {
    Rc::clone(mock) as ServiceRef
}

pub(crate) fn gc_ref(mock: &Rc<RefCell<MockGuardCondition>>) -> GuardConditionRef {
    Rc::clone(mock) as GuardConditionRef
}

pub(crate) fn action_client_ref(mock: &Rc<RefCell<MockActionClient>>) -> ActionClientRef {
    Rc::clone(mock) as ActionClientRef
}

pub(crate) fn action_server_ref(mock: &Rc<RefCell<MockActionServer>>) -> ActionServerRef {
    Rc::clone(mock) as ActionServerRef
}

// ─── Endpoints ───────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct MockSubscription {
    queue: heapless::Deque<i32, 8>,
    fail_next: bool,
}

impl MockSubscription {
    pub fn push(&mut self, value: i32) {
        self.queue.push_back(value).expect("mock queue full");
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn fail_next_take(&mut self) {
        self.fail_next = true;
    }

    fn ready(&self) -> bool {
        !self.queue.is_empty()
    }
}

impl Subscription for MockSubscription {
    fn take(&mut self, message: &mut dyn Any) -> Result<(), Error> {
        if self.fail_next {
            self.fail_next = false;
            return Err(Error::TakeFailed);
        }
        let value = self.queue.pop_front().ok_or(Error::TakeFailed)?;
        let slot = message.downcast_mut::<i32>().ok_or(Error::Middleware)?;
        *slot = value;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockTimer {
    due: bool,
    canceled: bool,
    calls: u32,
}

impl MockTimer {
    pub fn set_due(&mut self, due: bool) {
        self.due = due;
    }

    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    fn ready(&self) -> bool {
        self.due
    }
}

impl Timer for MockTimer {
    fn call(&mut self) -> Result<(), Error> {
        if self.canceled {
            return Err(Error::TimerCanceled);
        }
        self.due = false;
        self.calls += 1;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockClient {
    responses: heapless::Deque<(RequestId, i32), 8>,
}

impl MockClient {
    pub fn push_response(&mut self, request_id: RequestId, value: i32) {
        self.responses
            .push_back((request_id, value))
            .expect("mock queue full");
    }

    fn ready(&self) -> bool {
        !self.responses.is_empty()
    }
}

impl Client for MockClient {
    fn take_response(
        &mut self,
        request_id: &mut RequestId,
        response: &mut dyn Any,
    ) -> Result<(), Error> {
        let (header, value) = self.responses.pop_front().ok_or(Error::TakeFailed)?;
        *request_id = header;
        let slot = response.downcast_mut::<i32>().ok_or(Error::Middleware)?;
        *slot = value;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockService {
    requests: heapless::Deque<(RequestId, i32), 8>,
    responses_sent: Vec<(RequestId, i32)>,
}

impl MockService {
    pub fn push_request(&mut self, request_id: RequestId, value: i32) {
        self.requests
            .push_back((request_id, value))
            .expect("mock queue full");
    }

    pub fn responses(&self) -> &[(RequestId, i32)] {
        &self.responses_sent
    }

    fn ready(&self) -> bool {
        !self.requests.is_empty()
    }
}

impl Service for MockService {
    fn take_request(
        &mut self,
        request_id: &mut RequestId,
        request: &mut dyn Any,
    ) -> Result<(), Error> {
        let (header, value) = self.requests.pop_front().ok_or(Error::TakeFailed)?;
        *request_id = header;
        let slot = request.downcast_mut::<i32>().ok_or(Error::Middleware)?;
        *slot = value;
        Ok(())
    }

    fn send_response(&mut self, request_id: &RequestId, response: &dyn Any) -> Result<(), Error> {
        let value = response.downcast_ref::<i32>().ok_or(Error::Middleware)?;
        self.responses_sent.push((*request_id, *value));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockGuardCondition {
    triggered: bool,
}

impl MockGuardCondition {
    pub fn trigger_now(&mut self) {
        self.triggered = true;
    }

    fn is_triggered(&self) -> bool {
        self.triggered
    }

    fn consume(&mut self) -> bool {
        core::mem::take(&mut self.triggered)
    }
}

impl GuardCondition for MockGuardCondition {
    fn trigger(&mut self) -> Result<(), Error> {
        self.trigger_now();
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockActionClient {
    goal_responses: heapless::Deque<GoalResponse, 4>,
    feedbacks: heapless::Deque<(GoalId, i32), 4>,
    statuses: heapless::Deque<heapless::Vec<GoalStatusUpdate, 4>, 2>,
    cancel_responses: heapless::Deque<(i64, heapless::Vec<GoalInfo, 4>), 4>,
    result_responses: heapless::Deque<(i64, i32), 4>,
    result_requests_sent: Vec<GoalId>,
    sequence: i64,
}

impl MockActionClient {
    pub fn push_goal_response(&mut self, response: GoalResponse) {
        self.goal_responses
            .push_back(response)
            .expect("mock queue full");
    }

    pub fn push_feedback(&mut self, goal_id: GoalId, value: i32) {
        self.feedbacks
            .push_back((goal_id, value))
            .expect("mock queue full");
    }

    #[allow(dead_code)]
    pub fn push_status(&mut self, updates: &[GoalStatusUpdate]) {
        let list = heapless::Vec::from_slice(updates).expect("mock status list full");
        self.statuses.push_back(list).expect("mock queue full");
    }

    pub fn push_cancel_response(&mut self, sequence_number: i64, goals: &[GoalInfo]) {
        let list = heapless::Vec::from_slice(goals).expect("mock cancel list full");
        self.cancel_responses
            .push_back((sequence_number, list))
            .expect("mock queue full");
    }

    pub fn push_result_response(&mut self, sequence_number: i64, value: i32) {
        self.result_responses
            .push_back((sequence_number, value))
            .expect("mock queue full");
    }

    pub fn result_requests(&self) -> &[GoalId] {
        &self.result_requests_sent
    }

    pub fn last_sequence_number(&self) -> i64 {
        self.sequence
    }

    fn readiness(&self) -> ActionClientReadiness {
        ActionClientReadiness {
            feedback: !self.feedbacks.is_empty(),
            status: !self.statuses.is_empty(),
            goal_response: !self.goal_responses.is_empty(),
            cancel_response: !self.cancel_responses.is_empty(),
            result_response: !self.result_responses.is_empty(),
        }
    }
}

impl ActionClient for MockActionClient {
    fn entity_counts(&self) -> EntityCounts {
        // Feedback and status topics plus the three protocol services.
        EntityCounts {
            subscriptions: 2,
            clients: 3,
            ..EntityCounts::default()
        }
    }

    fn take_goal_response(&mut self) -> Result<GoalResponse, Error> {
        self.goal_responses.pop_front().ok_or(Error::TakeFailed)
    }

    fn take_feedback(&mut self, feedback: &mut dyn Any) -> Result<GoalId, Error> {
        let (goal_id, value) = self.feedbacks.pop_front().ok_or(Error::TakeFailed)?;
        let slot = feedback.downcast_mut::<i32>().ok_or(Error::Middleware)?;
        *slot = value;
        Ok(goal_id)
    }

    fn take_status(&mut self, updates: &mut [GoalStatusUpdate]) -> Result<usize, Error> {
        let list = self.statuses.pop_front().ok_or(Error::TakeFailed)?;
        let count = list.len().min(updates.len());
        updates[..count].copy_from_slice(&list[..count]);
        Ok(count)
    }

    fn take_cancel_response(
        &mut self,
        goals_canceling: &mut [GoalInfo],
    ) -> Result<CancelResponseInfo, Error> {
        let (sequence_number, goals) =
            self.cancel_responses.pop_front().ok_or(Error::TakeFailed)?;
        let count = goals.len().min(goals_canceling.len());
        goals_canceling[..count].copy_from_slice(&goals[..count]);
        Ok(CancelResponseInfo {
            sequence_number,
            code: CancelCode::Ok,
            goals: count,
        })
    }

    fn take_result_response(&mut self, result: &mut dyn Any) -> Result<i64, Error> {
        let (sequence_number, value) =
            self.result_responses.pop_front().ok_or(Error::TakeFailed)?;
        let slot = result.downcast_mut::<i32>().ok_or(Error::Middleware)?;
        *slot = value;
        Ok(sequence_number)
    }

    fn send_result_request(&mut self, goal_id: GoalId) -> Result<i64, Error> {
        self.sequence += 1;
        self.result_requests_sent.push(goal_id);
        Ok(self.sequence)
    }
}

#[derive(Default)]
pub(crate) struct MockActionServer {
    goal_requests: heapless::Deque<(RequestId, GoalId, heapless::Vec<u8, 16>), 4>,
    cancel_requests: heapless::Deque<(RequestId, GoalId), 4>,
    result_requests: heapless::Deque<(RequestId, GoalId), 4>,
    goal_responses_sent: Vec<(RequestId, bool)>,
    cancel_responses_sent: Vec<(RequestId, CancelCode, Vec<GoalId>)>,
}

impl MockActionServer {
    pub fn push_goal_request(&mut self, request_id: RequestId, goal_id: GoalId, payload: &[u8]) {
        let payload = heapless::Vec::from_slice(payload).expect("mock payload too large");
        self.goal_requests
            .push_back((request_id, goal_id, payload))
            .expect("mock queue full");
    }

    pub fn push_cancel_request(&mut self, request_id: RequestId, goal_id: GoalId) {
        self.cancel_requests
            .push_back((request_id, goal_id))
            .expect("mock queue full");
    }

    pub fn push_result_request(&mut self, request_id: RequestId, goal_id: GoalId) {
        self.result_requests
            .push_back((request_id, goal_id))
            .expect("mock queue full");
    }

    pub fn goal_responses(&self) -> &[(RequestId, bool)] {
        &self.goal_responses_sent
    }

    pub fn cancel_responses(&self) -> &[(RequestId, CancelCode, Vec<GoalId>)] {
        &self.cancel_responses_sent
    }

    fn readiness(&self) -> ActionServerReadiness {
        ActionServerReadiness {
            goal_request: !self.goal_requests.is_empty(),
            cancel_request: !self.cancel_requests.is_empty(),
            result_request: !self.result_requests.is_empty(),
            goal_expired: false,
        }
    }
}

impl ActionServer for MockActionServer {
    fn entity_counts(&self) -> EntityCounts {
        // The three protocol services plus the goal expiry timer.
        EntityCounts {
            services: 3,
            timers: 1,
            ..EntityCounts::default()
        }
    }

    fn take_goal_request(&mut self, storage: &mut [u8]) -> Result<(RequestId, GoalId), Error> {
        let (request_id, goal_id, payload) =
            self.goal_requests.pop_front().ok_or(Error::TakeFailed)?;
        if storage.len() < payload.len() {
            return Err(Error::Middleware);
        }
        storage[..payload.len()].copy_from_slice(&payload);
        Ok((request_id, goal_id))
    }

    fn take_cancel_request(&mut self) -> Result<(RequestId, GoalId), Error> {
        self.cancel_requests.pop_front().ok_or(Error::TakeFailed)
    }

    fn take_result_request(&mut self) -> Result<(RequestId, GoalId), Error> {
        self.result_requests.pop_front().ok_or(Error::TakeFailed)
    }

    fn send_goal_response(&mut self, request_id: &RequestId, accepted: bool) -> Result<(), Error> {
        self.goal_responses_sent.push((*request_id, accepted));
        Ok(())
    }

    fn send_cancel_response(
        &mut self,
        request_id: &RequestId,
        code: CancelCode,
        goals_canceling: &[GoalInfo],
    ) -> Result<(), Error> {
        let goals = goals_canceling.iter().map(|info| info.goal_id).collect();
        self.cancel_responses_sent.push((*request_id, code, goals));
        Ok(())
    }
}

// ─── Context and wait-set ────────────────────────────────────────────

#[derive(Default)]
struct Hub {
    subscriptions: Vec<Rc<RefCell<MockSubscription>>>,
    timers: Vec<Rc<RefCell<MockTimer>>>,
    clients: Vec<Rc<RefCell<MockClient>>>,
    services: Vec<Rc<RefCell<MockService>>>,
    guard_conditions: Vec<Rc<RefCell<MockGuardCondition>>>,
    action_clients: Vec<Rc<RefCell<MockActionClient>>>,
    action_servers: Vec<Rc<RefCell<MockActionServer>>>,
}

#[derive(Default)]
struct MockState {
    invalidated: Cell<bool>,
    now: Cell<i64>,
    wait_sets_built: Cell<usize>,
    sleeps: RefCell<Vec<u64>>,
    hub: RefCell<Hub>,
}

/// The mock middleware participant
#[derive(Default)]
pub(crate) struct MockContext {
    state: Rc<MockState>,
}

impl MockContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription(&self) -> Rc<RefCell<MockSubscription>> {
        let endpoint = Rc::new(RefCell::new(MockSubscription::default()));
        self.state
            .hub
            .borrow_mut()
            .subscriptions
            .push(Rc::clone(&endpoint));
        endpoint
    }

    pub fn timer(&self) -> Rc<RefCell<MockTimer>> {
        let endpoint = Rc::new(RefCell::new(MockTimer::default()));
        self.state.hub.borrow_mut().timers.push(Rc::clone(&endpoint));
        endpoint
    }

    pub fn client(&self) -> Rc<RefCell<MockClient>> {
        let endpoint = Rc::new(RefCell::new(MockClient::default()));
        self.state
            .hub
            .borrow_mut()
            .clients
            .push(Rc::clone(&endpoint));
        endpoint
    }

    pub fn service(&self) -> Rc<RefCell<MockService>> {
        let endpoint = Rc::new(RefCell::new(MockService::default()));
        self.state
            .hub
            .borrow_mut()
            .services
            .push(Rc::clone(&endpoint));
        endpoint
    }

    pub fn guard_condition(&self) -> Rc<RefCell<MockGuardCondition>> {
        let endpoint = Rc::new(RefCell::new(MockGuardCondition::default()));
        self.state
            .hub
            .borrow_mut()
            .guard_conditions
            .push(Rc::clone(&endpoint));
        endpoint
    }

    pub fn action_client(&self) -> Rc<RefCell<MockActionClient>> {
        let endpoint = Rc::new(RefCell::new(MockActionClient::default()));
        self.state
            .hub
            .borrow_mut()
            .action_clients
            .push(Rc::clone(&endpoint));
        endpoint
    }

    pub fn action_server(&self) -> Rc<RefCell<MockActionServer>> {
        let endpoint = Rc::new(RefCell::new(MockActionServer::default()));
        self.state
            .hub
            .borrow_mut()
            .action_servers
            .push(Rc::clone(&endpoint));
        endpoint
    }

    pub fn set_valid(&self, valid: bool) {
        self.state.invalidated.set(!valid);
    }

    pub fn now(&self) -> i64 {
        self.state.now.get()
    }

    pub fn advance(&self, nanos: i64) {
        self.state.now.set(self.state.now.get() + nanos);
    }

    pub fn wait_sets_built(&self) -> usize {
        self.state.wait_sets_built.get()
    }

    pub fn sleep_count(&self) -> usize {
        self.state.sleeps.borrow().len()
    }
}

impl Context for MockContext {
    fn is_valid(&self) -> bool {
        !self.state.invalidated.get()
    }

    fn now_nanos(&self) -> i64 {
        self.state.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.state.sleeps.borrow_mut().push(duration.as_nanos());
        self.advance(duration.as_nanos() as i64);
    }

    fn create_wait_set(&self, _sizes: &WaitSetSizes) -> Result<Box<dyn WaitSet>, Error> {
        self.state
            .wait_sets_built
            .set(self.state.wait_sets_built.get() + 1);
        Ok(Box::new(MockWaitSet {
            state: Rc::clone(&self.state),
            subscriptions: Vec::new(),
            timers: Vec::new(),
            clients: Vec::new(),
            services: Vec::new(),
            guard_conditions: Vec::new(),
            action_clients: Vec::new(),
            action_servers: Vec::new(),
            gc_snapshot: Vec::new(),
        }))
    }
}

fn find_registered<T, U: ?Sized>(
    registered: &[Rc<RefCell<T>>],
    endpoint: &Rc<U>,
) -> Result<Rc<RefCell<T>>, Error> {
    registered
        .iter()
        .find(|candidate| same_endpoint(*candidate, endpoint))
        .cloned()
        .ok_or(Error::Middleware)
}

struct MockWaitSet {
    state: Rc<MockState>,
    subscriptions: Vec<Rc<RefCell<MockSubscription>>>,
    timers: Vec<Rc<RefCell<MockTimer>>>,
    clients: Vec<Rc<RefCell<MockClient>>>,
    services: Vec<Rc<RefCell<MockService>>>,
    guard_conditions: Vec<Rc<RefCell<MockGuardCondition>>>,
    action_clients: Vec<Rc<RefCell<MockActionClient>>>,
    action_servers: Vec<Rc<RefCell<MockActionServer>>>,
    /// Guard-condition triggers latched by the last wait
    gc_snapshot: Vec<bool>,
}

impl MockWaitSet {
    fn anything_ready(&self) -> bool {
        self.subscriptions.iter().any(|s| s.borrow().ready())
            || self.timers.iter().any(|t| t.borrow().ready())
            || self.clients.iter().any(|c| c.borrow().ready())
            || self.services.iter().any(|s| s.borrow().ready())
            || self
                .guard_conditions
                .iter()
                .any(|g| g.borrow().is_triggered())
            || self
                .action_clients
                .iter()
                .any(|c| c.borrow().readiness().any())
            || self
                .action_servers
                .iter()
                .any(|s| s.borrow().readiness().any())
    }
}

impl WaitSet for MockWaitSet {
    fn clear(&mut self) {
        self.subscriptions.clear();
        self.timers.clear();
        self.clients.clear();
        self.services.clear();
        self.guard_conditions.clear();
        self.action_clients.clear();
        self.action_servers.clear();
        self.gc_snapshot.clear();
    }

    fn add_subscription(&mut self, subscription: &SubscriptionRef) -> Result<usize, Error> {
        let found = find_registered(&self.state.hub.borrow().subscriptions, subscription)?;
        self.subscriptions.push(found);
        Ok(self.subscriptions.len() - 1)
    }

    fn add_timer(&mut self, timer: &TimerRef) -> Result<usize, Error> {
        let found = find_registered(&self.state.hub.borrow().timers, timer)?;
        self.timers.push(found);
        Ok(self.timers.len() - 1)
    }

    fn add_client(&mut self, client: &ClientRef) -> Result<usize, Error> {
        let found = find_registered(&self.state.hub.borrow().clients, client)?;
        self.clients.push(found);
        Ok(self.clients.len() - 1)
    }

    fn add_service(&mut self, service: &ServiceRef) -> Result<usize, Error> {
        let found = find_registered(&self.state.hub.borrow().services, service)?;
        self.services.push(found);
        Ok(self.services.len() - 1)
    }

    fn add_guard_condition(&mut self, guard_condition: &GuardConditionRef) -> Result<usize, Error> {
        let found = find_registered(&self.state.hub.borrow().guard_conditions, guard_condition)?;
        self.guard_conditions.push(found);
        Ok(self.guard_conditions.len() - 1)
    }

    fn add_action_client(&mut self, client: &ActionClientRef) -> Result<usize, Error> {
        let found = find_registered(&self.state.hub.borrow().action_clients, client)?;
        self.action_clients.push(found);
        Ok(self.action_clients.len() - 1)
    }

    fn add_action_server(&mut self, server: &ActionServerRef) -> Result<usize, Error> {
        let found = find_registered(&self.state.hub.borrow().action_servers, server)?;
        self.action_servers.push(found);
        Ok(self.action_servers.len() - 1)
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, Error> {
        let ready = self.anything_ready();
        // Guard-condition triggers latch into this wait and reset, matching
        // the one-shot semantics of the real primitive.
        self.gc_snapshot = self
            .guard_conditions
            .iter()
            .map(|g| g.borrow_mut().consume())
            .collect();
        if ready {
            Ok(WaitOutcome::Ready)
        } else {
            self.state
                .now
                .set(self.state.now.get() + timeout.as_nanos() as i64);
            Ok(WaitOutcome::TimedOut)
        }
    }

    fn subscription_ready(&self, index: usize) -> bool {
        self.subscriptions
            .get(index)
            .map(|s| s.borrow().ready())
            .unwrap_or(false)
    }

    fn timer_ready(&self, index: usize) -> bool {
        self.timers
            .get(index)
            .map(|t| t.borrow().ready())
            .unwrap_or(false)
    }

    fn client_ready(&self, index: usize) -> bool {
        self.clients
            .get(index)
            .map(|c| c.borrow().ready())
            .unwrap_or(false)
    }

    fn service_ready(&self, index: usize) -> bool {
        self.services
            .get(index)
            .map(|s| s.borrow().ready())
            .unwrap_or(false)
    }

    fn guard_condition_ready(&self, index: usize) -> bool {
        self.gc_snapshot.get(index).copied().unwrap_or(false)
    }

    fn action_client_ready(&self, client: &ActionClientRef) -> ActionClientReadiness {
        self.action_clients
            .iter()
            .find(|candidate| same_endpoint(*candidate, client))
            .map(|c| c.borrow().readiness())
            .unwrap_or_default()
    }

    fn action_server_ready(&self, server: &ActionServerRef) -> ActionServerReadiness {
        self.action_servers
            .iter()
            .find(|candidate| same_endpoint(*candidate, server))
            .map(|s| s.borrow().readiness())
            .unwrap_or_default()
    }
}
