//! Action client sub-engine
//!
//! Tracks one pool entry per in-flight goal. The take step matches incoming
//! responses to goals by sequence number (goal, cancel, result) or by UUID
//! (feedback, status) and raises per-goal pending flags; the execute step
//! consumes those flags, invokes the user callbacks and advances the goal
//! state.
//!
//! Per-goal lifecycle: a tracked goal starts `Unknown` (pending), becomes
//! `Accepted` when the positive goal response arrives (at which point the
//! executor issues the result request), follows the status topic through
//! `Executing`/`Canceling`, and leaves the pool when its result response is
//! dispatched or its goal was rejected.

use alloc::boxed::Box;
use core::any::Any;

use femto_ros_core::rmw::{
    ActionClient as _, ActionClientReadiness, ActionClientRef, EntityCounts, GoalStatusUpdate,
};
use femto_ros_core::{Error, GoalId, GoalInfo, GoalStatus};

use crate::action::pool::Pool;

/// Per-goal state tracked for an action client
pub(crate) struct ClientGoal {
    pub goal_id: GoalId,
    pub goal_seq: i64,
    pub cancel_seq: i64,
    pub result_seq: i64,
    pub status: GoalStatus,
    pub accepted: bool,
    pub cancelled: bool,
    // Pending flags raised by the take step, consumed by the execute step.
    pub goal_response: bool,
    pub feedback: bool,
    pub cancel_response: bool,
    pub result_response: bool,
}

impl ClientGoal {
    /// A freshly issued goal awaiting its goal response
    pub fn pending(goal_id: GoalId, goal_seq: i64) -> Self {
        Self {
            goal_id,
            goal_seq,
            cancel_seq: -1,
            result_seq: -1,
            status: GoalStatus::Unknown,
            accepted: false,
            cancelled: false,
            goal_response: false,
            feedback: false,
            cancel_response: false,
            result_response: false,
        }
    }

    fn has_pending_response(&self) -> bool {
        self.goal_response || self.feedback || self.cancel_response || self.result_response
    }
}

/// User callbacks of an action client registration
///
/// Goal and result callbacks are mandatory; feedback and cancel callbacks
/// are optional. Feedback is only drained when a feedback callback exists.
///
/// # Example
///
/// ```ignore
/// let callbacks = ActionClientCallbacks::new(
///     |goal, accepted| log::info!("goal {goal}: accepted={accepted}"),
///     |goal, result: &FibonacciResult| log::info!("goal {goal} done"),
/// )
/// .with_feedback(|goal, fb: &FibonacciFeedback| log::info!("goal {goal} progress"))
/// .with_cancel(|goal, cancelled| log::info!("goal {goal} cancelled={cancelled}"));
/// ```
pub struct ActionClientCallbacks {
    pub(crate) goal: Box<dyn FnMut(GoalId, bool)>,
    pub(crate) feedback: Option<Box<dyn FnMut(GoalId, &dyn Any)>>,
    pub(crate) result: Box<dyn FnMut(GoalId, &dyn Any)>,
    pub(crate) cancel: Option<Box<dyn FnMut(GoalId, bool)>>,
}

impl ActionClientCallbacks {
    /// Create the callback set with the mandatory goal and result callbacks
    pub fn new<R, GF, RF>(goal: GF, result: RF) -> Self
    where
        R: Any,
        GF: FnMut(GoalId, bool) + 'static,
        RF: FnMut(GoalId, &R) + 'static,
    {
        let mut result = result;
        Self {
            goal: Box::new(goal),
            feedback: None,
            result: Box::new(move |goal_id, payload: &dyn Any| {
                if let Some(payload) = payload.downcast_ref::<R>() {
                    result(goal_id, payload);
                }
            }),
            cancel: None,
        }
    }

    /// Attach a feedback callback
    pub fn with_feedback<F, FF>(mut self, callback: FF) -> Self
    where
        F: Any,
        FF: FnMut(GoalId, &F) + 'static,
    {
        let mut callback = callback;
        self.feedback = Some(Box::new(move |goal_id, payload: &dyn Any| {
            if let Some(payload) = payload.downcast_ref::<F>() {
                callback(goal_id, payload);
            }
        }));
        self
    }

    /// Attach a cancel callback
    pub fn with_cancel<CF>(mut self, callback: CF) -> Self
    where
        CF: FnMut(GoalId, bool) + 'static,
    {
        self.cancel = Some(Box::new(callback));
        self
    }
}

/// Executor-side state of one registered action client
pub(crate) struct ActionClientEntry {
    pub client: ActionClientRef,
    pub entity_counts: EntityCounts,
    pub pool: Pool<ClientGoal>,
    /// Scratch buffer the middleware writes feedback payloads into
    pub feedback: Box<dyn Any>,
    /// Scratch buffer the middleware writes result payloads into
    pub result: Box<dyn Any>,
    /// Pre-sized buffer for cancel-response goal-info lists
    pub cancel_goals: Box<[GoalInfo]>,
    /// Pre-sized buffer for status-topic updates
    pub status_updates: Box<[GoalStatusUpdate]>,
    pub ready: ActionClientReadiness,
    pub callbacks: ActionClientCallbacks,
}

impl ActionClientEntry {
    /// Pending work check used by the trigger predicates and the
    /// `OnNewData` gate
    pub fn has_work(&self) -> bool {
        self.ready.any() || self.pool.iter().any(ClientGoal::has_pending_response)
    }

    /// Register a user-issued goal so its responses can be matched
    pub fn track_goal(&mut self, goal_id: GoalId, sequence_number: i64) -> Result<(), Error> {
        self.pool
            .acquire(ClientGoal::pending(goal_id, sequence_number))
            .map(|_| ())
            .ok_or(Error::CapacityExceeded)
    }

    /// Record a user-issued cancel request's sequence number
    pub fn track_cancel(&mut self, goal_id: GoalId, sequence_number: i64) -> Result<(), Error> {
        let goal = self
            .pool
            .find_mut(|goal| goal.goal_id == goal_id)
            .ok_or(Error::NotFound)?;
        goal.cancel_seq = sequence_number;
        Ok(())
    }

    /// Drain every ready sub-entity, raising the matching per-goal flags
    pub fn take_new_data(&mut self) -> Result<(), Error> {
        if self.ready.goal_response {
            self.ready.goal_response = false;
            let taken = self.client.borrow_mut().take_goal_response();
            match taken {
                Ok(response) => {
                    if let Some(goal) = self
                        .pool
                        .find_mut(|goal| goal.goal_seq == response.sequence_number)
                    {
                        goal.goal_response = true;
                        goal.accepted = response.accepted;
                    }
                }
                Err(Error::TakeFailed) => {}
                Err(e) => {
                    log::error!("action client goal response take failed: {}", e);
                    return Err(e);
                }
            }
        }

        if self.ready.feedback {
            self.ready.feedback = false;
            // Feedback is only drained when someone listens.
            if self.callbacks.feedback.is_some() {
                let taken = self.client.borrow_mut().take_feedback(self.feedback.as_mut());
                match taken {
                    Ok(goal_id) => {
                        if let Some(goal) = self.pool.find_mut(|goal| goal.goal_id == goal_id) {
                            goal.feedback = true;
                        }
                    }
                    Err(Error::TakeFailed) => {}
                    Err(e) => {
                        log::error!("action client feedback take failed: {}", e);
                        return Err(e);
                    }
                }
            }
        }

        if self.ready.status {
            self.ready.status = false;
            let taken = self.client.borrow_mut().take_status(&mut self.status_updates);
            match taken {
                Ok(count) => {
                    let count = count.min(self.status_updates.len());
                    for i in 0..count {
                        let update = self.status_updates[i];
                        if let Some(goal) = self.pool.find_mut(|goal| goal.goal_id == update.goal_id)
                        {
                            goal.status = update.status;
                        }
                    }
                }
                Err(Error::TakeFailed) => {}
                Err(e) => {
                    log::error!("action client status take failed: {}", e);
                    return Err(e);
                }
            }
        }

        if self.ready.cancel_response {
            self.ready.cancel_response = false;
            let taken = self
                .client
                .borrow_mut()
                .take_cancel_response(&mut self.cancel_goals);
            match taken {
                Ok(info) => {
                    let count = info.goals.min(self.cancel_goals.len());
                    if let Some(goal) = self
                        .pool
                        .find_mut(|goal| goal.cancel_seq == info.sequence_number)
                    {
                        let goal_id = goal.goal_id;
                        goal.cancel_response = true;
                        goal.cancelled = self.cancel_goals[..count]
                            .iter()
                            .any(|info| info.goal_id == goal_id);
                    }
                }
                Err(Error::TakeFailed) => {}
                Err(e) => {
                    log::error!("action client cancel response take failed: {}", e);
                    return Err(e);
                }
            }
        }

        if self.ready.result_response {
            self.ready.result_response = false;
            let taken = self
                .client
                .borrow_mut()
                .take_result_response(self.result.as_mut());
            match taken {
                Ok(sequence_number) => {
                    if let Some(goal) = self.pool.find_mut(|goal| goal.result_seq == sequence_number)
                    {
                        goal.result_response = true;
                    }
                }
                Err(Error::TakeFailed) => {}
                Err(e) => {
                    log::error!("action client result response take failed: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Consume the per-goal flags raised by the take step
    ///
    /// Each flag is cleared before its callback runs, so a cycle aborted by
    /// a later handle can be retried without double dispatch.
    pub fn execute(&mut self) -> Result<(), Error> {
        // Goal responses: invoke the goal callback; accepted goals get a
        // result request, rejected goals leave the pool.
        while let Some(index) = self.pool.find(|goal| goal.goal_response) {
            let (goal_id, accepted) = match self.pool.get_mut(index) {
                Some(goal) => {
                    goal.goal_response = false;
                    (goal.goal_id, goal.accepted)
                }
                None => break,
            };
            (self.callbacks.goal)(goal_id, accepted);
            if !accepted {
                self.pool.release(index);
                continue;
            }
            let sent = self.client.borrow_mut().send_result_request(goal_id);
            match sent {
                Ok(sequence_number) => {
                    if let Some(goal) = self.pool.get_mut(index) {
                        goal.result_seq = sequence_number;
                        goal.status = GoalStatus::Accepted;
                    }
                }
                Err(e) => {
                    log::warn!("result request for goal {} failed: {}", goal_id, e);
                    self.pool.release(index);
                }
            }
        }

        // Feedback.
        for index in 0..self.pool.capacity() {
            let goal_id = match self.pool.get_mut(index) {
                Some(goal) if goal.feedback => {
                    goal.feedback = false;
                    goal.goal_id
                }
                _ => continue,
            };
            if let Some(callback) = self.callbacks.feedback.as_mut() {
                callback(goal_id, &*self.feedback);
            }
        }

        // Cancel responses.
        for index in 0..self.pool.capacity() {
            let (goal_id, cancelled) = match self.pool.get_mut(index) {
                Some(goal) if goal.cancel_response => {
                    goal.cancel_response = false;
                    (goal.goal_id, goal.cancelled)
                }
                _ => continue,
            };
            if let Some(callback) = self.callbacks.cancel.as_mut() {
                callback(goal_id, cancelled);
            }
        }

        // Result responses: dispatch and release the goal.
        while let Some(index) = self.pool.find(|goal| goal.result_response) {
            let goal_id = match self.pool.get_mut(index) {
                Some(goal) => {
                    goal.result_response = false;
                    goal.goal_id
                }
                None => break,
            };
            (self.callbacks.result)(goal_id, &*self.result);
            self.pool.release(index);
        }

        Ok(())
    }
}
