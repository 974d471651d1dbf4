//! Action server sub-engine
//!
//! Incoming goal requests acquire a pool slot bound to a slice of the
//! registration-provided backing storage; cancel and result requests are
//! matched to live goals by UUID. The execute step asks user code to accept
//! or reject pending goals and cancellations, answers over the middleware,
//! and releases terminated goals back to the pool.

use alloc::boxed::Box;

use femto_ros_core::rmw::{
    ActionServer as _, ActionServerReadiness, ActionServerRef, EntityCounts, RequestId,
};
use femto_ros_core::{transition, CancelCode, Error, GoalEvent, GoalId, GoalInfo, GoalStatus};

use crate::action::pool::Pool;

/// User verdict on a pending goal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalDecision {
    /// Accept the goal; a positive response is sent and the goal becomes
    /// `Accepted`
    Accept,
    /// Reject the goal; a negative response is sent and the slot is released
    Reject,
}

/// Per-goal state tracked for an action server
pub(crate) struct ServerGoal {
    pub goal_id: GoalId,
    pub status: GoalStatus,
    pub goal_request_header: RequestId,
    pub cancel_request_header: RequestId,
    pub result_request_header: RequestId,
    /// A taken cancel request awaiting the user's verdict
    pub cancel_pending: bool,
}

impl ServerGoal {
    fn vacant() -> Self {
        Self {
            goal_id: GoalId::zero(),
            status: GoalStatus::Unknown,
            goal_request_header: RequestId::default(),
            cancel_request_header: RequestId::default(),
            result_request_header: RequestId::default(),
            cancel_pending: false,
        }
    }
}

/// Executor-side state of one registered action server
pub(crate) struct ActionServerEntry {
    pub server: ActionServerRef,
    pub entity_counts: EntityCounts,
    pub pool: Pool<ServerGoal>,
    /// Backing storage for goal request payloads; pool slot `i` owns byte
    /// range `[i * goal_request_size, (i + 1) * goal_request_size)`
    pub goal_storage: Box<[u8]>,
    pub goal_request_size: usize,
    pub ready: ActionServerReadiness,
    /// Set by `finish_goal`; the next execute pass releases terminal goals
    pub goal_ended: bool,
    pub goal_callback: Box<dyn FnMut(GoalId, &[u8]) -> GoalDecision>,
    pub cancel_callback: Box<dyn FnMut(GoalId) -> bool>,
}

impl ActionServerEntry {
    /// Pending work check used by the trigger predicates and the
    /// `OnNewData` gate
    pub fn has_work(&self) -> bool {
        self.ready.any()
            || self.goal_ended
            || self
                .pool
                .iter()
                .any(|goal| goal.status == GoalStatus::Unknown || goal.cancel_pending)
    }

    /// Mark a goal terminated so the next execute pass releases its slot
    pub fn finish_goal(&mut self, goal_id: GoalId, status: GoalStatus) -> Result<(), Error> {
        let event = match status {
            GoalStatus::Succeeded => GoalEvent::Succeed,
            GoalStatus::Canceled => GoalEvent::Canceled,
            GoalStatus::Aborted => GoalEvent::Abort,
            _ => return Err(Error::InvalidArgument),
        };
        let goal = self
            .pool
            .find_mut(|goal| goal.goal_id == goal_id)
            .ok_or(Error::NotFound)?;
        if transition(goal.status, event) != Some(status) {
            return Err(Error::InvalidArgument);
        }
        goal.status = status;
        self.goal_ended = true;
        Ok(())
    }

    /// Drain every ready sub-entity
    pub fn take_new_data(&mut self) -> Result<(), Error> {
        if self.ready.goal_request {
            self.ready.goal_request = false;
            match self.pool.acquire(ServerGoal::vacant()) {
                Some(index) => {
                    let size = self.goal_request_size;
                    let storage = &mut self.goal_storage[index * size..(index + 1) * size];
                    let taken = self.server.borrow_mut().take_goal_request(storage);
                    match taken {
                        Ok((header, goal_id)) => {
                            if let Some(goal) = self.pool.get_mut(index) {
                                goal.goal_id = goal_id;
                                goal.goal_request_header = header;
                                goal.status = GoalStatus::Unknown;
                            }
                        }
                        Err(Error::TakeFailed) => {
                            self.pool.release(index);
                        }
                        Err(e) => {
                            self.pool.release(index);
                            log::error!("action server goal request take failed: {}", e);
                            return Err(e);
                        }
                    }
                }
                None => {
                    // Pool exhausted: the request stays queued and readiness
                    // re-flags it next cycle.
                    log::warn!("action server goal pool exhausted; request deferred");
                }
            }
        }

        if self.ready.result_request {
            self.ready.result_request = false;
            let taken = self.server.borrow_mut().take_result_request();
            match taken {
                Ok((header, goal_id)) => {
                    // An unmatched UUID is a caller error and is ignored.
                    if let Some(goal) = self.pool.find_mut(|goal| goal.goal_id == goal_id) {
                        goal.result_request_header = header;
                        goal.status = GoalStatus::Executing;
                    }
                }
                Err(Error::TakeFailed) => {}
                Err(e) => {
                    log::error!("action server result request take failed: {}", e);
                    return Err(e);
                }
            }
        }

        if self.ready.cancel_request {
            self.ready.cancel_request = false;
            let taken = self.server.borrow_mut().take_cancel_request();
            match taken {
                Ok((header, goal_id)) => self.route_cancel_request(header, goal_id),
                Err(Error::TakeFailed) => {}
                Err(e) => {
                    log::error!("action server cancel request take failed: {}", e);
                    return Err(e);
                }
            }
        }

        // Goal expiry carries no payload; the readiness refresh clears it.
        Ok(())
    }

    fn route_cancel_request(&mut self, header: RequestId, goal_id: GoalId) {
        match self.pool.find(|goal| goal.goal_id == goal_id) {
            Some(index) => {
                let cancelable = self
                    .pool
                    .get(index)
                    .map(|goal| {
                        transition(goal.status, GoalEvent::CancelGoal)
                            == Some(GoalStatus::Canceling)
                    })
                    .unwrap_or(false);
                if cancelable {
                    if let Some(goal) = self.pool.get_mut(index) {
                        goal.cancel_request_header = header;
                        goal.status = GoalStatus::Canceling;
                        goal.cancel_pending = true;
                    }
                } else {
                    self.reject_cancel(&header, CancelCode::GoalTerminated);
                }
            }
            None => self.reject_cancel(&header, CancelCode::UnknownGoal),
        }
    }

    // Immediate rejection is best-effort and never aborts the cycle.
    fn reject_cancel(&mut self, header: &RequestId, code: CancelCode) {
        let sent = self
            .server
            .borrow_mut()
            .send_cancel_response(header, code, &[]);
        if sent.is_err() {
            log::warn!("cancel rejection could not be sent");
        }
    }

    /// Advance every pending goal: release terminated goals, decide pending
    /// goal requests, decide pending cancellations
    pub fn execute(&mut self) -> Result<(), Error> {
        if self.goal_ended {
            while let Some(index) = self.pool.find(|goal| goal.status.is_terminal()) {
                self.pool.release(index);
            }
            self.goal_ended = false;
        }

        // Pending goal requests await the user's accept/reject verdict.
        while let Some(index) = self.pool.find(|goal| goal.status == GoalStatus::Unknown) {
            let (goal_id, header) = match self.pool.get(index) {
                Some(goal) => (goal.goal_id, goal.goal_request_header),
                None => break,
            };
            let decision = {
                let size = self.goal_request_size;
                let request = &self.goal_storage[index * size..(index + 1) * size];
                (self.goal_callback)(goal_id, request)
            };
            match decision {
                GoalDecision::Accept => {
                    let sent = self.server.borrow_mut().send_goal_response(&header, true);
                    match sent {
                        Ok(()) => {
                            if let Some(goal) = self.pool.get_mut(index) {
                                goal.status = GoalStatus::Accepted;
                            }
                        }
                        Err(e) => {
                            self.pool.release(index);
                            return Err(e);
                        }
                    }
                }
                GoalDecision::Reject => {
                    let sent = self.server.borrow_mut().send_goal_response(&header, false);
                    self.pool.release(index);
                    sent?;
                }
            }
        }

        // Pending cancellations await the user's verdict.
        for index in 0..self.pool.capacity() {
            let (goal_id, header) = match self.pool.get_mut(index) {
                Some(goal) if goal.cancel_pending => {
                    goal.cancel_pending = false;
                    (goal.goal_id, goal.cancel_request_header)
                }
                _ => continue,
            };
            if (self.cancel_callback)(goal_id) {
                let goals = [GoalInfo::with_id(goal_id)];
                self.server
                    .borrow_mut()
                    .send_cancel_response(&header, CancelCode::Ok, &goals)?;
                // The goal stays `Canceling` until user code finishes it.
            } else {
                self.server
                    .borrow_mut()
                    .send_cancel_response(&header, CancelCode::Rejected, &[])?;
                if let Some(goal) = self.pool.get_mut(index) {
                    goal.status = GoalStatus::Executing;
                }
            }
        }

        Ok(())
    }
}
