//! Handle records: one registered source, its callback and its buffers
//!
//! A [`Handle`] is the unit of schedulable work. Its payload is a tagged
//! variant with one arm per handle kind, so the kind, the middleware
//! reference, the callback signature and the buffers cannot disagree.
//!
//! The per-handle steps of a dispatch cycle live here as methods:
//! readiness refresh, take, execute. The scheduler composes them.

use alloc::boxed::Box;
use core::any::Any;
use core::fmt;

use femto_ros_core::rmw::{
    same_endpoint, ActionClientRef, ActionServerRef, Client as _, ClientRef, GuardConditionRef,
    RequestId, Service as _, ServiceRef, Subscription as _, SubscriptionRef, Timer as _, TimerRef,
    WaitSet, WaitSetSizes,
};
use femto_ros_core::Error;

use crate::action::client::ActionClientEntry;
use crate::action::server::ActionServerEntry;

/// When a handle's callback is invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Invocation {
    /// Invoke the callback only when new data arrived and the take succeeded
    #[default]
    OnNewData,
    /// Invoke the callback every dispatch cycle, with or without data
    Always,
}

/// The closed set of handle kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Message subscription
    Subscription,
    /// Message subscription with a callback context
    SubscriptionWithContext,
    /// Middleware timer
    Timer,
    /// Service client
    Client,
    /// Service client whose callback receives the request id
    ClientWithRequestId,
    /// Service server
    Service,
    /// Service server whose callback receives the request id
    ServiceWithRequestId,
    /// Service server with a callback context
    ServiceWithContext,
    /// Manually triggerable notification
    GuardCondition,
    /// Action protocol client
    ActionClient,
    /// Action protocol server
    ActionServer,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Subscription => "Subscription",
            HandleKind::SubscriptionWithContext => "SubscriptionWithContext",
            HandleKind::Timer => "Timer",
            HandleKind::Client => "Client",
            HandleKind::ClientWithRequestId => "ClientWithRequestId",
            HandleKind::Service => "Service",
            HandleKind::ServiceWithRequestId => "ServiceWithRequestId",
            HandleKind::ServiceWithContext => "ServiceWithContext",
            HandleKind::GuardCondition => "GuardCondition",
            HandleKind::ActionClient => "ActionClient",
            HandleKind::ActionServer => "ActionServer",
        };
        write!(f, "{}", name)
    }
}

/// A middleware reference of any kind, used for identity lookups
/// (removal, the `One` trigger)
#[derive(Clone)]
pub enum Endpoint {
    /// Subscription reference
    Subscription(SubscriptionRef),
    /// Timer reference
    Timer(TimerRef),
    /// Client reference
    Client(ClientRef),
    /// Service reference
    Service(ServiceRef),
    /// Guard condition reference
    GuardCondition(GuardConditionRef),
    /// Action client reference
    ActionClient(ActionClientRef),
    /// Action server reference
    ActionServer(ActionServerRef),
}

/// Per-kind census of the live handle table
///
/// Action endpoints fold the primitive entities they occupy into the
/// subscription/timer/client/service/guard-condition counters at
/// registration, so [`wait_set_sizes`] maps the primitive counters directly.
///
/// [`wait_set_sizes`]: HandleCounters::wait_set_sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleCounters {
    /// Total subscriptions (including action sub-entities)
    pub subscriptions: usize,
    /// Total timers (including action sub-entities)
    pub timers: usize,
    /// Total clients (including action sub-entities)
    pub clients: usize,
    /// Total services (including action sub-entities)
    pub services: usize,
    /// Total guard conditions (including action sub-entities)
    pub guard_conditions: usize,
    /// Total action clients
    pub action_clients: usize,
    /// Total action servers
    pub action_servers: usize,
    /// Total events
    pub events: usize,
}

impl HandleCounters {
    /// Wait-set capacities matching the current census
    pub fn wait_set_sizes(&self) -> WaitSetSizes {
        WaitSetSizes {
            subscriptions: self.subscriptions,
            guard_conditions: self.guard_conditions,
            timers: self.timers,
            clients: self.clients,
            services: self.services,
            events: self.events,
        }
    }
}

// Type-erased callback storage. Registration is generic over the user's
// message/context types and erases here; the erasing wrappers downcast back.
pub(crate) type SubscriptionCallback = Box<dyn FnMut(Option<&dyn Any>)>;
pub(crate) type SubscriptionContextCallback = Box<dyn FnMut(Option<&dyn Any>, &mut dyn Any)>;
pub(crate) type ClientCallback = Box<dyn FnMut(&dyn Any)>;
pub(crate) type ClientRequestIdCallback = Box<dyn FnMut(&dyn Any, &RequestId)>;
pub(crate) type ServiceCallback = Box<dyn FnMut(&dyn Any, &mut dyn Any)>;
pub(crate) type ServiceRequestIdCallback = Box<dyn FnMut(&dyn Any, &RequestId, &mut dyn Any)>;
pub(crate) type ServiceContextCallback = Box<dyn FnMut(&dyn Any, &mut dyn Any, &mut dyn Any)>;
pub(crate) type GuardConditionCallback = Box<dyn FnMut()>;

/// Kind-specific payload of a handle
pub(crate) enum Entry {
    Subscription {
        subscription: SubscriptionRef,
        message: Box<dyn Any>,
        callback: SubscriptionCallback,
    },
    SubscriptionWithContext {
        subscription: SubscriptionRef,
        message: Box<dyn Any>,
        context: Box<dyn Any>,
        callback: SubscriptionContextCallback,
    },
    Timer {
        timer: TimerRef,
    },
    Client {
        client: ClientRef,
        response: Box<dyn Any>,
        request_id: RequestId,
        callback: ClientCallback,
    },
    ClientWithRequestId {
        client: ClientRef,
        response: Box<dyn Any>,
        request_id: RequestId,
        callback: ClientRequestIdCallback,
    },
    Service {
        service: ServiceRef,
        request: Box<dyn Any>,
        response: Box<dyn Any>,
        request_id: RequestId,
        callback: ServiceCallback,
    },
    ServiceWithRequestId {
        service: ServiceRef,
        request: Box<dyn Any>,
        response: Box<dyn Any>,
        request_id: RequestId,
        callback: ServiceRequestIdCallback,
    },
    ServiceWithContext {
        service: ServiceRef,
        request: Box<dyn Any>,
        response: Box<dyn Any>,
        request_id: RequestId,
        context: Box<dyn Any>,
        callback: ServiceContextCallback,
    },
    GuardCondition {
        guard_condition: GuardConditionRef,
        callback: GuardConditionCallback,
    },
    ActionClient(ActionClientEntry),
    ActionServer(ActionServerEntry),
}

/// One registered source: middleware reference, callback, buffers and the
/// per-cycle bookkeeping (wait-set index, readiness flag)
pub struct Handle {
    invocation: Invocation,
    /// Wait-set slot assigned during collection; the table capacity acts as
    /// the "not collected" sentinel because it is never a valid index.
    index: usize,
    data_available: bool,
    entry: Entry,
}

impl Handle {
    pub(crate) fn new(invocation: Invocation, index_sentinel: usize, entry: Entry) -> Self {
        Self {
            invocation,
            index: index_sentinel,
            data_available: false,
            entry,
        }
    }

    /// The handle's kind
    pub fn kind(&self) -> HandleKind {
        match &self.entry {
            Entry::Subscription { .. } => HandleKind::Subscription,
            Entry::SubscriptionWithContext { .. } => HandleKind::SubscriptionWithContext,
            Entry::Timer { .. } => HandleKind::Timer,
            Entry::Client { .. } => HandleKind::Client,
            Entry::ClientWithRequestId { .. } => HandleKind::ClientWithRequestId,
            Entry::Service { .. } => HandleKind::Service,
            Entry::ServiceWithRequestId { .. } => HandleKind::ServiceWithRequestId,
            Entry::ServiceWithContext { .. } => HandleKind::ServiceWithContext,
            Entry::GuardCondition { .. } => HandleKind::GuardCondition,
            Entry::ActionClient(_) => HandleKind::ActionClient,
            Entry::ActionServer(_) => HandleKind::ActionServer,
        }
    }

    /// The handle's invocation policy
    pub fn invocation(&self) -> Invocation {
        self.invocation
    }

    /// Wait-set slot assigned by the last collection
    pub fn index(&self) -> usize {
        self.index
    }

    /// Check whether the handle has pending work this cycle
    ///
    /// For plain kinds this is the readiness flag; action endpoints also
    /// count their per-sub-entity and per-goal pending state.
    pub fn has_data(&self) -> bool {
        match &self.entry {
            Entry::ActionClient(entry) => entry.has_work(),
            Entry::ActionServer(entry) => entry.has_work(),
            _ => self.data_available,
        }
    }

    /// Check whether this handle wraps the given middleware reference
    pub fn refers_to(&self, endpoint: &Endpoint) -> bool {
        match (&self.entry, endpoint) {
            (
                Entry::Subscription { subscription, .. }
                | Entry::SubscriptionWithContext { subscription, .. },
                Endpoint::Subscription(other),
            ) => same_endpoint(subscription, other),
            (Entry::Timer { timer }, Endpoint::Timer(other)) => same_endpoint(timer, other),
            (
                Entry::Client { client, .. } | Entry::ClientWithRequestId { client, .. },
                Endpoint::Client(other),
            ) => same_endpoint(client, other),
            (
                Entry::Service { service, .. }
                | Entry::ServiceWithRequestId { service, .. }
                | Entry::ServiceWithContext { service, .. },
                Endpoint::Service(other),
            ) => same_endpoint(service, other),
            (
                Entry::GuardCondition {
                    guard_condition, ..
                },
                Endpoint::GuardCondition(other),
            ) => same_endpoint(guard_condition, other),
            (Entry::ActionClient(entry), Endpoint::ActionClient(other)) => {
                same_endpoint(&entry.client, other)
            }
            (Entry::ActionServer(entry), Endpoint::ActionServer(other)) => {
                same_endpoint(&entry.server, other)
            }
            _ => false,
        }
    }

    pub(crate) fn entry(&self) -> &Entry {
        &self.entry
    }

    pub(crate) fn into_entry(self) -> Entry {
        self.entry
    }

    pub(crate) fn action_client_entry_mut(
        &mut self,
        client: &ActionClientRef,
    ) -> Option<&mut ActionClientEntry> {
        match &mut self.entry {
            Entry::ActionClient(entry) if same_endpoint(&entry.client, client) => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn action_server_entry_mut(
        &mut self,
        server: &ActionServerRef,
    ) -> Option<&mut ActionServerEntry> {
        match &mut self.entry {
            Entry::ActionServer(entry) if same_endpoint(&entry.server, server) => Some(entry),
            _ => None,
        }
    }

    /// Register the middleware reference with the wait-set, capturing the
    /// assigned slot index
    pub(crate) fn register(&mut self, wait_set: &mut dyn WaitSet) -> Result<(), Error> {
        self.index = match &self.entry {
            Entry::Subscription { subscription, .. }
            | Entry::SubscriptionWithContext { subscription, .. } => {
                wait_set.add_subscription(subscription)?
            }
            Entry::Timer { timer } => wait_set.add_timer(timer)?,
            Entry::Client { client, .. } | Entry::ClientWithRequestId { client, .. } => {
                wait_set.add_client(client)?
            }
            Entry::Service { service, .. }
            | Entry::ServiceWithRequestId { service, .. }
            | Entry::ServiceWithContext { service, .. } => wait_set.add_service(service)?,
            Entry::GuardCondition {
                guard_condition, ..
            } => wait_set.add_guard_condition(guard_condition)?,
            Entry::ActionClient(entry) => wait_set.add_action_client(&entry.client)?,
            Entry::ActionServer(entry) => wait_set.add_action_server(&entry.server)?,
        };
        Ok(())
    }

    /// Refresh the readiness flags from the wait-set after a wait
    pub(crate) fn refresh_readiness(&mut self, wait_set: &dyn WaitSet) {
        let index = self.index;
        let ready = match &mut self.entry {
            Entry::Subscription { .. } | Entry::SubscriptionWithContext { .. } => {
                Some(wait_set.subscription_ready(index))
            }
            Entry::Timer { .. } => Some(wait_set.timer_ready(index)),
            Entry::Client { .. } | Entry::ClientWithRequestId { .. } => {
                Some(wait_set.client_ready(index))
            }
            Entry::Service { .. }
            | Entry::ServiceWithRequestId { .. }
            | Entry::ServiceWithContext { .. } => Some(wait_set.service_ready(index)),
            Entry::GuardCondition { .. } => Some(wait_set.guard_condition_ready(index)),
            Entry::ActionClient(entry) => {
                entry.ready = wait_set.action_client_ready(&entry.client);
                None
            }
            Entry::ActionServer(entry) => {
                entry.ready = wait_set.action_server_ready(&entry.server);
                None
            }
        };
        if let Some(ready) = ready {
            self.data_available = ready;
        }
    }

    /// Drain at most one payload per ready sub-entity into the user buffers
    ///
    /// A take-failed report clears the readiness flag and is not fatal; any
    /// other middleware error aborts the cycle.
    pub(crate) fn take_new_data(&mut self) -> Result<(), Error> {
        match &mut self.entry {
            Entry::Subscription {
                subscription,
                message,
                ..
            }
            | Entry::SubscriptionWithContext {
                subscription,
                message,
                ..
            } => {
                if self.data_available {
                    let taken = subscription.borrow_mut().take(message.as_mut());
                    match taken {
                        Ok(()) => {}
                        Err(Error::TakeFailed) => self.data_available = false,
                        Err(e) => {
                            log::error!("subscription take failed: {}", e);
                            return Err(e);
                        }
                    }
                }
            }
            // Timer readiness is authoritative; there is nothing to take.
            Entry::Timer { .. } => {}
            Entry::Client {
                client,
                response,
                request_id,
                ..
            }
            | Entry::ClientWithRequestId {
                client,
                response,
                request_id,
                ..
            } => {
                if self.data_available {
                    let taken = client.borrow_mut().take_response(request_id, response.as_mut());
                    match taken {
                        Ok(()) => {}
                        Err(Error::TakeFailed) => self.data_available = false,
                        Err(e) => {
                            log::error!("client take failed: {}", e);
                            return Err(e);
                        }
                    }
                }
            }
            Entry::Service {
                service,
                request,
                request_id,
                ..
            }
            | Entry::ServiceWithRequestId {
                service,
                request,
                request_id,
                ..
            }
            | Entry::ServiceWithContext {
                service,
                request,
                request_id,
                ..
            } => {
                if self.data_available {
                    let taken = service.borrow_mut().take_request(request_id, request.as_mut());
                    match taken {
                        Ok(()) => {}
                        Err(Error::TakeFailed) => self.data_available = false,
                        Err(e) => {
                            log::error!("service take failed: {}", e);
                            return Err(e);
                        }
                    }
                }
            }
            Entry::GuardCondition { .. } => {}
            Entry::ActionClient(entry) => entry.take_new_data()?,
            Entry::ActionServer(entry) => entry.take_new_data()?,
        }
        Ok(())
    }

    /// Invoke the callback according to the invocation policy
    pub(crate) fn execute(&mut self) -> Result<(), Error> {
        let invoke = match self.invocation {
            Invocation::Always => true,
            Invocation::OnNewData => self.has_data(),
        };
        if !invoke {
            return Ok(());
        }

        let data_available = self.data_available;
        match &mut self.entry {
            Entry::Subscription {
                message, callback, ..
            } => {
                let message = if data_available {
                    Some(&**message)
                } else {
                    None
                };
                callback(message);
            }
            Entry::SubscriptionWithContext {
                message,
                context,
                callback,
                ..
            } => {
                let message = if data_available {
                    Some(&**message)
                } else {
                    None
                };
                callback(message, context.as_mut());
            }
            Entry::Timer { timer } => {
                let called = timer.borrow_mut().call();
                match called {
                    Ok(()) | Err(Error::TimerCanceled) => {}
                    Err(e) => {
                        log::error!("timer call failed: {}", e);
                        return Err(e);
                    }
                }
            }
            Entry::Service {
                service,
                request,
                response,
                request_id,
                callback,
            } => {
                callback(&**request, response.as_mut());
                service
                    .borrow_mut()
                    .send_response(request_id, &**response)?;
            }
            Entry::ServiceWithRequestId {
                service,
                request,
                response,
                request_id,
                callback,
            } => {
                callback(&**request, request_id, response.as_mut());
                service
                    .borrow_mut()
                    .send_response(request_id, &**response)?;
            }
            Entry::ServiceWithContext {
                service,
                request,
                response,
                request_id,
                context,
                callback,
            } => {
                callback(&**request, response.as_mut(), context.as_mut());
                service
                    .borrow_mut()
                    .send_response(request_id, &**response)?;
            }
            Entry::Client {
                response, callback, ..
            } => callback(&**response),
            Entry::ClientWithRequestId {
                response,
                request_id,
                callback,
                ..
            } => callback(&**response, request_id),
            Entry::GuardCondition { callback, .. } => callback(),
            Entry::ActionClient(entry) => entry.execute()?,
            Entry::ActionServer(entry) => entry.execute()?,
        }
        self.data_available = false;
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind())
            .field("invocation", &self.invocation)
            .field("index", &self.index)
            .field("data_available", &self.data_available)
            .finish()
    }
}
