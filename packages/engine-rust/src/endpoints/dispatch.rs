//! Sending a message into the endpoint tree and escalating faults.
//!
//! A [`Dispatch`] lives for one top-level send. It samples the clock once,
//! tracks which indirect node led to each resolved endpoint and enforces
//! the routing budget so a misbehaving tree cannot loop forever.
//!
//! Fault flow: an address whose transport call fails suspends itself and
//! escalates to its parent. The parent marks the child inactive and re-sends,
//! which selects another child. A composite with no active child marks
//! itself inactive and escalates further. At the root the top entry of the
//! context's fault-handler stack is popped and invoked.
//!
//! A dispatch started by a `send` step inside a pipeline leaves a sequence
//! handler on top of the stack in place and reports
//! [`MediationError::EndpointsExhausted`] instead. The error then travels
//! through the pipeline like any other failure, so a surrounding try block
//! catches it first and otherwise the sequence that registered the handler
//! runs it and returns its result.

use std::collections::HashMap;

use switchyard_core::{keys, EndpointId, FaultHandler, MessageContext};
use tracing::{debug, error, warn};

use super::{AddressEndpoint, EndpointKind, EndpointTree, FailoverEndpoint, LoadbalanceEndpoint};
use crate::error::{record_failure, MediationError};
use crate::mediators::MediationEnv;

/// Result of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport accepted the message at `endpoint`.
    Delivered { endpoint: EndpointId },
    /// Every endpoint failed and a sequence fault handler popped from the
    /// stack took over. `proceed` is that sequence's result.
    Handled { proceed: bool },
}

impl SendOutcome {
    /// Whether the enclosing pipeline should continue.
    #[must_use]
    pub fn proceed(self) -> bool {
        match self {
            Self::Delivered { .. } => true,
            Self::Handled { proceed } => proceed,
        }
    }
}

/// One routing attempt through the endpoint tree.
pub struct Dispatch<'a> {
    env: &'a MediationEnv<'a>,
    now_ms: u64,
    hops_left: u32,
    /// Endpoint resolved through an indirect -> that indirect node.
    via: HashMap<EndpointId, EndpointId>,
    /// Started from a pipeline step: sequence handlers belong to the pipeline.
    in_pipeline: bool,
}

impl<'a> Dispatch<'a> {
    /// A dispatch that runs a sequence fault handler itself when routing is
    /// exhausted. Used for sends that do not originate in a pipeline.
    #[must_use]
    pub fn new(env: &'a MediationEnv<'a>) -> Self {
        Self {
            env,
            now_ms: env.clock.now(),
            hops_left: env.settings.max_routing_hops,
            via: HashMap::new(),
            in_pipeline: false,
        }
    }

    /// A dispatch on behalf of a pipeline step. Exhaustion with a sequence
    /// handler on top of the stack surfaces as an error for the pipeline to
    /// handle.
    #[must_use]
    pub fn in_pipeline(env: &'a MediationEnv<'a>) -> Self {
        Self {
            in_pipeline: true,
            ..Self::new(env)
        }
    }

    /// Stack entry for an address endpoint of the current configuration.
    fn endpoint_handler(&self, endpoint: EndpointId) -> FaultHandler {
        FaultHandler::Endpoint {
            endpoint,
            epoch: self.env.config.epoch(),
        }
    }

    /// Fails over away from `endpoint`, which a popped handler reported as
    /// failed. The handler must come from the current configuration.
    fn fail_endpoint(
        &mut self,
        endpoint: EndpointId,
        epoch: u64,
        ctx: &mut MessageContext,
    ) -> Result<SendOutcome, MediationError> {
        if epoch != self.env.config.epoch() {
            warn!(
                message_id = %ctx.message_id,
                endpoint = %endpoint,
                epoch,
                current = self.env.config.epoch(),
                "fault handler belongs to a replaced configuration"
            );
            return Err(MediationError::UnresolvedEndpoint {
                key: format!("{endpoint}@{epoch}"),
            });
        }
        self.tree().set_active(endpoint, false, self.now_ms)?;
        self.escalate(endpoint, ctx)
    }

    fn tree(&self) -> &'a EndpointTree {
        self.env.config.endpoints()
    }

    fn hop(&mut self) -> Result<(), MediationError> {
        if self.hops_left == 0 {
            let limit = self.env.settings.max_routing_hops;
            error!(limit, "routing budget exhausted");
            return Err(MediationError::RoutingBudgetExceeded { limit });
        }
        self.hops_left -= 1;
        Ok(())
    }

    /// Sends `ctx` to endpoint `id`.
    ///
    /// # Errors
    ///
    /// - [`MediationError::EndpointsExhausted`] when every candidate failed
    ///   and the fault-handler stack is empty
    /// - [`MediationError::UnresolvedEndpoint`] for an unknown indirect key
    /// - [`MediationError::RoutingBudgetExceeded`] when the hop limit is hit
    /// - any error raised by a sequence fault handler
    pub fn send(&mut self, id: EndpointId, ctx: &mut MessageContext) -> Result<SendOutcome, MediationError> {
        self.hop()?;
        let tree = self.tree();
        let node = tree.get(id).ok_or_else(|| MediationError::UnresolvedEndpoint {
            key: id.to_string(),
        })?;
        match node.kind() {
            EndpointKind::Address(addr) => self.send_address(id, addr, ctx),
            EndpointKind::Failover(fo) => self.send_failover(id, fo, ctx),
            EndpointKind::Loadbalance(lb) => self.send_loadbalance(id, lb, ctx),
            EndpointKind::Indirect(ind) => {
                let target = tree.resolve_indirect(&ind.key)?;
                self.via.insert(target, id);
                self.send(target, ctx)
            }
        }
    }

    fn send_address(
        &mut self,
        id: EndpointId,
        addr: &AddressEndpoint,
        ctx: &mut MessageContext,
    ) -> Result<SendOutcome, MediationError> {
        let tree = self.tree();
        if !tree.is_active(id, self.now_ms)? {
            debug!(endpoint = %addr.target, "address endpoint suspended, escalating");
            return self.escalate(id, ctx);
        }

        let handler = self.endpoint_handler(id);
        ctx.push_fault_handler(handler.clone());
        let result = self.env.transport.send(&addr.target, ctx);
        ctx.pop_fault_handler_if(&handler);

        match result {
            Ok(()) => {
                debug!(message_id = %ctx.message_id, endpoint = %addr.target, "message delivered");
                ctx.set_property(keys::PROCESSED_ENDPOINT, tree.display_name(id));
                Ok(SendOutcome::Delivered { endpoint: id })
            }
            Err(err) => {
                warn!(
                    message_id = %ctx.message_id,
                    endpoint = %addr.target,
                    suspend_ms = ?addr.suspend_on_failure_ms,
                    error = %err,
                    "transport failure, suspending endpoint"
                );
                record_failure(ctx, err.code(), &err);
                tree.set_active(id, false, self.now_ms)?;
                self.escalate(id, ctx)
            }
        }
    }

    fn send_failover(
        &mut self,
        id: EndpointId,
        fo: &FailoverEndpoint,
        ctx: &mut MessageContext,
    ) -> Result<SendOutcome, MediationError> {
        let tree = self.tree();
        if let Some(current) = fo.current() {
            if tree.is_active(current, self.now_ms)? {
                return self.send(current, ctx);
            }
        }
        for (index, &child) in fo.children().iter().enumerate() {
            if tree.is_active(child, self.now_ms)? {
                debug!(
                    endpoint = %tree.display_name(id),
                    child = %tree.display_name(child),
                    "failover switching child"
                );
                fo.set_current(index);
                return self.send(child, ctx);
            }
        }
        warn!(endpoint = %tree.display_name(id), "no active child in failover group");
        tree.set_active(id, false, self.now_ms)?;
        self.escalate(id, ctx)
    }

    fn send_loadbalance(
        &mut self,
        id: EndpointId,
        lb: &LoadbalanceEndpoint,
        ctx: &mut MessageContext,
    ) -> Result<SendOutcome, MediationError> {
        let tree = self.tree();
        let now_ms = self.now_ms;
        let mut lookup_error = None;
        let picked = lb.select(ctx, now_ms, &mut |child| match tree.is_active(child, now_ms) {
            Ok(active) => active,
            Err(err) => {
                lookup_error.get_or_insert(err);
                false
            }
        });
        if let Some(err) = lookup_error {
            return Err(err);
        }
        match picked {
            Some(child) => {
                debug!(
                    endpoint = %tree.display_name(id),
                    child = %tree.display_name(child),
                    "load balancer selected child"
                );
                self.send(child, ctx)
            }
            None => {
                warn!(endpoint = %tree.display_name(id), "no active child in load-balance group");
                tree.set_active(id, false, now_ms)?;
                self.escalate(id, ctx)
            }
        }
    }

    /// Hands the failure of `failed` to its parent, or to the fault-handler
    /// stack when it has none.
    fn escalate(&mut self, failed: EndpointId, ctx: &mut MessageContext) -> Result<SendOutcome, MediationError> {
        let tree = self.tree();
        let parent = tree
            .get(failed)
            .and_then(super::EndpointNode::parent)
            .or_else(|| self.via.get(&failed).copied());
        match parent {
            Some(parent) => self.on_child_endpoint_fail(parent, failed, ctx),
            None => self.invoke_fault_handler(failed, ctx),
        }
    }

    fn on_child_endpoint_fail(
        &mut self,
        parent: EndpointId,
        child: EndpointId,
        ctx: &mut MessageContext,
    ) -> Result<SendOutcome, MediationError> {
        let tree = self.tree();
        if let Some(EndpointKind::Indirect(_)) = tree.get(parent).map(super::EndpointNode::kind) {
            return self.escalate(parent, ctx);
        }
        tree.set_active(child, false, self.now_ms)?;
        debug!(
            endpoint = %tree.display_name(parent),
            child = %tree.display_name(child),
            "child endpoint failed, retrying parent"
        );
        self.send(parent, ctx)
    }

    fn invoke_fault_handler(
        &mut self,
        failed: EndpointId,
        ctx: &mut MessageContext,
    ) -> Result<SendOutcome, MediationError> {
        let tree = self.tree();
        if self.in_pipeline && matches!(ctx.peek_fault_handler(), Some(FaultHandler::Sequence(_))) {
            debug!(endpoint = %tree.display_name(failed), "endpoints exhausted, leaving fault to the pipeline");
            return Err(MediationError::EndpointsExhausted {
                endpoint: tree.display_name(failed),
            });
        }
        match ctx.pop_fault_handler() {
            Some(FaultHandler::Sequence(name)) => {
                let exhausted = MediationError::EndpointsExhausted {
                    endpoint: tree.display_name(failed),
                };
                warn!(endpoint = %tree.display_name(failed), handler = %name, "endpoints exhausted, invoking fault sequence");
                record_failure(ctx, exhausted.code(), &exhausted);
                let proceed = self.env.mediate_sequence(&name, ctx)?;
                Ok(SendOutcome::Handled { proceed })
            }
            Some(FaultHandler::Endpoint { endpoint, epoch }) => self.fail_endpoint(endpoint, epoch, ctx),
            None => {
                warn!(endpoint = %tree.display_name(failed), "endpoints exhausted with no fault handler");
                Err(MediationError::EndpointsExhausted {
                    endpoint: tree.display_name(failed),
                })
            }
        }
    }

    /// Pops the top fault handler and runs it as if routing had failed at
    /// the root.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send); an empty stack yields
    /// [`MediationError::EndpointsExhausted`] naming `"fault-stack"`, and an
    /// endpoint handler recorded under another configuration yields
    /// [`MediationError::UnresolvedEndpoint`].
    pub fn handle_fault(&mut self, ctx: &mut MessageContext) -> Result<SendOutcome, MediationError> {
        match ctx.pop_fault_handler() {
            Some(FaultHandler::Endpoint { endpoint, epoch }) => self.fail_endpoint(endpoint, epoch, ctx),
            Some(FaultHandler::Sequence(name)) => {
                let proceed = self.env.mediate_sequence(&name, ctx)?;
                Ok(SendOutcome::Handled { proceed })
            }
            None => Err(MediationError::EndpointsExhausted {
                endpoint: "fault-stack".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
