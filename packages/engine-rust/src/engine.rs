use std::sync::Arc;

use switchyard_core::{ClockSource, MessageContext, SystemClock};
use tracing::debug;

use crate::endpoints::{Dispatch, SendOutcome};
use crate::error::MediationError;
use crate::mediators::MediationEnv;
use crate::registry::{Configuration, Registry};
use crate::traits::{Mediator, Transport};

/// Entry point for hosts: mediates messages against the live configuration.
///
/// Cheap to share behind an `Arc`; every call takes its own configuration
/// snapshot from the [`Registry`].
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn ClockSource>,
}

impl Engine {
    #[must_use]
    pub fn new(registry: Arc<Registry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock used for suspension and session expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.clock
    }

    fn env<'a>(&'a self, config: &'a Configuration) -> MediationEnv<'a> {
        MediationEnv {
            config,
            transport: self.transport.as_ref(),
            clock: self.clock.as_ref(),
            settings: config.settings(),
        }
    }

    /// Runs `ctx` through the configured main sequence.
    ///
    /// Returns the pipeline's continue flag.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::NoMainSequence`] when the main sequence is
    /// not defined, or any error the pipeline did not recover from.
    pub fn mediate(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        let config = self.registry.snapshot();
        let main = config.main_sequence();
        let sequence = config
            .resolve_sequence(main)
            .ok_or_else(|| MediationError::NoMainSequence {
                name: main.to_string(),
            })?;
        debug!(message_id = %ctx.message_id, sequence = main, "mediating message");
        sequence.mediate(ctx, &self.env(&config))
    }

    /// Dispatches `ctx` straight to the named endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::UnresolvedEndpoint`] for an unknown key, or
    /// any routing error.
    pub fn send(&self, ctx: &mut MessageContext, key: &str) -> Result<SendOutcome, MediationError> {
        let config = self.registry.snapshot();
        let id = config
            .resolve_endpoint(key)
            .ok_or_else(|| MediationError::UnresolvedEndpoint {
                key: key.to_string(),
            })?;
        let env = self.env(&config);
        Dispatch::new(&env).send(id, ctx)
    }

    /// Pops the top fault handler of `ctx` and runs it.
    ///
    /// For transports that learn about a failure only after `send` returned.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::EndpointsExhausted`] when the stack is empty
    /// or failover runs out of endpoints, and
    /// [`MediationError::UnresolvedEndpoint`] when the endpoint handler on top
    /// was issued by a configuration that has since been swapped out.
    pub fn handle_fault(&self, ctx: &mut MessageContext) -> Result<SendOutcome, MediationError> {
        let config = self.registry.snapshot();
        let env = self.env(&config);
        Dispatch::new(&env).handle_fault(ctx)
    }

    /// Marks the named endpoint active again, ending any suspension.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::UnresolvedEndpoint`] for an unknown key.
    pub fn reactivate(&self, key: &str) -> Result<(), MediationError> {
        let config = self.registry.snapshot();
        let id = config
            .resolve_endpoint(key)
            .ok_or_else(|| MediationError::UnresolvedEndpoint {
                key: key.to_string(),
            })?;
        config.endpoints().set_active(id, true, self.clock.now())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
