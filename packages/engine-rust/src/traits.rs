use switchyard_core::MessageContext;

use crate::error::{MediationError, TransportError};
use crate::mediators::MediationEnv;

/// Outbound transmission collaborator.
/// Implementations: HTTP pass-through, JMS, in-memory (tests).
///
/// `send` is synchronous from the engine's point of view: it either accepts
/// the message or reports a failure. Retry and backoff belong to the
/// implementation.
pub trait Transport: Send + Sync {
    /// Transmit `ctx` to the physical address `target`.
    fn send(&self, target: &str, ctx: &MessageContext) -> Result<(), TransportError>;
}

/// A single pipeline step.
///
/// Returning `Ok(false)` stops the enclosing pipeline; `Ok(true)` continues
/// with the next sibling. Errors are not a `false` return: they propagate
/// until a sequence error handler or try block catches them.
pub trait Mediator: Send + Sync {
    fn mediate(
        &self,
        ctx: &mut MessageContext,
        env: &MediationEnv<'_>,
    ) -> Result<bool, MediationError>;
}
