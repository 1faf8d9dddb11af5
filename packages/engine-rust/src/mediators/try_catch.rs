use switchyard_core::MessageContext;
use tracing::warn;

use super::{ListMediator, MediationEnv};
use crate::error::{record_failure, MediationError};
use crate::traits::Mediator;

/// Body, error handlers and finally, in the manner of `try`/`catch`/`finally`.
///
/// Result precedence:
/// 1. an error from the finally list
/// 2. an error left over from the body or the error handlers
/// 3. `Ok(false)` if either the outcome or the finally list stopped
/// 4. `Ok(true)`
#[derive(Debug)]
pub struct TryMediator {
    body: ListMediator,
    error_handlers: Option<ListMediator>,
    finally: ListMediator,
}

impl TryMediator {
    #[must_use]
    pub fn new(body: ListMediator, error_handlers: Option<ListMediator>, finally: ListMediator) -> Self {
        Self {
            body,
            error_handlers,
            finally,
        }
    }
}

impl Mediator for TryMediator {
    fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv<'_>) -> Result<bool, MediationError> {
        let outcome = match self.body.mediate(ctx, env) {
            Err(err) if err.is_recoverable() => match &self.error_handlers {
                Some(handlers) => {
                    warn!(message_id = %ctx.message_id, error = %err, "try body failed, running error handlers");
                    record_failure(ctx, err.code(), &err);
                    handlers.mediate(ctx, env)
                }
                None => Err(err),
            },
            other => other,
        };

        let finally_proceed = self.finally.mediate(ctx, env)?;
        Ok(outcome? && finally_proceed)
    }
}
