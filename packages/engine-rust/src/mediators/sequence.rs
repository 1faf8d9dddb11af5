use switchyard_core::{FaultHandler, MessageContext};
use tracing::{debug, warn};

use super::{ListMediator, MediationEnv};
use crate::error::{record_failure, MediationError};
use crate::traits::Mediator;

/// Where a sequence's mediators come from.
#[derive(Debug)]
pub enum SequenceBody {
    /// Another named sequence, looked up on every call.
    Ref(String),
    /// Children owned by this sequence, with an optional error handler.
    Inline {
        children: ListMediator,
        error_handler: Option<String>,
    },
}

/// A list of mediators that may delegate failures to a named error handler.
#[derive(Debug)]
pub struct SequenceMediator {
    name: Option<String>,
    body: SequenceBody,
}

impl SequenceMediator {
    /// A sequence that forwards to the sequence registered as `target`.
    #[must_use]
    pub fn reference(name: Option<String>, target: impl Into<String>) -> Self {
        Self {
            name,
            body: SequenceBody::Ref(target.into()),
        }
    }

    #[must_use]
    pub fn inline(name: Option<String>, children: ListMediator, error_handler: Option<String>) -> Self {
        Self {
            name,
            body: SequenceBody::Inline {
                children,
                error_handler,
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn body(&self) -> &SequenceBody {
        &self.body
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

impl Mediator for SequenceMediator {
    fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv<'_>) -> Result<bool, MediationError> {
        let (children, error_handler) = match &self.body {
            SequenceBody::Ref(target) => {
                debug!(sequence = self.label(), target = %target, "resolving sequence reference");
                return env.mediate_sequence(target, ctx);
            }
            SequenceBody::Inline {
                children,
                error_handler,
            } => (children, error_handler),
        };

        let Some(handler_name) = error_handler else {
            return children.mediate(ctx, env);
        };

        let handler = FaultHandler::Sequence(handler_name.clone());
        ctx.push_fault_handler(handler.clone());
        let result = children.mediate(ctx, env);
        ctx.pop_fault_handler_if(&handler);

        match result {
            Err(err) if err.is_recoverable() => {
                warn!(
                    message_id = %ctx.message_id,
                    sequence = self.label(),
                    handler = %handler_name,
                    error = %err,
                    "sequence failed, invoking error handler"
                );
                record_failure(ctx, err.code(), &err);
                env.mediate_sequence(handler_name, ctx)
            }
            other => other,
        }
    }
}
