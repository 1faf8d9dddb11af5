use switchyard_core::MessageContext;

use super::{MediationEnv, MediatorNode};
use crate::error::MediationError;
use crate::traits::Mediator;

/// Ordered children run one after another.
///
/// Stops at the first child that returns `false`. Errors are not caught.
#[derive(Debug, Default)]
pub struct ListMediator {
    children: Vec<MediatorNode>,
}

impl ListMediator {
    #[must_use]
    pub fn new(children: Vec<MediatorNode>) -> Self {
        Self { children }
    }

    #[must_use]
    pub fn children(&self) -> &[MediatorNode] {
        &self.children
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Mediator for ListMediator {
    fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv<'_>) -> Result<bool, MediationError> {
        for (position, child) in self.children.iter().enumerate() {
            if !child.mediate(ctx, env)? {
                tracing::debug!(
                    message_id = %ctx.message_id,
                    position,
                    "pipeline stopped by mediator"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}
