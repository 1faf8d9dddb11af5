//! Mediation pipeline: composite mediators and the built-in leaves.
//!
//! The tree is a closed sum type ([`MediatorNode`]) built once per
//! configuration and shared read-only. Each step returns `Ok(true)` to let
//! the next sibling run, `Ok(false)` to stop the pipeline, or an error that
//! travels up until a sequence error handler or a try block catches it.

mod leaf;
mod list;
mod sequence;
mod try_catch;

pub use leaf::{CustomMediator, Leaf, LogLevel, PropertyAction};
pub use list::ListMediator;
pub use sequence::{SequenceBody, SequenceMediator};
pub use try_catch::TryMediator;

use switchyard_core::{ClockSource, MessageContext};

use crate::config::EngineConfig;
use crate::error::MediationError;
use crate::registry::Configuration;
use crate::traits::{Mediator, Transport};

/// Everything a mediator may consult besides the message itself.
///
/// Built per message from one configuration snapshot, so every lookup made
/// while mediating that message sees the same configuration.
#[derive(Clone, Copy)]
pub struct MediationEnv<'a> {
    pub config: &'a Configuration,
    pub transport: &'a dyn Transport,
    pub clock: &'a dyn ClockSource,
    pub settings: &'a EngineConfig,
}

impl MediationEnv<'_> {
    /// Resolves the named sequence and mediates `ctx` through it.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::UnresolvedSequence`] when no sequence is
    /// registered under `name`, or whatever the sequence itself raises.
    pub fn mediate_sequence(&self, name: &str, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        let sequence = self.config.resolve_sequence(name).ok_or_else(|| {
            tracing::error!(sequence = name, "sequence cannot be resolved");
            MediationError::UnresolvedSequence {
                name: name.to_string(),
            }
        })?;
        sequence.mediate(ctx, self)
    }
}

/// A node of the mediation tree.
#[derive(Debug)]
pub enum MediatorNode {
    Sequence(SequenceMediator),
    Try(TryMediator),
    List(ListMediator),
    Leaf(Leaf),
}

impl Mediator for MediatorNode {
    fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv<'_>) -> Result<bool, MediationError> {
        match self {
            Self::Sequence(s) => s.mediate(ctx, env),
            Self::Try(t) => t.mediate(ctx, env),
            Self::List(l) => l.mediate(ctx, env),
            Self::Leaf(leaf) => leaf.mediate(ctx, env),
        }
    }
}

impl From<SequenceMediator> for MediatorNode {
    fn from(value: SequenceMediator) -> Self {
        Self::Sequence(value)
    }
}

impl From<TryMediator> for MediatorNode {
    fn from(value: TryMediator) -> Self {
        Self::Try(value)
    }
}

impl From<ListMediator> for MediatorNode {
    fn from(value: ListMediator) -> Self {
        Self::List(value)
    }
}

impl From<Leaf> for MediatorNode {
    fn from(value: Leaf) -> Self {
        Self::Leaf(value)
    }
}
