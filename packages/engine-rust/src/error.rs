//! Error taxonomy for mediation, routing, transport and configuration.

use std::error::Error as StdError;

use switchyard_core::{keys, MessageContext};

/// Error codes written to the `ERROR_CODE` message property.
pub mod codes {
    pub const MEDIATION_FAILURE: i64 = 100_000;
    pub const TRANSPORT_CONNECT: i64 = 101_503;
    pub const TRANSPORT_TIMEOUT: i64 = 101_504;
    pub const TRANSPORT_OTHER: i64 = 101_500;
    pub const UNRESOLVED_REFERENCE: i64 = 102_000;
    pub const ENDPOINTS_EXHAUSTED: i64 = 303_000;
    pub const ROUTING_BUDGET: i64 = 303_100;
}

/// Failure reported by the transport collaborator for a single send.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },
    #[error("timed out sending to {target}")]
    Timeout { target: String },
    #[error("transport error: {0}")]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Connect { .. } => codes::TRANSPORT_CONNECT,
            Self::Timeout { .. } => codes::TRANSPORT_TIMEOUT,
            Self::Other(_) => codes::TRANSPORT_OTHER,
        }
    }
}

/// Errors raised while mediating or routing a single message.
///
/// Only [`MediationError::Failure`] and [`MediationError::EndpointsExhausted`]
/// may be caught by a sequence error handler or a try block. Every other
/// variant signals a broken configuration or a runaway route and is fatal to
/// the message.
#[derive(Debug, thiserror::Error)]
pub enum MediationError {
    #[error("mediation failed: {message}")]
    Failure {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    #[error("sequence named {name} cannot be found")]
    UnresolvedSequence { name: String },
    #[error("endpoint named {key} cannot be found")]
    UnresolvedEndpoint { key: String },
    #[error("all endpoints of {endpoint} are inactive and no fault handler is registered")]
    EndpointsExhausted { endpoint: String },
    #[error("routing exceeded {limit} endpoint hops")]
    RoutingBudgetExceeded { limit: u32 },
    #[error("no main sequence named {name} is configured")]
    NoMainSequence { name: String },
}

impl MediationError {
    /// Creates a catchable failure with no underlying cause.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a catchable failure wrapping `source`.
    pub fn failure_with(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Failure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether a sequence error handler or try block may catch this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failure { .. } | Self::EndpointsExhausted { .. })
    }

    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Failure { .. } => codes::MEDIATION_FAILURE,
            Self::UnresolvedSequence { .. }
            | Self::UnresolvedEndpoint { .. }
            | Self::NoMainSequence { .. } => codes::UNRESOLVED_REFERENCE,
            Self::EndpointsExhausted { .. } => codes::ENDPOINTS_EXHAUSTED,
            Self::RoutingBudgetExceeded { .. } => codes::ROUTING_BUDGET,
        }
    }
}

/// Renders `err` and its whole `source()` chain on one line.
pub(crate) fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut next = err.source();
    while let Some(cause) = next {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        next = cause.source();
    }
    out
}

/// Writes `ERROR_CODE`, `ERROR_MESSAGE` and `ERROR_DETAIL` onto `ctx` so an
/// error handler can inspect what went wrong.
pub(crate) fn record_failure(ctx: &mut MessageContext, code: i64, err: &(dyn StdError + 'static)) {
    ctx.set_property(keys::ERROR_CODE, code);
    ctx.set_property(keys::ERROR_MESSAGE, err.to_string());
    ctx.set_property(keys::ERROR_DETAIL, error_chain(err));
}

/// Errors detected while building a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("endpoint {endpoint} has no children")]
    EmptyEndpointList { endpoint: String },
    #[error("endpoint {endpoint} has no reachable address endpoint")]
    NoReachableLeaf { endpoint: String },
    #[error("indirect endpoint key {key} refers back to itself")]
    IndirectCycle { key: String },
    #[error("sequence {sequence} declares a ref together with children or an error handler")]
    RefWithChildren { sequence: String },
    #[error("sequence {sequence} has neither a ref nor children")]
    EmptySequence { sequence: String },
    #[error("unknown load-balance algorithm {name}")]
    UnknownAlgorithm { name: String },
    #[error("invalid parameters for algorithm {name}: {reason}")]
    InvalidAlgorithmParams { name: String, reason: String },
    #[error("unknown custom mediator {name}")]
    UnknownMediator { name: String },
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
