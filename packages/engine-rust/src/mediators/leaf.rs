use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use switchyard_core::{keys, EndpointId, MessageContext, PropertyValue};
use tracing::{debug, error, info, trace, warn};

use super::MediationEnv;
use crate::endpoints::Dispatch;
use crate::error::MediationError;
use crate::traits::Mediator;

/// Severity of a [`Leaf::Log`] event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// What a [`Leaf::Property`] step does to its property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyAction {
    Set(PropertyValue),
    Remove,
}

/// A host-registered mediator referenced by name from configuration.
#[derive(Clone)]
pub struct CustomMediator {
    pub name: String,
    pub inner: Arc<dyn Mediator>,
}

impl fmt::Debug for CustomMediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomMediator").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Built-in terminal mediators.
#[derive(Debug)]
pub enum Leaf {
    /// Emits a tracing event describing the message.
    Log {
        message: Option<String>,
        level: LogLevel,
        include_properties: bool,
    },
    Property {
        name: String,
        action: PropertyAction,
    },
    /// Stops the pipeline.
    Drop,
    /// Raises a recoverable failure.
    Fault { message: String },
    /// Routes the message to an endpoint, or to its `To` address when
    /// `endpoint` is `None`. Running out of endpoints is an
    /// [`EndpointsExhausted`](MediationError::EndpointsExhausted) failure for
    /// the enclosing try block or sequence error handler.
    Send { endpoint: Option<EndpointId> },
    Custom(CustomMediator),
}

impl Mediator for Leaf {
    fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv<'_>) -> Result<bool, MediationError> {
        match self {
            Self::Log {
                message,
                level,
                include_properties,
            } => {
                log_message(ctx, message.as_deref().unwrap_or("mediating message"), *level, *include_properties);
                Ok(true)
            }
            Self::Property { name, action } => {
                match action {
                    PropertyAction::Set(value) => ctx.set_property(name.clone(), value.clone()),
                    PropertyAction::Remove => {
                        ctx.remove_property(name);
                    }
                }
                Ok(true)
            }
            Self::Drop => {
                debug!(message_id = %ctx.message_id, "message dropped");
                Ok(false)
            }
            Self::Fault { message } => Err(MediationError::failure(message.clone())),
            Self::Send {
                endpoint: Some(endpoint),
            } => Dispatch::in_pipeline(env)
                .send(*endpoint, ctx)
                .map(|outcome| outcome.proceed()),
            Self::Send { endpoint: None } => send_implicit(ctx, env),
            Self::Custom(custom) => custom.inner.mediate(ctx, env),
        }
    }
}

fn send_implicit(ctx: &mut MessageContext, env: &MediationEnv<'_>) -> Result<bool, MediationError> {
    let Some(to) = ctx.to.clone() else {
        return Err(MediationError::failure(
            "send has no endpoint and the message has no To address",
        ));
    };
    env.transport
        .send(&to, ctx)
        .map_err(|err| MediationError::failure_with(format!("send to {to} failed"), err))?;
    debug!(message_id = %ctx.message_id, to = %to, "message sent to implicit address");
    ctx.set_property(keys::PROCESSED_ENDPOINT, to);
    Ok(true)
}

fn log_message(ctx: &MessageContext, message: &str, level: LogLevel, include_properties: bool) {
    let properties = if include_properties {
        let mut pairs: Vec<String> = ctx
            .properties()
            .map(|(k, v)| format!("{k}={}", serde_json::to_string(v).unwrap_or_default()))
            .collect();
        pairs.sort_unstable();
        pairs.join(", ")
    } else {
        String::new()
    };
    let id = ctx.message_id.as_str();
    let to = ctx.to.as_deref().unwrap_or("");
    match level {
        LogLevel::Trace => trace!(message_id = id, to, properties = %properties, "{message}"),
        LogLevel::Debug => debug!(message_id = id, to, properties = %properties, "{message}"),
        LogLevel::Info => info!(message_id = id, to, properties = %properties, "{message}"),
        LogLevel::Warn => warn!(message_id = id, to, properties = %properties, "{message}"),
        LogLevel::Error => error!(message_id = id, to, properties = %properties, "{message}"),
    }
}
