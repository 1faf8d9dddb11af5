use std::fmt;

use serde::{Deserialize, Serialize};

/// Value stored in a message's property bag.
///
/// Properties carry both user data set by mediators and internal signals,
/// such as the details of a caught mediation error handed to an error
/// handler sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
    /// Arbitrary structured JSON.
    Json(serde_json::Value),
}

impl PropertyValue {
    /// Returns the string payload, if this is a string property.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer property.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a boolean property.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Stable index of a node in an endpoint tree arena.
///
/// Ids are only meaningful for the configuration that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(pub u32);

impl EndpointId {
    /// Returns the arena slot this id points at.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep#{}", self.0)
    }
}

/// Entry on a message's fault-handler stack.
///
/// The stack is LIFO: the most recently pushed handler is invoked first when
/// routing fails at a node that has nowhere left to escalate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultHandler {
    /// An address endpoint waiting on its transport outcome.
    ///
    /// `epoch` identifies the configuration that issued `endpoint`; the id
    /// means nothing to any other configuration.
    Endpoint { endpoint: EndpointId, epoch: u64 },
    /// A sequence error handler, resolved by name when invoked.
    Sequence(String),
}

/// Well-known property keys written by the engine.
pub mod keys {
    /// Numeric error code of the last caught failure.
    pub const ERROR_CODE: &str = "ERROR_CODE";
    /// Human-readable message of the last caught failure.
    pub const ERROR_MESSAGE: &str = "ERROR_MESSAGE";
    /// Full error chain of the last caught failure.
    pub const ERROR_DETAIL: &str = "ERROR_DETAIL";
    /// Name of the endpoint that last accepted the message.
    pub const PROCESSED_ENDPOINT: &str = "PROCESSED_ENDPOINT";
}
