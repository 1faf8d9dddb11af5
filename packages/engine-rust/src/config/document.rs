//! Serde shapes of a configuration document.
//!
//! A document is plain data: names are not resolved and structure is not
//! validated until [`ConfigurationBuilder`](super::ConfigurationBuilder)
//! turns it into a live configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use switchyard_core::PropertyValue;

use super::EngineConfig;
use crate::endpoints::RoundRobin;
use crate::mediators::LogLevel;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    /// Name of the sequence every message enters. Defaults to `"main"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    pub engine: EngineConfig,
    pub sequences: BTreeMap<String, SequenceConfig>,
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

/// A sequence, either a reference to another named sequence or an inline
/// list of mediators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MediatorConfig>,
}

/// One mediation step, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediatorConfig {
    Sequence(SequenceConfig),
    Try {
        #[serde(default)]
        body: Vec<MediatorConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_handlers: Option<Vec<MediatorConfig>>,
        #[serde(default)]
        finally: Vec<MediatorConfig>,
    },
    List {
        #[serde(default)]
        children: Vec<MediatorConfig>,
    },
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default)]
        level: LogLevel,
        #[serde(default)]
        include_properties: bool,
    },
    /// Sets `name` to `value`, or removes it when `value` is absent.
    Property {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<PropertyValue>,
    },
    Drop,
    Fault {
        message: String,
    },
    Send {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<EndpointConfig>,
    },
    Custom {
        name: String,
    },
}

/// An endpoint, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointConfig {
    Address {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suspend_on_failure_ms: Option<u64>,
    },
    Failover {
        #[serde(default)]
        children: Vec<EndpointConfig>,
    },
    Loadbalance {
        #[serde(default)]
        algorithm: AlgorithmConfig,
        #[serde(default)]
        children: Vec<EndpointConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<SessionConfig>,
    },
    Indirect {
        key: String,
    },
}

/// Selection algorithm of a load-balance endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(rename = "type", default = "default_algorithm")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

fn default_algorithm() -> String {
    RoundRobin::NAME.to_string()
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            kind: default_algorithm(),
            params: serde_json::Map::new(),
        }
    }
}

/// Session affinity of a load-balance endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Message property holding the session id.
    pub property: String,
    /// Binding lifetime; falls back to the engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}
