//! Engine settings and the configuration document model.
//!
//! - [`EngineConfig`]: runtime limits and intervals for the engine itself
//! - [`document`]: serde shapes of a mediation/endpoint configuration
//! - [`builder`]: turns a document into an immutable [`Configuration`](crate::registry::Configuration)

pub mod builder;
pub mod document;

pub use builder::{AlgorithmFactory, ConfigurationBuilder};
pub use document::{
    AlgorithmConfig, ConfigDocument, EndpointConfig, MediatorConfig, SequenceConfig, SessionConfig,
};

use serde::{Deserialize, Serialize};

/// Engine-level limits and background intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on endpoint hops for a single dispatch.
    pub max_routing_hops: u32,
    /// Maximum number of messages mediated at once before load shedding.
    pub max_concurrent_messages: u32,
    /// Interval between recovery sweeps of suspended endpoints.
    pub recovery_sweep_interval_ms: u64,
    /// Session binding lifetime when a load balancer does not set one.
    pub default_session_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_routing_hops: 256,
            max_concurrent_messages: 1000,
            recovery_sweep_interval_ms: 1000,
            default_session_timeout_ms: 120_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"max_routing_hops": 8}"#).unwrap();
        assert_eq!(cfg.max_routing_hops, 8);
        assert_eq!(cfg.max_concurrent_messages, 1000);
        assert_eq!(cfg.default_session_timeout_ms, 120_000);
    }
}
