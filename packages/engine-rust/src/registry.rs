use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use switchyard_core::EndpointId;
use tracing::info;

use crate::config::EngineConfig;
use crate::endpoints::EndpointTree;
use crate::mediators::MediatorNode;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Source of configuration epochs; unique for the life of the process.
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// One immutable, validated set of sequences and endpoints.
///
/// Structure never changes after build. Endpoint liveness, failover cursors
/// and load-balance state live inside the tree's atomics, so they belong to
/// this configuration and start fresh when a new one is published.
#[derive(Debug)]
pub struct Configuration {
    epoch: u64,
    main: String,
    sequences: HashMap<String, Arc<MediatorNode>>,
    endpoints: EndpointTree,
    settings: EngineConfig,
}

impl Configuration {
    #[must_use]
    pub fn new(
        main: String,
        sequences: HashMap<String, Arc<MediatorNode>>,
        endpoints: EndpointTree,
        settings: EngineConfig,
    ) -> Self {
        Self {
            epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
            main,
            sequences,
            endpoints,
            settings,
        }
    }

    /// Process-unique id of this configuration. Endpoint ids recorded on a
    /// message are only valid against the configuration with the same epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Name of the sequence every message enters.
    #[must_use]
    pub fn main_sequence(&self) -> &str {
        &self.main
    }

    #[must_use]
    pub fn resolve_sequence(&self, name: &str) -> Option<&Arc<MediatorNode>> {
        self.sequences.get(name)
    }

    #[must_use]
    pub fn resolve_endpoint(&self, key: &str) -> Option<EndpointId> {
        self.endpoints.resolve(key)
    }

    #[must_use]
    pub fn endpoints(&self) -> &EndpointTree {
        &self.endpoints
    }

    #[must_use]
    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    /// Sequence names in sorted order.
    #[must_use]
    pub fn sequence_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sequences.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holder of the live configuration.
///
/// Readers take a snapshot once per message and keep using it until the
/// message is done, so a concurrent [`swap`](Self::swap) never changes the
/// configuration under an in-flight message.
pub struct Registry {
    current: ArcSwap<Configuration>,
    generation: AtomicU64,
}

impl Registry {
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            generation: AtomicU64::new(0),
        }
    }

    /// The configuration in force right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Configuration> {
        self.current.load_full()
    }

    /// Publishes `config` and returns the one it replaced.
    pub fn swap(&self, config: Configuration) -> Arc<Configuration> {
        let sequences = config.sequences.len();
        let endpoints = config.endpoints.len();
        let previous = self.current.swap(Arc::new(config));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, sequences, endpoints, "configuration replaced");
        previous
    }

    /// Number of swaps since construction.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("generation", &self.generation())
            .field("main", &self.current.load().main)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
