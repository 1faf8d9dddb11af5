//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_core::{EndpointId, ManualClock, MessageContext};

use crate::config::{ConfigurationBuilder, EngineConfig};
use crate::endpoints::EndpointTree;
use crate::error::{MediationError, TransportError};
use crate::mediators::{CustomMediator, Leaf, MediationEnv, MediatorNode, SequenceMediator};
use crate::registry::Configuration;
use crate::traits::{Mediator, Transport};

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// Transport that records every attempt and fails targets on demand.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    attempts: Mutex<Vec<(String, bool)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(&self, target: &str) {
        self.failing.lock().insert(target.to_string());
    }

    pub(crate) fn heal(&self, target: &str) {
        self.failing.lock().remove(target);
    }

    /// Every target `send` was called with, in call order.
    pub(crate) fn attempts(&self) -> Vec<String> {
        self.attempts.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Targets that accepted a message, in call order.
    pub(crate) fn delivered(&self) -> Vec<String> {
        self.attempts
            .lock()
            .iter()
            .filter(|(_, ok)| *ok)
            .map(|(t, _)| t.clone())
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, target: &str, _ctx: &MessageContext) -> Result<(), TransportError> {
        let ok = !self.failing.lock().contains(target);
        self.attempts.lock().push((target.to_string(), ok));
        if ok {
            Ok(())
        } else {
            Err(TransportError::Connect {
                target: target.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// What a recorded step does after logging its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    Continue,
    Stop,
    Fail,
}

struct RecordingStep {
    label: String,
    behavior: Behavior,
    log: Arc<Mutex<Vec<String>>>,
}

impl Mediator for RecordingStep {
    fn mediate(&self, _ctx: &mut MessageContext, _env: &MediationEnv<'_>) -> Result<bool, MediationError> {
        self.log.lock().push(self.label.clone());
        match self.behavior {
            Behavior::Continue => Ok(true),
            Behavior::Stop => Ok(false),
            Behavior::Fail => Err(MediationError::failure(format!("{} failed", self.label))),
        }
    }
}

/// Creates mediators that append their label to a shared trace.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mediator(&self, label: &str, behavior: Behavior) -> Arc<dyn Mediator> {
        Arc::new(RecordingStep {
            label: label.to_string(),
            behavior,
            log: Arc::clone(&self.log),
        })
    }

    pub(crate) fn step(&self, label: &str, behavior: Behavior) -> MediatorNode {
        MediatorNode::Leaf(Leaf::Custom(CustomMediator {
            name: label.to_string(),
            inner: self.mediator(label, behavior),
        }))
    }

    /// Labels recorded so far, joined with `.`.
    pub(crate) fn trace(&self) -> String {
        self.log.lock().join(".")
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A configuration plus the collaborators needed to build a [`MediationEnv`].
pub(crate) struct Harness {
    pub(crate) config: Configuration,
    pub(crate) transport: RecordingTransport,
    pub(crate) clock: ManualClock,
    pub(crate) settings: EngineConfig,
}

impl Harness {
    pub(crate) fn new(config: Configuration) -> Self {
        Self {
            settings: config.settings().clone(),
            config,
            transport: RecordingTransport::new(),
            clock: ManualClock::new(1_000_000),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::with_sequences(Vec::new())
    }

    pub(crate) fn from_json(json: &str) -> Self {
        Self::new(ConfigurationBuilder::new().build_json(json).unwrap())
    }

    /// A configuration holding only the given sequences and no endpoints.
    pub(crate) fn with_sequences(sequences: Vec<(&str, SequenceMediator)>) -> Self {
        let sequences: HashMap<String, Arc<MediatorNode>> = sequences
            .into_iter()
            .map(|(name, seq)| (name.to_string(), Arc::new(MediatorNode::Sequence(seq))))
            .collect();
        Self::new(Configuration::new(
            "main".to_string(),
            sequences,
            EndpointTree::new(),
            EngineConfig::default(),
        ))
    }

    pub(crate) fn env(&self) -> MediationEnv<'_> {
        MediationEnv {
            config: &self.config,
            transport: &self.transport,
            clock: &self.clock,
            settings: &self.settings,
        }
    }

    /// Id of the named endpoint.
    pub(crate) fn id(&self, name: &str) -> EndpointId {
        self.config.resolve_endpoint(name).unwrap()
    }
}
