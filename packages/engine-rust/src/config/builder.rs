//! Builds an immutable [`Configuration`] from a [`ConfigDocument`].
//!
//! Structural rules checked here:
//! - every failover and load-balance group has at least one child
//! - every group can reach an address endpoint
//! - indirect references never form a cycle
//! - a sequence is either a `ref` or an inline list, never both or neither
//! - algorithm types and custom mediator names are registered
//!
//! Names that may legitimately appear later (indirect endpoint keys,
//! sequence refs and error handlers) are not required to resolve; they are
//! logged and checked again on every use.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use switchyard_core::EndpointId;
use tracing::{debug, warn};

use super::document::{ConfigDocument, EndpointConfig, MediatorConfig, SequenceConfig};
use super::EngineConfig;
use crate::endpoints::{
    AddressEndpoint, EndpointKind, EndpointNode, EndpointTree, FailoverEndpoint, IndirectEndpoint,
    LoadbalanceAlgorithm, LoadbalanceEndpoint, RoundRobin, SessionAffinity,
};
use crate::error::ConfigError;
use crate::mediators::{
    CustomMediator, Leaf, ListMediator, MediatorNode, PropertyAction, SequenceMediator, TryMediator,
};
use crate::registry::Configuration;
use crate::traits::Mediator;

/// Name of the entry sequence when a document does not set `main`.
pub const DEFAULT_MAIN_SEQUENCE: &str = "main";

/// Creates a selection algorithm over the given children from its `params`.
pub type AlgorithmFactory = Arc<
    dyn Fn(Vec<EndpointId>, &Map<String, Value>) -> Result<Box<dyn LoadbalanceAlgorithm>, ConfigError>
        + Send
        + Sync,
>;

/// Registry of pluggable parts plus the document-to-configuration build.
#[derive(Clone)]
pub struct ConfigurationBuilder {
    algorithms: HashMap<String, AlgorithmFactory>,
    mediators: HashMap<String, Arc<dyn Mediator>>,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationBuilder {
    /// A builder that knows the built-in `roundRobin` algorithm.
    #[must_use]
    pub fn new() -> Self {
        let mut algorithms: HashMap<String, AlgorithmFactory> = HashMap::new();
        algorithms.insert(
            RoundRobin::NAME.to_string(),
            Arc::new(
                |children: Vec<EndpointId>,
                 _params: &Map<String, Value>|
                 -> Result<Box<dyn LoadbalanceAlgorithm>, ConfigError> {
                    Ok(Box::new(RoundRobin::new(children)?))
                },
            ),
        );
        Self {
            algorithms,
            mediators: HashMap::new(),
        }
    }

    /// Registers a load-balance algorithm under `name` (the `algorithm.type`
    /// of a load-balance endpoint).
    #[must_use]
    pub fn with_algorithm(mut self, name: impl Into<String>, factory: AlgorithmFactory) -> Self {
        self.algorithms.insert(name.into(), factory);
        self
    }

    /// Registers a host mediator referenced by `{"kind": "custom", "name": ...}`.
    #[must_use]
    pub fn with_mediator(mut self, name: impl Into<String>, mediator: Arc<dyn Mediator>) -> Self {
        self.mediators.insert(name.into(), mediator);
        self
    }

    /// Parses `json` as a [`ConfigDocument`] and builds it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON, or any error from
    /// [`build`](Self::build).
    pub fn build_json(&self, json: &str) -> Result<Configuration, ConfigError> {
        let doc: ConfigDocument = serde_json::from_str(json)?;
        self.build(&doc)
    }

    /// Builds and validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found; see the module docs.
    pub fn build(&self, doc: &ConfigDocument) -> Result<Configuration, ConfigError> {
        let mut build = Build {
            builder: self,
            settings: &doc.engine,
            tree: EndpointTree::new(),
        };

        for (name, cfg) in &doc.endpoints {
            build.endpoint(Some(name), cfg)?;
        }

        let mut sequences = HashMap::with_capacity(doc.sequences.len());
        for (name, cfg) in &doc.sequences {
            let sequence = build.sequence(Some(name), cfg)?;
            sequences.insert(name.clone(), Arc::new(MediatorNode::Sequence(sequence)));
        }

        let tree = build.tree;
        check_indirect_cycles(&tree)?;
        check_reachable_leaves(&tree)?;
        warn_unknown_sequence_names(doc);

        let main = doc
            .main
            .clone()
            .unwrap_or_else(|| DEFAULT_MAIN_SEQUENCE.to_string());
        if !sequences.contains_key(&main) {
            warn!(sequence = %main, "main sequence is not defined");
        }
        debug!(
            sequences = sequences.len(),
            endpoints = tree.len(),
            main = %main,
            "configuration built"
        );
        Ok(Configuration::new(main, sequences, tree, doc.engine.clone()))
    }
}

// ---------------------------------------------------------------------------
// Build state
// ---------------------------------------------------------------------------

struct Build<'b> {
    builder: &'b ConfigurationBuilder,
    settings: &'b EngineConfig,
    tree: EndpointTree,
}

impl Build<'_> {
    fn endpoint(&mut self, name: Option<&String>, cfg: &EndpointConfig) -> Result<EndpointId, ConfigError> {
        let label = || name.cloned().unwrap_or_else(|| anonymous_label(cfg));
        let kind = match cfg {
            EndpointConfig::Address {
                target,
                suspend_on_failure_ms,
            } => EndpointKind::Address(AddressEndpoint {
                target: target.clone(),
                suspend_on_failure_ms: *suspend_on_failure_ms,
            }),
            EndpointConfig::Failover { children } => {
                let children = self.children(&label(), children)?;
                EndpointKind::Failover(FailoverEndpoint::new(children))
            }
            EndpointConfig::Loadbalance {
                algorithm,
                children,
                session,
            } => {
                let children = self.children(&label(), children)?;
                let factory = self.builder.algorithms.get(&algorithm.kind).ok_or_else(|| {
                    ConfigError::UnknownAlgorithm {
                        name: algorithm.kind.clone(),
                    }
                })?;
                let algorithm = factory(children, &algorithm.params)?;
                let session = session.as_ref().map(|s| SessionAffinity {
                    property: s.property.clone(),
                    timeout_ms: s.timeout_ms.unwrap_or(self.settings.default_session_timeout_ms),
                });
                EndpointKind::Loadbalance(LoadbalanceEndpoint::new(algorithm, session))
            }
            EndpointConfig::Indirect { key } => EndpointKind::Indirect(IndirectEndpoint { key: key.clone() }),
        };
        let id = self.tree.push(EndpointNode::new(name.cloned(), kind));
        self.tree.attach_children(id);
        Ok(id)
    }

    fn children(&mut self, label: &str, children: &[EndpointConfig]) -> Result<Vec<EndpointId>, ConfigError> {
        if children.is_empty() {
            return Err(ConfigError::EmptyEndpointList {
                endpoint: label.to_string(),
            });
        }
        children.iter().map(|c| self.endpoint(None, c)).collect()
    }

    fn sequence(&mut self, name: Option<&String>, cfg: &SequenceConfig) -> Result<SequenceMediator, ConfigError> {
        let label = || name.cloned().unwrap_or_else(|| "anonymous".to_string());
        match &cfg.reference {
            Some(_) if !cfg.children.is_empty() || cfg.error_handler.is_some() => {
                Err(ConfigError::RefWithChildren { sequence: label() })
            }
            Some(target) => Ok(SequenceMediator::reference(name.cloned(), target.clone())),
            None if cfg.children.is_empty() => Err(ConfigError::EmptySequence { sequence: label() }),
            None => Ok(SequenceMediator::inline(
                name.cloned(),
                self.list(&cfg.children)?,
                cfg.error_handler.clone(),
            )),
        }
    }

    fn list(&mut self, children: &[MediatorConfig]) -> Result<ListMediator, ConfigError> {
        let nodes = children
            .iter()
            .map(|c| self.mediator(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListMediator::new(nodes))
    }

    fn mediator(&mut self, cfg: &MediatorConfig) -> Result<MediatorNode, ConfigError> {
        let node = match cfg {
            MediatorConfig::Sequence(seq) => MediatorNode::Sequence(self.sequence(None, seq)?),
            MediatorConfig::Try {
                body,
                error_handlers,
                finally,
            } => {
                let error_handlers = match error_handlers {
                    Some(handlers) => Some(self.list(handlers)?),
                    None => None,
                };
                MediatorNode::Try(TryMediator::new(self.list(body)?, error_handlers, self.list(finally)?))
            }
            MediatorConfig::List { children } => MediatorNode::List(self.list(children)?),
            MediatorConfig::Log {
                message,
                level,
                include_properties,
            } => Leaf::Log {
                message: message.clone(),
                level: *level,
                include_properties: *include_properties,
            }
            .into(),
            MediatorConfig::Property { name, value } => Leaf::Property {
                name: name.clone(),
                action: value
                    .clone()
                    .map_or(PropertyAction::Remove, PropertyAction::Set),
            }
            .into(),
            MediatorConfig::Drop => Leaf::Drop.into(),
            MediatorConfig::Fault { message } => Leaf::Fault {
                message: message.clone(),
            }
            .into(),
            MediatorConfig::Send { endpoint } => {
                let endpoint = match endpoint {
                    Some(cfg) => Some(self.endpoint(None, cfg)?),
                    None => None,
                };
                Leaf::Send { endpoint }.into()
            }
            MediatorConfig::Custom { name } => {
                let inner = self
                    .builder
                    .mediators
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownMediator { name: name.clone() })?;
                Leaf::Custom(CustomMediator {
                    name: name.clone(),
                    inner,
                })
                .into()
            }
        };
        Ok(node)
    }
}

fn anonymous_label(cfg: &EndpointConfig) -> String {
    match cfg {
        EndpointConfig::Address { target, .. } => target.clone(),
        EndpointConfig::Failover { .. } => "anonymous failover".to_string(),
        EndpointConfig::Loadbalance { .. } => "anonymous loadbalance".to_string(),
        EndpointConfig::Indirect { key } => format!("->{key}"),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Nodes reachable in one step: a group's children, or an indirect's target.
fn successors(tree: &EndpointTree, id: EndpointId) -> Vec<EndpointId> {
    match tree.get(id).map(EndpointNode::kind) {
        Some(EndpointKind::Indirect(ind)) => tree.resolve(&ind.key).into_iter().collect(),
        Some(kind) => kind.children().to_vec(),
        None => Vec::new(),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

fn check_indirect_cycles(tree: &EndpointTree) -> Result<(), ConfigError> {
    fn visit(tree: &EndpointTree, id: EndpointId, marks: &mut [Mark]) -> Result<(), ConfigError> {
        marks[id.index()] = Mark::OnPath;
        for next in successors(tree, id) {
            match marks[next.index()] {
                Mark::OnPath => {
                    let indirect_key = |n: EndpointId| match tree.get(n).map(EndpointNode::kind) {
                        Some(EndpointKind::Indirect(ind)) => Some(ind.key.clone()),
                        _ => None,
                    };
                    let key = indirect_key(id)
                        .or_else(|| indirect_key(next))
                        .unwrap_or_else(|| tree.display_name(next));
                    return Err(ConfigError::IndirectCycle { key });
                }
                Mark::Unvisited => visit(tree, next, marks)?,
                Mark::Done => {}
            }
        }
        marks[id.index()] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; tree.len()];
    for id in tree.ids() {
        if marks[id.index()] == Mark::Unvisited {
            visit(tree, id, &mut marks)?;
        }
    }
    Ok(())
}

/// Requires every group to reach an address endpoint. An indirect whose key
/// is not defined yet counts as reachable; it is resolved at send time.
fn check_reachable_leaves(tree: &EndpointTree) -> Result<(), ConfigError> {
    fn reaches_leaf(tree: &EndpointTree, id: EndpointId) -> bool {
        match tree.get(id).map(EndpointNode::kind) {
            Some(EndpointKind::Address(_)) => true,
            Some(EndpointKind::Indirect(ind)) => match tree.resolve(&ind.key) {
                Some(target) => reaches_leaf(tree, target),
                None => {
                    warn!(key = %ind.key, "indirect endpoint key is not defined, resolving at send time");
                    true
                }
            },
            Some(kind) => kind.children().iter().any(|&c| reaches_leaf(tree, c)),
            None => false,
        }
    }

    for id in tree.ids() {
        let Some(node) = tree.get(id) else { continue };
        let is_group = matches!(node.kind(), EndpointKind::Failover(_) | EndpointKind::Loadbalance(_));
        if is_group && !reaches_leaf(tree, id) {
            return Err(ConfigError::NoReachableLeaf {
                endpoint: tree.display_name(id),
            });
        }
    }
    Ok(())
}

fn warn_unknown_sequence_names(doc: &ConfigDocument) {
    fn collect<'d>(cfg: &'d SequenceConfig, out: &mut BTreeSet<&'d str>) {
        out.extend(cfg.reference.as_deref());
        out.extend(cfg.error_handler.as_deref());
        for child in &cfg.children {
            collect_mediator(child, out);
        }
    }
    fn collect_mediator<'d>(cfg: &'d MediatorConfig, out: &mut BTreeSet<&'d str>) {
        match cfg {
            MediatorConfig::Sequence(seq) => collect(seq, out),
            MediatorConfig::Try {
                body,
                error_handlers,
                finally,
            } => {
                for child in body.iter().chain(error_handlers.iter().flatten()).chain(finally) {
                    collect_mediator(child, out);
                }
            }
            MediatorConfig::List { children } => {
                for child in children {
                    collect_mediator(child, out);
                }
            }
            _ => {}
        }
    }

    let mut referenced = BTreeSet::new();
    for seq in doc.sequences.values() {
        collect(seq, &mut referenced);
    }
    for name in referenced {
        if !doc.sequences.contains_key(name) {
            warn!(sequence = name, "referenced sequence is not defined, resolving at use");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn build(json: &str) -> Result<Configuration, ConfigError> {
        ConfigurationBuilder::new().build_json(json)
    }

    #[test]
    fn builds_named_and_inline_endpoints() {
        let config = build(
            r#"{
                "sequences": {"main": {"children": [
                    {"kind": "send", "endpoint": {"kind": "address", "target": "inline"}}
                ]}},
                "endpoints": {
                    "fo": {"kind": "failover", "children": [
                        {"kind": "address", "target": "a"},
                        {"kind": "address", "target": "b"}
                    ]}
                }
            }"#,
        )
        .unwrap();
        let tree = config.endpoints();
        assert_eq!(tree.len(), 4);
        let fo = config.resolve_endpoint("fo").unwrap();
        assert_eq!(tree.get(fo).unwrap().kind().children().len(), 2);
        assert!(config.resolve_sequence("main").is_some());
        assert_eq!(config.main_sequence(), "main");
    }

    #[test]
    fn empty_groups_are_rejected() {
        let err = build(r#"{"endpoints": {"lb": {"kind": "loadbalance", "children": []}}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyEndpointList { endpoint } if endpoint == "lb"));

        let err = build(
            r#"{"endpoints": {"fo": {"kind": "failover", "children": [{"kind": "failover"}]}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyEndpointList { endpoint } if endpoint == "anonymous failover"));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = build(
            r#"{"endpoints": {"lb": {"kind": "loadbalance",
                "algorithm": {"type": "weighted"},
                "children": [{"kind": "address", "target": "a"}]}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAlgorithm { name } if name == "weighted"));
    }

    #[test]
    fn registered_algorithm_receives_params() {
        let factory: AlgorithmFactory = Arc::new(
            |children: Vec<EndpointId>,
             params: &Map<String, Value>|
             -> Result<Box<dyn LoadbalanceAlgorithm>, ConfigError> {
            if params.get("strict").and_then(Value::as_bool) != Some(true) {
                return Err(ConfigError::InvalidAlgorithmParams {
                    name: "strictRoundRobin".to_string(),
                    reason: "strict must be true".to_string(),
                });
            }
            Ok(Box::new(RoundRobin::new(children)?))
        });
        let builder = ConfigurationBuilder::new().with_algorithm("strictRoundRobin", factory);
        let json = |strict: bool| {
            format!(
                r#"{{"endpoints": {{"lb": {{"kind": "loadbalance",
                    "algorithm": {{"type": "strictRoundRobin", "params": {{"strict": {strict}}}}},
                    "children": [{{"kind": "address", "target": "a"}}]}}}}}}"#
            )
        };
        assert!(builder.build_json(&json(true)).is_ok());
        assert!(matches!(
            builder.build_json(&json(false)),
            Err(ConfigError::InvalidAlgorithmParams { .. })
        ));
    }

    #[test]
    fn indirect_cycles_are_rejected() {
        let err = build(
            r#"{"endpoints": {
                "a": {"kind": "indirect", "key": "b"},
                "b": {"kind": "indirect", "key": "a"}
            }}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::IndirectCycle { .. }));

        let err = build(
            r#"{"endpoints": {
                "loop": {"kind": "failover", "children": [
                    {"kind": "address", "target": "x"},
                    {"kind": "indirect", "key": "loop"}
                ]}
            }}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::IndirectCycle { key } if key == "loop"));
    }

    #[test]
    fn unresolved_indirect_is_late_bound() {
        let config = build(
            r#"{"endpoints": {"fo": {"kind": "failover", "children": [
                {"kind": "indirect", "key": "not-yet"}
            ]}}}"#,
        )
        .unwrap();
        assert!(config.resolve_endpoint("not-yet").is_none());
    }

    #[test]
    fn sequence_shape_is_validated() {
        let err = build(
            r#"{"sequences": {"s": {"ref": "t", "children": [{"kind": "drop"}]}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::RefWithChildren { sequence } if sequence == "s"));

        let err = build(r#"{"sequences": {"s": {"ref": "t", "error_handler": "h"}}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::RefWithChildren { .. }));

        let err = build(r#"{"sequences": {"s": {}}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptySequence { sequence } if sequence == "s"));
    }

    #[test]
    fn custom_mediators_must_be_registered() {
        let json = r#"{"sequences": {"main": {"children": [{"kind": "custom", "name": "audit"}]}}}"#;
        let err = build(json).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMediator { name } if name == "audit"));

        let builder = ConfigurationBuilder::new().with_mediator(
            "audit",
            Arc::new(MediatorNode::Leaf(Leaf::Drop)) as Arc<dyn Mediator>,
        );
        assert!(builder.build_json(json).is_ok());
    }

    #[test]
    fn session_timeout_defaults_from_engine_settings() {
        let config = build(
            r#"{
                "engine": {"default_session_timeout_ms": 5000},
                "endpoints": {"lb": {"kind": "loadbalance",
                    "session": {"property": "sid"},
                    "children": [{"kind": "address", "target": "a"}]}}
            }"#,
        )
        .unwrap();
        let lb = config.resolve_endpoint("lb").unwrap();
        let text = format!("{:?}", config.endpoints().get(lb).unwrap().kind());
        assert!(text.contains("timeout_ms: 5000"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(build("{"), Err(ConfigError::Parse(_))));
    }
}
