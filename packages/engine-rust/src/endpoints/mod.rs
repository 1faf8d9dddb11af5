//! Endpoint tree: address, failover, load-balance and indirect endpoints.
//!
//! Endpoints live in an arena ([`EndpointTree`]) and refer to each other by
//! [`EndpointId`]. A child stores its parent's id, set once at build time,
//! which is the path faults take on their way up. The structure is immutable
//! after build; the only mutable state is the per-node liveness
//! ([`EndpointState`]), the failover cursor and the load-balance
//! [`AlgorithmContext`], all of which are atomics or concurrent maps.
//!
//! Sending is implemented in [`dispatch`].

pub mod algorithm;
pub mod dispatch;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use switchyard_core::{EndpointId, MessageContext};
use tracing::{debug, info, warn};

use crate::error::MediationError;

pub use algorithm::{AlgorithmContext, LoadbalanceAlgorithm, RoundRobin, SessionBinding};
pub use dispatch::{Dispatch, SendOutcome};

/// Sentinel for "never recovers on its own".
const NEVER: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// EndpointState
// ---------------------------------------------------------------------------

/// Liveness of a single endpoint node.
///
/// `recover_on_ms` is written before `active` is cleared, so a reader that
/// observes `active == false` also observes the matching recovery time.
#[derive(Debug)]
pub struct EndpointState {
    active: AtomicBool,
    recover_on_ms: AtomicU64,
}

impl EndpointState {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            recover_on_ms: AtomicU64::new(NEVER),
        }
    }

    fn is_flagged_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn mark_active(&self) {
        self.active.store(true, Ordering::Release);
    }

    fn mark_inactive(&self, recover_on_ms: u64) {
        self.recover_on_ms.store(recover_on_ms, Ordering::Release);
        self.active.store(false, Ordering::Release);
    }

    fn recover_on(&self) -> u64 {
        self.recover_on_ms.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Endpoint variants
// ---------------------------------------------------------------------------

/// Leaf endpoint that hands the message to the transport.
#[derive(Debug, Clone)]
pub struct AddressEndpoint {
    /// Physical address passed to the transport.
    pub target: String,
    /// How long a failed endpoint stays suspended. `None` suspends until
    /// explicitly re-activated.
    pub suspend_on_failure_ms: Option<u64>,
}

/// Ordered group that sticks to one child until it goes inactive.
#[derive(Debug)]
pub struct FailoverEndpoint {
    children: Vec<EndpointId>,
    current: AtomicUsize,
}

impl FailoverEndpoint {
    #[must_use]
    pub fn new(children: Vec<EndpointId>) -> Self {
        Self {
            children,
            current: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn children(&self) -> &[EndpointId] {
        &self.children
    }

    /// Position of the child currently receiving traffic.
    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    fn current(&self) -> Option<EndpointId> {
        self.children.get(self.current_index()).copied()
    }

    fn set_current(&self, index: usize) {
        self.current.store(index, Ordering::Release);
    }
}

/// Session affinity settings of a load-balance group.
#[derive(Debug, Clone)]
pub struct SessionAffinity {
    /// Message property holding the session id.
    pub property: String,
    /// Idle time after which a binding is forgotten.
    pub timeout_ms: u64,
}

/// Group that spreads messages across children with a selection algorithm.
pub struct LoadbalanceEndpoint {
    algorithm: Box<dyn LoadbalanceAlgorithm>,
    context: AlgorithmContext,
    session: Option<SessionAffinity>,
}

impl fmt::Debug for LoadbalanceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadbalanceEndpoint")
            .field("algorithm", &self.algorithm.name())
            .field("children", &self.algorithm.endpoints())
            .field("cursor", &self.context.position())
            .field("session", &self.session)
            .finish()
    }
}

impl LoadbalanceEndpoint {
    #[must_use]
    pub fn new(algorithm: Box<dyn LoadbalanceAlgorithm>, session: Option<SessionAffinity>) -> Self {
        Self {
            algorithm,
            context: AlgorithmContext::new(),
            session,
        }
    }

    #[must_use]
    pub fn children(&self) -> &[EndpointId] {
        self.algorithm.endpoints()
    }

    #[must_use]
    pub fn algorithm_context(&self) -> &AlgorithmContext {
        &self.context
    }

    /// Picks the child for `msg`, honouring session affinity when configured.
    ///
    /// A binding whose endpoint is no longer eligible is dropped and the
    /// session is re-bound to a fresh selection.
    fn select(
        &self,
        msg: &MessageContext,
        now_ms: u64,
        eligible: &mut dyn FnMut(EndpointId) -> bool,
    ) -> Option<EndpointId> {
        let session = self.session.as_ref().and_then(|affinity| {
            msg.property(&affinity.property)
                .and_then(|v| v.as_str())
                .map(|id| (affinity, id))
        });

        let Some((affinity, session_id)) = session else {
            return self.algorithm.next_endpoint(msg, &self.context, eligible);
        };

        let expires_at = now_ms.saturating_add(affinity.timeout_ms);
        if let Some(bound) = self.context.bound_endpoint(session_id, now_ms) {
            if eligible(bound) {
                self.context.bind(session_id, bound, expires_at);
                return Some(bound);
            }
            warn!(session = session_id, endpoint = %bound, "session endpoint inactive, rebinding");
            self.context.unbind(session_id);
        }

        let picked = self.algorithm.next_endpoint(msg, &self.context, eligible)?;
        self.context.bind(session_id, picked, expires_at);
        Some(picked)
    }
}

/// Reference to a named endpoint, resolved on every use.
#[derive(Debug, Clone)]
pub struct IndirectEndpoint {
    pub key: String,
}

/// Closed set of endpoint variants.
#[derive(Debug)]
pub enum EndpointKind {
    Address(AddressEndpoint),
    Failover(FailoverEndpoint),
    Loadbalance(LoadbalanceEndpoint),
    Indirect(IndirectEndpoint),
}

impl EndpointKind {
    /// Direct children of a composite endpoint; empty for leaves and indirects.
    #[must_use]
    pub fn children(&self) -> &[EndpointId] {
        match self {
            Self::Failover(f) => f.children(),
            Self::Loadbalance(lb) => lb.children(),
            Self::Address(_) | Self::Indirect(_) => &[],
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Failover(_) => "failover",
            Self::Loadbalance(_) => "loadbalance",
            Self::Indirect(_) => "indirect",
        }
    }
}

// ---------------------------------------------------------------------------
// EndpointNode / EndpointTree
// ---------------------------------------------------------------------------

/// One slot in the endpoint arena.
#[derive(Debug)]
pub struct EndpointNode {
    name: Option<String>,
    parent: Option<EndpointId>,
    kind: EndpointKind,
    state: EndpointState,
}

impl EndpointNode {
    #[must_use]
    pub fn new(name: Option<String>, kind: EndpointKind) -> Self {
        Self {
            name,
            parent: None,
            kind,
            state: EndpointState::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn parent(&self) -> Option<EndpointId> {
        self.parent
    }

    #[must_use]
    pub fn kind(&self) -> &EndpointKind {
        &self.kind
    }
}

/// Arena of endpoint nodes plus the name registry used by indirect endpoints.
#[derive(Debug, Default)]
pub struct EndpointTree {
    nodes: Vec<EndpointNode>,
    names: HashMap<String, EndpointId>,
}

impl EndpointTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its id. Named nodes become resolvable by key.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, node: EndpointNode) -> EndpointId {
        let id = EndpointId(self.nodes.len() as u32);
        if let Some(name) = &node.name {
            self.names.insert(name.clone(), id);
        }
        self.nodes.push(node);
        id
    }

    /// Records `parent` as the escalation target of each of its children.
    /// Only valid while the tree is being built.
    pub fn attach_children(&mut self, parent: EndpointId) {
        let Some(children) = self.get(parent).map(|n| n.kind.children().to_vec()) else {
            return;
        };
        for child in children {
            if let Some(node) = self.nodes.get_mut(child.index()) {
                node.parent = Some(parent);
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: EndpointId) -> Option<&EndpointNode> {
        self.nodes.get(id.index())
    }

    /// Like [`get`](Self::get), for ids that arrive from outside the tree.
    fn node(&self, id: EndpointId) -> Result<&EndpointNode, MediationError> {
        self.get(id).ok_or_else(|| {
            warn!(endpoint = %id, nodes = self.nodes.len(), "endpoint id is not part of this tree");
            MediationError::UnresolvedEndpoint { key: id.to_string() }
        })
    }

    /// Looks up a named endpoint.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<EndpointId> {
        self.names.get(key).copied()
    }

    fn resolve_indirect(&self, key: &str) -> Result<EndpointId, MediationError> {
        self.resolve(key).ok_or_else(|| {
            tracing::error!(key, "indirect endpoint key cannot be resolved");
            MediationError::UnresolvedEndpoint {
                key: key.to_string(),
            }
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
        (0..self.nodes.len()).filter_map(|i| u32::try_from(i).ok().map(EndpointId))
    }

    /// Registered endpoint names with their ids, in arbitrary order.
    pub fn named(&self) -> impl Iterator<Item = (&str, EndpointId)> {
        self.names.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Human-readable identifier for logs and errors.
    #[must_use]
    pub fn display_name(&self, id: EndpointId) -> String {
        match self.get(id) {
            Some(node) => match (&node.name, &node.kind) {
                (Some(name), _) => name.clone(),
                (None, EndpointKind::Address(a)) => a.target.clone(),
                (None, EndpointKind::Indirect(i)) => format!("->{}", i.key),
                (None, kind) => format!("anonymous-{}-{}", kind.label(), id.0),
            },
            None => id.to_string(),
        }
    }

    // -- liveness ----------------------------------------------------------

    /// Whether `id` can currently take traffic.
    ///
    /// Address endpoints recover automatically once `now_ms` passes their
    /// recovery time. A composite is active if its own flag is set or any
    /// child is active; in the latter case its flag is re-armed. Every child
    /// is evaluated so their own recovery bookkeeping runs.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::UnresolvedEndpoint`] when `id` is not part of
    /// this tree or an indirect key on the way cannot be resolved.
    pub fn is_active(&self, id: EndpointId, now_ms: u64) -> Result<bool, MediationError> {
        let node = self.node(id)?;
        let active = match &node.kind {
            EndpointKind::Address(_) => {
                if node.state.is_flagged_active() {
                    true
                } else if now_ms > node.state.recover_on() {
                    node.state.mark_active();
                    info!(endpoint = %self.display_name(id), "endpoint recovered after suspension");
                    true
                } else {
                    false
                }
            }
            EndpointKind::Failover(_) | EndpointKind::Loadbalance(_) => {
                let mut any_child = false;
                for &child in node.kind.children() {
                    any_child |= self.is_active(child, now_ms)?;
                }
                if any_child && !node.state.is_flagged_active() {
                    node.state.mark_active();
                }
                any_child || node.state.is_flagged_active()
            }
            EndpointKind::Indirect(ind) => {
                return self.is_active(self.resolve_indirect(&ind.key)?, now_ms);
            }
        };
        debug!(endpoint = %self.display_name(id), active, "endpoint state");
        Ok(active)
    }

    /// Marks `id` active or inactive.
    ///
    /// Deactivating an address endpoint suspends it for its configured
    /// duration, measured from `now_ms`. Indirect endpoints delegate to the
    /// endpoint their key resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::UnresolvedEndpoint`] for an id outside this
    /// tree or an unresolvable indirect key.
    pub fn set_active(&self, id: EndpointId, active: bool, now_ms: u64) -> Result<(), MediationError> {
        let node = self.node(id)?;
        if let EndpointKind::Indirect(ind) = &node.kind {
            return self.set_active(self.resolve_indirect(&ind.key)?, active, now_ms);
        }
        if active {
            node.state.mark_active();
            return Ok(());
        }
        let recover_on = match &node.kind {
            EndpointKind::Address(AddressEndpoint {
                suspend_on_failure_ms: Some(ms),
                ..
            }) => now_ms.saturating_add(*ms),
            _ => NEVER,
        };
        node.state.mark_inactive(recover_on);
        Ok(())
    }

    /// Re-activates every suspended address endpoint whose recovery time has
    /// passed. Returns the endpoints that came back.
    pub fn recover_expired(&self, now_ms: u64) -> Vec<EndpointId> {
        self.ids()
            .zip(&self.nodes)
            .filter(|(_, node)| {
                matches!(node.kind, EndpointKind::Address(_))
                    && !node.state.is_flagged_active()
                    && now_ms > node.state.recover_on()
            })
            .map(|(id, node)| {
                node.state.mark_active();
                info!(endpoint = %self.display_name(id), "endpoint recovered by sweep");
                id
            })
            .collect()
    }

    /// Renders the tree rooted at each named endpoint, one node per line.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut roots: Vec<(&str, EndpointId)> = self.named().collect();
        roots.sort_unstable();
        let mut out = String::new();
        for (_, id) in roots {
            self.describe_node(id, 0, &mut out);
        }
        out
    }

    fn describe_node(&self, id: EndpointId, depth: usize, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        let detail = match &node.kind {
            EndpointKind::Address(a) => format!(" {}", a.target),
            EndpointKind::Indirect(i) => format!(" key={}", i.key),
            EndpointKind::Loadbalance(lb) => format!(" algorithm={}", lb.algorithm.name()),
            EndpointKind::Failover(_) => String::new(),
        };
        out.push_str(&format!(
            "{:indent$}{} [{}]{}\n",
            "",
            self.display_name(id),
            node.kind.label(),
            detail,
            indent = depth * 2
        ));
        for &child in node.kind.children() {
            self.describe_node(child, depth + 1, out);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn address(target: &str, suspend: Option<u64>) -> EndpointNode {
        EndpointNode::new(
            None,
            EndpointKind::Address(AddressEndpoint {
                target: target.to_string(),
                suspend_on_failure_ms: suspend,
            }),
        )
    }

    fn failover_tree() -> (EndpointTree, EndpointId, [EndpointId; 2]) {
        let mut tree = EndpointTree::new();
        let a = tree.push(address("http://a", Some(1_000)));
        let b = tree.push(address("http://b", None));
        let fo = tree.push(EndpointNode::new(
            Some("fo".to_string()),
            EndpointKind::Failover(FailoverEndpoint::new(vec![a, b])),
        ));
        tree.attach_children(fo);
        (tree, fo, [a, b])
    }

    #[test]
    fn children_get_parent_ids() {
        let (tree, fo, [a, b]) = failover_tree();
        assert_eq!(tree.get(a).unwrap().parent(), Some(fo));
        assert_eq!(tree.get(b).unwrap().parent(), Some(fo));
        assert_eq!(tree.get(fo).unwrap().parent(), None);
        assert_eq!(tree.resolve("fo"), Some(fo));
    }

    #[test]
    fn suspended_address_recovers_strictly_after_deadline() {
        let (tree, _, [a, _]) = failover_tree();
        tree.set_active(a, false, 5_000).unwrap();
        assert!(!tree.is_active(a, 5_500).unwrap());
        assert!(!tree.is_active(a, 6_000).unwrap());
        assert!(tree.is_active(a, 6_001).unwrap());
        // Recovery re-arms the flag.
        assert!(tree.is_active(a, 0).unwrap());
    }

    #[test]
    fn address_without_suspension_stays_down() {
        let (tree, _, [_, b]) = failover_tree();
        tree.set_active(b, false, 0).unwrap();
        assert!(!tree.is_active(b, u64::MAX - 1).unwrap());
        tree.set_active(b, true, 0).unwrap();
        assert!(tree.is_active(b, 0).unwrap());
    }

    #[test]
    fn composite_is_active_while_any_child_is() {
        let (tree, fo, [a, b]) = failover_tree();
        tree.set_active(fo, false, 0).unwrap();
        assert!(tree.is_active(fo, 0).unwrap());

        tree.set_active(a, false, 0).unwrap();
        tree.set_active(b, false, 0).unwrap();
        tree.set_active(fo, false, 0).unwrap();
        assert!(!tree.is_active(fo, 10).unwrap());

        // Once a child comes back the composite re-arms its own flag.
        tree.set_active(b, true, 0).unwrap();
        assert!(tree.is_active(fo, 10).unwrap());
    }

    #[test]
    fn indirect_delegates_liveness() {
        let (mut tree, fo, [a, b]) = failover_tree();
        let ind = tree.push(EndpointNode::new(
            None,
            EndpointKind::Indirect(IndirectEndpoint {
                key: "fo".to_string(),
            }),
        ));
        tree.set_active(a, false, 0).unwrap();
        tree.set_active(b, false, 0).unwrap();
        tree.set_active(ind, false, 0).unwrap();
        assert!(!tree.is_active(fo, 1).unwrap());
        assert!(!tree.is_active(ind, 1).unwrap());
    }

    #[test]
    fn unresolved_indirect_is_an_error() {
        let mut tree = EndpointTree::new();
        let ind = tree.push(EndpointNode::new(
            None,
            EndpointKind::Indirect(IndirectEndpoint {
                key: "missing".to_string(),
            }),
        ));
        assert!(matches!(
            tree.is_active(ind, 0),
            Err(MediationError::UnresolvedEndpoint { key }) if key == "missing"
        ));
        assert!(tree.set_active(ind, true, 0).is_err());
    }

    #[test]
    fn sweep_recovers_only_expired_addresses() {
        let (tree, _, [a, b]) = failover_tree();
        tree.set_active(a, false, 0).unwrap();
        tree.set_active(b, false, 0).unwrap();
        assert!(tree.recover_expired(500).is_empty());
        assert_eq!(tree.recover_expired(1_001), vec![a]);
        assert!(tree.is_active(a, 0).unwrap());
        assert!(!tree.is_active(b, 1_001).unwrap());
    }

    #[test]
    fn describe_lists_named_roots_with_children() {
        let (tree, _, _) = failover_tree();
        let text = tree.describe();
        assert!(text.starts_with("fo [failover]\n"));
        assert!(text.contains("  http://a [address] http://a\n"));
    }

    #[test]
    fn foreign_ids_are_rejected() {
        let (tree, _, _) = failover_tree();
        let outside = EndpointId(42);
        assert!(matches!(
            tree.is_active(outside, 0),
            Err(MediationError::UnresolvedEndpoint { key }) if key == "ep#42"
        ));
        assert!(tree.set_active(outside, false, 0).is_err());
    }
}
