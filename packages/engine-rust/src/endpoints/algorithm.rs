//! Load-balance selection algorithms and their shared runtime state.
//!
//! - [`AlgorithmContext`]: per-group cursor and session bindings, shared by
//!   every request that passes through the owning load-balance endpoint
//! - [`LoadbalanceAlgorithm`]: pluggable selection policy
//! - [`RoundRobin`]: strict configured order, wrapping after the last child

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use switchyard_core::{EndpointId, MessageContext};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// AlgorithmContext
// ---------------------------------------------------------------------------

/// Session to endpoint binding with an absolute expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBinding {
    pub endpoint: EndpointId,
    pub expires_at_ms: u64,
}

/// Shared, mutable state of one load-balance group.
///
/// The cursor is advanced with a single `fetch_add`, so concurrent callers
/// never observe the same pre-increment position. Session bindings live in a
/// `DashMap` so lookups on different sessions do not contend.
#[derive(Debug, Default)]
pub struct AlgorithmContext {
    cursor: AtomicU64,
    sessions: DashMap<String, SessionBinding>,
}

impl AlgorithmContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims the current position and moves the cursor by one.
    pub fn advance(&self) -> u64 {
        self.cursor.fetch_add(1, Ordering::AcqRel)
    }

    /// Returns the next position that [`advance`](Self::advance) would claim.
    pub fn position(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Returns the endpoint bound to `session_id` if the binding has not expired.
    /// Expired bindings are removed on lookup.
    pub fn bound_endpoint(&self, session_id: &str, now_ms: u64) -> Option<EndpointId> {
        let binding = *self.sessions.get(session_id)?;
        if binding.expires_at_ms <= now_ms {
            self.sessions
                .remove_if(session_id, |_, b| b.expires_at_ms <= now_ms);
            return None;
        }
        Some(binding.endpoint)
    }

    pub fn bind(&self, session_id: &str, endpoint: EndpointId, expires_at_ms: u64) {
        self.sessions.insert(
            session_id.to_string(),
            SessionBinding {
                endpoint,
                expires_at_ms,
            },
        );
    }

    pub fn unbind(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

// ---------------------------------------------------------------------------
// LoadbalanceAlgorithm
// ---------------------------------------------------------------------------

/// Selection policy for a load-balance endpoint.
///
/// Implementations are shared across all in-flight messages and must keep
/// every piece of mutable state in the supplied [`AlgorithmContext`].
pub trait LoadbalanceAlgorithm: Send + Sync {
    /// Name used in configuration (`algorithm.type`).
    fn name(&self) -> &'static str;

    /// Returns the next child to send to, or `None` when no child is eligible.
    ///
    /// `eligible` reports whether a candidate is currently live. It may be
    /// called several times per selection.
    fn next_endpoint(
        &self,
        msg: &MessageContext,
        algorithm_ctx: &AlgorithmContext,
        eligible: &mut dyn FnMut(EndpointId) -> bool,
    ) -> Option<EndpointId>;

    /// The children this algorithm selects from, in configured order.
    fn endpoints(&self) -> &[EndpointId];
}

// ---------------------------------------------------------------------------
// RoundRobin
// ---------------------------------------------------------------------------

/// Round-robin selection over a fixed list of children.
///
/// Each attempt claims one cursor position. With every child eligible a call
/// advances the cursor by exactly one; ineligible children are skipped for at
/// most one full lap.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    endpoints: Vec<EndpointId>,
}

impl RoundRobin {
    pub const NAME: &'static str = "roundRobin";

    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyEndpointList`] when `endpoints` is empty.
    pub fn new(endpoints: Vec<EndpointId>) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::EmptyEndpointList {
                endpoint: Self::NAME.to_string(),
            });
        }
        Ok(Self { endpoints })
    }
}

impl LoadbalanceAlgorithm for RoundRobin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[allow(clippy::cast_possible_truncation)]
    fn next_endpoint(
        &self,
        _msg: &MessageContext,
        algorithm_ctx: &AlgorithmContext,
        eligible: &mut dyn FnMut(EndpointId) -> bool,
    ) -> Option<EndpointId> {
        let len = self.endpoints.len() as u64;
        for _ in 0..len {
            let slot = (algorithm_ctx.advance() % len) as usize;
            let candidate = self.endpoints[slot];
            if eligible(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn endpoints(&self) -> &[EndpointId] {
        &self.endpoints
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Barrier;

    use proptest::prelude::*;

    use super::*;

    fn ids(n: u32) -> Vec<EndpointId> {
        (0..n).map(EndpointId).collect()
    }

    #[test]
    fn empty_list_is_rejected_at_construction() {
        assert!(matches!(
            RoundRobin::new(Vec::new()),
            Err(ConfigError::EmptyEndpointList { .. })
        ));
    }

    #[test]
    fn sequential_calls_cycle_in_configured_order() {
        let rr = RoundRobin::new(ids(3)).unwrap();
        let actx = AlgorithmContext::new();
        let msg = MessageContext::new("");
        let picked: Vec<u32> = (0..7)
            .map(|_| rr.next_endpoint(&msg, &actx, &mut |_| true).unwrap().0)
            .collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(actx.position(), 7);
    }

    #[test]
    fn single_endpoint_is_always_returned() {
        let rr = RoundRobin::new(ids(1)).unwrap();
        let actx = AlgorithmContext::new();
        let msg = MessageContext::new("");
        for _ in 0..5 {
            assert_eq!(
                rr.next_endpoint(&msg, &actx, &mut |_| true),
                Some(EndpointId(0))
            );
        }
    }

    #[test]
    fn ineligible_children_are_skipped() {
        let rr = RoundRobin::new(ids(3)).unwrap();
        let actx = AlgorithmContext::new();
        let msg = MessageContext::new("");
        let mut live = |id: EndpointId| id != EndpointId(1);
        assert_eq!(rr.next_endpoint(&msg, &actx, &mut live), Some(EndpointId(0)));
        assert_eq!(rr.next_endpoint(&msg, &actx, &mut live), Some(EndpointId(2)));
        assert_eq!(rr.next_endpoint(&msg, &actx, &mut live), Some(EndpointId(0)));
    }

    #[test]
    fn no_eligible_child_returns_none_after_one_lap() {
        let rr = RoundRobin::new(ids(4)).unwrap();
        let actx = AlgorithmContext::new();
        let msg = MessageContext::new("");
        let mut calls = 0;
        let picked = rr.next_endpoint(&msg, &actx, &mut |_| {
            calls += 1;
            false
        });
        assert_eq!(picked, None);
        assert_eq!(calls, 4);
    }

    #[test]
    fn concurrent_callers_receive_distinct_endpoints() {
        const K: u32 = 10;
        let rr = RoundRobin::new(ids(K)).unwrap();
        let actx = AlgorithmContext::new();
        let barrier = Barrier::new(K as usize);

        let picked: HashSet<EndpointId> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..K)
                .map(|_| {
                    s.spawn(|| {
                        let msg = MessageContext::new("");
                        barrier.wait();
                        rr.next_endpoint(&msg, &actx, &mut |_| true).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(picked.len(), K as usize);
    }

    #[test]
    fn session_bindings_expire() {
        let actx = AlgorithmContext::new();
        actx.bind("s1", EndpointId(2), 1_000);
        assert_eq!(actx.bound_endpoint("s1", 999), Some(EndpointId(2)));
        assert_eq!(actx.bound_endpoint("s1", 1_000), None);
        assert_eq!(actx.session_count(), 0);
    }

    #[test]
    fn unbind_removes_session() {
        let actx = AlgorithmContext::new();
        actx.bind("s1", EndpointId(0), u64::MAX);
        actx.unbind("s1");
        assert_eq!(actx.bound_endpoint("s1", 0), None);
    }

    proptest! {
        #[test]
        fn selection_follows_cursor_modulo_len(len in 1u32..16, calls in 1usize..64) {
            let rr = RoundRobin::new(ids(len)).unwrap();
            let actx = AlgorithmContext::new();
            let msg = MessageContext::new("");
            for i in 0..calls {
                let picked = rr.next_endpoint(&msg, &actx, &mut |_| true).unwrap();
                prop_assert_eq!(picked.0 as usize, i % len as usize);
            }
        }
    }
}
