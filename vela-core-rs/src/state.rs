//! Shared node state: identity, role, term, known leader and peers.
//!
//! The term only moves forward. It is changed through compare-and-set or a
//! monotonic advance; neither can lower it.
//! Role and leader changes are crate-private so that only the elector
//! and its collectors drive them.

use crate::types::{NodeId, Role, Term};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-node election state shared between the elector and its collectors
#[derive(Debug)]
pub struct NodeState {
    self_id: NodeId,
    role: RwLock<Role>,
    current_term: AtomicU64,
    leader_id: RwLock<Option<NodeId>>,
    /// Vote cast in a given term (volatile)
    voted_for: Mutex<Option<(Term, NodeId)>>,
    /// Peer ids, never containing `self_id`
    peers: BTreeSet<NodeId>,
}

impl NodeState {
    /// Create state for `self_id` with the given peers. `self_id` is dropped
    /// from the peer set if present.
    pub fn new<I, P>(self_id: impl Into<NodeId>, peers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<NodeId>,
    {
        let self_id = self_id.into();
        let peers = peers
            .into_iter()
            .map(Into::into)
            .filter(|peer: &NodeId| *peer != self_id)
            .collect();

        Self {
            self_id,
            role: RwLock::new(Role::Follower),
            current_term: AtomicU64::new(0),
            leader_id: RwLock::new(None),
            voted_for: Mutex::new(None),
            peers,
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    /// Set the role, returning the previous one
    pub(crate) fn set_role(&self, role: Role) -> Role {
        std::mem::replace(&mut *self.role.write(), role)
    }

    pub fn current_term(&self) -> Term {
        self.current_term.load(Ordering::Acquire)
    }

    /// Replace `expected` with `new`. Fails if the term is not `expected`
    /// or if `new` would move it backward.
    pub(crate) fn compare_and_set_term(&self, expected: Term, new: Term) -> bool {
        if new < expected {
            return false;
        }
        self.current_term
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Raise the term to `term` unless it is already at or past it.
    /// Returns the term observed before the call.
    pub(crate) fn advance_term(&self, term: Term) -> Term {
        self.current_term.fetch_max(term, Ordering::AcqRel)
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id.read().clone()
    }

    pub(crate) fn set_leader_id(&self, leader_id: Option<NodeId>) {
        *self.leader_id.write() = leader_id;
    }

    /// Record a vote for `candidate` in `term`. Succeeds if no vote was cast
    /// in `term` yet, or the same candidate was already chosen.
    pub(crate) fn try_vote(&self, term: Term, candidate: &NodeId) -> bool {
        let mut voted = self.voted_for.lock();
        match voted.as_ref() {
            Some((voted_term, voted_id)) if *voted_term == term => voted_id == candidate,
            Some((voted_term, _)) if *voted_term > term => false,
            _ => {
                *voted = Some((term, candidate.clone()));
                true
            }
        }
    }

    /// Candidate voted for in `term`, if any
    pub fn voted_for(&self, term: Term) -> Option<NodeId> {
        match self.voted_for.lock().as_ref() {
            Some((voted_term, id)) if *voted_term == term => Some(id.clone()),
            _ => None,
        }
    }

    pub fn peers(&self) -> impl Iterator<Item = &NodeId> {
        self.peers.iter()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_peer(&self, id: &str) -> bool {
        self.peers.contains(id)
    }
}
