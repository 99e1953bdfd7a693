//! Vote collector: binding votes for an already-incremented term.

use crate::collector::{Ballot, Collector, Tally};
use crate::elector::ElectorCore;
use crate::error::TransportError;
use crate::state::NodeState;
use crate::types::{Term, VoteRequest, VoteResponse};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Gathers votes for the node's current term; on quorum the elector
/// promotes the node to leader.
pub struct VoteCollector {
    ballot: Ballot,
    state: Arc<NodeState>,
    elector: Weak<ElectorCore>,
}

impl VoteCollector {
    pub(crate) fn new(state: Arc<NodeState>, elector: Weak<ElectorCore>) -> Self {
        let target_term = state.current_term();
        Self {
            ballot: Ballot::new(target_term, state.self_id()),
            state,
            elector,
        }
    }

    pub fn agreed_count(&self) -> usize {
        self.ballot.agreed_count()
    }

    pub fn has_agreed(&self, id: &str) -> bool {
        self.ballot.has_agreed(id)
    }

    pub(crate) fn check_quorum(&self) {
        if let Some(agreed) = self.ballot.try_claim(self.state.peer_count()) {
            self.promote(agreed);
        }
    }

    fn promote(&self, agreed: usize) {
        let target = self.ballot.target_term();
        info!(
            "Election: Won vote for term {} with {}/{} votes",
            target,
            agreed,
            self.state.peer_count() + 1
        );
        if let Some(elector) = self.elector.upgrade() {
            elector.on_vote_quorum(target);
        }
    }
}

impl Collector for VoteCollector {
    fn request(&self) -> VoteRequest {
        VoteRequest {
            term: self.ballot.target_term(),
            candidate_id: self.state.self_id().clone(),
            pre_vote: false,
        }
    }

    fn target_term(&self) -> Term {
        self.ballot.target_term()
    }

    fn on_response(&self, resp: VoteResponse) {
        let target = self.ballot.target_term();
        if resp.term != target {
            warn!(
                "Election: Dropping vote from {} for term {} (collecting term {})",
                resp.voter_id, resp.term, target
            );
            return;
        }
        let current = self.state.current_term();
        if target < current {
            warn!(
                "Election: Dropping vote from {}: term {} is stale (current {})",
                resp.voter_id, target, current
            );
            return;
        }

        if !self.state.is_peer(&resp.voter_id) {
            warn!("Election: Dropping vote from non-member {}", resp.voter_id);
            return;
        }

        match self.ballot.record(&resp, self.state.peer_count()) {
            Tally::Quorum(agreed) => self.promote(agreed),
            Tally::Counted(agreed) => debug!(
                "Election: Vote from {} for term {} ({} agreed)",
                resp.voter_id, target, agreed
            ),
            Tally::Rejected => debug!("Election: {} denied vote for term {}", resp.voter_id, target),
            Tally::Inactive => {}
        }
    }

    fn on_error(&self, err: TransportError) {
        warn!(
            "Election: Vote request for term {} failed: {}",
            self.ballot.target_term(),
            err
        );
    }

    fn disable(&self) {
        if self.ballot.disable() {
            debug!(
                "Election: Vote collector for term {} disabled",
                self.ballot.target_term()
            );
        }
    }

    fn is_active(&self) -> bool {
        self.ballot.is_active()
    }
}

impl std::fmt::Debug for VoteCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteCollector")
            .field("target_term", &self.ballot.target_term())
            .field("active", &self.ballot.is_active())
            .field("agreed", &self.ballot.agreed_count())
            .finish()
    }
}
