//! Agreement bookkeeping shared by the pre-vote and vote phases.
//!
//! Each election attempt gets a fresh collector seeded with the node's own
//! agreement. The collector stays active until it reaches quorum, is
//! superseded, or is disabled; the active flag flips exactly once through a
//! compare-and-set, so concurrent responses crossing the threshold together
//! produce a single winner.

use crate::error::TransportError;
use crate::types::{NodeId, Term, VoteRequest, VoteResponse, VoteResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Quorum check: agreements (self included) must strictly exceed half the
/// peer set, using integer division.
pub fn has_quorum(agreed: usize, peer_count: usize) -> bool {
    agreed > peer_count / 2
}

/// Callback contract the transport uses to deliver (pre-)vote outcomes
pub trait Collector: Send + Sync {
    /// Request to broadcast on behalf of this collector
    fn request(&self) -> VoteRequest;

    fn target_term(&self) -> Term;

    fn on_response(&self, resp: VoteResponse);

    /// A request could not be delivered. Counts as a non-vote.
    fn on_error(&self, err: TransportError);

    /// Make the collector permanently inert. Idempotent.
    fn disable(&self);

    fn is_active(&self) -> bool;
}

/// Result of recording one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tally {
    /// Collector already finished or disabled
    Inactive,
    Rejected,
    /// Agreement added, quorum not (or no longer) claimable
    Counted(usize),
    /// This response won the race to quorum
    Quorum(usize),
}

/// Agreement set plus the single-winner active flag
#[derive(Debug)]
pub(crate) struct Ballot {
    target_term: Term,
    /// `None` once released by `disable`
    agreed: Mutex<Option<HashSet<NodeId>>>,
    active: AtomicBool,
}

impl Ballot {
    pub(crate) fn new(target_term: Term, self_id: &NodeId) -> Self {
        let mut agreed = HashSet::new();
        agreed.insert(self_id.clone());
        Self {
            target_term,
            agreed: Mutex::new(Some(agreed)),
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn target_term(&self) -> Term {
        self.target_term
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Record a response whose term has already been validated
    pub(crate) fn record(&self, resp: &VoteResponse, peer_count: usize) -> Tally {
        if !self.is_active() {
            return Tally::Inactive;
        }
        if resp.result == VoteResult::Reject {
            return Tally::Rejected;
        }

        let agreed = {
            let mut guard = self.agreed.lock();
            match guard.as_mut() {
                Some(set) => {
                    set.insert(resp.voter_id.clone());
                    set.len()
                }
                None => return Tally::Inactive,
            }
        };

        if has_quorum(agreed, peer_count)
            && self
                .active
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Tally::Quorum(agreed);
        }
        Tally::Counted(agreed)
    }

    /// Claim quorum without a new response. Covers clusters where the
    /// self-agreement alone is already a majority.
    pub(crate) fn try_claim(&self, peer_count: usize) -> Option<usize> {
        let agreed = self.agreed.lock().as_ref().map(HashSet::len)?;
        if has_quorum(agreed, peer_count)
            && self
                .active
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Some(agreed);
        }
        None
    }

    /// Deactivate and release the agreement set. Returns `true` only for the
    /// call that performed the transition.
    pub(crate) fn disable(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.agreed.lock().take();
            return true;
        }
        false
    }

    pub(crate) fn agreed_count(&self) -> usize {
        self.agreed.lock().as_ref().map_or(0, HashSet::len)
    }

    pub(crate) fn has_agreed(&self, id: &str) -> bool {
        self.agreed
            .lock()
            .as_ref()
            .map_or(false, |set| set.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn ballot() -> Ballot {
        Ballot::new(1, &"a".to_string())
    }

    #[test]
    fn test_self_seeded() {
        let ballot = ballot();
        assert_eq!(ballot.agreed_count(), 1);
        assert!(ballot.has_agreed("a"));
        assert!(ballot.is_active());
    }

    #[test]
    fn test_quorum_boundary_four_peers() {
        // self + 1 agreement = 2 = 4/2, not enough
        assert!(!has_quorum(2, 4));
        assert!(has_quorum(3, 4));
    }

    #[test]
    fn test_record_reaches_quorum_once() {
        let ballot = ballot();
        assert_eq!(ballot.record(&VoteResponse::agree(1, "b"), 4), Tally::Counted(2));
        assert_eq!(ballot.record(&VoteResponse::agree(1, "c"), 4), Tally::Quorum(3));
        assert!(!ballot.is_active());
        assert_eq!(ballot.record(&VoteResponse::agree(1, "d"), 4), Tally::Inactive);
    }

    #[test]
    fn test_try_claim_single_node() {
        let ballot = ballot();
        assert_eq!(ballot.try_claim(0), Some(1));
        assert_eq!(ballot.try_claim(0), None);

        let ballot = Ballot::new(1, &"a".to_string());
        assert_eq!(ballot.try_claim(2), None);
        assert!(ballot.is_active());
    }

    #[test]
    fn test_duplicate_voter_counted_once() {
        let ballot = ballot();
        ballot.record(&VoteResponse::agree(1, "b"), 4);
        assert_eq!(ballot.record(&VoteResponse::agree(1, "b"), 4), Tally::Counted(2));
    }

    #[test]
    fn test_reject_adds_nothing() {
        let ballot = ballot();
        assert_eq!(ballot.record(&VoteResponse::reject(1, "b"), 4), Tally::Rejected);
        assert_eq!(ballot.agreed_count(), 1);
    }

    #[test]
    fn test_disable_is_idempotent_and_releases_set() {
        let ballot = ballot();
        assert!(ballot.disable());
        assert!(!ballot.disable());
        assert_eq!(ballot.agreed_count(), 0);
        assert_eq!(ballot.record(&VoteResponse::agree(1, "b"), 4), Tally::Inactive);
    }

    #[test]
    fn test_concurrent_agreements_single_winner() {
        for _ in 0..200 {
            let ballot = Arc::new(ballot());
            let peers = 8;
            let barrier = Arc::new(Barrier::new(peers));

            let handles: Vec<_> = (0..peers)
                .map(|i| {
                    let ballot = Arc::clone(&ballot);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        ballot.record(&VoteResponse::agree(1, format!("p{}", i)), peers)
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|t| matches!(t, Tally::Quorum(_)))
                .count();
            assert_eq!(winners, 1);
        }
    }

    proptest! {
        /// Promotion happens exactly when agreements pass half the peer set
        #[test]
        fn quorum_threshold(peers in 0usize..32, agreeing in 0usize..32) {
            let agreeing = agreeing.min(peers);
            let ballot = ballot();
            let mut promoted = false;
            for i in 0..agreeing {
                if let Tally::Quorum(_) = ballot.record(&VoteResponse::agree(1, format!("p{}", i)), peers) {
                    prop_assert!(!promoted, "promoted twice");
                    promoted = true;
                }
            }
            prop_assert_eq!(promoted, agreeing > 0 && agreeing + 1 > peers / 2);
        }
    }
}
