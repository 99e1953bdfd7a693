//! Leader elector: timer-driven role transitions for one node.
//!
//! State machine: Follower → PreCandidate → Candidate → Leader
//! - Election timer fires: become pre-candidate, solicit pre-votes for
//!   `term + 1`, rearm with a fresh random delay
//! - Pre-vote quorum: bump the term, become candidate, solicit votes
//! - Vote quorum: become leader, stop the election timer, start heartbeats
//! - Leader traffic or a newer term: step down to follower and invalidate
//!   every in-flight collector
//!
//! The timers are the only retry driver. Every role or term change happens
//! under a single transition lock, which is never held across a transport
//! call.

use crate::collector::Collector;
use crate::config::ElectionConfig;
use crate::error::ElectionError;
use crate::pre_vote::PreVoteCollector;
use crate::state::NodeState;
use crate::timeout::{DelayTimeout, FixedTimeout};
use crate::transport::Transport;
use crate::types::{Heartbeat, NodeId, Role, Term, VoteRequest, VoteResponse};
use crate::vote::VoteCollector;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub(crate) struct ElectorCore {
    config: ElectionConfig,
    state: Arc<NodeState>,
    transport: Arc<dyn Transport>,
    election_timer: DelayTimeout,
    heartbeat_timer: FixedTimeout,
    /// Non-owning handles to in-flight collectors, used only to cancel them
    collectors: Mutex<Vec<Weak<dyn Collector>>>,
    transition: Mutex<()>,
    rng: Mutex<StdRng>,
    last_leader_contact: Mutex<Option<Instant>>,
    shutdown: AtomicBool,
}

/// Handle to a node's election machinery. Cheap to clone.
#[derive(Clone)]
pub struct Elector {
    core: Arc<ElectorCore>,
}

/// Non-owning elector handle
#[derive(Clone)]
pub struct WeakElector(Weak<ElectorCore>);

impl WeakElector {
    pub fn upgrade(&self) -> Option<Elector> {
        self.0.upgrade().map(|core| Elector { core })
    }
}

impl Elector {
    /// Build an elector and prepare (but do not arm) its timers.
    ///
    /// Must be called from within a tokio runtime; timer tasks are spawned
    /// on it.
    pub fn new(
        config: ElectionConfig,
        state: Arc<NodeState>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ElectionError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ElectionError::NoRuntime)?;

        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let initial_timeout = config.random_election_timeout(&mut rng);
        let heartbeat_interval = config.heartbeat_interval();

        let core = Arc::new_cyclic(|weak: &Weak<ElectorCore>| {
            let on_election = weak.clone();
            let on_heartbeat = weak.clone();

            ElectorCore {
                election_timer: DelayTimeout::new(
                    "election",
                    initial_timeout,
                    runtime.clone(),
                    move || {
                        if let Some(core) = on_election.upgrade() {
                            core.on_election_timeout();
                        }
                    },
                ),
                heartbeat_timer: FixedTimeout::new(
                    "heartbeat",
                    heartbeat_interval,
                    runtime,
                    move || {
                        if let Some(core) = on_heartbeat.upgrade() {
                            core.on_heartbeat_due();
                        }
                    },
                ),
                config,
                state,
                transport,
                collectors: Mutex::new(Vec::new()),
                transition: Mutex::new(()),
                rng: Mutex::new(rng),
                last_leader_contact: Mutex::new(None),
                shutdown: AtomicBool::new(false),
            }
        });

        Ok(Self { core })
    }

    /// Arm the election timer with the initial random delay
    pub fn init(&self) {
        debug!("Election: {} initialized", self.id());
        self.core.election_timer.restart();
    }

    /// Rearm the election timer
    pub fn start(&self) {
        info!(
            "Election: {} starting as {} in term {}",
            self.id(),
            self.role(),
            self.current_term()
        );
        self.core.election_timer.restart();
    }

    /// Stop both timers and invalidate in-flight collectors. Timer tasks
    /// already running will not rearm.
    pub fn shutdown(&self) {
        info!("Election: {} shutting down", self.id());
        self.core.shutdown.store(true, Ordering::Release);
        let _transition = self.core.transition.lock();
        self.core.election_timer.cancel();
        self.core.heartbeat_timer.cancel();
        self.core.disable_collectors();
    }

    /// Step down in favor of `leader_id` at `term`. The caller has already
    /// checked that `term` is not stale.
    pub fn become_follower(&self, term: Term, leader_id: impl Into<NodeId>) {
        let _transition = self.core.transition.lock();
        self.core.step_down_locked(term, Some(leader_id.into()));
        self.core.touch_leader_contact();
    }

    /// Take leadership of the current term
    pub fn become_leader(&self) {
        let heartbeat = {
            let _transition = self.core.transition.lock();
            self.core.promote_locked()
        };
        self.core.transport.send_heartbeat(heartbeat);
    }

    /// Fall back to follower and disable every live collector. A leader
    /// stops heartbeating and the election timer is rearmed.
    pub fn cancel_all_collectors(&self) {
        let _transition = self.core.transition.lock();
        self.core.state.set_role(Role::Follower);
        self.core.disable_collectors();
        self.core.heartbeat_timer.cancel();
        self.core.reset_election_timeout();
    }

    /// Entry point for leader traffic (heartbeat or append-entry). Must
    /// return before the append is processed or acknowledged.
    pub fn handle_heartbeat(
        &self,
        term: Term,
        leader_id: impl Into<NodeId>,
    ) -> Result<(), ElectionError> {
        let _transition = self.core.transition.lock();
        let current = self.core.state.current_term();
        if term < current {
            debug!(
                "Election: Ignoring leader traffic for stale term {} (current {})",
                term, current
            );
            return Err(ElectionError::StaleTerm { term, current });
        }
        self.core.step_down_locked(term, Some(leader_id.into()));
        self.core.touch_leader_contact();
        Ok(())
    }

    /// Answer a peer's pre-vote or vote request
    pub fn handle_vote_request(&self, req: &VoteRequest) -> VoteResponse {
        if req.pre_vote {
            self.core.answer_pre_vote(req)
        } else {
            self.core.answer_vote(req)
        }
    }

    /// Adopt `term` if it is newer than ours, stepping down if needed
    pub fn observe_term(&self, term: Term) {
        let _transition = self.core.transition.lock();
        if term > self.core.state.current_term() {
            info!("Election: Observed newer term {}", term);
            self.core.step_down_locked(term, None);
        }
    }

    pub fn id(&self) -> &NodeId {
        self.core.state.self_id()
    }

    pub fn role(&self) -> Role {
        self.core.state.role()
    }

    pub fn current_term(&self) -> Term {
        self.core.state.current_term()
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.core.state.leader_id()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.core.state
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.core.config
    }

    /// Registered collectors that are still alive
    pub fn live_collectors(&self) -> usize {
        self.core
            .collectors
            .lock()
            .iter()
            .filter(|c| c.strong_count() > 0)
            .count()
    }

    pub fn downgrade(&self) -> WeakElector {
        WeakElector(Arc::downgrade(&self.core))
    }

    #[cfg(test)]
    pub(crate) fn trigger_election_timeout(&self) {
        self.core.on_election_timeout();
    }

    #[cfg(test)]
    pub(crate) fn election_timer_armed(&self) -> bool {
        self.core.election_timer.is_armed()
    }

    #[cfg(test)]
    pub(crate) fn heartbeat_timer_armed(&self) -> bool {
        self.core.heartbeat_timer.is_armed()
    }
}

impl ElectorCore {
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn reset_election_timeout(&self) {
        if self.is_shut_down() {
            return;
        }
        let delay = self.config.random_election_timeout(&mut *self.rng.lock());
        self.election_timer.refresh(delay);
    }

    fn touch_leader_contact(&self) {
        *self.last_leader_contact.lock() = Some(Instant::now());
    }

    /// A leader is known and was heard from within the minimum timeout
    fn leader_is_live(&self) -> bool {
        if self.state.role() == Role::Leader {
            return true;
        }
        if self.state.leader_id().is_none() {
            return false;
        }
        let last_contact = *self.last_leader_contact.lock();
        last_contact.map_or(false, |at| at.elapsed() < self.config.election_timeout_min())
    }

    fn register(&self, collector: Arc<dyn Collector>) {
        let mut collectors = self.collectors.lock();
        collectors.retain(|c| c.strong_count() > 0);
        collectors.push(Arc::downgrade(&collector));
    }

    fn disable_collectors(&self) {
        let registered = std::mem::take(&mut *self.collectors.lock());
        for collector in registered.iter().filter_map(|c| c.upgrade()) {
            collector.disable();
        }
    }

    fn on_election_timeout(self: &Arc<Self>) {
        if self.is_shut_down() {
            return;
        }

        let collector = {
            let _transition = self.transition.lock();
            let role = self.state.role();
            if role == Role::Leader {
                debug!("Election: Ignoring election timeout as leader");
                return;
            }

            self.disable_collectors();
            self.state.set_role(Role::PreCandidate);
            let collector = Arc::new(PreVoteCollector::new(
                Arc::clone(&self.state),
                Arc::downgrade(self),
            ));
            self.register(collector.clone());
            self.reset_election_timeout();

            info!(
                "Election: Timeout as {} in term {}, soliciting pre-votes for term {}",
                role,
                self.state.current_term(),
                collector.target_term()
            );
            collector
        };

        self.transport.broadcast_pre_vote(Arc::clone(&collector));
        collector.check_quorum();
    }

    pub(crate) fn on_pre_vote_quorum(self: &Arc<Self>, target: Term) {
        if self.is_shut_down() {
            return;
        }

        let collector = {
            let _transition = self.transition.lock();
            let role = self.state.role();
            if role != Role::PreCandidate
                || !self.state.compare_and_set_term(target.saturating_sub(1), target)
            {
                warn!(
                    "Election: Discarding pre-vote quorum for term {} (now {} in term {})",
                    target,
                    role,
                    self.state.current_term()
                );
                return;
            }

            self.state.set_role(Role::Candidate);
            self.state.try_vote(target, self.state.self_id());
            let collector = Arc::new(VoteCollector::new(
                Arc::clone(&self.state),
                Arc::downgrade(self),
            ));
            self.register(collector.clone());
            self.reset_election_timeout();

            info!("Election: Starting election for term {}", target);
            collector
        };

        self.transport.broadcast_vote(Arc::clone(&collector));
        collector.check_quorum();
    }

    pub(crate) fn on_vote_quorum(&self, target: Term) {
        if self.is_shut_down() {
            return;
        }

        let heartbeat = {
            let _transition = self.transition.lock();
            let role = self.state.role();
            let current = self.state.current_term();
            if role != Role::Candidate || current != target {
                warn!(
                    "Election: Discarding vote quorum for term {} (now {} in term {})",
                    target, role, current
                );
                return;
            }
            self.promote_locked()
        };

        self.transport.send_heartbeat(heartbeat);
    }

    /// Caller holds the transition lock
    fn promote_locked(&self) -> Heartbeat {
        let self_id = self.state.self_id().clone();
        self.state.set_leader_id(Some(self_id.clone()));
        self.state.set_role(Role::Leader);
        self.disable_collectors();
        self.election_timer.cancel();
        if !self.is_shut_down() {
            self.heartbeat_timer.refresh();
        }

        let term = self.state.current_term();
        info!("Election: {} is leader for term {}", self_id, term);
        Heartbeat {
            term,
            leader_id: self_id,
        }
    }

    /// Caller holds the transition lock
    fn step_down_locked(&self, term: Term, leader_id: Option<NodeId>) {
        let previous_role = self.state.set_role(Role::Follower);
        let previous_term = self.state.advance_term(term);
        let leader_changed = self.state.leader_id() != leader_id;
        self.state.set_leader_id(leader_id);
        self.disable_collectors();
        self.heartbeat_timer.cancel();
        self.reset_election_timeout();

        if previous_role != Role::Follower || previous_term < term || leader_changed {
            info!(
                "Election: Follower in term {} (was {} in term {}, leader {:?})",
                self.state.current_term(),
                previous_role,
                previous_term,
                self.state.leader_id()
            );
        }
    }

    fn on_heartbeat_due(&self) {
        if self.is_shut_down() {
            return;
        }

        let heartbeat = {
            let _transition = self.transition.lock();
            if self.state.role() != Role::Leader {
                debug!("Election: Heartbeat timer fired after losing leadership");
                return;
            }
            self.heartbeat_timer.refresh();
            Heartbeat {
                term: self.state.current_term(),
                leader_id: self.state.self_id().clone(),
            }
        };

        self.transport.send_heartbeat(heartbeat);
    }

    fn answer_pre_vote(&self, req: &VoteRequest) -> VoteResponse {
        let self_id = self.state.self_id().clone();
        let current = self.state.current_term();

        if req.term > current && !self.leader_is_live() {
            debug!(
                "Election: Agreeing to pre-vote from {} for term {}",
                req.candidate_id, req.term
            );
            VoteResponse::agree(req.term, self_id)
        } else {
            debug!(
                "Election: Rejecting pre-vote from {} for term {} (current {})",
                req.candidate_id, req.term, current
            );
            VoteResponse::reject(current, self_id)
        }
    }

    fn answer_vote(&self, req: &VoteRequest) -> VoteResponse {
        let self_id = self.state.self_id().clone();
        let _transition = self.transition.lock();
        let current = self.state.current_term();

        if req.term < current {
            debug!(
                "Election: Rejecting vote for {} (stale term {})",
                req.candidate_id, req.term
            );
            return VoteResponse::reject(current, self_id);
        }
        if req.term > current {
            self.step_down_locked(req.term, None);
        }

        if self.state.try_vote(req.term, &req.candidate_id) {
            self.reset_election_timeout();
            info!(
                "Election: Granting vote to {} for term {}",
                req.candidate_id, req.term
            );
            VoteResponse::agree(req.term, self_id)
        } else {
            debug!(
                "Election: Rejecting vote for {} in term {} (already voted for {:?})",
                req.candidate_id,
                req.term,
                self.state.voted_for(req.term)
            );
            VoteResponse::reject(self.state.current_term(), self_id)
        }
    }
}
