//! Transport seam for election RPCs and an in-process network.
//!
//! Broadcasts are fire-and-forget: responses come back later through the
//! collector's [`Collector::on_response`] / [`Collector::on_error`] callbacks,
//! on whatever task the transport delivers them from.

use crate::collector::Collector;
use crate::elector::{Elector, WeakElector};
use crate::error::{ElectionError, TransportError};
use crate::pre_vote::PreVoteCollector;
use crate::types::{Heartbeat, NodeId, VoteResponse};
use crate::vote::VoteCollector;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Outbound side of the election protocol
pub trait Transport: Send + Sync + 'static {
    /// Send the collector's pre-vote request to every peer
    fn broadcast_pre_vote(&self, collector: Arc<PreVoteCollector>);

    /// Send the collector's vote request to every peer
    fn broadcast_vote(&self, collector: Arc<VoteCollector>);

    /// Assert leadership to every follower
    fn send_heartbeat(&self, heartbeat: Heartbeat);
}

struct NetworkInner {
    runtime: Handle,
    latency: Duration,
    nodes: RwLock<HashMap<NodeId, WeakElector>>,
    isolated: RwLock<HashSet<NodeId>>,
    closed: AtomicBool,
}

/// In-process network connecting electors that live in one process.
///
/// Every delivery runs on its own spawned task, so responses from different
/// peers arrive in no particular order. Isolated nodes can neither send nor
/// receive; their vote requests fail through `on_error`.
#[derive(Clone)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

impl LocalNetwork {
    pub fn new(runtime: Handle) -> Self {
        Self::with_latency(runtime, Duration::ZERO)
    }

    /// Network delaying every message by `latency`
    pub fn with_latency(runtime: Handle, latency: Duration) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                runtime,
                latency,
                nodes: RwLock::new(HashMap::new()),
                isolated: RwLock::new(HashSet::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Make `elector` reachable under its node id. The network keeps only a
    /// weak handle.
    pub fn register(&self, elector: &Elector) {
        self.inner
            .nodes
            .write()
            .insert(elector.id().clone(), elector.downgrade());
    }

    /// Cut a node off from every other node
    pub fn isolate(&self, id: &str) {
        warn!("Network: Isolating {}", id);
        self.inner.isolated.write().insert(id.to_string());
    }

    pub fn rejoin(&self, id: &str) {
        warn!("Network: {} rejoined", id);
        self.inner.isolated.write().remove(id);
    }

    pub fn is_isolated(&self, id: &str) -> bool {
        self.inner.isolated.read().contains(id)
    }

    /// Stop delivering. Later vote requests fail with `Closed`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn can_reach(&self, from: &str, to: &str) -> bool {
        let isolated = self.inner.isolated.read();
        !isolated.contains(from) && !isolated.contains(to)
    }

    fn node(&self, id: &str) -> Option<WeakElector> {
        self.inner.nodes.read().get(id).cloned()
    }

    fn peers_of(&self, from: &str) -> Vec<(NodeId, WeakElector)> {
        self.inner
            .nodes
            .read()
            .iter()
            .filter(|(id, _)| id.as_str() != from)
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect()
    }

    fn fan_out(&self, collector: Arc<dyn Collector>) {
        let request = collector.request();
        if self.is_closed() {
            collector.on_error(TransportError::Closed);
            return;
        }
        let sender = self.node(&request.candidate_id);

        for (peer_id, peer) in self.peers_of(&request.candidate_id) {
            let reachable = self.can_reach(&request.candidate_id, &peer_id);
            let collector = Arc::clone(&collector);
            let request = request.clone();
            let sender = sender.clone();
            let latency = self.inner.latency;

            self.inner.runtime.spawn(async move {
                if !latency.is_zero() {
                    sleep(latency).await;
                }
                if !reachable {
                    collector.on_error(TransportError::Unreachable(peer_id));
                    return;
                }
                let Some(peer) = peer.upgrade() else {
                    collector.on_error(TransportError::UnknownPeer(peer_id));
                    return;
                };

                let resp: VoteResponse = peer.handle_vote_request(&request);
                // A rejection from a newer term means the sender is behind
                if !resp.is_agree() && resp.term > request.term {
                    if let Some(sender) = sender.and_then(|s| s.upgrade()) {
                        sender.observe_term(resp.term);
                    }
                }
                collector.on_response(resp);
            });
        }
    }
}

impl Transport for LocalNetwork {
    fn broadcast_pre_vote(&self, collector: Arc<PreVoteCollector>) {
        self.fan_out(collector);
    }

    fn broadcast_vote(&self, collector: Arc<VoteCollector>) {
        self.fan_out(collector);
    }

    fn send_heartbeat(&self, heartbeat: Heartbeat) {
        if self.is_closed() {
            return;
        }
        let sender = self.node(&heartbeat.leader_id);

        for (peer_id, peer) in self.peers_of(&heartbeat.leader_id) {
            if !self.can_reach(&heartbeat.leader_id, &peer_id) {
                debug!("Network: Heartbeat to {} dropped", peer_id);
                continue;
            }
            let heartbeat = heartbeat.clone();
            let sender = sender.clone();
            let latency = self.inner.latency;

            self.inner.runtime.spawn(async move {
                if !latency.is_zero() {
                    sleep(latency).await;
                }
                let Some(peer) = peer.upgrade() else {
                    return;
                };
                match peer.handle_heartbeat(heartbeat.term, heartbeat.leader_id.clone()) {
                    Ok(()) => {}
                    Err(ElectionError::StaleTerm { current, .. }) => {
                        if let Some(sender) = sender.and_then(|s| s.upgrade()) {
                            sender.observe_term(current);
                        }
                    }
                    Err(e) => debug!("Network: Heartbeat to {} failed: {}", peer_id, e),
                }
            });
        }
    }
}
