//! Error types

use crate::types::{NodeId, Term};
use thiserror::Error;

/// Errors surfaced by the public election API
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("Invalid election config: {0}")]
    InvalidConfig(String),

    #[error("No tokio runtime available to drive election timers")]
    NoRuntime,

    #[error("Stale term {term} (current term is {current})")]
    StaleTerm { term: Term, current: Term },

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure delivering a (pre-)vote request, reported through a collector's error callback
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Peer {0} is unreachable")]
    Unreachable(NodeId),

    #[error("Peer {0} is not registered")]
    UnknownPeer(NodeId),

    #[error("Transport closed")]
    Closed,
}
