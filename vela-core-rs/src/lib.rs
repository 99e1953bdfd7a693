//! Vela Core Library
//!
//! Leader election for a replicated-log cluster. A node that stops hearing
//! from a leader first probes its peers with a pre-vote for the next term,
//! and only bumps its term and asks for binding votes once a majority
//! agrees. Partitioned nodes therefore cannot inflate the cluster's term.

pub mod collector;
pub mod config;
pub mod elector;
pub mod error;
pub mod pre_vote;
pub mod state;
pub mod timeout;
pub mod transport;
pub mod types;
pub mod vote;

pub use collector::{has_quorum, Collector};
pub use config::ElectionConfig;
pub use elector::{Elector, WeakElector};
pub use error::{ElectionError, TransportError};
pub use pre_vote::PreVoteCollector;
pub use state::NodeState;
pub use transport::{LocalNetwork, Transport};
pub use types::*;
pub use vote::VoteCollector;
