//! Core types for the Vela election protocol

use serde::{Deserialize, Serialize};

/// Unique identifier for a cluster node
pub type NodeId = String;

/// Election epoch. At most one leader exists per term.
pub type Term = u64;

/// Role of a node in the election state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Passive participant, follows the known leader
    Follower,
    /// Probing for support before bumping the term
    PreCandidate,
    /// Term incremented, soliciting binding votes
    Candidate,
    /// Won the election for the current term
    Leader,
}

impl Default for Role {
    fn default() -> Self {
        Role::Follower
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::PreCandidate => write!(f, "pre-candidate"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Answer a peer gives to a (pre-)vote solicitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteResult {
    Agree,
    Reject,
}

/// Solicitation broadcast by a pre-candidate or candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    /// Term the sender wants agreement for
    pub term: Term,
    pub candidate_id: NodeId,
    /// Non-binding probe; the sender has not incremented its term
    pub pre_vote: bool,
}

/// Answer to a [`VoteRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub result: VoteResult,
    pub voter_id: NodeId,
}

impl VoteResponse {
    pub fn agree(term: Term, voter_id: impl Into<NodeId>) -> Self {
        Self {
            term,
            result: VoteResult::Agree,
            voter_id: voter_id.into(),
        }
    }

    pub fn reject(term: Term, voter_id: impl Into<NodeId>) -> Self {
        Self {
            term,
            result: VoteResult::Reject,
            voter_id: voter_id.into(),
        }
    }

    pub fn is_agree(&self) -> bool {
        self.result == VoteResult::Agree
    }
}

/// Leader heartbeat (empty append-entry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub term: Term,
    pub leader_id: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_role_is_follower() {
        assert_eq!(Role::default(), Role::Follower);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::PreCandidate.to_string(), "pre-candidate");
        assert_eq!(Role::Leader.to_string(), "leader");
    }

    #[test]
    fn test_vote_response_constructors() {
        let yes = VoteResponse::agree(3, "b");
        assert!(yes.is_agree());
        assert_eq!(yes.term, 3);
        assert_eq!(yes.voter_id, "b");

        let no = VoteResponse::reject(4, "c");
        assert!(!no.is_agree());
        assert_eq!(no.result, VoteResult::Reject);
    }

    #[test]
    fn test_message_serialization() {
        let req = VoteRequest {
            term: 2,
            candidate_id: "a".to_string(),
            pre_vote: true,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"term":2,"candidate_id":"a","pre_vote":true}"#);
        assert_eq!(serde_json::from_str::<VoteRequest>(&json).unwrap(), req);

        let resp = VoteResponse::agree(2, "b");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""result":"agree""#));
        assert_eq!(serde_json::from_str::<VoteResponse>(&json).unwrap(), resp);

        let hb = Heartbeat {
            term: 5,
            leader_id: "c".to_string(),
        };
        let json = serde_json::to_string(&hb).unwrap();
        assert_eq!(serde_json::from_str::<Heartbeat>(&json).unwrap(), hb);

        assert_eq!(
            serde_json::to_string(&Role::PreCandidate).unwrap(),
            r#""pre_candidate""#
        );
        assert_eq!(
            serde_json::from_str::<VoteResult>(r#""reject""#).unwrap(),
            VoteResult::Reject
        );
    }
}
