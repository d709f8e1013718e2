//! etcd membership: the client seam, its gRPC and in-memory implementations
//! and the learner/promotion/removal state machine built on top of them.

mod client;
mod fake;
mod grpc;
mod membership;

pub use client::{EtcdConnector, EtcdTls, MembershipClient};
pub use fake::{EtcdCall, FakeEtcd};
pub use grpc::GrpcEtcdConnector;
pub use membership::Membership;

use thiserror::Error;

/// One entry of the live membership list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdMember {
    pub id: u64,
    /// Empty until the member has started and published its name
    pub name: String,
    pub peer_urls: Vec<String>,
    pub client_urls: Vec<String>,
    pub is_learner: bool,
}

/// Where a peer URL stands in a membership list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    NotMember,
    Learner { id: u64 },
    Voter { id: u64 },
}

/// Whether `member` is the member advertising exactly `peer_url`
pub fn is_member_for(member: &EtcdMember, peer_url: &str) -> bool {
    !member.peer_urls.is_empty() && member.peer_urls.iter().all(|url| url == peer_url)
}

/// Locate the member whose peer-URL set is exactly `{peer_url}`
///
/// Names and IDs are not used: a learner that has not started yet has no
/// name, and IDs are only known after the fact.
pub fn member_status(members: &[EtcdMember], peer_url: &str) -> MemberStatus {
    match members.iter().find(|m| is_member_for(m, peer_url)) {
        None => MemberStatus::NotMember,
        Some(m) if m.is_learner => MemberStatus::Learner { id: m.id },
        Some(m) => MemberStatus::Voter { id: m.id },
    }
}

/// Errors returned by a membership client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EtcdError {
    #[error("deadline exceeded: {message}")]
    DeadlineExceeded { message: String },

    #[error("member {id:x} not found")]
    MemberNotFound { id: u64 },

    #[error("etcd unavailable: {message}")]
    Unavailable { message: String },

    #[error("request rejected: {message}")]
    Rejected { message: String },
}

impl EtcdError {
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, peer_urls: &[&str], is_learner: bool) -> EtcdMember {
        EtcdMember {
            id,
            name: String::new(),
            peer_urls: peer_urls.iter().map(|u| u.to_string()).collect(),
            client_urls: vec![],
            is_learner,
        }
    }

    #[test]
    fn test_member_status_by_peer_url() {
        let members = vec![
            member(1, &["https://10.0.0.1:30000"], false),
            member(2, &["https://10.0.0.2:30000"], true),
        ];

        assert_eq!(
            member_status(&members, "https://10.0.0.1:30000"),
            MemberStatus::Voter { id: 1 }
        );
        assert_eq!(
            member_status(&members, "https://10.0.0.2:30000"),
            MemberStatus::Learner { id: 2 }
        );
        assert_eq!(
            member_status(&members, "https://10.0.0.3:30000"),
            MemberStatus::NotMember
        );
    }

    #[test]
    fn test_correlation_requires_exact_set() {
        let url = "https://10.0.0.1:30000";

        // a superset is a different member
        let superset = member(1, &[url, "https://10.0.0.9:30000"], false);
        assert!(!is_member_for(&superset, url));

        // duplicates still form the singleton set
        let duplicated = member(2, &[url, url], false);
        assert!(is_member_for(&duplicated, url));

        let empty = member(3, &[], false);
        assert!(!is_member_for(&empty, url));

        // a prefix of the port is not a match
        assert_eq!(
            member_status(&[member(4, &["https://10.0.0.1:3000"], false)], url),
            MemberStatus::NotMember
        );
    }
}
