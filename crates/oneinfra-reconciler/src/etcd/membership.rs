use super::{is_member_for, member_status, EtcdConnector, EtcdMember, EtcdTls, MemberStatus};
use crate::config::EtcdConfig;
use crate::error::Result;
use crate::retry::Attempt;
use tracing::{debug, info};

/// Membership operations on behalf of one etcd member
///
/// Every attempt opens its own connection and re-reads the live member
/// list; nothing about the cluster is remembered between attempts.
pub struct Membership<'a> {
    connector: &'a dyn EtcdConnector,
    config: &'a EtcdConfig,
    tls: EtcdTls,
    /// Name used in logs and errors, e.g. "tenant/prod/cp-1"
    member: String,
}

impl<'a> Membership<'a> {
    pub fn new(
        connector: &'a dyn EtcdConnector,
        config: &'a EtcdConfig,
        tls: EtcdTls,
        member: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            config,
            tls,
            member: member.into(),
        }
    }

    /// Single best-effort read of the member list through `endpoints`
    ///
    /// Returns `None` when no endpoint answers within the dial and request
    /// timeouts, or when the answer is an empty list.
    pub async fn observe(&self, endpoints: &[String]) -> Option<Vec<EtcdMember>> {
        if endpoints.is_empty() {
            return None;
        }

        let read = async {
            let mut client = self.connector.connect(endpoints, &self.tls).await?;
            client.member_list().await
        };
        let budget = self.config.dial_timeout + self.config.request_timeout;

        match tokio::time::timeout(budget, read).await {
            Ok(Ok(members)) if !members.is_empty() => Some(members),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!(member = %self.member, error = %e, "membership list not observable");
                None
            }
            Err(_) => {
                debug!(member = %self.member, "membership list read timed out");
                None
            }
        }
    }

    /// Ensure `peer_url` is a member, adding it as a learner if absent.
    /// Returns the member list as seen right after the add.
    pub async fn add_learner(&self, endpoints: &[String], peer_url: &str) -> Result<Vec<EtcdMember>> {
        self.config
            .learner_add
            .run("learner-add", &self.member, |_| async move {
                let mut client = self.connector.connect(endpoints, &self.tls).await?;
                let members = client.member_list().await?;
                if member_status(&members, peer_url) != MemberStatus::NotMember {
                    return Ok(Attempt::Done(members));
                }

                let members = client.member_add_as_learner(peer_url).await?;
                info!(member = %self.member, peer_url, "added etcd learner");
                Ok(Attempt::Done(members))
            })
            .await
    }

    /// Promote the learner advertising `peer_url` to a voting member
    ///
    /// Already being a voter is success without any promote call. The
    /// promote request goes through the other members' client URLs.
    pub async fn promote(&self, endpoints: &[String], peer_url: &str) -> Result<()> {
        self.config
            .promotion
            .run("promotion", &self.member, |_| async move {
                let members = {
                    let mut client = self.connector.connect(endpoints, &self.tls).await?;
                    client.member_list().await?
                };

                let id = match member_status(&members, peer_url) {
                    MemberStatus::Voter { .. } => return Ok(Attempt::Done(())),
                    MemberStatus::NotMember => {
                        return Ok(Attempt::Pending(format!("{} is not listed", peer_url)))
                    }
                    MemberStatus::Learner { id } => id,
                };

                let others: Vec<String> = members
                    .iter()
                    .filter(|m| !is_member_for(m, peer_url))
                    .flat_map(|m| m.client_urls.iter().cloned())
                    .collect();
                if others.is_empty() {
                    return Ok(Attempt::Pending(
                        "no other member publishes a client URL".to_string(),
                    ));
                }

                let mut client = self.connector.connect(&others, &self.tls).await?;
                client.member_promote(id).await?;
                info!(member = %self.member, id, "promoted etcd learner");
                Ok(Attempt::Done(()))
            })
            .await
    }

    /// Remove the member advertising `peer_url`
    ///
    /// Each attempt re-resolves the member ID. The loop only ends once a
    /// list no longer shows the member; "member not found" on remove counts
    /// as removed.
    pub async fn remove(&self, endpoints: &[String], peer_url: &str) -> Result<()> {
        self.config
            .removal
            .run("removal", &self.member, |_| async move {
                let mut client = self.connector.connect(endpoints, &self.tls).await?;
                let members = client.member_list().await?;

                let id = match member_status(&members, peer_url) {
                    MemberStatus::NotMember => return Ok(Attempt::Done(())),
                    MemberStatus::Learner { id } | MemberStatus::Voter { id } => id,
                };

                match client.member_remove(id).await {
                    Ok(()) => {
                        info!(member = %self.member, id, "removed etcd member");
                    }
                    Err(super::EtcdError::MemberNotFound { .. }) => {
                        debug!(member = %self.member, "member already removed");
                    }
                    Err(e) => return Err(e),
                }
                Ok(Attempt::Pending(format!("waiting for {} to leave the member list", peer_url)))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use crate::etcd::{EtcdCall, FakeEtcd};
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    const A_PEER: &str = "https://10.0.0.1:30000";
    const A_CLIENT: &str = "https://10.0.0.1:30001";
    const B_PEER: &str = "https://10.0.0.2:30000";
    const B_CLIENT: &str = "https://10.0.0.2:30001";
    const C_PEER: &str = "https://10.0.0.3:30000";
    const C_CLIENT: &str = "https://10.0.0.3:30001";
    const D_PEER: &str = "https://10.0.0.4:30000";

    fn tls() -> EtcdTls {
        EtcdTls {
            ca_certificate: "ca".to_string(),
            client_certificate: "cert".to_string(),
            client_key: "key".to_string(),
        }
    }

    fn config() -> EtcdConfig {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5));
        EtcdConfig {
            dial_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            learner_add: policy,
            promotion: policy,
            removal: policy,
        }
    }

    fn three_voters() -> FakeEtcd {
        let etcd = FakeEtcd::new();
        etcd.add_voter("cp-a", A_PEER, A_CLIENT);
        etcd.add_voter("cp-b", B_PEER, B_CLIENT);
        etcd.add_voter("cp-c", C_PEER, C_CLIENT);
        etcd
    }

    fn endpoints() -> Vec<String> {
        vec![A_CLIENT.to_string(), B_CLIENT.to_string(), C_CLIENT.to_string()]
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_learner_then_promote() {
        let etcd = three_voters();
        let config = config();
        let membership = Membership::new(&etcd, &config, tls(), "ns/c1/cp-d");

        let members = membership.add_learner(&endpoints(), D_PEER).await.unwrap();
        assert_eq!(
            member_status(&members, D_PEER),
            MemberStatus::Learner { id: members[3].id }
        );

        etcd.reject_promotions(2);
        membership.promote(&endpoints(), D_PEER).await.unwrap();
        assert!(matches!(
            member_status(&etcd.members(), D_PEER),
            MemberStatus::Voter { .. }
        ));

        // the promote call never targets the learner's own endpoint
        let calls = etcd.calls();
        assert!(calls.iter().all(|c| match c {
            EtcdCall::Connect { endpoints } => endpoints.iter().all(|e| !e.starts_with("https://10.0.0.4")),
            _ => true,
        }));
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, EtcdCall::MemberPromote { .. }))
                .count(),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_learner_is_idempotent() {
        let etcd = three_voters();
        let config = config();
        let membership = Membership::new(&etcd, &config, tls(), "ns/c1/cp-d");

        membership.add_learner(&endpoints(), D_PEER).await.unwrap();
        membership.add_learner(&endpoints(), D_PEER).await.unwrap();

        let adds = etcd
            .calls()
            .into_iter()
            .filter(|c| matches!(c, EtcdCall::MemberAddAsLearner { .. }))
            .count();
        assert_eq!(adds, 1);
        assert_eq!(etcd.members().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promote_voter_issues_no_promote_call() {
        let etcd = three_voters();
        let config = config();
        let membership = Membership::new(&etcd, &config, tls(), "ns/c1/cp-a");

        membership.promote(&endpoints(), A_PEER).await.unwrap();

        assert!(!etcd
            .calls()
            .iter()
            .any(|c| matches!(c, EtcdCall::MemberPromote { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_retried_across_stale_lists() {
        let etcd = three_voters();
        etcd.set_stale_lists_after_remove(3);
        let config = config();
        let membership = Membership::new(&etcd, &config, tls(), "ns/c1/cp-c");

        let survivors = vec![A_CLIENT.to_string(), B_CLIENT.to_string()];
        membership.remove(&survivors, C_PEER).await.unwrap();

        let calls = etcd.calls();
        let removes = calls
            .iter()
            .filter(|c| matches!(c, EtcdCall::MemberRemove { .. }))
            .count();
        let lists = calls.iter().filter(|c| **c == EtcdCall::MemberList).count();
        // one real remove, three against stale lists, then a list without it
        assert_eq!(removes, 4);
        assert_eq!(lists, 5);
        assert_eq!(member_status(&etcd.members(), C_PEER), MemberStatus::NotMember);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_absent_member_is_success() {
        let etcd = three_voters();
        let config = config();
        let membership = Membership::new(&etcd, &config, tls(), "ns/c1/cp-d");

        membership.remove(&endpoints(), D_PEER).await.unwrap();
        assert!(!etcd
            .calls()
            .iter()
            .any(|c| matches!(c, EtcdCall::MemberRemove { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_exhaustion() {
        let etcd = three_voters();
        let config = config();
        let membership = Membership::new(&etcd, &config, tls(), "ns/c1/cp-d");

        membership.add_learner(&endpoints(), D_PEER).await.unwrap();
        etcd.reject_promotions(100);

        let err = membership.promote(&endpoints(), D_PEER).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::MembershipExhausted { attempts: 10, ref member, .. } if member == "ns/c1/cp-d"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_removal() {
        let etcd = three_voters();
        etcd.fail_with_deadline(1);
        let config = config();
        let membership = Membership::new(&etcd, &config, tls(), "ns/c1/cp-c");

        let err = membership.remove(&endpoints(), C_PEER).await.unwrap_err();
        assert!(matches!(err, ReconcileError::DeadlineExceeded { .. }));
        assert_eq!(etcd.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_cluster_hits_attempt_timeout() {
        let etcd = three_voters();
        etcd.set_hang(true);
        let config = config();
        let membership = Membership::new(&etcd, &config, tls(), "ns/c1/cp-d");

        let err = membership.add_learner(&endpoints(), D_PEER).await.unwrap_err();
        assert!(matches!(err, ReconcileError::DeadlineExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_unreachable_or_empty() {
        let config = config();

        let empty = FakeEtcd::new();
        let membership = Membership::new(&empty, &config, tls(), "ns/c1/cp-a");
        assert!(membership.observe(&endpoints()).await.is_none());
        assert!(membership.observe(&[]).await.is_none());

        let down = three_voters();
        down.set_unreachable(true);
        let membership = Membership::new(&down, &config, tls(), "ns/c1/cp-a");
        assert!(membership.observe(&endpoints()).await.is_none());

        let up = three_voters();
        let membership = Membership::new(&up, &config, tls(), "ns/c1/cp-a");
        assert_eq!(membership.observe(&endpoints()).await.map(|m| m.len()), Some(3));
    }
}
