use super::{is_member_for, EtcdConnector, EtcdError, EtcdMember, EtcdTls, MembershipClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// A call received by [`FakeEtcd`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtcdCall {
    Connect { endpoints: Vec<String> },
    MemberList,
    MemberAddAsLearner { peer_url: String },
    MemberPromote { id: u64 },
    MemberRemove { id: u64 },
}

#[derive(Default)]
struct FakeState {
    members: Vec<EtcdMember>,
    next_id: u64,
    /// Removed members still reported by lagging list calls
    ghosts: Vec<(EtcdMember, u32)>,
    stale_lists_after_remove: u32,
    promote_rejections: u32,
    deadline_errors: u32,
    unreachable: bool,
    hang: bool,
    calls: Vec<EtcdCall>,
}

impl FakeState {
    /// Common gate of every call: record it and apply the failure knobs
    fn enter(&mut self, call: EtcdCall) -> Result<bool, EtcdError> {
        self.calls.push(call);
        if self.hang {
            return Ok(true);
        }
        if self.unreachable {
            return Err(EtcdError::unavailable("connection refused"));
        }
        if self.deadline_errors > 0 {
            self.deadline_errors -= 1;
            return Err(EtcdError::deadline_exceeded("context deadline exceeded"));
        }
        Ok(false)
    }
}

/// In-memory etcd cluster for exercising the membership state machine
///
/// Clones share the same cluster. Learners are added without a name, like a
/// real member that has not started yet.
#[derive(Clone, Default)]
pub struct FakeEtcd {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEtcd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a started voting member
    pub fn add_voter(&self, name: &str, peer_url: &str, client_url: &str) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = 0x1000 + state.next_id;
        state.members.push(EtcdMember {
            id,
            name: name.to_string(),
            peer_urls: vec![peer_url.to_string()],
            client_urls: vec![client_url.to_string()],
            is_learner: false,
        });
        id
    }

    /// Simulate the member advertising `peer_url` starting up
    pub fn start_member(&self, peer_url: &str, name: &str, client_url: &str) {
        let mut state = self.state.lock();
        if let Some(member) = state.members.iter_mut().find(|m| is_member_for(m, peer_url)) {
            member.name = name.to_string();
            member.client_urls = vec![client_url.to_string()];
        }
    }

    pub fn members(&self) -> Vec<EtcdMember> {
        self.state.lock().members.clone()
    }

    pub fn calls(&self) -> Vec<EtcdCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Keep reporting a removed member in the next `lists` list calls
    pub fn set_stale_lists_after_remove(&self, lists: u32) {
        self.state.lock().stale_lists_after_remove = lists;
    }

    /// Reject the next `count` promotions as "not in sync with the leader"
    pub fn reject_promotions(&self, count: u32) {
        self.state.lock().promote_rejections = count;
    }

    /// Fail the next `count` calls with a deadline error
    pub fn fail_with_deadline(&self, count: u32) {
        self.state.lock().deadline_errors = count;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Never answer any call
    pub fn set_hang(&self, hang: bool) {
        self.state.lock().hang = hang;
    }
}

#[async_trait]
impl EtcdConnector for FakeEtcd {
    async fn connect(
        &self,
        endpoints: &[String],
        _tls: &EtcdTls,
    ) -> Result<Box<dyn MembershipClient>, EtcdError> {
        let hang = self.state.lock().enter(EtcdCall::Connect {
            endpoints: endpoints.to_vec(),
        })?;
        if hang {
            std::future::pending::<()>().await;
        }
        if endpoints.is_empty() {
            return Err(EtcdError::unavailable("no client endpoints"));
        }
        Ok(Box::new(FakeClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClient {
    async fn gate(&self, call: EtcdCall) -> Result<(), EtcdError> {
        let hang = self.state.lock().enter(call)?;
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

fn visible_members(state: &mut FakeState) -> Vec<EtcdMember> {
    let mut members = state.members.clone();
    for (ghost, remaining) in state.ghosts.iter_mut() {
        if *remaining > 0 {
            *remaining -= 1;
            members.push(ghost.clone());
        }
    }
    state.ghosts.retain(|(_, remaining)| *remaining > 0);
    members
}

#[async_trait]
impl MembershipClient for FakeClient {
    async fn member_list(&mut self) -> Result<Vec<EtcdMember>, EtcdError> {
        self.gate(EtcdCall::MemberList).await?;
        Ok(visible_members(&mut self.state.lock()))
    }

    async fn member_add_as_learner(&mut self, peer_url: &str) -> Result<Vec<EtcdMember>, EtcdError> {
        self.gate(EtcdCall::MemberAddAsLearner {
            peer_url: peer_url.to_string(),
        })
        .await?;

        let mut state = self.state.lock();
        if state.members.iter().any(|m| m.peer_urls.iter().any(|u| u == peer_url)) {
            return Err(EtcdError::rejected("peerURL exists"));
        }
        state.next_id += 1;
        let id = 0x1000 + state.next_id;
        state.members.push(EtcdMember {
            id,
            name: String::new(),
            peer_urls: vec![peer_url.to_string()],
            client_urls: vec![],
            is_learner: true,
        });
        debug!("FakeEtcd: added learner {:x} for {}", id, peer_url);
        Ok(state.members.clone())
    }

    async fn member_promote(&mut self, id: u64) -> Result<(), EtcdError> {
        self.gate(EtcdCall::MemberPromote { id }).await?;

        let mut state = self.state.lock();
        if state.promote_rejections > 0 {
            state.promote_rejections -= 1;
            return Err(EtcdError::rejected(
                "can only promote a learner member which is in sync with leader",
            ));
        }
        let member = state
            .members
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(EtcdError::MemberNotFound { id })?;
        if !member.is_learner {
            return Err(EtcdError::rejected("can only promote a learner member"));
        }
        member.is_learner = false;
        debug!("FakeEtcd: promoted {:x}", id);
        Ok(())
    }

    async fn member_remove(&mut self, id: u64) -> Result<(), EtcdError> {
        self.gate(EtcdCall::MemberRemove { id }).await?;

        let mut state = self.state.lock();
        let Some(position) = state.members.iter().position(|m| m.id == id) else {
            return Err(EtcdError::MemberNotFound { id });
        };
        let member = state.members.remove(position);
        let stale = state.stale_lists_after_remove;
        if stale > 0 {
            state.ghosts.push((member, stale));
        }
        debug!("FakeEtcd: removed {:x}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls() -> EtcdTls {
        EtcdTls {
            ca_certificate: String::new(),
            client_certificate: String::new(),
            client_key: String::new(),
        }
    }

    #[tokio::test]
    async fn test_learner_lifecycle() {
        let etcd = FakeEtcd::new();
        etcd.add_voter("a", "https://10.0.0.1:30000", "https://10.0.0.1:30001");

        let mut client = etcd
            .connect(&["https://10.0.0.1:30001".to_string()], &tls())
            .await
            .unwrap();
        let members = client
            .member_add_as_learner("https://10.0.0.4:30000")
            .await
            .unwrap();
        let learner = members.iter().find(|m| m.is_learner).unwrap().clone();
        assert!(learner.name.is_empty());

        client.member_promote(learner.id).await.unwrap();
        assert!(client
            .member_list()
            .await
            .unwrap()
            .iter()
            .all(|m| !m.is_learner));

        client.member_remove(learner.id).await.unwrap();
        assert_eq!(
            client.member_remove(learner.id).await.unwrap_err(),
            EtcdError::MemberNotFound { id: learner.id }
        );
    }

    #[tokio::test]
    async fn test_stale_lists_after_remove() {
        let etcd = FakeEtcd::new();
        let id = etcd.add_voter("a", "https://10.0.0.1:30000", "https://10.0.0.1:30001");
        etcd.add_voter("b", "https://10.0.0.2:30000", "https://10.0.0.2:30001");
        etcd.set_stale_lists_after_remove(2);

        let mut client = etcd
            .connect(&["https://10.0.0.2:30001".to_string()], &tls())
            .await
            .unwrap();
        client.member_remove(id).await.unwrap();

        assert_eq!(client.member_list().await.unwrap().len(), 2);
        assert_eq!(client.member_list().await.unwrap().len(), 2);
        assert_eq!(client.member_list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let etcd = FakeEtcd::new();
        etcd.set_unreachable(true);
        assert!(etcd
            .connect(&["https://10.0.0.1:30001".to_string()], &tls())
            .await
            .is_err());
        assert_eq!(etcd.calls().len(), 1);
    }
}
