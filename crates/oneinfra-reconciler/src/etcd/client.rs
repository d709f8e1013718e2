use super::{EtcdError, EtcdMember};
use async_trait::async_trait;

/// TLS material for talking to etcd as a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdTls {
    /// PEM pool used to verify the etcd servers
    pub ca_certificate: String,
    pub client_certificate: String,
    pub client_key: String,
}

/// Membership calls on an open etcd connection
///
/// Dropping the client closes the connection.
#[async_trait]
pub trait MembershipClient: Send {
    async fn member_list(&mut self) -> Result<Vec<EtcdMember>, EtcdError>;

    /// Add `peer_url` as a non-voting member; returns the updated list
    async fn member_add_as_learner(&mut self, peer_url: &str) -> Result<Vec<EtcdMember>, EtcdError>;

    async fn member_promote(&mut self, id: u64) -> Result<(), EtcdError>;

    async fn member_remove(&mut self, id: u64) -> Result<(), EtcdError>;
}

/// Opens membership clients against a set of client endpoints
#[async_trait]
pub trait EtcdConnector: Send + Sync {
    async fn connect(
        &self,
        endpoints: &[String],
        tls: &EtcdTls,
    ) -> Result<Box<dyn MembershipClient>, EtcdError>;
}
