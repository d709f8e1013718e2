use super::{EtcdConnector, EtcdError, EtcdMember, EtcdTls, MembershipClient};
use async_trait::async_trait;
use etcd_client::{
    Certificate, Client, ConnectOptions, Identity, Member, MemberAddOptions, TlsOptions,
};
use std::time::Duration;
use tracing::debug;

/// Connector backed by the etcd gRPC API over mutual TLS
#[derive(Debug, Clone)]
pub struct GrpcEtcdConnector {
    dial_timeout: Duration,
    request_timeout: Duration,
}

impl GrpcEtcdConnector {
    pub fn new(dial_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            request_timeout,
        }
    }
}

#[async_trait]
impl EtcdConnector for GrpcEtcdConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        tls: &EtcdTls,
    ) -> Result<Box<dyn MembershipClient>, EtcdError> {
        if endpoints.is_empty() {
            return Err(EtcdError::unavailable("no client endpoints"));
        }

        let tls_options = TlsOptions::new()
            .ca_certificate(Certificate::from_pem(tls.ca_certificate.as_bytes()))
            .identity(Identity::from_pem(
                tls.client_certificate.as_bytes(),
                tls.client_key.as_bytes(),
            ));
        let options = ConnectOptions::new()
            .with_connect_timeout(self.dial_timeout)
            .with_timeout(self.request_timeout)
            .with_tls(tls_options);

        debug!("Connecting to etcd at {:?}", endpoints);
        let client = Client::connect(endpoints.to_vec(), Some(options))
            .await
            .map_err(classify)?;

        Ok(Box::new(GrpcMembershipClient { client }))
    }
}

struct GrpcMembershipClient {
    client: Client,
}

#[async_trait]
impl MembershipClient for GrpcMembershipClient {
    async fn member_list(&mut self) -> Result<Vec<EtcdMember>, EtcdError> {
        let response = self.client.member_list(None).await.map_err(classify)?;
        Ok(response.members().iter().map(to_member).collect())
    }

    async fn member_add_as_learner(&mut self, peer_url: &str) -> Result<Vec<EtcdMember>, EtcdError> {
        let options = MemberAddOptions::new().with_is_learner();
        let response = self
            .client
            .member_add(vec![peer_url.to_string()], Some(options))
            .await
            .map_err(classify)?;
        Ok(response.member_list().iter().map(to_member).collect())
    }

    async fn member_promote(&mut self, id: u64) -> Result<(), EtcdError> {
        self.client.member_promote(id).await.map_err(classify)?;
        Ok(())
    }

    async fn member_remove(&mut self, id: u64) -> Result<(), EtcdError> {
        match self.client.member_remove(id).await {
            Ok(_) => Ok(()),
            Err(e) => match classify(e) {
                EtcdError::Rejected { message } if message.contains("member not found") => {
                    Err(EtcdError::MemberNotFound { id })
                }
                other => Err(other),
            },
        }
    }
}

fn to_member(member: &Member) -> EtcdMember {
    EtcdMember {
        id: member.id(),
        name: member.name().to_string(),
        peer_urls: member.peer_urls().to_vec(),
        client_urls: member.client_urls().to_vec(),
        is_learner: member.is_learner(),
    }
}

/// Map a client error onto the cases the membership loops distinguish
fn classify(error: etcd_client::Error) -> EtcdError {
    let message = error.to_string();
    let lower = message.to_lowercase();

    if lower.contains("deadline") {
        EtcdError::deadline_exceeded(message)
    } else if matches!(
        error,
        etcd_client::Error::TransportError(_) | etcd_client::Error::IoError(_)
    ) || lower.contains("unavailable")
        || lower.contains("connect")
    {
        EtcdError::unavailable(message)
    } else {
        EtcdError::rejected(message)
    }
}
