use crate::error::{OneinfraError, Result};
use crate::pki::{Certificate, CertificateAuthority};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct KubeConfig<'a> {
    #[serde(rename = "apiVersion")]
    api_version: &'a str,
    kind: &'a str,
    clusters: Vec<NamedCluster<'a>>,
    users: Vec<NamedUser<'a>>,
    contexts: Vec<NamedContext<'a>>,
    current_context: &'a str,
}

#[derive(Serialize)]
struct NamedCluster<'a> {
    name: &'a str,
    cluster: ClusterEntry<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry<'a> {
    server: &'a str,
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct NamedUser<'a> {
    name: &'a str,
    user: UserEntry,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    client_certificate_data: String,
    client_key_data: String,
}

#[derive(Serialize)]
struct NamedContext<'a> {
    name: &'a str,
    context: ContextEntry<'a>,
}

#[derive(Serialize)]
struct ContextEntry<'a> {
    cluster: &'a str,
    user: &'a str,
}

/// Render a kubeconfig for `identity` authenticating with `certificate`
pub fn render(
    cluster_name: &str,
    server_url: &str,
    server_ca: &CertificateAuthority,
    identity: &str,
    certificate: &Certificate,
) -> Result<String> {
    let config = KubeConfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![NamedCluster {
            name: cluster_name,
            cluster: ClusterEntry {
                server: server_url,
                certificate_authority_data: STANDARD.encode(&server_ca.certificate),
            },
        }],
        users: vec![NamedUser {
            name: identity,
            user: UserEntry {
                client_certificate_data: STANDARD.encode(&certificate.certificate),
                client_key_data: STANDARD.encode(&certificate.private_key),
            },
        }],
        contexts: vec![NamedContext {
            name: cluster_name,
            context: ContextEntry {
                cluster: cluster_name,
                user: identity,
            },
        }],
        current_context: cluster_name,
    };

    serde_yaml::to_string(&config).map_err(|e| {
        OneinfraError::serialization_error(
            format!("Failed to render kubeconfig for {}: {}", identity, e),
            Some(Box::new(e)),
        )
    })
}
