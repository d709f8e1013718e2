//! Bringing a control-plane component's etcd member up, and taking it out
//! of the cluster again.

use super::pod::etcd_pod;
use super::{ETCD_CLIENT_PORT, ETCD_PEER_PORT};
use crate::component::ReconcileContext;
use crate::error::{ReconcileError, Result};
use crate::etcd::{is_member_for, member_status, EtcdMember, EtcdTls, MemberStatus, Membership};
use oneinfra_core::{
    Cluster, Component, EtcdBootstrap, Hypervisor, InitialClusterMember, InitialClusterState,
    Inquirer, Role,
};
use tracing::{debug, info};

/// A placed control-plane member and its published etcd URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdPeer {
    pub name: String,
    pub peer_url: String,
    pub client_url: String,
}

/// etcd peers of every live control-plane component, in declaration order
///
/// The component under reconciliation is read from `component` rather than
/// the snapshot, so ports allocated moments ago are visible. Fails with a
/// precondition error naming the siblings that are not placed yet.
pub fn peers(inquirer: &dyn Inquirer, component: &Component) -> Result<Vec<EtcdPeer>> {
    let mut peers = Vec::new();
    let mut pending = Vec::new();

    for sibling in inquirer.cluster_components(Role::ControlPlane) {
        let is_self = sibling.name == component.name;
        if sibling.is_deleting() && !is_self {
            continue;
        }
        let (member, hypervisor) = if is_self {
            (component, inquirer.hypervisor())
        } else {
            (sibling, inquirer.component_hypervisor(sibling))
        };

        match (
            hypervisor,
            member.allocated_port(ETCD_PEER_PORT),
            member.allocated_port(ETCD_CLIENT_PORT),
        ) {
            (Some(hypervisor), Some(peer_port), Some(client_port)) => peers.push(EtcdPeer {
                name: member.name.clone(),
                peer_url: hypervisor.https_url(peer_port),
                client_url: hypervisor.https_url(client_port),
            }),
            _ => pending.push(member.name.clone()),
        }
    }

    if !pending.is_empty() {
        return Err(ReconcileError::siblings_not_placed(
            component.key(),
            Role::ControlPlane,
            &pending,
        ));
    }
    Ok(peers)
}

/// Client URLs of live, placed control-plane siblings other than `component`
///
/// Unlike [`peers`] this never fails: during teardown whatever is reachable
/// is good enough.
pub fn other_client_urls(inquirer: &dyn Inquirer, component: &Component) -> Vec<String> {
    inquirer
        .cluster_components(Role::ControlPlane)
        .into_iter()
        .filter(|sibling| sibling.name != component.name && !sibling.is_deleting())
        .filter_map(|sibling| {
            let hypervisor = inquirer.component_hypervisor(sibling)?;
            let port = sibling.allocated_port(ETCD_CLIENT_PORT)?;
            Some(hypervisor.https_url(port))
        })
        .collect()
}

/// Recorded bootstraps of the other control-plane components
///
/// A recorded bootstrap means that sibling has started its etcd member.
pub fn sibling_bootstraps<'a>(
    inquirer: &'a dyn Inquirer,
    component: &Component,
) -> Vec<(&'a str, &'a EtcdBootstrap)> {
    inquirer
        .cluster_components(Role::ControlPlane)
        .into_iter()
        .filter(|sibling| sibling.name != component.name)
        .filter_map(|sibling| {
            let bootstrap = sibling.status.etcd_bootstrap.as_ref()?;
            Some((sibling.name.as_str(), bootstrap))
        })
        .collect()
}

/// Whether `bootstrap` started a new cluster that lists `peer_url`
pub fn bootstraps_new_cluster_with(bootstrap: &EtcdBootstrap, peer_url: &str) -> bool {
    bootstrap.state == InitialClusterState::New
        && bootstrap.initial_cluster.iter().any(|m| m.peer_url == peer_url)
}

/// Bootstrap for a member created together with its peers
pub fn new_cluster_bootstrap(peers: &[EtcdPeer]) -> EtcdBootstrap {
    EtcdBootstrap {
        state: InitialClusterState::New,
        initial_cluster: peers
            .iter()
            .map(|p| InitialClusterMember {
                name: p.name.clone(),
                peer_url: p.peer_url.clone(),
            })
            .collect(),
    }
}

/// Bootstrap for a member joining a running cluster
///
/// Every peer URL of every listed member appears once. The entry advertising
/// `peer_url` takes `name`, since a learner that has not started has no name
/// yet; other entries keep the name etcd reports, even when it is empty.
pub fn joining_bootstrap(members: &[EtcdMember], name: &str, peer_url: &str) -> EtcdBootstrap {
    let initial_cluster = members
        .iter()
        .flat_map(|member| {
            let member_name = if is_member_for(member, peer_url) {
                name.to_string()
            } else {
                member.name.clone()
            };
            member
                .peer_urls
                .iter()
                .map(move |url| InitialClusterMember {
                    name: member_name.clone(),
                    peer_url: url.clone(),
                })
        })
        .collect();

    EtcdBootstrap {
        state: InitialClusterState::Existing,
        initial_cluster,
    }
}

/// Membership client authenticating as the component itself
pub fn membership<'a>(
    ctx: &'a ReconcileContext,
    cluster: &Cluster,
    component: &mut Component,
) -> Result<Membership<'a>> {
    let name = component.name.clone();
    let certificate = component.client_certificate(
        cluster.certificate_authorities.etcd_client()?,
        "etcd-membership",
        &name,
        None,
        &[],
    )?;
    let tls = EtcdTls {
        ca_certificate: cluster.etcd_server_ca()?.certificate.clone(),
        client_certificate: certificate.certificate,
        client_key: certificate.private_key,
    };
    Ok(Membership::new(
        ctx.etcd.as_ref(),
        &ctx.config.etcd,
        tls,
        component.key().to_string(),
    ))
}

/// Converge the component's etcd member
///
/// 1. Read the member list through the other members, once.
/// 2. If the list is readable and lacks this member, add it as a learner and
///    join with state "existing" from the list returned by the add.
/// 3. Otherwise reuse the bootstrap recorded when the member first started.
///    A member with no record and no readable list starts a new cluster,
///    unless a sibling already runs a cluster this member is not part of:
///    then the cycle is deferred until the list can be read.
/// 4. Ensure the etcd pod, then promote the learner when a list was readable.
pub async fn run_etcd(
    ctx: &ReconcileContext,
    cluster: &Cluster,
    hypervisor: &Hypervisor,
    component: &mut Component,
    peers: &[EtcdPeer],
    siblings: &[(&str, &EtcdBootstrap)],
    image: &str,
) -> Result<()> {
    let key = component.key();
    let me = peers
        .iter()
        .find(|p| p.name == component.name)
        .cloned()
        .ok_or_else(|| {
            ReconcileError::internal_error(format!("{} is missing from its own etcd peers", key))
        })?;
    let endpoints: Vec<String> = peers
        .iter()
        .filter(|p| p.name != me.name)
        .map(|p| p.client_url.clone())
        .collect();

    let membership = membership(ctx, cluster, component)?;
    let observed = membership.observe(&endpoints).await;

    let bootstrap = match &observed {
        Some(members) if member_status(members, &me.peer_url) == MemberStatus::NotMember => {
            let members = membership.add_learner(&endpoints, &me.peer_url).await?;
            info!(component = %key, "joining existing etcd cluster as a learner");
            joining_bootstrap(&members, &me.name, &me.peer_url)
        }
        Some(members) => component
            .status
            .etcd_bootstrap
            .clone()
            .unwrap_or_else(|| joining_bootstrap(members, &me.name, &me.peer_url)),
        None => match component.status.etcd_bootstrap.clone() {
            Some(recorded) => recorded,
            None => {
                let running: Vec<&str> = siblings
                    .iter()
                    .filter(|(_, bootstrap)| !bootstraps_new_cluster_with(bootstrap, &me.peer_url))
                    .map(|(name, _)| *name)
                    .collect();
                if !running.is_empty() {
                    return Err(ReconcileError::membership_unknown(&key, &running));
                }
                debug!(component = %key, "no etcd member list observable, bootstrapping a new cluster");
                new_cluster_bootstrap(peers)
            }
        },
    };
    component.status.etcd_bootstrap = Some(bootstrap.clone());

    let pod = etcd_pod(component, hypervisor, &bootstrap, image)?;
    ctx.gateway.ensure_pod(hypervisor, &key, &pod).await?;

    if observed.is_some() {
        membership.promote(&endpoints, &me.peer_url).await?;
    }
    Ok(())
}

/// Remove the component's member through its live siblings
///
/// Skipped when the whole cluster is going away, when no sibling is left to
/// talk to, or when the member never got a peer port.
pub async fn remove_member(
    ctx: &ReconcileContext,
    inquirer: &dyn Inquirer,
    hypervisor: &Hypervisor,
    component: &mut Component,
) -> Result<()> {
    let cluster = inquirer.cluster();
    let key = component.key();

    if cluster.is_deleting() {
        debug!(component = %key, "cluster is being deleted, skipping etcd member removal");
        return Ok(());
    }
    let Some(peer_port) = component.allocated_port(ETCD_PEER_PORT) else {
        return Ok(());
    };
    let endpoints = other_client_urls(inquirer, component);
    if endpoints.is_empty() {
        info!(component = %key, "no other etcd member left, skipping member removal");
        return Ok(());
    }

    let peer_url = hypervisor.https_url(peer_port);
    let membership = membership(ctx, cluster, component)?;
    membership.remove(&endpoints, &peer_url).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, name: &str, peer_url: &str, is_learner: bool) -> EtcdMember {
        EtcdMember {
            id,
            name: name.to_string(),
            peer_urls: vec![peer_url.to_string()],
            client_urls: vec![],
            is_learner,
        }
    }

    #[test]
    fn test_joining_bootstrap_names_self() {
        let members = vec![
            member(1, "cp-1", "https://10.0.0.1:30000", false),
            member(2, "", "https://10.0.0.2:30000", true),
            member(3, "", "https://10.0.0.4:30000", true),
        ];

        let bootstrap = joining_bootstrap(&members, "cp-4", "https://10.0.0.4:30000");
        assert_eq!(bootstrap.state, InitialClusterState::Existing);
        assert_eq!(
            bootstrap.initial_cluster_flag(),
            "cp-1=https://10.0.0.1:30000,=https://10.0.0.2:30000,cp-4=https://10.0.0.4:30000"
        );
    }

    #[test]
    fn test_bootstraps_new_cluster_with() {
        let new = EtcdBootstrap {
            state: InitialClusterState::New,
            initial_cluster: vec![InitialClusterMember {
                name: "cp-1".to_string(),
                peer_url: "https://10.0.0.1:30000".to_string(),
            }],
        };
        assert!(bootstraps_new_cluster_with(&new, "https://10.0.0.1:30000"));
        assert!(!bootstraps_new_cluster_with(&new, "https://10.0.0.4:30000"));

        let existing = EtcdBootstrap {
            state: InitialClusterState::Existing,
            ..new
        };
        assert!(!bootstraps_new_cluster_with(&existing, "https://10.0.0.1:30000"));
    }

    #[test]
    fn test_new_cluster_bootstrap() {
        let peers = vec![
            EtcdPeer {
                name: "cp-1".to_string(),
                peer_url: "https://10.0.0.1:30000".to_string(),
                client_url: "https://10.0.0.1:30001".to_string(),
            },
            EtcdPeer {
                name: "cp-2".to_string(),
                peer_url: "https://10.0.0.2:30000".to_string(),
                client_url: "https://10.0.0.2:30001".to_string(),
            },
        ];

        let bootstrap = new_cluster_bootstrap(&peers);
        assert_eq!(bootstrap.state, InitialClusterState::New);
        assert_eq!(
            bootstrap.initial_cluster_flag(),
            "cp-1=https://10.0.0.1:30000,cp-2=https://10.0.0.2:30000"
        );
    }
}
