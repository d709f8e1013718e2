//! Runs the component reconcilers over a manifest
//!
//! Components of one cluster are reconciled one at a time under a
//! per-cluster lock; different clusters proceed concurrently.

use crate::component::{ComponentReconciler, ReconcileContext};
use crate::error::Result;
use futures_util::future::join_all;
use oneinfra_core::{
    Cluster, ClusterKey, Component, ComponentKey, Hypervisor, Inquirer, Manifest, OneinfraError,
    ReconcileSnapshot,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// What happened to a component in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reconciled,
    /// Preconditions not met yet; retried on a later pass
    Deferred { reason: String },
    /// Torn down; the component can be forgotten
    Deleted,
}

/// Result of one component in a manifest pass
#[derive(Debug)]
pub struct Report {
    pub component: ComponentKey,
    pub outcome: Result<Outcome>,
}

pub struct Driver {
    ctx: ReconcileContext,
    locks: Mutex<HashMap<ClusterKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Driver {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self {
            ctx,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &ReconcileContext {
        &self.ctx
    }

    fn cluster_lock(&self, key: &ClusterKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(key.clone()).or_default().clone()
    }

    /// PreReconcile then Reconcile one component, or tear it down when it
    /// or its cluster is being deleted
    pub async fn reconcile(
        &self,
        inquirer: &dyn Inquirer,
        component: &mut Component,
    ) -> Result<Outcome> {
        let lock = self.cluster_lock(&component.cluster_key());
        let _guard = lock.lock().await;

        let span = info_span!("reconcile", component = %component.key());
        async {
            if let Some(outcome) = self.delete_if_requested(inquirer, component).await? {
                return Ok(outcome);
            }
            let converged = match self.pre_reconcile(inquirer, component).await {
                Ok(()) => {
                    ComponentReconciler::for_role(component.role)
                        .reconcile(&self.ctx, inquirer, component)
                        .await
                }
                Err(e) => Err(e),
            };
            settle(converged)
        }
        .instrument(span)
        .await
    }

    /// One full pass over a manifest
    ///
    /// Missing certificate authorities are generated first, and components
    /// of a deleting cluster are marked for deletion. Per cluster, every
    /// live component is PreReconciled before any is Reconciled, so siblings
    /// see each other's ports within the same pass. Deleted components are
    /// dropped from the manifest, and so are deleting clusters left empty.
    pub async fn reconcile_manifest(&self, manifest: &mut Manifest) -> Result<Vec<Report>> {
        for cluster in manifest.clusters.iter_mut().filter(|c| !c.is_deleting()) {
            if cluster.initialize_certificate_authorities()? {
                info!(cluster = %cluster.key(), "generated certificate authorities");
            }
        }

        let deleting: HashMap<ClusterKey, _> = manifest
            .clusters
            .iter()
            .filter_map(|c| c.deletion_timestamp.map(|at| (c.key(), at)))
            .collect();
        for component in manifest.components.iter_mut() {
            if let Some(at) = deleting.get(&component.cluster_key()) {
                if component.deletion_timestamp.is_none() {
                    component.deletion_timestamp = Some(*at);
                }
            }
        }

        let mut groups: BTreeMap<ClusterKey, Vec<(usize, Component)>> = BTreeMap::new();
        for (index, component) in std::mem::take(&mut manifest.components)
            .into_iter()
            .enumerate()
        {
            groups
                .entry(component.cluster_key())
                .or_default()
                .push((index, component));
        }

        let clusters = &manifest.clusters;
        let hypervisors = &manifest.hypervisors;
        let passes = groups.into_iter().map(|(key, members)| async move {
            match clusters.iter().find(|c| c.key() == key) {
                Some(cluster) => self.reconcile_cluster(cluster, hypervisors, members).await,
                None => members
                    .into_iter()
                    .map(|(index, component)| {
                        let err = OneinfraError::invalid_config(
                            format!("Component {} references an unknown cluster", component.key()),
                            "Declare the cluster under `clusters`",
                        );
                        (index, component, Err(err.into()))
                    })
                    .collect(),
            }
        });
        let mut results: Vec<(usize, Component, Result<Outcome>)> =
            join_all(passes).await.into_iter().flatten().collect();
        results.sort_by_key(|(index, _, _)| *index);

        let mut reports = Vec::with_capacity(results.len());
        for (_, component, outcome) in results {
            let key = component.key();
            if !matches!(outcome, Ok(Outcome::Deleted)) {
                manifest.components.push(component);
            }
            reports.push(Report {
                component: key,
                outcome,
            });
        }

        let components = &manifest.components;
        let mut forgotten = Vec::new();
        manifest.clusters.retain(|cluster| {
            let keep = !cluster.is_deleting()
                || components.iter().any(|c| c.cluster_key() == cluster.key());
            if !keep {
                forgotten.push(cluster.key());
            }
            keep
        });
        if !forgotten.is_empty() {
            let mut locks = self.locks.lock();
            for key in &forgotten {
                locks.remove(key);
                info!(cluster = %key, "cluster deleted");
            }
        }

        Ok(reports)
    }

    async fn reconcile_cluster(
        &self,
        cluster: &Cluster,
        hypervisors: &[Hypervisor],
        mut members: Vec<(usize, Component)>,
    ) -> Vec<(usize, Component, Result<Outcome>)> {
        let lock = self.cluster_lock(&cluster.key());
        let _guard = lock.lock().await;

        let snapshot = |members: &[(usize, Component)], key: ComponentKey| {
            ReconcileSnapshot::new(
                key,
                cluster.clone(),
                members.iter().map(|(_, c)| c.clone()).collect(),
                hypervisors.iter().cloned(),
            )
        };

        // Ports first, for every live component
        let mut prepared: Vec<Option<Result<()>>> = Vec::with_capacity(members.len());
        for i in 0..members.len() {
            let key = members[i].1.key();
            if members[i].1.is_deleting() || cluster.is_deleting() {
                prepared.push(None);
                continue;
            }
            let inquirer = snapshot(&members, key.clone());
            let result = self
                .pre_reconcile(&inquirer, &mut members[i].1)
                .instrument(info_span!("pre_reconcile", component = %key))
                .await;
            prepared.push(Some(result));
        }

        let mut outcomes = Vec::with_capacity(members.len());
        for (i, pre) in prepared.into_iter().enumerate() {
            let key = members[i].1.key();
            let inquirer = snapshot(&members, key.clone());
            let component = &mut members[i].1;

            let outcome = async {
                match pre {
                    None => self
                        .delete_if_requested(&inquirer, component)
                        .await
                        .map(|outcome| outcome.unwrap_or(Outcome::Deleted)),
                    Some(Err(e)) => settle(Err(e)),
                    Some(Ok(())) => settle(
                        ComponentReconciler::for_role(component.role)
                            .reconcile(&self.ctx, &inquirer, component)
                            .await,
                    ),
                }
            }
            .instrument(info_span!("reconcile", component = %key))
            .await;

            if let Err(e) = &outcome {
                error!(component = %key, error = %e, "reconciliation failed");
            }
            outcomes.push(outcome);
        }

        members
            .into_iter()
            .zip(outcomes)
            .map(|((index, component), outcome)| (index, component, outcome))
            .collect()
    }

    async fn delete_if_requested(
        &self,
        inquirer: &dyn Inquirer,
        component: &mut Component,
    ) -> Result<Option<Outcome>> {
        if !component.is_deleting() && !inquirer.cluster().is_deleting() {
            return Ok(None);
        }
        ComponentReconciler::for_role(component.role)
            .reconcile_deletion(&self.ctx, inquirer, component)
            .await?;
        Ok(Some(Outcome::Deleted))
    }

    /// PreReconcile, retried when host-port bookkeeping fails
    async fn pre_reconcile(&self, inquirer: &dyn Inquirer, component: &mut Component) -> Result<()> {
        let reconciler = ComponentReconciler::for_role(component.role);
        let attempts = self.ctx.config.pre_reconcile_attempts.max(1);
        let mut attempt = 1;
        loop {
            match reconciler.pre_reconcile(&self.ctx, inquirer, component).await {
                Err(e) if e.is_port_error() && attempt < attempts => {
                    warn!(attempt, error = %e, "host port allocation failed, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Turn precondition failures into a deferral
fn settle(result: Result<()>) -> Result<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::Reconciled),
        Err(e) if e.is_precondition() => {
            info!(reason = %e, "deferred");
            Ok(Outcome::Deferred {
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etcd::FakeEtcd;
    use crate::testing::test_config;
    use oneinfra_core::{ReleaseData, Role};
    use oneinfra_hypervisor::{GatewayEvent, MockHypervisor, PortRange};
    use oneinfra_storage::MemoryBackend;

    fn add_cluster(manifest: &mut Manifest, name: &str, replicas: usize, subnet: u8) {
        manifest
            .clusters
            .push(Cluster::new("tenant", name, "1.31.2", replicas as u32));
        for i in 1..=replicas {
            let hypervisor = format!("{}-hv-{}", name, i);
            manifest.hypervisors.push(Hypervisor::new(
                &hypervisor,
                format!("10.{}.0.{}", subnet, i).parse().unwrap(),
            ));
            let mut component =
                Component::new("tenant", name, format!("cp-{}", i), Role::ControlPlane);
            component.hypervisor = Some(hypervisor);
            manifest.components.push(component);
        }
        let hypervisor = format!("{}-hv-ingress", name);
        manifest.hypervisors.push(Hypervisor::new(
            &hypervisor,
            format!("10.{}.9.1", subnet).parse().unwrap(),
        ));
        let mut ingress = Component::new("tenant", name, "ingress", Role::ControlPlaneIngress);
        ingress.hypervisor = Some(hypervisor);
        manifest.components.push(ingress);
    }

    fn manifest(replicas: usize) -> Manifest {
        let mut manifest = Manifest::default();
        add_cluster(&mut manifest, "prod", replicas, 0);
        manifest
    }

    fn driver_with(gateway: Arc<MockHypervisor>, etcd: FakeEtcd) -> Driver {
        Driver::new(ReconcileContext::new(
            gateway,
            Arc::new(etcd),
            ReleaseData::embedded().unwrap(),
            test_config(),
        ))
    }

    fn driver() -> (Driver, Arc<MockHypervisor>, FakeEtcd) {
        let gateway = Arc::new(MockHypervisor::in_memory());
        let etcd = FakeEtcd::new();
        (driver_with(gateway.clone(), etcd.clone()), gateway, etcd)
    }

    fn outcomes(reports: &[Report]) -> Vec<(String, Outcome)> {
        reports
            .iter()
            .map(|r| {
                let outcome = r.outcome.as_ref().unwrap_or_else(|e| panic!("{}: {}", r.component, e));
                (r.component.name.clone(), outcome.clone())
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_pass_converges_cluster() {
        let (driver, gateway, _etcd) = driver();
        let mut manifest = manifest(3);

        let reports = driver.reconcile_manifest(&mut manifest).await.unwrap();
        assert_eq!(reports.len(), 4);
        assert!(outcomes(&reports)
            .iter()
            .all(|(_, outcome)| *outcome == Outcome::Reconciled));
        assert!(manifest.clusters[0].api_server.ca.is_some());
        assert_eq!(manifest.components[3].name, "ingress");

        gateway.clear_events();
        let reports = driver.reconcile_manifest(&mut manifest).await.unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(gateway.mutations(), 0);
    }

    #[tokio::test]
    async fn test_unplaced_component_defers_siblings() {
        let (driver, gateway, _etcd) = driver();
        let mut manifest = manifest(3);
        manifest.components[1].hypervisor = None;

        let reports = driver.reconcile_manifest(&mut manifest).await.unwrap();
        for (name, outcome) in outcomes(&reports) {
            assert!(matches!(outcome, Outcome::Deferred { .. }), "{} was {:?}", name, outcome);
        }
        let key = manifest.components[0].key();
        assert!(gateway.pods_of("prod-hv-1", &key).is_empty());
    }

    #[tokio::test]
    async fn test_deleted_component_is_dropped() {
        let (driver, gateway, _etcd) = driver();
        let mut manifest = manifest(3);
        driver.reconcile_manifest(&mut manifest).await.unwrap();

        manifest.clusters[0].control_plane_replicas = 2;
        manifest.components[2].deletion_timestamp = Some(chrono::Utc::now());
        let removed = manifest.components[2].key();

        let reports = driver.reconcile_manifest(&mut manifest).await.unwrap();
        assert_eq!(
            outcomes(&reports),
            vec![
                ("cp-1".to_string(), Outcome::Reconciled),
                ("cp-2".to_string(), Outcome::Reconciled),
                ("cp-3".to_string(), Outcome::Deleted),
                ("ingress".to_string(), Outcome::Reconciled),
            ]
        );
        assert_eq!(manifest.components.len(), 3);
        assert!(gateway.pods_of("prod-hv-3", &removed).is_empty());
        assert_eq!(manifest.components[2].status.input_endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_deleting_cluster_is_forgotten() {
        let (driver, gateway, etcd) = driver();
        let mut manifest = manifest(3);
        driver.reconcile_manifest(&mut manifest).await.unwrap();
        etcd.clear_calls();
        let key = manifest.clusters[0].key();
        assert!(driver.locks.lock().contains_key(&key));

        manifest.clusters[0].deletion_timestamp = Some(chrono::Utc::now());
        let reports = driver.reconcile_manifest(&mut manifest).await.unwrap();
        assert!(outcomes(&reports)
            .iter()
            .all(|(_, outcome)| *outcome == Outcome::Deleted));
        assert!(manifest.components.is_empty());
        assert!(manifest.clusters.is_empty());
        assert!(etcd.calls().is_empty());
        assert!(gateway.port_allocations("prod-hv-1").unwrap().is_empty());
        assert!(!driver.locks.lock().contains_key(&key));
    }

    #[tokio::test]
    async fn test_port_exhaustion_is_retried_then_reported() {
        let gateway = Arc::new(MockHypervisor::new(
            Arc::new(MemoryBackend::new()),
            PortRange::new(30000, 30001).unwrap(),
        ));
        let driver = driver_with(gateway.clone(), FakeEtcd::new());
        let mut manifest = manifest(1);

        let reports = driver.reconcile_manifest(&mut manifest).await.unwrap();
        let err = reports[0].outcome.as_ref().unwrap_err();
        assert!(err.is_port_error());

        let lease = manifest.components[0].key().port_lease("etcd-peer");
        let requests = gateway
            .events()
            .iter()
            .filter(|e| matches!(e, GatewayEvent::RequestPort { lease: l, .. } if *l == lease))
            .count();
        assert_eq!(requests, 3);
        assert!(matches!(
            reports[1].outcome,
            Ok(Outcome::Deferred { .. })
        ));
    }

    #[tokio::test]
    async fn test_clusters_reconcile_independently() {
        let (driver, _gateway, _etcd) = driver();
        let mut manifest = manifest(1);
        add_cluster(&mut manifest, "dev", 1, 1);
        manifest.components[0].hypervisor = None;

        let reports = driver.reconcile_manifest(&mut manifest).await.unwrap();
        let outcomes = outcomes(&reports);
        assert!(matches!(outcomes[0].1, Outcome::Deferred { .. }));
        assert_eq!(outcomes[2].1, Outcome::Reconciled);
        assert_eq!(outcomes[3].1, Outcome::Reconciled);
    }

    #[tokio::test]
    async fn test_reconcile_defers_unplaced_component() {
        let (driver, gateway, _etcd) = driver();
        let mut manifest = manifest(1);
        manifest.clusters[0].initialize_certificate_authorities().unwrap();
        manifest.components[0].hypervisor = None;

        let snapshot = manifest.snapshot(&manifest.components[0]).unwrap();
        let outcome = driver
            .reconcile(&snapshot, &mut manifest.components[0])
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Deferred { .. }));
        assert!(gateway.events().is_empty());
    }
}
