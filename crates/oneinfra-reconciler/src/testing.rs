//! Shared fixture for reconciler tests: one cluster with its control-plane
//! components and ingress, an in-memory hypervisor gateway and a fake etcd.

use crate::component::{ComponentReconciler, ReconcileContext};
use crate::config::{EtcdConfig, ReconcilerConfig};
use crate::error::Result;
use crate::etcd::FakeEtcd;
use crate::retry::RetryPolicy;
use oneinfra_core::{Cluster, Component, Hypervisor, ReconcileSnapshot, ReleaseData, Role};
use oneinfra_hypervisor::MockHypervisor;
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "tenant";
pub const CLUSTER: &str = "prod";
pub const INGRESS: &str = "ingress";

pub fn test_config() -> ReconcilerConfig {
    let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5));
    ReconcilerConfig {
        etcd: EtcdConfig {
            dial_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            learner_add: policy,
            promotion: policy,
            removal: policy,
        },
        pre_reconcile_attempts: 3,
    }
}

pub struct Fixture {
    pub cluster: Cluster,
    pub hypervisors: Vec<Hypervisor>,
    pub components: Vec<Component>,
    pub gateway: Arc<MockHypervisor>,
    pub etcd: FakeEtcd,
    pub ctx: ReconcileContext,
}

impl Fixture {
    /// `replicas` control-plane components cp-N on hv-N (10.0.0.N) and one
    /// ingress on hv-ingress (10.0.9.1)
    pub fn new(replicas: usize) -> Self {
        let mut cluster = Cluster::new(NAMESPACE, CLUSTER, "1.31.2", replicas as u32);
        cluster.initialize_certificate_authorities().unwrap();

        let mut hypervisors = Vec::new();
        let mut components = Vec::new();
        for i in 1..=replicas {
            let hypervisor = format!("hv-{}", i);
            hypervisors.push(Hypervisor::new(&hypervisor, format!("10.0.0.{}", i).parse().unwrap()));
            let mut component =
                Component::new(NAMESPACE, CLUSTER, format!("cp-{}", i), Role::ControlPlane);
            component.hypervisor = Some(hypervisor);
            components.push(component);
        }
        hypervisors.push(Hypervisor::new("hv-ingress", "10.0.9.1".parse().unwrap()));
        let mut ingress = Component::new(NAMESPACE, CLUSTER, INGRESS, Role::ControlPlaneIngress);
        ingress.hypervisor = Some("hv-ingress".to_string());
        components.push(ingress);

        let gateway = Arc::new(MockHypervisor::in_memory());
        let etcd = FakeEtcd::new();
        let ctx = ReconcileContext::new(
            gateway.clone(),
            Arc::new(etcd.clone()),
            ReleaseData::embedded().unwrap(),
            test_config(),
        );

        Self {
            cluster,
            hypervisors,
            components,
            gateway,
            etcd,
            ctx,
        }
    }

    fn index(&self, name: &str) -> usize {
        self.components
            .iter()
            .position(|c| c.name == name)
            .unwrap_or_else(|| panic!("no component {}", name))
    }

    /// Declare one more control-plane replica cp-N on a new hv-N; returns
    /// its name
    pub fn add_replica(&mut self) -> String {
        let n = self
            .components
            .iter()
            .filter(|c| c.role == Role::ControlPlane)
            .count()
            + 1;
        let hypervisor = format!("hv-{}", n);
        self.hypervisors
            .push(Hypervisor::new(&hypervisor, format!("10.0.0.{}", n).parse().unwrap()));
        let name = format!("cp-{}", n);
        let mut component = Component::new(NAMESPACE, CLUSTER, name.clone(), Role::ControlPlane);
        component.hypervisor = Some(hypervisor);
        self.components.push(component);
        self.cluster.control_plane_replicas = n as u32;
        name
    }

    pub fn component(&self, name: &str) -> &Component {
        &self.components[self.index(name)]
    }

    pub fn component_mut(&mut self, name: &str) -> &mut Component {
        let index = self.index(name);
        &mut self.components[index]
    }

    pub fn hypervisor_of(&self, name: &str) -> &Hypervisor {
        let assigned = self.component(name).hypervisor.clone().unwrap();
        self.hypervisors.iter().find(|h| h.name == assigned).unwrap()
    }

    /// `https://{ip}:{port}` of a named host port of a component
    pub fn url(&self, name: &str, port: &str) -> String {
        let port = self.component(name).allocated_port(port).unwrap();
        self.hypervisor_of(name).https_url(port)
    }

    pub fn snapshot(&self, name: &str) -> ReconcileSnapshot {
        ReconcileSnapshot::new(
            self.component(name).key(),
            self.cluster.clone(),
            self.components.clone(),
            self.hypervisors.clone(),
        )
    }

    pub async fn pre_reconcile(&mut self, name: &str) -> Result<()> {
        let snapshot = self.snapshot(name);
        let index = self.index(name);
        let component = &mut self.components[index];
        ComponentReconciler::for_role(component.role)
            .pre_reconcile(&self.ctx, &snapshot, component)
            .await
    }

    pub async fn reconcile(&mut self, name: &str) -> Result<()> {
        let snapshot = self.snapshot(name);
        let index = self.index(name);
        let component = &mut self.components[index];
        ComponentReconciler::for_role(component.role)
            .reconcile(&self.ctx, &snapshot, component)
            .await
    }

    pub async fn reconcile_deletion(&mut self, name: &str) -> Result<()> {
        let snapshot = self.snapshot(name);
        let index = self.index(name);
        let component = &mut self.components[index];
        ComponentReconciler::for_role(component.role)
            .reconcile_deletion(&self.ctx, &snapshot, component)
            .await
    }

    /// PreReconcile every component, then Reconcile them in order
    pub async fn converge_all(&mut self) {
        let names: Vec<String> = self.components.iter().map(|c| c.name.clone()).collect();
        for name in &names {
            self.pre_reconcile(name).await.unwrap();
        }
        for name in &names {
            self.reconcile(name).await.unwrap();
        }
    }

    pub fn mark_deleting(&mut self, name: &str) {
        self.component_mut(name).deletion_timestamp = Some(chrono::Utc::now());
    }
}
