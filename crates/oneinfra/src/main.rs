use clap::{Parser, Subcommand, ValueEnum};
use oneinfra_core::{InitialClusterState, Manifest, ReleaseData, Role};
use oneinfra_hypervisor::{MockHypervisor, PortRange};
use oneinfra_reconciler::controlplane::{ETCD_CLIENT_PORT, ETCD_PEER_PORT};
use oneinfra_reconciler::etcd::{is_member_for, EtcdConnector};
use oneinfra_reconciler::{
    Driver, FakeEtcd, GrpcEtcdConnector, Outcome, ReconcileContext, ReconcilerConfig,
};
use oneinfra_storage::RedbBackend;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "oneinfra", about = "Multi-tenant Kubernetes control plane reconciler")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every component of a manifest and write the statuses back
    Reconcile {
        /// Manifest with clusters, hypervisors and components
        #[arg(long, env = "ONEINFRA_MANIFEST")]
        manifest: String,
        /// Path to the redb database holding host port leases
        #[arg(long, default_value = "./oneinfra.redb")]
        data_dir: String,
        /// Host port range leased on every hypervisor, e.g. 30000-32767
        #[arg(long, default_value = "30000-32767")]
        port_range: String,
        /// Number of passes; 0 keeps reconciling until interrupted
        #[arg(long, default_value_t = 1)]
        cycles: u32,
        /// Seconds between passes
        #[arg(long, default_value_t = 10)]
        interval: u64,
        /// How etcd membership is managed
        #[arg(long, value_enum, default_value_t = EtcdMode::Simulated)]
        etcd: EtcdMode,
    },
    /// List the supported Kubernetes versions
    Versions,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EtcdMode {
    /// In-process etcd cluster; members "start" after every pass
    Simulated,
    /// Real etcd members reached over gRPC with mutual TLS
    Grpc,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Reconcile {
            manifest,
            data_dir,
            port_range,
            cycles,
            interval,
            etcd,
        } => {
            run_reconcile(
                &manifest,
                &data_dir,
                &port_range,
                cycles,
                Duration::from_secs(interval),
                etcd,
            )
            .await
        }
        Commands::Versions => print_versions(),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn print_versions() -> miette::Result<()> {
    let release = ReleaseData::embedded()?;
    for version in &release.versions {
        let marker = if version.kubernetes == release.default_kubernetes_version {
            " (default)"
        } else {
            ""
        };
        println!("{}\tetcd {}{}", version.kubernetes, version.etcd, marker);
    }
    Ok(())
}

async fn run_reconcile(
    manifest_path: &str,
    data_dir: &str,
    port_range: &str,
    cycles: u32,
    interval: Duration,
    etcd_mode: EtcdMode,
) -> miette::Result<()> {
    let mut manifest = read_manifest(manifest_path)?;
    let config = ReconcilerConfig::default();

    let storage = Arc::new(
        RedbBackend::new(Path::new(data_dir))
            .map_err(|e| miette::miette!("Failed to open storage at '{}': {}", data_dir, e))?,
    );
    let gateway = Arc::new(MockHypervisor::new(storage, parse_port_range(port_range)?));

    let simulated = FakeEtcd::new();
    let etcd: Arc<dyn EtcdConnector> = match etcd_mode {
        EtcdMode::Simulated => {
            info!("Using simulated etcd membership");
            Arc::new(simulated.clone())
        }
        EtcdMode::Grpc => Arc::new(GrpcEtcdConnector::new(
            config.etcd.dial_timeout,
            config.etcd.request_timeout,
        )),
    };

    let driver = Driver::new(ReconcileContext::new(
        gateway,
        etcd,
        ReleaseData::embedded()?,
        config,
    ));

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing after the current pass");
            signal_token.cancel();
        }
    });

    let mut cycle = 0;
    loop {
        cycle += 1;
        info!(cycle, "Starting reconciliation pass");

        let reports = driver.reconcile_manifest(&mut manifest).await?;
        let (mut reconciled, mut deferred, mut deleted, mut failed) = (0, 0, 0, 0);
        for report in &reports {
            match &report.outcome {
                Ok(Outcome::Reconciled) => reconciled += 1,
                Ok(Outcome::Deferred { reason }) => {
                    deferred += 1;
                    info!(component = %report.component, reason = %reason, "Deferred");
                }
                Ok(Outcome::Deleted) => deleted += 1,
                Err(e) => {
                    failed += 1;
                    error!(component = %report.component, error = ?e, "Reconciliation failed");
                }
            }
        }
        info!(cycle, reconciled, deferred, deleted, failed, "Pass complete");

        if etcd_mode == EtcdMode::Simulated {
            start_simulated_members(&simulated, &manifest);
        }
        write_manifest(manifest_path, &manifest)?;

        if cycles != 0 && cycle >= cycles {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Done");
    Ok(())
}

fn read_manifest(path: &str) -> miette::Result<Manifest> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read manifest '{}': {}", path, e))?;
    Ok(Manifest::from_yaml(&data)?)
}

fn write_manifest(path: &str, manifest: &Manifest) -> miette::Result<()> {
    let data = manifest.to_yaml()?;
    std::fs::write(path, data)
        .map_err(|e| miette::miette!("Failed to write manifest '{}': {}", path, e))
}

fn parse_port_range(range: &str) -> miette::Result<PortRange> {
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| miette::miette!("Invalid port range '{}', expected START-END", range))?;
    let start: u16 = start
        .trim()
        .parse()
        .map_err(|e| miette::miette!("Invalid port range start '{}': {}", start, e))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|e| miette::miette!("Invalid port range end '{}': {}", end, e))?;
    Ok(PortRange::new(start, end)?)
}

/// Play the part of the etcd pods the simulated gateway never runs
///
/// Members bootstrapped as "new" appear as voters; learners added by a
/// join publish their name and client URL, as a started member would.
fn start_simulated_members(etcd: &FakeEtcd, manifest: &Manifest) {
    let members = etcd.members();
    for component in manifest
        .components
        .iter()
        .filter(|c| c.role == Role::ControlPlane && !c.is_deleting())
    {
        let Some(bootstrap) = &component.status.etcd_bootstrap else {
            continue;
        };
        let Some(hypervisor) = component
            .hypervisor
            .as_deref()
            .and_then(|name| manifest.hypervisors.iter().find(|h| h.name == name))
        else {
            continue;
        };
        let (Some(peer_port), Some(client_port)) = (
            component.allocated_port(ETCD_PEER_PORT),
            component.allocated_port(ETCD_CLIENT_PORT),
        ) else {
            continue;
        };

        let peer_url = hypervisor.https_url(peer_port);
        let client_url = hypervisor.https_url(client_port);
        match members.iter().find(|m| is_member_for(m, &peer_url)) {
            Some(member) if member.name.is_empty() => {
                etcd.start_member(&peer_url, &component.name, &client_url)
            }
            Some(_) => {}
            None if bootstrap.state == InitialClusterState::New => {
                etcd.add_voter(&component.name, &peer_url, &client_url);
            }
            None => {
                warn!(component = %component.key(), "etcd member is gone from the simulated cluster")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const MANIFEST: &str = r#"
clusters:
  - namespace: tenant
    name: prod
    kubernetesVersion: "1.31.2"
    controlPlaneReplicas: 1
hypervisors:
  - name: hv-1
    ipAddress: 10.0.0.1
  - name: hv-2
    ipAddress: 10.0.0.2
components:
  - namespace: tenant
    cluster: prod
    name: cp-1
    role: ControlPlane
    hypervisor: hv-1
  - namespace: tenant
    cluster: prod
    name: ingress
    role: ControlPlaneIngress
    hypervisor: hv-2
"#;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_port_range() {
        let range = parse_port_range("31000-31010").unwrap();
        assert_eq!((range.start, range.end), (31000, 31010));
        assert!(parse_port_range("31000").is_err());
        assert!(parse_port_range("31010-31000").is_err());
    }

    #[tokio::test]
    async fn test_reconcile_writes_statuses_back() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("manifest.yaml");
        std::fs::write(&manifest_path, MANIFEST).unwrap();
        let db_path = dir.path().join("oneinfra.redb");

        run_reconcile(
            manifest_path.to_str().unwrap(),
            db_path.to_str().unwrap(),
            "30000-32767",
            1,
            Duration::from_secs(1),
            EtcdMode::Simulated,
        )
        .await
        .unwrap();

        let manifest = read_manifest(manifest_path.to_str().unwrap()).unwrap();
        assert!(manifest.clusters[0].api_server.ca.is_some());
        let cp = &manifest.components[0];
        assert_eq!(cp.status.allocated_host_ports.len(), 3);
        assert!(cp.status.etcd_bootstrap.is_some());
        assert_eq!(manifest.components[1].status.input_endpoints.len(), 1);
    }
}
