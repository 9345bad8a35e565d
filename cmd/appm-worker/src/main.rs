use clap::Parser;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pkg_constants::paths::{DEFAULT_WORKER_CONFIG, DEFAULT_WORKER_DATA_DIR};
use pkg_constants::thirdparty::DEFAULT_EVENT_BUFFER;
use pkg_controllers::{ReconcilerConfig, ThirdPartier, ThirdPartySources, TpProber};
use pkg_discovery::EtcdDiscovererFactory;
use pkg_prober::{ProbeDefaults, ProbeManager};
use pkg_state::client::StateStore;
use pkg_state::registry::ServiceStore;
use pkg_types::config::{WorkerConfigFile, load_config_file};
use pkg_types::event::LifecycleEvent;
use pkg_types::thirdparty::{DiscoveryConfig, ProbeConfig, RbdEndpoint, ThirdPartyService};

#[derive(Parser, Debug)]
#[command(name = "appm-worker", about = "Third-party service health and endpoint sync")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_WORKER_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Log filter, e.g. "info" or "pkg_controllers=debug"
    #[arg(long)]
    log_level: Option<String>,

    /// YAML file of third-party services to load into the store on boot
    #[arg(long)]
    seed: Option<String>,
}

/// Registry contents loaded with `--seed`.
#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    services: Vec<ThirdPartyService>,
    #[serde(default)]
    probes: Vec<ProbeConfig>,
    #[serde(default)]
    endpoints: Vec<RbdEndpoint>,
    #[serde(default)]
    discovery: Vec<DiscoveryConfig>,
}

async fn apply_seed(store: &StateStore, path: &str) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read seed file {}: {}", path, e))?;
    let seed: SeedFile = serde_yaml::from_str(&content)?;
    for svc in &seed.services {
        store.put_thirdparty_service(svc).await?;
    }
    for cfg in &seed.probes {
        store.put_probe_config(cfg).await?;
    }
    for ep in &seed.endpoints {
        store.put_endpoint(ep).await?;
    }
    for cfg in &seed.discovery {
        store.put_discovery_config(cfg).await?;
    }
    info!(
        "Seeded {} services, {} probe configs, {} endpoints, {} discovery configs",
        seed.services.len(),
        seed.probes.len(),
        seed.endpoints.len(),
        seed.discovery.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: WorkerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    let log_level = cli
        .log_level
        .or(file_cfg.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir.clone())
        .unwrap_or_else(|| DEFAULT_WORKER_DATA_DIR.to_string());
    let probe_defaults = {
        let defaults = ProbeDefaults::default();
        ProbeDefaults {
            interval: file_cfg
                .probe
                .default_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            timeout: file_cfg
                .probe
                .default_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    };
    let reconciler_cfg = ReconcilerConfig::from_section(&file_cfg.thirdparty);
    let event_buffer = file_cfg
        .thirdparty
        .event_buffer
        .unwrap_or(DEFAULT_EVENT_BUFFER);

    info!("Starting appm-worker");
    info!("  Config:    {}", cli.config);
    info!("  Data dir:  {}", data_dir);
    info!(
        "  Probes:    interval={}s timeout={}s",
        probe_defaults.interval.as_secs(),
        probe_defaults.timeout.as_secs()
    );

    let store = StateStore::new(&data_dir).await?;
    if let Some(seed) = &cli.seed {
        apply_seed(&store, seed).await?;
    }

    let manager = ProbeManager::new(probe_defaults);
    let probe_loop = manager.start().await?;

    let (updates_tx, updates_rx) = mpsc::channel(event_buffer);
    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(event_buffer);

    let shared = Arc::new(store.clone());
    let prober = TpProber::new(manager.clone(), shared.clone(), updates_tx.clone());
    let sources = ThirdPartySources {
        services: shared.clone(),
        endpoints: shared.clone(),
        discovery: shared.clone(),
    };
    let thirdpartier = ThirdPartier::new(
        reconciler_cfg,
        sources,
        Arc::new(EtcdDiscovererFactory),
        shared.clone(),
        prober,
        updates_tx,
    );
    let loops = thirdpartier.start(lifecycle_rx, updates_rx);

    let services = ServiceStore::list(shared.as_ref()).await?;
    info!("Starting {} third-party services", services.len());
    for svc in services {
        lifecycle_tx.send(LifecycleEvent::start(svc.sid)).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down appm-worker");

    thirdpartier.shutdown().await;
    manager.stop().await;
    if let Err(e) = loops.await {
        warn!("ThirdPartier loops ended abnormally: {}", e);
    }
    if let Err(e) = probe_loop.await {
        warn!("Probe dispatch ended abnormally: {}", e);
    }
    store.close().await?;
    Ok(())
}
