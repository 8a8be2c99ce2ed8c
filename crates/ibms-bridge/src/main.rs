//! IBMS Bridge
//!
//! Polls a JSON telemetry API and publishes the mapped values as BACnet
//! objects on a local device.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use bridge_runtime::ServiceManager;

use ibms_bridge::config::BridgeConfig;
use ibms_bridge::engine::BridgeEngine;
use ibms_bridge::logging::setup_logging;
use ibms_bridge::mapping::MappingRuleSet;
use ibms_bridge::poller::{HttpPoller, TelemetrySource};
use ibms_bridge::service::BridgeService;
use ibms_bridge::stack::LocalStack;
use ibms_bridge::transform::TransformRegistry;

const DEFAULT_CONFIG: &str = "config.toml";

/// Telemetry to BACnet bridge
#[derive(Parser, Debug)]
#[command(name = "ibms-bridge")]
#[command(about = "Telemetry to BACnet object bridge", long_about = None)]
struct Args {
    /// Path to the TOML config file (default: ./config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the mapping document path
    #[arg(short, long)]
    mapping: Option<PathBuf>,

    /// Run a single tick, print the report as JSON and exit
    #[arg(long)]
    once: bool,

    /// Override the log directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.exists()));
    let mut config = BridgeConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(mapping) = args.mapping {
        config.mapping.path = mapping;
    }
    if let Some(log_dir) = args.log_dir {
        config.logging.directory = log_dir;
    }

    let _log_guard = setup_logging(&config.logging).context("Failed to set up logging")?;

    info!("Starting IBMS bridge v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    let result = run(config, args.once).await;
    if let Err(e) = &result {
        error!("An error occurred in the main application: {:#}", e);
    }
    info!("Shutting down the application.");
    result
}

async fn run(config: BridgeConfig, once: bool) -> Result<()> {
    let transforms = Arc::new(TransformRegistry::with_builtins());
    let rules = load_mapping(&config.mapping.path, &transforms).await?;

    let stack = Arc::new(LocalStack::new(config.device.to_local_device()?));
    let engine = Arc::new(BridgeEngine::new(rules, transforms, stack, &config.sync));
    let source: Arc<dyn TelemetrySource> = Arc::new(HttpPoller::new(config.poll.clone())?);

    if once {
        let snapshot = source.fetch().await?;
        let report = engine.run_tick(&snapshot).await;
        engine.shutdown().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let service_manager = Arc::new(ServiceManager::new());
    service_manager
        .spawn(BridgeService::new(source, engine, config.poll.interval()))
        .await?;

    shutdown_signal(service_manager).await;
    Ok(())
}

async fn load_mapping(path: &Path, transforms: &TransformRegistry) -> Result<MappingRuleSet> {
    let rules = MappingRuleSet::load(path, transforms)
        .await
        .with_context(|| format!("Failed to load mapping from {}", path.display()))?;
    if rules.is_empty() {
        warn!("Mapping {} defines no points", path.display());
    }
    Ok(rules)
}

/// Wait for shutdown signal and cleanup
async fn shutdown_signal(service_manager: Arc<ServiceManager>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }

    info!("Shutting down services...");
    if let Err(e) = service_manager.shutdown_all().await {
        warn!("Some services did not shut down cleanly: {}", e);
    }
}
