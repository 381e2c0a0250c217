//! Toolgate service
//!
//! Boots the gateway aggregate, recovers providers from the persisted
//! manifest, and serves the two network planes:
//! - the control-plane WebSocket (provider registrations and dispatch)
//! - the admin HTTP API with the real-time event stream

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use toolgate_cache::ResultCache;
use toolgate_core::config::{load_environment, GatewayConfig};
use toolgate_dispatch::ToolGateway;
use toolgate_runner::{Catalog, ProcessRunner, Supervisor, SupervisorConfig};
use toolgate_server::{AppState, FanOut, ServerRole};
use toolgate_store::{try_connect_bus, EventBus, ManifestStore};

#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(about = "Tool registry and execution gateway")]
struct Args {
    /// Bind host for both planes (overrides TOOLGATE_BIND_HOST)
    #[arg(long)]
    bind_host: Option<String>,

    /// Control-plane WebSocket port
    #[arg(long)]
    control_port: Option<u16>,

    /// Admin HTTP port
    #[arg(long)]
    admin_port: Option<u16>,

    /// Path of the persisted provider manifest
    #[arg(long)]
    manifest: Option<std::path::PathBuf>,

    /// Redis URL for the shared event bus
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() {
    // Fatal init failures exit non-zero; a clean shutdown exits zero.
    if let Err(e) = run().await {
        eprintln!("toolgate: fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load environment from /etc/toolgate/environment (if present).
    load_environment();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("toolgate_service=info".parse()?)
                .add_directive("toolgate_server=info".parse()?)
                .add_directive("toolgate_runner=info".parse()?)
                .add_directive("toolgate_dispatch=info".parse()?)
                .add_directive("toolgate_registry=info".parse()?)
                .add_directive("toolgate_connect=info".parse()?)
                .add_directive("tower_http=warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = GatewayConfig::from_env();
    if let Some(host) = args.bind_host {
        config.bind_host = host;
    }
    if let Some(port) = args.control_port {
        config.control_port = port;
    }
    if let Some(port) = args.admin_port {
        config.admin_port = port;
    }
    if let Some(path) = args.manifest {
        config.manifest_path = path;
    }
    if let Some(url) = args.redis_url {
        config.redis_url = Some(url);
    }

    info!(
        control = %config.control_addr(),
        admin = %config.admin_addr(),
        manifest = %config.manifest_path.display(),
        "Starting toolgate"
    );

    // --- Core state ---
    let gateway = Arc::new(ToolGateway::new(config.dispatch_timeout));
    gateway
        .register_builtins()
        .await
        .context("builtin tool registration failed")?;
    info!("Registered builtin tools");

    let manifest = Arc::new(
        ManifestStore::open(&config.manifest_path)
            .await
            .context("manifest open failed")?,
    );

    let runner = Arc::new(ProcessRunner::new(
        config.port_range_start,
        config.port_range_end,
    ));

    let supervisor = Arc::new(Supervisor::new(
        gateway.clone(),
        runner,
        manifest,
        SupervisorConfig {
            probe_timeout: config.probe_timeout,
            registration_timeout: config.registration_timeout,
            sweep_interval: config.health_sweep_interval,
        },
    ));

    // --- Event bus (optional) ---
    let bus: Option<Arc<dyn EventBus>> = match &config.redis_url {
        Some(url) => try_connect_bus(url)
            .await
            .map(|bus| Arc::new(bus) as Arc<dyn EventBus>),
        None => None,
    };
    if bus.is_none() {
        info!("No event bus configured; registry events stay local");
    }

    let fanout = Arc::new(FanOut::new(bus));
    let cancel = supervisor.cancellation_token();

    // Fan-out subscribes before boot recovery so recovery registrations
    // are observed by the bus.
    tokio::spawn(FanOut::run(
        fanout.clone(),
        gateway.subscribe_events(),
        cancel.clone(),
    ));

    tokio::spawn(ResultCache::run_sweeper(
        gateway.cache().clone(),
        std::time::Duration::from_secs(60),
        cancel.clone(),
    ));

    // --- Boot recovery ---
    let report = supervisor.bootstrap().await;
    info!(
        external = report.restored_external,
        spawned = report.restored_spawned,
        predefined = report.predefined_registered,
        "Provider recovery complete"
    );

    tokio::spawn(Supervisor::run_health_sweep(supervisor.clone()));

    // --- Network planes ---
    let state = AppState::new(
        gateway.clone(),
        supervisor.clone(),
        Arc::new(Catalog::bundled()),
        fanout,
        ServerRole::Gateway,
        config.admin_token.clone(),
    );

    let control_addr = config.control_addr();
    let control_state = state.clone();
    let control_cancel = cancel.clone();
    let control = tokio::spawn(async move {
        toolgate_server::control::serve_control_plane(&control_addr, control_state, control_cancel)
            .await
    });

    let admin_addr = config.admin_addr();
    let admin_state = state.clone();
    let admin_cancel = cancel.clone();
    let admin = tokio::spawn(async move {
        toolgate_server::admin::serve_admin_api(&admin_addr, admin_state, admin_cancel).await
    });

    info!("Toolgate is up");

    // --- Shutdown ---
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
        }
        result = control => {
            match result {
                Ok(Err(e)) => {
                    error!(error = %e, "Control plane failed");
                    supervisor.shutdown().await;
                    return Err(e);
                }
                _ => info!("Control plane stopped"),
            }
        }
        result = admin => {
            match result {
                Ok(Err(e)) => {
                    error!(error = %e, "Admin API failed");
                    supervisor.shutdown().await;
                    return Err(e);
                }
                _ => info!("Admin API stopped"),
            }
        }
    }

    supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
