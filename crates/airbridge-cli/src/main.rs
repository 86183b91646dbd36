//! `airbridge` – the robot-side cloud bridge.
//!
//! This binary:
//!
//! 1. Loads `~/.airbridge/config.toml` and `AIR_*` overrides, refusing to
//!    start without robot credentials.
//! 2. Builds the type registry from the built-in catalog and the configured
//!    schema directories.
//! 3. Connects to the cloud broker, optionally starts the compose workload
//!    and the vitals sampler, then runs the [`Bridge`] loop.
//! 4. Intercepts **Ctrl-C** to announce the robot offline and exit cleanly.
//!
//! The middleware side is served by the in-process simulator; a real
//! middleware binding plugs in through [`MiddlewareClient`].

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use airbridge_cloud::{CloudError, ConnectOptions, TopicPrefix, WsLink, presence};
use airbridge_middleware::{
    CommandDispatcher, IdlError, MiddlewareClient, SimMiddleware, TypeRegistry,
};
use airbridge_runtime::vitals::run_sampler;
use airbridge_runtime::{
    Bridge, ComposeCli, ContainerManager, DisabledContainers, HostVitals, RegistryLogin,
    init_tracing,
};

use config::BridgeConfig;

/// Robot-side bridge between a cloud broker and the robot middleware
#[derive(Parser)]
#[command(name = "airbridge", version, about)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, env = "AIR_DEBUG")]
    debug: bool,

    /// Configuration file [default: ~/.airbridge/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Error, Debug)]
enum AppError {
    #[error("schema loading failed: {0}")]
    Schema(#[from] IdlError),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The OTLP exporter is installed before the Tokio runtime exists.
    let _guard = init_tracing("airbridge", cli.debug);

    print_banner();

    let cfg = match config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("  {}: {e}", "Config error".red().bold());
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  Robot {} of tenant {}",
        cfg.robot_id.bold(),
        cfg.tenant_uuid.dimmed()
    );

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("  {}: {e}", "Runtime error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, stop_rx)) {
        Ok(()) => {
            println!("{}", "  ✓ Exiting airbridge.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "bridge stopped");
            eprintln!("  {}: {e}", "Error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: BridgeConfig, shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
    // ── Types ─────────────────────────────────────────────────────────────
    let mut registry = TypeRegistry::with_builtin()?;
    for dir in &cfg.middleware.schema_dirs {
        let loaded = registry.load_dir(dir)?;
        info!(dir = %dir.display(), interfaces = loaded, "loaded interface definitions");
    }
    registry.warn_dangling();

    let middleware = Arc::new(SimMiddleware::with_demo_interfaces());
    let (dispatcher, samples) = CommandDispatcher::new(
        Arc::new(registry),
        middleware.clone(),
        Duration::from_secs(cfg.middleware.invocation_timeout_secs),
    );

    // ── Cloud link ────────────────────────────────────────────────────────
    let prefix = TopicPrefix::new(&cfg.tenant_uuid, &cfg.robot_id);
    let options = ConnectOptions {
        url: cfg.cloud.url.clone(),
        client_id: prefix.client_id(),
        username: Some(prefix.client_id()),
        password: Some(cfg.token.expose().to_string()),
        keep_alive: Duration::from_secs(cfg.cloud.keep_alive_secs),
        reconnect_delay: Duration::from_secs(cfg.cloud.reconnect_delay_secs),
        will: Some(presence::last_will(&prefix)?),
        birth: Some(presence::birth(&prefix)?),
    };
    let (link, inbound, link_task) = WsLink::spawn(options);

    // ── Containers ────────────────────────────────────────────────────────
    let containers: Arc<dyn ContainerManager> = if cfg.enable_containers {
        let cli = ComposeCli::new(&cfg.containers.compose_path);
        if !cfg.container_registry.password.is_empty() {
            let registry = RegistryLogin {
                url: cfg.container_registry.url.clone(),
                username: cfg.container_registry.username.clone(),
                password: cfg.container_registry.password.expose().to_string(),
            };
            if let Err(e) = cli.login(&registry).await {
                error!(error = %e, "unable to log into private container registry");
            }
        }
        let state = cli.start().await;
        info!(state = ?state.state, "container workload started");
        Arc::new(cli)
    } else {
        info!("containers not enabled");
        Arc::new(DisabledContainers)
    };

    // ── Vitals ────────────────────────────────────────────────────────────
    let vitals = if cfg.enable_vitals {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(run_sampler(
            Arc::new(HostVitals::new()),
            Duration::from_millis(cfg.vitals.period_ms),
            tx,
            shutdown.clone(),
        ));
        Some(rx)
    } else {
        info!("vitals disabled");
        None
    };

    // ── Bridge ────────────────────────────────────────────────────────────
    let bridge = Bridge::new(prefix, link.clone(), Arc::new(dispatcher), containers);
    let middleware: Arc<dyn MiddlewareClient> = middleware;
    let outcome = bridge.run(middleware, inbound, samples, vitals, shutdown).await;

    link.close();
    if let Err(e) = link_task.await {
        warn!(error = %e, "cloud link task ended abnormally");
    }
    outcome.map_err(AppError::from)
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"     _    _      ____       _     _            "#.bold().cyan());
    println!("{}", r#"    / \  (_)_ __| __ ) _ __(_) __| | __ _  ___ "#.bold().cyan());
    println!("{}", r#"   / _ \ | | '__|  _ \| '__| |/ _` |/ _` |/ _ \"#.bold().cyan());
    println!("{}", r#"  / ___ \| | |  | |_) | |  | | (_| | (_| |  __/"#.bold().cyan());
    println!("{}", r#" /_/   \_\_|_|  |____/|_|  |_|\__,_|\__, |\___|"#.bold().cyan());
    println!("{}", r#"                                    |___/      "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "airbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Cloud bridge for robot middleware");
    println!();
}
