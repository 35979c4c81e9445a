//! # CloudClaw — Capacity Retry Scheduler & Telegram Control Plane
//!
//! Keeps retrying instance creation against capacity-constrained cloud
//! regions and exposes task and bot management over HTTP and Telegram.
//!
//! Usage:
//!   cloudclaw                            # Serve with ~/.cloudclaw/config.toml
//!   cloudclaw --config ./panel.toml      # Custom config file
//!   cloudclaw --port 8080 --verbose      # Override the gateway port

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cloudclaw_channels::TelegramClient;
use cloudclaw_cloud::RestCloudClient;
use cloudclaw_control::{CommandDispatcher, ControlBot};
use cloudclaw_core::config::CloudClawConfig;
use cloudclaw_db::PanelDb;
use cloudclaw_gateway::AppState;
use cloudclaw_scheduler::TaskScheduler;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cloudclaw",
    version,
    about = "☁️ CloudClaw — capacity retry scheduler with a Telegram control plane"
)]
struct Cli {
    /// Config file (default: ~/.cloudclaw/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: Option<&str>) -> Result<CloudClawConfig> {
    let config = match path {
        Some(p) => CloudClawConfig::load_from(&PathBuf::from(shellexpand::tilde(p).to_string()))?,
        None => CloudClawConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cloudclaw=debug,tower_http=debug"
    } else {
        "cloudclaw=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    // Open database
    let db_path = config.database.resolved_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(PanelDb::open(&db_path)?);
    tracing::info!("💾 Database: {}", db_path.display());

    let cloud = Arc::new(RestCloudClient::new(&config.cloud));
    let telegram = Arc::new(TelegramClient::new(&config.telegram));

    let scheduler = TaskScheduler::from_config(db.clone(), cloud.clone(), &config.scheduler);
    if config.scheduler.autostart {
        scheduler.start();
    }

    let dispatcher = CommandDispatcher::new(db.clone(), cloud, config.app.clone(), &config.cloud);
    let bot = ControlBot::load(db, telegram, dispatcher, &config.telegram)?;
    match bot.start_if_enabled() {
        Ok(true) => {}
        Ok(false) => tracing::info!("🤖 Telegram bot disabled or not configured"),
        Err(e) => tracing::warn!("⚠️ Telegram bot not started: {e}"),
    }

    println!("☁️ {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));
    println!("   🌐 API:      http://{}:{}/api/v1/tasks", config.gateway.host, config.gateway.port);
    println!("   🗄️  Database: {}", db_path.display());
    println!();

    let state = AppState {
        gateway_config: config.gateway.clone(),
        start_time: std::time::Instant::now(),
        scheduler: scheduler.clone(),
        bot: bot.clone(),
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("👋 Shutting down");
    };
    cloudclaw_gateway::serve(state, shutdown).await?;

    bot.stop_bot();
    scheduler.stop();
    Ok(())
}
