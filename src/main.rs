// src/main.rs - Trading Venue Server Entry Point
use anyhow::{anyhow, Context, Result};
use config::{Config, ConfigError, Environment, File};
use std::env;
use tokio::signal;
use tracing::{info, warn, Level};

use trading_venue::{transport::TradingServer, AppConfig, MatchingEngine};

// Global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Configuration loading
fn load_config() -> Result<AppConfig, ConfigError> {
    let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

    let settings = Config::builder()
        .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
        .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
        .add_source(Environment::with_prefix("VENUE").separator("_"))
        .build()?;

    settings.try_deserialize()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color_eyre for better error messages
    color_eyre::install().map_err(|err| anyhow!("Failed to install color_eyre: {}", err))?;

    // Load configuration
    let config = load_config().unwrap_or_else(|_| {
        warn!("Failed to load config, using defaults");
        AppConfig::default()
    });

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(config.logging.level.parse::<Level>().unwrap_or(Level::INFO))
        .with_target(false)
        .with_thread_ids(true);

    if config.logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.pretty().init();
    }

    info!("Starting Trading Venue v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    // Build the engine and launch its worker pool and scheduler
    let engine = MatchingEngine::new(config.engine.clone());
    engine.start();

    let server = TradingServer::new(engine, config.server.clone());

    // Graceful shutdown
    let shutdown_signal = async {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received, shutting down gracefully...");
    };

    tokio::select! {
        result = server.run() => {
            result.context("Server error")?;
        }
        _ = shutdown_signal => {}
    }

    info!("Server shutdown complete");
    Ok(())
}
