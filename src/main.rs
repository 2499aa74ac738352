use anyhow::Result;
use gridfleet::adapters::outbound::{init_combined_logger, init_tracing_logger};
use gridfleet::application::FleetKernel;
use gridfleet::domains::task::TaskPriority;
use gridfleet::Config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // set_global_default leaves the `log` slot free for fast_log.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting gridfleet");

    let config = match Config::from_file("config.toml").await {
        Ok(config) => {
            info!("Configuration loaded from config.toml");
            config
        }
        Err(e) => {
            warn!("Using default configuration: {}", e);
            Config::default()
        }
    };

    let logger = match &config.logging.file {
        Some(path) => init_combined_logger(path),
        None => init_tracing_logger(),
    };
    let kernel = Arc::new(FleetKernel::new(config.clone(), logger));

    if let Some(path) = &config.storage.state_file {
        if Path::new(path).exists() {
            match kernel.load_state(path) {
                Ok(()) => info!("Restored state from {}", path),
                Err(e) => error!("Ignoring state file {}: {}", path, e),
            }
        }
    }

    while kernel.registry().len() < config.fleet.initial_agents {
        let id = kernel.add_agent(None)?;
        info!("Agent {} added", id);
    }

    let env = kernel.environment();
    let demo = [env.random_free_cell(100, 2), env.random_free_cell(100, 2)];
    let waypoints: Vec<_> = demo.into_iter().flatten().collect();
    if !waypoints.is_empty() {
        let id = kernel.create_task(waypoints, TaskPriority::Normal)?;
        info!("Demo task {} queued", id);
    }

    // Agents are only eligible while idle, so hand out work before they start.
    let assigned = kernel.step();
    info!("Initial dispatch assigned {} tasks", assigned);
    kernel.start()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(
        config.simulation.stats_interval_secs.max(1),
    ));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match serde_json::to_string(&kernel.statistics()) {
                    Ok(json) => info!("stats {}", json),
                    Err(e) => error!("Failed to serialise statistics: {}", e),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    info!("Shutting down gridfleet");
    let stopping = Arc::clone(&kernel);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;

    if let Some(path) = &config.storage.state_file {
        match kernel.save_state(path) {
            Ok(()) => info!("State saved to {}", path),
            Err(e) => error!("Failed to save state to {}: {}", path, e),
        }
    }

    Ok(())
}
