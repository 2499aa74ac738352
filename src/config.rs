use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    pub simulation: SimulationConfig,
    pub fleet: FleetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub width: i32,
    pub height: i32,
    /// Upper bound on interior obstacle cells; the border is not counted.
    pub max_obstacles: usize,
    pub initial_obstacle_percentage: u32,
    /// Fixed RNG seed for reproducible obstacle layouts.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fleet driver cadence (registry refresh + scheduler pass). Adjustable at runtime.
    pub fleet_tick_ms: u64,
    /// Per-agent navigation cadence.
    pub agent_tick_ms: u64,
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub initial_agents: usize,
    pub spawn_attempts: usize,
    pub spawn_margin: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where the binary writes its state on shutdown.
    pub state_file: Option<String>,
}

impl Config {
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid.width < 5 || self.grid.height < 5 {
            bail!(
                "grid must be at least 5x5, got {}x{}",
                self.grid.width,
                self.grid.height
            );
        }
        if self.grid.initial_obstacle_percentage > 100 {
            bail!(
                "initial_obstacle_percentage must be within 0..=100, got {}",
                self.grid.initial_obstacle_percentage
            );
        }
        if self.simulation.fleet_tick_ms == 0 || self.simulation.agent_tick_ms == 0 {
            bail!("tick intervals must be non-zero");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grid: GridConfig {
                width: 60,
                height: 60,
                max_obstacles: 1500,
                initial_obstacle_percentage: 25,
                seed: None,
            },
            simulation: SimulationConfig {
                fleet_tick_ms: 100,
                agent_tick_ms: 100,
                stats_interval_secs: 5,
            },
            fleet: FleetConfig {
                initial_agents: 3,
                spawn_attempts: 50,
                spawn_margin: 5,
            },
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            [grid]
            width = 20
            height = 15
            max_obstacles = 50
            initial_obstacle_percentage = 10
            seed = 7

            [simulation]
            fleet_tick_ms = 50
            agent_tick_ms = 80
            stats_interval_secs = 1

            [fleet]
            initial_agents = 2
            spawn_attempts = 10
            spawn_margin = 2
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.grid.width, 20);
        assert_eq!(config.grid.seed, Some(7));
        assert_eq!(config.simulation.agent_tick_ms, 80);
        assert!(config.logging.file.is_none());
        assert!(config.storage.state_file.is_none());
    }

    #[test]
    fn rejects_tiny_grid() {
        let mut config = Config::default();
        config.grid.width = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_tick() {
        let mut config = Config::default();
        config.simulation.agent_tick_ms = 0;
        assert!(config.validate().is_err());
    }
}
