use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{qlog_debug, Error, Result};

fn default_max_tasks_per_agent() -> usize {
    3
}

fn default_monitor_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How many tasks a single agent may run concurrently.
    #[serde(default = "default_max_tasks_per_agent")]
    pub max_tasks_per_agent: usize,
    /// Seconds between conflict monitor passes.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_tasks_per_agent: default_max_tasks_per_agent(),
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

impl Config {
    pub fn quorum_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".quorum"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::quorum_dir()?.join("quorum.toml"))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        qlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            qlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        qlog_debug!(
            "Config loaded: max_tasks_per_agent={}, monitor_interval_secs={}",
            config.max_tasks_per_agent,
            config.monitor_interval_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let quorum_dir = Self::quorum_dir()?;
        qlog_debug!("Config::save quorum_dir={}", quorum_dir.display());
        if !quorum_dir.exists() {
            qlog_debug!("Creating quorum directory");
            fs::create_dir_all(&quorum_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        qlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
