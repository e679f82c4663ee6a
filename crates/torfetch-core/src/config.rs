use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::circuit::EgressConfig;

/// Global configuration loaded from `~/.config/torfetch/config.toml`.
///
/// The route itself is not configured here: it is the worker's command-line
/// identity, so the same config file serves every worker of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorfetchConfig {
    /// Fixed base remote location; each row's relative path is appended.
    pub base_url: String,
    /// Root directory fetched files are mirrored under.
    pub data_dir: PathBuf,
    /// Work database path. Default: `work.db` under the XDG state dir.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Per-fetch timeout budget in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Delay between passes over the work table, in seconds.
    #[serde(default = "default_idle_delay_secs")]
    pub idle_delay_secs: u64,
    /// Egress routes and circuit rotation.
    #[serde(default)]
    pub egress: EgressConfig,
}

fn default_fetch_timeout_secs() -> u64 {
    8
}

fn default_idle_delay_secs() -> u64 {
    1
}

impl Default for TorfetchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://change-me.example/files".to_string(),
            data_dir: PathBuf::from("data"),
            db_path: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            idle_delay_secs: default_idle_delay_secs(),
            egress: EgressConfig::default(),
        }
    }
}

impl TorfetchConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_secs(self.idle_delay_secs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("torfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<TorfetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = TorfetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

/// Load configuration from an explicit path (`--config`).
pub fn load_from(path: &Path) -> Result<TorfetchConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: TorfetchConfig = toml::from_str(&data)?;
    Ok(cfg)
}
