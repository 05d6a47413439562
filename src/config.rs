use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use tracing::info;

use crate::resolver::ResolverConfig;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub version: Option<String>,
    /// Bound on each provider call in milliseconds; 0 disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Seconds between refresh sweeps in daemon mode; 0 disables them.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Seconds between warm-up passes and stats log lines in daemon mode.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// Hosts the daemon keeps resolved.
    #[serde(default)]
    pub warm_hosts: Vec<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            version: None,
            timeout_ms: default_timeout_ms(),
            refresh_interval_secs: default_refresh_interval_secs(),
            stats_interval_secs: default_stats_interval_secs(),
            warm_hosts: Vec::new(),
        }
    }
}

impl FileConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

impl From<&FileConfig> for ResolverConfig {
    fn from(cfg: &FileConfig) -> Self {
        ResolverConfig {
            timeout: cfg.timeout(),
            provider: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read config file: {}", path.display()))?;
    let cfg: FileConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parse config file: {}", path.display()))?;

    if let Some(version) = cfg.version.as_ref() {
        info!(target = "config", version = %version, "config loaded");
    }

    for host in &cfg.warm_hosts {
        if host.trim().is_empty() {
            anyhow::bail!("warm_hosts contains an empty host");
        }
    }

    Ok(cfg)
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_stats_interval_secs() -> u64 {
    60
}
