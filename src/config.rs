//! Runtime settings for both binaries.
//!
//! Defaults come from `protocol`. The server can read overrides from a TOML
//! file; positional CLI arguments are applied on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{timeouts, DEFAULT_MAX_WORKERS};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Local address to bind; any IPv4 address unless overridden
    pub bind_host: String,
    pub port: u16,
    /// Artifact name prefix (see `FilenameSequencer`)
    pub file_dir: String,
    /// Directory artifact names are relative to
    pub root: PathBuf,
    pub tick_ms: u64,
    pub idle_ticks: u32,
    pub max_workers: usize,
    /// How long shutdown waits for in-flight workers; defaults to one idle window
    pub drain_grace_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 0,
            file_dir: String::new(),
            root: PathBuf::from("."),
            tick_ms: timeouts::TICK_MS,
            idle_ticks: timeouts::IDLE_TICKS,
            max_workers: DEFAULT_MAX_WORKERS,
            drain_grace_ms: None,
        }
    }
}

impl ServerConfig {
    /// Read a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: ServerConfig =
            toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            anyhow::bail!("tick_ms must be greater than zero");
        }
        if self.idle_ticks == 0 {
            anyhow::bail!("idle_ticks must be greater than zero");
        }
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than zero");
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn drain_grace(&self) -> Duration {
        match self.drain_grace_ms {
            Some(ms) => Duration::from_millis(ms),
            None => timeouts::idle_window(self.tick(), self.idle_ticks),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub file: PathBuf,
    pub tick: Duration,
    pub connect_ticks: u32,
    pub progress: bool,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, file: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            file: file.into(),
            tick: timeouts::tick(),
            connect_ticks: timeouts::CONNECT_TICKS,
            progress: false,
        }
    }
}
