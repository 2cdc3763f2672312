// src/config.rs
use serde::Deserialize;
use std::{fs, net::Ipv4Addr, path::Path};

use crate::protocol;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local interface to join/send multicast on.
    pub interface: Ipv4Addr,
    pub incremental: ChannelCfg,
    pub snapshot: ChannelCfg,
    pub output: ChannelCfg,
    pub conflation_interval_ms: u64,
    pub recovery_timeout_ms: u64,
    pub stats_interval_secs: u64,
    pub recv_buffer_bytes: usize,
    /// Structured JSON logs to stdout
    pub json_logs: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChannelCfg {
    pub group: Ipv4Addr,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            incremental: ChannelCfg {
                group: protocol::INCREMENTAL_GROUP.parse().unwrap(),
                port: protocol::INCREMENTAL_PORT,
            },
            snapshot: ChannelCfg {
                group: protocol::SNAPSHOT_GROUP.parse().unwrap(),
                port: protocol::SNAPSHOT_PORT,
            },
            output: ChannelCfg {
                group: protocol::OUTPUT_GROUP.parse().unwrap(),
                port: protocol::OUTPUT_PORT,
            },
            conflation_interval_ms: 100,
            recovery_timeout_ms: 5000,
            stats_interval_secs: 10,
            recv_buffer_bytes: 4 << 20,
            json_logs: false,
        }
    }
}

impl AppConfig {
    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads from `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, ch) in [
            ("incremental", &self.incremental),
            ("snapshot", &self.snapshot),
            ("output", &self.output),
        ] {
            if !ch.group.is_multicast() {
                anyhow::bail!("{name}.group must be a multicast IPv4 address");
            }
        }
        if self.conflation_interval_ms == 0 {
            anyhow::bail!("conflation_interval_ms must be > 0");
        }
        if self.recovery_timeout_ms == 0 {
            anyhow::bail!("recovery_timeout_ms must be > 0");
        }
        Ok(())
    }
}
