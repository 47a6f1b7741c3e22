use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

use crate::membership::types::PeerId;

/// Protocol constants shared by every node of a group.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Target number of gossip recipients per round (`K`).
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Ticks of silence before a peer is suspected.
    #[serde(default = "default_t_suspect")]
    pub t_suspect: u64,

    /// Further ticks of silence before a suspected peer is evicted.
    #[serde(default = "default_t_fail")]
    pub t_fail: u64,

    /// Ticks between local heartbeat increments (`H`).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    /// Well-known node that admits new members.
    #[serde(default = "default_introducer")]
    pub introducer: PeerId,
}

fn default_fanout() -> usize {
    3
}

fn default_t_suspect() -> u64 {
    5
}

fn default_t_fail() -> u64 {
    5
}

fn default_heartbeat_interval() -> u64 {
    1
}

fn default_introducer() -> PeerId {
    PeerId::new(1, 0)
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            fanout: default_fanout(),
            t_suspect: default_t_suspect(),
            t_fail: default_t_fail(),
            heartbeat_interval: default_heartbeat_interval(),
            introducer: default_introducer(),
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fanout == 0 {
            bail!("fanout must be at least 1");
        }
        if self.heartbeat_interval == 0 {
            bail!("heartbeat_interval must be at least 1");
        }
        if self.t_suspect == 0 || self.t_fail == 0 {
            bail!("t_suspect and t_fail must both be at least 1");
        }
        Ok(())
    }

    /// Silence after which a suspected peer is evicted.
    pub fn t_remove(&self) -> u64 {
        self.t_suspect + self.t_fail
    }
}

/// Parameters of a simulated run.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_nodes")]
    pub nodes: u32,

    /// Probability that the emulated network loses a message.
    #[serde(default)]
    pub drop_rate: f64,

    #[serde(default = "default_total_ticks")]
    pub total_ticks: u64,

    /// Tick at which nodes are crashed.
    #[serde(default = "default_fail_at")]
    pub fail_at: u64,

    /// How many nodes crash at `fail_at`; 0 disables failure injection.
    #[serde(default = "default_fail_count")]
    pub fail_count: usize,

    /// Wall-clock length of one logical tick in the binary.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Optional address for the HTTP inspection endpoint.
    #[serde(default)]
    pub http: Option<SocketAddr>,
}

fn default_nodes() -> u32 {
    10
}

fn default_total_ticks() -> u64 {
    700
}

fn default_fail_at() -> u64 {
    100
}

fn default_fail_count() -> usize {
    1
}

fn default_tick_millis() -> u64 {
    10
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            drop_rate: 0.0,
            total_ticks: default_total_ticks(),
            fail_at: default_fail_at(),
            fail_count: default_fail_count(),
            tick_millis: default_tick_millis(),
            http: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            bail!("a simulation needs at least one node");
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            bail!("drop_rate must be within 0.0..=1.0, got {}", self.drop_rate);
        }
        if self.tick_millis == 0 {
            bail!("tick_millis must be at least 1");
        }
        if self.fail_count >= self.nodes as usize {
            bail!(
                "fail_count ({}) must leave at least one node alive out of {}",
                self.fail_count,
                self.nodes
            );
        }
        Ok(())
    }
}

/// Everything a run needs; loadable from a JSON file where every field is
/// optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;
        self.simulation.validate()
    }
}
