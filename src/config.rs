//! YAML configuration, loaded with `serde_yaml`.
//!
//! One section per concern: `targets`, `queue_manager`, `dpe`, `borg`,
//! `rpc`. `HERMES_CONF` selects the daemon config path; `HERMES_CLIENT_CONF`
//! selects the client's.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HermesError, Result};
use crate::target::DeviceKind;

pub const HERMES_CONF_VAR: &str = "HERMES_CONF";
pub const HERMES_CLIENT_CONF_VAR: &str = "HERMES_CLIENT_CONF";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub kind: DeviceKind,
    /// Backing file path; ignored for `DeviceKind::Ram`.
    #[serde(default)]
    pub path: Option<String>,
    pub capacity: u64,
    pub bandwidth: f64,
    #[serde(default = "default_latency_us")]
    pub latency_us: f64,
    #[serde(default = "default_slab_sizes")]
    pub slab_sizes: Vec<u64>,
}

fn default_latency_us() -> f64 {
    100.0
}

fn default_slab_sizes() -> Vec<u64> {
    vec![4 * 1024, 64 * 1024, 1024 * 1024, 16 * 1024 * 1024]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueManagerConfig {
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_max_lanes")]
    pub max_lanes: usize,
}

fn default_queue_depth() -> usize {
    1024
}
fn default_max_lanes() -> usize {
    num_cpus::get().max(1)
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self { queue_depth: default_queue_depth(), max_lanes: default_max_lanes() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DpePolicy {
    RoundRobin,
    MinimizeIoTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpeConfig {
    #[serde(default = "default_dpe_policy")]
    pub policy: DpePolicy,
    #[serde(default = "default_weight_freq")]
    pub weight_freq: f32,
    #[serde(default = "default_weight_recency")]
    pub weight_recency: f32,
    #[serde(default = "default_weight_size")]
    pub weight_size: f32,
    #[serde(default = "default_tau_secs")]
    pub tau_secs: f32,
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
}

fn default_dpe_policy() -> DpePolicy {
    DpePolicy::MinimizeIoTime
}
fn default_weight_freq() -> f32 {
    0.4
}
fn default_weight_recency() -> f32 {
    0.4
}
fn default_weight_size() -> f32 {
    0.2
}
fn default_tau_secs() -> f32 {
    30.0
}
fn default_histogram_bins() -> usize {
    10
}

impl Default for DpeConfig {
    fn default() -> Self {
        Self {
            policy: default_dpe_policy(),
            weight_freq: default_weight_freq(),
            weight_recency: default_weight_recency(),
            weight_size: default_weight_size(),
            tau_secs: default_tau_secs(),
            histogram_bins: default_histogram_bins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorgConfig {
    #[serde(default = "default_borg_period_ms")]
    pub period_ms: u64,
    #[serde(default = "default_borg_batch_size")]
    pub batch_size: usize,
}

fn default_borg_period_ms() -> u64 {
    250
}
fn default_borg_batch_size() -> usize {
    256
}

impl Default for BorgConfig {
    fn default() -> Self {
        Self { period_ms: default_borg_period_ms(), batch_size: default_borg_batch_size() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    #[serde(default)]
    pub hosts: Vec<String>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}
fn default_port() -> u16 {
    8211
}
fn default_num_threads() -> usize {
    num_cpus::get().max(1)
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            port: default_port(),
            num_threads: default_num_threads(),
            hosts: Vec::new(),
        }
    }
}

/// Top-level server config, deserialised from the `HERMES_CONF` YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node_id: u32,
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub queue_manager: QueueManagerConfig,
    #[serde(default)]
    pub dpe: DpeConfig,
    #[serde(default)]
    pub borg: BorgConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
}

impl NodeConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s)
            .map_err(|e| HermesError::InvalidArgument(format!("malformed config: {e}")))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| HermesError::Io { target: path.display().to_string(), detail: e.to_string() })?;
        Self::from_yaml_str(&raw)
    }

    /// Resolve the config path from `HERMES_CONF`, or an explicit `--config`
    /// override.
    pub fn load(explicit_path: Option<&str>) -> Result<Self> {
        let path = explicit_path
            .map(String::from)
            .or_else(|| env::var(HERMES_CONF_VAR).ok())
            .ok_or_else(|| {
                HermesError::InvalidArgument(format!(
                    "no config path given and {HERMES_CONF_VAR} is unset"
                ))
            })?;
        Self::load_from_path(Path::new(&path))
    }
}

/// Client-side config: just enough to dial an RPC endpoint, loaded from
/// `HERMES_CLIENT_CONF`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub hosts: Vec<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ClientConfig {
    pub fn load(explicit_path: Option<&str>) -> Result<Self> {
        let path = explicit_path
            .map(String::from)
            .or_else(|| env::var(HERMES_CLIENT_CONF_VAR).ok())
            .ok_or_else(|| {
                HermesError::InvalidArgument(format!(
                    "no client config path given and {HERMES_CLIENT_CONF_VAR} is unset"
                ))
            })?;
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| HermesError::Io { target: path, detail: e.to_string() })?;
        serde_yaml::from_str(&raw)
            .map_err(|e| HermesError::InvalidArgument(format!("malformed client config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_targets_section() {
        let yaml = r#"
targets:
  - name: ram0
    kind: ram
    capacity: 1048576
    bandwidth: 10000
"#;
        let cfg = NodeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.targets.len(), 1);
        assert_eq!(cfg.targets[0].kind, DeviceKind::Ram);
        assert_eq!(cfg.dpe.policy, DpePolicy::MinimizeIoTime);
        assert_eq!(cfg.borg.period_ms, 250);
    }
}
