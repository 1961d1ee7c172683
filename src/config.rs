// Copyright (c) 2026 Marketmesh
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Node configuration: TOML file plus environment override, validated once
//! at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Prefix applied to environment override keys: `MARKETMESH_P2P_MAX_PEERS`
/// overrides `p2p.maxPeers`, etc.
const ENV_PREFIX: &str = "MARKETMESH";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("io")]
    Io,
    /// The file or an environment override did not parse as valid TOML/value.
    #[error("parse: {0}")]
    Parse(String),
    /// A validated field fell outside its allowed range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field, in `section.key` form.
        field: &'static str,
        /// Human-readable reason.
        reason: &'static str,
    },
}

/// `p2p.*` settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct P2pConfig {
    /// TCP port the swarm listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on connected peers.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Lower bound on connected peers before discovery kicks in.
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,
    /// Seconds of inactivity before a peer is considered unhealthy.
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout: u64,
    /// Weighted-confidence quorum fraction, `(0, 1]`.
    #[serde(default = "default_quorum")]
    pub validation_quorum: f64,
    /// Minimum distinct voters required to conclude a session in favor.
    #[serde(default = "default_min_voters")]
    pub min_voters: usize,
    /// Seconds before a voting session force-concludes.
    #[serde(default = "default_voting_timeout")]
    pub voting_timeout: u64,
    /// Bootstrap peer multiaddrs dialed at startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
}

fn default_port() -> u16 {
    9000
}
fn default_max_peers() -> usize {
    50
}
fn default_min_peers() -> usize {
    5
}
fn default_peer_timeout() -> u64 {
    30
}
fn default_quorum() -> f64 {
    0.66
}
fn default_min_voters() -> usize {
    3
}
fn default_voting_timeout() -> u64 {
    20
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_peers: default_max_peers(),
            min_peers: default_min_peers(),
            peer_timeout: default_peer_timeout(),
            validation_quorum: default_quorum(),
            min_voters: default_min_voters(),
            voting_timeout: default_voting_timeout(),
            bootstrap_peers: Vec::new(),
        }
    }
}

/// `security.*` settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Path to the identity key file.
    #[serde(default = "default_key_file")]
    pub key_file: String,
    /// Starting `minReputation` threshold, `[0, 1]`.
    #[serde(default = "default_min_reputation")]
    pub min_reputation: f64,
    /// Maximum confidence penalty on a failed validation, `(0, 1]`.
    #[serde(default = "default_max_penalty")]
    pub max_penalty: f64,
    /// Minimum confidence a vote must carry to count, `(0, 1]`.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Authority verification lease lifetime, in seconds.
    #[serde(default = "default_token_expiry")]
    pub token_expiry: u64,
}

fn default_key_file() -> String {
    "./data/identity.key".to_string()
}
fn default_min_reputation() -> f64 {
    0.5
}
fn default_max_penalty() -> f64 {
    0.5
}
fn default_min_confidence() -> f64 {
    0.1
}
fn default_token_expiry() -> u64 {
    24 * 3600
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
            min_reputation: default_min_reputation(),
            max_penalty: default_max_penalty(),
            min_confidence: default_min_confidence(),
            token_expiry: default_token_expiry(),
        }
    }
}

/// `scheduler.*` settings governing retry of transient peer connects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrent connection attempts.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retry attempts per bootstrap address.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base retry delay in seconds (scaled per attempt by the caller).
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

fn default_max_concurrent() -> usize {
    16
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// Node configuration root, loaded from TOML and overridden by environment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory for identity, audit log, and local state.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Monitoring HTTP listen address (`/metrics`, `/healthz`).
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// P2P settings.
    #[serde(default)]
    pub p2p: P2pConfig,
    /// Security settings.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Scheduler/retry settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_http_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn env_override(section: &str, key: &str) -> Option<String> {
    let var = format!("{ENV_PREFIX}_{}_{}", section.to_uppercase(), key.to_uppercase());
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

impl NodeConfig {
    /// Load from a TOML file at `path`, then apply environment overrides,
    /// then validate. Any failure is fatal to startup.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::Io)?;
        let mut cfg: NodeConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from defaults (used by tests and quick-start wiring), still
    /// subject to environment overrides and validation.
    pub fn from_defaults() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_override("p2p", "port") {
            self.p2p.port = v.parse().map_err(|_| ConfigError::Parse("p2p.port".to_string()))?;
        }
        if let Some(v) = env_override("p2p", "maxPeers") {
            self.p2p.max_peers = v.parse().map_err(|_| ConfigError::Parse("p2p.maxPeers".to_string()))?;
        }
        if let Some(v) = env_override("p2p", "minPeers") {
            self.p2p.min_peers = v.parse().map_err(|_| ConfigError::Parse("p2p.minPeers".to_string()))?;
        }
        if let Some(v) = env_override("p2p", "validationQuorum") {
            self.p2p.validation_quorum = v.parse().map_err(|_| ConfigError::Parse("p2p.validationQuorum".to_string()))?;
        }
        if let Some(v) = env_override("security", "minReputation") {
            self.security.min_reputation = v.parse().map_err(|_| ConfigError::Parse("security.minReputation".to_string()))?;
        }
        if let Some(v) = env_override("security", "maxPenalty") {
            self.security.max_penalty = v.parse().map_err(|_| ConfigError::Parse("security.maxPenalty".to_string()))?;
        }
        if let Some(v) = env_override("node", "dataDir") {
            self.data_dir = v;
        }
        if let Some(v) = env_override("node", "httpAddr") {
            self.http_addr = v;
        }
        Ok(())
    }

    /// Validate every enumerated range. Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.p2p.port == 0 {
            return Err(ConfigError::Invalid { field: "p2p.port", reason: "must be 1-65535" });
        }
        if self.p2p.min_peers > self.p2p.max_peers {
            return Err(ConfigError::Invalid { field: "p2p.minPeers", reason: "must not exceed p2p.maxPeers" });
        }
        if !(0.0..=1.0).contains(&self.p2p.validation_quorum) || self.p2p.validation_quorum <= 0.0 {
            return Err(ConfigError::Invalid { field: "p2p.validationQuorum", reason: "must be in (0, 1]" });
        }
        if self.p2p.min_voters == 0 {
            return Err(ConfigError::Invalid { field: "p2p.minVoters", reason: "must be at least 1" });
        }
        if !(0.0..=1.0).contains(&self.security.min_reputation) {
            return Err(ConfigError::Invalid { field: "security.minReputation", reason: "must be in [0, 1]" });
        }
        if !(0.0..=1.0).contains(&self.security.max_penalty) || self.security.max_penalty <= 0.0 {
            return Err(ConfigError::Invalid { field: "security.maxPenalty", reason: "must be in (0, 1]" });
        }
        if !(0.0..=1.0).contains(&self.security.min_confidence) || self.security.min_confidence <= 0.0 {
            return Err(ConfigError::Invalid { field: "security.minConfidence", reason: "must be in (0, 1]" });
        }
        if self.scheduler.max_concurrent == 0 {
            return Err(ConfigError::Invalid { field: "scheduler.maxConcurrent", reason: "must be at least 1" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation must be serialized across tests in this
    // process; std::env::set_var is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_validate_clean() {
        let cfg = NodeConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn min_peers_over_max_is_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.p2p.min_peers = 100;
        cfg.p2p.max_peers = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_override_maps_dot_to_underscore() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("MARKETMESH_P2P_MAXPEERS", "12");
        let cfg = NodeConfig::from_defaults().unwrap();
        assert_eq!(cfg.p2p.max_peers, 12);
        std::env::remove_var("MARKETMESH_P2P_MAXPEERS");
    }

    #[test]
    fn quorum_out_of_range_is_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.p2p.validation_quorum = 1.5;
        assert!(cfg.validate().is_err());
    }
}
