//! Configuration for a blockchain node

use ledger_core::{Config as LedgerConfig, Miner};
use message_bus::PublisherConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node ID (peer id on the network)
    pub node_id: String,

    /// Ledger configuration
    pub ledger: LedgerConfig,

    /// Leader election
    pub election: ElectionConfig,

    /// Block admission vote
    pub vote: VoteConfig,

    /// Broadcast retry
    pub broadcast: BroadcastConfig,

    /// Dedup cache
    pub dedup: DedupConfig,

    /// Startup resync
    pub sync: SyncConfig,

    /// Mining pacing
    pub mining: MiningConfig,

    /// Demo cluster
    pub cluster: ClusterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            ledger: LedgerConfig::default(),
            election: ElectionConfig::default(),
            vote: VoteConfig::default(),
            broadcast: BroadcastConfig::default(),
            dedup: DedupConfig::default(),
            sync: SyncConfig::default(),
            mining: MiningConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

/// Leader election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Failure-detection tick (ms)
    pub tick_interval_ms: u64,

    /// How long a round without majority stays open (ms)
    pub round_timeout_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5000,
            round_timeout_ms: 3000,
        }
    }
}

/// Vote configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteConfig {
    /// Time allowed for ballots before a decision (ms)
    pub deadline_ms: u64,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self { deadline_ms: 5000 }
    }
}

/// Broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Attempts before a message is dropped
    pub max_attempts: u32,

    /// Delay between attempts (ms)
    pub retry_delay_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay_ms: 1000,
        }
    }
}

/// Dedup cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Period between wipes (ms)
    pub clear_interval_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            clear_interval_ms: 15_000,
        }
    }
}

/// Startup resync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay before asking the master for its chain (ms)
    pub startup_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 10_000,
        }
    }
}

/// Mining configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Lower bound of the random pre-mining pause (ms)
    pub pacing_min_ms: u64,

    /// Upper bound of the random pre-mining pause (ms), 0 disables pacing
    pub pacing_max_ms: u64,
}

/// Demo cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of in-process nodes
    pub size: usize,

    /// Interval between relayed block requests (ms)
    pub block_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            size: 3,
            block_interval_ms: 20_000,
        }
    }
}

/// Timings the node controller runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTimings {
    /// Election failure-detection tick
    pub election_tick: Duration,
    /// Election round lapse
    pub election_round_timeout: Duration,
    /// Vote deadline
    pub vote_deadline: Duration,
    /// Dedup wipe period
    pub dedup_clear_interval: Duration,
    /// Startup resync delay
    pub startup_sync_delay: Duration,
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Config::default().protocol()
    }
}

impl Config {
    /// Controller timings
    pub fn protocol(&self) -> ProtocolTimings {
        ProtocolTimings {
            election_tick: Duration::from_millis(self.election.tick_interval_ms),
            election_round_timeout: Duration::from_millis(self.election.round_timeout_ms),
            vote_deadline: Duration::from_millis(self.vote.deadline_ms),
            dedup_clear_interval: Duration::from_millis(self.dedup.clear_interval_ms),
            startup_sync_delay: Duration::from_millis(self.sync.startup_delay_ms),
        }
    }

    /// Publisher settings
    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            max_attempts: self.broadcast.max_attempts,
            retry_delay: Duration::from_millis(self.broadcast.retry_delay_ms),
        }
    }

    /// Miner with the configured pacing
    pub fn miner(&self) -> Miner {
        Miner::new().with_pacing(
            Duration::from_millis(self.mining.pacing_min_ms),
            Duration::from_millis(self.mining.pacing_max_ms),
        )
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(node_id) = std::env::var("NODE_ID") {
            config.node_id = node_id;
        }

        if let Ok(data_dir) = std::env::var("NODE_DATA_DIR") {
            config.ledger.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(difficulty) = std::env::var("NODE_DIFFICULTY") {
            config.ledger.difficulty = parse_var("NODE_DIFFICULTY", &difficulty)?;
        }

        if let Ok(size) = std::env::var("NODE_CLUSTER_SIZE") {
            config.cluster.size = parse_var("NODE_CLUSTER_SIZE", &size)?;
        }

        if let Ok(interval) = std::env::var("NODE_BLOCK_INTERVAL_MS") {
            config.cluster.block_interval_ms = parse_var("NODE_BLOCK_INTERVAL_MS", &interval)?;
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &str, value: &str) -> crate::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let timings = Config::default().protocol();
        assert_eq!(timings.election_tick, Duration::from_secs(5));
        assert_eq!(timings.election_round_timeout, Duration::from_secs(3));
        assert_eq!(timings.vote_deadline, Duration::from_secs(5));
        assert_eq!(timings.dedup_clear_interval, Duration::from_secs(15));
        assert_eq!(timings.startup_sync_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_default_publisher() {
        let publisher = Config::default().publisher();
        assert_eq!(publisher.max_attempts, 1);
        assert_eq!(publisher.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            "node_id = \"n7\"\n[vote]\ndeadline_ms = 250\n[ledger]\ndifficulty = 1\n",
        )
        .unwrap();

        assert_eq!(config.node_id, "n7");
        assert_eq!(config.protocol().vote_deadline, Duration::from_millis(250));
        assert_eq!(config.ledger.difficulty, 1);
        assert_eq!(config.election.tick_interval_ms, 5000);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        assert!(parse_var::<usize>("NODE_CLUSTER_SIZE", "three").is_err());
        assert_eq!(parse_var::<usize>("NODE_CLUSTER_SIZE", "4").unwrap(), 4);
    }
}
