//! Configuration for a shard.
//!
//! ```rust,no_run
//! use jetlog::cluster::ShardConfig;
//!
//! let config = ShardConfig::from_env().expect("invalid environment");
//! if let Err(errors) = config.validate() {
//!     for error in errors {
//!         eprintln!("{}", error);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_FAILURE_DETECTION_THRESHOLD_SECS, DEFAULT_OBSERVATION_CHANNEL_CAPACITY,
    DEFAULT_PROPOSAL_QUEUE_CAPACITY, DEFAULT_SUBMIT_TIMEOUT_MS,
};
use crate::error::{JetError, JetResult};

/// Configuration for one shard hosted on this node.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Id of the local node. Must be unique within the shard.
    pub node_id: String,

    /// Address other members reach the local node at.
    pub node_address: String,

    /// Id of the shard (consensus group).
    pub shard_id: String,

    /// How long a command submission waits for commit + apply.
    pub submit_timeout: Duration,

    /// A peer with no contact for longer than this is evicted.
    pub failure_detection_threshold: Duration,

    /// Capacity of the engine's observation channel.
    pub observation_channel_capacity: usize,

    /// Maximum number of proposals queued in front of the apply loop.
    pub proposal_queue_capacity: usize,

    /// Local directory for snapshots and topic storage.
    ///
    /// `None` keeps everything in memory.
    pub data_path: Option<PathBuf>,

    /// Object store prefix for this node's data.
    pub storage_prefix: String,

    /// How long shutdown waits for background tasks before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_string(),
            node_address: "127.0.0.1:7000".to_string(),
            shard_id: "0".to_string(),
            submit_timeout: Duration::from_millis(DEFAULT_SUBMIT_TIMEOUT_MS),
            failure_detection_threshold: Duration::from_secs(
                DEFAULT_FAILURE_DETECTION_THRESHOLD_SECS,
            ),
            observation_channel_capacity: DEFAULT_OBSERVATION_CHANNEL_CAPACITY,
            proposal_queue_capacity: DEFAULT_PROPOSAL_QUEUE_CAPACITY,
            data_path: None,
            storage_prefix: "jetlog".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ShardConfig {
    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.node_id.is_empty() {
            errors.push("node_id must not be empty".to_string());
        }

        if self.shard_id.is_empty() {
            errors.push("shard_id must not be empty".to_string());
        }

        if self.node_address.is_empty() {
            errors.push("node_address must not be empty".to_string());
        } else if !self.node_address.contains(':') {
            errors.push(format!(
                "node_address ({}) must be in host:port form",
                self.node_address
            ));
        }

        if self.submit_timeout.is_zero() {
            errors.push("submit_timeout must be greater than 0".to_string());
        }

        // Threshold must exceed the submit timeout
        if self.failure_detection_threshold <= self.submit_timeout {
            errors.push(format!(
                "failure_detection_threshold ({:?}) must be greater than submit_timeout ({:?})",
                self.failure_detection_threshold, self.submit_timeout
            ));
        }

        if self.observation_channel_capacity == 0 {
            errors.push("observation_channel_capacity must be at least 1".to_string());
        }

        if self.proposal_queue_capacity == 0 {
            errors.push("proposal_queue_capacity must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NODE_ID`: Local node id (default: node-0)
    /// - `NODE_ADDRESS`: Advertised address (default: 127.0.0.1:7000)
    /// - `SHARD_ID`: Shard id (default: 0)
    /// - `SUBMIT_TIMEOUT_MS`: Command submission timeout (default: 1000)
    /// - `FAILURE_DETECTION_THRESHOLD_SECS`: Eviction threshold (default: 10)
    /// - `OBSERVATION_CHANNEL_CAPACITY`: Observation buffer size (default: 50)
    /// - `PROPOSAL_QUEUE_CAPACITY`: Apply queue size (default: 1024)
    /// - `DATA_PATH`: Local data directory (default: in-memory)
    /// - `STORAGE_PREFIX`: Object store prefix (default: jetlog)
    pub fn from_env() -> JetResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> JetResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let submit_timeout_ms: u64 =
            parse_or(&lookup, "SUBMIT_TIMEOUT_MS", DEFAULT_SUBMIT_TIMEOUT_MS)?;
        let threshold_secs: u64 = parse_or(
            &lookup,
            "FAILURE_DETECTION_THRESHOLD_SECS",
            DEFAULT_FAILURE_DETECTION_THRESHOLD_SECS,
        )?;

        Ok(Self {
            node_id: lookup("NODE_ID").unwrap_or(defaults.node_id),
            node_address: lookup("NODE_ADDRESS").unwrap_or(defaults.node_address),
            shard_id: lookup("SHARD_ID").unwrap_or(defaults.shard_id),
            submit_timeout: Duration::from_millis(submit_timeout_ms),
            failure_detection_threshold: Duration::from_secs(threshold_secs),
            observation_channel_capacity: parse_or(
                &lookup,
                "OBSERVATION_CHANNEL_CAPACITY",
                defaults.observation_channel_capacity,
            )?,
            proposal_queue_capacity: parse_or(
                &lookup,
                "PROPOSAL_QUEUE_CAPACITY",
                defaults.proposal_queue_capacity,
            )?,
            data_path: lookup("DATA_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            storage_prefix: lookup("STORAGE_PREFIX").unwrap_or(defaults.storage_prefix),
            shutdown_timeout: defaults.shutdown_timeout,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> JetResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| JetError::Config(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}
