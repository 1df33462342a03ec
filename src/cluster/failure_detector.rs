//! Failure detection and eviction tracking for shard peers.
//!
//! The consensus engine reports failed heartbeats together with the time the
//! peer was last reached. Once that exceeds the detection threshold the peer
//! is evicted in two steps, each of which must happen exactly once:
//!
//! 1. **ConfigurationRemoval** - remove the peer from the engine's voter set
//! 2. **MemberRemoval** - commit a `RemoveMember` for the replicated member map
//!
//! The detector only tracks progress; the reconciler performs the steps. A
//! failed step is rescheduled with exponential backoff instead of being
//! dropped, and a finished eviction is remembered so that heartbeat failures
//! still in flight for the removed peer do not start a second one.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::retry;
use crate::constants::{
    DEFAULT_FAILURE_DETECTION_THRESHOLD_SECS, REMEDIATION_RETRY_MAX_DELAY_MS,
    REMEDIATION_RETRY_MIN_DELAY_MS,
};

/// Configuration for the failure detector.
#[derive(Debug, Clone)]
pub struct FailureDetectorConfig {
    /// A peer with no successful contact for longer than this is evicted.
    /// Default: 10 seconds
    pub threshold: Duration,

    /// First delay before retrying a failed eviction step.
    /// Default: 250ms
    pub retry_min_delay: Duration,

    /// Upper bound on the delay between eviction retries.
    /// Default: 10 seconds
    pub retry_max_delay: Duration,
}

impl Default for FailureDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(DEFAULT_FAILURE_DETECTION_THRESHOLD_SECS),
            retry_min_delay: Duration::from_millis(REMEDIATION_RETRY_MIN_DELAY_MS),
            retry_max_delay: Duration::from_millis(REMEDIATION_RETRY_MAX_DELAY_MS),
        }
    }
}

impl FailureDetectorConfig {
    /// Create a config with a custom detection threshold.
    pub fn with_threshold(threshold: Duration) -> Self {
        Self {
            threshold,
            ..Default::default()
        }
    }

    /// Backoff policy for eviction retries.
    fn retry_policy(&self) -> ExponentialBuilder {
        retry::remediation_policy_with(self.retry_min_delay, self.retry_max_delay)
    }
}

/// The next action an eviction needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EvictionStep {
    /// Remove the peer from the engine's voter configuration.
    ConfigurationRemoval,
    /// Commit a `RemoveMember` for the peer.
    MemberRemoval,
}

impl EvictionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionStep::ConfigurationRemoval => "configuration_removal",
            EvictionStep::MemberRemoval => "member_removal",
        }
    }
}

impl std::fmt::Display for EvictionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a peer's eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionState {
    /// A step is pending or being retried.
    InProgress(EvictionStep),
    /// Both steps have been carried out.
    Completed,
}

/// What to do about a failed heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Last contact is within the threshold; nothing to do.
    WithinThreshold { elapsed: Duration },
    /// A new eviction started; perform this step now.
    Evict(EvictionStep),
    /// An eviction is already underway and owns its retries.
    InProgress(EvictionStep),
    /// The peer has already been evicted.
    AlreadyEvicted,
}

/// Eviction tracking for a single peer.
struct Eviction {
    state: EvictionState,
    /// Failed attempts of the current step.
    attempts: u32,
    /// When the next retry is due; `None` while an attempt is in flight.
    next_attempt: Option<Instant>,
    backoff: ExponentialBackoff,
    started_at: Instant,
}

/// Failure detector for the peers of one shard.
pub struct FailureDetector {
    config: FailureDetectorConfig,
    /// Per-peer eviction tracking.
    evictions: DashMap<String, Eviction>,
    /// Counter for evictions started (for metrics).
    evictions_started: AtomicU64,
    /// Counter for evictions completed.
    evictions_completed: AtomicU64,
}

impl FailureDetector {
    /// Create a new failure detector with the given configuration.
    pub fn new(config: FailureDetectorConfig) -> Self {
        info!(
            threshold_ms = config.threshold.as_millis(),
            retry_min_delay_ms = config.retry_min_delay.as_millis(),
            retry_max_delay_ms = config.retry_max_delay.as_millis(),
            "Creating failure detector"
        );

        Self {
            config,
            evictions: DashMap::new(),
            evictions_started: AtomicU64::new(0),
            evictions_completed: AtomicU64::new(0),
        }
    }

    /// Create a new failure detector with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(FailureDetectorConfig::default())
    }

    /// Get the configuration.
    pub fn config(&self) -> &FailureDetectorConfig {
        &self.config
    }

    /// Judge a failed heartbeat to `peer_id`, last reached at `last_contact`.
    pub fn on_failed_heartbeat(
        &self,
        peer_id: &str,
        last_contact: Instant,
        now: Instant,
    ) -> HeartbeatVerdict {
        if let Some(eviction) = self.evictions.get(peer_id) {
            return match eviction.state {
                EvictionState::InProgress(step) => HeartbeatVerdict::InProgress(step),
                EvictionState::Completed => HeartbeatVerdict::AlreadyEvicted,
            };
        }

        let elapsed = now.saturating_duration_since(last_contact);
        if elapsed <= self.config.threshold {
            debug!(
                peer_id,
                elapsed_ms = elapsed.as_millis(),
                "Failed heartbeat within threshold"
            );
            return HeartbeatVerdict::WithinThreshold { elapsed };
        }

        warn!(
            peer_id,
            elapsed_ms = elapsed.as_millis(),
            threshold_ms = self.config.threshold.as_millis(),
            "Peer unreachable beyond threshold, starting eviction"
        );
        self.evictions.insert(
            peer_id.to_string(),
            Eviction {
                state: EvictionState::InProgress(EvictionStep::ConfigurationRemoval),
                attempts: 0,
                next_attempt: None,
                backoff: self.config.retry_policy().build(),
                started_at: now,
            },
        );
        self.evictions_started.fetch_add(1, Ordering::Relaxed);
        HeartbeatVerdict::Evict(EvictionStep::ConfigurationRemoval)
    }

    /// Record that the current step of `peer_id`'s eviction succeeded.
    ///
    /// Returns the next step to perform, or `None` once the eviction is done.
    pub fn step_succeeded(&self, peer_id: &str, now: Instant) -> Option<EvictionStep> {
        let mut eviction = self.evictions.get_mut(peer_id)?;
        let next = match eviction.state {
            EvictionState::InProgress(EvictionStep::ConfigurationRemoval) => {
                Some(EvictionStep::MemberRemoval)
            }
            EvictionState::InProgress(EvictionStep::MemberRemoval) | EvictionState::Completed => {
                None
            }
        };

        eviction.attempts = 0;
        eviction.next_attempt = None;
        eviction.backoff = self.config.retry_policy().build();
        match next {
            Some(step) => eviction.state = EvictionState::InProgress(step),
            None => {
                if eviction.state != EvictionState::Completed {
                    eviction.state = EvictionState::Completed;
                    self.evictions_completed.fetch_add(1, Ordering::Relaxed);
                    info!(
                        peer_id,
                        duration_ms = now.saturating_duration_since(eviction.started_at).as_millis(),
                        "Peer eviction complete"
                    );
                }
            }
        }
        next
    }

    /// Record that the current step failed and schedule a retry.
    ///
    /// Returns when the retry is due.
    pub fn step_failed(&self, peer_id: &str, now: Instant) -> Option<Instant> {
        let mut eviction = self.evictions.get_mut(peer_id)?;
        let EvictionState::InProgress(step) = eviction.state else {
            return None;
        };

        eviction.attempts += 1;
        let delay = eviction
            .backoff
            .next()
            .unwrap_or(self.config.retry_max_delay);
        let due = now + delay;
        eviction.next_attempt = Some(due);

        warn!(
            peer_id,
            step = %step,
            attempts = eviction.attempts,
            retry_in_ms = delay.as_millis(),
            "Eviction step failed, will retry"
        );
        Some(due)
    }

    /// Take every eviction whose retry is due at `now`.
    ///
    /// Returned evictions are marked in flight until the caller reports the
    /// outcome with [`step_succeeded`](Self::step_succeeded) or
    /// [`step_failed`](Self::step_failed).
    pub fn take_due(&self, now: Instant) -> Vec<(String, EvictionStep)> {
        let mut due: Vec<(String, EvictionStep)> = Vec::new();
        for mut entry in self.evictions.iter_mut() {
            let EvictionState::InProgress(step) = entry.state else {
                continue;
            };
            if entry.next_attempt.is_some_and(|at| at <= now) {
                entry.next_attempt = None;
                due.push((entry.key().clone(), step));
            }
        }
        due.sort();
        due
    }

    /// Earliest pending retry deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.evictions
            .iter()
            .filter_map(|entry| entry.next_attempt)
            .min()
    }

    /// Forget a peer, e.g. because it rejoined the configuration.
    pub fn forget(&self, peer_id: &str) {
        if self.evictions.remove(peer_id).is_some() {
            debug!(peer_id, "Cleared eviction record");
        }
    }

    /// Drop every eviction still in progress, e.g. after losing leadership.
    ///
    /// Completed evictions are kept. Returns how many were dropped.
    pub fn abandon_in_progress(&self) -> usize {
        let before = self.evictions.len();
        self.evictions
            .retain(|_, eviction| eviction.state == EvictionState::Completed);
        let dropped = before - self.evictions.len();
        if dropped > 0 {
            info!(dropped, "Abandoned in-progress evictions");
        }
        dropped
    }

    /// Drop completed evictions of peers that `is_known` no longer reports,
    /// i.e. peers gone from both the configuration and the member map.
    ///
    /// Returns how many records were dropped.
    pub fn prune_completed(&self, is_known: impl Fn(&str) -> bool) -> usize {
        let before = self.evictions.len();
        self.evictions.retain(|peer_id, eviction| {
            eviction.state != EvictionState::Completed || is_known(peer_id.as_str())
        });
        let pruned = before - self.evictions.len();
        if pruned > 0 {
            debug!(pruned, "Pruned completed eviction records");
        }
        pruned
    }

    /// Get the eviction state of a peer.
    pub fn eviction_state(&self, peer_id: &str) -> Option<EvictionState> {
        self.evictions.get(peer_id).map(|e| e.state)
    }

    /// Number of failed attempts of the peer's current step.
    pub fn attempts(&self, peer_id: &str) -> u32 {
        self.evictions.get(peer_id).map(|e| e.attempts).unwrap_or(0)
    }

    /// Number of evictions still in progress.
    pub fn in_progress_count(&self) -> usize {
        self.evictions
            .iter()
            .filter(|entry| matches!(entry.state, EvictionState::InProgress(_)))
            .count()
    }

    /// Get total evictions started since creation.
    pub fn total_evictions_started(&self) -> u64 {
        self.evictions_started.load(Ordering::Relaxed)
    }

    /// Get total evictions completed since creation.
    pub fn total_evictions_completed(&self) -> u64 {
        self.evictions_completed.load(Ordering::Relaxed)
    }
}

impl Default for FailureDetector {
    fn default() -> Self {
        Self::with_defaults()
    }
}
