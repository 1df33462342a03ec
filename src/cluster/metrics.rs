//! Prometheus metrics for the jetlog control plane.
//!
//! Metrics cover:
//! - Command application (count and latency per operation/outcome)
//! - Command submission (status per operation)
//! - Shard state (applied index, members, topics, leadership)
//! - Membership reconciliation (observed events, evictions, lag)
//! - Snapshots and topic storage allocation
//! - Fatal shard halts
//!
//! # Safety
//!
//! All metrics are registered to a custom registry with the "jetlog" prefix to avoid
//! name collisions with other libraries using the default Prometheus registry.
//! Registration errors are handled gracefully - if a metric fails to register,
//! an unregistered fallback is used instead of panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for jetlog metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("jetlog".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================
//
//   define_gauge_vec!(MY_GAUGE, "my_metric", "Description", ["label1"]);
//   define_counter_vec!(MY_COUNTER, "my_metric", "Description", ["label1"]);
//   define_histogram_vec!(MY_HISTOGRAM, "my_metric", "Description", ["label"],
//       [0.001, 0.01, 0.1, 1.0]);

/// Declare an IntGaugeVec metric with labels.
macro_rules! define_gauge_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntGaugeVec> = Lazy::new(|| {
            register_int_gauge_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare a HistogramVec metric with labels and buckets.
macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Apply path metrics
// =============================================================================

define_counter_vec!(
    COMMANDS_APPLIED,
    "commands_applied_total",
    "Total number of committed commands applied to the state machine",
    ["operation", "outcome"]
);
define_histogram_vec!(
    APPLY_DURATION,
    "apply_duration_seconds",
    "Time spent applying a committed command in seconds",
    ["operation"],
    [
        0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0
    ]
);
define_counter_vec!(
    MESSAGES_PUBLISHED,
    "messages_published_total",
    "Total number of messages assigned an offset",
    ["topic"]
);
define_counter_vec!(
    SHARD_HALTS,
    "shard_halts_total",
    "Total number of shards halted by a fatal invariant violation",
    ["shard_id", "reason"]
);

// =============================================================================
// Submission metrics
// =============================================================================

define_counter_vec!(
    COMMAND_SUBMISSIONS,
    "command_submissions_total",
    "Total number of commands submitted to the consensus engine",
    ["operation", "status"]
);

// =============================================================================
// Shard state metrics
// =============================================================================

define_gauge_vec!(
    APPLIED_INDEX,
    "applied_index",
    "Last log index applied by the shard state machine",
    ["shard_id"]
);
define_gauge_vec!(
    SHARD_MEMBERS,
    "shard_members",
    "Number of members in the replicated member map",
    ["shard_id"]
);
define_gauge_vec!(
    SHARD_TOPICS,
    "shard_topics",
    "Number of topics owned by the shard",
    ["shard_id"]
);
define_gauge_vec!(
    SHARD_IS_LEADER,
    "shard_is_leader",
    "Whether this node currently leads the shard (1 = leader, 0 = not)",
    ["shard_id"]
);

// =============================================================================
// Reconciler metrics
// =============================================================================

define_counter_vec!(
    RECONCILER_EVENTS,
    "reconciler_events_total",
    "Total number of consensus observations handled by the reconciler",
    ["event", "action"]
);
define_counter_vec!(
    PEER_EVICTIONS,
    "peer_evictions_total",
    "Eviction steps issued by the failure detector",
    ["step", "status"]
);
define_counter_vec!(
    OBSERVATIONS_LAGGED,
    "observations_lagged_total",
    "Observations dropped because the reconciler fell behind",
    ["shard_id"]
);

// =============================================================================
// Persistence metrics
// =============================================================================

define_counter_vec!(
    SNAPSHOT_OPERATIONS,
    "snapshot_operations_total",
    "Snapshot take/restore/persist operations",
    ["operation", "status"]
);
define_counter_vec!(
    STORAGE_ALLOCATIONS,
    "storage_allocations_total",
    "Topic storage allocation attempts",
    ["status"]
);

// ============================================================================
// Safe metric registration helpers
// ============================================================================

/// Register an IntGaugeVec safely, returning a fallback on error.
fn register_int_gauge_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntGaugeVec {
    let gauge = IntGaugeVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGaugeVec metric, using unregistered fallback");
            gauge
        }
    }
}

/// Register an IntCounterVec safely, returning a fallback on error.
fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

/// Register a HistogramVec safely, returning a fallback on error.
fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Initialize the metrics registry by registering all metrics.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn init_metrics() {
    let _ = &*COMMANDS_APPLIED;
    let _ = &*APPLY_DURATION;
    let _ = &*MESSAGES_PUBLISHED;
    let _ = &*SHARD_HALTS;
    let _ = &*COMMAND_SUBMISSIONS;
    let _ = &*APPLIED_INDEX;
    let _ = &*SHARD_MEMBERS;
    let _ = &*SHARD_TOPICS;
    let _ = &*SHARD_IS_LEADER;
    let _ = &*RECONCILER_EVENTS;
    let _ = &*PEER_EVICTIONS;
    let _ = &*OBSERVATIONS_LAGGED;
    let _ = &*SNAPSHOT_OPERATIONS;
    let _ = &*STORAGE_ALLOCATIONS;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one applied command.
pub fn record_apply(operation: &str, outcome: &str, duration_secs: f64) {
    COMMANDS_APPLIED
        .with_label_values(&[operation, outcome])
        .inc();
    APPLY_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Record messages assigned offsets on a topic.
pub fn record_published(topic: &str, count: usize) {
    MESSAGES_PUBLISHED
        .with_label_values(&[topic])
        .inc_by(count as u64);
}

/// Record a command submission result.
pub fn record_submission(operation: &str, status: &str) {
    COMMAND_SUBMISSIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a shard halting on a fatal error.
pub fn record_shard_halt(shard_id: &str, reason: &str) {
    SHARD_HALTS.with_label_values(&[shard_id, reason]).inc();
}

/// Update the state gauges of a shard after an apply or restore.
pub fn set_shard_state(shard_id: &str, applied_index: u64, members: usize, topics: usize) {
    APPLIED_INDEX
        .with_label_values(&[shard_id])
        .set(applied_index as i64);
    SHARD_MEMBERS
        .with_label_values(&[shard_id])
        .set(members as i64);
    SHARD_TOPICS
        .with_label_values(&[shard_id])
        .set(topics as i64);
}

/// Update the local leadership gauge of a shard.
pub fn set_leader(shard_id: &str, is_leader: bool) {
    SHARD_IS_LEADER
        .with_label_values(&[shard_id])
        .set(i64::from(is_leader));
}

/// Record an observation handled by the reconciler.
pub fn record_reconciler_event(event: &str, action: &str) {
    RECONCILER_EVENTS.with_label_values(&[event, action]).inc();
}

/// Record one eviction step.
pub fn record_eviction_step(step: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    PEER_EVICTIONS.with_label_values(&[step, status]).inc();
}

/// Record observations lost to a lagging receiver.
pub fn record_observations_lagged(shard_id: &str, skipped: u64) {
    OBSERVATIONS_LAGGED
        .with_label_values(&[shard_id])
        .inc_by(skipped);
}

/// Record a snapshot operation.
pub fn record_snapshot(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    SNAPSHOT_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a topic storage allocation.
pub fn record_storage_allocation(success: bool) {
    let status = if success { "success" } else { "failure" };
    STORAGE_ALLOCATIONS.with_label_values(&[status]).inc();
}
