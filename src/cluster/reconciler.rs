//! Membership reconciliation.
//!
//! The consensus engine keeps its own voter configuration; the shard's member
//! map must follow it, but may only change through committed commands. The
//! `MembershipReconciler` is the bridge: it consumes the engine's observation
//! stream and turns what it sees into `AddMember` / `RemoveMember` commands.
//!
//! # Event handling
//!
//! | Observation        | Action                                                          |
//! |--------------------|-----------------------------------------------------------------|
//! | `LeaderChanged`    | update the local leader view; on becoming leader, resync        |
//! | `PeerJoined`       | `AddMember` unless already present                              |
//! | `PeerRemoved`      | `RemoveMember` unless already absent                            |
//! | `FailedHeartbeat`  | evict the peer once it exceeds the failure-detection threshold  |
//! | `VoteRequested`    | log                                                             |
//! | `RoleChanged`      | log                                                             |
//! | *lagged*           | resync against the engine's configuration                       |
//!
//! Only the leader submits. The member map is never touched directly: it
//! changes when the submitted command is applied, so every replica sees the
//! same transitions. No state machine lock is held across a submission.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::background_tasks::ShutdownSignal;
use crate::cluster::failure_detector::{EvictionStep, FailureDetector, HeartbeatVerdict};
use crate::cluster::metrics;
use crate::cluster::raft::{
    CommandResponse, ConfiguredMember, ConsensusEngine, Observation, ObserverRegistration,
    Received, ShardStateMachine, WriteOperation,
};
use crate::cluster::shard::submit_operation;
use crate::error::JetResult;

/// What woke the reconciler up.
enum Wakeup {
    Received(Received),
    RetryDue,
}

/// Converts consensus engine observations into membership commands.
pub struct MembershipReconciler {
    shard_id: String,
    local_node_id: String,
    engine: Arc<dyn ConsensusEngine>,
    state_machine: Arc<ShardStateMachine>,
    leader_tx: watch::Sender<Option<String>>,
    detector: Arc<FailureDetector>,
    submit_timeout: Duration,
}

impl MembershipReconciler {
    pub fn new(
        shard_id: impl Into<String>,
        engine: Arc<dyn ConsensusEngine>,
        state_machine: Arc<ShardStateMachine>,
        leader_tx: watch::Sender<Option<String>>,
        detector: Arc<FailureDetector>,
        submit_timeout: Duration,
    ) -> Self {
        let local_node_id = engine.node_id().to_string();
        Self {
            shard_id: shard_id.into(),
            local_node_id,
            engine,
            state_machine,
            leader_tx,
            detector,
            submit_timeout,
        }
    }

    /// Check if the local node currently leads the shard.
    pub fn is_local_leader(&self) -> bool {
        self.leader_tx.borrow().as_deref() == Some(self.local_node_id.as_str())
    }

    /// Run until shutdown is signalled or the observation stream closes.
    ///
    /// Blocks on whichever comes first: shutdown, the next observation, or
    /// the next eviction retry (only armed while one is pending). Dropping
    /// `observations` on return deregisters from the engine.
    pub async fn run(self, mut observations: ObserverRegistration, mut shutdown: ShutdownSignal) {
        info!(shard_id = %self.shard_id, node_id = %self.local_node_id, "Membership reconciler started");

        // Observations emitted before we subscribed are gone; start from the
        // engine's current view.
        self.sync_leader(self.engine.leader()).await;

        loop {
            let deadline = self.detector.next_deadline();
            let wakeup = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                received = observations.recv() => Wakeup::Received(received),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Wakeup::RetryDue
                }
            };

            let keep_running = tokio::select! {
                biased;
                _ = shutdown.recv() => false,
                keep_running = self.process(wakeup) => keep_running,
            };
            if !keep_running {
                break;
            }
        }

        drop(observations);
        info!(shard_id = %self.shard_id, "Membership reconciler stopped");
    }

    async fn process(&self, wakeup: Wakeup) -> bool {
        match wakeup {
            Wakeup::Received(Received::Observation(observation)) => {
                self.handle_observation(observation).await;
                true
            }
            Wakeup::Received(Received::Lagged(skipped)) => {
                metrics::record_observations_lagged(&self.shard_id, skipped);
                warn!(shard_id = %self.shard_id, skipped, "Observation stream lagged, resyncing membership");
                if self.is_local_leader() {
                    self.resync("lagged").await;
                }
                true
            }
            Wakeup::Received(Received::Closed) => {
                debug!(shard_id = %self.shard_id, "Observation stream closed");
                false
            }
            Wakeup::RetryDue => {
                self.retry_due_evictions().await;
                true
            }
        }
    }

    /// Handle one observation.
    pub async fn handle_observation(&self, observation: Observation) {
        let kind = observation.kind();
        match observation {
            Observation::LeaderChanged {
                leader_id,
                leader_address,
            } => {
                let leader = leader_id.map(|id| {
                    ConfiguredMember::new(id, leader_address.unwrap_or_default())
                });
                self.sync_leader(leader).await;
            }

            Observation::PeerJoined(member) => {
                self.detector.forget(&member.node_id);
                let action = self.ensure_member(&member).await;
                metrics::record_reconciler_event(kind, action);
            }

            Observation::PeerRemoved(member) => {
                let action = self.ensure_absent(&member.node_id).await;
                metrics::record_reconciler_event(kind, action);
            }

            Observation::FailedHeartbeat {
                peer_id,
                last_contact,
            } => {
                let action = self.on_failed_heartbeat(&peer_id, last_contact).await;
                metrics::record_reconciler_event(kind, action);
            }

            Observation::VoteRequested { candidate_id, term } => {
                info!(shard_id = %self.shard_id, candidate_id = %candidate_id, term, "Vote requested");
                metrics::record_reconciler_event(kind, "logged");
            }

            Observation::RoleChanged(role) => {
                info!(shard_id = %self.shard_id, role = role.as_str(), "Role changed");
                metrics::record_reconciler_event(kind, "logged");
            }
        }
    }

    /// Update the local leader view, and catch the member map up with the
    /// configuration when the local node takes over.
    async fn sync_leader(&self, leader: Option<ConfiguredMember>) {
        let leader_id = leader.as_ref().map(|l| l.node_id.clone());
        let was_leader = self.is_local_leader();
        self.leader_tx.send_replace(leader_id.clone());
        let is_leader = self.is_local_leader();
        metrics::set_leader(&self.shard_id, is_leader);

        info!(
            shard_id = %self.shard_id,
            leader_id = leader_id.as_deref().unwrap_or("none"),
            is_leader,
            "Leader changed"
        );

        if was_leader && !is_leader {
            self.detector.abandon_in_progress();
        }

        let action = match &leader {
            Some(leader) if is_leader => {
                if self.state_machine.contains_member(&leader.node_id).await && was_leader {
                    "none"
                } else {
                    self.resync("leader_changed").await
                }
            }
            _ => "none",
        };
        metrics::record_reconciler_event("leader_changed", action);
    }

    /// Make the member map match the engine's configuration.
    ///
    /// Configured voters missing from the map (or with a stale address) are
    /// added, and members no longer configured are removed. Completed
    /// evictions of peers found in neither are forgotten.
    async fn resync(&self, reason: &'static str) -> &'static str {
        let configuration = match self.engine.current_configuration().await {
            Ok(configuration) => configuration,
            Err(e) => {
                warn!(shard_id = %self.shard_id, reason, error = %e, "Failed to read configuration for resync");
                return "failed";
            }
        };

        let members = self.state_machine.members().await;
        let mut added = 0usize;
        let mut removed = 0usize;
        let mut failed = 0usize;

        for configured in &configuration.members {
            let current = members.get(&configured.node_id);
            if current.is_some_and(|m| m.address == configured.address) {
                continue;
            }
            match self.add_member(configured).await {
                Ok(_) => added += 1,
                Err(_) => failed += 1,
            }
        }

        for node_id in members.keys() {
            if configuration.get(node_id).is_some() {
                continue;
            }
            match self.remove_member(node_id).await {
                Ok(_) => removed += 1,
                Err(_) => failed += 1,
            }
        }

        let members = self.state_machine.members().await;
        let pruned = self.detector.prune_completed(|peer_id| {
            configuration.get(peer_id).is_some() || members.contains_key(peer_id)
        });

        info!(
            shard_id = %self.shard_id,
            reason,
            configuration_index = configuration.index,
            added,
            removed,
            failed,
            pruned,
            "Resynced membership with configuration"
        );

        if failed > 0 { "failed" } else { "resync" }
    }

    /// `AddMember` for a peer unless the map already has it.
    async fn ensure_member(&self, member: &ConfiguredMember) -> &'static str {
        if !self.is_local_leader() {
            return "not_leader";
        }
        let present = self
            .state_machine
            .members()
            .await
            .get(&member.node_id)
            .is_some_and(|m| m.address == member.address);
        if present {
            return "none";
        }
        match self.add_member(member).await {
            Ok(_) => "add_member",
            Err(_) => "failed",
        }
    }

    /// `RemoveMember` for a peer unless the map no longer has it.
    async fn ensure_absent(&self, node_id: &str) -> &'static str {
        if !self.is_local_leader() {
            return "not_leader";
        }
        if !self.state_machine.contains_member(node_id).await {
            return "none";
        }
        match self.remove_member(node_id).await {
            Ok(_) => "remove_member",
            Err(_) => "failed",
        }
    }

    async fn add_member(&self, member: &ConfiguredMember) -> JetResult<CommandResponse> {
        let result = submit_operation(
            self.engine.as_ref(),
            WriteOperation::AddMember {
                node_id: member.node_id.clone(),
                address: member.address.clone(),
            },
            self.submit_timeout,
        )
        .await;
        match &result {
            Ok(_) => debug!(shard_id = %self.shard_id, peer_id = %member.node_id, "Committed AddMember"),
            Err(e) => warn!(
                shard_id = %self.shard_id,
                peer_id = %member.node_id,
                error = %e,
                "Failed to commit AddMember"
            ),
        }
        result
    }

    async fn remove_member(&self, node_id: &str) -> JetResult<CommandResponse> {
        let result = submit_operation(
            self.engine.as_ref(),
            WriteOperation::RemoveMember {
                node_id: node_id.to_string(),
            },
            self.submit_timeout,
        )
        .await;
        match &result {
            Ok(_) => debug!(shard_id = %self.shard_id, peer_id = node_id, "Committed RemoveMember"),
            Err(e) => warn!(
                shard_id = %self.shard_id,
                peer_id = node_id,
                error = %e,
                "Failed to commit RemoveMember"
            ),
        }
        result
    }

    async fn on_failed_heartbeat(&self, peer_id: &str, last_contact: Instant) -> &'static str {
        if peer_id == self.local_node_id {
            return "none";
        }
        if !self.is_local_leader() {
            return "not_leader";
        }
        match self
            .detector
            .on_failed_heartbeat(peer_id, last_contact, Instant::now())
        {
            HeartbeatVerdict::WithinThreshold { .. } => "none",
            HeartbeatVerdict::InProgress(_) | HeartbeatVerdict::AlreadyEvicted => "none",
            HeartbeatVerdict::Evict(step) => {
                self.drive_eviction(peer_id, step).await;
                "evict"
            }
        }
    }

    async fn retry_due_evictions(&self) {
        for (peer_id, step) in self.detector.take_due(Instant::now()) {
            debug!(shard_id = %self.shard_id, peer_id = %peer_id, step = %step, "Retrying eviction step");
            self.drive_eviction(&peer_id, step).await;
        }
    }

    /// Run eviction steps for `peer_id` starting at `step` until the eviction
    /// completes or a step fails (and is rescheduled).
    async fn drive_eviction(&self, peer_id: &str, mut step: EvictionStep) {
        loop {
            let result = match step {
                EvictionStep::ConfigurationRemoval => self.remove_from_configuration(peer_id).await,
                EvictionStep::MemberRemoval => self.remove_from_member_map(peer_id).await,
            };
            metrics::record_eviction_step(step.as_str(), result.is_ok());

            match result {
                Ok(()) => match self.detector.step_succeeded(peer_id, Instant::now()) {
                    Some(next) => step = next,
                    None => return,
                },
                Err(e) => {
                    warn!(
                        shard_id = %self.shard_id,
                        peer_id,
                        step = %step,
                        error = %e,
                        "Eviction step failed"
                    );
                    self.detector.step_failed(peer_id, Instant::now());
                    return;
                }
            }
        }
    }

    async fn remove_from_configuration(&self, peer_id: &str) -> JetResult<()> {
        let configuration = self.engine.current_configuration().await?;
        if configuration.get(peer_id).is_none() {
            debug!(shard_id = %self.shard_id, peer_id, "Peer already absent from configuration");
            return Ok(());
        }
        self.engine
            .remove_member(peer_id, configuration.index, self.submit_timeout)
            .await?;
        info!(shard_id = %self.shard_id, peer_id, "Removed unreachable peer from configuration");
        Ok(())
    }

    async fn remove_from_member_map(&self, peer_id: &str) -> JetResult<()> {
        if !self.state_machine.contains_member(peer_id).await {
            debug!(shard_id = %self.shard_id, peer_id, "Peer already absent from member map");
            return Ok(());
        }
        self.remove_member(peer_id).await?;
        info!(shard_id = %self.shard_id, peer_id, "Removed unreachable peer from member map");
        Ok(())
    }
}
