//! Peer state reconciliation
//!
//! Every node is symmetric. The reconciler owns the ledger and the peer
//! directory, applies inbound protocol messages and local submissions, and
//! returns the effects the caller must carry out (publishes and observer
//! notifications). It never touches the transport itself.
//!
//! Convergence relies on idempotent merges: messages may be lost, duplicated
//! or reordered, and every merge is first-writer-wins per student id.

use crate::codec;
use crate::error::ScoreError;
use crate::ledger::Ledger;
use crate::peers::PeerDirectory;
use crate::topics::{scores_topic, summary_topic, SCORES_FALLBACK, SUMMARY_FALLBACK};
use crate::types::{
    Inbound, NodeStatus, PeerId, Presence, ScoreCard, StateSync, StudentId, Submission, Summary,
    TeamReset,
};
use chrono::Utc;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Side effect requested by the reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish a JSON payload on a topic
    Publish { topic: String, payload: Vec<u8> },
    /// A submission entered the ledger (locally or from a peer)
    Accepted(Submission),
    /// The current summary was replaced
    SummaryChanged(Summary),
    /// Ledger was cleared
    Reset { reason: String },
}

/// Reconciliation state machine for one node
pub struct Reconciler {
    peers: PeerDirectory,
    ledger: Ledger,
    /// Current summary. Usually derived from the ledger, but may be a larger
    /// summary adopted from a peer until the next ledger write.
    summary: Summary,
    peer_ttl: Option<Duration>,
}

impl Reconciler {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            peers: PeerDirectory::new(local_id),
            ledger: Ledger::new(),
            summary: Summary::default(),
            peer_ttl: None,
        }
    }

    /// Expire peers not heard from within `ttl` on every tick
    pub fn with_peer_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.peer_ttl = ttl;
        self
    }

    pub fn local_id(&self) -> &str {
        self.peers.local_id()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn has_submitted(&self, student_id: &StudentId) -> bool {
        self.ledger.has_submitted(student_id)
    }

    pub fn status(&self, connected: bool) -> NodeStatus {
        NodeStatus {
            connected,
            peer_id: self.local_id().to_string(),
            total_submissions: self.summary.submitted_count,
            peer_count: self.peers.len(),
            peer_ids: self.peers.known_peers(),
            last_update: Utc::now(),
        }
    }

    /// Accept a local submission and distribute it
    ///
    /// With known peers the submission and summary are unicast to each peer's
    /// private topics. Without peers they go to the shared fallback topics and
    /// presence is re-announced.
    pub fn submit(
        &mut self,
        student_id: StudentId,
        card: ScoreCard,
    ) -> Result<(Submission, Vec<Effect>), ScoreError> {
        let submission = self.ledger.accept(student_id, card)?;
        info!("Reconciler: accepted submission for {}", submission.student_id);

        let mut effects = vec![Effect::Accepted(submission.clone())];
        self.summary = self.ledger.compute_summary();
        effects.push(Effect::SummaryChanged(self.summary.clone()));

        let peers = self.peers.known_peers();
        if peers.is_empty() {
            debug!("Reconciler: no peers known, using broadcast fallback");
            for topic in SCORES_FALLBACK {
                push_publish(&mut effects, topic.to_string(), &submission);
            }
            push_publish(&mut effects, SUMMARY_FALLBACK.to_string(), &self.summary);
            effects.extend(self.announce());
        } else {
            for peer in &peers {
                push_publish(&mut effects, scores_topic(peer), &submission);
            }
            for peer in &peers {
                push_publish(&mut effects, summary_topic(peer), &self.summary);
            }
            debug!("Reconciler: sent submission to {} peers", peers.len());
        }

        Ok((submission, effects))
    }

    /// Decode and apply one inbound message. Malformed payloads are dropped.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> Vec<Effect> {
        match codec::decode(topic, payload) {
            Ok(inbound) => self.apply(inbound),
            Err(e) => {
                warn!("Reconciler: dropping message on {}: {}", topic, e);
                Vec::new()
            }
        }
    }

    /// Apply a decoded inbound message
    pub fn apply(&mut self, inbound: Inbound) -> Vec<Effect> {
        debug!("Reconciler: received {}", inbound.kind());
        match inbound {
            Inbound::Presence(presence) => self.handle_presence(presence, Instant::now()),
            Inbound::StateSync(sync) => self.handle_state_sync(sync),
            Inbound::Submission(submission) => self.handle_submission(submission),
            Inbound::Summary(summary) => self.handle_summary(summary),
            Inbound::Reset(reset) => self.handle_reset(reset),
        }
    }

    /// Record the announcing peer and send it our ledger on first contact
    pub fn handle_presence(&mut self, presence: Presence, now: Instant) -> Vec<Effect> {
        let is_new = self
            .peers
            .record_peer(&presence.peer_id, presence.kind.as_deref(), now);

        let mut effects = Vec::new();
        if is_new && !self.ledger.is_empty() {
            let sync = StateSync {
                scores: self.ledger.snapshot(),
                source: self.local_id().to_string(),
            };
            info!(
                "Reconciler: sending state sync ({} scores) to \"{}\"",
                sync.scores.len(),
                presence.peer_id
            );
            push_publish(&mut effects, scores_topic(&presence.peer_id), &sync);
        }
        effects
    }

    /// Merge a peer snapshot. The summary is recomputed and republished once
    /// per batch, even when every entry was already known.
    pub fn handle_state_sync(&mut self, sync: StateSync) -> Vec<Effect> {
        let mut effects = Vec::new();
        let total = sync.scores.len();

        for (student_id, submission) in sync.scores {
            if self.ledger.merge_if_absent(student_id.clone(), submission) {
                if let Some(stored) = self.ledger.get(&student_id) {
                    effects.push(Effect::Accepted(stored.clone()));
                }
            }
        }

        info!(
            "Reconciler: merged {}/{} scores from \"{}\"",
            effects.len(),
            total,
            sync.source
        );

        self.refresh_summary(&mut effects);
        effects
    }

    /// Merge a single submission keyed by its `studentId`
    pub fn handle_submission(&mut self, submission: Submission) -> Vec<Effect> {
        let student_id = submission.student_id.clone();
        if !self.ledger.merge_if_absent(student_id.clone(), submission.clone()) {
            return Vec::new();
        }

        info!("Reconciler: merged submission for {} from peer", student_id);
        let mut effects = vec![Effect::Accepted(submission)];
        self.refresh_summary(&mut effects);
        effects
    }

    /// Adopt a peer summary only if it reports more submissions
    pub fn handle_summary(&mut self, summary: Summary) -> Vec<Effect> {
        if summary.submitted_count > self.summary.submitted_count {
            debug!(
                "Reconciler: adopting peer summary ({} > {})",
                summary.submitted_count, self.summary.submitted_count
            );
            self.summary = summary;
            vec![Effect::SummaryChanged(self.summary.clone())]
        } else {
            Vec::new()
        }
    }

    /// Clear everything, regardless of who sent the reset
    pub fn handle_reset(&mut self, reset: TeamReset) -> Vec<Effect> {
        self.clear(reset.reason())
    }

    /// Reset requested by the local UI
    pub fn manual_reset(&mut self, reason: &str) -> Vec<Effect> {
        self.clear(reason.to_string())
    }

    fn clear(&mut self, reason: String) -> Vec<Effect> {
        info!("Reconciler: clearing {} scores ({})", self.ledger.len(), reason);
        self.ledger.clear();
        self.summary = Summary::default();

        let mut effects = vec![
            Effect::Reset { reason },
            Effect::SummaryChanged(self.summary.clone()),
        ];
        self.publish_summary(&mut effects);
        effects
    }

    /// Presence announcement on every announce topic
    pub fn announce(&self) -> Vec<Effect> {
        let mut effects = Vec::new();
        for (topic, presence) in self.peers.announce() {
            push_publish(&mut effects, topic.to_string(), &presence);
        }
        effects
    }

    /// Periodic work: expire stale peers, then re-announce
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        if let Some(ttl) = self.peer_ttl {
            let expired = self.peers.prune_stale(now, ttl);
            if !expired.is_empty() {
                info!("Reconciler: expired {} peers", expired.len());
            }
        }
        self.announce()
    }

    fn refresh_summary(&mut self, effects: &mut Vec<Effect>) {
        self.summary = self.ledger.compute_summary();
        effects.push(Effect::SummaryChanged(self.summary.clone()));
        self.publish_summary(effects);
    }

    fn publish_summary(&self, effects: &mut Vec<Effect>) {
        if self.peers.is_empty() {
            push_publish(effects, SUMMARY_FALLBACK.to_string(), &self.summary);
        } else {
            for peer in self.peers.known_peers() {
                push_publish(effects, summary_topic(&peer), &self.summary);
            }
        }
    }
}

fn push_publish<T: Serialize>(effects: &mut Vec<Effect>, topic: String, msg: &T) {
    match codec::encode(msg) {
        Ok(payload) => effects.push(Effect::Publish { topic, payload }),
        Err(e) => error!("Reconciler: failed to encode message for {}: {}", topic, e),
    }
}
