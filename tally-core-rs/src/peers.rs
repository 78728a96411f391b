//! Presence-based peer directory
//!
//! Peers are learned from presence messages only. There is no handshake, so a
//! node re-announces itself periodically to catch peers that missed the first
//! announcement.

use crate::topics::PRESENCE_ANNOUNCE;
use crate::types::{PeerId, Presence};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Information about a discovered peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub kind: Option<String>,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

/// Set of known peers, excluding the local node
#[derive(Debug)]
pub struct PeerDirectory {
    local_id: PeerId,
    peers: HashMap<PeerId, PeerInfo>,
}

impl PeerDirectory {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            peers: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Record a peer seen at `now`. Returns true if the peer was not known.
    pub fn record_peer(&mut self, peer_id: &str, kind: Option<&str>, now: Instant) -> bool {
        if peer_id == self.local_id {
            return false;
        }

        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.last_seen = now;
            return false;
        }

        self.peers.insert(
            peer_id.to_string(),
            PeerInfo {
                peer_id: peer_id.to_string(),
                kind: kind.map(String::from),
                first_seen: now,
                last_seen: now,
            },
        );
        info!(
            "Peers: discovered \"{}\" ({}), {} known",
            peer_id,
            kind.unwrap_or("unknown"),
            self.peers.len()
        );
        true
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Known peer ids, sorted
    pub fn known_peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerInfo> {
        self.peers.get(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Presence message for every announce topic
    pub fn announce(&self) -> Vec<(&'static str, Presence)> {
        let presence = Presence::new(self.local_id.clone());
        PRESENCE_ANNOUNCE
            .iter()
            .map(|topic| (*topic, presence.clone()))
            .collect()
    }

    /// Drop peers not heard from within `ttl`. Returns the removed ids.
    pub fn prune_stale(&mut self, now: Instant, ttl: Duration) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| now.saturating_duration_since(p.last_seen) > ttl)
            .map(|p| p.peer_id.clone())
            .collect();

        for id in &stale {
            if let Some(peer) = self.peers.remove(id) {
                debug!(
                    "Peers: \"{}\" expired after {:?}",
                    id,
                    peer.last_seen.saturating_duration_since(peer.first_seen)
                );
            }
        }

        stale
    }
}
