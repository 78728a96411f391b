//! Node configuration

use rand::Rng;
use std::time::Duration;

/// Shortest accepted announce interval
pub const MIN_ANNOUNCE_INTERVAL: Duration = Duration::from_millis(10);

/// Scoring node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Local peer identity
    pub peer_id: String,

    /// Interval between presence re-announcements
    pub announce_interval: Duration,

    /// Expire peers silent for longer than this. `None` keeps peers forever.
    pub peer_ttl: Option<Duration>,

    /// Also subscribe to the shared fallback topics
    pub listen_fallback: bool,

    /// Capacity of the UI command channel
    pub command_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: random_peer_id(),
            announce_interval: Duration::from_secs(10),
            peer_ttl: None,
            listen_fallback: true,
            command_capacity: 64,
        }
    }
}

impl NodeConfig {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            ..Default::default()
        }
    }

    /// Raised to [`MIN_ANNOUNCE_INTERVAL`] if shorter
    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval.max(MIN_ANNOUNCE_INTERVAL);
        self
    }

    pub fn with_peer_ttl(mut self, ttl: Duration) -> Self {
        self.peer_ttl = Some(ttl);
        self
    }

    /// Only listen on private, presence and reset topics
    pub fn without_fallback_listen(mut self) -> Self {
        self.listen_fallback = false;
        self
    }

    /// Topics this node subscribes to
    pub fn subscriptions(&self) -> Vec<String> {
        crate::topics::subscriptions(&self.peer_id, self.listen_fallback)
    }
}

/// `peer_` followed by 8 random hex digits
pub fn random_peer_id() -> String {
    format!("peer_{:08x}", rand::thread_rng().gen::<u32>())
}
