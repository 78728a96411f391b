//! Topic catalogue and inbound topic routing

/// Presence topics a node publishes on
pub const PRESENCE_ANNOUNCE: [&str; 3] = ["presence", "presence/broadcast", "presence/force"];

/// Presence topics a node listens on (announce topics plus the presentation tool)
pub const PRESENCE_LISTEN: [&str; 4] = [
    "presence",
    "presence/broadcast",
    "presence/force",
    "system/presentation_tool",
];

pub const TEAM_RESET: &str = "team_reset";

/// Fallback topics for bare submissions when no peer is known
pub const SCORES_FALLBACK: [&str; 3] = [
    "scores/broadcast",
    "presentation/scores/broadcast",
    "scores/all",
];

/// Fallback topic for summaries when no peer is known
pub const SUMMARY_FALLBACK: &str = "summary/broadcast";

pub fn scores_topic(peer_id: &str) -> String {
    format!("scores/{}", peer_id)
}

pub fn summary_topic(peer_id: &str) -> String {
    format!("summary/{}", peer_id)
}

/// What an inbound topic carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// State sync or bare submission
    Scores,
    Summary,
    Presence,
    Reset,
}

/// Classify a topic by its shape. Private and shared scores/summary topics are
/// handled alike.
pub fn route(topic: &str) -> Option<Route> {
    if PRESENCE_LISTEN.contains(&topic) {
        Some(Route::Presence)
    } else if topic == TEAM_RESET {
        Some(Route::Reset)
    } else if topic.starts_with("scores/") || topic == "presentation/scores/broadcast" {
        Some(Route::Scores)
    } else if topic.starts_with("summary/") {
        Some(Route::Summary)
    } else {
        None
    }
}

/// Topics a node subscribes to after connecting
pub fn subscriptions(peer_id: &str, listen_fallback: bool) -> Vec<String> {
    let mut topics = vec![scores_topic(peer_id), summary_topic(peer_id)];
    topics.extend(PRESENCE_LISTEN.iter().map(|t| t.to_string()));
    topics.push(TEAM_RESET.to_string());

    if listen_fallback {
        topics.extend(SCORES_FALLBACK.iter().map(|t| t.to_string()));
        topics.push(SUMMARY_FALLBACK.to_string());
    }

    topics
}
