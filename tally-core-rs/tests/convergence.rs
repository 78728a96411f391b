//! Multi-node convergence over the in-process bus

use std::time::Duration;

use tally_core::{
    codec, MemoryBus, NodeConfig, NodeHandle, ScoreCard, ScoringNode, StudentId, TeamReset,
    Transport,
};
use tokio::time::sleep;

const WAIT_STEPS: usize = 200;
const STEP: Duration = Duration::from_millis(25);

fn start(bus: &MemoryBus, config: NodeConfig) -> NodeHandle {
    let (transport, events) = bus.connect(config.subscriptions());
    let (node, handle) = ScoringNode::new(config, transport, events);
    node.spawn();
    handle
}

/// Poll until the node reports `count` submissions
async fn wait_for_count(handle: &NodeHandle, count: usize) {
    for _ in 0..WAIT_STEPS {
        if handle.summary().await.unwrap().submitted_count == count {
            return;
        }
        sleep(STEP).await;
    }
    let actual = handle.summary().await.unwrap().submitted_count;
    panic!("expected {} submissions, node has {}", count, actual);
}

async fn wait_for_peers(handle: &NodeHandle, count: usize) {
    for _ in 0..WAIT_STEPS {
        if handle.status().await.unwrap().peer_count == count {
            return;
        }
        sleep(STEP).await;
    }
    panic!("expected {} peers", count);
}

fn quiet(peer_id: &str) -> NodeConfig {
    NodeConfig::new(peer_id).with_announce_interval(Duration::from_secs(60))
}

#[tokio::test]
async fn test_late_joiner_receives_state_sync() {
    let bus = MemoryBus::new();
    let a = start(&bus, quiet("a"));

    a.submit(1, ScoreCard::new(8, 7, 9)).await.unwrap();
    let summary_a = a.summary().await.unwrap();
    assert_eq!(summary_a.submitted_count, 1);

    // B announces on connect, A answers with its ledger
    let b = start(&bus, quiet("b").without_fallback_listen());
    wait_for_count(&b, 1).await;

    let summary_b = b.summary().await.unwrap();
    assert_eq!(summary_b.averages, summary_a.averages);
    assert!(b.has_submitted(1).await.unwrap());
}

#[tokio::test]
async fn test_peers_exchange_new_submissions() {
    let bus = MemoryBus::new();
    let chatty = |id: &str| {
        NodeConfig::new(id)
            .with_announce_interval(Duration::from_millis(100))
            .without_fallback_listen()
    };
    let a = start(&bus, chatty("a"));
    let b = start(&bus, chatty("b"));

    // Periodic presence lets each side learn the other
    wait_for_peers(&a, 1).await;
    wait_for_peers(&b, 1).await;

    a.submit(1, ScoreCard::new(4, 4, 4)).await.unwrap();
    wait_for_count(&b, 1).await;

    b.submit(2, ScoreCard::new(6, 6, 6)).await.unwrap();
    wait_for_count(&a, 2).await;

    let summary = a.summary().await.unwrap();
    assert_eq!(summary.averages.clarity, 5.0);
    assert_eq!(summary, b.summary().await.unwrap());
}

#[tokio::test]
async fn test_fallback_broadcast_reaches_listener() {
    let bus = MemoryBus::new();

    // Two isolated graders: they listen only on their private topics
    let (ta, ea) = bus.connect(vec!["scores/a".to_string()]);
    let (a, ha) = ScoringNode::new(quiet("a").without_fallback_listen(), ta, ea);
    a.spawn();
    let (tb, eb) = bus.connect(vec!["scores/b".to_string()]);
    let (b, hb) = ScoringNode::new(quiet("b").without_fallback_listen(), tb, eb);
    b.spawn();

    // A collector listening on the shared topics
    let collector = start(&bus, quiet("collector"));

    ha.submit(10, ScoreCard::new(2, 2, 2)).await.unwrap();
    hb.submit(20, ScoreCard::new(8, 8, 8)).await.unwrap();

    wait_for_count(&collector, 2).await;
    assert!(collector.has_submitted(StudentId::Number(10)).await.unwrap());
    assert!(collector.has_submitted(StudentId::Number(20)).await.unwrap());
}

#[tokio::test]
async fn test_team_reset_clears_all_nodes() {
    let bus = MemoryBus::new();
    let a = start(&bus, quiet("a"));
    let b = start(&bus, quiet("b"));
    wait_for_peers(&a, 1).await;

    a.submit(1, ScoreCard::new(5, 5, 5)).await.unwrap();
    wait_for_count(&b, 1).await;

    let (tool, _tool_events) = bus.connect(vec![]);
    tool.publish("team_reset", codec::encode(&TeamReset::clear_scores("Team 4")).unwrap());

    wait_for_count(&a, 0).await;
    wait_for_count(&b, 0).await;
    assert!(!a.has_submitted(1).await.unwrap());

    // Scoring resumes for the next team
    b.submit(1, ScoreCard::new(9, 9, 9)).await.unwrap();
    wait_for_count(&a, 1).await;
}

#[tokio::test]
async fn test_malformed_messages_do_not_stop_node() {
    let bus = MemoryBus::new();
    let a = start(&bus, quiet("a"));
    let (junk, _junk_events) = bus.connect(vec![]);

    junk.publish("scores/a", b"{\"studentId\":".to_vec());
    junk.publish("summary/broadcast", b"not json".to_vec());
    junk.publish("presence", b"[]".to_vec());
    junk.publish("team_reset", b"{\"type\":\"team_reset\",\"action\":\"nothing\"}".to_vec());

    a.submit(1, ScoreCard::new(3, 3, 3)).await.unwrap();
    wait_for_count(&a, 1).await;
}

#[tokio::test]
async fn test_expired_peer_is_resynced_after_outage() {
    let bus = MemoryBus::new();
    let a = start(
        &bus,
        NodeConfig::new("a")
            .with_announce_interval(Duration::from_millis(50))
            .with_peer_ttl(Duration::from_millis(200))
            .without_fallback_listen(),
    );

    let config_b = NodeConfig::new("b")
        .with_announce_interval(Duration::from_millis(50))
        .without_fallback_listen();
    let (tb, eb) = bus.connect(config_b.subscriptions());
    let link_b = tb.link();
    let (node_b, b) = ScoringNode::new(config_b, tb, eb);
    node_b.spawn();

    wait_for_peers(&a, 1).await;

    link_b.set_online(false);
    a.submit(7, ScoreCard::new(6, 6, 6)).await.unwrap();
    wait_for_peers(&a, 0).await;
    assert_eq!(b.summary().await.unwrap().submitted_count, 0);

    // B comes back, announces, and A treats it as new
    link_b.set_online(true);
    wait_for_count(&b, 1).await;
}
