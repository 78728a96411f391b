//! Scoring node event loop
//!
//! One task owns the reconciler and the transport and processes transport
//! events, UI commands and announce ticks one at a time. UI code talks to the
//! node through a cloneable [`NodeHandle`]; the loop ends when every handle is
//! dropped.

use std::time::Instant as StdInstant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, MIN_ANNOUNCE_INTERVAL};
use crate::error::ScoreError;
use crate::reconciler::{Effect, Reconciler};
use crate::transport::{Transport, TransportEvent};
use crate::types::{NodeStatus, ScoreCard, StudentId, Submission, Summary};

/// Callbacks into the UI layer
pub trait ScoreObserver: Send + 'static {
    /// A submission entered the ledger, locally or from a peer
    fn on_accepted_submission(&mut self, _submission: &Submission) {}

    fn on_summary_changed(&mut self, _summary: &Summary) {}

    /// Scores were cleared by a team reset or a manual reset
    fn on_reset(&mut self, _reason: &str) {}
}

/// Observer that ignores every notification
pub struct NoopObserver;

impl ScoreObserver for NoopObserver {}

enum Command {
    Submit {
        student_id: StudentId,
        card: ScoreCard,
        reply: oneshot::Sender<Result<Submission, ScoreError>>,
    },
    HasSubmitted {
        student_id: StudentId,
        reply: oneshot::Sender<bool>,
    },
    Summary {
        reply: oneshot::Sender<Summary>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    Reset {
        reason: String,
        reply: oneshot::Sender<()>,
    },
}

/// UI-facing handle to a running node
#[derive(Clone)]
pub struct NodeHandle {
    tx: mpsc::Sender<Command>,
}

impl NodeHandle {
    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ScoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ScoreError::NodeStopped)?;
        rx.await.map_err(|_| ScoreError::NodeStopped)
    }

    /// Submit scores for a student. Fails on a duplicate id.
    pub async fn submit(
        &self,
        student_id: impl Into<StudentId>,
        card: ScoreCard,
    ) -> Result<Submission, ScoreError> {
        let student_id = student_id.into();
        self.request(|reply| Command::Submit {
            student_id,
            card,
            reply,
        })
        .await?
    }

    pub async fn has_submitted(&self, student_id: impl Into<StudentId>) -> Result<bool, ScoreError> {
        let student_id = student_id.into();
        self.request(|reply| Command::HasSubmitted { student_id, reply })
            .await
    }

    pub async fn summary(&self) -> Result<Summary, ScoreError> {
        self.request(|reply| Command::Summary { reply }).await
    }

    pub async fn status(&self) -> Result<NodeStatus, ScoreError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Clear all scores locally and broadcast the empty summary
    pub async fn manual_reset(&self, reason: impl Into<String>) -> Result<(), ScoreError> {
        let reason = reason.into();
        self.request(|reply| Command::Reset { reason, reply }).await
    }
}

/// Single-threaded scoring node
pub struct ScoringNode<T: Transport> {
    config: NodeConfig,
    reconciler: Reconciler,
    transport: T,
    events: mpsc::Receiver<TransportEvent>,
    commands: mpsc::Receiver<Command>,
    observer: Box<dyn ScoreObserver>,
    /// Set once the transport has connected at least once
    established: bool,
}

impl<T: Transport> ScoringNode<T> {
    /// Create a node over a transport and its event stream
    pub fn new(
        config: NodeConfig,
        transport: T,
        events: mpsc::Receiver<TransportEvent>,
    ) -> (Self, NodeHandle) {
        let (tx, commands) = mpsc::channel(config.command_capacity);
        let reconciler = Reconciler::new(config.peer_id.clone()).with_peer_ttl(config.peer_ttl);

        let node = Self {
            config,
            reconciler,
            transport,
            events,
            commands,
            observer: Box::new(NoopObserver),
            established: false,
        };
        (node, NodeHandle { tx })
    }

    pub fn with_observer(mut self, observer: impl ScoreObserver) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn peer_id(&self) -> &str {
        &self.config.peer_id
    }

    /// Run the event loop in a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until every handle is dropped
    pub async fn run(mut self) {
        let period = self.config.announce_interval.max(MIN_ANNOUNCE_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Node \"{}\" started", self.config.peer_id);

        loop {
            tokio::select! {
                // Transport events first, so a queued Connected precedes commands
                biased;

                Some(event) = self.events.recv() => self.handle_event(event),

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },

                _ = ticker.tick() => {
                    if self.established {
                        let effects = self.reconciler.tick(StdInstant::now());
                        self.execute(effects);
                    }
                }
            }
        }

        info!("Node \"{}\" stopped", self.config.peer_id);
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if !self.established {
                    info!("Node: transport ready, announcing every {:?}", self.config.announce_interval);
                }
                self.established = true;
                let effects = self.reconciler.announce();
                self.execute(effects);
            }
            TransportEvent::Disconnected => {
                warn!("Node: transport disconnected, publishes are dropped until reconnect");
            }
            TransportEvent::Message { topic, payload } => {
                let effects = self.reconciler.handle_message(&topic, &payload);
                self.execute(effects);
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                student_id,
                card,
                reply,
            } => {
                let result = if !self.established {
                    Err(ScoreError::TransportUnavailable)
                } else {
                    self.reconciler.submit(student_id, card).map(|(submission, effects)| {
                        self.execute(effects);
                        submission
                    })
                };
                if let Err(e) = &result {
                    debug!("Node: submit rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::HasSubmitted { student_id, reply } => {
                let _ = reply.send(self.reconciler.has_submitted(&student_id));
            }
            Command::Summary { reply } => {
                let _ = reply.send(self.reconciler.summary().clone());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.reconciler.status(self.transport.is_connected()));
            }
            Command::Reset { reason, reply } => {
                let effects = self.reconciler.manual_reset(&reason);
                self.execute(effects);
                let _ = reply.send(());
            }
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish { topic, payload } => self.transport.publish(&topic, payload),
                Effect::Accepted(submission) => self.observer.on_accepted_submission(&submission),
                Effect::SummaryChanged(summary) => self.observer.on_summary_changed(&summary),
                Effect::Reset { reason } => self.observer.on_reset(&reason),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBus;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        accepted: Arc<Mutex<Vec<StudentId>>>,
        resets: Arc<Mutex<Vec<String>>>,
    }

    impl ScoreObserver for Recorder {
        fn on_accepted_submission(&mut self, submission: &Submission) {
            self.accepted.lock().unwrap().push(submission.student_id.clone());
        }

        fn on_reset(&mut self, reason: &str) {
            self.resets.lock().unwrap().push(reason.to_string());
        }
    }

    #[tokio::test]
    async fn test_submit_and_query() {
        let bus = MemoryBus::new();
        let config = NodeConfig::new("a");
        let (transport, events) = bus.connect(config.subscriptions());
        let recorder = Recorder::default();
        let (node, handle) = ScoringNode::new(config, transport, events);
        assert_eq!(node.peer_id(), "a");
        node.with_observer(recorder.clone()).spawn();

        let sub = handle.submit(1, ScoreCard::new(8, 7, 9)).await.unwrap();
        assert_eq!(sub.student_id, StudentId::Number(1));
        assert!(handle.has_submitted(1).await.unwrap());
        assert!(!handle.has_submitted(2).await.unwrap());

        let err = handle.submit(1, ScoreCard::new(1, 1, 1)).await.unwrap_err();
        assert_eq!(err, ScoreError::Duplicate(StudentId::Number(1)));

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.submitted_count, 1);
        assert_eq!(summary.averages.confidence, 9.0);

        let status = handle.status().await.unwrap();
        assert!(status.connected);
        assert_eq!(status.peer_id, "a");
        assert_eq!(status.total_submissions, 1);
        assert_eq!(status.peer_count, 0);

        handle.manual_reset("between teams").await.unwrap();
        let cleared = handle.summary().await.unwrap();
        assert!(cleared.is_empty());
        assert_eq!(cleared, Summary::default());

        assert_eq!(*recorder.accepted.lock().unwrap(), vec![StudentId::Number(1)]);
        assert_eq!(*recorder.resets.lock().unwrap(), vec!["between teams".to_string()]);
    }

    #[tokio::test]
    async fn test_submit_before_connect_fails() {
        let (_tx, events) = mpsc::channel(4);
        let bus = MemoryBus::new();
        let (transport, _unused) = bus.connect(vec![]);
        let (node, handle) = ScoringNode::new(NodeConfig::new("a"), transport, events);
        node.spawn();

        let err = handle.submit(1, ScoreCard::new(1, 1, 1)).await.unwrap_err();
        assert_eq!(err, ScoreError::TransportUnavailable);
    }

    #[tokio::test]
    async fn test_zero_announce_interval_keeps_running() {
        let bus = MemoryBus::new();
        let mut config = NodeConfig::new("a");
        config.announce_interval = std::time::Duration::ZERO;
        let (transport, events) = bus.connect(config.subscriptions());
        let (node, handle) = ScoringNode::new(config, transport, events);
        let task = node.spawn();

        handle.submit(1, ScoreCard::new(2, 2, 2)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(handle.summary().await.unwrap().submitted_count, 1);
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn test_handle_after_stop() {
        let bus = MemoryBus::new();
        let (transport, events) = bus.connect(vec![]);
        let (node, handle) = ScoringNode::new(NodeConfig::new("a"), transport, events);
        drop(node);

        assert_eq!(handle.summary().await.unwrap_err(), ScoreError::NodeStopped);
    }
}
