//! Core types for the scoring protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a scoring node
pub type PeerId = String;

/// Student identifier as supplied by the caller.
///
/// Browser clients send either the raw form string or a parsed integer, so both
/// shapes are accepted on the wire. Numeric-looking text is normalized to
/// `Number` when parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StudentId {
    Number(i64),
    Text(String),
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudentId::Number(n) => write!(f, "{}", n),
            StudentId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl FromStr for StudentId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse::<i64>() {
            Ok(n) => StudentId::Number(n),
            Err(_) => StudentId::Text(s.to_string()),
        })
    }
}

impl From<i64> for StudentId {
    fn from(n: i64) -> Self {
        StudentId::Number(n)
    }
}

impl From<i32> for StudentId {
    fn from(n: i32) -> Self {
        StudentId::Number(i64::from(n))
    }
}

impl From<&str> for StudentId {
    fn from(s: &str) -> Self {
        StudentId::Text(s.to_string())
    }
}

/// Scores entered by a grader, before the ledger stamps them
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub clarity: u32,
    pub delivery: u32,
    pub confidence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl ScoreCard {
    pub fn new(clarity: u32, delivery: u32, confidence: u32) -> Self {
        Self {
            clarity,
            delivery,
            confidence,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.student_name = Some(name.into());
        self
    }

    /// Empty feedback is stored as absent
    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        let feedback = feedback.into();
        let trimmed = feedback.trim();
        self.feedback = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.is_anonymous = true;
        self
    }
}

/// An accepted submission. Immutable once it enters a ledger.
///
/// Also the "bare submission" wire message: it has no `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub student_id: StudentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub clarity: u32,
    pub delivery: u32,
    pub confidence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    pub timestamp: DateTime<Utc>,
}

impl Submission {
    pub fn new(student_id: StudentId, card: ScoreCard, timestamp: DateTime<Utc>) -> Self {
        Self {
            student_id,
            student_name: card.student_name,
            clarity: card.clarity,
            delivery: card.delivery,
            confidence: card.confidence,
            feedback: card.feedback,
            is_anonymous: card.is_anonymous,
            timestamp,
        }
    }

    /// Author line shown next to feedback
    pub fn attribution(&self) -> String {
        match (&self.student_name, self.is_anonymous) {
            (Some(name), false) => format!("Feedback from {}", name),
            _ => "Anonymous feedback".to_string(),
        }
    }
}

/// Mean score per criterion
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Averages {
    pub clarity: f64,
    pub delivery: f64,
    pub confidence: f64,
}

/// Aggregate view over a ledger
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub submitted_count: usize,
    pub averages: Averages,
    #[serde(default)]
    pub submissions: Vec<Submission>,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.submitted_count == 0
    }
}

/// Presence announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub peer_id: PeerId,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Kind of announcing application. Other tools publish on the presence
    /// topics too, so any value is accepted.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Kind tag carried by presence from scoring nodes
pub const PRESENCE_KIND: &str = "grading_app";

impl Presence {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            timestamp: Some(Utc::now()),
            kind: Some(PRESENCE_KIND.to_string()),
        }
    }
}

/// Full ledger snapshot sent to a newly discovered peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "state_sync")]
pub struct StateSync {
    pub scores: Vec<(StudentId, Submission)>,
    pub source: PeerId,
}

/// Reset action that clears scores
pub const RESET_KIND: &str = "team_reset";
pub const RESET_ACTION_CLEAR: &str = "clear_scores";

/// Reset signal published by the presentation tool between teams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamReset {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    #[serde(default)]
    pub team_name: Option<String>,
}

impl TeamReset {
    pub fn clear_scores(team_name: impl Into<String>) -> Self {
        Self {
            kind: RESET_KIND.to_string(),
            action: RESET_ACTION_CLEAR.to_string(),
            team_name: Some(team_name.into()),
        }
    }

    pub fn is_clear_scores(&self) -> bool {
        self.kind == RESET_KIND && self.action == RESET_ACTION_CLEAR
    }

    /// Human readable reason used in logs and observer callbacks
    pub fn reason(&self) -> String {
        match &self.team_name {
            Some(team) => format!("team reset for {}", team),
            None => "team reset".to_string(),
        }
    }
}

/// Decoded inbound protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Presence(Presence),
    StateSync(StateSync),
    Submission(Submission),
    Summary(Summary),
    Reset(TeamReset),
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Presence(_) => "presence",
            Inbound::StateSync(_) => "state_sync",
            Inbound::Submission(_) => "submission",
            Inbound::Summary(_) => "summary",
            Inbound::Reset(_) => "team_reset",
        }
    }
}

/// Connection status reported to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub connected: bool,
    pub peer_id: PeerId,
    pub total_submissions: usize,
    pub peer_count: usize,
    pub peer_ids: Vec<PeerId>,
    pub last_update: DateTime<Utc>,
}
