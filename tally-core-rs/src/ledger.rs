//! Submission ledger
//!
//! Per-node record of accepted submissions, at most one per student.
//! Entries are never updated once stored: local duplicates are rejected and
//! colliding peer data is ignored (first writer wins).

use crate::error::ScoreError;
use crate::types::{Averages, ScoreCard, StudentId, Submission, Summary};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Authoritative map of student id to submission
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: HashMap<StudentId, Submission>,
    /// Acceptance order, for feedback display
    order: Vec<StudentId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_submitted(&self, student_id: &StudentId) -> bool {
        self.entries.contains_key(student_id)
    }

    pub fn get(&self, student_id: &StudentId) -> Option<&Submission> {
        self.entries.get(student_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accept a local submission stamped with the current time
    pub fn accept(&mut self, student_id: StudentId, card: ScoreCard) -> Result<Submission, ScoreError> {
        self.accept_at(student_id, card, Utc::now())
    }

    /// Accept a local submission with an explicit acceptance time
    pub fn accept_at(
        &mut self,
        student_id: StudentId,
        card: ScoreCard,
        timestamp: DateTime<Utc>,
    ) -> Result<Submission, ScoreError> {
        if self.has_submitted(&student_id) {
            return Err(ScoreError::Duplicate(student_id));
        }

        let submission = Submission::new(student_id.clone(), card, timestamp);
        self.insert(student_id, submission.clone());
        Ok(submission)
    }

    /// Store peer data unless the id is already known. Returns true if stored.
    ///
    /// The key wins over any `studentId` inside the submission so that the
    /// ledger stays keyed consistently.
    pub fn merge_if_absent(&mut self, student_id: StudentId, mut submission: Submission) -> bool {
        if self.has_submitted(&student_id) {
            debug!("Ledger: ignoring duplicate {} from peer", student_id);
            return false;
        }

        submission.student_id = student_id.clone();
        self.insert(student_id, submission);
        true
    }

    fn insert(&mut self, student_id: StudentId, submission: Submission) {
        self.order.push(student_id.clone());
        self.entries.insert(student_id, submission);
    }

    /// Submissions in acceptance order
    pub fn submissions(&self) -> Vec<Submission> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .cloned()
            .collect()
    }

    /// Ordered `(id, submission)` pairs for full-state exchange
    pub fn snapshot(&self) -> Vec<(StudentId, Submission)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|s| (id.clone(), s.clone())))
            .collect()
    }

    /// Recompute the summary from the full live set
    pub fn compute_summary(&self) -> Summary {
        let submissions = self.submissions();

        let (clarity, delivery, confidence) = submissions.iter().fold(
            (0u64, 0u64, 0u64),
            |(c, d, f), s| {
                (
                    c + u64::from(s.clarity),
                    d + u64::from(s.delivery),
                    f + u64::from(s.confidence),
                )
            },
        );

        let count = submissions.len().max(1) as f64;

        Summary {
            submitted_count: submissions.len(),
            averages: Averages {
                clarity: clarity as f64 / count,
                delivery: delivery as f64 / count,
                confidence: confidence as f64 / count,
            },
            submissions,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
