//! Collection of per-node outcomes

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// How a sub-task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    /// Expected negative result, e.g. no snapshot with the tag
    Failed,
    /// Unexpected error
    Erroneous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub target: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Bytes uploaded by the sub-task
    pub bytes: u64,
}

impl TaskOutcome {
    pub fn succeeded(target: &str) -> Self {
        Self {
            target: target.to_string(),
            status: TaskStatus::Succeeded,
            message: None,
            bytes: 0,
        }
    }

    pub fn failed(target: &str, message: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            status: TaskStatus::Failed,
            message: Some(message.into()),
            bytes: 0,
        }
    }

    pub fn erroneous(target: &str, message: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            status: TaskStatus::Erroneous,
            message: Some(message.into()),
            bytes: 0,
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }
}

/// Shared, cloneable collector of outcomes.
///
/// Every target reports once; outcomes keep their reporting order.
#[derive(Debug, Clone, Default)]
pub struct ResultGatherer {
    outcomes: Arc<Mutex<Vec<TaskOutcome>>>,
}

impl ResultGatherer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome; returns false when the target already reported
    pub fn report(&self, outcome: TaskOutcome) -> bool {
        let mut outcomes = self.outcomes.lock();

        if outcomes.iter().any(|o| o.target == outcome.target) {
            warn!(
                "Ignoring duplicate {:?} outcome for {}",
                outcome.status, outcome.target
            );
            return false;
        }

        outcomes.push(outcome);
        true
    }

    pub fn is_reported(&self, target: &str) -> bool {
        self.outcomes.lock().iter().any(|o| o.target == target)
    }

    pub fn outcomes(&self) -> Vec<TaskOutcome> {
        self.outcomes.lock().clone()
    }

    fn with_status(&self, status: TaskStatus) -> Vec<TaskOutcome> {
        self.outcomes
            .lock()
            .iter()
            .filter(|o| o.status == status)
            .cloned()
            .collect()
    }

    pub fn succeeded(&self) -> Vec<TaskOutcome> {
        self.with_status(TaskStatus::Succeeded)
    }

    pub fn failed(&self) -> Vec<TaskOutcome> {
        self.with_status(TaskStatus::Failed)
    }

    pub fn erroneous(&self) -> Vec<TaskOutcome> {
        self.with_status(TaskStatus::Erroneous)
    }

    pub fn has_errors(&self) -> bool {
        self.outcomes
            .lock()
            .iter()
            .any(|o| o.status != TaskStatus::Succeeded)
    }

    pub fn total_bytes(&self) -> u64 {
        self.outcomes.lock().iter().map(|o| o.bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
