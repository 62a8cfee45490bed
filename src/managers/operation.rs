//! Backup operation lifecycle
//!
//! A [`BackupOperation`] wraps one request. [`BackupOperation::run`] hands
//! it to the coordinator once, waits for every sub-task and turns the
//! gathered outcomes into a single result:
//!
//! - coordinator error: `Failed`, the error is returned unchanged
//! - failed or erroneous outcomes: `Failed`, [`GatheringError`] carries the
//!   erroneous ones
//! - otherwise `Completed`

use super::gatherer::{ResultGatherer, TaskOutcome, TaskStatus};
use crate::config::BackupRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Fans an operation out to its targets
#[async_trait]
pub trait OperationCoordinator: Send + Sync {
    /// Run every sub-task to a terminal outcome.
    ///
    /// An error means the operation could not be coordinated at all; it is
    /// never turned into an outcome.
    async fn coordinate(&self, operation: &BackupOperation) -> anyhow::Result<ResultGatherer>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }
}

/// Erroneous sub-task outcomes of a failed operation, in reporting order
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe_outcomes(.outcomes))]
pub struct GatheringError {
    outcomes: Vec<TaskOutcome>,
}

fn describe_outcomes(outcomes: &[TaskOutcome]) -> String {
    if outcomes.is_empty() {
        return "Backup failed; see logs for failed targets".to_string();
    }

    let details: String = outcomes
        .iter()
        .map(|o| format!("; {}: {}", o.target, o.message.as_deref().unwrap_or("unknown error")))
        .collect();
    format!("{} sub-task(s) failed unexpectedly{}", outcomes.len(), details)
}

impl GatheringError {
    pub fn new(outcomes: Vec<TaskOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Backup operation requires a coordinator")]
    NoCoordinator,

    #[error("Operation {id} cannot run from state {state:?}")]
    InvalidState { id: Uuid, state: OperationState },

    /// Error returned by the coordinator itself
    #[error(transparent)]
    Coordinator(anyhow::Error),

    #[error(transparent)]
    Gathered(#[from] GatheringError),
}

#[derive(Debug, Clone)]
struct OperationStatus {
    state: OperationState,
    start_time: Option<DateTime<Utc>>,
    completion_time: Option<DateTime<Utc>>,
    progress: f32,
    failure_cause: Option<String>,
    duration: Option<Duration>,
    bytes_transferred: Option<u64>,
    outcomes: Vec<TaskOutcome>,
}

/// One backup, from request to terminal state
pub struct BackupOperation {
    id: Uuid,
    request: BackupRequest,
    coordinator: Arc<dyn OperationCoordinator>,
    creation_time: DateTime<Utc>,
    status: Mutex<OperationStatus>,
}

impl fmt::Debug for BackupOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupOperation")
            .field("id", &self.id)
            .field("snapshot_tag", &self.request.snapshot_tag)
            .field("state", &self.state())
            .finish()
    }
}

impl BackupOperation {
    /// Create a pending operation; a missing coordinator is rejected here
    pub fn new(
        coordinator: Option<Arc<dyn OperationCoordinator>>,
        request: BackupRequest,
    ) -> Result<Self, OperationError> {
        let coordinator = coordinator.ok_or(OperationError::NoCoordinator)?;

        Ok(Self {
            id: Uuid::new_v4(),
            request,
            coordinator,
            creation_time: Utc::now(),
            status: Mutex::new(OperationStatus {
                state: OperationState::Pending,
                start_time: None,
                completion_time: None,
                progress: 0.0,
                failure_cause: None,
                duration: None,
                bytes_transferred: None,
                outcomes: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &BackupRequest {
        &self.request
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn state(&self) -> OperationState {
        self.status.lock().state
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.status.lock().start_time
    }

    pub fn progress(&self) -> f32 {
        self.status.lock().progress
    }

    /// Record that `reported` of `total` sub-tasks have an outcome.
    /// Ignored unless the operation is running.
    pub fn update_progress(&self, reported: usize, total: usize) {
        let mut status = self.status.lock();
        if status.state != OperationState::Running || total == 0 {
            return;
        }
        status.progress = (reported.min(total) as f32 / total as f32).max(status.progress);
    }

    pub fn failure_cause(&self) -> Option<String> {
        self.status.lock().failure_cause.clone()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.status.lock().duration
    }

    /// Average upload rate in bytes per second
    pub fn bandwidth(&self) -> Option<f64> {
        let status = self.status.lock();
        match (status.bytes_transferred, status.duration) {
            (Some(bytes), Some(duration)) if !duration.is_zero() => {
                Some(bytes as f64 / duration.as_secs_f64())
            }
            _ => None,
        }
    }

    /// Run the operation to a terminal state. May only be called once.
    pub async fn run(&self) -> Result<(), OperationError> {
        let started = Instant::now();
        {
            let mut status = self.status.lock();
            if status.state != OperationState::Pending {
                return Err(OperationError::InvalidState {
                    id: self.id,
                    state: status.state,
                });
            }
            status.state = OperationState::Running;
            status.start_time = Some(Utc::now());
        }

        info!(
            "Starting backup operation {} for snapshot '{}' to {}",
            self.id, self.request.snapshot_tag, self.request.storage_location
        );

        let gatherer = match self.coordinator.coordinate(self).await {
            Ok(gatherer) => gatherer,
            Err(e) => {
                error!("Backup operation {} could not be coordinated: {:#}", self.id, e);
                self.finish(OperationState::Failed, started, Some(format!("{:#}", e)), None);
                return Err(OperationError::Coordinator(e));
            }
        };

        for outcome in gatherer.failed() {
            warn!(
                "Backup of {} failed: {}",
                outcome.target,
                outcome.message.as_deref().unwrap_or("no reason given")
            );
        }

        let erroneous = gatherer.erroneous();
        for outcome in &erroneous {
            error!(
                "Backup of {} failed unexpectedly: {}",
                outcome.target,
                outcome.message.as_deref().unwrap_or("unknown error")
            );
        }

        if gatherer.has_errors() {
            let error = GatheringError::new(erroneous);
            self.finish(OperationState::Failed, started, Some(error.to_string()), Some(&gatherer));
            return Err(error.into());
        }

        self.finish(OperationState::Completed, started, None, Some(&gatherer));
        info!(
            "Backup operation {} completed: {} target(s) in {:.1}s",
            self.id,
            gatherer.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(())
    }

    fn finish(
        &self,
        state: OperationState,
        started: Instant,
        failure_cause: Option<String>,
        gatherer: Option<&ResultGatherer>,
    ) {
        let mut status = self.status.lock();
        status.state = state;
        status.completion_time = Some(Utc::now());
        status.duration = Some(started.elapsed());
        status.failure_cause = failure_cause;

        if state == OperationState::Completed {
            status.progress = 1.0;
        }

        if let Some(gatherer) = gatherer {
            status.bytes_transferred = Some(gatherer.total_bytes());
            status.outcomes = gatherer.outcomes();
        }
    }

    /// Point-in-time view for reporting
    pub fn summary(&self) -> OperationSummary {
        let bandwidth = self.bandwidth();
        let status = self.status.lock();
        let count = |wanted: TaskStatus| status.outcomes.iter().filter(|o| o.status == wanted).count();

        OperationSummary {
            id: self.id,
            snapshot_tag: self.request.snapshot_tag.clone(),
            storage_location: self.request.storage_location.to_string(),
            state: status.state,
            creation_time: self.creation_time,
            start_time: status.start_time,
            completion_time: status.completion_time,
            progress: status.progress,
            failure_cause: status.failure_cause.clone(),
            duration_secs: status.duration.map(|d| d.as_secs_f64()),
            bytes_transferred: status.bytes_transferred,
            bandwidth_bytes_per_sec: bandwidth,
            succeeded: count(TaskStatus::Succeeded),
            failed: count(TaskStatus::Failed),
            erroneous: status
                .outcomes
                .iter()
                .filter(|o| o.status == TaskStatus::Erroneous)
                .cloned()
                .collect(),
        }
    }
}

/// Serializable view of an operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationSummary {
    pub id: Uuid,
    pub snapshot_tag: String,
    pub storage_location: String,
    pub state: OperationState,
    pub creation_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub progress: f32,
    pub failure_cause: Option<String>,
    pub duration_secs: Option<f64>,
    pub bytes_transferred: Option<u64>,
    pub bandwidth_bytes_per_sec: Option<f64>,
    pub succeeded: usize,
    pub failed: usize,
    pub erroneous: Vec<TaskOutcome>,
}
