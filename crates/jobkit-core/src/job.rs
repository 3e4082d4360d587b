//! Job records and the lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::JobId;

/// Default retry budget for a submitted job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// An opaque key/value payload, passed through to the processor unchanged.
pub type Payload = Map<String, Value>;

/// Scheduling priority class.
///
/// Among PENDING jobs, the highest class always wins; ties within a class are
/// broken by submission age (oldest first).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Lifecycle state of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed; exactly one worker owns the record.
    Processing,
    /// Processor returned a result.
    Completed,
    /// Processor failed (or timed out) with the retry budget exhausted, or
    /// the job's type had no registered processor.
    Failed,
    /// Cancelled by an explicit request before reaching a terminal state.
    Cancelled,
}

impl JobState {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// All states, in declaration order. Used for statistics partitioning.
    pub fn all() -> [JobState; 5] {
        [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
            JobState::Cancelled,
        ]
    }
}

/// One submitted unit of deferred work and its mutable lifecycle state.
///
/// Records are created PENDING and mutated only through the transition
/// methods below, which implement exactly the edges of the state machine:
/// PENDING -> PROCESSING -> {COMPLETED, FAILED, PENDING (retry)}, with
/// CANCELLED reachable from any non-terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub payload: Payload,
    pub priority: Priority,
    pub max_retries: u32,
    /// Per-attempt execution timeout (not cumulative across retries).
    pub timeout: Duration,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    /// Set when a worker claims the record; cleared when it is re-queued for
    /// retry so "not yet started" stays representable while PENDING.
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly once, on entry to a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub result: Option<Payload>,
    /// Submission order; final scheduler tie-breaker for records created
    /// within the same timestamp.
    pub seq: u64,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        job_type: impl Into<String>,
        payload: Payload,
        priority: Priority,
        max_retries: u32,
        timeout: Duration,
        seq: u64,
    ) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            payload,
            priority,
            max_retries,
            timeout,
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            last_error: None,
            result: None,
            seq,
        }
    }

    /// Whether another failed attempt may still be re-queued.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// PENDING -> PROCESSING. Caller must hold exclusive access to the table.
    pub fn claim(&mut self) {
        debug_assert_eq!(self.state, JobState::Pending, "claim of non-pending job");
        self.state = JobState::Processing;
        self.started_at = Some(Utc::now());
    }

    /// PROCESSING -> COMPLETED.
    pub fn complete(&mut self, result: Payload) {
        debug_assert_eq!(self.state, JobState::Processing);
        self.state = JobState::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// PROCESSING -> PENDING. Consumes one unit of retry budget and keeps
    /// `created_at`/`seq`, so the record does not gain or lose queue position
    /// by being retried.
    pub fn retry(&mut self, error: impl Into<String>) {
        debug_assert_eq!(self.state, JobState::Processing);
        debug_assert!(self.has_retry_budget(), "retry past budget");
        self.state = JobState::Pending;
        self.retry_count += 1;
        self.started_at = None;
        self.last_error = Some(error.into());
    }

    /// PROCESSING -> FAILED.
    pub fn fail(&mut self, error: impl Into<String>) {
        debug_assert_eq!(self.state, JobState::Processing);
        self.state = JobState::Failed;
        self.completed_at = Some(Utc::now());
        self.last_error = Some(error.into());
    }

    /// PENDING/PROCESSING -> CANCELLED. Caller checks the state is
    /// non-terminal first.
    pub fn cancel(&mut self) {
        debug_assert!(!self.state.is_terminal(), "cancel of terminal job");
        self.state = JobState::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

/// Read-only snapshot of a job record's externally visible fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub job_type: String,
    pub priority: Priority,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub result: Option<Payload>,
}

impl From<&JobRecord> for JobStatusView {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            job_type: record.job_type.clone(),
            priority: record.priority,
            state: record.state,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            retry_count: record.retry_count,
            max_retries: record.max_retries,
            last_error: record.last_error.clone(),
            result: record.result.clone(),
        }
    }
}
