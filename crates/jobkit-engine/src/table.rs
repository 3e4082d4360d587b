//! The in-memory job table with atomic select-and-claim.
//!
//! The table is the single source of truth for every job record and the only
//! thing workers communicate through. All state transitions happen inside one
//! mutex, which is what makes selection and claiming a single indivisible
//! step: two workers can never observe the same job as PENDING and both begin
//! executing it.

use chrono::{TimeDelta, Utc};
use jobkit_core::{JobId, JobRecord, JobState, JobStatusView, Payload, Priority};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Parameters for a new job record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub payload: Payload,
    pub priority: Priority,
    pub max_retries: u32,
    pub timeout: Duration,
}

/// Snapshot handed to the worker that claimed a job. The worker owns the
/// record exclusively until it settles the attempt.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub job_type: String,
    pub payload: Payload,
    pub timeout: Duration,
}

struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    next_seq: u64,
}

/// The authoritative collection of all job records ever submitted.
///
/// Records are never deleted by the engine itself; [`JobTable::sweep_terminal`]
/// is the eviction hook for hosts that want periodic retention.
pub struct JobTable {
    inner: Mutex<Inner>,
    /// Signalled when a PENDING record appears, so an idle worker wakes up
    /// without waiting out its poll interval.
    insert_notify: Notify,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                next_seq: 0,
            }),
            insert_notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("job table lock poisoned")
    }

    /// Insert a new PENDING record and wake one idle worker.
    pub fn insert(&self, new: NewJob) -> JobId {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let id = JobId::new(&new.job_type, seq);
        let record = JobRecord::new(
            id.clone(),
            new.job_type,
            new.payload,
            new.priority,
            new.max_retries,
            new.timeout,
            seq,
        );
        debug!(job_id = %id, priority = ?record.priority, "Job inserted");
        inner.jobs.insert(id.clone(), record);
        drop(inner);
        self.insert_notify.notify_one();
        id
    }

    /// Atomically select and claim the next eligible job.
    ///
    /// Selection is priority-major, age-minor among PENDING records, with the
    /// submission sequence as the final tie-breaker. The winning record is
    /// transitioned to PROCESSING under the same lock acquisition.
    pub fn claim_next(&self) -> Option<ClaimedJob> {
        let mut inner = self.lock();
        let id = inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Pending)
            .min_by_key(|j| (Reverse(j.priority), j.created_at, j.seq))
            .map(|j| j.id.clone())?;
        let job = inner
            .jobs
            .get_mut(&id)
            .expect("selected record vanished under lock");
        job.claim();
        Some(ClaimedJob {
            id: job.id.clone(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            timeout: job.timeout,
        })
    }

    /// Resolves when a new PENDING record may be available.
    pub async fn notified(&self) {
        self.insert_notify.notified().await;
    }

    /// Record a successful attempt. A record cancelled mid-flight stays
    /// CANCELLED; its result is dropped.
    pub fn settle_success(&self, id: &JobId, result: Payload) {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(id) else {
            return;
        };
        match job.state {
            JobState::Processing => {
                job.complete(result);
                debug!(job_id = %id, "Job completed");
            }
            JobState::Cancelled => {
                debug!(job_id = %id, "Dropping result of cancelled job");
            }
            state => warn!(job_id = %id, ?state, "Unexpected state on completion"),
        }
    }

    /// Record a failed or timed-out attempt: re-queue while the retry budget
    /// lasts, otherwise FAILED. A record cancelled mid-flight is never
    /// re-queued.
    pub fn settle_failure(&self, id: &JobId, error: &str) {
        let mut requeued = false;
        {
            let mut inner = self.lock();
            let Some(job) = inner.jobs.get_mut(id) else {
                return;
            };
            match job.state {
                JobState::Processing if job.has_retry_budget() => {
                    job.retry(error);
                    requeued = true;
                    warn!(
                        job_id = %id,
                        retry = job.retry_count,
                        max_retries = job.max_retries,
                        error = %error,
                        "Job attempt failed, re-queued"
                    );
                }
                JobState::Processing => {
                    job.fail(error);
                    warn!(job_id = %id, error = %error, "Job failed permanently");
                }
                JobState::Cancelled => {
                    debug!(job_id = %id, "Not re-queuing cancelled job");
                }
                state => warn!(job_id = %id, ?state, "Unexpected state on failure"),
            }
        }
        if requeued {
            self.insert_notify.notify_one();
        }
    }

    /// Fail a PROCESSING record outright, ignoring its retry budget. Used for
    /// configuration errors that retrying cannot fix.
    pub fn fail_permanently(&self, id: &JobId, error: &str) {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(id) else {
            return;
        };
        match job.state {
            JobState::Processing => {
                job.fail(error);
                warn!(job_id = %id, error = %error, "Job failed permanently");
            }
            JobState::Cancelled => {
                debug!(job_id = %id, "Not failing cancelled job");
            }
            state => warn!(job_id = %id, ?state, "Unexpected state on permanent failure"),
        }
    }

    /// Cancel a record that has not yet reached a terminal state. Returns
    /// false for unknown ids and records already terminal.
    pub fn cancel(&self, id: &JobId) -> bool {
        let mut inner = self.lock();
        match inner.jobs.get_mut(id) {
            Some(job) if !job.state.is_terminal() => {
                job.cancel();
                debug!(job_id = %id, "Job cancelled");
                true
            }
            _ => false,
        }
    }

    /// Read-only snapshot of a record's externally visible fields.
    pub fn view(&self, id: &JobId) -> Option<JobStatusView> {
        self.lock().jobs.get(id).map(JobStatusView::from)
    }

    /// Total record count and its partition by state. Every state appears in
    /// the map, zero-count states included.
    pub fn counts(&self) -> (usize, HashMap<JobState, usize>) {
        let inner = self.lock();
        let mut by_state: HashMap<JobState, usize> =
            JobState::all().into_iter().map(|s| (s, 0)).collect();
        for job in inner.jobs.values() {
            *by_state.entry(job.state).or_default() += 1;
        }
        (inner.jobs.len(), by_state)
    }

    /// Maintenance hook: evict terminal records that completed more than
    /// `older_than` ago. Returns the number evicted. Evicted records no
    /// longer appear in statistics or status lookups.
    pub fn sweep_terminal(&self, older_than: Duration) -> usize {
        let cutoff = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let mut inner = self.lock();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            !(job.state.is_terminal() && job.completed_at.is_some_and(|t| t < cutoff))
        });
        let evicted = before - inner.jobs.len();
        if evicted > 0 {
            debug!(evicted, "Swept terminal records");
        }
        evicted
    }

    /// Maintenance hook: re-queue PROCESSING records whose attempt has
    /// outlived its timeout, e.g. records orphaned by an abrupt shutdown.
    /// Re-queuing goes through the normal retry path, so a record with an
    /// exhausted budget becomes FAILED instead. Returns the number touched.
    /// Never runs automatically; a host calls this as a startup
    /// reconciliation pass.
    pub fn requeue_stale(&self) -> usize {
        let now = Utc::now();
        let mut touched = 0;
        {
            let mut inner = self.lock();
            for job in inner.jobs.values_mut() {
                let stale = job.state == JobState::Processing
                    && job.started_at.is_some_and(|t| {
                        now - t > TimeDelta::from_std(job.timeout).unwrap_or(TimeDelta::MAX)
                    });
                if !stale {
                    continue;
                }
                if job.has_retry_budget() {
                    job.retry("stale processing attempt re-queued");
                    warn!(job_id = %job.id, "Stale processing record re-queued");
                } else {
                    job.fail("stale processing attempt with exhausted retry budget");
                    warn!(job_id = %job.id, "Stale processing record failed");
                }
                touched += 1;
            }
        }
        if touched > 0 {
            self.insert_notify.notify_waiters();
        }
        touched
    }
}
