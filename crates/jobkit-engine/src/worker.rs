//! Worker that claims and executes jobs.

use crate::registry::ProcessorRegistry;
use crate::table::{ClaimedJob, JobTable};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One cooperative worker: repeatedly claims the next eligible job and
/// executes its processor under the job's per-attempt deadline.
///
/// Every processor-level failure is converted into job state here; nothing a
/// processor does can crash the worker loop.
pub struct Worker {
    id: String,
    table: Arc<JobTable>,
    registry: Arc<ProcessorRegistry>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        table: Arc<JobTable>,
        registry: Arc<ProcessorRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            table,
            registry,
            poll_interval,
        }
    }

    /// Run the worker loop until `shutdown` fires.
    ///
    /// Shutdown during an idle wait exits promptly. Shutdown during an
    /// execution abandons the attempt and leaves the record PROCESSING;
    /// [`JobTable::requeue_stale`] is the recovery hook for those records.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "Starting worker");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.table.claim_next() {
                Some(job) => {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            warn!(
                                worker_id = %self.id,
                                job_id = %job.id,
                                "Shutdown during execution, abandoning attempt"
                            );
                            break;
                        }
                        _ = self.execute(&job) => {}
                    }
                }
                None => {
                    // Idle: wait for an insert wake-up, the poll interval, or
                    // shutdown, whichever comes first.
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = timeout(self.poll_interval, self.table.notified()) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn execute(&self, job: &ClaimedJob) {
        info!(
            worker_id = %self.id,
            job_id = %job.id,
            job_type = %job.job_type,
            "Claimed job"
        );

        let Some(processor) = self.registry.get(&job.job_type) else {
            // Missing registration is a configuration error; retrying cannot
            // fix it.
            self.table.fail_permanently(
                &job.id,
                &format!("no processor registered for job type '{}'", job.job_type),
            );
            return;
        };

        match timeout(job.timeout, processor.run(job.payload.clone())).await {
            Ok(Ok(result)) => {
                debug!(worker_id = %self.id, job_id = %job.id, "Processor finished");
                self.table.settle_success(&job.id, result);
            }
            Ok(Err(e)) => {
                self.table.settle_failure(&job.id, &e.to_string());
            }
            Err(_) => {
                self.table.settle_failure(
                    &job.id,
                    &format!("timed out after {}s", job.timeout.as_secs()),
                );
            }
        }
    }
}
