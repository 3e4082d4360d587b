//! The lifecycle controller: submission, status, cancellation, statistics,
//! and worker-pool start/stop.

use crate::config::EngineConfig;
use crate::registry::ProcessorRegistry;
use crate::table::{JobTable, NewJob};
use crate::worker::Worker;
use jobkit_core::{
    Error, FnProcessor, JobId, JobState, JobStatusView, Payload, Priority, Processor, Result,
};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Per-submission overrides. Unset fields fall back to the engine defaults
/// (priority NORMAL, retries and timeout from [`EngineConfig`]).
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub priority: Option<Priority>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

/// Point-in-time engine statistics. `by_state` partitions `total` across all
/// reachable states.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total: usize,
    pub by_state: HashMap<JobState, usize>,
    pub workers_running: usize,
}

struct WorkerPool {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

/// The job engine: an explicitly constructed object, not a process-wide
/// singleton, so several engines can coexist (e.g. in tests).
///
/// Hosts register processors, start the pool, and interact through `submit`,
/// `status`, `cancel`, and `statistics`. The job table is volatile:
/// nothing survives a process restart.
pub struct JobEngine {
    config: EngineConfig,
    table: Arc<JobTable>,
    registry: Arc<ProcessorRegistry>,
    pool: Mutex<Option<WorkerPool>>,
}

impl Default for JobEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl JobEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            table: Arc::new(JobTable::new()),
            registry: Arc::new(ProcessorRegistry::new()),
            pool: Mutex::new(None),
        }
    }

    /// Register (or replace) the processor for a job type. Safe while the
    /// pool is running, but a type should be registered before jobs of that
    /// type are submitted.
    pub fn register_processor(&self, job_type: impl Into<String>, processor: Arc<dyn Processor>) {
        self.registry.register(job_type, processor);
    }

    /// Convenience wrapper registering a plain async function as a processor.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, f: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload>> + Send + 'static,
    {
        self.register_processor(job_type, Arc::new(FnProcessor::new(f)));
    }

    /// Start the worker pool with the configured worker count.
    pub async fn start(&self) -> Result<()> {
        self.start_with(self.config.workers).await
    }

    /// Start `worker_count` workers. Logged no-op if already running.
    pub async fn start_with(&self, worker_count: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(Error::InvalidInput(
                "worker_count must be at least 1".to_string(),
            ));
        }

        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            warn!("Worker pool already running, ignoring start request");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = (0..worker_count)
            .map(|i| {
                let worker = Worker::new(
                    format!("worker-{i}"),
                    self.table.clone(),
                    self.registry.clone(),
                    self.config.poll_interval,
                );
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { worker.run(shutdown).await })
            })
            .collect();

        info!(workers = worker_count, "Worker pool started");
        *pool = Some(WorkerPool {
            shutdown: shutdown_tx,
            workers,
        });
        Ok(())
    }

    /// Signal all workers to exit their loop and await their completion.
    /// Idempotent. Jobs in flight at shutdown are abandoned mid-attempt and
    /// left PROCESSING; see [`JobEngine::requeue_stale`].
    pub async fn stop(&self) {
        let mut pool = self.pool.lock().await;
        let Some(WorkerPool { shutdown, workers }) = pool.take() else {
            return;
        };
        let _ = shutdown.send(true);
        let _ = futures::future::join_all(workers).await;
        info!("Worker pool stopped");
    }

    /// Submit a job with default options; returns immediately with its id.
    pub fn submit(&self, job_type: impl Into<String>, payload: Payload) -> Result<JobId> {
        self.submit_with(job_type, payload, SubmitOptions::default())
    }

    /// Submit a job with per-submission overrides.
    ///
    /// In strict-registration mode a job type with no registered processor is
    /// rejected here; otherwise it is accepted and fails lazily when a worker
    /// picks it up.
    pub fn submit_with(
        &self,
        job_type: impl Into<String>,
        payload: Payload,
        opts: SubmitOptions,
    ) -> Result<JobId> {
        let job_type = job_type.into();
        if self.config.strict_registration && !self.registry.contains(&job_type) {
            return Err(Error::UnknownJobType(job_type));
        }
        let id = self.table.insert(NewJob {
            job_type,
            payload,
            priority: opts.priority.unwrap_or_default(),
            max_retries: opts.max_retries.unwrap_or(self.config.default_max_retries),
            timeout: opts.timeout.unwrap_or(self.config.default_timeout),
        });
        Ok(id)
    }

    /// Read-only snapshot of a job's externally visible state; `None` for an
    /// unknown id.
    pub fn status(&self, id: &JobId) -> Option<JobStatusView> {
        self.table.view(id)
    }

    /// Cancel a job that has not yet reached a terminal state. Returns false
    /// for unknown ids and jobs already terminal.
    ///
    /// Cancelling a PROCESSING job is advisory: the running attempt is not
    /// interrupted, but its outcome is discarded and the job is never
    /// re-queued.
    pub fn cancel(&self, id: &JobId) -> bool {
        self.table.cancel(id)
    }

    pub async fn statistics(&self) -> EngineStats {
        let (total, by_state) = self.table.counts();
        let workers_running = self.pool.lock().await.as_ref().map_or(0, |p| p.workers.len());
        EngineStats {
            total,
            by_state,
            workers_running,
        }
    }

    /// Maintenance hook: evict terminal records older than `older_than`.
    pub fn sweep_terminal(&self, older_than: Duration) -> usize {
        self.table.sweep_terminal(older_than)
    }

    /// Maintenance hook: re-queue PROCESSING records whose attempt outlived
    /// its timeout (startup reconciliation after an abrupt stop).
    pub fn requeue_stale(&self) -> usize {
        self.table.requeue_stale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    fn payload_with_name(name: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("name".to_string(), json!(name));
        payload
    }

    fn name_of(payload: &Payload) -> String {
        payload["name"].as_str().unwrap_or_default().to_string()
    }

    /// Poll until `f` returns true, advancing virtual time while paused.
    async fn wait_until(mut f: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if f() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn wait_for_state(engine: &JobEngine, id: &JobId, state: JobState) {
        wait_until(|| engine.status(id).is_some_and(|v| v.state == state)).await;
    }

    #[tokio::test]
    async fn test_submit_then_status_round_trip() {
        let engine = JobEngine::default();
        let id = engine
            .submit("bulk-import", payload_with_name("only"))
            .unwrap();

        let view = engine.status(&id).unwrap();
        assert_eq!(view.state, JobState::Pending);
        assert_eq!(view.job_type, "bulk-import");
        assert_eq!(view.priority, Priority::Normal);
        assert_eq!(view.max_retries, 3);
        assert!(view.started_at.is_none());
        assert!(view.completed_at.is_none());
        assert!(view.result.is_none());

        assert!(engine.status(&JobId::from_string("nope")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_worker_runs_priority_then_age_order() {
        let engine = JobEngine::default();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let seen = order.clone();
        engine.register_fn("ordered", move |payload: Payload| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(name_of(&payload));
                Ok(Payload::new())
            }
        });

        let opts = |priority| SubmitOptions {
            priority: Some(priority),
            ..Default::default()
        };
        let a = engine
            .submit_with("ordered", payload_with_name("a"), opts(Priority::Low))
            .unwrap();
        let _b = engine
            .submit_with("ordered", payload_with_name("b"), opts(Priority::Urgent))
            .unwrap();
        let _c = engine
            .submit_with("ordered", payload_with_name("c"), opts(Priority::Urgent))
            .unwrap();

        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &a, JobState::Completed).await;
        engine.stop().await;

        assert_eq!(*order.lock().unwrap(), vec!["b", "c", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_is_claimed_exactly_once() {
        let engine = JobEngine::default();
        let invocations = Arc::new(StdMutex::new(HashMap::<String, u32>::new()));
        let counts = invocations.clone();
        engine.register_fn("counted", move |payload: Payload| {
            let counts = counts.clone();
            async move {
                *counts.lock().unwrap().entry(name_of(&payload)).or_default() += 1;
                // Hold the attempt open so other workers are polling while
                // this job is in flight.
                sleep(Duration::from_millis(50)).await;
                Ok(Payload::new())
            }
        });

        let ids: Vec<_> = (0..6)
            .map(|i| {
                engine
                    .submit("counted", payload_with_name(&format!("job-{i}")))
                    .unwrap()
            })
            .collect();

        engine.start_with(4).await.unwrap();
        for id in &ids {
            wait_for_state(&engine, id, JobState::Completed).await;
        }
        engine.stop().await;

        let invocations = invocations.lock().unwrap();
        assert_eq!(invocations.len(), 6);
        for (name, count) in invocations.iter() {
            assert_eq!(*count, 1, "{name} was claimed more than once");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_keeps_original_queue_position() {
        let engine = JobEngine::default();
        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let b_failures = Arc::new(AtomicU32::new(0));

        let seen = attempts.clone();
        let failures = b_failures.clone();
        engine.register_fn("flaky", move |payload: Payload| {
            let seen = seen.clone();
            let failures = failures.clone();
            async move {
                let name = name_of(&payload);
                seen.lock().unwrap().push(name.clone());
                if name == "b" && failures.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(Error::ProcessorFailed("transient".to_string()));
                }
                Ok(Payload::new())
            }
        });

        let opts = |priority| SubmitOptions {
            priority: Some(priority),
            ..Default::default()
        };
        let a = engine
            .submit_with("flaky", payload_with_name("a"), opts(Priority::Low))
            .unwrap();
        let b = engine
            .submit_with("flaky", payload_with_name("b"), opts(Priority::Urgent))
            .unwrap();
        let _c = engine
            .submit_with("flaky", payload_with_name("c"), opts(Priority::Urgent))
            .unwrap();
        let created_b = engine.status(&b).unwrap().created_at;

        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &a, JobState::Completed).await;
        engine.stop().await;

        // b's failed attempt does not push it behind its same-priority peer.
        assert_eq!(*attempts.lock().unwrap(), vec!["b", "b", "c", "a"]);
        assert_eq!(engine.status(&b).unwrap().created_at, created_b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_gives_exactly_one_plus_max_retries_attempts() {
        let engine = JobEngine::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        engine.register_fn("doomed", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProcessorFailed("always fails".to_string()))
            }
        });

        let id = engine
            .submit_with(
                "doomed",
                Payload::new(),
                SubmitOptions {
                    max_retries: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();

        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &id, JobState::Failed).await;
        engine.stop().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let view = engine.status(&id).unwrap();
        assert_eq!(view.retry_count, 2);
        assert!(view.last_error.as_deref().unwrap().contains("always fails"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_follows_the_retry_fail_path() {
        let engine = JobEngine::default();
        engine.register_fn("hung", |_| async {
            std::future::pending::<Result<Payload>>().await
        });

        let id = engine
            .submit_with(
                "hung",
                Payload::new(),
                SubmitOptions {
                    timeout: Some(Duration::from_secs(1)),
                    max_retries: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();

        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &id, JobState::Failed).await;
        engine.stop().await;

        let view = engine.status(&id).unwrap();
        assert_eq!(view.last_error.as_deref(), Some("timed out after 1s"));
        assert_eq!(view.retry_count, 0);
    }

    #[tokio::test]
    async fn test_cancellation_idempotence() {
        let engine = JobEngine::default();
        let id = engine.submit("never-run", Payload::new()).unwrap();

        assert!(engine.cancel(&id));
        assert!(!engine.cancel(&id));
        assert_eq!(engine.status(&id).unwrap().state, JobState::Cancelled);
        assert!(!engine.cancel(&JobId::from_string("unknown")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelling_a_processing_job_is_advisory() {
        let engine = JobEngine::default();
        engine.register_fn("slow", |_| async {
            sleep(Duration::from_secs(5)).await;
            Ok(Payload::new())
        });

        let id = engine.submit("slow", Payload::new()).unwrap();
        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &id, JobState::Processing).await;

        assert!(engine.cancel(&id));
        assert_eq!(engine.status(&id).unwrap().state, JobState::Cancelled);

        // Let the in-flight attempt run to completion; its result is dropped
        // and the job is not re-queued.
        sleep(Duration::from_secs(10)).await;
        engine.stop().await;

        let view = engine.status(&id).unwrap();
        assert_eq!(view.state, JobState::Cancelled);
        assert!(view.result.is_none());
        let stats = engine.statistics().await;
        assert_eq!(stats.by_state[&JobState::Pending], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelling_a_completed_job_returns_false() {
        let engine = JobEngine::default();
        engine.register_fn("quick", |_| async { Ok(Payload::new()) });

        let id = engine.submit("quick", Payload::new()).unwrap();
        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &id, JobState::Completed).await;
        engine.stop().await;

        assert!(!engine.cancel(&id));
        assert_eq!(engine.status(&id).unwrap().state, JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_processor_fails_permanently() {
        let engine = JobEngine::default();
        let id = engine.submit("unregistered", Payload::new()).unwrap();

        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &id, JobState::Failed).await;
        engine.stop().await;

        let view = engine.status(&id).unwrap();
        // A configuration error consumes no retry budget.
        assert_eq!(view.retry_count, 0);
        assert!(
            view.last_error
                .as_deref()
                .unwrap()
                .contains("no processor registered")
        );
    }

    #[tokio::test]
    async fn test_strict_registration_rejects_unknown_types() {
        let engine = JobEngine::new(EngineConfig {
            strict_registration: true,
            ..Default::default()
        });
        engine.register_fn("known", |_| async { Ok(Payload::new()) });

        assert!(engine.submit("known", Payload::new()).is_ok());
        let err = engine.submit("unknown", Payload::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownJobType(t) if t == "unknown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_statistics_partition_the_total() {
        let engine = JobEngine::default();
        engine.register_fn("quick", |_| async { Ok(Payload::new()) });

        let done = engine.submit("quick", Payload::new()).unwrap();
        let cancelled = engine.submit("quick", Payload::new()).unwrap();
        engine.cancel(&cancelled);

        engine.start_with(2).await.unwrap();
        wait_for_state(&engine, &done, JobState::Completed).await;

        let stats = engine.statistics().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_state.values().sum::<usize>(), stats.total);
        assert_eq!(stats.workers_running, 2);

        engine.stop().await;
        assert_eq!(engine.statistics().await.workers_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let engine = JobEngine::default();
        assert!(matches!(
            engine.start_with(0).await,
            Err(Error::InvalidInput(_))
        ));

        engine.start_with(2).await.unwrap();
        // Second start is a logged no-op; the pool keeps its two workers.
        engine.start_with(5).await.unwrap();
        assert_eq!(engine.statistics().await.workers_running, 2);

        engine.stop().await;
        engine.stop().await;
        assert_eq!(engine.statistics().await.workers_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_in_flight_attempt() {
        let engine = JobEngine::default();
        engine.register_fn("hung", |_| async {
            std::future::pending::<Result<Payload>>().await
        });

        let id = engine
            .submit_with(
                "hung",
                Payload::new(),
                SubmitOptions {
                    timeout: Some(Duration::from_millis(100)),
                    ..Default::default()
                },
            )
            .unwrap();

        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &id, JobState::Processing).await;
        engine.stop().await;

        // The abandoned attempt is left PROCESSING; reconciliation re-queues
        // it once its deadline has passed. Staleness is judged against the
        // wall clock, so wait out the deadline for real.
        assert_eq!(engine.status(&id).unwrap().state, JobState::Processing);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(engine.requeue_stale(), 1);
        assert_eq!(engine.status(&id).unwrap().state, JobState::Pending);
    }

    struct EchoProcessor;

    #[async_trait]
    impl Processor for EchoProcessor {
        async fn run(&self, payload: Payload) -> Result<Payload> {
            let mut result = Payload::new();
            result.insert("echo".to_string(), Value::Object(payload));
            Ok(result)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_payload_is_stored_on_success() {
        let engine = JobEngine::default();
        engine.register_processor("echo", Arc::new(EchoProcessor));

        let id = engine.submit("echo", payload_with_name("hello")).unwrap();
        engine.start_with(1).await.unwrap();
        wait_for_state(&engine, &id, JobState::Completed).await;
        engine.stop().await;

        let view = engine.status(&id).unwrap();
        let result = view.result.unwrap();
        assert_eq!(result["echo"]["name"], json!("hello"));
        assert!(view.started_at.is_some());
        assert!(view.completed_at.is_some());
    }
}
