use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::{
    config::WorkerSettings,
    errors::{JobError, QueueError},
    metrics::{JOBS_PROCESSED_TOTAL, JOB_DURATION_SECONDS},
    models::jobs::JobKind,
    queue::{Delivery, JobSource},
    utils::retry::RetryPolicy,
};

/// Consumer of one job kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn handle(&self, payload: &serde_json::Value) -> Result<(), JobError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retried,
    DeadLettered,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Retried => "retried",
            JobOutcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Lifecycle of a worker loop as reported on `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    /// Handing abandoned deliveries back to pending; retried until it succeeds.
    Recovering,
    Running,
    Stopped,
}

/// Shared view of every worker loop's state, keyed by job kind.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    states: RwLock<BTreeMap<&'static str, WorkerState>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: JobKind, state: WorkerState) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.as_str(), state);
    }

    pub fn get(&self, kind: JobKind) -> Option<WorkerState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind.as_str())
            .copied()
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, WorkerState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True when every registered worker is processing jobs.
    pub fn all_running(&self) -> bool {
        self.snapshot()
            .values()
            .all(|state| *state == WorkerState::Running)
    }
}

/// Fixed one-second admission window. A limit of zero disables throttling.
struct RateWindow {
    limit: u32,
    started: Instant,
    taken: u32,
}

impl RateWindow {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            started: Instant::now(),
            taken: 0,
        }
    }

    fn remaining(&self) -> Option<u32> {
        (self.limit > 0).then(|| self.limit.saturating_sub(self.taken))
    }

    async fn wait_for_slot(&mut self) {
        let Some(remaining) = self.remaining() else {
            return;
        };
        let elapsed = self.started.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.reset();
        } else if remaining == 0 {
            sleep(Duration::from_secs(1) - elapsed).await;
            self.reset();
        }
    }

    fn record(&mut self) {
        self.taken += 1;
    }

    fn reset(&mut self) {
        self.started = Instant::now();
        self.taken = 0;
    }
}

/// Pulls jobs of the handler's kind and settles each one according to the
/// handler's result: ack on success, dead-letter on permanent failure,
/// delayed redelivery on transient failure until the retry budget runs out.
#[derive(Clone)]
pub struct JobWorker {
    source: Arc<dyn JobSource>,
    handler: Arc<dyn JobHandler>,
    settings: WorkerSettings,
    retry: RetryPolicy,
    registry: Option<Arc<WorkerRegistry>>,
}

impl JobWorker {
    pub fn new(
        source: Arc<dyn JobSource>,
        handler: Arc<dyn JobHandler>,
        settings: WorkerSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            handler,
            settings,
            retry,
            registry: None,
        }
    }

    /// Reports this worker's state into `registry`.
    pub fn with_registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        registry.set(self.kind(), WorkerState::Starting);
        self.registry = Some(registry);
        self
    }

    fn report(&self, state: WorkerState) {
        if let Some(registry) = &self.registry {
            registry.set(self.kind(), state);
        }
    }

    pub fn kind(&self) -> JobKind {
        self.handler.kind()
    }

    /// Runs until the task is dropped. Queue errors never end the loop.
    pub async fn run(self) {
        let kind = self.kind();
        let recovered = self.recover().await;
        self.report(WorkerState::Running);
        info!(
            queue = %kind,
            concurrency = self.settings.concurrency,
            max_jobs_per_second = self.settings.max_jobs_per_second,
            recovered,
            "Starting job worker"
        );

        let permits = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut window = RateWindow::new(self.settings.max_jobs_per_second);

        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            window.wait_for_slot().await;

            match self.source.reserve(kind).await {
                Ok(Some(delivery)) => {
                    window.record();
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.process(delivery).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    sleep(self.settings.poll_interval).await;
                }
                Err(err) => {
                    drop(permit);
                    warn!(queue = %kind, error = %err, "Failed to reserve job");
                    sleep(self.settings.poll_interval).await;
                }
            }
        }

        self.report(WorkerState::Stopped);
        error!(queue = %kind, "Job worker stopped");
    }

    /// Moves abandoned deliveries back to pending, backing off between
    /// failed attempts for as long as the queue is unreachable.
    async fn recover(&self) -> usize {
        let kind = self.kind();
        let mut failures: u32 = 0;
        loop {
            match self.source.recover_in_flight(kind).await {
                Ok(recovered) => return recovered,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    self.report(WorkerState::Recovering);
                    let delay = self.retry.backoff_for(failures);
                    warn!(
                        queue = %kind,
                        failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "Failed to recover in-flight jobs"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Reserves and handles at most one job inline.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, QueueError> {
        match self.source.reserve(self.kind()).await? {
            Some(delivery) => Ok(Some(self.process(delivery).await)),
            None => Ok(None),
        }
    }

    async fn process(&self, delivery: Delivery) -> JobOutcome {
        let envelope = &delivery.envelope;
        let kind = envelope.kind;

        let timer = JOB_DURATION_SECONDS
            .with_label_values(&[kind.as_str()])
            .start_timer();
        let result = self.handler.handle(&envelope.payload).await;
        timer.observe_duration();

        let (outcome, settled) = match result {
            Ok(()) => (JobOutcome::Completed, self.source.ack(&delivery).await),
            Err(err) if err.is_permanent() => {
                error!(
                    queue = %kind,
                    job_id = %envelope.id,
                    key = %envelope.key,
                    error_kind = err.kind(),
                    error = %err,
                    "Job failed permanently, moving to dead letters"
                );
                (
                    JobOutcome::DeadLettered,
                    self.source.dead_letter(&delivery, &err.to_string()).await,
                )
            }
            Err(err) => {
                let failures = envelope.attempt + 1;
                if self.retry.allows_another_attempt(failures) {
                    let delay = self.retry.backoff_for(failures);
                    warn!(
                        queue = %kind,
                        job_id = %envelope.id,
                        key = %envelope.key,
                        failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error_kind = err.kind(),
                        error = %err,
                        "Job failed, scheduling retry"
                    );
                    (
                        JobOutcome::Retried,
                        self.source.retry(&delivery, delay).await,
                    )
                } else {
                    error!(
                        queue = %kind,
                        job_id = %envelope.id,
                        key = %envelope.key,
                        failures,
                        error_kind = err.kind(),
                        error = %err,
                        "Job retries exhausted, moving to dead letters"
                    );
                    let reason = format!("retries exhausted after {} attempts: {}", failures, err);
                    (
                        JobOutcome::DeadLettered,
                        self.source.dead_letter(&delivery, &reason).await,
                    )
                }
            }
        };

        if let Err(err) = settled {
            warn!(
                queue = %kind,
                job_id = %envelope.id,
                error = %err,
                "Failed to settle job, it stays in flight until recovered"
            );
        }

        JOBS_PROCESSED_TOTAL
            .with_label_values(&[kind.as_str(), outcome.as_str()])
            .inc();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_window_counts_admissions() {
        let mut window = RateWindow::new(2);
        assert_eq!(window.remaining(), Some(2));
        window.record();
        window.record();
        assert_eq!(window.remaining(), Some(0));
        window.reset();
        assert_eq!(window.remaining(), Some(2));
    }

    #[tokio::test]
    async fn unlimited_window_never_waits() {
        let mut window = RateWindow::new(0);
        for _ in 0..1000 {
            window.record();
        }
        assert_eq!(window.remaining(), None);
        tokio::time::timeout(Duration::from_millis(50), window.wait_for_slot())
            .await
            .unwrap();
    }

    #[test]
    fn registry_reports_non_running_workers() {
        let registry = WorkerRegistry::new();
        assert!(registry.all_running());

        registry.set(JobKind::TestScoring, WorkerState::Running);
        registry.set(JobKind::Percentile, WorkerState::Recovering);
        assert!(!registry.all_running());
        assert_eq!(
            registry.get(JobKind::Percentile),
            Some(WorkerState::Recovering)
        );

        registry.set(JobKind::Percentile, WorkerState::Running);
        assert!(registry.all_running());
        assert_eq!(registry.snapshot().len(), 2);
    }
}
