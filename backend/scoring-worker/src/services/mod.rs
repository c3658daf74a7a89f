use std::sync::Arc;

use mongodb::{Client as MongoClient, Database};

use crate::config::Config;
use crate::queue::RedisJobQueue;
use crate::storage::MongoTestStorage;

pub mod job_worker;
pub mod percentile_engine;
pub mod scoring_engine;

pub use job_worker::{JobHandler, JobOutcome, JobWorker, WorkerRegistry, WorkerState};
pub use percentile_engine::{PercentileEngine, PercentileRanking};
pub use scoring_engine::{grade_response, ScoringEngine};

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub storage: Arc<MongoTestStorage>,
    /// Absent when no Redis URI is configured; no workers run in that case.
    pub queue: Option<Arc<RedisJobQueue>>,
    pub worker_states: Arc<WorkerRegistry>,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        let storage = Arc::new(MongoTestStorage::new(mongo.clone()));

        let queue = match &config.queue {
            Some(queue_config) => Some(Arc::new(RedisJobQueue::connect(queue_config).await?)),
            None => None,
        };

        Ok(Self {
            config,
            mongo,
            storage,
            queue,
            worker_states: Arc::new(WorkerRegistry::new()),
        })
    }

    /// Scoring and percentile workers bound to the configured queue.
    pub fn workers(&self) -> Vec<JobWorker> {
        let Some(queue) = &self.queue else {
            return Vec::new();
        };

        let scoring = ScoringEngine::new(self.storage.clone(), queue.clone());
        let percentile = PercentileEngine::new(self.storage.clone());

        vec![
            JobWorker::new(
                queue.clone(),
                Arc::new(scoring),
                self.config.scoring.clone(),
                self.config.retry.clone(),
            )
            .with_registry(self.worker_states.clone()),
            JobWorker::new(
                queue.clone(),
                Arc::new(percentile),
                self.config.percentile.clone(),
                self.config.retry.clone(),
            )
            .with_registry(self.worker_states.clone()),
        ]
    }
}
