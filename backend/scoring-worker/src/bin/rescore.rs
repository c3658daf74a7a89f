use anyhow::{bail, Context};
use tracing_subscriber::fmt::init;

use exam_scoring::{
    config::Config,
    models::jobs::{Job, ScoringJob},
    queue::{JobPublisher, RedisJobQueue},
};

/// Enqueues a scoring job for one attempt.
///
/// Usage: `rescore <test_id> <attempt_id> <user_id>`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [test_id, attempt_id, user_id] = args.as_slice() else {
        bail!("usage: rescore <test_id> <attempt_id> <user_id>");
    };

    let config = Config::load().context("Failed to load configuration")?;
    let Some(queue_config) = config.queue.as_ref() else {
        bail!("REDIS_URI is not set, cannot enqueue scoring jobs");
    };

    let queue = RedisJobQueue::connect(queue_config).await?;
    let job = Job::TestScoring(ScoringJob {
        attempt_id: attempt_id.clone(),
        test_id: test_id.clone(),
        user_id: user_id.clone(),
    });
    let key = job.key();

    queue.publish(job).await.context("Failed to enqueue scoring job")?;
    tracing::info!(%key, "Scoring job enqueued");

    Ok(())
}
