use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;

use super::{DeadLetter, Delivery, JobPublisher, JobSource};
use crate::{
    config::QueueConfig,
    errors::QueueError,
    metrics::JOBS_PUBLISHED_TOTAL,
    models::jobs::{Job, JobEnvelope, JobKind},
    utils::retry::{retry_async_with_policy, RetryPolicy},
};

/// Jobs promoted from the delayed set per reserve call.
const PROMOTE_BATCH: usize = 100;

const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, job in ipairs(due) do
    redis.call('ZREM', KEYS[1], job)
    redis.call('RPUSH', KEYS[2], job)
end
return #due
"#;

/// Redis-backed durable queue. Per job kind it keeps a pending list, an
/// in-flight list, a delayed sorted set (score = ready-at millis) and a
/// dead-letter list.
#[derive(Clone)]
pub struct RedisJobQueue {
    redis: ConnectionManager,
    prefix: String,
    promote_due: Script,
}

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            promote_due: Script::new(PROMOTE_DUE_SCRIPT),
        }
    }

    pub async fn connect(config: &QueueConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.redis_uri.clone())?;

        tracing::info!("Attempting to connect to Redis job queue...");

        let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let queue = Self::new(redis, config.key_prefix.clone());
        tokio::time::timeout(Duration::from_secs(5), queue.ping())
            .await
            .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!(prefix = %queue.prefix, "Redis job queue connected");
        Ok(queue)
    }

    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn key(&self, kind: JobKind, list: &str) -> String {
        queue_key(&self.prefix, kind, list)
    }

    /// Drops `raw` from the in-flight list and appends `entry` to the dead
    /// list in one transaction.
    async fn move_to_dead(
        &self,
        kind: JobKind,
        raw: &str,
        entry: &str,
    ) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.key(kind, "processing"))
            .arg(1)
            .arg(raw)
            .ignore()
            .cmd("RPUSH")
            .arg(self.key(kind, "dead"))
            .arg(entry)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn promote_due(&self, kind: JobKind) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let promoted: usize = self
            .promote_due
            .key(self.key(kind, "delayed"))
            .key(self.key(kind, "pending"))
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }
}

pub(crate) fn queue_key(prefix: &str, kind: JobKind, list: &str) -> String {
    format!("{}:{}:{}", prefix, kind.as_str(), list)
}

#[async_trait]
impl JobPublisher for RedisJobQueue {
    async fn publish(&self, job: Job) -> Result<(), QueueError> {
        self.publish_all(vec![job]).await
    }

    /// All jobs go out in one MULTI/EXEC pipeline.
    async fn publish_all(&self, jobs: Vec<Job>) -> Result<(), QueueError> {
        let mut envelopes = Vec::with_capacity(jobs.len());
        let mut pipe = redis::pipe();
        pipe.atomic();
        for job in &jobs {
            let envelope = JobEnvelope::new(job)?;
            pipe.cmd("RPUSH")
                .arg(self.key(envelope.kind, "pending"))
                .arg(serde_json::to_string(&envelope)?)
                .ignore();
            envelopes.push(envelope);
        }

        let pipe = &pipe;
        retry_async_with_policy(&RetryPolicy::for_queue_operations(), move || async move {
            let mut conn = self.redis.clone();
            pipe.query_async::<()>(&mut conn).await
        })
        .await?;

        for envelope in &envelopes {
            JOBS_PUBLISHED_TOTAL
                .with_label_values(&[envelope.kind.as_str()])
                .inc();
            tracing::debug!(
                queue = %envelope.kind,
                job_id = %envelope.id,
                key = %envelope.key,
                "Job published"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl JobSource for RedisJobQueue {
    async fn reserve(&self, kind: JobKind) -> Result<Option<Delivery>, QueueError> {
        let promoted = self.promote_due(kind).await?;
        if promoted > 0 {
            tracing::debug!(queue = %kind, promoted, "Promoted delayed jobs");
        }

        let mut conn = self.redis.clone();
        loop {
            let raw: Option<String> = redis::cmd("LMOVE")
                .arg(self.key(kind, "pending"))
                .arg(self.key(kind, "processing"))
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            let Some(raw) = raw else {
                return Ok(None);
            };

            match Delivery::from_raw(raw.clone()) {
                Ok(delivery) => return Ok(Some(delivery)),
                Err(err) => {
                    tracing::error!(
                        queue = %kind,
                        error = %err,
                        "Unreadable job entry, moving to dead letters"
                    );
                    let dead = DeadLetter::unreadable(raw.clone(), &err);
                    let entry = serde_json::to_string(&dead)?;
                    self.move_to_dead(kind, &raw, &entry).await?;
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::cmd("LREM")
            .arg(self.key(delivery.envelope.kind, "processing"))
            .arg(1)
            .arg(&delivery.raw)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        let kind = delivery.envelope.kind;
        let next = serde_json::to_string(&delivery.envelope.next_attempt())?;
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let mut conn = self.redis.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.key(kind, "processing"))
            .arg(1)
            .arg(&delivery.raw)
            .ignore()
            .cmd("ZADD")
            .arg(self.key(kind, "delayed"))
            .arg(ready_at)
            .arg(&next)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let entry = serde_json::to_string(&DeadLetter::for_delivery(delivery, reason))?;
        self.move_to_dead(delivery.envelope.kind, &delivery.raw, &entry)
            .await
    }

    async fn recover_in_flight(&self, kind: JobKind) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;
        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(self.key(kind, "processing"))
                .arg(self.key(kind, "pending"))
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn depth(&self, kind: JobKind) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let length: usize = redis::cmd("LLEN")
            .arg(self.key(kind, "pending"))
            .query_async(&mut conn)
            .await?;
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_kind() {
        assert_eq!(
            queue_key("exam-jobs", JobKind::TestScoring, "pending"),
            "exam-jobs:test-scoring:pending"
        );
        assert_eq!(
            queue_key("exam-jobs", JobKind::AnalyticsUpdate, "dead"),
            "exam-jobs:analytics-update:dead"
        );
    }
}
