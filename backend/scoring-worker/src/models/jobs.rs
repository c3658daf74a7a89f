use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "test-scoring")]
    TestScoring,
    #[serde(rename = "percentile")]
    Percentile,
    #[serde(rename = "analytics-update")]
    AnalyticsUpdate,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::TestScoring,
        JobKind::Percentile,
        JobKind::AnalyticsUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::TestScoring => "test-scoring",
            JobKind::Percentile => "percentile",
            JobKind::AnalyticsUpdate => "analytics-update",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringJob {
    pub attempt_id: String,
    pub test_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileJob {
    pub test_id: String,
    pub attempt_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsUpdateJob {
    pub user_id: String,
    pub test_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    TestScoring(ScoringJob),
    Percentile(PercentileJob),
    AnalyticsUpdate(AnalyticsUpdateJob),
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::TestScoring(_) => JobKind::TestScoring,
            Job::Percentile(_) => JobKind::Percentile,
            Job::AnalyticsUpdate(_) => JobKind::AnalyticsUpdate,
        }
    }

    /// Logical key of the job, used for log correlation.
    pub fn key(&self) -> String {
        match self {
            Job::TestScoring(job) => format!("{}:{}:{}", self.kind(), job.test_id, job.attempt_id),
            Job::Percentile(job) => format!("{}:{}:{}", self.kind(), job.test_id, job.attempt_id),
            Job::AnalyticsUpdate(job) => format!("{}:{}:{}", self.kind(), job.test_id, job.user_id),
        }
    }

    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Job::TestScoring(job) => serde_json::to_value(job),
            Job::Percentile(job) => serde_json::to_value(job),
            Job::AnalyticsUpdate(job) => serde_json::to_value(job),
        }
    }
}

/// What actually travels through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: String,
    pub kind: JobKind,
    pub key: String,
    pub payload: serde_json::Value,
    /// Number of failed deliveries so far.
    #[serde(default)]
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(job: &Job) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            kind: job.kind(),
            key: job.key(),
            payload: job.payload()?,
            attempt: 0,
            enqueued_at: Utc::now(),
        })
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_payload_uses_camel_case_keys() {
        let job = Job::TestScoring(ScoringJob {
            attempt_id: "a1".into(),
            test_id: "t1".into(),
            user_id: "u1".into(),
        });
        let payload = job.payload().unwrap();
        assert_eq!(
            payload,
            serde_json::json!({ "attemptId": "a1", "testId": "t1", "userId": "u1" })
        );
        assert_eq!(job.key(), "test-scoring:t1:a1");
    }

    #[test]
    fn job_kind_wire_names() {
        for kind in JobKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn envelope_retry_keeps_identity() {
        let job = Job::Percentile(PercentileJob {
            test_id: "t1".into(),
            attempt_id: "a1".into(),
        });
        let envelope = JobEnvelope::new(&job).unwrap();
        let retried = envelope.next_attempt();

        assert_eq!(retried.id, envelope.id);
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.kind, JobKind::Percentile);
    }
}
