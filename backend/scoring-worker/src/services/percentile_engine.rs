use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::job_worker::JobHandler;
use crate::{
    errors::JobError,
    metrics::PERCENTILE_POPULATION_SIZE,
    models::{
        jobs::{JobKind, PercentileJob},
        AttemptStatus, AttemptUpdate, TestAttempt,
    },
    storage::TestStorage,
};

/// Sorted snapshot of the submitted scores of one test.
///
/// `percentile_of(s)` is the share of the population scoring strictly below
/// `s`, on a 0-100 scale rounded to two decimals. Ties therefore resolve
/// toward the lower bound and higher scores never rank below lower ones.
#[derive(Debug, Clone)]
pub struct PercentileRanking {
    sorted_scores: Vec<f64>,
}

impl PercentileRanking {
    pub fn new(scores: impl IntoIterator<Item = f64>) -> Self {
        let mut sorted_scores: Vec<f64> = scores.into_iter().filter(|s| !s.is_nan()).collect();
        sorted_scores.sort_by(f64::total_cmp);
        Self { sorted_scores }
    }

    /// Ranks the scored attempts in `attempts`; unscored ones are left out.
    pub fn from_attempts(attempts: &[TestAttempt]) -> Self {
        Self::new(attempts.iter().filter_map(|a| a.score))
    }

    pub fn population(&self) -> usize {
        self.sorted_scores.len()
    }

    pub fn percentile_of(&self, score: f64) -> f64 {
        if self.sorted_scores.is_empty() {
            return 0.0;
        }
        let below = self.sorted_scores.partition_point(|s| *s < score);
        round_2dp(100.0 * below as f64 / self.sorted_scores.len() as f64)
    }
}

fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct PercentileOutcome {
    pub percentile: f64,
    pub population: usize,
    pub updated_attempts: usize,
}

pub struct PercentileEngine {
    storage: Arc<dyn TestStorage>,
}

impl PercentileEngine {
    pub fn new(storage: Arc<dyn TestStorage>) -> Self {
        Self { storage }
    }

    /// Computes the target attempt's percentile, then recomputes and stores
    /// the percentile of every submitted attempt of the test.
    ///
    /// Recomputation starts from scratch each time and never reads previous
    /// percentile values, so concurrent or repeated runs for the same test
    /// converge on the latest population.
    pub async fn rank_attempt(&self, job: &PercentileJob) -> Result<PercentileOutcome, JobError> {
        let attempt = self
            .storage
            .get_test_attempt(&job.attempt_id)
            .await?
            .ok_or_else(|| JobError::AttemptNotFound(job.attempt_id.clone()))?;
        let score = attempt
            .score
            .ok_or_else(|| JobError::AttemptNotScored(attempt.id.clone()))?;

        let snapshot = self.submitted_ranking(&job.test_id).await?;
        let percentile = snapshot.percentile_of(score);
        self.storage
            .update_test_attempt(&attempt.id, AttemptUpdate::percentile(percentile))
            .await?;
        debug!(
            attempt_id = %attempt.id,
            percentile,
            population = snapshot.population(),
            "Target attempt ranked"
        );

        let updated_attempts = self.recompute_all(&job.test_id).await?;

        info!(
            test_id = %job.test_id,
            attempt_id = %attempt.id,
            percentile,
            updated_attempts,
            "Percentiles recomputed"
        );

        Ok(PercentileOutcome {
            percentile,
            population: snapshot.population(),
            updated_attempts,
        })
    }

    /// Re-reads the submitted population and rewrites every percentile.
    pub async fn recompute_all(&self, test_id: &str) -> Result<usize, JobError> {
        let attempts = self
            .storage
            .get_test_attempts_by_test_id(test_id, AttemptStatus::Submitted)
            .await?;
        let ranking = PercentileRanking::from_attempts(&attempts);
        PERCENTILE_POPULATION_SIZE.observe(ranking.population() as f64);

        let mut updated = 0;
        for attempt in &attempts {
            let Some(score) = attempt.score else {
                warn!(
                    attempt_id = %attempt.id,
                    test_id,
                    "Submitted attempt has no score, excluded from ranking"
                );
                continue;
            };
            self.storage
                .update_test_attempt(
                    &attempt.id,
                    AttemptUpdate::percentile(ranking.percentile_of(score)),
                )
                .await?;
            updated += 1;
        }

        Ok(updated)
    }

    async fn submitted_ranking(&self, test_id: &str) -> Result<PercentileRanking, JobError> {
        let attempts = self
            .storage
            .get_test_attempts_by_test_id(test_id, AttemptStatus::Submitted)
            .await?;
        Ok(PercentileRanking::from_attempts(&attempts))
    }
}

#[async_trait]
impl JobHandler for PercentileEngine {
    fn kind(&self) -> JobKind {
        JobKind::Percentile
    }

    async fn handle(&self, payload: &serde_json::Value) -> Result<(), JobError> {
        let job: PercentileJob = serde_json::from_value(payload.clone())?;
        self.rank_attempt(&job).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_strictly_lower_scores() {
        let ranking = PercentileRanking::new([10.0, 20.0, 20.0, 30.0]);
        assert_eq!(ranking.percentile_of(10.0), 0.0);
        assert_eq!(ranking.percentile_of(20.0), 25.0);
        assert_eq!(ranking.percentile_of(30.0), 75.0);
    }

    #[test]
    fn single_attempt_is_zeroth_percentile() {
        let ranking = PercentileRanking::new([42.0]);
        assert_eq!(ranking.percentile_of(42.0), 0.0);
        assert_eq!(PercentileRanking::new(Vec::<f64>::new()).percentile_of(42.0), 0.0);
    }

    #[test]
    fn rounds_to_two_decimals() {
        let ranking = PercentileRanking::new([1.0, 2.0, 3.0]);
        assert_eq!(ranking.percentile_of(2.0), 33.33);
        assert_eq!(ranking.percentile_of(3.0), 66.67);
    }

    #[test]
    fn higher_score_never_ranks_lower() {
        let scores = [5.5, -1.0, 3.0, 3.0, 12.0, 0.0, 7.25, 3.0];
        let ranking = PercentileRanking::new(scores);
        for a in scores {
            for b in scores {
                if a > b {
                    assert!(ranking.percentile_of(a) >= ranking.percentile_of(b));
                }
            }
        }
    }

    #[test]
    fn negative_scores_are_ranked() {
        let ranking = PercentileRanking::new([-2.0, -0.5, 1.0]);
        assert_eq!(ranking.percentile_of(-0.5), 33.33);
    }
}
