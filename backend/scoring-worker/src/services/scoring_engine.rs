use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::job_worker::JobHandler;
use crate::{
    errors::JobError,
    metrics::{ORPHANED_RESPONSES_TOTAL, RESPONSES_GRADED_TOTAL},
    models::{
        jobs::{AnalyticsUpdateJob, Job, JobKind, PercentileJob, ScoringJob},
        AttemptStats, AttemptSummary, AttemptUpdate, Question, QuestionType, ResponseGrade,
        SectionSummary, TestResponse, TestSection,
    },
    queue::JobPublisher,
    storage::TestStorage,
};

/// Grades one response against its question.
///
/// Pure function of its inputs: blank answers score zero, numerical answers
/// are compared as exact strings, and multi-select answers must match the
/// correct option set exactly (order-insensitive, no partial credit).
pub fn grade_response(question: &Question, selected_answer: Option<&str>) -> ResponseGrade {
    let Some(answer) = selected_answer.filter(|a| !a.trim().is_empty()) else {
        return ResponseGrade::UNANSWERED;
    };

    if is_correct(question, answer) {
        ResponseGrade {
            is_correct: true,
            marks_awarded: question.marks,
        }
    } else {
        ResponseGrade {
            is_correct: false,
            marks_awarded: -question.negative_marks,
        }
    }
}

fn is_correct(question: &Question, answer: &str) -> bool {
    match question.question_type {
        // TODO: numeric tolerance ("3.0" vs "3") is pending a product decision
        QuestionType::Numerical => question.correct_answer.as_deref() == Some(answer),
        QuestionType::McqSingle => single_correct_option(question) == Some(answer),
        QuestionType::McqMultiple => {
            let correct = canonical_option_set(
                question
                    .options
                    .iter()
                    .filter(|o| o.is_correct)
                    .map(|o| o.id.as_str()),
            );
            !correct.is_empty() && canonical_option_set(answer.split(',')) == correct
        }
    }
}

/// Id of the one option flagged correct; ambiguous keys never match.
fn single_correct_option(question: &Question) -> Option<&str> {
    let mut correct = question.options.iter().filter(|o| o.is_correct);
    match (correct.next(), correct.next()) {
        (Some(option), None) => Some(option.id.as_str()),
        _ => None,
    }
}

/// Sorted, comma-joined ids with empty tokens dropped.
fn canonical_option_set<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    let mut ids: Vec<&str> = ids.filter(|id| !id.is_empty()).collect();
    ids.sort_unstable();
    ids.join(",")
}

/// Accumulates overall and per-section statistics while responses are graded.
struct SummaryBuilder {
    overall: AttemptStats,
    sections: Vec<SectionSummary>,
    index: HashMap<String, usize>,
}

impl SummaryBuilder {
    fn new(questions: &[Question], sections: &[TestSection]) -> Self {
        let mut per_section: HashMap<&str, u32> = HashMap::new();
        for section_id in questions.iter().filter_map(|q| q.section_id.as_deref()) {
            *per_section.entry(section_id).or_default() += 1;
        }

        let mut builder = Self {
            overall: AttemptStats::with_total(questions.len() as u32),
            sections: Vec::new(),
            index: HashMap::new(),
        };

        for section in sections {
            let total = per_section.get(section.id.as_str()).copied().unwrap_or(0);
            builder.add_section(&section.id, &section.name, total);
        }
        // Sections referenced by questions but missing from the section list.
        for section_id in questions.iter().filter_map(|q| q.section_id.as_deref()) {
            if !builder.index.contains_key(section_id) {
                let total = per_section.get(section_id).copied().unwrap_or(0);
                builder.add_section(section_id, section_id, total);
            }
        }

        builder
    }

    fn add_section(&mut self, id: &str, name: &str, total_questions: u32) {
        self.index.insert(id.to_string(), self.sections.len());
        self.sections.push(SectionSummary {
            section_id: id.to_string(),
            name: name.to_string(),
            stats: AttemptStats::with_total(total_questions),
        });
    }

    fn record(&mut self, question: &Question, response: &TestResponse, grade: &ResponseGrade) {
        let answered = response.answer().is_some();
        let apply = |stats: &mut AttemptStats| {
            stats.record(
                answered,
                response.is_visited,
                response.is_marked_for_review,
                grade.is_correct,
                grade.marks_awarded,
                response.time_spent_seconds,
            )
        };

        apply(&mut self.overall);
        if let Some(idx) = question
            .section_id
            .as_deref()
            .and_then(|id| self.index.get(id))
        {
            apply(&mut self.sections[*idx].stats);
        }
    }

    fn finish(mut self) -> AttemptSummary {
        self.overall.close();
        for section in &mut self.sections {
            section.stats.close();
        }
        AttemptSummary {
            overall: self.overall,
            sections: self.sections,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringOutcome {
    pub score: f64,
    pub max_score: f64,
    pub summary: AttemptSummary,
    pub orphaned_responses: usize,
}

pub struct ScoringEngine {
    storage: Arc<dyn TestStorage>,
    publisher: Arc<dyn JobPublisher>,
}

impl ScoringEngine {
    pub fn new(storage: Arc<dyn TestStorage>, publisher: Arc<dyn JobPublisher>) -> Self {
        Self { storage, publisher }
    }

    /// Grades every response of the attempt, marks the attempt submitted and
    /// schedules the analytics and percentile follow-ups.
    ///
    /// Each response grade is written as soon as it is computed. The attempt
    /// itself is only touched after all responses succeeded, so a failed run
    /// never leaves it `submitted`. Both follow-up jobs are enqueued in one
    /// batch; if that fails the job is retried and the attempt is graded
    /// again with the same result.
    pub async fn score_attempt(&self, job: &ScoringJob) -> Result<ScoringOutcome, JobError> {
        let test = self
            .storage
            .get_test(&job.test_id)
            .await?
            .ok_or_else(|| JobError::TestNotFound(job.test_id.clone()))?;

        let (questions, responses, sections) = tokio::try_join!(
            self.storage.get_test_questions(&job.test_id),
            self.storage.get_test_attempt_responses(&job.attempt_id),
            self.storage.get_test_sections(&job.test_id),
        )?;

        let by_id: HashMap<&str, &Question> =
            questions.iter().map(|q| (q.id.as_str(), q)).collect();
        let mut summary = SummaryBuilder::new(&questions, &sections);
        let mut total_score = 0.0;
        let mut orphaned = 0;

        for response in &responses {
            let Some(question) = by_id.get(response.question_id.as_str()) else {
                orphaned += 1;
                ORPHANED_RESPONSES_TOTAL.inc();
                warn!(
                    attempt_id = %job.attempt_id,
                    response_id = %response.id,
                    question_id = %response.question_id,
                    "Response references a question outside the test, skipping"
                );
                continue;
            };

            let grade = grade_response(question, response.selected_answer.as_deref());
            self.storage.update_test_response(&response.id, grade).await?;

            RESPONSES_GRADED_TOTAL
                .with_label_values(&[question.question_type.as_str(), grade_label(response, &grade)])
                .inc();

            total_score += grade.marks_awarded;
            summary.record(question, response, &grade);
        }

        let summary = summary.finish();
        self.storage
            .update_test_attempt(
                &job.attempt_id,
                AttemptUpdate::scored(total_score, test.total_marks, summary.clone()),
            )
            .await?;

        self.publisher
            .publish_all(vec![
                Job::AnalyticsUpdate(AnalyticsUpdateJob {
                    user_id: job.user_id.clone(),
                    test_id: job.test_id.clone(),
                }),
                Job::Percentile(PercentileJob {
                    test_id: job.test_id.clone(),
                    attempt_id: job.attempt_id.clone(),
                }),
            ])
            .await?;

        info!(
            attempt_id = %job.attempt_id,
            test_id = %job.test_id,
            score = total_score,
            max_score = test.total_marks,
            responses = responses.len(),
            "Attempt scored"
        );

        Ok(ScoringOutcome {
            score: total_score,
            max_score: test.total_marks,
            summary,
            orphaned_responses: orphaned,
        })
    }
}

fn grade_label(response: &TestResponse, grade: &ResponseGrade) -> &'static str {
    if response.answer().is_none() {
        "unanswered"
    } else if grade.is_correct {
        "correct"
    } else {
        "incorrect"
    }
}

#[async_trait]
impl JobHandler for ScoringEngine {
    fn kind(&self) -> JobKind {
        JobKind::TestScoring
    }

    async fn handle(&self, payload: &serde_json::Value) -> Result<(), JobError> {
        let job: ScoringJob = serde_json::from_value(payload.clone())?;
        self.score_attempt(&job).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::QueueError;
    use crate::models::QuestionOption;
    use crate::queue::MockJobPublisher;

    fn option(id: &str, is_correct: bool) -> QuestionOption {
        QuestionOption {
            id: id.into(),
            text: format!("Option {}", id),
            is_correct,
        }
    }

    fn question(question_type: QuestionType, marks: f64, negative_marks: f64) -> Question {
        Question {
            id: "q1".into(),
            test_id: "t1".into(),
            question_type,
            options: Vec::new(),
            correct_answer: None,
            marks,
            negative_marks,
            section_id: None,
            position: 0,
        }
    }

    fn numerical(correct: &str) -> Question {
        Question {
            correct_answer: Some(correct.into()),
            ..question(QuestionType::Numerical, 2.0, 0.5)
        }
    }

    fn multiple(correct: &[&str]) -> Question {
        Question {
            options: ["A", "B", "C", "D"]
                .iter()
                .map(|id| option(id, correct.contains(id)))
                .collect(),
            ..question(QuestionType::McqMultiple, 4.0, 1.0)
        }
    }

    #[test]
    fn numerical_requires_exact_string() {
        let q = numerical("42");
        assert!(grade_response(&q, Some("42")).is_correct);
        assert!(!grade_response(&q, Some("42.0")).is_correct);
        assert!(!grade_response(&q, Some(" 42")).is_correct);
    }

    #[test]
    fn multiple_choice_is_order_independent_set_match() {
        let q = multiple(&["A", "C"]);
        assert!(grade_response(&q, Some("C,A")).is_correct);
        assert!(grade_response(&q, Some("A,C,")).is_correct);
        assert!(!grade_response(&q, Some("A")).is_correct);
        assert!(!grade_response(&q, Some("A,B,C")).is_correct);
    }

    #[test]
    fn multiple_choice_without_key_never_matches() {
        let q = multiple(&[]);
        assert!(!grade_response(&q, Some(",")).is_correct);
    }

    #[test]
    fn single_choice_needs_exactly_one_flagged_option() {
        let mut q = Question {
            options: vec![option("A", true), option("B", false)],
            ..question(QuestionType::McqSingle, 1.0, 0.25)
        };
        assert!(grade_response(&q, Some("A")).is_correct);
        assert!(!grade_response(&q, Some("B")).is_correct);

        q.options[1].is_correct = true;
        assert!(!grade_response(&q, Some("A")).is_correct);

        q.options.iter_mut().for_each(|o| o.is_correct = false);
        assert!(!grade_response(&q, Some("A")).is_correct);
    }

    #[test]
    fn negative_marking() {
        let q = numerical("7");
        assert_eq!(grade_response(&q, Some("7")).marks_awarded, 2.0);
        assert_eq!(grade_response(&q, Some("8")).marks_awarded, -0.5);
        assert_eq!(grade_response(&q, None).marks_awarded, 0.0);
    }

    #[test]
    fn blank_answers_score_zero_for_every_type() {
        let questions = [
            numerical("1"),
            multiple(&["A"]),
            Question {
                options: vec![option("A", true)],
                ..question(QuestionType::McqSingle, 1.0, 1.0)
            },
        ];
        for q in &questions {
            for blank in [None, Some(""), Some("   "), Some("\t\n")] {
                assert_eq!(grade_response(q, blank), ResponseGrade::UNANSWERED);
            }
        }
    }

    fn engine_fixture() -> Arc<crate::storage::InMemoryStorage> {
        let storage = Arc::new(crate::storage::InMemoryStorage::new());
        storage.insert_test(crate::models::Test {
            id: "t1".into(),
            title: "Mock test".into(),
            total_marks: 1.0,
        });
        storage.insert_question(Question {
            options: vec![option("A", true), option("B", false)],
            ..question(QuestionType::McqSingle, 1.0, 0.0)
        });
        storage
    }

    fn scoring_job() -> ScoringJob {
        ScoringJob {
            attempt_id: "a1".into(),
            test_id: "t1".into(),
            user_id: "u1".into(),
        }
    }

    #[tokio::test]
    async fn follow_up_jobs_are_published_as_one_batch() {
        let mut publisher = MockJobPublisher::new();
        publisher.expect_publish().never();
        publisher
            .expect_publish_all()
            .withf(|jobs| {
                let kinds: Vec<JobKind> = jobs.iter().map(Job::kind).collect();
                kinds == [JobKind::AnalyticsUpdate, JobKind::Percentile]
            })
            .times(1)
            .returning(|_| Ok(()));

        let engine = ScoringEngine::new(engine_fixture(), Arc::new(publisher));
        let outcome = engine.score_attempt(&scoring_job()).await.unwrap();
        assert_eq!(outcome.max_score, 1.0);
    }

    #[tokio::test]
    async fn publish_failure_is_transient() {
        let mut publisher = MockJobPublisher::new();
        publisher
            .expect_publish_all()
            .times(1)
            .returning(|_| Err(QueueError::Unavailable("redis down".into())));

        let engine = ScoringEngine::new(engine_fixture(), Arc::new(publisher));
        let err = engine.score_attempt(&scoring_job()).await.unwrap_err();
        assert!(matches!(err, JobError::Queue(_)));
        assert!(!err.is_permanent());
    }

    #[test]
    fn grading_is_idempotent() {
        let q = multiple(&["B", "D"]);
        let first = grade_response(&q, Some("D,B"));
        let second = grade_response(&q, Some("D,B"));
        assert_eq!(first, second);
    }
}
