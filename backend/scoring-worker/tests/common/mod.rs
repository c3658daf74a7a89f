#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use exam_scoring::{
    config::WorkerSettings,
    models::{
        AttemptStatus, Question, QuestionOption, QuestionType, Test, TestAttempt, TestResponse,
        TestSection,
    },
    queue::InMemoryJobQueue,
    services::{JobWorker, PercentileEngine, ScoringEngine},
    storage::InMemoryStorage,
    utils::retry::RetryPolicy,
};

/// Storage and queue shared by the engines and workers under test.
pub struct Harness {
    pub storage: Arc<InMemoryStorage>,
    pub queue: Arc<InMemoryJobQueue>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            storage: Arc::new(InMemoryStorage::new()),
            queue: Arc::new(InMemoryJobQueue::new()),
        }
    }

    pub fn scoring_engine(&self) -> ScoringEngine {
        ScoringEngine::new(self.storage.clone(), self.queue.clone())
    }

    pub fn percentile_engine(&self) -> PercentileEngine {
        PercentileEngine::new(self.storage.clone())
    }

    pub fn scoring_worker(&self) -> JobWorker {
        JobWorker::new(
            self.queue.clone(),
            Arc::new(self.scoring_engine()),
            WorkerSettings::scoring_defaults(),
            fast_retry(),
        )
    }

    pub fn percentile_worker(&self) -> JobWorker {
        JobWorker::new(
            self.queue.clone(),
            Arc::new(self.percentile_engine()),
            WorkerSettings::percentile_defaults(),
            fast_retry(),
        )
    }

    pub fn seed_test(&self, test_id: &str, total_marks: f64) {
        self.storage.insert_test(Test {
            id: test_id.into(),
            title: format!("Test {}", test_id),
            total_marks,
        });
    }

    pub fn seed_section(&self, test_id: &str, section_id: &str, name: &str, position: i32) {
        self.storage.insert_section(TestSection {
            id: section_id.into(),
            test_id: test_id.into(),
            name: name.into(),
            position,
        });
    }

    pub fn seed_question(&self, question: Question) {
        self.storage.insert_question(question);
    }

    pub fn seed_attempt(&self, test_id: &str, attempt_id: &str, user_id: &str) {
        self.storage.insert_attempt(TestAttempt {
            id: attempt_id.into(),
            test_id: test_id.into(),
            user_id: user_id.into(),
            status: AttemptStatus::InProgress,
            score: None,
            max_score: None,
            percentile: None,
            summary: None,
            time_taken: None,
            started_at: Utc::now(),
            submitted_at: None,
        });
    }

    /// An already scored attempt, as left behind by an earlier scoring run.
    pub fn seed_scored_attempt(&self, test_id: &str, attempt_id: &str, score: f64) {
        self.storage.insert_attempt(TestAttempt {
            id: attempt_id.into(),
            test_id: test_id.into(),
            user_id: format!("user-{}", attempt_id),
            status: AttemptStatus::Submitted,
            score: Some(score),
            max_score: Some(100.0),
            percentile: None,
            summary: None,
            time_taken: Some(600),
            started_at: Utc::now(),
            submitted_at: Some(Utc::now()),
        });
    }

    pub fn answer(
        &self,
        attempt_id: &str,
        response_id: &str,
        question_id: &str,
        answer: Option<&str>,
    ) {
        self.storage.insert_response(TestResponse {
            id: response_id.into(),
            attempt_id: attempt_id.into(),
            question_id: question_id.into(),
            selected_answer: answer.map(str::to_string),
            is_marked_for_review: false,
            is_visited: true,
            time_spent_seconds: 30,
            is_correct: None,
            marks_awarded: None,
        });
    }
}

/// Polls `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter_max: None,
    }
}

pub fn mcq_single(
    test_id: &str,
    id: &str,
    correct: &str,
    marks: f64,
    negative_marks: f64,
) -> Question {
    Question {
        id: id.into(),
        test_id: test_id.into(),
        question_type: QuestionType::McqSingle,
        options: ["A", "B", "C", "D"]
            .iter()
            .map(|option| QuestionOption {
                id: option.to_string(),
                text: format!("Option {}", option),
                is_correct: *option == correct,
            })
            .collect(),
        correct_answer: None,
        marks,
        negative_marks,
        section_id: None,
        position: 0,
    }
}

pub fn numerical(
    test_id: &str,
    id: &str,
    correct: &str,
    marks: f64,
    negative_marks: f64,
) -> Question {
    Question {
        id: id.into(),
        test_id: test_id.into(),
        question_type: QuestionType::Numerical,
        options: Vec::new(),
        correct_answer: Some(correct.into()),
        marks,
        negative_marks,
        section_id: None,
        position: 0,
    }
}

pub fn in_section(question: Question, section_id: &str, position: i32) -> Question {
    Question {
        section_id: Some(section_id.into()),
        position,
        ..question
    }
}
