use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod jobs;
pub mod summary;

pub use summary::{AttemptStats, AttemptSummary, SectionSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub total_marks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    McqSingle,
    McqMultiple,
    Numerical,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::McqSingle => "mcq_single",
            QuestionType::McqMultiple => "mcq_multiple",
            QuestionType::Numerical => "numerical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: String,
    pub test_id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Only meaningful for numerical questions.
    pub correct_answer: Option<String>,
    pub marks: f64,
    #[serde(default)]
    pub negative_marks: f64,
    pub section_id: Option<String>,
    #[serde(default)]
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSection {
    #[serde(rename = "_id")]
    pub id: String,
    pub test_id: String,
    pub name: String,
    #[serde(default)]
    pub position: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAttempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub test_id: String,
    pub user_id: String,
    pub status: AttemptStatus,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub percentile: Option<f64>,
    pub summary: Option<AttemptSummary>,
    pub time_taken: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub attempt_id: String,
    pub question_id: String,
    /// Raw answer; multi-select answers are comma-joined option ids.
    pub selected_answer: Option<String>,
    #[serde(default)]
    pub is_marked_for_review: bool,
    #[serde(default)]
    pub is_visited: bool,
    #[serde(default)]
    pub time_spent_seconds: i64,
    pub is_correct: Option<bool>,
    pub marks_awarded: Option<f64>,
}

impl TestResponse {
    /// The raw answer, or `None` when it is missing or whitespace only.
    pub fn answer(&self) -> Option<&str> {
        self.selected_answer
            .as_deref()
            .filter(|answer| !answer.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseGrade {
    pub is_correct: bool,
    pub marks_awarded: f64,
}

impl ResponseGrade {
    pub const UNANSWERED: ResponseGrade = ResponseGrade {
        is_correct: false,
        marks_awarded: 0.0,
    };
}

/// Partial update of a test attempt. The scoring engine only sets the
/// score/status/summary group and the percentile engine only sets
/// `percentile`, so the two never race on the same field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptUpdate {
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub status: Option<AttemptStatus>,
    pub summary: Option<AttemptSummary>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub percentile: Option<f64>,
}

impl AttemptUpdate {
    pub fn scored(score: f64, max_score: f64, summary: AttemptSummary) -> Self {
        Self {
            score: Some(score),
            max_score: Some(max_score),
            status: Some(AttemptStatus::Submitted),
            summary: Some(summary),
            submitted_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn percentile(percentile: f64) -> Self {
        Self {
            percentile: Some(percentile),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the set fields onto an attempt.
    pub fn apply_to(&self, attempt: &mut TestAttempt) {
        if let Some(score) = self.score {
            attempt.score = Some(score);
        }
        if let Some(max_score) = self.max_score {
            attempt.max_score = Some(max_score);
        }
        if let Some(status) = self.status {
            attempt.status = status;
        }
        if let Some(summary) = &self.summary {
            attempt.summary = Some(summary.clone());
        }
        if let Some(submitted_at) = self.submitted_at {
            attempt.submitted_at = Some(submitted_at);
        }
        if let Some(percentile) = self.percentile {
            attempt.percentile = Some(percentile);
        }
    }
}
