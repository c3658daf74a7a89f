use serde::{Deserialize, Serialize};

/// Per-attempt (or per-section) counters stored in `test_attempts.summary`.
///
/// `answered`, `not_answered` and `not_visited` partition `total_questions`:
/// an unanswered response only counts as `not_answered` when the candidate
/// actually opened the question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptStats {
    pub total_questions: u32,
    pub answered: u32,
    pub not_answered: u32,
    pub not_visited: u32,
    pub marked_for_review: u32,
    pub visited: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub time_spent_seconds: i64,
    pub score: f64,
}

impl AttemptStats {
    pub fn with_total(total_questions: u32) -> Self {
        Self {
            total_questions,
            ..Default::default()
        }
    }

    pub(crate) fn record(
        &mut self,
        answered: bool,
        visited: bool,
        marked_for_review: bool,
        is_correct: bool,
        marks_awarded: f64,
        time_spent_seconds: i64,
    ) {
        if answered {
            self.answered += 1;
            if is_correct {
                self.correct += 1;
            } else {
                self.incorrect += 1;
            }
        } else if visited {
            self.not_answered += 1;
        }
        if visited {
            self.visited += 1;
        }
        if marked_for_review {
            self.marked_for_review += 1;
        }
        self.time_spent_seconds += time_spent_seconds;
        self.score += marks_awarded;
    }

    /// Fills `not_visited` once every response has been recorded. Questions
    /// without any response are never visited.
    pub(crate) fn close(&mut self) {
        self.not_visited = self
            .total_questions
            .saturating_sub(self.answered + self.not_answered);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub section_id: String,
    pub name: String,
    #[serde(flatten)]
    pub stats: AttemptStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub overall: AttemptStats,
    pub sections: Vec<SectionSummary>,
}

impl AttemptSummary {
    pub fn section(&self, section_id: &str) -> Option<&SectionSummary> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }
}
