use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Document},
    Collection, Database,
};

use super::TestStorage;
use crate::{
    errors::{StorageError, StorageResult},
    metrics::track_db_operation,
    models::{
        AttemptStatus, AttemptUpdate, Question, ResponseGrade, Test, TestAttempt, TestResponse,
        TestSection,
    },
};

const TESTS: &str = "tests";
const QUESTIONS: &str = "questions";
const SECTIONS: &str = "test_sections";
const ATTEMPTS: &str = "test_attempts";
const RESPONSES: &str = "test_responses";

#[derive(Clone)]
pub struct MongoTestStorage {
    mongo: Database,
}

impl MongoTestStorage {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn tests(&self) -> Collection<Test> {
        self.mongo.collection(TESTS)
    }

    fn questions(&self) -> Collection<Question> {
        self.mongo.collection(QUESTIONS)
    }

    fn sections(&self) -> Collection<TestSection> {
        self.mongo.collection(SECTIONS)
    }

    fn attempts(&self) -> Collection<TestAttempt> {
        self.mongo.collection(ATTEMPTS)
    }

    fn responses(&self) -> Collection<TestResponse> {
        self.mongo.collection(RESPONSES)
    }
}

/// Builds the `$set` body for a partial attempt update.
fn attempt_update_document(update: &AttemptUpdate) -> StorageResult<Document> {
    let mut set = Document::new();
    if let Some(score) = update.score {
        set.insert("score", score);
    }
    if let Some(max_score) = update.max_score {
        set.insert("max_score", max_score);
    }
    if let Some(status) = update.status {
        set.insert("status", status.as_str());
    }
    if let Some(summary) = &update.summary {
        set.insert("summary", to_bson(summary)?);
    }
    if let Some(submitted_at) = &update.submitted_at {
        set.insert("submitted_at", to_bson(submitted_at)?);
    }
    if let Some(percentile) = update.percentile {
        set.insert("percentile", percentile);
    }
    Ok(set)
}

#[async_trait]
impl TestStorage for MongoTestStorage {
    async fn get_test(&self, test_id: &str) -> StorageResult<Option<Test>> {
        track_db_operation("find_one", TESTS, async {
            Ok::<_, StorageError>(self.tests().find_one(doc! { "_id": test_id }).await?)
        })
        .await
    }

    async fn get_test_questions(&self, test_id: &str) -> StorageResult<Vec<Question>> {
        track_db_operation("find", QUESTIONS, async {
            let cursor = self
                .questions()
                .find(doc! { "test_id": test_id })
                .sort(doc! { "position": 1 })
                .await?;
            Ok::<_, StorageError>(cursor.try_collect::<Vec<_>>().await?)
        })
        .await
    }

    async fn get_test_sections(&self, test_id: &str) -> StorageResult<Vec<TestSection>> {
        track_db_operation("find", SECTIONS, async {
            let cursor = self
                .sections()
                .find(doc! { "test_id": test_id })
                .sort(doc! { "position": 1 })
                .await?;
            Ok::<_, StorageError>(cursor.try_collect::<Vec<_>>().await?)
        })
        .await
    }

    async fn get_test_attempt_responses(
        &self,
        attempt_id: &str,
    ) -> StorageResult<Vec<TestResponse>> {
        track_db_operation("find", RESPONSES, async {
            let cursor = self
                .responses()
                .find(doc! { "attempt_id": attempt_id })
                .await?;
            Ok::<_, StorageError>(cursor.try_collect::<Vec<_>>().await?)
        })
        .await
    }

    async fn get_test_attempt(&self, attempt_id: &str) -> StorageResult<Option<TestAttempt>> {
        track_db_operation("find_one", ATTEMPTS, async {
            Ok::<_, StorageError>(self.attempts().find_one(doc! { "_id": attempt_id }).await?)
        })
        .await
    }

    async fn get_test_attempts_by_test_id(
        &self,
        test_id: &str,
        status: AttemptStatus,
    ) -> StorageResult<Vec<TestAttempt>> {
        track_db_operation("find", ATTEMPTS, async {
            let cursor = self
                .attempts()
                .find(doc! { "test_id": test_id, "status": status.as_str() })
                .await?;
            Ok::<_, StorageError>(cursor.try_collect::<Vec<_>>().await?)
        })
        .await
    }

    async fn update_test_response(
        &self,
        response_id: &str,
        grade: ResponseGrade,
    ) -> StorageResult<()> {
        track_db_operation("update_one", RESPONSES, async {
            self.responses()
                .update_one(
                    doc! { "_id": response_id },
                    doc! { "$set": {
                        "is_correct": grade.is_correct,
                        "marks_awarded": grade.marks_awarded,
                    } },
                )
                .await?;
            Ok::<_, StorageError>(())
        })
        .await
    }

    async fn update_test_attempt(
        &self,
        attempt_id: &str,
        update: AttemptUpdate,
    ) -> StorageResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        let set = attempt_update_document(&update)?;

        track_db_operation("update_one", ATTEMPTS, async {
            self.attempts()
                .update_one(doc! { "_id": attempt_id }, doc! { "$set": set })
                .await?;
            Ok::<_, StorageError>(())
        })
        .await
    }
}
