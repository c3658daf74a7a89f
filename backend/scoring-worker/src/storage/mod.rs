use async_trait::async_trait;

use crate::errors::StorageResult;
use crate::models::{
    AttemptStatus, AttemptUpdate, Question, ResponseGrade, Test, TestAttempt, TestResponse,
    TestSection,
};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryStorage;
pub use mongo::MongoTestStorage;

/// Narrow view of the exam database used by the scoring pipeline.
///
/// Both update methods must be idempotent partial updates: jobs are
/// redelivered after crashes and simply write the same values again.
#[async_trait]
pub trait TestStorage: Send + Sync {
    async fn get_test(&self, test_id: &str) -> StorageResult<Option<Test>>;

    /// Questions of a test in display order.
    async fn get_test_questions(&self, test_id: &str) -> StorageResult<Vec<Question>>;

    async fn get_test_sections(&self, test_id: &str) -> StorageResult<Vec<TestSection>>;

    async fn get_test_attempt_responses(&self, attempt_id: &str)
        -> StorageResult<Vec<TestResponse>>;

    async fn get_test_attempt(&self, attempt_id: &str) -> StorageResult<Option<TestAttempt>>;

    async fn get_test_attempts_by_test_id(
        &self,
        test_id: &str,
        status: AttemptStatus,
    ) -> StorageResult<Vec<TestAttempt>>;

    async fn update_test_response(&self, response_id: &str, grade: ResponseGrade)
        -> StorageResult<()>;

    async fn update_test_attempt(&self, attempt_id: &str, update: AttemptUpdate)
        -> StorageResult<()>;
}
