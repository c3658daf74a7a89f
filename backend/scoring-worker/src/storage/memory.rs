use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::TestStorage;
use crate::errors::{StorageError, StorageResult};
use crate::models::{
    AttemptStatus, AttemptUpdate, Question, ResponseGrade, Test, TestAttempt, TestResponse,
    TestSection,
};

#[derive(Default)]
struct Tables {
    tests: HashMap<String, Test>,
    questions: Vec<Question>,
    sections: Vec<TestSection>,
    attempts: HashMap<String, TestAttempt>,
    responses: Vec<TestResponse>,
}

/// Process-local [`TestStorage`] for tests and local dry runs.
///
/// `set_offline` and `fail_attempt_updates` inject the transient failures a
/// real database produces.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
    offline: AtomicBool,
    fail_attempt_updates: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory storage is offline".into()));
        }
        Ok(())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_attempt_updates(&self, fail: bool) {
        self.fail_attempt_updates.store(fail, Ordering::SeqCst);
    }

    pub fn insert_test(&self, test: Test) {
        self.write().tests.insert(test.id.clone(), test);
    }

    pub fn insert_question(&self, question: Question) {
        let mut tables = self.write();
        tables.questions.retain(|q| q.id != question.id);
        tables.questions.push(question);
    }

    pub fn insert_section(&self, section: TestSection) {
        let mut tables = self.write();
        tables.sections.retain(|s| s.id != section.id);
        tables.sections.push(section);
    }

    pub fn insert_attempt(&self, attempt: TestAttempt) {
        self.write().attempts.insert(attempt.id.clone(), attempt);
    }

    pub fn insert_response(&self, response: TestResponse) {
        let mut tables = self.write();
        tables.responses.retain(|r| r.id != response.id);
        tables.responses.push(response);
    }

    pub fn attempt(&self, attempt_id: &str) -> Option<TestAttempt> {
        self.read().attempts.get(attempt_id).cloned()
    }

    pub fn response(&self, response_id: &str) -> Option<TestResponse> {
        self.read()
            .responses
            .iter()
            .find(|r| r.id == response_id)
            .cloned()
    }
}

#[async_trait]
impl TestStorage for InMemoryStorage {
    async fn get_test(&self, test_id: &str) -> StorageResult<Option<Test>> {
        self.check_online()?;
        Ok(self.read().tests.get(test_id).cloned())
    }

    async fn get_test_questions(&self, test_id: &str) -> StorageResult<Vec<Question>> {
        self.check_online()?;
        let mut questions: Vec<Question> = self
            .read()
            .questions
            .iter()
            .filter(|q| q.test_id == test_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.position);
        Ok(questions)
    }

    async fn get_test_sections(&self, test_id: &str) -> StorageResult<Vec<TestSection>> {
        self.check_online()?;
        let mut sections: Vec<TestSection> = self
            .read()
            .sections
            .iter()
            .filter(|s| s.test_id == test_id)
            .cloned()
            .collect();
        sections.sort_by_key(|s| s.position);
        Ok(sections)
    }

    async fn get_test_attempt_responses(
        &self,
        attempt_id: &str,
    ) -> StorageResult<Vec<TestResponse>> {
        self.check_online()?;
        Ok(self
            .read()
            .responses
            .iter()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect())
    }

    async fn get_test_attempt(&self, attempt_id: &str) -> StorageResult<Option<TestAttempt>> {
        self.check_online()?;
        Ok(self.read().attempts.get(attempt_id).cloned())
    }

    async fn get_test_attempts_by_test_id(
        &self,
        test_id: &str,
        status: AttemptStatus,
    ) -> StorageResult<Vec<TestAttempt>> {
        self.check_online()?;
        let mut attempts: Vec<TestAttempt> = self
            .read()
            .attempts
            .values()
            .filter(|a| a.test_id == test_id && a.status == status)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(attempts)
    }

    async fn update_test_response(
        &self,
        response_id: &str,
        grade: ResponseGrade,
    ) -> StorageResult<()> {
        self.check_online()?;
        if let Some(response) = self
            .write()
            .responses
            .iter_mut()
            .find(|r| r.id == response_id)
        {
            response.is_correct = Some(grade.is_correct);
            response.marks_awarded = Some(grade.marks_awarded);
        }
        Ok(())
    }

    async fn update_test_attempt(
        &self,
        attempt_id: &str,
        update: AttemptUpdate,
    ) -> StorageResult<()> {
        self.check_online()?;
        if self.fail_attempt_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "write to attempt {} rejected",
                attempt_id
            )));
        }
        if let Some(attempt) = self.write().attempts.get_mut(attempt_id) {
            update.apply_to(attempt);
        }
        Ok(())
    }
}
