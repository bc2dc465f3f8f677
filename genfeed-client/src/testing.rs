//! In-memory `TaskApi` for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use genfeed_core::{GenerationKind, Page, Task, TaskId, TaskStatus};

use crate::api::{SubmitAck, SubmitRequest, TaskApi};
use crate::credential::SessionCredential;
use crate::error::ClientError;

pub(crate) fn task(id: TaskId, created_ms: i64, status: TaskStatus) -> Task {
    Task {
        id,
        prompt: format!("prompt {id}"),
        status,
        result_ref: None,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap(),
        r#type: Some(GenerationKind::Image),
    }
}

/// `count` tasks with ids `first_id..` sorted newest first.
pub(crate) fn page(first_id: TaskId, count: i64, next: Option<&str>) -> Page {
    Page {
        content: (0..count)
            .map(|i| task(first_id + i, 1_000_000 - (first_id + i) * 1_000, TaskStatus::Pending))
            .collect(),
        next_cursor: next.map(String::from),
    }
}

#[derive(Default)]
pub(crate) struct FakeTaskApi {
    /// Keyed by cursor; `""` is the first page.
    pub pages: Mutex<HashMap<String, Page>>,
    pub list_calls: AtomicUsize,
    pub list_delay: Option<Duration>,
    pub list_error: Mutex<Option<fn() -> ClientError>>,
    pub submit_result: Mutex<Option<Result<SubmitAck, fn() -> ClientError>>>,
    pub submitted: Mutex<Vec<SubmitRequest>>,
    pub deleted: Mutex<Vec<TaskId>>,
    /// Token of the last credential handed over, if any.
    pub token: Mutex<Option<String>>,
}

impl FakeTaskApi {
    pub fn with_page(self, cursor: &str, page: Page) -> Self {
        self.pages.lock().unwrap().insert(cursor.to_string(), page);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn fail_lists(&self, err: fn() -> ClientError) {
        *self.list_error.lock().unwrap() = Some(err);
    }

    pub fn ack_submits(&self, ack: SubmitAck) {
        *self.submit_result.lock().unwrap() = Some(Ok(ack));
    }

    pub fn reject_submits(&self, err: fn() -> ClientError) {
        *self.submit_result.lock().unwrap() = Some(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskApi for FakeTaskApi {
    async fn list_tasks(&self, _size: u32, cursor: Option<&str>) -> Result<Page, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = *self.list_error.lock().unwrap() {
            return Err(err());
        }
        let pages = self.pages.lock().unwrap();
        Ok(pages.get(cursor.unwrap_or("")).cloned().unwrap_or_default())
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitAck, ClientError> {
        self.submitted.lock().unwrap().push(request.clone());
        match self.submit_result.lock().unwrap().clone() {
            Some(Ok(ack)) => Ok(ack),
            Some(Err(err)) => Err(err()),
            None => Ok(SubmitAck::default()),
        }
    }

    async fn delete_task(&self, task_id: TaskId) -> Result<(), ClientError> {
        self.deleted.lock().unwrap().push(task_id);
        Ok(())
    }

    fn set_credential(&self, credential: Option<SessionCredential>) {
        *self.token.lock().unwrap() = credential.map(|c| c.token().to_string());
    }
}
