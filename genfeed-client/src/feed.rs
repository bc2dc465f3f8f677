use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use genfeed_core::config::GenfeedConfig;
use genfeed_core::{
    NotificationEvent, NotificationId, NotificationInbox, NotificationOutcome, Task, TaskId,
    TaskListReconciler, TaskStatus, DEFAULT_INBOX_CAPACITY,
};

use crate::api::{HttpTaskApi, SubmitRequest, TaskApi};
use crate::credential::SessionCredential;
use crate::error::ClientError;
use crate::pagination::{LoadOutcome, PaginationController};
use crate::stream::{EventStreamClient, Subscription};

#[derive(Debug, Clone)]
pub struct TaskFeedOptions {
    pub page_size: u32,
    /// Reload the first page when a task outside the loaded window finishes.
    pub refresh_on_orphan_completion: bool,
    pub inbox_capacity: usize,
}

impl Default for TaskFeedOptions {
    fn default() -> Self {
        Self {
            page_size: genfeed_core::config::DEFAULT_PAGE_SIZE,
            refresh_on_orphan_completion: true,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

impl TaskFeedOptions {
    pub fn from_config(config: &GenfeedConfig) -> Self {
        Self {
            page_size: config.page_size(),
            refresh_on_orphan_completion: config.refresh_on_orphan_completion(),
            inbox_capacity: config.inbox_capacity.unwrap_or(DEFAULT_INBOX_CAPACITY),
        }
    }
}

// ─── TaskFeed ───────────────────────────────────────────────────────────────

/// The live generation history: a paginated task list kept current by push
/// notifications and optimistic submissions.
#[derive(Clone)]
pub struct TaskFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    api: Arc<dyn TaskApi>,
    stream: EventStreamClient,
    reconciler: Arc<Mutex<TaskListReconciler>>,
    pagination: PaginationController,
    inbox: Mutex<NotificationInbox>,
    options: TaskFeedOptions,
    subscription: Mutex<Option<Subscription>>,
}

impl TaskFeed {
    pub fn new(api: Arc<dyn TaskApi>, stream: EventStreamClient, options: TaskFeedOptions) -> Self {
        let reconciler = Arc::new(Mutex::new(TaskListReconciler::new()));
        let pagination =
            PaginationController::new(Arc::clone(&api), Arc::clone(&reconciler), options.page_size);
        Self {
            inner: Arc::new(FeedInner {
                api,
                stream,
                reconciler,
                pagination,
                inbox: Mutex::new(NotificationInbox::new(options.inbox_capacity)),
                options,
                subscription: Mutex::new(None),
            }),
        }
    }

    /// HTTP API and event stream built from config, sharing one connection
    /// pool and the given session.
    pub fn from_config(
        config: &GenfeedConfig,
        credential: &SessionCredential,
    ) -> Result<Self, ClientError> {
        let api = HttpTaskApi::from_config(config)?;
        api.set_credential(Some(credential.clone()));
        let stream = EventStreamClient::new(api.client(), api.stream_url()?, config.reconnect());
        Ok(Self::new(
            Arc::new(api),
            stream,
            TaskFeedOptions::from_config(config),
        ))
    }

    /// Hooks the list up to the push stream and connects it. Also the way
    /// back in after a rejected session: the new credential replaces the old
    /// one for every later request.
    pub fn start(&self, credential: &SessionCredential) {
        self.inner.api.set_credential(Some(credential.clone()));
        {
            let mut subscription = self
                .inner
                .subscription
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if subscription.is_none() {
                let feed = Arc::downgrade(&self.inner);
                *subscription = Some(self.inner.stream.on_any(move |event| {
                    if let Some(inner) = feed.upgrade() {
                        inner.on_notification(event);
                    }
                }));
            }
        }
        self.inner.stream.connect(credential);
    }

    pub fn stop(&self) {
        self.inner.stream.disconnect();
        if let Some(subscription) = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.unsubscribe();
        }
    }

    /// Stops and drops every piece of session state.
    pub fn logout(&self) {
        self.stop();
        self.inner.stream.logout();
        self.inner.api.set_credential(None);
        {
            // Held across both resets: an in-flight fetch observes both or neither.
            let mut reconciler = self.inner.lock_reconciler();
            reconciler.reset(Default::default());
            self.inner.pagination.reset();
        }
        self.inner.lock_inbox().clear();
    }

    // ─── List ───────────────────────────────────────────────────────────

    pub async fn refresh(&self) -> Result<LoadOutcome, ClientError> {
        self.inner.pagination.load_first().await
    }

    pub async fn load_more(&self) -> Result<LoadOutcome, ClientError> {
        self.inner.pagination.load_more().await
    }

    pub async fn retry(&self) -> Result<LoadOutcome, ClientError> {
        self.inner.pagination.retry().await
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.inner.lock_reconciler().tasks().to_vec()
    }

    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.inner.lock_reconciler().get(task_id).cloned()
    }

    pub fn has_more(&self) -> bool {
        self.inner.pagination.has_more()
    }

    pub fn pagination(&self) -> &PaginationController {
        &self.inner.pagination
    }

    pub fn stream(&self) -> &EventStreamClient {
        &self.inner.stream
    }

    // ─── Mutations ──────────────────────────────────────────────────────

    /// Shows a placeholder immediately, then swaps it for the server's task
    /// once acknowledged. A rejected submission removes the placeholder.
    ///
    /// Returns the server task id, or the placeholder's temp id when the
    /// acknowledgement carried none.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId, ClientError> {
        let placeholder = {
            let mut reconciler = self.inner.lock_reconciler();
            let placeholder = reconciler.new_optimistic(&request.prompt, request.r#type);
            reconciler.insert_optimistic(placeholder.clone());
            placeholder
        };

        match self.inner.api.submit(&request).await {
            Ok(ack) => {
                let Some(task_id) = ack.task_id else {
                    tracing::debug!(temp_id = placeholder.id, "submission acknowledged without a task id");
                    return Ok(placeholder.id);
                };
                let status = ack
                    .status
                    .as_deref()
                    .and_then(TaskStatus::from_notification)
                    .unwrap_or(TaskStatus::Pending);
                let confirmed = Task {
                    id: task_id,
                    status,
                    ..placeholder.clone()
                };
                self.inner
                    .lock_reconciler()
                    .resolve_optimistic(placeholder.id, Some(confirmed));
                tracing::info!(task_id, kind = %request.r#type, "generation submitted");
                Ok(task_id)
            }
            Err(err) => {
                self.inner
                    .lock_reconciler()
                    .resolve_optimistic(placeholder.id, None);
                tracing::warn!(error = %err, kind = %request.r#type, "submission rejected");
                Err(err)
            }
        }
    }

    /// Returns whether the task was in the loaded list.
    pub async fn delete(&self, task_id: TaskId) -> Result<bool, ClientError> {
        if task_id >= 0 {
            self.inner.api.delete_task(task_id).await?;
        }
        let removed = self.inner.lock_reconciler().remove(task_id);
        tracing::debug!(task_id, removed, "task deleted");
        Ok(removed)
    }

    // ─── Inbox ──────────────────────────────────────────────────────────

    pub fn notifications(&self) -> Vec<NotificationEvent> {
        self.inner.lock_inbox().iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.lock_inbox().unread_count()
    }

    pub fn mark_read(&self, id: NotificationId) -> bool {
        self.inner.lock_inbox().mark_read(id)
    }

    pub fn mark_all_read(&self) {
        self.inner.lock_inbox().mark_all_read();
    }
}

impl FeedInner {
    fn lock_reconciler(&self) -> MutexGuard<'_, TaskListReconciler> {
        self.reconciler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_inbox(&self) -> MutexGuard<'_, NotificationInbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_notification(self: Arc<Self>, event: &NotificationEvent) {
        self.lock_inbox().push(event.clone());
        let outcome = self.lock_reconciler().apply_notification(event);

        let terminal = event.task_status().is_some_and(|s| s.is_terminal());
        if !(outcome.is_orphan() && terminal && self.options.refresh_on_orphan_completion) {
            return;
        }
        if let NotificationOutcome::Orphan(task_id) = outcome {
            tracing::info!(task_id, "task outside loaded window finished, reloading first page");
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, skipping refresh");
            return;
        };
        runtime.spawn(async move {
            if let Err(e) = self.pagination.load_first().await {
                tracing::warn!(error = %e, "refresh after completion failed");
            }
        });
    }
}
