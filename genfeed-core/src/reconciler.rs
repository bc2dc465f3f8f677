use chrono::Utc;

use crate::status::can_advance;
use crate::types::{GenerationKind, NotificationEvent, Page, Task, TaskId, TaskStatus};

/// What [`TaskListReconciler::apply_notification`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The referenced task was updated in place.
    Applied(TaskId),
    /// The task is loaded but the event carried nothing newer.
    Unchanged(TaskId),
    /// The task is not in the loaded window.
    Orphan(TaskId),
    /// The payload had no usable `taskId`.
    Malformed,
}

impl NotificationOutcome {
    pub fn is_orphan(&self) -> bool {
        matches!(self, NotificationOutcome::Orphan(_) | NotificationOutcome::Malformed)
    }
}

/// The client-side list of generation tasks, newest first.
///
/// Merges three sources: optimistic placeholders created at submission time,
/// server pages fetched by cursor, and live notifications. The list never
/// holds two entries with the same id and is always sorted by `created_at`
/// descending.
#[derive(Debug, Default)]
pub struct TaskListReconciler {
    tasks: Vec<Task>,
    generation: u64,
    last_temp_id: TaskId,
}

impl TaskListReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Pages ───────────────────────────────────────────────────────────

    /// Replaces the whole list with a freshly fetched first page.
    pub fn reset(&mut self, page: Page) {
        self.tasks.clear();
        self.generation += 1;
        for task in page.content {
            if !self.contains(task.id) {
                self.push_tail(task);
            }
        }
    }

    /// Appends a subsequent page, skipping ids that are already present.
    /// Returns the number of tasks added.
    pub fn append_page(&mut self, page: Page) -> usize {
        let mut added = 0;
        for task in page.content {
            if self.contains(task.id) {
                continue;
            }
            self.push_tail(task);
            added += 1;
        }
        added
    }

    // ─── Optimistic entries ──────────────────────────────────────────────

    /// Builds a placeholder for a submission that has not been acknowledged yet.
    pub fn new_optimistic(&mut self, prompt: &str, kind: GenerationKind) -> Task {
        Task {
            id: self.next_temp_id(),
            prompt: prompt.to_string(),
            status: TaskStatus::Pending,
            result_ref: None,
            created_at: Utc::now(),
            r#type: Some(kind),
        }
    }

    /// Places a placeholder at the head of the list. An entry with the same id
    /// is replaced rather than duplicated.
    pub fn insert_optimistic(&mut self, task: Task) {
        self.remove(task.id);
        let pos = self.head_position(&task);
        self.tasks.insert(pos, task);
    }

    /// Swaps the placeholder for the confirmed task, or drops it when the
    /// submission failed. Returns `false` if the placeholder was not found.
    pub fn resolve_optimistic(&mut self, temp_id: TaskId, confirmed: Option<Task>) -> bool {
        let found = self.remove(temp_id);
        if let Some(task) = confirmed {
            // A notification or page may have delivered the real task already.
            if !self.contains(task.id) {
                let pos = self.head_position(&task);
                self.tasks.insert(pos, task);
            }
        }
        found
    }

    // ─── Live updates ────────────────────────────────────────────────────

    pub fn apply_notification(&mut self, event: &NotificationEvent) -> NotificationOutcome {
        let Some(task_id) = event.task_id() else {
            tracing::warn!(
                notification_id = event.id,
                kind = %event.r#type,
                "notification payload has no taskId; ignoring"
            );
            return NotificationOutcome::Malformed;
        };

        let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) else {
            tracing::debug!(
                notification_id = event.id,
                task_id,
                "notification for task outside the loaded window"
            );
            return NotificationOutcome::Orphan(task_id);
        };

        let mut changed = false;

        if task.prompt.is_empty() {
            if let Some(prompt) = event.payload.prompt() {
                task.prompt = prompt.to_string();
                changed = true;
            }
        }
        if task.r#type.is_none() {
            task.r#type = Some(event.r#type);
            changed = true;
        }

        match event.task_status() {
            Some(status) => {
                if can_advance(&task.status, &status) {
                    task.status = status;
                    changed = true;
                }
                if status == TaskStatus::Completed && task.status == TaskStatus::Completed {
                    let refs = event.payload.media_refs();
                    if !refs.is_empty() && task.result_ref.as_ref() != Some(&refs) {
                        task.result_ref = Some(refs);
                        changed = true;
                    }
                }
            }
            None => {
                tracing::debug!(
                    notification_id = event.id,
                    status = %event.status,
                    "unrecognized notification status"
                );
            }
        }

        if changed {
            NotificationOutcome::Applied(task_id)
        } else {
            NotificationOutcome::Unchanged(task_id)
        }
    }

    /// Deletes a task. Absent ids are a no-op.
    pub fn remove(&mut self, task_id: TaskId) -> bool {
        match self.position(task_id) {
            Some(pos) => {
                self.tasks.remove(pos);
                true
            }
            None => false,
        }
    }

    // ─── Readers ─────────────────────────────────────────────────────────

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.position(task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Incremented on every [`reset`](Self::reset). Fetches compare it at apply
    /// time to detect that the list moved on underneath them.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ─── Private ─────────────────────────────────────────────────────────

    fn position(&self, task_id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == task_id)
    }

    /// Tail insert for paged content. Falls back to the sorted position when
    /// the server hands back something newer than the current tail.
    fn push_tail(&mut self, task: Task) {
        match self.tasks.last() {
            Some(last) if task.created_at > last.created_at => {
                let pos = self
                    .tasks
                    .partition_point(|t| t.created_at >= task.created_at);
                self.tasks.insert(pos, task);
            }
            _ => self.tasks.push(task),
        }
    }

    /// First slot whose neighbour is not strictly newer, so ties land on top.
    fn head_position(&self, task: &Task) -> usize {
        self.tasks.partition_point(|t| t.created_at > task.created_at)
    }

    fn next_temp_id(&mut self) -> TaskId {
        let candidate = -Utc::now().timestamp_millis();
        let id = candidate.min(self.last_temp_id - 1);
        self.last_temp_id = id;
        id
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
