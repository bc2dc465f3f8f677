use crate::types::TaskStatus;

pub const TERMINAL_STATUSES: &[TaskStatus] = &[TaskStatus::Completed, TaskStatus::Failed];

pub fn allowed_transitions(from: &TaskStatus) -> &'static [TaskStatus] {
    match from {
        TaskStatus::Pending => &[
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ],
        TaskStatus::InProgress => &[TaskStatus::Completed, TaskStatus::Failed],
        TaskStatus::Completed | TaskStatus::Failed => &[],
    }
}

/// Notifications may arrive out of order, so a status only ever moves forward.
pub fn can_advance(from: &TaskStatus, to: &TaskStatus) -> bool {
    if from == to {
        return false;
    }
    allowed_transitions(from).contains(to)
}

pub fn is_terminal(status: &TaskStatus) -> bool {
    TERMINAL_STATUSES.contains(status)
}

impl TaskStatus {
    /// Maps the free-form status string mirrored into a notification.
    pub fn from_notification(raw: &str) -> Option<TaskStatus> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" | "queued" => Some(TaskStatus::Pending),
            "in_progress" | "inprogress" | "processing" | "running" => {
                Some(TaskStatus::InProgress)
            }
            "completed" | "complete" | "success" | "succeeded" | "done" => {
                Some(TaskStatus::Completed)
            }
            "failed" | "failure" | "error" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal(self)
    }
}
