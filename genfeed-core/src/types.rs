use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type TaskId = i64;
pub type NotificationId = i64;

// ─── Task ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Image,
    Video,
    Upscale,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 3] = [
        GenerationKind::Image,
        GenerationKind::Video,
        GenerationKind::Upscale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Image => "image",
            GenerationKind::Video => "video",
            GenerationKind::Upscale => "upscale",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(GenerationKind::Image),
            "video" => Ok(GenerationKind::Video),
            "upscale" => Ok(GenerationKind::Upscale),
            other => Err(format!("unknown generation kind: {other}")),
        }
    }
}

/// One produced media object. `index` is the position within a multi-output job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub prompt: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<Vec<MediaRef>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<GenerationKind>,
}

impl Task {
    /// Placeholders carry negative ids until the server assigns a real one.
    pub fn is_optimistic(&self) -> bool {
        self.id < 0
    }
}

// ─── Notifications ──────────────────────────────────────────────────────────

const TASK_ID_KEY: &str = "taskId";
const PROMPT_KEY: &str = "prompt";
const RESULT_URL_KEYS: &[&str] = &["resultUrls", "imageUrls", "videoUrl", "url"];

/// Loosely-typed payload bag carried by a notification.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationPayload(pub Map<String, Value>);

impl NotificationPayload {
    /// The referenced task id. Accepts both numbers and numeric strings.
    pub fn task_id(&self) -> Option<TaskId> {
        match self.0.get(TASK_ID_KEY)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn prompt(&self) -> Option<&str> {
        self.0.get(PROMPT_KEY).and_then(Value::as_str)
    }

    /// Result URLs in payload order. Keys are checked in a fixed order and the
    /// first one present wins.
    pub fn result_urls(&self) -> Vec<String> {
        for key in RESULT_URL_KEYS {
            match self.0.get(*key) {
                Some(Value::String(url)) if !url.is_empty() => return vec![url.clone()],
                Some(Value::Array(items)) => {
                    return items
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|url| !url.is_empty())
                        .map(String::from)
                        .collect();
                }
                _ => {}
            }
        }
        Vec::new()
    }

    pub fn media_refs(&self) -> Vec<MediaRef> {
        self.result_urls()
            .into_iter()
            .enumerate()
            .map(|(index, url)| MediaRef {
                url,
                index: index as u32,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: NotificationId,
    pub r#type: GenerationKind,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub payload: NotificationPayload,
    #[serde(default)]
    pub read: bool,
}

impl NotificationEvent {
    pub fn task_id(&self) -> Option<TaskId> {
        self.payload.task_id()
    }

    pub fn task_status(&self) -> Option<TaskStatus> {
        TaskStatus::from_notification(&self.status)
    }
}

// ─── Pagination ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub content: Vec<Task>,
    #[serde(rename = "nextPageCursor", default)]
    pub next_cursor: Option<String>,
}

impl Page {
    /// The continuation cursor, treating an empty string the same as null.
    pub fn cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }

    pub fn has_next(&self) -> bool {
        self.cursor().is_some()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
