use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use genfeed_core::config::{EndpointsConfig, GenfeedConfig};
use genfeed_core::{GenerationKind, Page, TaskId};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::credential::SessionCredential;
use crate::error::ClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Request / Response Types ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub r#type: GenerationKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl SubmitRequest {
    pub fn new(kind: GenerationKind, prompt: impl Into<String>) -> Self {
        Self {
            r#type: kind,
            prompt: prompt.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Accepted/queued acknowledgement. The final result arrives later over the
/// push stream.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    #[serde(default, deserialize_with = "lenient_task_id")]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn lenient_task_id<'de, D>(deserializer: D) -> Result<Option<TaskId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ─── TaskApi ────────────────────────────────────────────────────────────────

/// The remote generation backend, as far as the task list is concerned.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(&self, size: u32, cursor: Option<&str>) -> Result<Page, ClientError>;
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitAck, ClientError>;
    /// Deleting an id the server no longer knows is not an error.
    async fn delete_task(&self, task_id: TaskId) -> Result<(), ClientError>;

    /// Session used for every later request; `None` sends them anonymously.
    fn set_credential(&self, _credential: Option<SessionCredential>) {}
}

// ─── HttpTaskApi ────────────────────────────────────────────────────────────

pub struct HttpTaskApi {
    client: reqwest::Client,
    base_url: Url,
    endpoints: EndpointsConfig,
    timeout: Duration,
    credential: RwLock<Option<SessionCredential>>,
}

impl HttpTaskApi {
    pub fn new(
        base_url: &str,
        endpoints: EndpointsConfig,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            endpoints,
            timeout,
            credential: RwLock::new(None),
        })
    }

    pub fn from_config(config: &GenfeedConfig) -> Result<Self, ClientError> {
        let base_url = config.base_url.as_deref().ok_or(ClientError::MissingBaseUrl)?;
        Self::new(base_url, config.endpoints(), config.request_timeout())
    }

    /// The underlying client, shared with the event stream so both reuse one
    /// connection pool.
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    pub fn stream_url(&self) -> Result<Url, ClientError> {
        self.url(&self.endpoints.stream)
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let credential = self
            .credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match credential {
            Some(credential) => request.bearer_auth(credential.token()),
            None => request,
        }
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn list_tasks(&self, size: u32, cursor: Option<&str>) -> Result<Page, ClientError> {
        let mut url = self.url(&self.endpoints.tasks)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("size", &size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }

        let response = self
            .authorized(self.client.get(url))
            .timeout(self.timeout)
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitAck, ClientError> {
        let url = self.url(self.endpoints.submit_path(request.r#type))?;
        let response = self
            .authorized(self.client.post(url))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(SubmitAck::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn delete_task(&self, task_id: TaskId) -> Result<(), ClientError> {
        let path = format!("{}/{task_id}", self.endpoints.tasks.trim_end_matches('/'));
        let response = self
            .authorized(self.client.delete(self.url(&path)?))
            .timeout(self.timeout)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(task_id, "task already deleted on server");
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    fn set_credential(&self, credential: Option<SessionCredential>) {
        *self.credential.write().unwrap_or_else(PoisonError::into_inner) = credential;
    }
}

/// Maps non-success statuses onto [`ClientError`].
pub(crate) async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ClientError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        return Err(ClientError::Rejected {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Pulls a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "error", "detail"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string())
}
