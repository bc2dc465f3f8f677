use genfeed_core::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Session is not authenticated")]
    Unauthorized,

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("No baseUrl configured")]
    MissingBaseUrl,

    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Http(err)
        }
    }
}

impl ClientError {
    /// The session must be re-established before retrying.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Unauthorized)
    }

    /// Network-level failures that are worth retrying silently.
    pub fn is_transport(&self) -> bool {
        match self {
            ClientError::Http(_) | ClientError::Timeout => true,
            ClientError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
