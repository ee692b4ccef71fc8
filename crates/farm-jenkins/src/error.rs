use farm_core::error::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JenkinsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid Jenkins URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Jenkins rejected the credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Jenkins returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl JenkinsError {
    /// Timeouts, connection failures, throttling and server errors are
    /// worth retrying; everything else needs intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            JenkinsError::Request(e) => e.is_timeout() || e.is_connect(),
            JenkinsError::Status { status, .. } => *status >= 500 || *status == 429,
            JenkinsError::Url(_) | JenkinsError::Unauthorized(_) | JenkinsError::NotFound(_) => {
                false
            }
        }
    }
}

impl From<JenkinsError> for BackendError {
    fn from(err: JenkinsError) -> Self {
        if err.is_transient() {
            BackendError::transient(err.to_string())
        } else {
            BackendError::fatal(err.to_string())
        }
    }
}
