//! Error taxonomy shared by every layer.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Whether a remote failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// A single failed call to the remote LLM endpoint, already classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::transient(format!("attempt timed out after {:.1}s", after.as_secs_f64()))
    }

    /// Classify an HTTP status returned by the remote service.
    ///
    /// 408, 429 and 5xx are retried; auth failures, malformed requests and
    /// content-policy rejections (every other 4xx) are not.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            408 | 429 => FailureKind::Transient,
            500..=599 => FailureKind::Transient,
            _ => FailureKind::Permanent,
        };
        let reason = match status {
            401 | 403 => "authentication failed",
            408 => "remote request timeout",
            429 => "rate limited",
            400 | 422 => "request rejected",
            500..=599 => "server error",
            _ => "unexpected status",
        };
        let body = body.trim();
        let message = if body.is_empty() {
            format!("{} (HTTP {})", reason, status)
        } else {
            format!("{} (HTTP {}): {}", reason, status, truncate(body, 300))
        };
        Self {
            kind,
            status: Some(status),
            message,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Errors that cross layer boundaries and reach the user.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Blocked by content policy: {reason}")]
    GuardrailRejected { reason: String },

    #[error("Remote service unavailable after {attempts} attempt(s): {cause}")]
    RemoteUnavailable {
        attempts: u32,
        #[source]
        cause: RemoteFailure,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalyzerError {
    /// The underlying remote failure, if this error came from the API client.
    pub fn remote_cause(&self) -> Option<&RemoteFailure> {
        match self {
            AnalyzerError::RemoteUnavailable { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
