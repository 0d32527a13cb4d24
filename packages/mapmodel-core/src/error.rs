//! Error types for the acquisition pipeline.

use serde::Serialize;
use thiserror::Error;

/// Failure of a single upstream attempt, or of a whole fetch once retries
/// are exhausted. `Clone` so a de-duplicated call can hand the same outcome
/// to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("{endpoint}: HTTP {status}")]
    Http { endpoint: String, status: u16 },

    #[error("{endpoint}: timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("{endpoint}: request failed: {message}")]
    Network { endpoint: String, message: String },

    #[error("{endpoint}: invalid response body: {message}")]
    Parse { endpoint: String, message: String },

    #[error("no upstream endpoints configured")]
    NoEndpoints,

    #[error("upstream task aborted: {0}")]
    Aborted(String),
}

impl UpstreamError {
    /// Status code used for retry classification. Timeouts count as 504;
    /// network-level failures carry no status.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Http { status, .. } => Some(*status),
            UpstreamError::Timeout { .. } => Some(504),
            UpstreamError::Network { .. }
            | UpstreamError::Parse { .. }
            | UpstreamError::Aborted(_) => None,
            UpstreamError::NoEndpoints => Some(500),
        }
    }
}

/// Errors surfaced by the pipeline to its caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("{0}")]
    Validation(String),

    #[error("rate limited by upstream provider: {0}")]
    RateLimited(UpstreamError),

    #[error("upstream provider timeout: {0}")]
    Timeout(UpstreamError),

    #[error("upstream provider unavailable: {0}")]
    ProviderUnavailable(UpstreamError),

    #[error("upstream provider rejected the query: {0}")]
    Upstream(UpstreamError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ModelError {
    pub fn validation(message: impl Into<String>) -> Self {
        ModelError::Validation(message.into())
    }

    /// HTTP status the endpoint should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ModelError::Validation(_) => 400,
            ModelError::RateLimited(_) => 429,
            ModelError::Timeout(_) => 504,
            ModelError::ProviderUnavailable(_) => 503,
            ModelError::Upstream(_) => 502,
            ModelError::Internal(_) => 500,
        }
    }

    /// Short label for the error body.
    pub fn label(&self) -> &'static str {
        match self {
            ModelError::Validation(_) => "invalid request",
            ModelError::RateLimited(_) => "rate limited",
            ModelError::Timeout(_) => "timeout",
            ModelError::ProviderUnavailable(_) => "provider unavailable",
            ModelError::Upstream(_) => "upstream error",
            ModelError::Internal(_) => "internal error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: match self {
                ModelError::Validation(message) => message.clone(),
                _ => self.label().to_string(),
            },
            status: self.status_code(),
        }
    }
}

/// JSON error payload returned by the model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}

impl From<UpstreamError> for ModelError {
    fn from(err: UpstreamError) -> Self {
        match err.status() {
            Some(429) => ModelError::RateLimited(err),
            Some(504) => ModelError::Timeout(err),
            Some(status) if (400..500).contains(&status) => ModelError::Upstream(err),
            _ => ModelError::ProviderUnavailable(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_map_to_endpoint_statuses() {
        let http = |status| UpstreamError::Http {
            endpoint: "https://a".into(),
            status,
        };
        assert_eq!(ModelError::from(http(429)).status_code(), 429);
        assert_eq!(ModelError::from(http(503)).status_code(), 503);
        assert_eq!(ModelError::from(http(400)).status_code(), 502);

        let timeout = UpstreamError::Timeout {
            endpoint: "https://a".into(),
            timeout_ms: 10,
        };
        assert_eq!(ModelError::from(timeout).label(), "timeout");

        let network = UpstreamError::Network {
            endpoint: "https://a".into(),
            message: "connection reset".into(),
        };
        assert_eq!(network.status(), None);
        assert_eq!(ModelError::from(network).status_code(), 503);
    }

    #[test]
    fn error_body_carries_label_or_validation_message() {
        let body = ModelError::validation("scale must be a positive number").body();
        assert_eq!(body.status, 400);
        assert_eq!(body.error, "scale must be a positive number");

        let limited = ModelError::from(UpstreamError::Http {
            endpoint: "https://a".into(),
            status: 429,
        });
        assert_eq!(
            serde_json::to_value(limited.body()).unwrap(),
            serde_json::json!({"error": "rate limited", "status": 429})
        );

        let crashed = ModelError::Internal("task panicked".into()).body();
        assert_eq!(crashed.status, 500);
        assert_eq!(crashed.error, "internal error");
    }
}
