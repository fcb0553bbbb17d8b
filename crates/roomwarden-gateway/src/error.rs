//! Gateway failure taxonomy.

use std::time::Duration;

use thiserror::Error;

/// A platform call that did not succeed.
///
/// Every variant is treated as transient by the reconciler: the record is
/// left untouched and retried next cycle.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure, timeout, or 5xx.
    #[error("transient gateway failure: {0}")]
    Transient(String),

    /// Still rate limited after retries.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Duration },

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Token rejected or missing permission (401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The platform answered with something we could not parse.
    #[error("decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => GatewayError::Unauthorized(body),
            500..=599 => GatewayError::Transient(format!("HTTP {status}: {body}")),
            _ => GatewayError::Http { status, body },
        }
    }

    /// Whether retrying the same call later is likely to help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient(_) | GatewayError::RateLimited { .. }
        )
    }
}
