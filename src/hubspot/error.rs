// ABOUTME: Error taxonomy for fetching from the CRM source
// ABOUTME: Separates fatal authorization failures from interruptions that keep partial results

use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Credentials were rejected. Retrying without new credentials is pointless.
    #[error("authorization failed (HTTP {status}): {body}")]
    Unauthorized { status: StatusCode, body: String },

    #[error("rate limited: gave up after {attempts} attempts and {waited:?} of backoff")]
    RateLimited { attempts: u32, waited: Duration },

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl FetchError {
    /// Fatal errors abort the fetch without returning accumulated records.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Unauthorized { .. })
    }

    /// Whether running again later, with the same credentials, may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Unauthorized { .. } => false,
            FetchError::RateLimited { .. } => true,
            FetchError::Http { status, .. } => status.is_server_error(),
            FetchError::Request(e) => e.is_timeout() || e.is_connect(),
        }
    }
}
