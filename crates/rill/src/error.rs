//! Error types.

use thiserror::Error;

/// Errors that can occur when making chat completion calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },

    /// Provider payload was structurally invalid
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let api = LlmError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(api.to_string(), "api error (status 500): boom");

        let limited = LlmError::RateLimit {
            retry_after: Some(30),
        };
        assert!(limited.to_string().contains("30"));

        let malformed = LlmError::Malformed("no choices".to_string());
        assert_eq!(
            malformed.to_string(),
            "malformed provider response: no choices"
        );
    }
}
