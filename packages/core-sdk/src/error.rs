use thiserror::Error;

/**
 * \brief Errors raised by the AI client, sanitizer and JSON extraction.
 * \details Every variant except `AllBackendsFailed` and `InvalidRequest` is a
 * per-backend failure that advances the fallback chain.
 */
#[derive(Debug, Error)]
pub enum AiError {
    /// Reachability probe failed or the TCP connection was refused.
    #[error("backend {backend} unreachable at {endpoint}: {reason}")]
    Unreachable {
        backend: String,
        endpoint: String,
        reason: String,
    },

    #[error("backend {backend} timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u128 },

    #[error("backend {backend} returned HTTP {status}: {body}")]
    Http {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("backend {backend} has no API key configured")]
    MissingCredential { backend: String },

    #[error("backend {backend} sent a malformed response: {reason}")]
    MalformedResponse { backend: String, reason: String },

    #[error("backend {backend} request failed: {reason}")]
    Request { backend: String, reason: String },

    #[error("invalid chat request: {0}")]
    InvalidRequest(String),

    #[error("model output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Every backend in the order failed; carries the last cause.
    #[error("all AI backends failed (tried: {}); last error: {source}", attempted.join(", "))]
    AllBackendsFailed {
        attempted: Vec<String>,
        #[source]
        source: Box<AiError>,
    },
}

impl AiError {
    /**
     * \brief Whether the error belongs to a single backend attempt.
     */
    pub fn is_backend_failure(&self) -> bool {
        !matches!(
            self,
            AiError::InvalidRequest(_) | AiError::Json(_) | AiError::AllBackendsFailed { .. }
        )
    }

    /**
     * \brief The innermost backend error, for callers that report causes.
     */
    pub fn last_cause(&self) -> &AiError {
        match self {
            AiError::AllBackendsFailed { source, .. } => source.last_cause(),
            other => other,
        }
    }
}
