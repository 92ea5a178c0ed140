use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The envelope arrived but reported `success: false`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// A path segment that would escape or collapse the intended resource path.
    #[error("Invalid path segment: {0:?}")]
    InvalidPath(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The background task driving a fetch died before producing a result.
    #[error("Request task aborted: {0}")]
    Aborted(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 => ApiError::BadRequest(truncated),
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Whether repeating the same request could plausibly succeed.
    ///
    /// Client errors and application-level rejections are answered the same
    /// way every time, so the cache layer does not retry them.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ApiError::AccessDenied(_)
                | ApiError::Unauthorized
                | ApiError::BadRequest(_)
                | ApiError::NotFound(_)
                | ApiError::Rejected(_)
                | ApiError::InvalidUrl(_)
                | ApiError::InvalidPath(_)
        )
    }
}
