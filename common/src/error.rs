use thiserror::Error;

/// Error taxonomy shared by every component. Each variant carries the
/// retry/HTTP-status semantics described in the error handling design;
/// callers translate transport-level failures into one of these kinds
/// before the error crosses a component boundary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP-status-style code per the error handling design, even though the
    /// HTTP surface itself is out of scope for this crate.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Auth(_) => 401,
            AppError::NotFound(_) => 404,
            AppError::RateLimited(_) => 429,
            AppError::Timeout(_) => 504,
            AppError::Unavailable(_) => 503,
            AppError::Database(_)
            | AppError::Http(_)
            | AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::Config(_)
            | AppError::Anyhow(_)
            | AppError::Internal(_) => 500,
        }
    }

    /// `true` when the error taxonomy calls for exponential-backoff retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimited(_) | AppError::Timeout(_))
    }

    /// A `{title, message, suggestion}` triple suitable for UI display.
    pub fn user_facing(&self) -> UserFacingError {
        match self {
            AppError::Validation(msg) => UserFacingError {
                title: "Invalid request".into(),
                message: msg.clone(),
                suggestion: "Check the request and try again.".into(),
            },
            AppError::Auth(_) => UserFacingError {
                title: "Not authorized".into(),
                message: "You are not authorized to perform this action.".into(),
                suggestion: "Sign in again or contact an administrator.".into(),
            },
            AppError::NotFound(msg) => UserFacingError {
                title: "Not found".into(),
                message: msg.clone(),
                suggestion: "Verify the identifier and try again.".into(),
            },
            AppError::RateLimited(_) => UserFacingError {
                title: "Too many requests".into(),
                message: "The upstream service is rate limiting requests.".into(),
                suggestion: "Wait a moment and try again.".into(),
            },
            AppError::Timeout(_) => UserFacingError {
                title: "Timed out".into(),
                message: "The request took too long to complete.".into(),
                suggestion: "Try again; if it persists, narrow the query.".into(),
            },
            AppError::Unavailable(_) => UserFacingError {
                title: "Temporarily unavailable".into(),
                message: "A dependency is currently unavailable.".into(),
                suggestion: "Please retry shortly.".into(),
            },
            _ => UserFacingError {
                title: "Something went wrong".into(),
                message: "An unexpected error occurred.".into(),
                suggestion: "Please try again later.".into(),
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserFacingError {
    pub title: String,
    pub message: String,
    pub suggestion: String,
}
