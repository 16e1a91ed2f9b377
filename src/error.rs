use thiserror::Error;

/// Service-level errors. The API layer owns the mapping to HTTP statuses;
/// everything below it speaks in these terms (or in `anyhow` for
/// infrastructure failures, which surface as `Internal`).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}
