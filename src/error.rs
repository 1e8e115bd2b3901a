use thiserror::Error;

/// Failure kinds surfaced by the feed and its repositories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Bad input to an operation.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Identity required but absent or denied.
    #[error("Not authorized: {0}")]
    Auth(String),

    /// The referenced note id is unknown.
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Network or service failure.
    #[error("Transport failure: {0}")]
    Transport(String),
}

pub type FeedResult<T> = Result<T, FeedError>;

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Transport(err.to_string())
    }
}
