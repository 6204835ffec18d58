use thiserror::Error;

#[derive(Error, Debug)]
pub enum PennyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Suggestion service error: {0}")]
    Suggestion(String),

    #[error("No usable content extracted from {0}")]
    EmptyExtraction(String),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PennyError>;
