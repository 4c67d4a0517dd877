//! Error type for the fallible edges of the crate.
//!
//! Filtering, aggregation, export and classification never fail: they degrade
//! to safe defaults. Only I/O, settings, HTTP and explicit validation return
//! [`EngineError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid date bound for `{field}`: {value:?}")]
    InvalidDateBound { field: String, value: String },

    #[error("cannot move a return from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("settings schema version {0} is newer than this build supports")]
    UnsupportedSettingsVersion(u64),

    #[error("could not open print view: {0}")]
    Browser(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => EngineError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => EngineError::Transport(e.to_string()),
        }
    }
}

impl From<csv::IntoInnerError<csv::Writer<Vec<u8>>>> for EngineError {
    fn from(e: csv::IntoInnerError<csv::Writer<Vec<u8>>>) -> Self {
        EngineError::Io(e.into_error())
    }
}
