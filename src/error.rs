use std::time::Duration;

/// Failures surfaced to callers of the snapshot loader and scan commands.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Scan did not finish within {0:?}")]
    ProtocolTimeout(Duration),

    #[error("Invalid scan interval: {0} minutes")]
    InvalidInterval(u32),

    #[error("Preference store error: {0}")]
    Preference(#[from] PreferenceError),

    #[error("Engine stopped")]
    Stopped,
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EngineError::Decode(err.to_string())
        } else {
            EngineError::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

/// A stream frame that could not be decoded. Never leaves the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum FrameParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unrecognised value for {field}: {value}")]
    BadValue { field: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Preference store lock poisoned")]
    Poisoned,
}

pub type EngineResult<T> = Result<T, EngineError>;
