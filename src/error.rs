use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid media id: {0}")]
    Validation(String),

    #[error("No stream available: {last_reason}")]
    ResolutionExhausted { last_reason: String },

    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {status} - {message}")]
    Upstream { status: u16, message: String },

    #[error("Relay error: {status} - {message}")]
    Relay { status: u16, message: String },

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Playback session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AppError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl AppError {
    pub fn kind(&self) -> &str {
        match self {
            AppError::Http(_) => "http",
            AppError::Json(_) => "json",
            AppError::Validation(_) => "validation",
            AppError::ResolutionExhausted { .. } => "resolution_exhausted",
            AppError::RateLimited(_) => "rate_limited",
            AppError::NotFound(_) => "not_found",
            AppError::Upstream { .. } => "upstream",
            AppError::Relay { .. } => "relay",
            AppError::Audio(_) => "audio",
            AppError::Decode(_) => "decode",
            AppError::Config(_) => "config",
            AppError::SessionClosed => "session_closed",
            AppError::Io(_) => "io",
        }
    }

    /// Message suitable for the session's published error state.
    pub fn user_message(&self) -> String {
        match self {
            AppError::RateLimited(_) => "Upstream is throttling requests. Try again later.".into(),
            AppError::ResolutionExhausted { .. } => "No stream available".into(),
            AppError::NotFound(_) => "Track is unavailable".into(),
            other => other.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
