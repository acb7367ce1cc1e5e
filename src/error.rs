use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("signal unavailable: {0}")]
    SignalUnavailable(String),
    #[error("source frame not ready")]
    FrameNotReady,
    #[error("a tracking session is already active")]
    SessionActive,
    #[error("tracking session closed")]
    SessionClosed,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
