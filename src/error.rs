use thiserror::Error;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("rejected request: {0}")]
    InvalidRequest(String),
    #[error("insufficient data: needed {needed} samples, {available} available")]
    InsufficientData { needed: usize, available: usize },
}
