use thiserror::Error;

/// Internal fault reported by the numerical engine. The cycle that hit it is
/// treated as a no-op and retried on the next tick.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("engine fault: {message}")]
pub struct EngineFault {
    pub message: String,
}

impl EngineFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineFault>;

/// The trackable backend refused to materialize a tracking point.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("trackable creation failed: {0}")]
    CreationFailed(String),

    #[error("backend unavailable")]
    Unavailable,

    #[error("anchor ids exhausted")]
    IdsExhausted,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure reading or writing a serialization stream record.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed record: {0}")]
    Format(String),

    #[error("record not fully received")]
    NotReady,

    #[error(transparent)]
    Engine(#[from] EngineFault),
}

/// Failure importing a JSON session export.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported export version {0}")]
    UnsupportedVersion(String),

    #[error("invalid export: {0}")]
    Invalid(String),
}
