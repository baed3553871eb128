//! Cloud connector error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CloudError>;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("config error: {0}")]
    Config(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid event {event}: {reason}")]
    InvalidEvent { event: String, reason: String },

    #[error("emit failed: {0}")]
    Emit(String),

    #[error("client already started")]
    AlreadyStarted,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for CloudError {
    fn from(e: toml::de::Error) -> Self {
        CloudError::Config(e.to_string())
    }
}
