use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("API error: {0}")]
    Api(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
