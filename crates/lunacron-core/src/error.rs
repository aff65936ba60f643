use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown lunar phase: {0}")]
    UnknownPhase(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
