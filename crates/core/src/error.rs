use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("malformed override map: {0}")]
    MalformedOverrideMap(String),

    #[error("invalid property path: {0}")]
    InvalidPropertyPath(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
