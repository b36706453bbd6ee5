//! Error types for the autotrack runtime.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("failed to serialize state: {0}")] Serialize(String),
    #[error("failed to deserialize state: {0}")] Deserialize(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store state must be an object, got {0}")] NotAnObject(String),
    #[error("bundled method collides with store action: {0}")] ActionCollision(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")] InvalidValue { key: String, value: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AutotrackError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Config(#[from] ConfigError),
}
