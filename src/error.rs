//! Error types for manipulator coordination

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManipError>;

#[derive(Error, Debug)]
pub enum ManipError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("A trajectory is already streaming on this arm")]
    AlreadyStreaming,

    #[error("An actuation is already outstanding on this gripper")]
    AlreadyActuating,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Tokio task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
