use std::path::PathBuf;
use thiserror::Error;

/// Failure to materialise the payload into its working directory
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Payload artifact not found: {0}")]
    MissingArtifact(PathBuf),

    #[error("Invalid artifact name: {0:?}")]
    InvalidArtifactName(String),

    #[error("Failed to create staging directory: {0}")]
    CreateDirectory(#[source] std::io::Error),

    #[error("Failed to copy artifact {artifact}: {source}")]
    Copy {
        artifact: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error types for platform process operations
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Core error types for supervisor operations
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("A supervised process is already running")]
    AlreadyRunning,

    #[error("Failed to start process: {0}")]
    Spawn(#[from] ProcessError),

    #[error("No arguments supplied and no default arguments configured")]
    MissingArguments,

    #[error("Configuration error: {0}")]
    Configuration(String),
}
