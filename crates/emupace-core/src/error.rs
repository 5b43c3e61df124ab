use thiserror::Error;

/// Errors surfaced by the pacing core.
#[derive(Debug, Error)]
pub enum PaceError {
    #[error("invalid frame rate: {0}")]
    InvalidFrameRate(String),
    #[error("failed to spawn emulation thread: {0}")]
    TaskSpawn(#[source] std::io::Error),
    #[error("emulation task is not running")]
    TaskStopped,
    #[error("emulation thread panicked")]
    TaskPanicked,
}

pub type Result<T> = std::result::Result<T, PaceError>;
