use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Invalid arguments for job {job}: {reason}")]
    InvalidJobArgs { job: String, reason: String },

    #[error("Connecting ants requires at least two ants, got {count}")]
    NotEnoughAnts { count: usize },

    #[error("Daemon binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("Daemon binary {} is not a dev build (version output: {output:?})", .binary.display())]
    WrongBuild { binary: PathBuf, output: String },

    #[error("Daemon exited before its API became reachable: {status}")]
    DaemonExited { status: String },

    #[error("Daemon API at {addr} not reachable after {timeout:?}")]
    ReadinessTimeout { addr: String, timeout: Duration },

    #[error("Failed to start ant {index}: {source}")]
    AntStart {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Task group is stopped")]
    Stopped,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Wrap a startup failure with the index of the ant that caused it.
    pub fn for_ant(self, index: usize) -> Self {
        Error::AntStart {
            index,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
