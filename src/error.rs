//! Error types for tunwarp

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunwarpError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Flag not present in the argument schema
    #[error("Unknown flag: -{0}")]
    UnknownFlag(String),
    /// String or integer flag given without a value
    #[error("Flag needs an argument: -{0}")]
    MissingValue(String),
    /// Flag value failed to parse or validate
    #[error("Invalid value {value:?} for flag -{flag}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },
    /// `-h` / `-help` was given; carries the usage text
    #[error("{0}")]
    HelpRequested(String),
    /// Working directory could not be entered
    #[error("Cannot change to working directory {path:?}: {source}")]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Standard stream capture or logger installation failed
    #[error("Log capture error: {0}")]
    LogCapture(String),
    /// Signal handler registration failed
    #[error("Signal handler error: {0}")]
    SignalSetup(String),
    /// A session is already live on this supervisor
    #[error("Session already running: {0}")]
    AlreadyRunning(String),
    /// Tunnel or forwarding engine failure
    #[error("Engine error: {0}")]
    Engine(String),
}

impl TunwarpError {
    /// Whether this error aborts session startup (as opposed to being
    /// logged while a session keeps running)
    pub fn is_startup_fatal(&self) -> bool {
        !matches!(self, TunwarpError::Engine(_))
    }
}

pub type TunwarpResult<T> = Result<T, TunwarpError>;
