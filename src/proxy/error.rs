use std::io;
use thiserror::Error;

use crate::ports::{MAX_PORT, MIN_PORT};

/// Errors from validating a port pair before any engine is involved
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Port {0} is out of range, ports must be between {min}-{max}", min = MIN_PORT, max = MAX_PORT)]
    InvalidPort(i64),

    #[error("External and internal port must not be the same (both {0})")]
    PortCollision(u16),

    #[error("Port {0} is not available, please select a different port")]
    PortUnavailable(u16),
}

/// Errors reported by a proxy engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Proxy engine program not found: {program}")]
    ProgramNotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("Failed to launch proxy engine {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Proxy engine exited immediately with status: {0}")]
    ExitedEarly(i32),

    #[error("Proxy engine I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("Proxy engine failed to start: {0}")]
    EngineStartFailed(#[source] EngineError),

    #[error("A proxy is already running")]
    AlreadyRunning,

    #[error("The proxy controller has been closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("Proxy engine failed to stop cleanly: {0}")]
    EngineStopFailed(#[source] EngineError),
}
