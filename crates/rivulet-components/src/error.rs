//! Run-time error taxonomy of components and the result codes it maps to.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transform::TransformError;

#[derive(Debug, Error)]
pub enum ComponentError {
    /// Missing ports, schema mismatch, malformed attributes. Raised by `init`.
    #[error("configuration error: {0}")]
    Config(String),

    /// Recoverable failure while running. Outputs are closed with EOF.
    #[error("I/O error: {0}")]
    Io(String),

    /// Sorted input that is not sorted.
    #[error("{0}")]
    OutOfOrder(String),

    /// A user transform reported failure; carries its message.
    #[error("transform failed: {0}")]
    Transform(String),

    /// Logic error. Outputs are left open unless configured otherwise.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The graph was cancelled while this component was running.
    #[error("stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, ComponentError>;

impl ComponentError {
    pub fn config(msg: impl fmt::Display) -> Self {
        ComponentError::Config(msg.to_string())
    }

    pub fn fatal(msg: impl fmt::Display) -> Self {
        ComponentError::Fatal(msg.to_string())
    }

    pub fn result_code(&self) -> ResultCode {
        match self {
            ComponentError::Config(_) | ComponentError::Io(_) | ComponentError::Transform(_) => {
                ResultCode::Error
            }
            ComponentError::OutOfOrder(_) | ComponentError::Fatal(_) => ResultCode::FatalError,
            ComponentError::Stopped => ResultCode::Stopped,
        }
    }
}

impl From<rivulet_core::error::Error> for ComponentError {
    fn from(e: rivulet_core::error::Error) -> Self {
        match e {
            rivulet_core::error::Error::Invariant(msg) => ComponentError::Fatal(msg),
            other => ComponentError::Io(other.to_string()),
        }
    }
}

impl From<rivulet_mem::error::Error> for ComponentError {
    fn from(e: rivulet_mem::error::Error) -> Self {
        match e {
            rivulet_mem::error::Error::ChecksumMismatch(seg) => {
                ComponentError::Fatal(format!("spilled segment '{seg}' is corrupt"))
            }
            other => ComponentError::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ComponentError {
    fn from(e: std::io::Error) -> Self {
        ComponentError::Io(e.to_string())
    }
}

impl From<TransformError> for ComponentError {
    fn from(e: TransformError) -> Self {
        ComponentError::Transform(e.to_string())
    }
}

/// Terminal state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    NotRun,
    Ok,
    Stopped,
    Error,
    FatalError,
}

impl ResultCode {
    /// Higher is worse. Used to aggregate a graph's status.
    pub fn severity(self) -> u8 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::NotRun => 1,
            ResultCode::Stopped => 2,
            ResultCode::Error => 3,
            ResultCode::FatalError => 4,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultCode::NotRun => "NOT_RUN",
            ResultCode::Ok => "OK",
            ResultCode::Stopped => "STOPPED",
            ResultCode::Error => "ERROR",
            ResultCode::FatalError => "FATAL_ERROR",
        })
    }
}
