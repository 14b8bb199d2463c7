use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::supervisor::Role;

/// Errors thay may occur in this library.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// The device of this role is not bound right now.
    #[error("The {0} is not connected or not ready")]
    NotReady(Role),

    /// Writing to the device failed.
    #[error("Writing to the device failed. Problem: {0}")]
    WriteFailed(String),

    /// Not a command the relay knows.
    #[error("The command `{0}` is not valid, use `on` or `off`")]
    InvalidCommand(String),

    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// Reading files and the like.
    #[error("IO problem: {0}")]
    Io(String),

    /// Bad json.
    #[error("JSON could not be (de)serialized. Problem: {0}")]
    Json(String),
}

impl Error {
    /// The message of a bad configuration, if this is one.
    pub fn try_into_bad_config(self) -> Option<String> {
        match self {
            Error::BadConfig(problem) => Some(problem),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}
