use std::io;

use thiserror::Error;

/// Problems with an open (or opening) port.
#[derive(Debug, Error)]
pub enum PortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// The port could not be opened.
    #[error("Could not open port at {path}, problem: {problem}")]
    Open {
        /// The path of the port.
        path: String,

        /// What went wrong.
        problem: String,
    },

    /// The port is closed, so the request could not be handled.
    #[error("Port is closed")]
    Closed,
}
