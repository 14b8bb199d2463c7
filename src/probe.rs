//! Finding out whether a port is the device we are looking for.
//!
//! A probe opens the port, optionally writes a stimulus, and then waits for
//! a line the classifier accepts. Whichever happens first of a matching line,
//! a port error or the timeout decides the outcome.

use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace, warn};

use crate::transport::{Port, PortCandidate, PortEvent, Transport};

/// Decides whether a line read from a port identifies the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classifier {
    /// The trimmed line must be exactly this.
    Exact(String),

    /// The trimmed line must contain this.
    Contains(String),
}

impl Classifier {
    /// Check a line.
    pub fn matches(&self, line: &str) -> bool {
        let line = line.trim();

        match self {
            Classifier::Exact(expected) => line == expected,
            Classifier::Contains(needle) => line.contains(needle.as_str()),
        }
    }

    pub(crate) fn pattern(&self) -> &str {
        match self {
            Classifier::Exact(pattern) | Classifier::Contains(pattern) => pattern,
        }
    }
}

impl Display for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classifier::Exact(expected) => write!(f, "exactly `{expected}`"),
            Classifier::Contains(needle) => write!(f, "containing `{needle}`"),
        }
    }
}

/// How to probe for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    /// Written right after opening, if any.
    pub stimulus: Option<String>,

    /// Which line identifies the device.
    pub classifier: Classifier,

    /// How long to wait for an identifying line.
    pub timeout: Duration,

    /// The baud rate to open ports with.
    pub baud: u32,
}

/// How probing a port went.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The port is the device.
    /// It is left open.
    Accepted(Port),

    /// The port closed before anything identified it.
    Rejected,

    /// Nothing identified the port in time.
    TimedOut,

    /// Opening, writing or reading failed.
    Errored(String),
}

impl ProbeOutcome {
    /// Whether the port was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

impl Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Accepted(port) => write!(f, "accepted {}", port.handle.path()),
            ProbeOutcome::Rejected => write!(f, "rejected"),
            ProbeOutcome::TimedOut => write!(f, "timed out"),
            ProbeOutcome::Errored(problem) => write!(f, "errored: {problem}"),
        }
    }
}

/// Why the race ended without a match.
enum Lost {
    Errored(String),
    Rejected,
}

/// Probe a single candidate.
///
/// Any port not accepted is released before this returns.
pub async fn probe<T>(transport: &T, candidate: &PortCandidate, spec: &ProbeSpec) -> ProbeOutcome
where
    T: Transport + ?Sized,
{
    let Port { handle, mut events } = match transport.open(&candidate.path, spec.baud) {
        Ok(port) => port,
        Err(e) => {
            debug!(%candidate, %e, "Could not open");
            return ProbeOutcome::Errored(e.to_string());
        }
    };

    let race = async {
        if let Some(stimulus) = &spec.stimulus {
            trace!(%stimulus, "Writing stimulus");
            handle
                .write(stimulus.as_bytes())
                .await
                .map_err(|e| Lost::Errored(format!("Writing stimulus failed: {e}")))?;
        }

        loop {
            let event = events.recv().await;
            if let Ok(event) = &event {
                trace!(%event, classifier = %spec.classifier, "Probing");
            }

            match event {
                Ok(PortEvent::Line(line)) => {
                    if spec.classifier.matches(&line) {
                        return Ok(());
                    }
                }
                Ok(PortEvent::Error(problem)) => return Err(Lost::Errored(problem)),
                Ok(PortEvent::Closed) | Err(RecvError::Closed) => return Err(Lost::Rejected),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%skipped, "Probe lagging behind port");
                }
            }
        }
    };

    let result = tokio::time::timeout(spec.timeout, race).await;

    let outcome = match result {
        Ok(Ok(())) => return ProbeOutcome::Accepted(Port { handle, events }),
        Ok(Err(Lost::Errored(problem))) => ProbeOutcome::Errored(problem),
        Ok(Err(Lost::Rejected)) => ProbeOutcome::Rejected,
        Err(_elapsed) => ProbeOutcome::TimedOut,
    };

    handle.close().await;

    outcome
}
