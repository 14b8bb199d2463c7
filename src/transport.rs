use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::serial::{error::PortError, SerialMessageBytes};

pub(crate) mod mock;
pub(crate) mod serial;

pub use serial::SerialTransport;

/// How many events a port buffers for slow subscribers.
pub(crate) const EVENT_CAPACITY: usize = 1024;

/// What kind of port a candidate is, as reported by the platform.
/// Not used for classification, only for showing to users.
pub type CandidateKind = serialport::SerialPortType;

/// A port which might be one of the devices we look for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCandidate {
    /// The path to the port.
    /// Likely "/dev/ttyUSBx" or "/dev/ttyACMx".
    pub path: String,

    /// Platform information about the port.
    pub kind: CandidateKind,
}

impl PortCandidate {
    /// A candidate with no known platform information.
    pub fn new(path: &str) -> Self {
        Self {
            path: path.into(),
            kind: CandidateKind::Unknown,
        }
    }
}

impl Display for PortCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            CandidateKind::UsbPort(usb) => {
                write!(f, "{} (usb {:04x}:{:04x}", self.path, usb.vid, usb.pid)?;
                if let Some(product) = &usb.product {
                    write!(f, ", {product}")?;
                }
                write!(f, ")")
            }
            CandidateKind::PciPort => write!(f, "{} (pci)", self.path),
            CandidateKind::BluetoothPort => write!(f, "{} (bluetooth)", self.path),
            CandidateKind::Unknown => write!(f, "{}", self.path),
        }
    }
}

/// Something happened on an open port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A line was read from wire.
    /// The line delimiter is not included.
    Line(String),

    /// The port reported an error.
    Error(String),

    /// The port is closed.
    /// No more events follow.
    Closed,
}

impl Display for PortEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortEvent::Line(line) => {
                let line = line.chars().take(48).collect::<String>();
                write!(f, "line: {}", line.trim())
            }
            PortEvent::Error(problem) => write!(f, "error: {problem}"),
            PortEvent::Closed => write!(f, "closed"),
        }
    }
}

/// Requests a port driver handles.
#[derive(Debug)]
pub(crate) enum PortRequest {
    /// Put these bytes on the wire, then report how it went.
    Write {
        bytes: SerialMessageBytes,
        done: oneshot::Sender<Result<(), PortError>>,
    },

    /// Release the port, then report back.
    Close { done: oneshot::Sender<()> },
}

/// A handle to an open port.
///
/// The port itself is owned by a driver task.
/// Cloning the handle does not open the port again.
#[derive(Debug, Clone)]
pub struct PortHandle {
    path: String,
    requests: mpsc::UnboundedSender<PortRequest>,
}

impl PortHandle {
    pub(crate) fn new(path: &str, requests: mpsc::UnboundedSender<PortRequest>) -> Self {
        Self {
            path: path.into(),
            requests,
        }
    }

    /// The path of the port.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Put bytes on the wire.
    /// Resolves when the driver has written them.
    pub async fn write<B: Into<SerialMessageBytes>>(&self, bytes: B) -> Result<(), PortError> {
        let (done, written) = oneshot::channel();

        self.requests
            .send(PortRequest::Write {
                bytes: bytes.into(),
                done,
            })
            .map_err(|_| PortError::Closed)?;

        written.await.map_err(|_| PortError::Closed)?
    }

    /// Close the port.
    /// Resolves when the driver has released it.
    /// Closing an already closed port does nothing.
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();

        if self.requests.send(PortRequest::Close { done }).is_ok() {
            // An error here means the driver stopped on its own.
            let _ = closed.await;
        }

        debug!(path = %self.path, "Port released");
    }

    /// Whether the driver is still running.
    pub fn is_open(&self) -> bool {
        !self.requests.is_closed()
    }
}

/// A freshly opened port.
///
/// The subscription is created at open time, so nothing the port
/// reads is lost before someone starts listening.
#[derive(Debug)]
pub struct Port {
    /// The handle used to write to and close the port.
    pub handle: PortHandle,

    /// Events from the port, starting from when it was opened.
    pub events: broadcast::Receiver<PortEvent>,
}

/// The means of finding and opening ports.
pub trait Transport: Send + Sync + 'static {
    /// List the ports the host knows about.
    fn list(&self) -> Result<Vec<PortCandidate>, PortError>;

    /// Open the port at the given path.
    fn open(&self, path: &str, baud: u32) -> Result<Port, PortError>;
}

/// Ports which look like serial devices we could be interested in.
///
/// A port is kept if its path starts with any of the prefixes.
/// Never fails: problems listing ports mean no candidates this time.
pub fn candidates<T, S>(transport: &T, prefixes: &[S]) -> Vec<PortCandidate>
where
    T: Transport + ?Sized,
    S: AsRef<str>,
{
    let listed = match transport.list() {
        Ok(listed) => listed,
        Err(e) => {
            warn!(%e, "Could not list serial ports");
            return vec![];
        }
    };

    listed
        .into_iter()
        .filter(|candidate| {
            prefixes
                .iter()
                .any(|prefix| candidate.path.starts_with(prefix.as_ref()))
        })
        .unique_by(|candidate| candidate.path.clone())
        .collect()
}
