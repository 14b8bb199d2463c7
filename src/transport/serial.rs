//! Ports as found on the host.

use super::{Port, PortCandidate, Transport};
use crate::serial::{error::PortError, serial_port::SerialPortBuilder};

/// The host's serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialTransport;

impl Transport for SerialTransport {
    fn list(&self) -> Result<Vec<PortCandidate>, PortError> {
        let available = serialport::available_ports().map_err(|e| PortError::Open {
            path: "(listing)".into(),
            problem: e.to_string(),
        })?;

        Ok(available
            .into_iter()
            .map(|info| PortCandidate {
                path: info.port_name,
                kind: info.port_type,
            })
            .collect())
    }

    fn open(&self, path: &str, baud: u32) -> Result<Port, PortError> {
        SerialPortBuilder::new(path, baud).build()
    }
}
