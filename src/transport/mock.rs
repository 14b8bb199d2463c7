//! Mock ports.
//! Each open spawns a driver for an in-memory device,
//! which behaves like a serial port from the outside.
//!
//! Useful for testing acquisition logic without the actual devices-
//! faster and more reliable.

use super::{Port, PortCandidate, Transport};
use crate::{mock::MockTransport, serial::error::PortError};

impl Transport for MockTransport {
    fn list(&self) -> Result<Vec<PortCandidate>, PortError> {
        self.listing()
    }

    fn open(&self, path: &str, _baud: u32) -> Result<Port, PortError> {
        self.open_device(path)
    }
}
