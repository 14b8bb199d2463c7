#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Code relating to setting up the HTTP server in front of the gateway.
pub mod server;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// Serial port driver.
pub mod serial;

/// Finding and opening ports.
/// Either real serial ports, or mocked ones.
pub mod transport;

/// Mocked serial devices.
pub mod mock;

/// Checking whether a port is a given device.
pub mod probe;

/// Keeping a device bound.
pub mod supervisor;

/// Relay commands and the auto-off watchdog.
pub mod relay;

/// NMEA sentence decoding.
pub mod nmea;

/// The last known location.
pub mod gps;

/// The operations of the gateway.
pub mod gateway;
