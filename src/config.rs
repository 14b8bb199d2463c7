use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    probe::{Classifier, ProbeSpec},
    relay::RelaySettings,
    server,
    supervisor::{Role, RoleConfig},
};

/// How to recognize a device.
/// If given in a configuration file, all of it must be given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Written to a port right after opening it.
    pub stimulus: Option<String>,

    /// Which line identifies the device.
    pub classifier: Classifier,

    /// How long to wait for that line.
    pub timeout_ms: u64,
}

/// Relay specifics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How to recognize the relay.
    pub probe: ProbeConfig,

    /// How long to wait before looking for a lost relay.
    pub reacquire_delay_ms: u64,

    /// Written to switch the relay on.
    pub on: String,

    /// Written to switch the relay off.
    pub off: String,

    /// How long after switching on the relay is switched off by itself.
    pub watchdog_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig {
                stimulus: Some("AT".into()),
                classifier: Classifier::Exact("OK".into()),
                timeout_ms: 2000,
            },
            reacquire_delay_ms: 10000,
            on: "AT+CH1=1".into(),
            off: "AT+CH1=0".into(),
            watchdog_ms: 10000,
        }
    }
}

/// GPS receiver specifics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// How to recognize the receiver.
    pub probe: ProbeConfig,

    /// How long to wait before looking for a lost receiver.
    pub reacquire_delay_ms: u64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig {
                stimulus: None,
                classifier: Classifier::Contains("GPGGA".into()),
                timeout_ms: 2700,
            },
            reacquire_delay_ms: 13000,
        }
    }
}

/// The HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The port to listen on.
    pub port: u16,

    /// Where `index.html` and other static files are served from.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: server::DEFAULT_PORT,
            static_dir: PathBuf::from("."),
        }
    }
}

/// The configuration used for running the gateway.
/// Anything left out of a configuration file gets its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Only ports with paths starting with one of these are probed.
    pub port_prefixes: Vec<String>,

    /// The baud rate used for all ports.
    pub baud: u32,

    /// How long to wait after a scan found nothing.
    pub scan_backoff_ms: u64,

    /// See [`RelayConfig`].
    pub relay: RelayConfig,

    /// See [`GpsConfig`].
    pub gps: GpsConfig,

    /// See [`ServerConfig`].
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port_prefixes: vec!["/dev/ttyUSB".into(), "/dev/ttyACM".into()],
            baud: 9600,
            scan_backoff_ms: 5000,
            relay: RelayConfig::default(),
            gps: GpsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// An example configuration with some fields changed from their defaults.
    pub fn example() -> Self {
        Self {
            port_prefixes: vec![
                "/dev/ttyUSB".into(),
                "/dev/ttyACM".into(),
                "/dev/serial/by-id/".into(),
            ],
            gps: GpsConfig {
                probe: ProbeConfig {
                    stimulus: None,
                    classifier: Classifier::Contains("RMC".into()),
                    timeout_ms: 3000,
                },
                ..Default::default()
            },
            server: ServerConfig {
                port: 8080,
                static_dir: PathBuf::from("/var/www/gateway"),
            },
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("// Could not serialize configuration: {e}"))
    }

    /// Setup a new configuration from a RON file.
    /// The configuration is validated.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        let config = Self::deserialize(&s)?;
        config.validate()?;

        Ok(config)
    }

    fn check_prefixes(&self) -> Result<(), Error> {
        if self.port_prefixes.is_empty() {
            return Err(Error::BadConfig(
                "No port prefixes given, so no port would ever be probed.".into(),
            ));
        }

        if let Some(index) = self.port_prefixes.iter().position(|p| p.is_empty()) {
            return Err(Error::BadConfig(format!(
                "The port prefix with index {index} (zero indexed) is empty, which would make every port a candidate."
            )));
        }

        Ok(())
    }

    fn check_durations(&self) -> Result<(), Error> {
        let durations = [
            ("scan_backoff_ms", self.scan_backoff_ms),
            ("relay.probe.timeout_ms", self.relay.probe.timeout_ms),
            ("relay.reacquire_delay_ms", self.relay.reacquire_delay_ms),
            ("relay.watchdog_ms", self.relay.watchdog_ms),
            ("gps.probe.timeout_ms", self.gps.probe.timeout_ms),
            ("gps.reacquire_delay_ms", self.gps.reacquire_delay_ms),
        ];

        match durations.iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(Error::BadConfig(format!(
                "`{name}` is zero, please give it a duration in milliseconds."
            ))),
            None => Ok(()),
        }
    }

    fn check_probes(&self) -> Result<(), Error> {
        for (role, probe) in [(Role::Relay, &self.relay.probe), (Role::Gps, &self.gps.probe)] {
            if probe.classifier.pattern().is_empty() {
                return Err(Error::BadConfig(format!(
                    "The {role} classifier has an empty pattern. Problematic probe: `{probe:?}`."
                )));
            }

            if probe.stimulus.as_deref() == Some("") {
                return Err(Error::BadConfig(format!(
                    "The {role} stimulus is empty, leave it out to not write anything."
                )));
            }
        }

        Ok(())
    }

    fn check_relay_commands(&self) -> Result<(), Error> {
        if self.relay.on.is_empty() || self.relay.off.is_empty() {
            return Err(Error::BadConfig(format!(
                "Relay commands must not be empty. Got on: `{}`, off: `{}`.",
                self.relay.on, self.relay.off
            )));
        }

        Ok(())
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_prefixes()?;
        self.check_durations()?;
        self.check_probes()?;
        self.check_relay_commands()?;

        Ok(())
    }

    fn role(&self, role: Role, probe: &ProbeConfig, reacquire_delay_ms: u64) -> RoleConfig {
        RoleConfig {
            role,
            probe: ProbeSpec {
                stimulus: probe.stimulus.clone(),
                classifier: probe.classifier.clone(),
                timeout: Duration::from_millis(probe.timeout_ms),
                baud: self.baud,
            },
            prefixes: self.port_prefixes.clone(),
            scan_backoff: Duration::from_millis(self.scan_backoff_ms),
            reacquire_delay: Duration::from_millis(reacquire_delay_ms),
        }
    }

    /// How the relay is looked for.
    pub fn relay_role(&self) -> RoleConfig {
        self.role(Role::Relay, &self.relay.probe, self.relay.reacquire_delay_ms)
    }

    /// How the GPS receiver is looked for.
    pub fn gps_role(&self) -> RoleConfig {
        self.role(Role::Gps, &self.gps.probe, self.gps.reacquire_delay_ms)
    }

    /// What is written to the relay.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            on: self.relay.on.clone(),
            off: self.relay.off.clone(),
            watchdog: Duration::from_millis(self.relay.watchdog_ms),
        }
    }
}
