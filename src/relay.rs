//! Switching the relay.

use std::{fmt::Display, str::FromStr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    error::Error,
    serial::error::PortError,
    supervisor::{Role, Session, SupervisorHandle},
};

/// What the relay should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Close the relay.
    On,

    /// Open the relay.
    Off,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Command::On),
            "off" => Ok(Command::Off),
            other => Err(Error::InvalidCommand(other.into())),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::On => write!(f, "on"),
            Command::Off => write!(f, "off"),
        }
    }
}

/// Proof that a command was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReceipt {
    /// Always `"sent"`.
    pub status: String,

    /// What was written to the relay.
    pub message: String,
}

impl CommandReceipt {
    fn sent(message: &str) -> Self {
        Self {
            status: "sent".into(),
            message: message.into(),
        }
    }
}

/// What to write to the relay, and when to switch it off by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Written for [`Command::On`].
    pub on: String,

    /// Written for [`Command::Off`], and by the watchdog.
    pub off: String,

    /// How long after an `on` the relay is switched off again.
    pub watchdog: Duration,
}

impl RelaySettings {
    fn message(&self, command: Command) -> &str {
        match command {
            Command::On => &self.on,
            Command::Off => &self.off,
        }
    }
}

/// Sends commands to whichever relay is bound.
///
/// Writes are done one at a time, so concurrent commands never
/// interleave on the wire.
///
/// Every `on` arms its own watchdog which writes `off` when it fires.
/// A later `on` does not reset earlier watchdogs.
#[derive(Debug, Clone)]
pub struct RelayDispatcher {
    relay: SupervisorHandle,
    settings: Arc<RelaySettings>,
    writing: Arc<Mutex<()>>,
}

impl RelayDispatcher {
    /// Send commands through the relay bound by the given supervisor.
    pub fn new(relay: SupervisorHandle, settings: RelaySettings) -> Self {
        Self {
            relay,
            settings: Arc::new(settings),
            writing: Arc::new(Mutex::new(())),
        }
    }

    /// The supervisor of the relay.
    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.relay
    }

    /// Write a command to the relay.
    pub async fn send(&self, command: Command) -> Result<CommandReceipt, Error> {
        let session = self.relay.session().ok_or(Error::NotReady(Role::Relay))?;
        let message = self.settings.message(command);

        self.write(&session, message).await?;
        info!(%command, %message, "Sent");

        if command == Command::On {
            self.arm_watchdog();
        }

        Ok(CommandReceipt::sent(message))
    }

    async fn write(&self, session: &Session, message: &str) -> Result<(), Error> {
        let _writing = self.writing.lock().await;

        match session.handle().write(message.as_bytes()).await {
            Ok(()) => Ok(()),
            Err(PortError::Closed) => Err(Error::NotReady(Role::Relay)),
            Err(e) => {
                warn!(%e, %message, "Write failed");
                Err(Error::WriteFailed(e.to_string()))
            }
        }
    }

    fn arm_watchdog(&self) {
        let dispatcher = self.clone();
        let delay = self.settings.watchdog;

        tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;

                let Some(session) = dispatcher.relay.session() else {
                    warn!("No relay bound, cannot switch it off");
                    return;
                };

                let off = dispatcher.settings.message(Command::Off);
                match dispatcher.write(&session, off).await {
                    Ok(()) => info!(%off, "Sent auto-off"),
                    Err(e) => warn!(%e, "Auto-off failed"),
                }
            }
            .instrument(info_span!("watchdog")),
        );
    }
}
