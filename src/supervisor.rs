//! Finding a device among the serial ports, and finding it again when it goes away.
//!
//! A [`Supervisor`] runs the same cycle for each device role:
//!
//! ```text
//!  Scanning ──accepted──▶ Bound ──port closed──▶ (re-acquire delay) ──▶ Scanning
//!     ▲   │
//!     └───┘ nothing accepted: back off, scan again
//! ```
//!
//! While bound the session is published through a watch channel,
//! so readers either see a fully bound session or none at all.

use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, broadcast::error::RecvError, watch};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    probe::{probe, ProbeOutcome, ProbeSpec},
    transport::{self, Port, PortEvent, PortHandle, Transport},
};

/// The kinds of devices the gateway looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The relay (power switch).
    Relay,

    /// The GPS receiver.
    Gps,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Relay => write!(f, "relay"),
            Role::Gps => write!(f, "gps"),
        }
    }
}

/// Receives each line a bound device sends.
pub trait LineHandler: Send + Sync + 'static {
    /// Called once per line, in order.
    fn on_line(&mut self, line: &str);
}

/// Logs what the relay says.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLines;

impl LineHandler for LogLines {
    fn on_line(&mut self, line: &str) {
        info!(%line, "Received");
    }
}

/// How a supervisor looks for its device.
#[derive(Debug, Clone)]
pub struct RoleConfig {
    /// Which device.
    pub role: Role,

    /// How to recognize it.
    pub probe: ProbeSpec,

    /// Which port paths may be it.
    pub prefixes: Vec<String>,

    /// Wait this long after a scan found nothing.
    pub scan_backoff: Duration,

    /// Wait this long after losing the device before scanning again.
    pub reacquire_delay: Duration,
}

/// A bound device.
///
/// A session is never rebound.
/// Finding the device again creates a new session.
#[derive(Debug)]
pub struct Session {
    role: Role,
    handle: PortHandle,
    open: AtomicBool,
}

impl Session {
    fn new(role: Role, handle: PortHandle) -> Self {
        Self {
            role,
            handle,
            open: AtomicBool::new(true),
        }
    }

    /// Which device this is.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The port of the device.
    pub fn handle(&self) -> &PortHandle {
        &self.handle
    }

    /// Whether the session is still usable.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && self.handle.is_open()
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

type Published = Option<Arc<Session>>;

/// A view of what a supervisor has bound.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    role: Role,
    published: watch::Receiver<Published>,
}

impl SupervisorHandle {
    /// Which device the supervisor looks for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The current session, if the device is bound and open.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.published
            .borrow()
            .as_ref()
            .filter(|session| session.is_open())
            .cloned()
    }

    /// Wait until a session is published.
    /// Gives `None` if the supervisor stopped.
    pub async fn bound(&self) -> Option<Arc<Session>> {
        let mut published = self.published.clone();

        loop {
            if let Some(session) = published.borrow_and_update().clone() {
                return Some(session);
            }

            published.changed().await.ok()?;
        }
    }

    /// Wait until no session is published.
    pub async fn unbound(&self) {
        let mut published = self.published.clone();

        loop {
            if published.borrow_and_update().is_none() {
                return;
            }

            if published.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Acquires and monitors the device of one role.
pub struct Supervisor<T: Transport + ?Sized, H: LineHandler> {
    transport: Arc<T>,
    config: RoleConfig,
    handler: H,
    published: watch::Sender<Published>,
}

impl<T, H> Supervisor<T, H>
where
    T: Transport + ?Sized,
    H: LineHandler,
{
    /// Start supervising in the background.
    /// Runs for as long as the runtime does.
    pub fn spawn(transport: Arc<T>, config: RoleConfig, handler: H) -> SupervisorHandle {
        let (published, receiver) = watch::channel(None);
        let role = config.role;

        let supervisor = Self {
            transport,
            config,
            handler,
            published,
        };

        tokio::spawn(supervisor.run().instrument(info_span!("supervisor", %role)));

        SupervisorHandle {
            role,
            published: receiver,
        }
    }

    async fn run(mut self) {
        info!("Starting");

        loop {
            let Port { handle, events } = self.acquire().await;
            info!(path = %handle.path(), "Bound");

            let session = Arc::new(Session::new(self.config.role, handle));
            self.published.send_replace(Some(Arc::clone(&session)));

            self.monitor(events).await;

            session.mark_closed();
            self.published.send_replace(None);

            warn!(
                path = %session.handle().path(),
                delay = ?self.config.reacquire_delay,
                "Lost device, scanning again after delay"
            );
            tokio::time::sleep(self.config.reacquire_delay).await;
        }
    }

    /// Scan until a candidate is accepted.
    async fn acquire(&self) -> Port {
        loop {
            let candidates =
                transport::candidates(&*self.transport, self.config.prefixes.as_slice());
            debug!(count = candidates.len(), "Scanning");

            for candidate in &candidates {
                match probe(&*self.transport, candidate, &self.config.probe).await {
                    ProbeOutcome::Accepted(port) => return port,
                    outcome => debug!(%candidate, %outcome, "Not it"),
                }
            }

            debug!(backoff = ?self.config.scan_backoff, "Nothing found");
            tokio::time::sleep(self.config.scan_backoff).await;
        }
    }

    /// Hand lines to the handler until the port closes.
    async fn monitor(&mut self, mut events: broadcast::Receiver<PortEvent>) {
        loop {
            let event = events.recv().await;
            if let Ok(event) = &event {
                trace!(%event, "Port event");
            }

            match event {
                Ok(PortEvent::Line(line)) => self.handler.on_line(&line),
                Ok(PortEvent::Error(problem)) => {
                    warn!(%problem, "Port reported an error");
                }
                Ok(PortEvent::Closed) | Err(RecvError::Closed) => return,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%skipped, "Lagging behind port, lines lost");
                }
            }
        }
    }
}
