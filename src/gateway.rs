//! The operations the gateway offers, on top of the two supervised devices.

use std::sync::Arc;

use tracing::info;

use crate::{
    config::Config,
    error::Error,
    gps::{LocationCache, LocationFix, NmeaFeed},
    relay::{Command, CommandReceipt, RelayDispatcher},
    supervisor::{LogLines, Role, Supervisor, SupervisorHandle},
    transport::Transport,
};

/// Supervises the relay and the GPS receiver.
///
/// Cheap to clone, clones share the same devices.
#[derive(Debug, Clone)]
pub struct Gateway {
    relay: RelayDispatcher,
    gps: SupervisorHandle,
    location: LocationCache,
}

impl Gateway {
    /// Start looking for both devices in the background.
    pub fn start(config: &Config, transport: Arc<dyn Transport>) -> Self {
        info!(prefixes = ?config.port_prefixes, baud = %config.baud, "Starting gateway");

        let location = LocationCache::new();

        let relay = Supervisor::spawn(Arc::clone(&transport), config.relay_role(), LogLines);
        let gps = Supervisor::spawn(
            transport,
            config.gps_role(),
            NmeaFeed::new(location.clone()),
        );

        Self {
            relay: RelayDispatcher::new(relay, config.relay_settings()),
            gps,
            location,
        }
    }

    /// Switch the relay.
    pub async fn send_relay_command(&self, command: Command) -> Result<CommandReceipt, Error> {
        self.relay.send(command).await
    }

    /// The most recent fix from the GPS receiver.
    ///
    /// If the receiver is bound but no fix arrived yet,
    /// this is [`LocationFix::SENTINEL`].
    pub fn last_location(&self) -> Result<LocationFix, Error> {
        match self.gps.session() {
            Some(_) => Ok(self.location.get()),
            None => Err(Error::NotReady(Role::Gps)),
        }
    }

    /// A fixed location, always available.
    pub fn demo_location(&self) -> LocationFix {
        LocationFix::DEMO
    }

    /// See what the relay supervisor has bound.
    pub fn relay(&self) -> &SupervisorHandle {
        self.relay.supervisor()
    }

    /// See what the GPS supervisor has bound.
    pub fn gps(&self) -> &SupervisorHandle {
        &self.gps
    }

    /// Get notified when the cached location changes.
    pub fn location_updates(&self) -> tokio::sync::watch::Receiver<LocationFix> {
        self.location.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mock::{MockDevice, MockTransport};

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    #[tokio::test(start_paused = true)]
    async fn nothing_bound_means_not_ready() {
        let gateway = Gateway::start(&Config::default(), Arc::new(MockTransport::new()));

        assert_eq!(
            gateway.send_relay_command(Command::On).await,
            Err(Error::NotReady(Role::Relay))
        );
        assert_eq!(gateway.last_location(), Err(Error::NotReady(Role::Gps)));
        assert_eq!(gateway.demo_location(), LocationFix { lat: -13.0, lng: -72.0 });
    }

    #[tokio::test(start_paused = true)]
    async fn bound_gps_without_fix_gives_sentinel() {
        let transport = MockTransport::new();
        transport.add(
            "/dev/ttyACM0",
            MockDevice::new().emit_after(Duration::from_millis(100), GGA),
        );

        let gateway = Gateway::start(&Config::default(), Arc::new(transport));
        gateway.gps().bound().await.unwrap();

        assert_eq!(gateway.last_location(), Ok(LocationFix::SENTINEL));
    }

    #[tokio::test(start_paused = true)]
    async fn fix_is_kept_through_void_sentences() {
        let transport = MockTransport::new();
        let gps = MockDevice::new().emit_after(Duration::from_millis(100), GGA);
        transport.add("/dev/ttyACM0", gps.clone());

        let gateway = Gateway::start(&Config::default(), Arc::new(transport));
        gateway.gps().bound().await.unwrap();

        let mut updates = gateway.location_updates();
        gps.emit(RMC);
        updates.changed().await.unwrap();

        let fix = gateway.last_location().unwrap();
        assert!((fix.lat - 48.1173).abs() < 1e-4);
        assert!((fix.lng - 11.516666).abs() < 1e-4);

        gps.emit("$GPRMC,123520,V,,,,,,,230394,,,N");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(gateway.last_location(), Ok(fix));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_gps_is_not_ready() {
        let transport = MockTransport::new();
        let gps = MockDevice::new()
            .emit_after(Duration::from_millis(100), GGA)
            .emit_after(Duration::from_millis(200), RMC);
        transport.add("/dev/ttyACM0", gps.clone());

        let gateway = Gateway::start(&Config::default(), Arc::new(transport));
        gateway.gps().bound().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(gateway.last_location().is_ok());

        gps.unplug();
        gateway.gps().unbound().await;

        assert_eq!(gateway.last_location(), Err(Error::NotReady(Role::Gps)));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_and_gps_found_side_by_side() {
        let transport = MockTransport::with_demo_devices();

        let gateway = Gateway::start(&Config::default(), Arc::new(transport));

        // Both probe the same ports, so they may have to take turns.
        let relay = gateway.relay().bound().await.unwrap();
        let gps = gateway.gps().bound().await.unwrap();

        assert_eq!(relay.handle().path(), "/dev/ttyUSB0");
        assert_eq!(gps.handle().path(), "/dev/ttyACM0");

        let receipt = gateway.send_relay_command(Command::On).await.unwrap();
        assert_eq!(receipt.message, "AT+CH1=1");
        assert!(gateway.last_location().is_ok());
    }
}
