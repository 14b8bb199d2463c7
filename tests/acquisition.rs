use std::{sync::Arc, time::Duration};

use color_eyre::Result;
use common::{fast_config, send_command, start_server, until_status, GGA};
use hyper::StatusCode;
use pretty_assertions::assert_eq;
use relay_gps_gateway::{
    config::Config,
    error::Error,
    mock::{MockDevice, MockTransport},
    server,
};
use tokio::{sync::oneshot, time::Instant};

mod common;

#[tokio::test]
async fn relay_is_found_again_after_unplug() -> Result<()> {
    let transport = MockTransport::new();
    let device = MockDevice::new().reply_to("AT", "OK");
    transport.add("/dev/ttyUSB0", device.clone());

    let port = start_server("unplug", transport).await;
    until_status(StatusCode::OK, || send_command(port, "off")).await?;

    let unplugged = Instant::now();
    device.unplug();

    until_status(StatusCode::SERVICE_UNAVAILABLE, || send_command(port, "off")).await?;
    until_status(StatusCode::OK, || send_command(port, "off")).await?;

    // The re-acquire delay is 400 ms in the test configuration.
    let opened = device.opened_at();
    let reopened = opened.last().copied().unwrap_or(unplugged);
    assert!(reopened - unplugged >= Duration::from_millis(400));

    Ok(())
}

#[tokio::test]
async fn relay_found_among_other_ports() -> Result<()> {
    let transport = MockTransport::new();
    let not_a_candidate = MockDevice::new().reply_to("AT", "OK");
    let relay = MockDevice::new().reply_to("AT", "OK");

    transport.add("/dev/ttyS0", not_a_candidate.clone());
    transport.add("/dev/ttyUSB0", MockDevice::new());
    transport.add("/dev/ttyUSB1", relay.clone());

    let port = start_server("among-others", transport).await;
    let reply = until_status(StatusCode::OK, || send_command(port, "on")).await?;

    assert_eq!(reply.json()?["message"], "AT+CH1=1");
    assert!(relay.is_open());
    assert_eq!(not_a_candidate.open_count(), 0);

    Ok(())
}

#[tokio::test]
async fn gps_lost_and_found() -> Result<()> {
    let transport = MockTransport::new();
    let device = MockDevice::new().stream_every(Duration::from_millis(50), &[GGA]);
    transport.add("/dev/ttyACM0", device.clone());

    let port = start_server("gps-lost", transport.clone()).await;
    until_status(StatusCode::OK, || common::get(port, "/location")).await?;

    transport.remove("/dev/ttyACM0");
    device.unplug();
    until_status(StatusCode::SERVICE_UNAVAILABLE, || common::get(port, "/location")).await?;

    // Plugged back in, under another name.
    transport.add("/dev/ttyACM1", device.clone());
    until_status(StatusCode::OK, || common::get(port, "/location")).await?;

    Ok(())
}

#[tokio::test]
async fn bad_config_is_refused() {
    let config = Config {
        port_prefixes: vec![],
        ..fast_config("bad-config")
    };

    let (port_tx, _port_rx) = oneshot::channel();
    let result = server::run_any_port(config, Arc::new(MockTransport::new()), port_tx).await;

    assert!(matches!(result, Err(Error::BadConfig(_))));
}
