use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use relay_gps_gateway::{
    cli,
    config::Config,
    logging,
    mock::MockTransport,
    server,
    transport::{SerialTransport, Transport},
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[cfg(windows)]
use tokio::signal::windows::{signal, SignalKind};

use tracing::{debug, error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::new_from_path(config_path)?
    } else {
        Config::default()
    };

    if let Some(command) = cli.command {
        cli::handle_command(command, &config)?;

        return Ok(());
    }

    logging::init(cli.log_level, cli.log_dir.map(|dir| (Level::DEBUG, dir))).await;

    match &cli.config {
        Some(config_path) => debug!(?config_path, "Config from path"),
        None => debug!("Default config"),
    }

    let transport: Arc<dyn Transport> = if cli.mock {
        info!("Using simulated devices");
        Arc::new(MockTransport::with_demo_devices())
    } else {
        Arc::new(SerialTransport)
    };

    let port = cli.port.unwrap_or(config.server.port);

    let mut hangup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup.recv() => {
            info!("Told to hang up, quitting")
        }
        result = server::run_on_port(config, transport, port) => {
            error!(?result, "Server returned");
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly: {result:?}"));
        }
    }

    Ok(())
}
