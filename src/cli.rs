use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    config::Config,
    error::Error,
    gps::LocationFix,
    relay::{Command, CommandReceipt},
    transport::{self, SerialTransport},
};

/// The command line interface for the relay GPS gateway.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Serve HTTP on this port instead of the configured one
    #[arg(long)]
    pub port: Option<u16>,

    /// How much to log to stdout
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log (at debug level) to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Use simulated devices instead of serial ports
    #[arg(long)]
    pub mock: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Examples for user convenience.
    #[command(subcommand)]
    Examples(Examples),

    /// Show the serial ports which would be probed.
    ListPorts,
}

/// Helpful examples for users.
#[derive(Subcommand, Debug, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON request switching the relay on.
    Command,

    /// Show an example JSON response to a relay command.
    Receipt,

    /// Show an example JSON response with a location.
    Location,
}

#[derive(serde::Serialize)]
struct CommandRequest {
    command: Command,
}

fn json<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// What a command prints.
pub fn command_output(command: Commands, config: &Config) -> Result<String, Error> {
    let output = match command {
        Commands::Examples(Examples::Config) => Config::example().serialize_pretty(),
        Commands::Examples(Examples::Command) => json(&CommandRequest {
            command: Command::On,
        })?,
        Commands::Examples(Examples::Receipt) => json(&CommandReceipt {
            status: "sent".into(),
            message: config.relay.on.clone(),
        })?,
        Commands::Examples(Examples::Location) => json(&LocationFix::DEMO)?,
        Commands::ListPorts => {
            let candidates =
                transport::candidates(&SerialTransport, config.port_prefixes.as_slice());

            if candidates.is_empty() {
                format!("No ports starting with any of {:?}", config.port_prefixes)
            } else {
                candidates
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    };

    Ok(output)
}

/// Run a command, printing its output.
pub fn handle_command(command: Commands, config: &Config) -> Result<(), Error> {
    println!("{}", command_output(command, config)?);

    Ok(())
}
