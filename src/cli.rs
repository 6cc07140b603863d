use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use netwatch::capture::list_interfaces;
use netwatch::config::Config;
use netwatch::pipeline;

#[derive(Parser)]
#[command(name = "netwatch")]
#[command(author, version, about = "Real-time network traffic monitoring daemon")]
pub struct Cli {
    /// Network interface to monitor
    #[arg(short = 'i', long, required_unless_present = "list")]
    pub interface: Option<String>,

    /// WebSocket server port (default 8080)
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// BPF filter expression
    #[arg(short = 'f', long)]
    pub filter: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// List available network interfaces and exit
    #[arg(long)]
    pub list: bool,

    /// Path to configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Merge the config file (when given) with CLI overrides
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(interface) = self.interface {
            config.capture.interface = interface;
        }
        if let Some(filter) = self.filter {
            config.capture.filter = Some(filter);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }

        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.list {
        println!("Available interfaces:");
        list_interfaces();
        return Ok(());
    }

    let config = cli.into_config()?;
    info!(
        interface = %config.capture.interface,
        port = config.server.port,
        filter = config.capture.filter.as_deref().unwrap_or("<none>"),
        "starting netwatch daemon"
    );

    pipeline::run(config).await
}
