use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mediaops")]
#[command(about = "Health, diagnostics and background tasks for the media downloader", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $MEDIAOPS_CONFIG or config/mediaops.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API with the scheduler and worker pools
    ///
    /// Only the maintenance tasks have built-in handlers. Download and
    /// thumbnail tasks are dead-lettered unless an embedding application
    /// registers handlers for them; `GET /scheduler` lists such task ids.
    Server(ServerArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to, overriding `server.bind_addr`
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
