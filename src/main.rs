mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use mediaops::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Server(args) => {
            let mut config = config;
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            mediaops::api::run(config).await?
        }
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}
