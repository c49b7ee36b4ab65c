use clap::Parser;
use log::{error, info};
use server::cache::DiskCacheStore;
use server::config::LobbyConfig;
use server::network::Lobby;
use std::path::PathBuf;

/// Loads configuration, opens the cache pack and runs the lobby until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// TOML configuration file
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Address to bind to
        #[clap(short = 'H', long)]
        host: Option<String>,
        /// Port to listen on
        #[clap(short, long)]
        port: Option<u16>,
        /// Cache pack directory
        #[clap(long)]
        cache: Option<PathBuf>,
        /// Tick period in milliseconds
        #[clap(short, long)]
        tick_ms: Option<u64>,
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LobbyConfig::load_from_file(path)?,
        None => LobbyConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(cache) = args.cache {
        config.cache_path = cache;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_ms = tick_ms;
    }

    let store = DiskCacheStore::load(&config.cache_path, config.prefetch_concurrency).await?;
    let lobby = Lobby::bind(config, store).await?;
    let shutdown = lobby.shutdown_handle();
    let mut server_handle = tokio::spawn(lobby.run());

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Lobby stopped: {}", e),
                Err(e) => error!("Lobby task panicked: {}", e),
                Ok(Ok(())) => {}
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
        }
    }

    if let Err(e) = server_handle.await {
        error!("Lobby task panicked: {}", e);
    }
    Ok(())
}
