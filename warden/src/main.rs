use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args);

    let (config, warnings) = args.config()?;

    for warning in warnings {
        log::warn!("{warning}");
    }

    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();

        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for the shutdown signal: {e}");
                return;
            }

            log::info!("Received shutdown signal, draining connections");
            shutdown.cancel();
        }
    });

    if let Err(e) = server::serve(serve_config(&args, config, shutdown)).await {
        log::error!("Server failed to start: {e}");
        std::process::exit(1);
    }

    Ok(())
}

fn serve_config(args: &Args, config: Config, shutdown: CancellationToken) -> ServeConfig {
    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 8000)));

    ServeConfig {
        listen_address,
        config,
        shutdown,
    }
}
