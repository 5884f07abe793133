mod setup;

use crate::adapters::api::server::launch_api_server;
use crate::adapters::event_source::websocket_source::WebSocketEventSource;
use crate::config::Config;
use crate::core::services::listener_registry::ListenerRegistry;
use crate::utils::error::RelayResult;
use crate::utils::logger;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct BootstrapArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn run_bootstrap() -> RelayResult<()> {
    logger::init();

    let cancel_token = CancellationToken::new();
    let args = BootstrapArgs::parse();

    let config = match Config::new(args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Config error: {}", e);
            std::process::exit(1);
        }
    };
    config.validate()?;

    let source = Arc::new(WebSocketEventSource::new(&config.source)?);

    let mut process_handles = vec![];

    let publisher = match setup::setup_persistence(&config, cancel_token.clone()) {
        Some((publisher, handle)) => {
            process_handles.push(handle);
            Some(publisher)
        }
        None => None,
    };

    let registry = setup::setup_listener_registry(&config, source, publisher, &cancel_token);

    info!(
        "Serving live gift events on {}:{}",
        config.server.host, config.server.port
    );
    launch_api_server(config.server.host, config.server.port, registry.clone()).await?;

    shut_down(cancel_token, registry, process_handles).await
}

/// Stops every listener, then the background tasks, and waits for all of them.
pub async fn shut_down(
    cancel_token: CancellationToken,
    registry: Arc<ListenerRegistry>,
    handles: Vec<JoinHandle<()>>,
) -> RelayResult<()> {
    registry.shutdown().await?;
    cancel_token.cancel();

    for handle in handles {
        handle.await?;
    }

    info!("Shutdown complete");
    Ok(())
}
