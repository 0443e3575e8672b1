// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printgate: local print-job mediator
//
// Entry point. Initialises logging and backend services, starts the local
// listener and the transit relay client, and runs until Ctrl-C.

mod services;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use printgate_core::error::Result;
use printgate_relay::LocalListener;

use services::app_services::AppServices;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Printgate starting");

    let services = match AppServices::init() {
        Ok(services) => services,
        Err(e) => {
            warn!("data directory unusable, continuing without persistence: {e}");
            AppServices::fallback()?
        }
    };
    if let Err(e) = services.ensure_config_file() {
        warn!("could not write default config: {e}");
    }
    let config = services.config();

    let mut listener = LocalListener::new(Arc::new(services.local_service()));
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.listen_port()));
    listener.start(addr).await?;

    let transit_shutdown = Arc::new(Notify::new());
    let transit = services.transit_client().map(|client| {
        info!(relay = %config.transit_url, "starting transit relay client");
        tokio::spawn(client.run(Arc::clone(&transit_shutdown)))
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutting down");

    if let Err(e) = listener.stop().await {
        warn!("local listener did not stop cleanly: {e}");
    }
    if let Some(handle) = transit {
        transit_shutdown.notify_one();
        if let Err(e) = handle.await {
            warn!("transit client task ended abnormally: {e}");
        }
    }
    services.fragments().stop();

    info!(
        pending = services.dispatcher().pending(),
        busy = services.status().queue_busy(),
        relay_connected = services.status().relay_connected(),
        "Printgate stopped"
    );
    Ok(())
}
