use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use mcp_server::router::RouterService;
use mcp_server::{ByteTransport, Server};
use tokio::io::{stdin, stdout, AsyncRead, AsyncWrite};
use tokio::signal;
use tracing::{error, info};

use crate::asset_inventory::{AssetInventoryRouter, LIST_ASSETS_TOOL_NAME};
use crate::config::AssetInventoryConfig;

/// Serves the asset inventory over stdin/stdout until input closes or a shutdown
/// signal arrives.
pub async fn run_server(config: AssetInventoryConfig) -> Result<()> {
    info!("Starting MCP server for Cloud Asset Inventory...");
    let router = AssetInventoryRouter::new(config);
    info!("Tool '{}' is available.", LIST_ASSETS_TOOL_NAME);

    serve(router, stdin(), stdout(), shutdown_signal()).await
}

/// Runs the MCP loop over an arbitrary byte stream until it ends or `shutdown`
/// resolves.
pub async fn serve<R, W, F>(router: AssetInventoryRouter, reader: R, writer: W, shutdown: F) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    F: Future<Output = ()>,
{
    let server = Server::new(RouterService(router));
    let transport = ByteTransport::new(reader, writer);

    tokio::select! {
        result = server.run(transport) => match result {
            Ok(()) => {
                info!("Input closed, server exiting");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Server stopped on transport error");
                Err(e.into())
            }
        },
        _ = shutdown => {
            info!("Shutdown signal received, server exiting");
            Ok(())
        }
    }
}

#[cfg(unix)]
pub fn shutdown_signal() -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    })
}
