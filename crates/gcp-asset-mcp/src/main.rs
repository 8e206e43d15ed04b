use anyhow::Result;
use clap::Parser;
use gcp_asset_mcp::config::Cli;
use gcp_asset_mcp::logging::setup_logging;
use gcp_asset_mcp::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_dir.as_deref())?;

    if let Err(err) = run_server(cli.asset_config()).await {
        tracing::error!("Server exited: {:#}", err);
        return Err(err);
    }
    Ok(())
}
