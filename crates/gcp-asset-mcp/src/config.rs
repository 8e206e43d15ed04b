use std::path::PathBuf;

use clap::Parser;

/// Settings for talking to the Cloud Asset API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetInventoryConfig {
    /// Overrides the API root, e.g. for a local emulator.
    pub endpoint: Option<String>,
    /// Project billed for quota; falls back to the credentials' quota project.
    pub quota_project: Option<String>,
    pub page_size: Option<i32>,
}

impl AssetInventoryConfig {
    /// The endpoint with the trailing slash the API hub expects.
    pub fn endpoint_url(&self) -> Option<String> {
        self.endpoint.as_ref().map(|endpoint| {
            if endpoint.ends_with('/') {
                endpoint.clone()
            } else {
                format!("{endpoint}/")
            }
        })
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "MCP server for the Google Cloud Asset Inventory", long_about = None)]
pub struct Cli {
    /// Directory for daily rotated JSON log files, in addition to stderr
    #[arg(long, env = "GCP_ASSET_MCP_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Cloud Asset API root URL
    #[arg(long, env = "GCP_ASSET_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Project to bill API quota to
    #[arg(long, env = "GOOGLE_CLOUD_QUOTA_PROJECT")]
    pub quota_project: Option<String>,

    /// Assets requested per page (1-1000); the service default when unset
    #[arg(long, env = "GCP_ASSET_PAGE_SIZE", value_parser = clap::value_parser!(i32).range(1..=1000))]
    pub page_size: Option<i32>,
}

impl Cli {
    pub fn asset_config(&self) -> AssetInventoryConfig {
        AssetInventoryConfig {
            endpoint: self.endpoint.clone(),
            quota_project: self.quota_project.clone(),
            page_size: self.page_size,
        }
    }
}
