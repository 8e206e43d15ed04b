pub mod auth;
pub mod client;
pub mod error;
pub mod pager;
pub mod summary;

use std::{future::Future, pin::Pin, sync::Arc};

use futures::TryStreamExt;
use indoc::indoc;
use mcp_core::{
    protocol::ServerCapabilities, ArgumentsExt, JsonObject, ParamKind, ParamSpec, ToolError,
    ToolSpec,
};
use mcp_server::router::CapabilitiesBuilder;
use mcp_server::Router;
use rmcp::model::{Content, Tool};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use self::client::{ClientFactory, HubClientFactory, ListAssetsRequest};
use self::error::AssetInventoryError;
use self::pager::asset_stream;
use self::summary::{summaries_to_json, AssetSummary};
use crate::config::AssetInventoryConfig;

pub const LIST_ASSETS_TOOL_NAME: &str = "list_gcp_assets";

pub const LIST_ASSETS_TOOL: ToolSpec = ToolSpec {
    name: LIST_ASSETS_TOOL_NAME,
    title: "List Google Cloud assets",
    description: "Lists Google Cloud assets within a specific project.",
    params: &[
        ParamSpec {
            name: "project_id",
            kind: ParamKind::String,
            required: true,
            description: "The Google Cloud project ID to query for assets.",
        },
        ParamSpec {
            name: "asset_types",
            kind: ParamKind::StringArray,
            required: false,
            description: "Optional. An array of strings for asset types to filter by (e.g., 'storage.googleapis.com/Bucket').",
        },
    ],
    read_only: true,
    idempotent: true,
    open_world: true,
};

/// Validated arguments of `list_gcp_assets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListAssetsParams {
    pub project_id: String,
    pub asset_types: Option<Vec<String>>,
}

impl ListAssetsParams {
    pub fn from_arguments(arguments: &JsonObject) -> Result<Self, AssetInventoryError> {
        Ok(Self {
            project_id: arguments.require_string("project_id")?,
            asset_types: arguments.optional_string_array("asset_types"),
        })
    }
}

/// Lists every asset matching `request` and projects it to a summary.
///
/// Connecting and each page fetch race against `cancel`. Any failure discards the
/// assets gathered so far. The client is dropped on every return path.
pub async fn list_assets(
    factory: &dyn ClientFactory,
    request: &ListAssetsRequest,
    cancel: &CancellationToken,
) -> Result<Vec<AssetSummary>, AssetInventoryError> {
    let client = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AssetInventoryError::Cancelled),
        client = factory.connect() => client.map_err(AssetInventoryError::ClientInit)?,
    };

    let mut assets = asset_stream(client.as_ref(), request);
    let mut summaries = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AssetInventoryError::Cancelled),
            next = assets.try_next() => next.map_err(AssetInventoryError::Iteration)?,
        };
        match next {
            Some(asset) => summaries.push(AssetSummary::from(&asset)),
            None => break,
        }
    }
    Ok(summaries)
}

/// MCP router exposing the Cloud Asset Inventory.
#[derive(Clone)]
pub struct AssetInventoryRouter {
    tools: Vec<Tool>,
    instructions: String,
    factory: Arc<dyn ClientFactory>,
    page_size: Option<i32>,
}

impl AssetInventoryRouter {
    pub fn new(config: AssetInventoryConfig) -> Self {
        let page_size = config.page_size;
        Self {
            tools: vec![LIST_ASSETS_TOOL.to_tool()],
            instructions: indoc! {r#"
                Query the Google Cloud Asset Inventory.

                Use list_gcp_assets to enumerate the resources in a project. Pass
                asset_types (for example "storage.googleapis.com/Bucket") to narrow the
                listing. Each result has the asset's full resource name, its type and
                its location, which is empty for assets without one.
            "#}
            .to_string(),
            factory: Arc::new(HubClientFactory::new(config)),
            page_size,
        }
    }

    /// Replaces the factory that opens inventory connections.
    pub fn with_client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    async fn list_gcp_assets(
        &self,
        arguments: JsonObject,
        cancel: CancellationToken,
    ) -> Result<Vec<Content>, ToolError> {
        let result = async {
            let params = ListAssetsParams::from_arguments(&arguments)?;
            info!(
                project_id = %params.project_id,
                asset_types = ?params.asset_types,
                "Handling request for project '{}'",
                params.project_id
            );

            let request = ListAssetsRequest::for_project(&params.project_id, params.asset_types)
                .with_page_size(self.page_size);
            let summaries = list_assets(self.factory.as_ref(), &request, &cancel).await?;
            info!(
                count = summaries.len(),
                "Found {} assets. Returning summary as a JSON string.",
                summaries.len()
            );
            Ok::<_, AssetInventoryError>(summaries_to_json(&summaries)?)
        }
        .await;

        match result {
            Ok(json) => Ok(vec![Content::text(json)]),
            Err(err) => {
                match &err {
                    AssetInventoryError::Validation(message) => {
                        warn!(%message, "Rejected list_gcp_assets arguments")
                    }
                    AssetInventoryError::Cancelled => info!("list_gcp_assets cancelled"),
                    other => error!(error = %other, "list_gcp_assets failed"),
                }
                Err(err.into())
            }
        }
    }
}

impl Router for AssetInventoryRouter {
    fn name(&self) -> String {
        "gcp-asset-inventory".to_string()
    }

    fn instructions(&self) -> String {
        self.instructions.clone()
    }

    fn capabilities(&self) -> ServerCapabilities {
        CapabilitiesBuilder::new().with_tools(false).build()
    }

    fn list_tools(&self) -> Vec<Tool> {
        self.tools.clone()
    }

    fn call_tool(
        &self,
        tool_name: &str,
        arguments: JsonObject,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Content>, ToolError>> + Send + 'static>> {
        let this = self.clone();
        let tool_name = tool_name.to_string();
        Box::pin(async move {
            match tool_name.as_str() {
                LIST_ASSETS_TOOL_NAME => this.list_gcp_assets(arguments, cancel).await,
                other => Err(ToolError::NotFound(other.to_string())),
            }
        })
    }
}
