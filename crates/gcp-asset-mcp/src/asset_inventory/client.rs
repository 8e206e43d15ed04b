use async_trait::async_trait;
use google_apis_common as common;
use google_cloudasset1::{api, CloudAsset};
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use thiserror::Error;
use tracing::{debug, warn};

use super::auth::{AuthError, CredentialsLoader, CLOUD_PLATFORM_SCOPE};
use crate::config::AssetInventoryConfig;

/// Only resource metadata is requested from the inventory.
pub const CONTENT_TYPE_RESOURCE: &str = "RESOURCE";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] google_cloudasset1::Error),

    #[error("{0}")]
    Other(String),
}

/// The query sent for every page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListAssetsRequest {
    /// Always `projects/<project_id>`.
    pub parent: String,
    pub asset_types: Vec<String>,
    pub content_type: &'static str,
    pub page_size: Option<i32>,
}

impl ListAssetsRequest {
    pub fn for_project(project_id: &str, asset_types: Option<Vec<String>>) -> Self {
        Self {
            parent: format!("projects/{project_id}"),
            asset_types: asset_types.unwrap_or_default(),
            content_type: CONTENT_TYPE_RESOURCE,
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: Option<i32>) -> Self {
        self.page_size = page_size;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetResource {
    pub location: Option<String>,
}

/// The parts of an inventory record this server reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub asset_type: String,
    pub resource: Option<AssetResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetPage {
    pub assets: Vec<Asset>,
    /// `None` once the listing is exhausted.
    pub next_page_token: Option<String>,
}

impl From<api::Asset> for Asset {
    fn from(asset: api::Asset) -> Self {
        Self {
            name: asset.name.unwrap_or_default(),
            asset_type: asset.asset_type.unwrap_or_default(),
            resource: asset.resource.map(|resource| AssetResource {
                location: resource.location,
            }),
        }
    }
}

impl From<api::ListAssetsResponse> for AssetPage {
    fn from(response: api::ListAssetsResponse) -> Self {
        Self {
            assets: response
                .assets
                .unwrap_or_default()
                .into_iter()
                .map(Asset::from)
                .collect(),
            next_page_token: response.next_page_token.filter(|token| !token.is_empty()),
        }
    }
}

/// A connection to the asset inventory. Dropping it releases the connection.
#[async_trait]
pub trait AssetInventoryClient: Send + Sync {
    async fn list_page(
        &self,
        request: &ListAssetsRequest,
        page_token: Option<&str>,
    ) -> Result<AssetPage, ClientError>;
}

/// Opens a fresh client for each invocation.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn AssetInventoryClient>, ClientError>;
}

/// Client backed by the generated Cloud Asset API hub.
pub struct HubClient<C> {
    hub: CloudAsset<C>,
    quota_project: Option<String>,
}

impl<C> HubClient<C> {
    pub fn new(hub: CloudAsset<C>) -> Self {
        Self {
            hub,
            quota_project: None,
        }
    }

    pub fn with_quota_project(mut self, quota_project: Option<String>) -> Self {
        self.quota_project = quota_project;
        self
    }
}

#[async_trait]
impl<C> AssetInventoryClient for HubClient<C>
where
    C: common::Connector,
{
    async fn list_page(
        &self,
        request: &ListAssetsRequest,
        page_token: Option<&str>,
    ) -> Result<AssetPage, ClientError> {
        let mut call = self
            .hub
            .assets()
            .list(&request.parent)
            .content_type(request.content_type);
        for asset_type in &request.asset_types {
            call = call.add_asset_types(asset_type);
        }
        if let Some(page_size) = request.page_size {
            call = call.page_size(page_size);
        }
        if let Some(token) = page_token {
            call = call.page_token(token);
        }
        if let Some(project) = &self.quota_project {
            call = call.param("userProject", project.as_str());
        }

        let (_, response) = call.doit().await?;
        Ok(AssetPage::from(response))
    }
}

/// Builds authenticated [`HubClient`]s from application default credentials.
pub struct HubClientFactory {
    config: AssetInventoryConfig,
    loader: CredentialsLoader,
}

impl HubClientFactory {
    pub fn new(config: AssetInventoryConfig) -> Self {
        Self::with_loader(config, CredentialsLoader::from_env())
    }

    pub fn with_loader(config: AssetInventoryConfig, loader: CredentialsLoader) -> Self {
        Self { config, loader }
    }
}

#[async_trait]
impl ClientFactory for HubClientFactory {
    async fn connect(&self) -> Result<Box<dyn AssetInventoryClient>, ClientError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(AuthError::from)?;
        let credentials = self.loader.load(http)?;
        // Surface missing or broken credentials now rather than on the first page
        credentials.access_token(&[CLOUD_PLATFORM_SCOPE]).await?;
        debug!(credentials = credentials.kind(), "Obtained access token");

        let quota_project = self
            .config
            .quota_project
            .clone()
            .or_else(|| credentials.quota_project().map(str::to_string));

        let roots = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .unwrap_or_else(|e| {
                warn!(error = %e, "No usable native TLS roots, using bundled roots");
                hyper_rustls::HttpsConnectorBuilder::new().with_webpki_roots()
            });
        let connector = roots
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let mut hub = CloudAsset::new(client, credentials);
        if let Some(endpoint) = self.config.endpoint_url() {
            hub.base_url(endpoint);
        }

        Ok(Box::new(HubClient::new(hub).with_quota_project(quota_project)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper_util::client::legacy::connect::HttpConnector;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIST_PATH: &str = "/v1/projects/demo/assets";

    fn hub_client(server: &MockServer) -> HubClient<HttpConnector> {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let mut hub = CloudAsset::new(client, "test-token".to_string());
        hub.base_url(format!("{}/", server.uri()));
        HubClient::new(hub)
    }

    #[test]
    fn test_request_for_project() {
        let request = ListAssetsRequest::for_project("demo", None).with_page_size(Some(50));
        assert_eq!(request.parent, "projects/demo");
        assert!(request.asset_types.is_empty());
        assert_eq!(request.content_type, "RESOURCE");
        assert_eq!(request.page_size, Some(50));
    }

    #[test]
    fn test_page_from_api_response() {
        let response: api::ListAssetsResponse = serde_json::from_value(json!({
            "assets": [
                {
                    "name": "//storage.googleapis.com/b1",
                    "assetType": "storage.googleapis.com/Bucket",
                    "resource": {"location": "us-central1"}
                },
                {"name": "//compute.googleapis.com/n1", "assetType": "compute.googleapis.com/Network"}
            ],
            "nextPageToken": ""
        }))
        .unwrap();

        let page = AssetPage::from(response);
        assert_eq!(page.next_page_token, None);
        assert_eq!(page.assets.len(), 2);
        assert_eq!(
            page.assets[0].resource,
            Some(AssetResource {
                location: Some("us-central1".into())
            })
        );
        assert_eq!(page.assets[1].resource, None);
    }

    #[tokio::test]
    async fn test_list_page_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LIST_PATH))
            .and(query_param("contentType", "RESOURCE"))
            .and(query_param("assetTypes", "storage.googleapis.com/Bucket"))
            .and(query_param("pageSize", "2"))
            .and(query_param("userProject", "billing-project"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "assets": [{
                    "name": "//storage.googleapis.com/b1",
                    "assetType": "storage.googleapis.com/Bucket",
                    "resource": {"location": "us"}
                }],
                "nextPageToken": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = hub_client(&server).with_quota_project(Some("billing-project".into()));
        let request = ListAssetsRequest::for_project(
            "demo",
            Some(vec!["storage.googleapis.com/Bucket".into()]),
        )
        .with_page_size(Some(2));

        let page = client.list_page(&request, None).await.unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("page-2"));
        assert_eq!(page.assets[0].name, "//storage.googleapis.com/b1");
    }

    #[tokio::test]
    async fn test_list_page_forwards_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LIST_PATH))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let page = hub_client(&server)
            .list_page(&ListAssetsRequest::for_project("demo", None), Some("page-2"))
            .await
            .unwrap();
        assert_eq!(page, AssetPage::default());
    }

    #[tokio::test]
    async fn test_list_page_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LIST_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "permission denied", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let err = hub_client(&server)
            .list_page(&ListAssetsRequest::for_project("demo", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api(_)));
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_factory_connects_with_authorized_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "user-token",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LIST_PATH))
            .and(header("authorization", "Bearer user-token"))
            .and(query_param("userProject", "billing-project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "assets": [{"name": "//storage.googleapis.com/b1", "assetType": "storage.googleapis.com/Bucket"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            json!({
                "type": "authorized_user",
                "client_id": "client",
                "client_secret": "secret",
                "refresh_token": "refresh-me",
                "token_uri": format!("{}/token", server.uri()),
                "quota_project_id": "billing-project"
            })
        )
        .unwrap();

        let loader = CredentialsLoader {
            credentials_file: Some(file.path().to_path_buf()),
            well_known_file: None,
            metadata_host: "unused".to_string(),
        };
        let config = AssetInventoryConfig {
            endpoint: Some(server.uri()),
            ..Default::default()
        };

        let client = HubClientFactory::with_loader(config, loader)
            .connect()
            .await
            .unwrap();
        let page = client
            .list_page(&ListAssetsRequest::for_project("demo", None), None)
            .await
            .unwrap();
        assert_eq!(page.assets.len(), 1);
        assert_eq!(page.assets[0].name, "//storage.googleapis.com/b1");
    }
}
