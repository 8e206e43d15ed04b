use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use mcp_core::{
    protocol::{
        CallToolParams, CallToolResult, Implementation, InitializeResult, JsonObject,
        ListToolsResult, ServerCapabilities, ToolsCapability, PROTOCOL_VERSION,
    },
    ToolError,
};
use rmcp::model::{
    Content, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, JsonRpcVersion2_0,
    RequestId, Tool,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

use crate::{BoxError, RouterError};

/// A request handed to the router together with the token that cancels it.
pub struct McpRequest {
    pub request: JsonRpcRequest,
    pub cancel: CancellationToken,
}

/// Builder for advertising server capabilities
#[derive(Default)]
pub struct CapabilitiesBuilder {
    tools: Option<ToolsCapability>,
}

impl CapabilitiesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(mut self, list_changed: bool) -> Self {
        self.tools = Some(ToolsCapability {
            list_changed: Some(list_changed),
        });
        self
    }

    pub fn build(self) -> ServerCapabilities {
        ServerCapabilities { tools: self.tools }
    }
}

fn to_object<T: Serialize>(value: &T) -> Result<JsonObject, RouterError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RouterError::Internal(format!(
            "expected a JSON object result, got {other}"
        ))),
        Err(e) => Err(RouterError::Internal(format!(
            "JSON serialization error: {e}"
        ))),
    }
}

pub trait Router: Send + Sync + 'static {
    fn name(&self) -> String;
    fn instructions(&self) -> String;
    fn capabilities(&self) -> ServerCapabilities;
    fn list_tools(&self) -> Vec<Tool>;
    fn call_tool(
        &self,
        tool_name: &str,
        arguments: JsonObject,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Content>, ToolError>> + Send + 'static>>;

    fn create_response(&self, id: RequestId, result: JsonObject) -> JsonRpcMessage {
        JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JsonRpcVersion2_0,
            id,
            result,
        })
    }

    fn handle_initialize(
        &self,
        req: JsonRpcRequest,
    ) -> impl Future<Output = Result<JsonRpcMessage, RouterError>> + Send {
        async move {
            let result = InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: self.capabilities(),
                server_info: Implementation {
                    name: self.name(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                instructions: Some(self.instructions()),
            };
            Ok(self.create_response(req.id, to_object(&result)?))
        }
    }

    fn handle_ping(
        &self,
        req: JsonRpcRequest,
    ) -> impl Future<Output = Result<JsonRpcMessage, RouterError>> + Send {
        async move { Ok(self.create_response(req.id, JsonObject::new())) }
    }

    fn handle_tools_list(
        &self,
        req: JsonRpcRequest,
    ) -> impl Future<Output = Result<JsonRpcMessage, RouterError>> + Send {
        async move {
            let result = ListToolsResult {
                tools: self.list_tools(),
                next_cursor: None,
            };
            Ok(self.create_response(req.id, to_object(&result)?))
        }
    }

    fn handle_tools_call(
        &self,
        req: JsonRpcRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<JsonRpcMessage, RouterError>> + Send {
        async move {
            let params: CallToolParams =
                serde_json::from_value(Value::Object(req.request.params))
                    .map_err(|e| RouterError::InvalidParams(e.to_string()))?;

            if !self.list_tools().iter().any(|tool| tool.name == params.name) {
                return Err(RouterError::ToolNotFound(params.name));
            }

            let arguments = params.arguments.unwrap_or_default();
            let result = match self.call_tool(&params.name, arguments, cancel).await {
                Ok(content) => CallToolResult::success(content),
                // Bad input is the caller's problem: report it inside the tool result
                Err(ToolError::InvalidParameters(message)) => {
                    CallToolResult::error(vec![Content::text(message)])
                }
                Err(ToolError::NotFound(name)) => return Err(RouterError::ToolNotFound(name)),
                Err(ToolError::Cancelled) => return Err(RouterError::Cancelled),
                Err(err) => return Err(RouterError::ToolFailed(err.to_string())),
            };

            Ok(self.create_response(req.id, to_object(&result)?))
        }
    }
}

/// Adapts a [`Router`] to a tower `Service`.
///
/// Routing failures become JSON-RPC error messages. A cancelled request resolves to
/// `Err` so that the server can drop it without writing a response.
#[derive(Clone)]
pub struct RouterService<T>(pub T);

impl<T> Service<McpRequest> for RouterService<T>
where
    T: Router + Clone + Send + Sync + 'static,
{
    type Response = JsonRpcMessage;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: McpRequest) -> Self::Future {
        let this = self.0.clone();

        Box::pin(async move {
            let McpRequest { request, cancel } = req;
            let id = request.id.clone();
            let method = request.request.method.clone();

            let result = match method.as_str() {
                "initialize" => this.handle_initialize(request).await,
                "ping" => this.handle_ping(request).await,
                "tools/list" => this.handle_tools_list(request).await,
                "tools/call" => this.handle_tools_call(request, cancel).await,
                other => Err(RouterError::MethodNotFound(other.to_string())),
            };

            match result {
                Ok(message) => Ok(message),
                Err(RouterError::Cancelled) => Err(RouterError::Cancelled.into()),
                Err(err) => Ok(JsonRpcMessage::Error(JsonRpcError {
                    jsonrpc: JsonRpcVersion2_0,
                    id,
                    error: err.into(),
                })),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_core::{ArgumentsExt, ParamKind, ParamSpec, ToolSpec};
    use rmcp::model::{ErrorCode, Request};
    use serde_json::json;

    const SHOUT_TOOL: ToolSpec = ToolSpec {
        name: "shout",
        title: "Shout",
        description: "Upper-cases a word.",
        params: &[ParamSpec {
            name: "word",
            kind: ParamKind::String,
            required: true,
            description: "The word.",
        }],
        read_only: true,
        idempotent: true,
        open_world: false,
    };

    #[derive(Clone)]
    struct ShoutRouter;

    impl Router for ShoutRouter {
        fn name(&self) -> String {
            "shout".to_string()
        }

        fn instructions(&self) -> String {
            "Call shout with a word.".to_string()
        }

        fn capabilities(&self) -> ServerCapabilities {
            CapabilitiesBuilder::new().with_tools(false).build()
        }

        fn list_tools(&self) -> Vec<Tool> {
            vec![SHOUT_TOOL.to_tool()]
        }

        fn call_tool(
            &self,
            _tool_name: &str,
            arguments: JsonObject,
            cancel: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Content>, ToolError>> + Send + 'static>>
        {
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return Err(ToolError::Cancelled);
                }
                let word = arguments.require_string("word")?;
                if word == "explode" {
                    return Err(ToolError::ExecutionError(
                        "failed while shouting: too loud".to_string(),
                    ));
                }
                Ok(vec![Content::text(word.to_uppercase())])
            })
        }
    }

    fn request(id: u32, method: &str, params: Value) -> McpRequest {
        McpRequest {
            request: JsonRpcRequest {
                jsonrpc: JsonRpcVersion2_0,
                id: RequestId::Number(id),
                request: Request {
                    method: method.to_string(),
                    params: params.as_object().cloned().unwrap_or_default(),
                    extensions: Default::default(),
                },
            },
            cancel: CancellationToken::new(),
        }
    }

    async fn call(req: McpRequest) -> Value {
        let message = RouterService(ShoutRouter).call(req).await.unwrap();
        serde_json::to_value(message).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_reports_tools_capability() {
        let response = call(request(1, "initialize", json!({}))).await;
        assert_eq!(response["id"], json!(1));
        assert_eq!(response["result"]["protocolVersion"], json!(PROTOCOL_VERSION));
        assert_eq!(
            response["result"]["capabilities"],
            json!({"tools": {"listChanged": false}})
        );
        assert_eq!(response["result"]["serverInfo"]["name"], json!("shout"));
        assert_eq!(
            response["result"]["instructions"],
            json!("Call shout with a word.")
        );
    }

    #[tokio::test]
    async fn test_ping_returns_empty_result() {
        let response = call(request(2, "ping", json!({}))).await;
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = call(request(3, "tools/list", json!({}))).await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], json!("shout"));
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["word"]));
    }

    #[tokio::test]
    async fn test_tools_call_success() {
        let response = call(request(
            4,
            "tools/call",
            json!({"name": "shout", "arguments": {"word": "hi"}}),
        ))
        .await;
        assert_eq!(response["result"]["isError"], json!(false));
        assert_eq!(response["result"]["content"][0]["text"], json!("HI"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_become_tool_level_errors() {
        let response = call(request(5, "tools/call", json!({"name": "shout"}))).await;
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], json!(true));
        assert_eq!(
            response["result"]["content"][0]["text"],
            json!("word is required")
        );
    }

    #[tokio::test]
    async fn test_execution_failures_become_protocol_errors() {
        let response = call(request(
            6,
            "tools/call",
            json!({"name": "shout", "arguments": {"word": "explode"}}),
        ))
        .await;
        assert!(response.get("result").is_none());
        assert_eq!(response["id"], json!(6));
        assert_eq!(
            response["error"]["code"],
            json!(ErrorCode::INTERNAL_ERROR.0)
        );
        assert_eq!(
            response["error"]["message"],
            json!("failed while shouting: too loud")
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_and_method() {
        let response = call(request(7, "tools/call", json!({"name": "whisper"}))).await;
        assert_eq!(response["error"]["code"], json!(ErrorCode::INVALID_PARAMS.0));

        let response = call(request(8, "resources/list", json!({}))).await;
        assert_eq!(
            response["error"]["code"],
            json!(ErrorCode::METHOD_NOT_FOUND.0)
        );
    }

    #[tokio::test]
    async fn test_cancelled_call_resolves_to_err() {
        let req = request(
            9,
            "tools/call",
            json!({"name": "shout", "arguments": {"word": "hi"}}),
        );
        req.cancel.cancel();
        let err = RouterService(ShoutRouter).call(req).await.unwrap_err();
        assert_eq!(err.to_string(), "Request cancelled");
    }
}
