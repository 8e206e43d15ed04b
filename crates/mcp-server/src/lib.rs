use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Future, FutureExt, Stream, StreamExt};
use pin_project::pin_project;
use rmcp::model::{
    ErrorData, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcVersion2_0, RequestId,
};
use router::McpRequest;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tower_service::Service;

mod errors;
pub use errors::{BoxError, RouterError, ServerError, TransportError};

pub mod router;
pub use router::Router;

/// A transport layer that handles JSON-RPC messages over byte
#[pin_project]
pub struct ByteTransport<R, W> {
    // Reader is a BufReader on the underlying stream (stdin or similar) buffering
    // the underlying data across poll calls
    #[pin]
    reader: BufReader<R>,
    #[pin]
    writer: W,
    // Bytes of the line currently being read. Kept across polls so a line that
    // arrives in several chunks is not lost when a read returns Pending.
    line: Vec<u8>,
}

impl<R, W> ByteTransport<R, W>
where
    R: AsyncRead,
    W: AsyncWrite,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            // Default BufReader capacity is 8 * 1024, increase this to 2MB to the file size limit
            // allows the buffer to have the capacity to read very large calls
            reader: BufReader::with_capacity(2 * 1024 * 1024, reader),
            writer,
            line: Vec::new(),
        }
    }
}

/// Parses one framed line into a JSON-RPC message.
pub fn parse_message(line: &str) -> Result<JsonRpcMessage, TransportError> {
    let mut value = serde_json::from_str::<serde_json::Value>(line)?;

    let Some(obj) = value.as_object_mut() else {
        return Err(TransportError::InvalidMessage(
            "Message must be a JSON object".into(),
        ));
    };

    // Check jsonrpc version field
    if obj.get("jsonrpc").and_then(|v| v.as_str()) != Some("2.0") {
        return Err(TransportError::InvalidMessage(
            "Missing or invalid jsonrpc version".into(),
        ));
    }

    // Requests like `tools/list` or `ping` may omit params entirely
    if obj.contains_key("method") && !obj.contains_key("params") {
        obj.insert("params".to_string(), serde_json::json!({}));
    }

    serde_json::from_value::<JsonRpcMessage>(value)
        .map_err(|e| TransportError::InvalidMessage(e.to_string()))
}

impl<R, W> Stream for ByteTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    type Item = Result<JsonRpcMessage, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            let mut reader = this.reader.as_mut();
            let read = {
                let mut read_future = Box::pin(reader.read_until(b'\n', &mut *this.line));
                match read_future.as_mut().poll(cx) {
                    Poll::Ready(result) => result,
                    Poll::Pending => return Poll::Pending,
                }
            };

            match read {
                // EOF with nothing buffered
                Ok(0) if this.line.is_empty() => return Poll::Ready(None),
                Ok(_) => {}
                Err(e) => return Poll::Ready(Some(Err(TransportError::Io(e)))),
            }

            let bytes = std::mem::take(&mut *this.line);
            let line = match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => return Poll::Ready(Some(Err(TransportError::Utf8(e)))),
            };
            if line.trim().is_empty() {
                continue;
            }

            // Log incoming message here before serde conversion to
            // track incomplete chunks which are not valid JSON
            tracing::info!(json = %line.trim_end(), "incoming message");

            return Poll::Ready(Some(parse_message(&line)));
        }
    }
}

impl<R, W> ByteTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub async fn write_message(&mut self, msg: JsonRpcMessage) -> Result<(), std::io::Error> {
        let json = serde_json::to_string(&msg)?;
        Pin::new(&mut self.writer)
            .write_all(json.as_bytes())
            .await?;
        Pin::new(&mut self.writer).write_all(b"\n").await?;
        Pin::new(&mut self.writer).flush().await?;
        Ok(())
    }
}

/// Completion of one dispatched request. `message` is `None` when the request was
/// cancelled and must not be answered.
struct Completion {
    key: String,
    seq: u64,
    message: Option<JsonRpcMessage>,
}

struct InFlight {
    seq: u64,
    cancel: CancellationToken,
}

/// The main server type that processes incoming requests
pub struct Server<S> {
    service: S,
}

impl<S> Server<S>
where
    S: Service<McpRequest, Response = JsonRpcMessage> + Send,
    S::Error: Into<BoxError> + Send + 'static,
    S::Future: Send + 'static,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Serves requests until the reader reaches EOF and every in-flight request has
    /// completed.
    ///
    /// Each request runs on its own task so a slow tool call does not hold up
    /// `ping` or a `notifications/cancelled` for it. A failed request never stops
    /// the loop; only transport write failures do.
    pub async fn run<R, W>(self, mut transport: ByteTransport<R, W>) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut service = self.service;
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(256);
        let mut in_flight: HashMap<String, InFlight> = HashMap::new();
        let mut pending = 0usize;
        let mut next_seq = 0u64;
        let mut reading = true;

        tracing::info!("Server started");
        loop {
            if !reading && pending == 0 {
                break;
            }

            tokio::select! {
                msg_result = transport.next(), if reading => {
                    match msg_result {
                        None => {
                            tracing::info!(pending, "Input closed");
                            reading = false;
                        }
                        Some(Ok(JsonRpcMessage::Request(request))) => {
                            let request_json = serde_json::to_string(&request)
                                .unwrap_or_else(|_| "Failed to serialize request".to_string());

                            tracing::info!(
                                method = ?request.request.method,
                                json = %request_json,
                                "Received request"
                            );

                            let key = request_key(&request.id);
                            let seq = next_seq;
                            next_seq += 1;
                            let cancel = CancellationToken::new();
                            let entry = InFlight { seq, cancel: cancel.clone() };
                            if let Some(previous) = in_flight.insert(key.clone(), entry) {
                                tracing::warn!(id = %key, "Request id reused while still in flight");
                                previous.cancel.cancel();
                            }
                            pending += 1;

                            let id = request.id.clone();
                            let response_fut = service.call(McpRequest {
                                request,
                                cancel: cancel.clone(),
                            });
                            let done_tx = done_tx.clone();
                            tokio::spawn(async move {
                                let message = match AssertUnwindSafe(response_fut).catch_unwind().await {
                                    _ if cancel.is_cancelled() => {
                                        tracing::info!(id = %id, "Request cancelled, dropping response");
                                        None
                                    }
                                    Ok(Ok(message)) => Some(message),
                                    Ok(Err(e)) => {
                                        let error_msg = e.into().to_string();
                                        tracing::error!(error = %error_msg, "Request processing failed");
                                        Some(error_message(id, ErrorData {
                                            code: rmcp::model::ErrorCode::INTERNAL_ERROR,
                                            message: error_msg.into(),
                                            data: None,
                                        }))
                                    }
                                    Err(_) => {
                                        tracing::error!(id = %id, "Request handler panicked");
                                        Some(error_message(id, ErrorData {
                                            code: rmcp::model::ErrorCode::INTERNAL_ERROR,
                                            message: "Internal error: request handler panicked".into(),
                                            data: None,
                                        }))
                                    }
                                };
                                let _ = done_tx.send(Completion { key, seq, message }).await;
                            });
                        }
                        Some(Ok(JsonRpcMessage::Notification(notification))) => {
                            handle_notification(notification, &in_flight);
                        }
                        Some(Ok(
                            JsonRpcMessage::Response(_)
                            | JsonRpcMessage::BatchRequest(_)
                            | JsonRpcMessage::BatchResponse(_)
                            | JsonRpcMessage::Error(_),
                        )) => {
                            // Ignore responses, batch messages and error messages for now
                            continue;
                        }
                        Some(Err(e)) => {
                            // Convert transport error to JSON-RPC error response
                            tracing::warn!(error = %e, "Failed to read message");
                            let error_data = match e {
                                TransportError::Json(_) => ErrorData {
                                    code: rmcp::model::ErrorCode::PARSE_ERROR,
                                    message: e.to_string().into(),
                                    data: None,
                                },
                                TransportError::InvalidMessage(_) | TransportError::Protocol(_) => ErrorData {
                                    code: rmcp::model::ErrorCode::INVALID_REQUEST,
                                    message: e.to_string().into(),
                                    data: None,
                                },
                                _ => ErrorData {
                                    code: rmcp::model::ErrorCode::INTERNAL_ERROR,
                                    message: e.to_string().into(),
                                    data: None,
                                },
                            };

                            // Use a default ID for transport errors
                            let error_response = error_message(RequestId::Number(0), error_data);
                            if let Err(e) = transport.write_message(error_response).await {
                                return Err(ServerError::Transport(TransportError::Io(e)));
                            }
                        }
                    }
                }
                Some(Completion { key, seq, message }) = done_rx.recv() => {
                    pending -= 1;
                    if in_flight.get(&key).is_some_and(|entry| entry.seq == seq) {
                        in_flight.remove(&key);
                    }
                    let Some(message) = message else {
                        continue;
                    };

                    // Serialize response for logging
                    let response_json = serde_json::to_string(&message)
                        .unwrap_or_else(|_| "Failed to serialize response".to_string());
                    tracing::info!(response_id = %key, json = %response_json, "Sending response");

                    if let Err(e) = transport.write_message(message).await {
                        return Err(ServerError::Transport(TransportError::Io(e)));
                    }
                }
            }
        }

        Ok(())
    }
}

fn error_message(id: RequestId, error: ErrorData) -> JsonRpcMessage {
    JsonRpcMessage::Error(JsonRpcError {
        jsonrpc: JsonRpcVersion2_0,
        id,
        error,
    })
}

/// In-flight key for a request id. Numeric and string ids never share a key.
fn request_key(id: &RequestId) -> String {
    match id {
        RequestId::Number(n) => format!("n:{n}"),
        RequestId::String(s) => format!("s:{s}"),
    }
}

fn handle_notification(notification: JsonRpcNotification, in_flight: &HashMap<String, InFlight>) {
    let method = notification.notification.method.as_str();
    match method {
        "notifications/cancelled" => {
            let params = serde_json::Value::Object(notification.notification.params);
            match serde_json::from_value::<mcp_core::protocol::CancelledParams>(params) {
                Ok(cancelled) => {
                    let key = request_key(&cancelled.request_id);
                    match in_flight.get(&key) {
                        Some(entry) => {
                            tracing::info!(id = %key, reason = ?cancelled.reason, "Cancelling request");
                            entry.cancel.cancel();
                        }
                        None => tracing::debug!(id = %key, "Cancellation for unknown request"),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Malformed cancellation notification"),
            }
        }
        _ => tracing::debug!(method, "Ignoring notification"),
    }
}
