//! The server loop.
//!
//! One line in, at most one line out. `tools/call` requests run on their own
//! tasks so a slow send does not hold up a `ping`; every response goes
//! through a single writer task so lines never interleave.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{
    negotiate_version, Incoming, JsonRpcError, JsonRpcResponse, McpError, INVALID_PARAMS,
    METHOD_NOT_FOUND,
};
use crate::tools::{ToolCall, ToolDispatcher};

const SERVER_NAME: &str = "whatsapp";

/// MCP server exposing the WhatsApp tools.
#[derive(Clone)]
pub struct McpServer {
    dispatcher: Arc<ToolDispatcher>,
}

impl McpServer {
    /// Serve tools from `dispatcher`.
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Serve on the process's stdin and stdout until stdin closes.
    ///
    /// # Errors
    ///
    /// Returns an error if stdin cannot be read or stdout cannot be written.
    pub async fn run_stdio(&self) -> Result<(), McpError> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }

    /// Serve requests read from `reader`, writing responses to `writer`.
    ///
    /// Returns once `reader` reaches EOF and every in-flight call has
    /// answered.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure on either side.
    pub async fn serve<R, W>(&self, mut reader: R, writer: W) -> Result<(), McpError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let mut in_flight = JoinSet::new();

        info!(tools = self.dispatcher.registry().len(), "MCP server ready");

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match Incoming::parse(trimmed) {
                Err(response) => {
                    warn!("rejected malformed request");
                    send(&tx, response);
                }
                Ok(Incoming::Notification { method }) => self.on_notification(&method),
                Ok(Incoming::Request { id, method, params }) if method == "tools/call" => {
                    match parse_call(params) {
                        Ok(call) => {
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let tx = tx.clone();
                            in_flight.spawn(async move {
                                let result = dispatcher.handle(&call).await;
                                send(&tx, JsonRpcResponse::result(id, result.to_mcp()));
                            });
                        }
                        Err(error) => send(&tx, JsonRpcResponse::error(id, error)),
                    }
                }
                Ok(Incoming::Request { id, method, params }) => {
                    let response = match self.on_request(&method, params.as_ref()) {
                        Ok(result) => JsonRpcResponse::result(id, result),
                        Err(error) => JsonRpcResponse::error(id, error),
                    };
                    send(&tx, response);
                }
            }

            // Reap finished calls so the set does not grow without bound.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    warn!(error = %e, "tool call task failed");
                }
            }
        }

        debug!("input closed, waiting for in-flight calls");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "tool call task failed");
            }
        }
        drop(tx);

        match writer_task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(McpError::Writer(e.to_string())),
        }
    }

    /// Answer a request other than `tools/call`.
    fn on_request(&self, method: &str, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        match method {
            "initialize" => {
                let version = negotiate_version(params.and_then(Value::as_object));
                info!(protocol_version = version, "client initialized session");
                Ok(json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.dispatcher.registry().definitions() })),
            other => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        }
    }

    fn on_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => debug!("client finished initialization"),
            "notifications/cancelled" => debug!("client cancelled a request"),
            other => debug!(method = other, "ignoring notification"),
        }
    }
}

fn parse_call(params: Option<Value>) -> Result<ToolCall, JsonRpcError> {
    let params = params
        .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "tools/call requires params"))?;
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("invalid tools/call params: {e}")))
}

fn send(tx: &mpsc::UnboundedSender<JsonRpcResponse>, response: JsonRpcResponse) {
    if tx.send(response).is_err() {
        warn!("response dropped, writer has stopped");
    }
}

async fn write_responses<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>,
) -> Result<(), McpError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut bytes = serde_json::to_vec(&response)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}
