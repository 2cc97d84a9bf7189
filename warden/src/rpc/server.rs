//! JSON-RPC 2.0 tool server over line-delimited stdio.
//!
//! One request per line on stdin, one reply per line on stdout; stderr is
//! reserved for logging. The server validates the JSON-RPC framing itself
//! (version tag, method, notification semantics: a request without an id
//! gets no reply, except for parse failures, which are answered with a null
//! id as the protocol requires). Tool handlers return either a result value
//! or a structured [`ErrorEnvelope`], which travels in the failure `data`
//! field so callers always see the gateway's own refusal shape.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::errors::ErrorEnvelope;

/// Tool-call protocol revision spoken on `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const CODE_PARSE_ERROR: i32 = -32700;
const CODE_INVALID_REQUEST: i32 = -32600;
const CODE_METHOD_NOT_FOUND: i32 = -32601;
const CODE_INVALID_PARAMS: i32 = -32602;
const CODE_TOOL_FAILED: i32 = -32603;

/// Async tool handler: arguments in, result value or envelope out.
pub type ToolHandler = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, ErrorEnvelope>> + Send>>
        + Send
        + Sync,
>;

/// Wire-visible description of one registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// JSON-RPC failure object. `data` carries the gateway's error envelope for
/// tool refusals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFailure {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcFailure {
    fn new(code: i32, message: impl Into<String>) -> Self {
        RpcFailure {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn from_envelope(envelope: ErrorEnvelope) -> Self {
        RpcFailure {
            code: CODE_TOOL_FAILED,
            message: envelope.human_message.clone(),
            data: serde_json::to_value(&envelope).ok(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Reply {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcFailure>,
}

impl Reply {
    fn encode(id: Value, outcome: Result<Value, RpcFailure>) -> String {
        let reply = match outcome {
            Ok(result) => Reply {
                jsonrpc: "2.0",
                id,
                result: Some(result),
                error: None,
            },
            Err(failure) => Reply {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(failure),
            },
        };
        serde_json::to_string(&reply).unwrap_or_else(|e| {
            format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{{\"code\":{},\"message\":\"reply failed to serialise: {}\"}}}}",
                CODE_TOOL_FAILED, e
            )
        })
    }
}

#[derive(Debug, Serialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: &'static str,
    capabilities: Capabilities,
    #[serde(rename = "serverInfo")]
    server_info: ServerIdentity,
}

#[derive(Debug, Serialize)]
struct Capabilities {
    tools: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
struct ServerIdentity {
    name: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

pub struct RpcServer {
    identity: ServerIdentity,
    tools: BTreeMap<String, RegisteredTool>,
}

impl RpcServer {
    pub fn new(name: &str, version: &str) -> Self {
        RpcServer {
            identity: ServerIdentity {
                name: name.to_string(),
                version: version.to_string(),
            },
            tools: BTreeMap::new(),
        }
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn register_tool(
        &mut self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: ToolHandler,
    ) {
        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                definition: ToolDefinition {
                    name: name.to_string(),
                    description: description.to_string(),
                    input_schema,
                },
                handler,
            },
        );
    }

    /// Serve stdin/stdout until the client disconnects.
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve arbitrary streams; tests drive this directly.
    pub async fn serve<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(input).lines();
        while let Some(line) = lines.next_line().await? {
            let Some(reply) = self.handle_line(&line).await else {
                continue;
            };
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok(())
    }

    /// Process one wire line. Returns the encoded reply, or `None` when the
    /// line needs no answer (blank, or a well-formed notification).
    pub async fn handle_line(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let message: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return Some(Reply::encode(
                    Value::Null,
                    Err(RpcFailure::new(
                        CODE_PARSE_ERROR,
                        format!("line is not valid JSON: {}", e),
                    )),
                ));
            }
        };

        let id = message.get("id").cloned();
        let reply_to = |outcome: Result<Value, RpcFailure>| {
            id.clone().map(|id| Reply::encode(id, outcome))
        };

        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return reply_to(Err(RpcFailure::new(
                CODE_INVALID_REQUEST,
                "the jsonrpc field must be the string \"2.0\"",
            )));
        }
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return reply_to(Err(RpcFailure::new(
                CODE_INVALID_REQUEST,
                "the request names no method",
            )));
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let outcome = self.dispatch(method, params).await;
        if let (None, Err(failure)) = (&id, &outcome) {
            tracing::debug!(method, code = failure.code, "notification failed silently");
        }
        reply_to(outcome)
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        match method {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({ "pong": true })),
            "tools/list" => Ok(self.tools_result()),
            "tools/call" => self.call_tool(params).await,
            other => Err(RpcFailure::new(
                CODE_METHOD_NOT_FOUND,
                format!("no such method '{}'", other),
            )),
        }
    }

    fn initialize_result(&self) -> Value {
        serde_json::to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION,
            capabilities: Capabilities {
                tools: BTreeMap::new(),
            },
            server_info: self.identity.clone(),
        })
        .unwrap_or(Value::Null)
    }

    fn tools_result(&self) -> Value {
        let definitions: Vec<&ToolDefinition> =
            self.tools.values().map(|t| &t.definition).collect();
        json!({ "tools": definitions })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, RpcFailure> {
        let call: CallParams = serde_json::from_value(params).map_err(|e| {
            RpcFailure::new(
                CODE_INVALID_PARAMS,
                format!("tools/call needs a tool name and an arguments object: {}", e),
            )
        })?;
        let tool = self.tools.get(&call.name).ok_or_else(|| {
            RpcFailure::new(
                CODE_METHOD_NOT_FOUND,
                format!("no tool named '{}' is registered", call.name),
            )
        })?;

        let arguments = match call.arguments {
            Value::Null => json!({}),
            other => other,
        };
        match (tool.handler)(arguments).await {
            Ok(value) => Ok(json!({
                "content": [{
                    "type": "text",
                    "text": serde_json::to_string_pretty(&value).unwrap_or_default()
                }]
            })),
            Err(envelope) => Err(RpcFailure::from_envelope(envelope)),
        }
    }
}
