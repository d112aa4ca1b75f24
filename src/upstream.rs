//! Upstream-facing MCP server over stdio.
//!
//! The router itself speaks MCP to the client that drives it: one
//! JSON-RPC message per line on stdin/stdout. Instead of re-exporting
//! every downstream tool, it exposes a fixed set of `router.*`
//! meta-tools the client navigates instances with.

use crate::config::store::parse_instance_config;
use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::core::router::{Router, RouterSession};
use crate::utils::errors::{RouterError, RouterResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

const SERVER_PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

pub struct UpstreamServer {
    router: Arc<Router>,
    session: RouterSession,
}

impl UpstreamServer {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            session: RouterSession::new(),
        }
    }

    /// Serve stdin/stdout until the upstream closes the pipe.
    pub async fn run(&self) -> RouterResult<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();

        info!("upstream server listening on stdio");
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut payload = serde_json::to_string(&response)?;
                payload.push('\n');
                stdout.write_all(payload.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
        info!("upstream closed stdin, shutting down");
        Ok(())
    }

    /// Handle one raw line. Notifications produce no response.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("unparseable upstream message: {}", e);
                return Some(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("parse error: {}", e),
                ));
            }
        };

        if request.is_notification() {
            debug!(method = %request.method, "upstream notification");
            return None;
        }
        Some(self.handle_request(request).await)
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let Some(id) = id else {
            return JsonRpcResponse::error(None, INVALID_PARAMS, "request without id");
        };

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": SERVER_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "mcp-router",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                json!({ "tools": self.tool_descriptors() }),
            ),
            "tools/call" => {
                let params = request.params.unwrap_or(Value::Null);
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return JsonRpcResponse::error(id.into(), INVALID_PARAMS, "missing tool name");
                };
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                match self.dispatch_tool(name, &arguments).await {
                    Ok(value) => JsonRpcResponse::success(id, tool_content(value, false)),
                    Err(e) => JsonRpcResponse::success(
                        id,
                        tool_content(
                            json!({ "error": e.to_string(), "code": e.error_code() }),
                            true,
                        ),
                    ),
                }
            }
            other => JsonRpcResponse::error(
                id.into(),
                METHOD_NOT_FOUND,
                format!("method not found: {}", other),
            ),
        }
    }

    /// Meta-tool descriptors. Management verbs only appear when
    /// instance management is enabled.
    pub fn tool_descriptors(&self) -> Vec<Value> {
        let mut tools = vec![
            json!({
                "name": "router.list",
                "description": "List all registered instances with their connection state",
                "inputSchema": { "type": "object", "properties": {} },
            }),
            json!({
                "name": "router.use",
                "description": "Select the instance that subsequent calls go to",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Instance name" },
                    },
                    "required": ["name"],
                },
            }),
            json!({
                "name": "router.help",
                "description": "List available tools across all connected instances, keyed by instance name",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Optional instance name to narrow the listing" },
                    },
                },
            }),
            json!({
                "name": "router.call",
                "description": "Invoke a tool on an instance",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "tool": { "type": "string", "description": "Tool name on the target instance" },
                        "arguments": { "type": "object", "description": "Arguments forwarded to the tool" },
                        "instance": { "type": "string", "description": "Target instance; defaults to the selected instance" },
                    },
                    "required": ["tool"],
                },
            }),
        ];

        if self.router.management_enabled() {
            tools.extend([
                json!({
                    "name": "router.add",
                    "description": "Register a new instance and connect to it",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "config": { "type": "object", "description": "Instance configuration (name, type, command/url, ...)" },
                        },
                        "required": ["config"],
                    },
                }),
                json!({
                    "name": "router.remove",
                    "description": "Disconnect and unregister an instance",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string", "description": "Instance name" },
                        },
                        "required": ["name"],
                    },
                }),
                json!({
                    "name": "router.enable",
                    "description": "Activate an instance and reconnect it",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string", "description": "Instance name" },
                        },
                        "required": ["name"],
                    },
                }),
                json!({
                    "name": "router.disable",
                    "description": "Deactivate an instance and drop its connection",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string", "description": "Instance name" },
                        },
                        "required": ["name"],
                    },
                }),
            ]);
        }
        tools
    }

    /// Route one meta-tool invocation.
    pub async fn dispatch_tool(&self, name: &str, arguments: &Value) -> RouterResult<Value> {
        match name {
            "router.list" => {
                let instances = self.router.list().await;
                Ok(json!({ "instances": instances }))
            }
            "router.use" => {
                let target = required_str(arguments, "name")?;
                let (status, tools) = self.router.use_instance(&self.session, target).await?;
                Ok(json!({ "selected": status, "tools": tools }))
            }
            "router.help" => {
                let target = arguments.get("name").and_then(Value::as_str);
                let listings = self.router.help(target).await?;
                let entries: Vec<Value> = listings
                    .into_iter()
                    .map(|(instance, tools)| json!({ "instance": instance, "tools": tools }))
                    .collect();
                Ok(json!({ "instances": entries }))
            }
            "router.call" => {
                let tool = required_str(arguments, "tool")?;
                let instance = arguments.get("instance").and_then(Value::as_str);
                let call_args = arguments
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let result = self
                    .router
                    .call(&self.session, tool, call_args, instance)
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            "router.add" => {
                let config_value = arguments
                    .get("config")
                    .ok_or_else(|| RouterError::Config("missing 'config' argument".into()))?;
                let config = parse_instance_config(&serde_json::to_string(config_value)?)?;
                let status = self.router.add(config).await?;
                Ok(json!({ "added": status }))
            }
            "router.remove" => {
                let target = required_str(arguments, "name")?;
                self.router.remove(target).await?;
                Ok(json!({ "removed": target }))
            }
            "router.enable" => {
                let target = required_str(arguments, "name")?;
                self.router.enable(target).await?;
                Ok(json!({ "enabled": target }))
            }
            "router.disable" => {
                let target = required_str(arguments, "name")?;
                self.router.disable(target).await?;
                Ok(json!({ "disabled": target }))
            }
            other => Err(RouterError::ToolNotFound {
                tool: other.to_string(),
                instance: "router".to_string(),
            }),
        }
    }
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> RouterResult<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RouterError::Config(format!("missing '{}' argument", key)))
}

/// Wrap a payload in the MCP tool-result content shape.
fn tool_content(value: Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}
