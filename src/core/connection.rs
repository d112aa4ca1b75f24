//! Connection state machine for one downstream instance.
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected`, with `Error` on
//! a failed handshake, `Disabled` reachable from any state via disable,
//! and `Closed` terminal on removal. The tool cache is only valid while
//! Connected and is cleared the moment the connection leaves that state.

use crate::config::types::InstanceConfig;
use crate::core::protocol::JsonRpcRequest;
use crate::transport::traits::{Transport, TransportFactory};
use crate::utils::errors::{RouterError, RouterResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Disabled,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
            ConnectionState::Disabled => write!(f, "disabled"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// One tool advertised by a downstream instance. Descriptors are owned by
/// exactly one connection; identical tool names on different instances
/// stay distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

/// Runtime state paired with one instance configuration.
pub struct Connection {
    pub config: InstanceConfig,
    pub state: ConnectionState,
    pub tools: Vec<ToolDescriptor>,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Bumped on every config replacement; a connect attempt whose
    /// version was superseded mid-flight is discarded.
    pub config_version: u64,
    pub(crate) transport: Option<Arc<dyn Transport>>,
}

impl Connection {
    pub fn new(config: InstanceConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            tools: Vec::new(),
            last_error: None,
            last_connected_at: None,
            config_version: 0,
            transport: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn mark_connected(&mut self, transport: Arc<dyn Transport>, tools: Vec<ToolDescriptor>) {
        self.state = ConnectionState::Connected;
        self.transport = Some(transport);
        self.tools = tools;
        self.last_error = None;
        self.last_connected_at = Some(Utc::now());
    }

    /// Leave Connected (or any state) for `state`, clearing the tool
    /// cache and dropping the transport handle.
    pub fn mark_disconnected(
        &mut self,
        state: ConnectionState,
        error: Option<String>,
    ) -> Option<Arc<dyn Transport>> {
        debug_assert!(state != ConnectionState::Connected);
        self.state = state;
        self.tools.clear();
        if let Some(message) = error {
            self.last_error = Some(message);
        }
        self.transport.take()
    }

    /// Replace the configuration, bumping the version so stale in-flight
    /// connect attempts get discarded.
    pub fn replace_config(&mut self, config: InstanceConfig) {
        self.config = config;
        self.config_version += 1;
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.clone()
    }
}

/// Connect to a downstream instance and run the MCP handshake:
/// `initialize`, then the `notifications/initialized` notification, then
/// one `tools/list` to populate the cache. The whole attempt is bounded
/// by `timeout`.
pub async fn establish(
    factory: &dyn TransportFactory,
    config: &InstanceConfig,
    timeout: Duration,
) -> RouterResult<(Arc<dyn Transport>, Vec<ToolDescriptor>)> {
    match tokio::time::timeout(timeout, handshake(factory, config, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(RouterError::Timeout(timeout.as_millis() as u64)),
    }
}

async fn handshake(
    factory: &dyn TransportFactory,
    config: &InstanceConfig,
    timeout: Duration,
) -> RouterResult<(Arc<dyn Transport>, Vec<ToolDescriptor>)> {
    let transport: Arc<dyn Transport> = Arc::from(factory.connect(config, timeout).await?);

    let init = JsonRpcRequest::new(
        "initialize",
        Some(serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcp-router",
                "version": env!("CARGO_PKG_VERSION"),
            },
        })),
    );

    let response = transport.send_request(init).await?;
    if let Some(error) = response.error {
        return Err(RouterError::Connection(format!(
            "initialize failed: {}",
            error.message
        )));
    }

    transport
        .send_notification(JsonRpcRequest::new("notifications/initialized", None))
        .await?;

    let tools = fetch_tools(transport.as_ref()).await?;

    Ok((transport, tools))
}

/// Query the downstream's tool list once.
pub async fn fetch_tools(transport: &dyn Transport) -> RouterResult<Vec<ToolDescriptor>> {
    let response = transport
        .send_request(JsonRpcRequest::new("tools/list", None))
        .await?;

    if let Some(error) = response.error {
        return Err(RouterError::Connection(format!(
            "tools/list failed: {}",
            error.message
        )));
    }

    let raw_tools = response
        .result
        .and_then(|r| r.get("tools").cloned())
        .and_then(|t| t.as_array().cloned())
        .unwrap_or_default();

    let mut tools = Vec::with_capacity(raw_tools.len());
    for raw in raw_tools {
        match serde_json::from_value::<ToolDescriptor>(raw) {
            Ok(tool) => tools.push(tool),
            Err(e) => {
                tracing::warn!("skipping malformed tool descriptor: {}", e);
            }
        }
    }

    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::TransportKind;
    use std::collections::HashMap;

    fn config() -> InstanceConfig {
        InstanceConfig {
            name: "test".into(),
            transport: TransportKind::Stdio,
            command: Some("echo".into()),
            args: vec![],
            env: HashMap::new(),
            url: None,
            is_active: true,
            provider: "test".into(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_new_connection_is_disconnected() {
        let conn = Connection::new(config());
        assert_eq!(conn.state, ConnectionState::Disconnected);
        assert!(conn.tools.is_empty());
        assert_eq!(conn.config_version, 0);
    }

    #[test]
    fn test_mark_disconnected_clears_tool_cache() {
        let mut conn = Connection::new(config());
        conn.state = ConnectionState::Connected;
        conn.tools = vec![ToolDescriptor {
            name: "search".into(),
            description: None,
            input_schema: serde_json::json!({}),
        }];

        conn.mark_disconnected(ConnectionState::Disconnected, Some("gone".into()));
        assert!(conn.tools.is_empty());
        assert_eq!(conn.last_error.as_deref(), Some("gone"));
    }

    #[test]
    fn test_replace_config_bumps_version() {
        let mut conn = Connection::new(config());
        let mut updated = config();
        updated.args = vec!["--verbose".into()];

        conn.replace_config(updated);
        assert_eq!(conn.config_version, 1);
        assert_eq!(conn.config.args, vec!["--verbose".to_string()]);
    }

    #[test]
    fn test_tool_descriptor_parses_input_schema() {
        let raw = serde_json::json!({
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}
        });
        let tool: ToolDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(tool.name, "read_file");
        assert!(tool.input_schema.get("properties").is_some());
    }
}
