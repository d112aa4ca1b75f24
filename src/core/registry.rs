//! The authoritative in-memory table of instances and their connections.
//!
//! Every mutating operation (register, remove, enable, disable,
//! reconfigure) is serialized through one async mutex so concurrent
//! triggers cannot race on the same name. Reads go through snapshots and
//! never take that lock.

use crate::config::types::InstanceConfig;
use crate::core::connection::{self, Connection, ConnectionState, ToolDescriptor};
use crate::core::protocol::JsonRpcRequest;
use crate::transport::traits::TransportFactory;
use crate::utils::errors::{RouterError, RouterResult};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Snapshot of one instance, as reported by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub name: String,
    pub provider: String,
    pub active: bool,
    pub connected: bool,
    pub state: ConnectionState,
    pub transport: String,
    pub tools_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct Registry {
    connections: DashMap<String, Arc<RwLock<Connection>>>,
    /// provider settings path -> instance name, for watcher diffing
    providers: DashMap<PathBuf, String>,
    factory: Arc<dyn TransportFactory>,
    timeout: Duration,
    /// Serialization point for all registry mutations.
    mutation: Mutex<()>,
}

impl Registry {
    pub fn new(factory: Arc<dyn TransportFactory>, timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            providers: DashMap::new(),
            factory,
            timeout,
            mutation: Mutex::new(()),
        }
    }

    /// Register a new instance in Disconnected state. Fails with
    /// DuplicateName without touching existing state.
    pub async fn register(
        &self,
        provider_path: PathBuf,
        config: InstanceConfig,
    ) -> RouterResult<()> {
        let _guard = self.mutation.lock().await;

        let name = config.name.clone();
        if self.connections.contains_key(&name) {
            return Err(RouterError::DuplicateName(name));
        }

        info!(instance = %name, provider = %config.provider, "registering instance");
        self.connections
            .insert(name.clone(), Arc::new(RwLock::new(Connection::new(config))));
        self.providers.insert(provider_path, name);
        Ok(())
    }

    /// Remove an instance: disconnect if live, evict both maps. A second
    /// removal of the same name fails with NotFound, registry unchanged.
    pub async fn remove(&self, name: &str) -> RouterResult<InstanceConfig> {
        let _guard = self.mutation.lock().await;

        let (_, conn) = self
            .connections
            .remove(name)
            .ok_or_else(|| RouterError::NotFound(name.to_string()))?;

        self.providers.retain(|_, mapped| mapped != name);

        let (config, transport) = {
            let mut conn = conn.write().await;
            let transport = conn.mark_disconnected(ConnectionState::Closed, None);
            (conn.config.clone(), transport)
        };

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(instance = %name, "error closing transport: {}", e);
            }
        }

        info!(instance = %name, "instance removed");
        Ok(config)
    }

    /// Disable: sever the live connection but keep the registry entry.
    pub async fn disable(&self, name: &str) -> RouterResult<()> {
        let _guard = self.mutation.lock().await;

        let conn = self.get(name).ok_or_else(|| RouterError::NotFound(name.to_string()))?;
        let transport = {
            let mut conn = conn.write().await;
            conn.config.is_active = false;
            // Invalidate any connect attempt still in flight, so a quick
            // disable/enable cycle cannot adopt the pre-disable result.
            conn.config_version += 1;
            conn.mark_disconnected(ConnectionState::Disabled, None)
        };

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(instance = %name, "error closing transport: {}", e);
            }
        }

        info!(instance = %name, "instance disabled");
        Ok(())
    }

    /// Enable: mark active again. The caller is responsible for kicking
    /// off the reconnect.
    pub async fn enable(&self, name: &str) -> RouterResult<()> {
        let _guard = self.mutation.lock().await;

        let conn = self.get(name).ok_or_else(|| RouterError::NotFound(name.to_string()))?;
        let mut conn = conn.write().await;
        conn.config.is_active = true;
        if conn.state != ConnectionState::Connected {
            conn.state = ConnectionState::Disconnected;
        }

        info!(instance = %name, "instance enabled");
        Ok(())
    }

    /// Replace an instance's configuration and reconnect with the new
    /// parameters. Any in-flight connect attempt for the old version is
    /// discarded when it resolves.
    pub async fn reconfigure(&self, name: &str, config: InstanceConfig) -> RouterResult<bool> {
        let _guard = self.mutation.lock().await;

        let conn = self.get(name).ok_or_else(|| RouterError::NotFound(name.to_string()))?;
        let (transport, active) = {
            let mut conn = conn.write().await;
            let active = config.is_active;
            conn.replace_config(config);
            let next_state = if active {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Disabled
            };
            (conn.mark_disconnected(next_state, None), active)
        };

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(instance = %name, "error closing transport: {}", e);
            }
        }

        info!(instance = %name, "instance reconfigured");
        Ok(active)
    }

    /// Run one connect attempt to completion. The result is written back
    /// under the connection lock, and discarded if the config version
    /// moved on in the meantime.
    pub async fn connect_instance(&self, name: &str) {
        let Some(conn) = self.get(name) else {
            return;
        };

        // Claim the attempt: at most one in-flight connect per instance.
        let (version, config) = {
            let mut conn = conn.write().await;
            match conn.state {
                ConnectionState::Connecting => {
                    debug!(instance = %name, "connect already in flight");
                    return;
                }
                ConnectionState::Disabled | ConnectionState::Closed | ConnectionState::Connected => {
                    return;
                }
                ConnectionState::Disconnected | ConnectionState::Error => {}
            }
            conn.state = ConnectionState::Connecting;
            (conn.config_version, conn.config.clone())
        };

        let result = connection::establish(self.factory.as_ref(), &config, self.timeout).await;

        let mut conn = conn.write().await;
        if conn.config_version != version || conn.state != ConnectionState::Connecting {
            // Superseded mid-flight: the newer attempt wins.
            debug!(instance = %name, "discarding stale connect result");
            if let Ok((transport, _)) = result {
                tokio::spawn(async move {
                    let _ = transport.close().await;
                });
            }
            return;
        }

        match result {
            Ok((transport, tools)) => {
                info!(instance = %name, tools = tools.len(), "instance connected");
                conn.mark_connected(transport, tools);
            }
            Err(e) => {
                error!(instance = %name, "connect failed: {}", e);
                conn.mark_disconnected(ConnectionState::Error, Some(e.to_string()));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<RwLock<Connection>>> {
        self.connections.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn name_for_path(&self, path: &Path) -> Option<String> {
        self.providers.get(path).map(|entry| entry.value().clone())
    }

    /// Consistent snapshot of all instances, sorted by name.
    pub async fn snapshot(&self) -> Vec<InstanceStatus> {
        let handles: Vec<_> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            let conn = handle.read().await;
            statuses.push(InstanceStatus {
                name: conn.config.name.clone(),
                provider: conn.config.provider.clone(),
                active: conn.config.is_active,
                connected: conn.is_connected(),
                state: conn.state,
                transport: conn.config.transport.to_string(),
                tools_count: conn.tools.len(),
                last_error: conn.last_error.clone(),
                last_connected_at: conn.last_connected_at,
            });
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Cached tools of every active, connected instance, keyed by
    /// instance name.
    pub async fn all_tools(&self) -> BTreeMap<String, Vec<ToolDescriptor>> {
        let handles: Vec<_> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut result = BTreeMap::new();
        for handle in handles {
            let conn = handle.read().await;
            if conn.config.is_active && conn.is_connected() {
                result.insert(conn.config.name.clone(), conn.tools.clone());
            }
        }
        result
    }

    /// Refresh an instance's tool cache if it is Connected and the cache
    /// is empty. No-op otherwise.
    pub async fn refresh_tools(&self, name: &str) -> RouterResult<Vec<ToolDescriptor>> {
        let conn = self.get(name).ok_or_else(|| RouterError::NotFound(name.to_string()))?;

        let transport = {
            let conn = conn.read().await;
            if !conn.is_connected() || !conn.tools.is_empty() {
                return Ok(conn.tools.clone());
            }
            conn.transport()
        };

        let Some(transport) = transport else {
            return Ok(Vec::new());
        };

        let tools = connection::fetch_tools(transport.as_ref()).await?;
        let mut conn = conn.write().await;
        if conn.is_connected() {
            conn.tools = tools.clone();
        }
        Ok(tools)
    }

    /// Forward one tool call through the owning connection's transport.
    pub async fn call_tool(
        &self,
        name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> RouterResult<crate::core::protocol::JsonRpcResponse> {
        let conn = self.get(name).ok_or_else(|| RouterError::NotFound(name.to_string()))?;

        let transport = {
            let conn = conn.read().await;
            if !conn.config.is_active {
                return Err(RouterError::State(format!(
                    "instance '{}' is not active",
                    name
                )));
            }
            if !conn.is_connected() {
                return Err(RouterError::State(format!(
                    "instance '{}' is not connected (state: {})",
                    name, conn.state
                )));
            }
            if !conn.tools.iter().any(|t| t.name == tool_name) {
                return Err(RouterError::ToolNotFound {
                    tool: tool_name.to_string(),
                    instance: name.to_string(),
                });
            }
            conn.transport().ok_or_else(|| {
                RouterError::Connection(format!("instance '{}' has no transport", name))
            })?
        };

        let request = JsonRpcRequest::new(
            "tools/call",
            Some(serde_json::json!({
                "name": tool_name,
                "arguments": arguments,
            })),
        );

        match transport.send_request(request).await {
            Ok(response) => Ok(response),
            Err(RouterError::Connection(message)) => {
                // Transport failure: the connection is no longer healthy.
                let mut conn = conn.write().await;
                if conn.is_connected() {
                    conn.mark_disconnected(
                        ConnectionState::Disconnected,
                        Some(message.clone()),
                    );
                }
                Err(RouterError::Connection(message))
            }
            // A single slow call does not evict a healthy connection.
            Err(e) => Err(e),
        }
    }

    /// Close every connection. Used at process shutdown.
    pub async fn shutdown(&self) {
        let _guard = self.mutation.lock().await;

        let handles: Vec<_> = self
            .connections
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (name, handle) in handles {
            let transport = {
                let mut conn = handle.write().await;
                conn.mark_disconnected(ConnectionState::Closed, None)
            };
            if let Some(transport) = transport {
                if let Err(e) = transport.close().await {
                    error!(instance = %name, "error closing transport: {}", e);
                }
            }
        }
        self.connections.clear();
        self.providers.clear();
        info!("all instances shut down");
    }
}
