//! Dispatch layer: the meta-tool verbs exposed to the upstream client.
//!
//! Every verb resolves against the registry; management verbs (add,
//! remove, enable, disable) are additionally gated by the
//! `allow_instance_management` setting and persist their effect through
//! the config store so that disk stays the source of truth.

use crate::config::store::ConfigStore;
use crate::config::types::{InstanceConfig, Settings};
use crate::config::validation;
use crate::core::connection::ToolDescriptor;
use crate::core::registry::{InstanceStatus, Registry};
use crate::utils::errors::{RouterError, RouterResult};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one routed tool call, in the shape upstream clients expect.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Per-upstream-client state. The only thing a session carries is which
/// instance subsequent `call`s without an explicit target go to.
#[derive(Default)]
pub struct RouterSession {
    current: parking_lot::RwLock<Option<String>>,
}

impl RouterSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.current.read().clone()
    }

    pub fn set_current(&self, name: Option<String>) {
        *self.current.write() = name;
    }
}

pub struct Router {
    registry: Arc<Registry>,
    store: Arc<ConfigStore>,
    settings: Settings,
}

impl Router {
    pub fn new(registry: Arc<Registry>, store: Arc<ConfigStore>, settings: Settings) -> Self {
        Self {
            registry,
            store,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn management_enabled(&self) -> bool {
        self.settings.server.allow_instance_management
    }

    /// Background connect attempt; returns immediately.
    fn spawn_connect(&self, name: &str) {
        let registry = Arc::clone(&self.registry);
        let name = name.to_string();
        tokio::spawn(async move {
            registry.connect_instance(&name).await;
        });
    }

    fn require_management(&self) -> RouterResult<()> {
        if self.management_enabled() {
            Ok(())
        } else {
            Err(RouterError::State(
                "instance management is disabled".to_string(),
            ))
        }
    }

    /// Load every provider configuration from disk and register it. Each
    /// active instance gets a background connect; the call returns as
    /// soon as registration is done.
    pub async fn load_initial(&self) -> RouterResult<usize> {
        let configs = self.store.read_all().await?;
        let mut count = 0;
        for (path, config) in configs {
            let name = config.name.clone();
            let active = config.is_active;
            match self.registry.register(path, config).await {
                Ok(()) => {
                    count += 1;
                    if active {
                        self.spawn_connect(&name);
                    }
                }
                Err(e) => {
                    warn!(instance = %name, "skipping instance at startup: {}", e);
                }
            }
        }
        info!(instances = count, "initial configuration loaded");
        Ok(count)
    }

    /// `list`: snapshot of every registered instance.
    pub async fn list(&self) -> Vec<InstanceStatus> {
        self.registry.snapshot().await
    }

    /// `use`: select the instance later `call`s default to, returning
    /// its status and tool list. Selecting an instance that exists but
    /// is not yet connected is allowed; the connection may still be in
    /// flight and the tool list comes back empty.
    pub async fn use_instance(
        &self,
        session: &RouterSession,
        name: &str,
    ) -> RouterResult<(InstanceStatus, Vec<ToolDescriptor>)> {
        if !self.registry.contains(name) {
            return Err(RouterError::NotFound(name.to_string()));
        }
        session.set_current(Some(name.to_string()));
        debug!(instance = %name, "session switched");

        let tools = match self.registry.refresh_tools(name).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(instance = %name, "tool refresh failed during use: {}", e);
                Vec::new()
            }
        };
        let snapshot = self.registry.snapshot().await;
        let status = snapshot
            .into_iter()
            .find(|status| status.name == name)
            .ok_or_else(|| RouterError::NotFound(name.to_string()))?;
        Ok((status, tools))
    }

    /// `help`: tools of every connected instance, keyed by instance
    /// name. The session's selection does not narrow the listing; an
    /// explicit `name` does.
    pub async fn help(
        &self,
        name: Option<&str>,
    ) -> RouterResult<Vec<(String, Vec<ToolDescriptor>)>> {
        match name {
            Some(name) => {
                let tools = self.registry.refresh_tools(name).await?;
                Ok(vec![(name.to_string(), tools)])
            }
            None => Ok(self.registry.all_tools().await.into_iter().collect()),
        }
    }

    /// `call`: forward a tool invocation to the target instance. The
    /// target is the explicit `instance` argument, falling back to the
    /// session's selection.
    pub async fn call(
        &self,
        session: &RouterSession,
        tool: &str,
        arguments: Value,
        instance: Option<&str>,
    ) -> RouterResult<ToolResult> {
        let name = instance
            .map(str::to_string)
            .or_else(|| session.current())
            .ok_or_else(|| {
                RouterError::State(
                    "no instance selected; pass 'instance' or call 'use' first".to_string(),
                )
            })?;

        debug!(instance = %name, tool = %tool, "routing tool call");
        let response = self.registry.call_tool(&name, tool, arguments).await?;

        // Downstream JSON-RPC errors are a failed result, not a router
        // error: the route itself worked.
        if let Some(error) = response.error {
            return Ok(ToolResult::failure(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        Ok(ToolResult::success(response.result.unwrap_or(Value::Null)))
    }

    /// `add`: validate, persist, register, connect in the background.
    pub async fn add(&self, mut config: InstanceConfig) -> RouterResult<InstanceStatus> {
        self.require_management()?;
        if config.provider.is_empty() {
            config.provider = config.name.clone();
        }
        validation::validate_instance(&config)?;

        let name = config.name.clone();
        let active = config.is_active;
        let path = self.store.settings_path(&config.provider)?;

        // Register before persisting: a losing concurrent add must not
        // leave an unregistered file on disk for the watcher to trip
        // over.
        self.registry.register(path, config.clone()).await?;
        if let Err(e) = self.store.write(&config.provider, &config).await {
            let _ = self.registry.remove(&name).await;
            return Err(e);
        }
        if active {
            self.spawn_connect(&name);
        }

        let snapshot = self.registry.snapshot().await;
        snapshot
            .into_iter()
            .find(|status| status.name == name)
            .ok_or_else(|| RouterError::NotFound(name))
    }

    /// `remove`: disconnect, drop the registry entry, delete the file.
    /// Fails with NotFound for unknown names, leaving everything as-is.
    pub async fn remove(&self, name: &str) -> RouterResult<()> {
        self.require_management()?;
        let config = self.registry.remove(name).await?;
        self.store.delete(&config.provider).await?;
        Ok(())
    }

    /// `enable`: activate and reconnect in the background.
    pub async fn enable(&self, name: &str) -> RouterResult<()> {
        self.require_management()?;
        self.registry.enable(name).await?;
        self.spawn_connect(name);
        self.persist_active(name, true).await
    }

    /// `disable`: sever the connection, keep the registration.
    pub async fn disable(&self, name: &str) -> RouterResult<()> {
        self.require_management()?;
        self.registry.disable(name).await?;
        self.persist_active(name, false).await
    }

    async fn persist_active(&self, name: &str, active: bool) -> RouterResult<()> {
        let Some(conn) = self.registry.get(name) else {
            return Err(RouterError::NotFound(name.to_string()));
        };
        let config = {
            let mut config = conn.read().await.config.clone();
            config.is_active = active;
            config
        };
        self.store.write(&config.provider, &config).await?;
        Ok(())
    }

    /// Reconcile one settings file with the registry. Called by the
    /// watcher after debouncing; also safe to call directly.
    ///
    /// Cases: new file -> register + connect; transport parameters
    /// changed -> reconfigure + reconnect; only `isActive` flipped ->
    /// enable/disable; name changed -> remove old + register new; file
    /// gone or unreadable -> remove.
    pub async fn reconcile_path(&self, path: &Path) -> RouterResult<()> {
        let known = self.registry.name_for_path(path);

        let config = if path.exists() {
            match self.store.read_file(path).await {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(path = %path.display(), "unreadable configuration treated as removal: {}", e);
                    None
                }
            }
        } else {
            None
        };

        match (known, config) {
            (None, Some(config)) => {
                let name = config.name.clone();
                let active = config.is_active;
                self.registry.register(path.to_path_buf(), config).await?;
                if active {
                    self.spawn_connect(&name);
                }
                info!(instance = %name, "instance added from file change");
                Ok(())
            }
            (Some(name), Some(config)) => {
                if config.name != name {
                    // Renames are modeled as remove + add.
                    self.registry.remove(&name).await?;
                    let new_name = config.name.clone();
                    let active = config.is_active;
                    self.registry.register(path.to_path_buf(), config).await?;
                    if active {
                        self.spawn_connect(&new_name);
                    }
                    info!(old = %name, new = %new_name, "instance renamed from file change");
                    return Ok(());
                }

                let current = {
                    let Some(conn) = self.registry.get(&name) else {
                        return Err(RouterError::NotFound(name));
                    };
                    let conn = conn.read().await;
                    conn.config.clone()
                };

                if current.transport_params_changed(&config) {
                    let active = self.registry.reconfigure(&name, config).await?;
                    if active {
                        self.spawn_connect(&name);
                    }
                    info!(instance = %name, "instance reconfigured from file change");
                } else if current.is_active != config.is_active {
                    if config.is_active {
                        self.registry.enable(&name).await?;
                        self.spawn_connect(&name);
                    } else {
                        self.registry.disable(&name).await?;
                    }
                    info!(instance = %name, active = config.is_active, "instance toggled from file change");
                } else {
                    debug!(instance = %name, "file change with no effective difference");
                }
                Ok(())
            }
            (Some(name), None) => {
                self.registry.remove(&name).await?;
                info!(instance = %name, "instance removed from file deletion");
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
