//! Shared test doubles: an in-process transport so registry and router
//! behavior can be exercised without spawning real downstream servers.
#![allow(dead_code)]

use async_trait::async_trait;
use mcp_router::config::{ConfigStore, InstanceConfig, Settings};
use mcp_router::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use mcp_router::core::{InstanceStatus, Registry, Router};
use mcp_router::transport::{Transport, TransportFactory};
use mcp_router::{RouterError, RouterResult};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Transport that answers the MCP handshake from canned data and records
/// every tools/call it receives.
pub struct MockTransport {
    instance: String,
    tools: Vec<Value>,
    connected: AtomicBool,
    timeout_calls: AtomicBool,
    calls: parking_lot::Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Make every subsequent tools/call report a timeout.
    pub fn set_timeout_calls(&self, timeout: bool) {
        self.timeout_calls.store(timeout, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> RouterResult<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(RequestId::Number(0));
        match request.method.as_str() {
            "initialize" => Ok(JsonRpcResponse::success(
                id,
                json!({ "protocolVersion": "2024-11-05", "capabilities": {} }),
            )),
            "tools/list" => Ok(JsonRpcResponse::success(id, json!({ "tools": self.tools }))),
            "tools/call" => {
                if self.timeout_calls.load(Ordering::SeqCst) {
                    return Err(RouterError::Timeout(100));
                }
                let params = request.params.unwrap_or(Value::Null);
                let tool = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                self.calls.lock().push((tool.clone(), arguments));
                Ok(JsonRpcResponse::success(
                    id,
                    json!({ "served_by": self.instance, "tool": tool }),
                ))
            }
            other => Ok(JsonRpcResponse::error(
                Some(id),
                -32601,
                format!("method not found: {}", other),
            )),
        }
    }

    async fn send_notification(&self, _request: JsonRpcRequest) -> RouterResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> RouterResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing [`MockTransport`]s. Can be configured to fail every
/// connect, or gated so connects block until the test releases them.
pub struct MockFactory {
    pub connects: AtomicUsize,
    fail: AtomicBool,
    gate: Option<Arc<Semaphore>>,
    transports: parking_lot::Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            connects: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            gate: None,
            transports: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Every connect attempt blocks until [`release`](Self::release).
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Transport handed out for `instance`, if a connect succeeded.
    pub fn transport_for(&self, instance: &str) -> Option<Arc<MockTransport>> {
        self.transports
            .lock()
            .iter()
            .find(|t| t.instance == instance)
            .cloned()
    }

    /// Every transport handed out for `instance`, in creation order.
    pub fn transports_for(&self, instance: &str) -> Vec<Arc<MockTransport>> {
        self.transports
            .lock()
            .iter()
            .filter(|t| t.instance == instance)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn connect(
        &self,
        config: &InstanceConfig,
        _timeout: Duration,
    ) -> RouterResult<Box<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| RouterError::Connection("gate closed".into()))?;
            permit.forget();
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(RouterError::Connection(format!(
                "refused connection for '{}'",
                config.name
            )));
        }

        let transport = Arc::new(MockTransport {
            instance: config.name.clone(),
            tools: vec![
                json!({ "name": "search", "description": "Search", "inputSchema": { "type": "object" } }),
                json!({ "name": "echo", "inputSchema": { "type": "object" } }),
            ],
            connected: AtomicBool::new(true),
            timeout_calls: AtomicBool::new(false),
            calls: parking_lot::Mutex::new(Vec::new()),
        });
        self.transports.lock().push(Arc::clone(&transport));
        Ok(Box::new(SharedTransport(transport)))
    }
}

/// Box-able wrapper so the factory can keep a handle on the transport it
/// hands out.
pub struct SharedTransport(pub Arc<MockTransport>);

#[async_trait]
impl Transport for SharedTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> RouterResult<JsonRpcResponse> {
        self.0.send_request(request).await
    }

    async fn send_notification(&self, request: JsonRpcRequest) -> RouterResult<()> {
        self.0.send_notification(request).await
    }

    async fn is_connected(&self) -> bool {
        self.0.is_connected().await
    }

    async fn close(&self) -> RouterResult<()> {
        self.0.close().await
    }
}

pub fn stdio_config(name: &str, provider: &str) -> InstanceConfig {
    serde_json::from_value(json!({
        "name": name,
        "type": "stdio",
        "command": "mock-server",
        "provider": provider,
    }))
    .unwrap()
}

/// Router wired to a mock factory and a temp data directory.
pub fn build_router(
    factory: Arc<MockFactory>,
    data_root: &std::path::Path,
    allow_management: bool,
) -> Arc<Router> {
    let mut settings = Settings::default();
    settings.server.allow_instance_management = allow_management;

    let registry = Arc::new(Registry::new(factory, Duration::from_secs(5)));
    let store = Arc::new(ConfigStore::new(data_root));
    Arc::new(Router::new(registry, store, settings))
}

/// Poll the registry snapshot until `predicate` holds or the deadline
/// passes.
pub async fn wait_for_status<F>(router: &Router, predicate: F)
where
    F: Fn(&[InstanceStatus]) -> bool,
{
    for _ in 0..200 {
        if predicate(&router.list().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within deadline");
}

/// Poll an arbitrary condition until it holds or the deadline passes.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within deadline");
}
