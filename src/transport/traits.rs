use crate::config::types::InstanceConfig;
use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::utils::errors::RouterResult;
use async_trait::async_trait;
use std::time::Duration;

/// Transport for MCP communication with one downstream server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response.
    async fn send_request(&self, request: JsonRpcRequest) -> RouterResult<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn send_notification(&self, request: JsonRpcRequest) -> RouterResult<()>;

    /// Check if the transport is connected.
    async fn is_connected(&self) -> bool;

    /// Close the transport.
    async fn close(&self) -> RouterResult<()>;
}

/// Creates transports from instance configuration. The registry picks
/// the concrete implementation once, at connection time; it is never
/// switched at runtime.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        config: &InstanceConfig,
        timeout: Duration,
    ) -> RouterResult<Box<dyn Transport>>;
}
