//! MCP router: a single stdio MCP server that fronts many downstream
//! MCP instances (stdio, SSE, or streamable HTTP) behind a small set of
//! `router.*` meta-tools, with hot-reload of per-provider configuration
//! files.

pub mod config;
pub mod core;
pub mod transport;
pub mod upstream;
pub mod utils;
pub mod watcher;

pub use config::{ConfigStore, InstanceConfig, Settings, TransportKind};
pub use crate::core::{
    ConnectionState, InstanceStatus, Registry, Router, RouterSession, ToolResult,
};
pub use upstream::UpstreamServer;
pub use utils::errors::{RouterError, RouterResult};
pub use watcher::ConfigWatcher;
