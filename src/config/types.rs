use crate::utils::errors::RouterError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main settings structure, loaded from `config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub watcher: WatcherSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Whether callers may add/remove/enable/disable instances
    pub allow_instance_management: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            allow_instance_management: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Timeout for downstream connects and tool calls, in seconds
    pub timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub enabled: bool,
    pub watch_path: String,
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_path: "data".to_string(),
            debounce_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Transport kind for downstream instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "http" => Ok(TransportKind::Http),
            _ => Err(RouterError::Config(format!("unknown transport type: {}", s))),
        }
    }
}

/// One downstream instance, as persisted in a provider's
/// `mcp_settings.json`. Identity key is `name`; uniqueness is enforced
/// across all registered instances regardless of provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub transport: TransportKind,
    /// Command to execute (stdio transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL (sse and http transports)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "isActive", default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_active() -> bool {
    true
}

impl InstanceConfig {
    /// True when the fields that drive the live connection differ.
    /// `isActive` is deliberately excluded: toggling it maps to
    /// enable/disable, not a reconnect with new parameters.
    pub fn transport_params_changed(&self, other: &InstanceConfig) -> bool {
        self.transport != other.transport
            || self.command != other.command
            || self.args != other.args
            || self.env != other.env
            || self.url != other.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config(name: &str) -> InstanceConfig {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "type": "stdio",
            "command": "echo",
            "args": ["hello"],
        }))
        .unwrap()
    }

    #[test]
    fn test_is_active_defaults_true() {
        let config = stdio_config("test");
        assert!(config.is_active);
        assert_eq!(config.transport, TransportKind::Stdio);
    }

    #[test]
    fn test_transport_kind_from_str() {
        use std::str::FromStr;
        assert_eq!(TransportKind::from_str("SSE").unwrap(), TransportKind::Sse);
        assert_eq!(
            TransportKind::from_str("http").unwrap(),
            TransportKind::Http
        );
        assert!(TransportKind::from_str("websocket").is_err());
    }

    #[test]
    fn test_transport_params_changed() {
        let a = stdio_config("test");
        let mut b = a.clone();
        assert!(!a.transport_params_changed(&b));

        b.is_active = false;
        assert!(!a.transport_params_changed(&b));

        b.args = vec!["world".to_string()];
        assert!(a.transport_params_changed(&b));
    }

    #[test]
    fn test_settings_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.client.timeout_secs, 30);
        assert_eq!(settings.watcher.debounce_ms, 1000);
        assert!(!settings.server.allow_instance_management);
    }
}
