//! On-disk configuration store.
//!
//! One configuration file per provider directory:
//! `<root>/<provider>/mcp_settings.json`. These files are the source of
//! truth for instances; the store guards against path traversal and
//! oversized payloads.

use crate::config::types::InstanceConfig;
use crate::config::validation;
use crate::utils::errors::{RouterError, RouterResult};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name each provider directory must use.
pub const SETTINGS_FILE: &str = "mcp_settings.json";

/// Maximum accepted size for a single configuration file.
const MAX_CONFIG_BYTES: u64 = 10 * 1024 * 1024;

pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a provider's directory, rejecting anything that would
    /// escape the data root.
    pub fn provider_dir(&self, provider: &str) -> RouterResult<PathBuf> {
        validation::validate_provider_name(provider)?;
        let target = self.root.join(provider);
        if !target.starts_with(&self.root) {
            return Err(RouterError::Config(format!(
                "path traversal detected: '{}' is outside the data directory",
                provider
            )));
        }
        Ok(target)
    }

    /// Extract the provider name from a settings file path, if the path
    /// points at a settings file at all.
    pub fn provider_for_path(path: &Path) -> Option<String> {
        if path.file_name()?.to_str()? != SETTINGS_FILE {
            return None;
        }
        Some(path.parent()?.file_name()?.to_str()?.to_string())
    }

    /// Read every provider configuration under the data root. Unreadable
    /// or invalid files are logged and skipped so one bad provider does
    /// not block startup.
    pub async fn read_all(&self) -> RouterResult<Vec<(PathBuf, InstanceConfig)>> {
        if !self.root.exists() {
            warn!(path = %self.root.display(), "data directory does not exist, creating it");
            tokio::fs::create_dir_all(&self.root).await?;
            return Ok(Vec::new());
        }

        let mut configs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let settings_path = entry.path().join(SETTINGS_FILE);
            if !settings_path.exists() {
                continue;
            }
            match self.read_file(&settings_path).await {
                Ok(config) => configs.push((settings_path, config)),
                Err(e) => {
                    warn!(path = %settings_path.display(), error = %e, "skipping invalid configuration file");
                }
            }
        }
        Ok(configs)
    }

    /// Read and parse a single settings file.
    pub async fn read_file(&self, path: &Path) -> RouterResult<InstanceConfig> {
        let size = tokio::fs::metadata(path).await?.len();
        if size > MAX_CONFIG_BYTES {
            return Err(RouterError::Config(format!(
                "configuration file too large ({} bytes, max {})",
                size, MAX_CONFIG_BYTES
            )));
        }

        let content = tokio::fs::read_to_string(path).await?;
        let mut config = parse_instance_config(&content)?;

        if config.provider.is_empty() {
            if let Some(provider) = Self::provider_for_path(path) {
                config.provider = provider;
            }
        }
        validation::validate_instance(&config)?;
        Ok(config)
    }

    /// Persist a provider configuration, creating the directory if needed.
    pub async fn write(&self, provider: &str, config: &InstanceConfig) -> RouterResult<PathBuf> {
        let dir = self.provider_dir(provider)?;
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(SETTINGS_FILE);
        let content = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// Delete a provider's settings file. Missing files are not an error:
    /// the watcher may already have seen the deletion.
    pub async fn delete(&self, provider: &str) -> RouterResult<()> {
        let path = self.provider_dir(provider)?.join(SETTINGS_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Path a provider's settings file would live at.
    pub fn settings_path(&self, provider: &str) -> RouterResult<PathBuf> {
        Ok(self.provider_dir(provider)?.join(SETTINGS_FILE))
    }
}

/// Parse a settings file body. Accepts either a top-level instance object
/// or an `mcpServers` wrapper containing exactly one entry.
pub fn parse_instance_config(content: &str) -> RouterResult<InstanceConfig> {
    let content = content.trim();
    if content.is_empty() {
        return Err(RouterError::Config("configuration file is empty".into()));
    }

    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| RouterError::Config(format!("invalid JSON: {}", e)))?;

    let instance_value = match value.get("mcpServers").and_then(|s| s.as_object()) {
        Some(servers) => {
            if servers.len() != 1 {
                return Err(RouterError::Config(format!(
                    "mcpServers must contain exactly one entry, found {}",
                    servers.len()
                )));
            }
            servers.values().next().cloned().unwrap_or_default()
        }
        None => value,
    };

    serde_json::from_value(instance_value)
        .map_err(|e| RouterError::Config(format!("invalid instance configuration: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::TransportKind;
    use tempfile::TempDir;

    fn sample_json(name: &str) -> String {
        format!(
            r#"{{"name": "{}", "type": "stdio", "command": "echo", "args": ["hi"], "isActive": true}}"#,
            name
        )
    }

    #[tokio::test]
    async fn test_read_all_picks_up_providers() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());

        let dir = temp.path().join("files");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(SETTINGS_FILE), sample_json("files"))
            .await
            .unwrap();

        let configs = store.read_all().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].1.name, "files");
        // Provider is inferred from the directory name.
        assert_eq!(configs[0].1.provider, "files");
    }

    #[tokio::test]
    async fn test_read_all_skips_invalid_files() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());

        let good = temp.path().join("good");
        tokio::fs::create_dir_all(&good).await.unwrap();
        tokio::fs::write(good.join(SETTINGS_FILE), sample_json("good"))
            .await
            .unwrap();

        let bad = temp.path().join("bad");
        tokio::fs::create_dir_all(&bad).await.unwrap();
        tokio::fs::write(bad.join(SETTINGS_FILE), "{not json")
            .await
            .unwrap();

        let configs = store.read_all().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].1.name, "good");
    }

    #[tokio::test]
    async fn test_write_then_delete_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path());

        let config = parse_instance_config(&sample_json("files")).unwrap();
        let path = store.write("files", &config).await.unwrap();
        assert!(path.exists());

        let read_back = store.read_file(&path).await.unwrap();
        assert_eq!(read_back.name, "files");

        store.delete("files").await.unwrap();
        assert!(!path.exists());
        // Second delete is a no-op.
        store.delete("files").await.unwrap();
    }

    #[test]
    fn test_provider_dir_rejects_traversal() {
        let store = ConfigStore::new("/tmp/data");
        assert!(store.provider_dir("../etc").is_err());
        assert!(store.provider_dir("ok_provider").is_ok());
    }

    #[test]
    fn test_parse_mcp_servers_wrapper() {
        let content = r#"{"mcpServers": {"files": {"name": "files", "type": "stdio", "command": "echo"}}}"#;
        let config = parse_instance_config(content).unwrap();
        assert_eq!(config.name, "files");
        assert_eq!(config.transport, TransportKind::Stdio);
    }

    #[test]
    fn test_parse_rejects_multiple_wrapped_entries() {
        let content = r#"{"mcpServers": {"a": {"name": "a"}, "b": {"name": "b"}}}"#;
        assert!(parse_instance_config(content).is_err());
    }

    #[test]
    fn test_provider_for_path() {
        let path = PathBuf::from("/data/files/mcp_settings.json");
        assert_eq!(
            ConfigStore::provider_for_path(&path),
            Some("files".to_string())
        );
        assert_eq!(
            ConfigStore::provider_for_path(Path::new("/data/files/other.json")),
            None
        );
    }
}
