//! Input validation for instance configurations.
//!
//! Every failure maps to `RouterError::Config`; a rejected configuration
//! never mutates the registry.

use crate::config::types::{InstanceConfig, TransportKind};
use crate::utils::errors::{RouterError, RouterResult};
use std::collections::HashMap;

const MAX_NAME_LENGTH: usize = 100;
const MAX_COMMAND_LENGTH: usize = 1000;
const MAX_ARG_LENGTH: usize = 1000;
const MAX_ARGS_COUNT: usize = 100;
const MAX_ENV_KEY_LENGTH: usize = 200;
const MAX_ENV_VALUE_LENGTH: usize = 2000;
const MAX_ENV_COUNT: usize = 100;
const MAX_METADATA_ENTRIES: usize = 50;

const SHELL_METACHARS: [char; 7] = [';', '|', '&', '$', '`', '\n', '\r'];

pub fn validate_provider_name(name: &str) -> RouterResult<()> {
    if name.is_empty() {
        return Err(RouterError::Config("provider name cannot be empty".into()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(RouterError::Config(format!(
            "provider name too long (max {} characters)",
            MAX_NAME_LENGTH
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RouterError::Config(format!(
            "invalid provider name '{}': only alphanumerics, underscores and hyphens are allowed",
            name
        )));
    }
    Ok(())
}

pub fn validate_instance_name(name: &str) -> RouterResult<()> {
    if name.is_empty() {
        return Err(RouterError::Config("instance name cannot be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(RouterError::Config(format!(
            "instance name too long (max {} characters)",
            MAX_NAME_LENGTH
        )));
    }
    // Instance names additionally allow CJK characters for display purposes.
    let valid = name.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '_' || c == '-' || ('\u{4e00}'..='\u{9fa5}').contains(&c)
    });
    if !valid {
        return Err(RouterError::Config(format!(
            "invalid instance name '{}': only alphanumerics, underscores, hyphens and CJK characters are allowed",
            name
        )));
    }
    Ok(())
}

pub fn validate_command(command: &str) -> RouterResult<()> {
    if command.is_empty() {
        return Err(RouterError::Config("command cannot be empty".into()));
    }
    if command.len() > MAX_COMMAND_LENGTH {
        return Err(RouterError::Config(format!(
            "command too long (max {} characters)",
            MAX_COMMAND_LENGTH
        )));
    }
    if let Some(c) = command.chars().find(|c| SHELL_METACHARS.contains(c)) {
        return Err(RouterError::Config(format!(
            "dangerous character {:?} in command: shell operators are not allowed",
            c
        )));
    }
    Ok(())
}

pub fn validate_args(args: &[String]) -> RouterResult<()> {
    if args.len() > MAX_ARGS_COUNT {
        return Err(RouterError::Config(format!(
            "too many arguments (max {})",
            MAX_ARGS_COUNT
        )));
    }
    for arg in args {
        if arg.len() > MAX_ARG_LENGTH {
            return Err(RouterError::Config(format!(
                "argument too long (max {} characters)",
                MAX_ARG_LENGTH
            )));
        }
        if let Some(c) = arg.chars().find(|c| SHELL_METACHARS.contains(c)) {
            return Err(RouterError::Config(format!(
                "dangerous character {:?} in argument: shell operators are not allowed",
                c
            )));
        }
    }
    Ok(())
}

pub fn validate_env(env: &HashMap<String, String>) -> RouterResult<()> {
    if env.len() > MAX_ENV_COUNT {
        return Err(RouterError::Config(format!(
            "too many environment variables (max {})",
            MAX_ENV_COUNT
        )));
    }
    for (key, value) in env {
        if key.len() > MAX_ENV_KEY_LENGTH || value.len() > MAX_ENV_VALUE_LENGTH {
            return Err(RouterError::Config(format!(
                "environment variable '{}' key or value too long",
                key
            )));
        }
        let mut chars = key.chars();
        let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !head_ok || !tail_ok {
            return Err(RouterError::Config(format!(
                "invalid environment variable name: '{}'",
                key
            )));
        }
    }
    Ok(())
}

/// Validate a full instance configuration, including transport-specific
/// required fields.
pub fn validate_instance(config: &InstanceConfig) -> RouterResult<()> {
    validate_instance_name(&config.name)?;
    if !config.provider.is_empty() {
        validate_provider_name(&config.provider)?;
    }

    match config.transport {
        TransportKind::Stdio => {
            let command = config
                .command
                .as_deref()
                .ok_or_else(|| RouterError::Config("stdio transport requires 'command'".into()))?;
            validate_command(command)?;
            validate_args(&config.args)?;
            validate_env(&config.env)?;
        }
        TransportKind::Sse | TransportKind::Http => {
            let url = config.url.as_deref().ok_or_else(|| {
                RouterError::Config(format!("{} transport requires 'url'", config.transport))
            })?;
            url::Url::parse(url)
                .map_err(|e| RouterError::Config(format!("invalid url '{}': {}", url, e)))?;
        }
    }

    if config.metadata.len() > MAX_METADATA_ENTRIES {
        return Err(RouterError::Config(format!(
            "too many metadata entries (max {})",
            MAX_METADATA_ENTRIES
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::TransportKind;

    fn base_config() -> InstanceConfig {
        InstanceConfig {
            name: "files".into(),
            transport: TransportKind::Stdio,
            command: Some("uvx".into()),
            args: vec!["mcp-server-filesystem".into()],
            env: HashMap::new(),
            url: None,
            is_active: true,
            provider: "files".into(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_valid_stdio_config() {
        assert!(validate_instance(&base_config()).is_ok());
    }

    #[test]
    fn test_stdio_requires_command() {
        let mut config = base_config();
        config.command = None;
        assert!(matches!(
            validate_instance(&config),
            Err(RouterError::Config(_))
        ));
    }

    #[test]
    fn test_sse_requires_url() {
        let mut config = base_config();
        config.transport = TransportKind::Sse;
        config.command = None;
        assert!(validate_instance(&config).is_err());

        config.url = Some("http://localhost:3001/sse".into());
        assert!(validate_instance(&config).is_ok());
    }

    #[test]
    fn test_rejects_shell_metachars() {
        assert!(validate_command("rm -rf / ; echo done").is_err());
        assert!(validate_args(&["$(whoami)".to_string()]).is_err());
        assert!(validate_command("echo").is_ok());
    }

    #[test]
    fn test_rejects_bad_env_key() {
        let mut env = HashMap::new();
        env.insert("1BAD".to_string(), "x".to_string());
        assert!(validate_env(&env).is_err());

        let mut env = HashMap::new();
        env.insert("GOOD_KEY".to_string(), "x".to_string());
        assert!(validate_env(&env).is_ok());
    }

    #[test]
    fn test_instance_name_allows_cjk() {
        assert!(validate_instance_name("文件服务").is_ok());
        assert!(validate_instance_name("bad name").is_err());
        assert!(validate_provider_name("文件服务").is_err());
    }
}
