use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("instance name already registered: {0}")]
    DuplicateName(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("tool '{tool}' not found on instance '{instance}'")]
    ToolNotFound { tool: String, instance: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("invalid state: {0}")]
    State(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RouterError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::NotFound(_) => "INSTANCE_NOT_FOUND",
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::State(_) => "STATE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(RouterError::Config("x".into()).error_code(), "CONFIG_ERROR");
        assert_eq!(
            RouterError::DuplicateName("x".into()).error_code(),
            "DUPLICATE_NAME"
        );
        assert_eq!(RouterError::Timeout(30000).error_code(), "TIMEOUT");
    }

    #[test]
    fn test_tool_not_found_message() {
        let err = RouterError::ToolNotFound {
            tool: "search".into(),
            instance: "files".into(),
        };
        assert_eq!(
            err.to_string(),
            "tool 'search' not found on instance 'files'"
        );
    }
}
