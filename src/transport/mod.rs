pub mod http;
pub mod sse;
pub mod stdio;
pub mod traits;

pub use http::StreamableHttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use traits::{Transport, TransportFactory};

use crate::config::types::{InstanceConfig, TransportKind};
use crate::utils::errors::{RouterError, RouterResult};
use async_trait::async_trait;
use std::time::Duration;

/// Default factory: picks the concrete transport from the instance's
/// configured kind.
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn connect(
        &self,
        config: &InstanceConfig,
        timeout: Duration,
    ) -> RouterResult<Box<dyn Transport>> {
        match config.transport {
            TransportKind::Stdio => {
                let command = config.command.clone().ok_or_else(|| {
                    RouterError::Config("stdio transport requires 'command'".to_string())
                })?;
                let transport =
                    StdioTransport::new(command, config.args.clone(), config.env.clone(), timeout)
                        .await?;
                Ok(Box::new(transport))
            }
            TransportKind::Sse => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| RouterError::Config("sse transport requires 'url'".to_string()))?;
                let transport = SseTransport::new(url, timeout).await?;
                Ok(Box::new(transport))
            }
            TransportKind::Http => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| RouterError::Config("http transport requires 'url'".to_string()))?;
                let transport = StreamableHttpTransport::new(url, timeout)?;
                Ok(Box::new(transport))
            }
        }
    }
}
