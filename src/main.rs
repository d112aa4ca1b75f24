use clap::Parser;
use mcp_router::config::{ConfigStore, Settings};
use mcp_router::core::{Registry, Router};
use mcp_router::transport::DefaultTransportFactory;
use mcp_router::upstream::UpstreamServer;
use mcp_router::watcher::ConfigWatcher;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcp-router")]
#[command(about = "MCP protocol router: one upstream client, many downstream instances")]
#[command(version)]
struct Cli {
    /// Settings file path
    #[arg(short, long, default_value = "~/.config/mcp-router/config.json")]
    config: String,
    /// Provider data directory (overrides the settings file)
    #[arg(short, long)]
    data: Option<String>,
    /// Log level (overrides the settings file)
    #[arg(short, long)]
    log_level: Option<String>,
    /// Allow add/remove/enable/disable via meta-tools
    #[arg(long)]
    allow_instance_management: bool,
}

async fn load_settings(path: &str) -> anyhow::Result<Settings> {
    let expanded = shellexpand::tilde(path).to_string();
    match tokio::fs::read_to_string(&expanded).await {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(&cli.config).await?;
    if let Some(data) = cli.data {
        settings.watcher.watch_path = data;
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    if cli.allow_instance_management {
        settings.server.allow_instance_management = true;
    }

    // stdout carries the protocol; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_root = shellexpand::tilde(&settings.watcher.watch_path).to_string();
    info!(data = %data_root, "starting mcp-router");

    let store = Arc::new(ConfigStore::new(&data_root));
    let registry = Arc::new(Registry::new(
        Arc::new(DefaultTransportFactory),
        Duration::from_secs(settings.client.timeout_secs),
    ));
    let router = Arc::new(Router::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        settings.clone(),
    ));

    // Registration is synchronous; connects run in the background so the
    // upstream can talk to us immediately.
    router.load_initial().await?;

    let _watcher = if settings.watcher.enabled {
        match ConfigWatcher::start(
            Arc::clone(&router),
            store.root(),
            Duration::from_millis(settings.watcher.debounce_ms),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("configuration watcher unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let server = UpstreamServer::new(Arc::clone(&router));
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("upstream server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt");
        }
    }

    router.shutdown().await;
    Ok(())
}
