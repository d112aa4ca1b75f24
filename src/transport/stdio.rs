//! Stdio subprocess transport.

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId, RequestIdGenerator};
use crate::transport::traits::Transport;
use crate::utils::errors::{RouterError, RouterResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Stdio transport: spawns the downstream server as a child process and
/// speaks line-delimited JSON-RPC over its stdin/stdout.
pub struct StdioTransport {
    child: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    is_connected: Arc<RwLock<bool>>,
    request_id_gen: RequestIdGenerator,
    timeout: Duration,
}

impl StdioTransport {
    pub async fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
        timeout: Duration,
    ) -> RouterResult<Self> {
        let command = command.into();
        info!(command = %command, "spawning stdio server");

        let mut child = Command::new(&command)
            .args(&args)
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RouterError::Connection(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RouterError::Connection("failed to open child stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RouterError::Connection("failed to open child stdout".to_string()))?;

        let transport = Self {
            child: Arc::new(Mutex::new(child)),
            stdin: Arc::new(Mutex::new(stdin)),
            pending: Arc::new(DashMap::new()),
            is_connected: Arc::new(RwLock::new(true)),
            request_id_gen: RequestIdGenerator::new(),
            timeout,
        };

        transport.start_reader(stdout);

        Ok(transport)
    }

    fn start_reader(&self, stdout: ChildStdout) {
        let pending = self.pending.clone();
        let is_connected = self.is_connected.clone();

        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                debug!("received: {}", line);

                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => {
                        if let Some(id) = response.id.clone() {
                            if let Some((_, tx)) = pending.remove(&id) {
                                let _ = tx.send(response);
                            } else {
                                warn!("received response with unknown id: {:?}", id);
                            }
                        } else {
                            debug!("received response without id, ignoring");
                        }
                    }
                    Err(e) => {
                        warn!("failed to parse response line: {}", e);
                    }
                }
            }

            info!("stdio reader task ended");
            *is_connected.write().await = false;
            pending.clear();
        });
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> RouterResult<JsonRpcResponse> {
        if !self.is_connected().await {
            return Err(RouterError::Connection("transport not connected".to_string()));
        }

        let mut request = request;
        if request.id.is_none() {
            request.id = Some(self.request_id_gen.next_id());
        }
        let request_id = request
            .id
            .clone()
            .ok_or_else(|| RouterError::Connection("missing request id".to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let json = serde_json::to_string(&request)?;
        debug!("sending: {}", json);

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(json.as_bytes()).await {
                self.pending.remove(&request_id);
                return Err(RouterError::Io(e));
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                self.pending.remove(&request_id);
                return Err(RouterError::Io(e));
            }
            if let Err(e) = stdin.flush().await {
                self.pending.remove(&request_id);
                return Err(RouterError::Io(e));
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RouterError::Connection("response channel closed".to_string())),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(RouterError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }

    async fn send_notification(&self, request: JsonRpcRequest) -> RouterResult<()> {
        if !self.is_connected().await {
            return Err(RouterError::Connection("transport not connected".to_string()));
        }

        let mut request = request;
        request.id = None;

        let json = serde_json::to_string(&request)?;
        debug!("sending notification: {}", json);

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    async fn close(&self) -> RouterResult<()> {
        let mut child = self.child.lock().await;

        if let Err(e) = child.start_kill() {
            warn!("failed to kill child process: {}", e);
        }

        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => info!("child process exited with: {:?}", status),
            Ok(Err(e)) => error!("failed to wait for child: {}", e),
            Err(_) => warn!("timeout waiting for child process"),
        }

        *self.is_connected.write().await = false;
        self.pending.clear();
        Ok(())
    }
}
