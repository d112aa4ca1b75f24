//! SSE (Server-Sent Events) transport.

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId, RequestIdGenerator};
use crate::transport::traits::Transport;
use crate::utils::errors::{RouterError, RouterResult};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use url::Url;

/// SSE transport: a long-lived GET stream carries responses; requests go
/// out as POSTs against the same endpoint.
#[derive(Debug)]
pub struct SseTransport {
    endpoint: Url,
    client: reqwest::Client,
    session_id: Arc<RwLock<Option<String>>>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    is_connected: Arc<RwLock<bool>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    request_id_gen: RequestIdGenerator,
    timeout: Duration,
}

impl SseTransport {
    pub async fn new(endpoint: impl Into<String>, timeout: Duration) -> RouterResult<Self> {
        let endpoint = endpoint
            .into()
            .parse::<Url>()
            .map_err(|e| RouterError::Connection(format!("invalid URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RouterError::Connection(e.to_string()))?;

        let transport = Self {
            endpoint,
            client,
            session_id: Arc::new(RwLock::new(None)),
            pending: Arc::new(DashMap::new()),
            is_connected: Arc::new(RwLock::new(false)),
            reader_task: Mutex::new(None),
            request_id_gen: RequestIdGenerator::new(),
            timeout,
        };

        transport.connect().await?;

        Ok(transport)
    }

    async fn connect(&self) -> RouterResult<()> {
        info!("connecting to SSE endpoint: {}", self.endpoint);

        let response = self
            .client
            .get(self.endpoint.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| RouterError::Connection(format!("failed to connect: {}", e)))?;

        if !response.status().is_success() {
            return Err(RouterError::Connection(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        if let Some(session_id) = response.headers().get("mcp-session-id") {
            if let Ok(id) = session_id.to_str() {
                *self.session_id.write().await = Some(id.to_string());
            }
        }

        let reader = self.start_reader(response);
        *self.reader_task.lock().await = Some(reader);

        *self.is_connected.write().await = true;
        info!("SSE connection established");

        Ok(())
    }

    fn start_reader(&self, response: reqwest::Response) -> JoinHandle<()> {
        let pending = self.pending.clone();
        let is_connected = self.is_connected.clone();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut event_data = String::new();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));

                        while let Some(pos) = buffer.find('\n') {
                            let mut line = buffer[..pos].to_string();
                            buffer = buffer[pos + 1..].to_string();

                            if line.ends_with('\r') {
                                line.pop();
                            }

                            if line.is_empty() {
                                if !event_data.is_empty() {
                                    dispatch_event(&pending, event_data.trim_end_matches('\n'));
                                    event_data.clear();
                                }
                                continue;
                            }

                            if let Some(data) = line.strip_prefix("data:") {
                                event_data.push_str(data.trim_start());
                                event_data.push('\n');
                            }
                        }
                    }
                    Err(e) => {
                        error!("SSE stream error: {}", e);
                        break;
                    }
                }
            }

            if !event_data.is_empty() {
                dispatch_event(&pending, event_data.trim_end_matches('\n'));
            }

            info!("SSE reader task ended");
            *is_connected.write().await = false;
            pending.clear();
        })
    }

    fn build_request_url(&self, session_id: Option<String>) -> Url {
        let mut url = self.endpoint.clone();

        if let Some(id) = session_id {
            url.query_pairs_mut().append_pair("session_id", &id);
        }

        url
    }
}

fn dispatch_event(
    pending: &DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>,
    payload: &str,
) {
    match serde_json::from_str::<JsonRpcResponse>(payload) {
        Ok(response) => {
            if let Some(id) = response.id.clone() {
                if let Some((_, tx)) = pending.remove(&id) {
                    let _ = tx.send(response);
                } else {
                    debug!("received SSE response with unknown id: {:?}", id);
                }
            } else {
                debug!("received SSE response without id, ignoring");
            }
        }
        Err(e) => {
            debug!("failed to parse SSE data: {}", e);
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
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
        debug!("sending SSE request: {}", json);

        let session_id = self.session_id.read().await.clone();
        let url = self.build_request_url(session_id);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(json)
            .send()
            .await
            .map_err(|e| RouterError::Connection(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            self.pending.remove(&request_id);
            return Err(RouterError::Connection(format!(
                "HTTP error: {}",
                response.status()
            )));
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
        debug!("sending SSE notification: {}", json);

        let session_id = self.session_id.read().await.clone();
        let url = self.build_request_url(session_id);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(json)
            .send()
            .await
            .map_err(|e| RouterError::Connection(format!("notification failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RouterError::Connection(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    async fn close(&self) -> RouterResult<()> {
        info!("closing SSE transport");

        // The GET stream outlives the server's interest in us; tear the
        // reader down rather than waiting for the remote to hang up.
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }

        *self.is_connected.write().await = false;
        self.pending.clear();
        Ok(())
    }
}
