//! Streamable HTTP transport.
//!
//! Requests go out as HTTP POSTs; responses come back as
//! newline-delimited JSON streams, so a single response body may carry
//! several JSON-RPC messages.

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId, RequestIdGenerator};
use crate::transport::traits::Transport;
use crate::utils::errors::{RouterError, RouterResult};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};
use url::Url;

pub struct StreamableHttpTransport {
    endpoint: Url,
    client: reqwest::Client,
    session_id: Arc<RwLock<Option<String>>>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    is_connected: Arc<RwLock<bool>>,
    request_id_gen: RequestIdGenerator,
    timeout: Duration,
}

impl StreamableHttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> RouterResult<Self> {
        let endpoint = endpoint
            .into()
            .parse::<Url>()
            .map_err(|e| RouterError::Connection(format!("invalid URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RouterError::Connection(e.to_string()))?;

        Ok(Self {
            endpoint,
            client,
            session_id: Arc::new(RwLock::new(None)),
            pending: Arc::new(DashMap::new()),
            is_connected: Arc::new(RwLock::new(true)),
            request_id_gen: RequestIdGenerator::new(),
            timeout,
        })
    }

    fn start_reader(&self, response: reqwest::Response) {
        let pending = self.pending.clone();

        tokio::spawn(async move {
            let stream = response.bytes_stream();
            let reader = tokio_util::io::StreamReader::new(
                stream.map(|result| result.map_err(std::io::Error::other)),
            );

            let buf_reader = BufReader::new(reader);
            let mut lines = buf_reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }

                debug!("received streamable line: {}", line);

                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => {
                        if let Some(id) = response.id.clone() {
                            if let Some((_, tx)) = pending.remove(&id) {
                                let _ = tx.send(response);
                            } else {
                                debug!("received streamable response with unknown id: {:?}", id);
                            }
                        } else {
                            debug!("received streamable response without id, ignoring");
                        }
                    }
                    Err(e) => {
                        warn!("failed to parse streamable response: {}", e);
                    }
                }
            }
        });
    }

    fn build_request_url(&self, session_id: Option<String>) -> Url {
        let mut url = self.endpoint.clone();

        if let Some(id) = session_id {
            url.query_pairs_mut().append_pair("session_id", &id);
        }

        url
    }

    async fn capture_session_id(&self, response: &reqwest::Response) {
        if let Some(session_id) = response.headers().get("mcp-session-id") {
            if let Ok(id) = session_id.to_str() {
                let mut slot = self.session_id.write().await;
                if slot.is_none() {
                    info!("streamable HTTP session established: {}", id);
                    *slot = Some(id.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
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
        debug!("sending streamable request: {}", json);

        let session_id = self.session_id.read().await.clone();
        let url = self.build_request_url(session_id);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/x-ndjson")
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

        self.capture_session_id(&response).await;
        self.start_reader(response);

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
        debug!("sending streamable notification: {}", json);

        let session_id = self.session_id.read().await.clone();
        let url = self.build_request_url(session_id);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/x-ndjson")
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
        info!("closing streamable HTTP transport");

        let session_id = self.session_id.read().await.clone();
        if let Some(id) = session_id {
            let _ = self
                .client
                .delete(self.endpoint.clone())
                .query(&[("session_id", id)])
                .send()
                .await;
        }

        *self.is_connected.write().await = false;
        self.pending.clear();
        Ok(())
    }
}
