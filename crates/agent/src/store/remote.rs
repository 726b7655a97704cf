//! Remote document store over REST and WebSocket.
//!
//! Documents live at `{base_url}/documents/{collection}/{id}`:
//! - `PUT` replaces, `GET` reads, `PATCH` merges, `DELETE` removes
//! - `POST .../compare-and-set` performs a conditional single-field write
//!
//! Watches connect to `{realtime_url}/{collection}/{id}` and receive JSON
//! [`WatchMessage`] frames. The server sends the current snapshot on every
//! connect, so a reconnect redelivers the latest state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use protocol::{
    CompareAndSetRequest, CompareAndSetResponse, DocumentPath, DocumentSnapshot, PatchRequest,
    ProtocolError, WatchMessage,
};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as WsMessage},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{DocumentStore, StoreError, StoreFuture, Watch};

/// Default reconnection settings.
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 30_000;
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    /// REST endpoint, e.g. `https://store.example.com`.
    pub base_url: String,
    /// WebSocket endpoint for watches, e.g. `wss://store.example.com/realtime`.
    pub realtime_url: String,
    /// Bearer key sent with every request.
    pub api_key: Option<String>,
    /// Timeout for REST requests.
    pub request_timeout: Duration,
    /// Initial backoff duration for watch reconnection.
    pub initial_backoff: Duration,
    /// Maximum backoff duration for watch reconnection.
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Timeout for heartbeat pong response.
    pub heartbeat_timeout: Duration,
}

impl RemoteStoreConfig {
    pub fn new(base_url: impl Into<String>, realtime_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            realtime_url: realtime_url.into(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            backoff_multiplier: BACKOFF_MULTIPLIER,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Sets the initial backoff duration.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    /// Sets the maximum backoff duration.
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }
}

/// [`DocumentStore`] backed by a remote service.
#[derive(Clone)]
pub struct RemoteStore {
    http: reqwest::Client,
    config: Arc<RemoteStoreConfig>,
}

impl RemoteStore {
    pub fn new(config: RemoteStoreConfig) -> Result<Self, StoreError> {
        Url::parse(&config.base_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid base URL: {}", e)))?;
        Url::parse(&config.realtime_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid realtime URL: {}", e)))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    fn document_url(&self, path: &DocumentPath) -> String {
        format!(
            "{}/documents/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&path.collection),
            urlencoding::encode(&path.id)
        )
    }

    fn watch_url(&self, path: &DocumentPath) -> String {
        format!(
            "{}/{}/{}",
            self.config.realtime_url.trim_end_matches('/'),
            urlencoding::encode(&path.collection),
            urlencoding::encode(&path.id)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Turns a non-success response into [`StoreError::Rejected`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

impl DocumentStore for RemoteStore {
    fn set(&self, path: &DocumentPath, data: Value) -> StoreFuture<'_, ()> {
        let url = self.document_url(path);
        Box::pin(async move {
            let response = self.send(self.http.put(&url).json(&data)).await?;
            check_status(response).await?;
            Ok(())
        })
    }

    fn get(&self, path: &DocumentPath) -> StoreFuture<'_, DocumentSnapshot> {
        let url = self.document_url(path);
        Box::pin(async move {
            let response = self.send(self.http.get(&url)).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(DocumentSnapshot::missing(0));
            }
            let response = check_status(response).await?;
            response
                .json::<DocumentSnapshot>()
                .await
                .map_err(|e| StoreError::Protocol(ProtocolError::Deserialization(e.to_string())))
        })
    }

    fn update(&self, path: &DocumentPath, fields: Map<String, Value>) -> StoreFuture<'_, ()> {
        let url = self.document_url(path);
        let path = path.clone();
        Box::pin(async move {
            let body = PatchRequest { fields };
            let response = self.send(self.http.patch(&url).json(&body)).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(StoreError::NotFound(path));
            }
            check_status(response).await?;
            Ok(())
        })
    }

    fn delete(&self, path: &DocumentPath) -> StoreFuture<'_, ()> {
        let url = self.document_url(path);
        Box::pin(async move {
            let response = self.send(self.http.delete(&url)).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            check_status(response).await?;
            Ok(())
        })
    }

    fn compare_and_set(
        &self,
        path: &DocumentPath,
        field: &str,
        expected: Value,
        value: Value,
    ) -> StoreFuture<'_, bool> {
        let url = format!("{}/compare-and-set", self.document_url(path));
        let body = CompareAndSetRequest {
            field: field.to_string(),
            expected,
            value,
        };
        Box::pin(async move {
            let response = self.send(self.http.post(&url).json(&body)).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            let response = check_status(response).await?;
            let result = response
                .json::<CompareAndSetResponse>()
                .await
                .map_err(|e| StoreError::Protocol(ProtocolError::Deserialization(e.to_string())))?;
            Ok(result.applied)
        })
    }

    fn watch(&self, path: &DocumentPath) -> Result<Watch, StoreError> {
        let url = self.watch_url(path);
        Url::parse(&url).map_err(|e| StoreError::Unavailable(format!("invalid watch URL: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = WatchTask {
            url,
            api_key: self.config.api_key.clone(),
            config: Arc::clone(&self.config),
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        Ok(Watch::new(rx, cancel))
    }
}

/// Why a single watch connection ended.
enum ConnectionEnd {
    /// The watch was cancelled or its receiver dropped.
    Finished,
    /// The connection dropped and should be retried.
    Lost,
}

/// Background task keeping one watch connected.
struct WatchTask {
    url: String,
    api_key: Option<String>,
    config: Arc<RemoteStoreConfig>,
    tx: mpsc::UnboundedSender<WatchMessage>,
    cancel: CancellationToken,
}

impl WatchTask {
    /// Runs the connection loop with reconnection support.
    async fn run(self) {
        let mut backoff = self.config.initial_backoff;

        loop {
            if self.cancel.is_cancelled() || self.tx.is_closed() {
                break;
            }

            match self.connect().await {
                Ok(ws) => {
                    backoff = self.config.initial_backoff;
                    tracing::debug!(url = %self.url, "Watch connected");
                    if let ConnectionEnd::Finished = self.pump(ws).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, "Watch connection failed: {}", e);
                }
            }

            tracing::info!(url = %self.url, "Watch reconnecting in {:?}", backoff);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }

            backoff = std::cmp::min(
                Duration::from_secs_f64(backoff.as_secs_f64() * self.config.backoff_multiplier),
                self.config.max_backoff,
            );
        }

        tracing::debug!(url = %self.url, "Watch task finished");
    }

    async fn connect(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        ProtocolError,
    > {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ProtocolError::RequestFailed(format!("invalid watch request: {}", e)))?;

        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ProtocolError::RequestFailed(format!("invalid api key: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws, _) = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(ProtocolError::ConnectionClosed("watch cancelled".to_string()));
            }
            result = connect_async(request) => result.map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Io(io_err) => ProtocolError::from(io_err),
                other => ProtocolError::ConnectionClosed(format!("WebSocket connection failed: {}", other)),
            })?,
        };
        Ok(ws)
    }

    /// Forwards frames until the connection drops or the watch ends.
    async fn pump(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> ConnectionEnd {
        let (mut sink, mut stream) = ws.split();
        let mut last_pong = Instant::now();

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        // Skip the first immediate tick
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return ConnectionEnd::Finished;
                }
                _ = heartbeat.tick() => {
                    if last_pong.elapsed() > self.config.heartbeat_timeout + self.config.heartbeat_interval {
                        tracing::warn!(url = %self.url, "Heartbeat timeout, reconnecting...");
                        return ConnectionEnd::Lost;
                    }
                    if let Err(e) = sink.send(WsMessage::Ping(vec![])).await {
                        tracing::warn!(url = %self.url, "Failed to send ping: {}", e);
                        return ConnectionEnd::Lost;
                    }
                    tracing::trace!("Sent heartbeat ping");
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => match WatchMessage::from_json(&text) {
                        Ok(msg) => {
                            if self.tx.send(msg).is_err() {
                                return ConnectionEnd::Finished;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("failed to parse watch message: {} (raw: {})", e, text);
                        }
                    },
                    Some(Ok(WsMessage::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!(url = %self.url, "Watch connection closed by server");
                        return ConnectionEnd::Lost;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(url = %self.url, "Watch receive error: {}", e);
                        return ConnectionEnd::Lost;
                    }
                    Some(Ok(_)) => {
                        // Ignore ping/binary frames
                    }
                },
            }
        }
    }
}
