//! Firebase Realtime Database store over the REST API.
//!
//! Reads and writes are plain `GET`/`PUT` requests on `{base}/{path}.json`.
//! Subscriptions use the REST streaming protocol: a long-lived `GET` with
//! `Accept: text/event-stream`, whose `put` and `patch` events are applied
//! to a local mirror of the subscribed value. A dropped stream is reopened
//! with exponential backoff until the subscription is dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use fotohora_core::firebase::FirebaseStore;
//! use fotohora_core::RemoteStore;
//! use fotohora_types::StorePath;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FirebaseStore::new(
//!     "https://demo-default-rtdb.firebaseio.com",
//!     None,
//!     Duration::from_secs(10),
//! )?;
//! let interval = store.read(&StorePath::config_interval()).await?;
//! println!("interval: {:?}", interval);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fotohora_types::StorePath;

use crate::error::{StoreError, StoreResult};
use crate::sse::{SseParser, StreamEvent};
use crate::traits::{RemoteStore, SubscriptionId, ValueSubscription, ValueUpdate};
use crate::tree;

/// Exponential backoff between stream reconnects.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    /// Start at `initial`, doubling up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now; the next one doubles.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Go back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// A [`RemoteStore`] backed by the Firebase Realtime Database REST API.
#[derive(Debug)]
pub struct FirebaseStore {
    client: Client,
    stream_client: Client,
    base_url: String,
    auth: Option<String>,
    streams: Mutex<HashMap<SubscriptionId, CancellationToken>>,
}

impl FirebaseStore {
    /// Create a store for the database at `base_url`.
    ///
    /// `timeout` bounds every read and write; streams have no timeout.
    pub fn new(base_url: &str, auth: Option<String>, timeout: Duration) -> StoreResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(StoreError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            client,
            stream_client,
            base_url,
            auth: auth.filter(|a| !a.is_empty()),
            streams: Mutex::new(HashMap::new()),
        })
    }

    /// The database URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &StorePath) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        with_auth(request, self.auth.as_deref())
    }
}

fn with_auth(request: RequestBuilder, auth: Option<&str>) -> RequestBuilder {
    match auth {
        Some(token) => request.query(&[("auth", token)]),
        None => request,
    }
}

/// Map a non-success response to a store error.
async fn check_response(path: &StorePath, response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
    Err(StoreError::rejected(
        path.as_str(),
        Some(status.as_u16()),
        message,
    ))
}

fn is_permission_status(status: Option<u16>) -> bool {
    matches!(
        status.and_then(|s| StatusCode::from_u16(s).ok()),
        Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    )
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn subscribe(&self, path: &StorePath) -> StoreResult<ValueSubscription> {
        let (tx, subscription) = ValueSubscription::channel(path.clone());
        let token = CancellationToken::new();
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subscription.id(), token.clone());

        let stream = StreamTask {
            client: self.stream_client.clone(),
            url: self.url(path),
            auth: self.auth.clone(),
            path: path.clone(),
            tx,
            token,
        };
        info!("Streaming {} as {}", path, subscription.id());
        tokio::spawn(stream.run());
        Ok(subscription)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let token = self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(token) = token {
            token.cancel();
            debug!("Closed stream {}", id);
        }
    }

    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        let request = self.with_auth(self.client.put(self.url(path)).json(&value));
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::unreachable(path.as_str(), e.to_string()))?;
        check_response(path, response).await?;
        Ok(())
    }

    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        let request = self.with_auth(self.client.get(self.url(path)));
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::unreachable(path.as_str(), e.to_string()))?;
        let response = check_response(path, response).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| StoreError::unreachable(path.as_str(), e.to_string()))?;
        Ok((!value.is_null()).then_some(value))
    }
}

impl Drop for FirebaseStore {
    fn drop(&mut self) {
        let streams = self.streams.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, token) in streams.drain() {
            token.cancel();
        }
    }
}

/// How one connection of a stream ended.
enum StreamEnd {
    /// The body ended; reconnect.
    Closed,
    /// The server ended the subscription for good.
    Cancelled(String),
}

/// Local copy of a streamed value.
#[derive(Debug, Default)]
struct Mirror {
    value: Value,
    last_sent: Option<Option<Value>>,
}

impl Mirror {
    fn apply(&mut self, event: StreamEvent) -> StoreResult<Option<Option<Value>>> {
        match event {
            StreamEvent::Put { path, data } => {
                let segments = segments(&path);
                tree::set(&mut self.value, &segments, data);
            }
            StreamEvent::Patch { path, data } => {
                let Value::Object(children) = data else {
                    return Err(StoreError::Serialization(serde::de::Error::custom(
                        "patch data is not an object",
                    )));
                };
                let segments = segments(&path);
                tree::merge(&mut self.value, &segments, children);
            }
            _ => return Ok(None),
        }
        let current = tree::get(&self.value, []).cloned();
        if self.last_sent.as_ref() == Some(&current) {
            return Ok(None);
        }
        self.last_sent = Some(current.clone());
        Ok(Some(current))
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// A streaming subscription's background task.
struct StreamTask {
    client: Client,
    url: String,
    auth: Option<String>,
    path: StorePath,
    tx: mpsc::UnboundedSender<ValueUpdate>,
    token: CancellationToken,
}

impl StreamTask {
    async fn run(self) {
        let mut backoff = Backoff::default();
        let mut mirror = Mirror::default();

        loop {
            let result = tokio::select! {
                _ = self.token.cancelled() => break,
                _ = self.tx.closed() => break,
                result = self.connect(&mut mirror, &mut backoff) => result,
            };

            match result {
                Ok(StreamEnd::Cancelled(reason)) => {
                    warn!("Stream {} cancelled: {}", self.path, reason);
                    let _ = self.tx.send(Err(StoreError::Cancelled {
                        path: self.path.to_string(),
                        reason,
                    }));
                    break;
                }
                Ok(StreamEnd::Closed) => {
                    debug!("Stream {} closed by server", self.path);
                    let _ = self.tx.send(Err(StoreError::Closed(self.path.to_string())));
                }
                Err(e) => {
                    if let StoreError::Rejected { status, .. } = &e
                        && is_permission_status(*status)
                    {
                        warn!("Stream {} refused: {}", self.path, e);
                        let _ = self.tx.send(Err(e));
                        break;
                    }
                    warn!("Stream {} failed: {}", self.path, e);
                    let _ = self.tx.send(Err(e));
                }
            }

            let delay = backoff.next_delay();
            debug!("Reconnecting {} in {:?}", self.path, delay);
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Stream task for {} finished", self.path);
    }

    async fn connect(&self, mirror: &mut Mirror, backoff: &mut Backoff) -> StoreResult<StreamEnd> {
        let request = with_auth(
            self.client
                .get(&self.url)
                .header(reqwest::header::ACCEPT, "text/event-stream"),
            self.auth.as_deref(),
        );
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::unreachable(self.path.as_str(), e.to_string()))?;
        let response = check_response(&self.path, response).await?;

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| StoreError::unreachable(self.path.as_str(), e.to_string()))?;
            for event in parser.feed(&chunk) {
                let event = StreamEvent::decode(&event)?;
                match event {
                    StreamEvent::Cancel(reason) | StreamEvent::AuthRevoked(reason) => {
                        return Ok(StreamEnd::Cancelled(reason));
                    }
                    StreamEvent::KeepAlive => {}
                    StreamEvent::Unknown(kind) => debug!("Ignoring stream event {}", kind),
                    update => {
                        backoff.reset();
                        if let Some(value) = mirror.apply(update)? {
                            let _ = self.tx.send(Ok(value));
                        }
                    }
                }
            }
        }
        Ok(StreamEnd::Closed)
    }
}
