//! HTTP implementation of every collaborator.
//!
//! All endpoints live under `{base}/api/v1` and answer with the envelope
//! `{ "success": bool, "data": ..., "error": { "code", "message" } }`.
//! Requests carry a bearer token when one is configured; scene and viewport
//! writes carry an `Idempotency-Key` header. Run results arrive as
//! server-sent events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canvas_core::{AssetRecord, ViewState};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::services::{
    AssetStore, GenerationService, LoadedScene, PlanService, PlanStep, RunEventStream, RunHandle, RunRequest,
    ScenePersistence, UploadSource,
};
use crate::stream::SseDecoder;

const API_PREFIX: [&str; 2] = ["api", "v1"];
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Client for the canvas HTTP API. Clones share one connection pool.
#[derive(Clone)]
pub struct HttpBackend {
    inner: Arc<InnerClient>,
}

struct InnerClient {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base", &self.inner.base.as_str())
            .field("authenticated", &self.inner.token.is_some())
            .finish()
    }
}

impl HttpBackend {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if the URL is malformed or cannot
    /// carry a path, and [`ClientError::Http`] if the HTTP client fails to
    /// build.
    pub fn new(base_url: impl AsRef<str>, token: Option<String>) -> ClientResult<Self> {
        let base = Url::parse(base_url.as_ref()).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(format!("{base} cannot carry a path")));
        }
        let http = Client::builder()
            .user_agent(format!("canvas-client/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            inner: Arc::new(InnerClient {
                http,
                base,
                token: token.filter(|t| !t.trim().is_empty()),
            }),
        })
    }

    /// Create a client from the configured URL and token.
    ///
    /// # Errors
    ///
    /// See [`HttpBackend::new`].
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Self::new(&config.api_base_url, config.token.clone())
    }

    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.inner.base.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(self.inner.base.to_string()))?
            .pop_if_empty()
            .extend(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.inner.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and unwrap the envelope.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<Option<T>> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if is_unavailable(status) {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Unavailable(format!("HTTP {status}: {body}")));
        }
        let body = response.bytes().await?;
        let envelope: Envelope<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Api {
                    code: format!("HTTP_{}", status.as_u16()),
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if !status.is_success() || !envelope.success {
            let error = envelope.error.unwrap_or_default();
            return Err(ClientError::Api {
                code: if error.code.is_empty() {
                    format!("HTTP_{}", status.as_u16())
                } else {
                    error.code
                },
                message: if error.message.is_empty() {
                    "request failed".to_string()
                } else {
                    error.message
                },
            });
        }
        Ok(envelope.data)
    }

    async fn send_required<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> ClientResult<T> {
        self.send(request)
            .await?
            .ok_or_else(|| ClientError::UnexpectedResponse(format!("{what} response had no data")))
    }
}

fn is_unavailable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl AssetStore for HttpBackend {
    async fn upload(&self, workspace: &str, source: UploadSource) -> ClientResult<AssetRecord> {
        let url = self.endpoint(&["workspaces", workspace, "assets"])?;
        let body = match source {
            UploadSource::DataUri(data) => json!({ "dataUri": data }),
            UploadSource::Url(src) => json!({ "sourceUrl": src }),
        };
        self.send_required(self.inner.http.post(url).json(&body), "upload")
            .await
    }

    async fn delete(&self, workspace: &str, asset_id: &str) -> ClientResult<()> {
        let url = self.endpoint(&["workspaces", workspace, "assets", asset_id])?;
        self.send::<Value>(self.inner.http.delete(url)).await?;
        Ok(())
    }
}

#[async_trait]
impl GenerationService for HttpBackend {
    async fn create_run(&self, workspace: &str, request: &RunRequest) -> ClientResult<RunHandle> {
        let url = self.endpoint(&["workspaces", workspace, "runs"])?;
        let handle = self.send(self.inner.http.post(url).json(request)).await?;
        Ok(handle.unwrap_or_default())
    }

    async fn stream_run(&self, run_id: &str) -> ClientResult<RunEventStream> {
        let url = self.endpoint(&["runs", run_id, "stream"])?;
        let request = self
            .inner
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_unavailable(status) {
                return Err(ClientError::Unavailable(format!("HTTP {status}: {body}")));
            }
            return Err(ClientError::Api {
                code: format!("HTTP_{}", status.as_u16()),
                message: body,
            });
        }
        tracing::debug!("Subscribed to run {run_id}");

        let mut chunks = Box::pin(response.bytes_stream());
        let events = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut failed = false;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => {
                        for value in decoder.push(&bytes) {
                            yield Ok(value);
                        }
                    }
                    Err(e) => {
                        failed = true;
                        yield Err(ClientError::Http(e));
                        break;
                    }
                }
            }
            if !failed {
                if let Some(value) = decoder.finish() {
                    yield Ok(value);
                }
            }
        };
        Ok(events.boxed())
    }
}

#[async_trait]
impl PlanService for HttpBackend {
    async fn plan(&self, text: &str) -> ClientResult<Vec<PlanStep>> {
        let url = self.endpoint(&["plan"])?;
        let steps = self
            .send(self.inner.http.post(url).json(&json!({ "text": text })))
            .await?;
        Ok(steps.unwrap_or_default())
    }
}

#[async_trait]
impl ScenePersistence for HttpBackend {
    async fn load_scene(&self, workspace: &str) -> ClientResult<LoadedScene> {
        let url = self.endpoint(&["workspaces", workspace, "scene"])?;
        let loaded = self.send(self.inner.http.get(url)).await?;
        Ok(loaded.unwrap_or_default())
    }

    async fn save_scene(
        &self,
        workspace: &str,
        schema_version: u32,
        payload: &Value,
        idempotency_key: &str,
    ) -> ClientResult<()> {
        let url = self.endpoint(&["workspaces", workspace, "scene"])?;
        let body = json!({ "schemaVersion": schema_version, "document": payload });
        self.send::<Value>(
            self.inner
                .http
                .put(url)
                .header(IDEMPOTENCY_HEADER, idempotency_key)
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn save_viewport(&self, workspace: &str, view: ViewState, idempotency_key: &str) -> ClientResult<ViewState> {
        let url = self.endpoint(&["workspaces", workspace, "viewport"])?;
        let stored = self
            .send(
                self.inner
                    .http
                    .put(url)
                    .header(IDEMPOTENCY_HEADER, idempotency_key)
                    .json(&view),
            )
            .await?;
        Ok(stored.unwrap_or(view))
    }

    async fn list_assets(&self, workspace: &str) -> ClientResult<Vec<AssetRecord>> {
        let url = self.endpoint(&["workspaces", workspace, "assets"])?;
        let assets = self.send(self.inner.http.get(url)).await?;
        Ok(assets.unwrap_or_default())
    }
}
