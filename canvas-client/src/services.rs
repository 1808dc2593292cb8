//! Remote collaborators, as traits.
//!
//! The job queue and autosave only ever talk to these; [`crate::http`]
//! implements all of them over HTTP and tests substitute in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use canvas_core::{AssetRecord, Size, ViewState};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientResult;

/// Bytes to upload, or a location the asset store should fetch itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// Inline data URI.
    DataUri(String),
    /// Remote URL.
    Url(String),
}

impl UploadSource {
    /// Classify an element's `src`.
    #[must_use]
    pub fn from_src(src: &str) -> Self {
        if src.trim_start().to_ascii_lowercase().starts_with("data:") {
            Self::DataUri(src.to_string())
        } else {
            Self::Url(src.to_string())
        }
    }
}

/// Parameters of a generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Prompt text.
    pub prompt: String,
    /// Element the result is written into.
    pub target_key: String,
    /// Pixel size.
    pub size: String,
    /// Primary reference image, by content hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_content_hash: Option<String>,
    /// Every reference image in mention order, primary first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reference_content_hashes: Vec<String>,
}

impl RunRequest {
    /// Build a request.
    #[must_use]
    pub fn new(prompt: impl Into<String>, target_key: impl Into<String>, size: Size) -> Self {
        Self {
            prompt: prompt.into(),
            target_key: target_key.into(),
            size: size.to_string(),
            reference_content_hash: None,
            reference_content_hashes: Vec::new(),
        }
    }
}

/// Server acknowledgement of a run. The id may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHandle {
    /// Run id to subscribe to.
    #[serde(default)]
    pub run_id: Option<String>,
}

/// One prompt from the plan service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanStep {
    /// Prompt to generate.
    pub prompt: String,
}

/// A workspace as the persistence service returns it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedScene {
    /// Raw scene document; absent for a workspace never saved.
    #[serde(default)]
    pub document: Option<Value>,
    /// Saved viewport.
    #[serde(default)]
    pub viewport: Option<ViewState>,
}

/// Stream of raw run event payloads.
pub type RunEventStream = BoxStream<'static, ClientResult<Value>>;

/// Durable bitmap storage.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Upload bytes or a remote image.
    async fn upload(&self, workspace: &str, source: UploadSource) -> ClientResult<AssetRecord>;

    /// Delete an asset.
    async fn delete(&self, workspace: &str, asset_id: &str) -> ClientResult<()>;
}

/// Image generation backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Start a run.
    async fn create_run(&self, workspace: &str, request: &RunRequest) -> ClientResult<RunHandle>;

    /// Subscribe to a run's events.
    async fn stream_run(&self, run_id: &str) -> ClientResult<RunEventStream>;
}

/// Turns free text into one or more prompts.
#[async_trait]
pub trait PlanService: Send + Sync {
    /// Plan prompts for `text`.
    async fn plan(&self, text: &str) -> ClientResult<Vec<PlanStep>>;
}

/// Scene and viewport storage.
#[async_trait]
pub trait ScenePersistence: Send + Sync {
    /// Load the saved scene.
    async fn load_scene(&self, workspace: &str) -> ClientResult<LoadedScene>;

    /// Save a scene document.
    async fn save_scene(
        &self,
        workspace: &str,
        schema_version: u32,
        payload: &Value,
        idempotency_key: &str,
    ) -> ClientResult<()>;

    /// Save the viewport; returns the stored value.
    async fn save_viewport(&self, workspace: &str, view: ViewState, idempotency_key: &str) -> ClientResult<ViewState>;

    /// List the workspace's assets.
    async fn list_assets(&self, workspace: &str) -> ClientResult<Vec<AssetRecord>>;
}

/// The collaborators one workspace uses. Only persistence is mandatory.
#[derive(Clone)]
pub struct Services {
    /// Asset store.
    pub assets: Option<Arc<dyn AssetStore>>,
    /// Generation backend.
    pub generation: Option<Arc<dyn GenerationService>>,
    /// Plan service.
    pub plan: Option<Arc<dyn PlanService>>,
    /// Scene persistence.
    pub persistence: Arc<dyn ScenePersistence>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("assets", &self.assets.is_some())
            .field("generation", &self.generation.is_some())
            .field("plan", &self.plan.is_some())
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Use one backend for every collaborator.
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AssetStore + GenerationService + PlanService + ScenePersistence + 'static,
    {
        Self {
            assets: Some(backend.clone()),
            generation: Some(backend.clone()),
            plan: Some(backend.clone()),
            persistence: backend,
        }
    }
}
