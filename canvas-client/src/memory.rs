//! In-memory backend implementing every collaborator.
//!
//! Runs complete after a configurable latency with a synthetic asset sized
//! from the request. Knobs let tests inject failures and observe traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use canvas_core::{AssetRecord, Size, ViewState};
use futures::StreamExt;
use serde_json::{json, Value};

use crate::error::{ClientError, ClientResult};
use crate::services::{
    AssetStore, GenerationService, LoadedScene, PlanService, PlanStep, RunEventStream, RunHandle, RunRequest,
    ScenePersistence, UploadSource,
};

/// A recorded scene save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRecord {
    /// Schema version sent.
    pub schema_version: u32,
    /// Document sent.
    pub payload: Value,
    /// Idempotency key sent.
    pub idempotency_key: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    scene: Option<Value>,
    viewport: Option<ViewState>,
    assets: Vec<AssetRecord>,
    saves: Vec<SaveRecord>,
    viewport_saves: Vec<(ViewState, String)>,
    uploads: Vec<UploadSource>,
    runs: HashMap<String, RunRequest>,
    run_order: Vec<RunRequest>,
    fail_next_saves: u32,
    fail_uploads: bool,
    fail_loads: bool,
    omit_run_id: bool,
    failing_prompt: Option<String>,
    extra_events: Vec<Value>,
    next_id: u64,
}

/// Shared in-memory backend. Clones see the same state.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    latency: Duration,
    active_streams: Arc<AtomicUsize>,
    max_active_streams: Arc<AtomicUsize>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryBackend {
    /// Create a backend whose runs take `latency` to finish.
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            latency,
            active_streams: Arc::new(AtomicUsize::new(0)),
            max_active_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn next_id(&self, prefix: &str) -> String {
        self.with(|s| {
            s.next_id += 1;
            format!("{prefix}-{}", s.next_id)
        })
    }

    /// Seed the saved scene and viewport.
    pub fn seed_scene(&self, document: Option<Value>, viewport: Option<ViewState>) {
        self.with(|s| {
            s.scene = document;
            s.viewport = viewport;
        });
    }

    /// Seed the asset catalog.
    pub fn seed_assets(&self, assets: Vec<AssetRecord>) {
        self.with(|s| s.assets = assets);
    }

    /// Fail the next `n` scene saves with a retryable error.
    pub fn fail_next_saves(&self, n: u32) {
        self.with(|s| s.fail_next_saves = n);
    }

    /// Make every upload fail.
    pub fn fail_uploads(&self, fail: bool) {
        self.with(|s| s.fail_uploads = fail);
    }

    /// Make scene loading fail.
    pub fn fail_loads(&self, fail: bool) {
        self.with(|s| s.fail_loads = fail);
    }

    /// Accept runs without returning a run id.
    pub fn omit_run_id(&self, omit: bool) {
        self.with(|s| s.omit_run_id = omit);
    }

    /// Runs whose prompt contains `needle` end with an error event.
    pub fn fail_prompts_containing(&self, needle: impl Into<String>) {
        self.with(|s| s.failing_prompt = Some(needle.into()));
    }

    /// Payloads emitted at the start of every run stream.
    pub fn prepend_events(&self, events: Vec<Value>) {
        self.with(|s| s.extra_events = events);
    }

    /// Scene saves received, oldest first.
    #[must_use]
    pub fn saves(&self) -> Vec<SaveRecord> {
        self.with(|s| s.saves.clone())
    }

    /// Viewport saves received, oldest first.
    #[must_use]
    pub fn viewport_saves(&self) -> Vec<(ViewState, String)> {
        self.with(|s| s.viewport_saves.clone())
    }

    /// Uploads received.
    #[must_use]
    pub fn uploads(&self) -> Vec<UploadSource> {
        self.with(|s| s.uploads.clone())
    }

    /// Runs created, oldest first.
    #[must_use]
    pub fn runs(&self) -> Vec<RunRequest> {
        self.with(|s| s.run_order.clone())
    }

    /// Most run streams open at once so far.
    #[must_use]
    pub fn max_active_streams(&self) -> usize {
        self.max_active_streams.load(Ordering::SeqCst)
    }

    /// The last saved scene document.
    #[must_use]
    pub fn saved_scene(&self) -> Option<Value> {
        self.with(|s| s.scene.clone())
    }
}

#[async_trait]
impl AssetStore for MemoryBackend {
    async fn upload(&self, _workspace: &str, source: UploadSource) -> ClientResult<AssetRecord> {
        if self.with(|s| s.fail_uploads) {
            return Err(ClientError::Api {
                code: "UPLOAD_FAILED".into(),
                message: "upload rejected".into(),
            });
        }
        let id = self.next_id("up");
        let record = AssetRecord {
            content_hash: format!("sha-{id}"),
            url: format!("https://memory.local/assets/{id}.png"),
            width: None,
            height: None,
            id,
        };
        self.with(|s| {
            s.uploads.push(source);
            s.assets.push(record.clone());
        });
        Ok(record)
    }

    async fn delete(&self, _workspace: &str, asset_id: &str) -> ClientResult<()> {
        self.with(|s| s.assets.retain(|a| a.id != asset_id));
        Ok(())
    }
}

#[async_trait]
impl GenerationService for MemoryBackend {
    async fn create_run(&self, _workspace: &str, request: &RunRequest) -> ClientResult<RunHandle> {
        let run_id = self.next_id("run");
        let omit = self.with(|s| {
            s.runs.insert(run_id.clone(), request.clone());
            s.run_order.push(request.clone());
            s.omit_run_id
        });
        Ok(RunHandle {
            run_id: (!omit).then_some(run_id),
        })
    }

    async fn stream_run(&self, run_id: &str) -> ClientResult<RunEventStream> {
        let (request, failing, extra) = self.with(|s| (s.runs.get(run_id).cloned(), s.failing_prompt.clone(), s.extra_events.clone()));
        let request = request.ok_or_else(|| ClientError::Api {
            code: "NOT_FOUND".into(),
            message: format!("run {run_id} not found"),
        })?;
        let asset_id = self.next_id("gen");
        let latency = self.latency;
        let active = Arc::clone(&self.active_streams);
        let max_active = Arc::clone(&self.max_active_streams);
        let state = Arc::clone(&self.state);

        let stream = async_stream::stream! {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(now, Ordering::SeqCst);
            let _guard = ActiveGuard(active);

            for event in extra {
                yield Ok::<Value, ClientError>(event);
            }
            tokio::time::sleep(latency).await;

            if failing.as_deref().is_some_and(|needle| request.prompt.contains(needle)) {
                yield Ok(json!({
                    "type": "imageError",
                    "payload": { "message": "generation failed", "targetKey": request.target_key }
                }));
            } else {
                let size = Size::parse(&request.size).unwrap_or_default();
                let asset = AssetRecord {
                    content_hash: format!("sha-{asset_id}"),
                    url: format!("https://memory.local/assets/{asset_id}.png"),
                    width: Some(size.w),
                    height: Some(size.h),
                    id: asset_id,
                };
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .assets
                    .push(asset.clone());
                yield Ok(json!({
                    "type": "imageDone",
                    "payload": { "asset": asset, "targetKey": request.target_key }
                }));
            }
        };
        Ok(stream.boxed())
    }
}

#[async_trait]
impl PlanService for MemoryBackend {
    async fn plan(&self, text: &str) -> ClientResult<Vec<PlanStep>> {
        Ok(text
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| PlanStep { prompt: p.to_string() })
            .collect())
    }
}

#[async_trait]
impl ScenePersistence for MemoryBackend {
    async fn load_scene(&self, _workspace: &str) -> ClientResult<LoadedScene> {
        self.with(|s| {
            if s.fail_loads {
                return Err(ClientError::Unavailable("scene store offline".into()));
            }
            Ok(LoadedScene {
                document: s.scene.clone(),
                viewport: s.viewport,
            })
        })
    }

    async fn save_scene(
        &self,
        _workspace: &str,
        schema_version: u32,
        payload: &Value,
        idempotency_key: &str,
    ) -> ClientResult<()> {
        self.with(|s| {
            s.saves.push(SaveRecord {
                schema_version,
                payload: payload.clone(),
                idempotency_key: idempotency_key.to_string(),
            });
            if s.fail_next_saves > 0 {
                s.fail_next_saves -= 1;
                return Err(ClientError::Unavailable("try again".into()));
            }
            s.scene = Some(payload.clone());
            Ok(())
        })
    }

    async fn save_viewport(&self, _workspace: &str, view: ViewState, idempotency_key: &str) -> ClientResult<ViewState> {
        self.with(|s| {
            s.viewport = Some(view);
            s.viewport_saves.push((view, idempotency_key.to_string()));
        });
        Ok(view)
    }

    async fn list_assets(&self, _workspace: &str) -> ClientResult<Vec<AssetRecord>> {
        Ok(self.with(|s| s.assets.clone()))
    }
}
