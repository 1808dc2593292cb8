//! Generation job queue.
//!
//! Submitting a prompt validates it against the current scene, then queues
//! one job per planned prompt. At most `max_concurrency` jobs run at once;
//! the rest wait in FIFO order. A job whose seed element is still held by a
//! running job waits until that job finishes, and later jobs may overtake it.
//!
//! Running a job:
//!
//! 1. Turn the seed generator into a running image, or place a new
//!    placeholder near the viewport center.
//! 2. Upload every reference that is not durably stored yet.
//! 3. Save the scene immediately so the server knows the placeholder.
//! 4. Start the run and record its id on the placeholder.
//! 5. Follow the run's stream until the placeholder is done or failed.
//!
//! Failures land on the placeholder as error state and free the slot; they
//! never stop the queue.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use canvas_core::{
    parse_prompt, resolve_references, CanvasElement, CanvasError, CanvasResult, CanvasState, ElementKey,
    ElementKind, ImageContent, ImageStatus, ParsedPrompt, SceneStore, Size, SyncStatus,
};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::autosave::Autosaver;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics;
use crate::services::{RunHandle, RunRequest, Services, UploadSource};
use crate::stream::{fail_element, follow_run, Applied};

/// A queued generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    /// Job id.
    pub id: Uuid,
    /// Text shown on the placeholder.
    pub display_text: String,
    /// Prompt sent to the backend.
    pub request_text: String,
    /// Reference image, if any. Always the first of `reference_keys`.
    pub primary_reference_key: Option<ElementKey>,
    /// Every reference image, in the order the prompt mentions them.
    pub reference_keys: Vec<ElementKey>,
    /// Generator element to fill instead of placing a new one.
    pub seed_selection_key: Option<ElementKey>,
    /// Pixel size to request, already normalized.
    pub size: Size,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// The placeholder shows the result.
    Done,
    /// The job failed with this message.
    Error(String),
}

/// Result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Job id.
    pub job_id: Uuid,
    /// Element the job wrote into, once one was chosen.
    pub target_key: Option<ElementKey>,
    /// Final status.
    pub status: JobStatus,
    /// Size requested from the backend.
    pub size: Size,
}

impl JobOutcome {
    /// Whether the job produced an image.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }
}

/// Resolves when its job finishes.
#[derive(Debug)]
pub struct JobHandle {
    job: GenerationJob,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Id of the job.
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// The job as queued.
    #[must_use]
    pub fn job(&self) -> &GenerationJob {
        &self.job
    }

    /// Wait for the job to finish.
    pub async fn outcome(self) -> JobOutcome {
        let Self { job, rx } = self;
        rx.await.unwrap_or_else(|_| JobOutcome {
            job_id: job.id,
            target_key: None,
            status: JobStatus::Error("job abandoned".to_string()),
            size: job.size,
        })
    }
}

struct Queued {
    job: GenerationJob,
    tx: oneshot::Sender<JobOutcome>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Queued>,
    running: usize,
    busy: HashSet<ElementKey>,
}

struct Inner {
    store: SceneStore,
    services: Services,
    autosaver: Autosaver,
    workspace: String,
    max_concurrency: usize,
    default_size: Size,
    direct_prompt: bool,
    stream_timeout: Duration,
    state: Mutex<QueueState>,
}

/// Bounded-concurrency queue of generation jobs. Clones share the queue.
#[derive(Clone)]
pub struct GenerationQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for GenerationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationQueue")
            .field("running", &self.running())
            .field("pending", &self.pending())
            .field("max_concurrency", &self.inner.max_concurrency)
            .finish_non_exhaustive()
    }
}

/// What submission resolved from the prompt and the selection.
struct Target {
    references: Vec<ElementKey>,
    seed: Option<ElementKey>,
    seed_requested_size: Option<Size>,
}

impl GenerationQueue {
    /// Create a queue for one workspace.
    #[must_use]
    pub fn new(store: SceneStore, services: Services, autosaver: Autosaver, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                services,
                autosaver,
                workspace: config.workspace.clone(),
                max_concurrency: config.max_concurrency.max(1),
                default_size: config.default_size,
                direct_prompt: config.direct_prompt,
                stream_timeout: config.stream_timeout,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Jobs currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.lock().running
    }

    /// Jobs waiting for a slot.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Queue a prompt.
    ///
    /// The prompt is checked before anything changes: an invalid size,
    /// an unknown `@imgN`, a running seed or reference, or a missing backend
    /// reject it with the scene untouched. With direct prompts disabled the
    /// text goes through the plan service first and one job is queued per
    /// planned prompt.
    ///
    /// # Errors
    ///
    /// Returns an input error ([`ClientError::is_input_error`]) for a prompt
    /// that cannot run, or the plan service's error.
    pub async fn submit(&self, text: &str) -> ClientResult<Vec<JobHandle>> {
        let inner = &self.inner;
        if inner.services.generation.is_none() {
            metrics::record_job_rejected("no_backend");
            tracing::warn!("Rejected prompt: no generation backend");
            return Err(ClientError::NoBackend);
        }

        let parsed = parse_prompt(text).inspect_err(|e| {
            metrics::record_job_rejected("invalid_prompt");
            tracing::debug!("Rejected prompt: {e}");
        })?;
        let target = inner.store.read(|state| resolve_target(state, &parsed)).inspect_err(|e| {
            metrics::record_job_rejected("invalid_target");
            tracing::debug!("Rejected prompt: {e}");
        })?;
        let prompts = self.plan(&parsed).await?;

        let requested = parsed
            .size
            .or(target.seed_requested_size)
            .unwrap_or(inner.default_size);
        let (size, size_adjusted, ratio_adjusted) = requested.normalized();
        if size_adjusted {
            tracing::debug!("Requested size {requested} adjusted to {size}");
        }
        if let Some(seed) = &target.seed {
            let recorded = inner.store.update_element(seed, |mut el| {
                if let ElementKind::Generator(generator) = &mut el.kind {
                    generator.effective_size = Some(size);
                    generator.size_adjusted = size_adjusted;
                    generator.ratio_adjusted = ratio_adjusted;
                }
                el
            });
            if let Err(e) = recorded {
                tracing::debug!("Seed vanished before sizing: {e}");
            }
        }

        let single = prompts.len() == 1;
        let mut handles = Vec::with_capacity(prompts.len());
        {
            let mut state = self.lock();
            for (i, prompt) in prompts.into_iter().enumerate() {
                let job = GenerationJob {
                    id: Uuid::new_v4(),
                    display_text: if single { parsed.display_text.clone() } else { prompt.clone() },
                    request_text: prompt,
                    primary_reference_key: target.references.first().cloned(),
                    reference_keys: target.references.clone(),
                    seed_selection_key: if i == 0 { target.seed.clone() } else { None },
                    size,
                };
                tracing::info!("Queued job {} ({size}): {}", job.id, job.request_text);
                metrics::record_job_submitted();
                let (tx, rx) = oneshot::channel();
                handles.push(JobHandle { job: job.clone(), rx });
                state.pending.push_back(Queued { job, tx });
            }
        }
        self.drain();
        Ok(handles)
    }

    async fn plan(&self, parsed: &ParsedPrompt) -> ClientResult<Vec<String>> {
        let direct = vec![parsed.request_text.clone()];
        if self.inner.direct_prompt {
            return Ok(direct);
        }
        let Some(planner) = &self.inner.services.plan else {
            tracing::warn!("No plan service; sending the prompt as written");
            return Ok(direct);
        };
        let steps = planner.plan(&parsed.request_text).await?;
        let prompts: Vec<String> = steps
            .into_iter()
            .map(|step| step.prompt.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if prompts.is_empty() {
            tracing::debug!("Plan returned no prompts; sending the prompt as written");
            return Ok(direct);
        }
        tracing::debug!("Plan produced {} prompt(s)", prompts.len());
        Ok(prompts)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start pending jobs while slots are free.
    fn drain(&self) {
        let started = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let mut started = Vec::new();
            while state.running < self.inner.max_concurrency {
                let free = state.pending.iter().position(|queued| {
                    queued
                        .job
                        .seed_selection_key
                        .as_ref()
                        .is_none_or(|key| !state.busy.contains(key))
                });
                let Some(queued) = free.and_then(|idx| state.pending.remove(idx)) else {
                    break;
                };
                state.running += 1;
                if let Some(key) = &queued.job.seed_selection_key {
                    state.busy.insert(key.clone());
                }
                started.push(queued);
            }
            metrics::set_queue_depth(state.running, state.pending.len());
            started
        };

        for Queued { job, tx } in started {
            let queue = self.clone();
            tokio::spawn(async move {
                let outcome = queue.inner.execute(&job).await;
                metrics::record_job_finished(outcome.is_done());
                queue.release(&job);
                // The submitter may have stopped waiting.
                let _ = tx.send(outcome);
            });
        }
    }

    fn release(&self, job: &GenerationJob) {
        {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
            if let Some(key) = &job.seed_selection_key {
                state.busy.remove(key);
            }
        }
        self.drain();
    }
}

fn resolve_target(state: &CanvasState, parsed: &ParsedPrompt) -> CanvasResult<Target> {
    let references = resolve_references(&state.scene, &parsed.references)?;
    if let Some(busy) = references
        .iter()
        .find(|key| state.scene.get(key).is_some_and(CanvasElement::is_running))
    {
        return Err(CanvasError::TargetBusy(busy.to_string()));
    }

    let mut target = Target {
        references,
        seed: None,
        seed_requested_size: None,
    };
    let Some(selected) = state.selection.single().and_then(|key| state.scene.get(key)) else {
        return Ok(target);
    };
    if selected.is_running() {
        return Err(CanvasError::TargetBusy(selected.key.to_string()));
    }
    match &selected.kind {
        ElementKind::Generator(generator) => {
            target.seed = Some(selected.key.clone());
            target.seed_requested_size = generator.requested_size;
        }
        ElementKind::Image(img) if img.status == ImageStatus::Done && target.references.is_empty() => {
            target.references.push(selected.key.clone());
        }
        _ => {}
    }
    Ok(target)
}

impl Inner {
    async fn execute(&self, job: &GenerationJob) -> JobOutcome {
        let outcome = |target_key: Option<ElementKey>, status: JobStatus| JobOutcome {
            job_id: job.id,
            target_key,
            status,
            size: job.size,
        };

        let key = match self.place_target(job) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Job {} could not place its target: {e}", job.id);
                return outcome(None, JobStatus::Error(e.to_string()));
            }
        };
        tracing::info!("Job {} started on {key}", job.id);

        let status = match self.run(job, &key).await {
            Applied::Done => JobStatus::Done,
            Applied::Error => {
                let message = self.store.read(|s| {
                    s.scene
                        .get(&key)
                        .and_then(CanvasElement::image)
                        .and_then(|img| img.error_message.clone())
                });
                JobStatus::Error(message.unwrap_or_else(|| "generation failed".to_string()))
            }
            Applied::Ignored => JobStatus::Error("target is no longer waiting for a result".to_string()),
        };
        match &status {
            JobStatus::Done => tracing::info!("Job {} finished on {key}", job.id),
            JobStatus::Error(message) => tracing::warn!("Job {} failed on {key}: {message}", job.id),
        }
        outcome(Some(key), status)
    }

    /// Step 1: the seed generator becomes the placeholder, else a new one is
    /// placed near the viewport center.
    fn place_target(&self, job: &GenerationJob) -> CanvasResult<ElementKey> {
        if let Some(seed) = &job.seed_selection_key {
            let mut converted = false;
            let result = self.store.update_element(seed, |mut el| {
                if matches!(el.kind, ElementKind::Generator(_)) {
                    el.kind = ElementKind::Image(ImageContent::placeholder(job.display_text.clone()));
                    converted = true;
                }
                el
            });
            if result.is_ok() && converted {
                return Ok(seed.clone());
            }
            tracing::debug!("Seed {seed} is no longer a generator; placing a new element");
        }
        self.store.insert_placed(
            ElementKey::new(),
            ElementKind::Image(ImageContent::placeholder(job.display_text.clone())),
            f64::from(job.size.w),
            f64::from(job.size.h),
            None,
        )
    }

    /// Steps 2 to 5.
    async fn run(&self, job: &GenerationJob, key: &ElementKey) -> Applied {
        let mut reference_hashes = Vec::with_capacity(job.reference_keys.len());
        for reference in &job.reference_keys {
            match self.ensure_reference(reference).await {
                Ok(hash) => reference_hashes.extend(hash),
                Err(e) => return fail_element(&self.store, key, &format!("reference upload failed: {e}")),
            }
        }

        if let Err(e) = self.autosaver.save_now().await {
            tracing::warn!("Saving before run failed, continuing: {e}");
        }

        let Some(generation) = self.services.generation.clone() else {
            return fail_element(&self.store, key, "no generation backend available");
        };
        let mut request = RunRequest::new(job.request_text.clone(), key.as_str(), job.size);
        request.reference_content_hash = reference_hashes.first().cloned();
        request.reference_content_hashes = reference_hashes;
        let run_id = match generation.create_run(&self.workspace, &request).await {
            Ok(RunHandle { run_id: Some(id) }) if !id.trim().is_empty() => id,
            Ok(_) => {
                tracing::warn!("Backend accepted job {} without a run id", job.id);
                return fail_element(&self.store, key, "backend returned no run id");
            }
            Err(e) => {
                tracing::warn!("Starting run for job {} failed: {e}", job.id);
                return fail_element(&self.store, key, &format!("generation request failed: {e}"));
            }
        };

        let recorded = self.store.update_element(key, |mut el| {
            if let ElementKind::Image(img) = &mut el.kind {
                if img.status == ImageStatus::Running {
                    img.run_id = Some(run_id.clone());
                }
            }
            el
        });
        if recorded.is_err() {
            tracing::debug!("Placeholder {key} removed before run {run_id} started");
        }

        follow_run(&self.store, generation.as_ref(), key, &run_id, self.stream_timeout).await
    }

    /// Step 2: make sure the reference has a content hash, uploading it when
    /// needed. Non-image references carry no bitmap and are skipped.
    async fn ensure_reference(&self, reference: &ElementKey) -> ClientResult<Option<String>> {
        let Some(img) = self
            .store
            .read(|s| s.scene.get(reference).and_then(CanvasElement::image).cloned())
        else {
            tracing::debug!("Reference {reference} has no image; sending without one");
            return Ok(None);
        };
        if img.is_persisted() {
            return Ok(img.content_hash);
        }
        if img.src.is_empty() {
            return Ok(None);
        }
        let Some(assets) = &self.services.assets else {
            tracing::warn!("No asset store; sending without reference {reference}");
            return Ok(None);
        };

        self.set_sync(reference, SyncStatus::Pending, None);
        match assets.upload(&self.workspace, UploadSource::from_src(&img.src)).await {
            Ok(record) => {
                metrics::record_upload(true);
                tracing::info!("Uploaded reference {reference} as asset {}", record.id);
                let hash = record.content_hash.clone();
                let _ = self.store.update_element(reference, |mut el| {
                    if let ElementKind::Image(img) = &mut el.kind {
                        img.asset_id = Some(record.id);
                        img.content_hash = Some(record.content_hash);
                        img.sync_status = Some(SyncStatus::Synced);
                        img.sync_error = None;
                        if img.natural_w.is_none() {
                            img.natural_w = record.width.map(f64::from);
                            img.natural_h = record.height.map(f64::from);
                        }
                    }
                    el
                });
                Ok(Some(hash))
            }
            Err(e) => {
                metrics::record_upload(false);
                tracing::warn!("Uploading reference {reference} failed: {e}");
                self.set_sync(reference, SyncStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn set_sync(&self, key: &ElementKey, status: SyncStatus, error: Option<String>) {
        let _ = self.store.update_element(key, |mut el| {
            if let ElementKind::Image(img) = &mut el.kind {
                img.sync_status = Some(status);
                img.sync_error = error;
            }
            el
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use canvas_core::{GeneratorContent, Rect};
    use serde_json::json;

    struct Fixture {
        store: SceneStore,
        backend: MemoryBackend,
        queue: GenerationQueue,
    }

    fn fixture_with(backend: MemoryBackend, config: ClientConfig, services: Option<Services>) -> Fixture {
        let store = SceneStore::new(CanvasState::new(1280.0, 800.0));
        let services = services.unwrap_or_else(|| Services::from_backend(Arc::new(backend.clone())));
        let autosaver = Autosaver::new(store.clone(), services.persistence.clone(), &config);
        let queue = GenerationQueue::new(store.clone(), services, autosaver, &config);
        Fixture { store, backend, queue }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryBackend::default(), ClientConfig::default(), None)
    }

    fn insert(store: &SceneStore, kind: ElementKind, select: bool) -> ElementKey {
        let key = store
            .update_scene(|scene| scene.insert(CanvasElement::new(kind, Rect::new(0.0, 0.0, 200.0, 200.0))))
            .expect("insert");
        if select {
            store.apply(|s| {
                s.selection.set_single(key.clone());
                canvas_core::Effects {
                    selection: true,
                    ..canvas_core::Effects::none()
                }
            });
        }
        key
    }

    fn image_of(store: &SceneStore, key: &ElementKey) -> ImageContent {
        store
            .read(|s| s.scene.get(key).and_then(CanvasElement::image).cloned())
            .expect("image element")
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_fills_new_placeholder() {
        let f = fixture();
        let handles = f.queue.submit("a red fox (@size:1024x768)").await.expect("submit");
        assert_eq!(handles.len(), 1);
        let outcome = handles.into_iter().next().expect("handle").outcome().await;
        assert!(outcome.is_done());
        assert_eq!(outcome.size, Size::new(1024, 768));

        let key = outcome.target_key.expect("target");
        let img = image_of(&f.store, &key);
        assert_eq!(img.status, ImageStatus::Done);
        assert!(img.src.starts_with("https://memory.local/"));
        assert!(img.run_id.is_none());
        assert_eq!(img.prompt.as_deref(), Some("a red fox (@size:1024x768)"));

        let runs = f.backend.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].prompt, "a red fox");
        assert_eq!(runs[0].size, "1024x768");
        assert_eq!(runs[0].target_key, key.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_saved_before_run_starts() {
        let f = fixture();
        let handle = f.queue.submit("lighthouse").await.expect("submit").remove(0);
        handle.outcome().await;
        let saves = f.backend.saves();
        assert!(!saves.is_empty());
        let first = &saves[0].payload["elements"][0];
        assert_eq!(first["status"], json!("running"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_capped() {
        let backend = MemoryBackend::new(Duration::from_secs(2));
        let f = fixture_with(backend, ClientConfig::default(), None);
        let mut handles = Vec::new();
        for i in 0..7 {
            handles.extend(f.queue.submit(&format!("prompt {i}")).await.expect("submit"));
        }
        assert_eq!(f.queue.running(), 3);
        assert_eq!(f.queue.pending(), 4);

        for handle in handles {
            assert!(handle.outcome().await.is_done());
        }
        assert_eq!(f.backend.max_active_streams(), 3);
        assert_eq!(f.queue.running(), 0);
        assert_eq!(f.queue.pending(), 0);

        let mut first_started: Vec<String> = f.backend.runs().into_iter().take(3).map(|r| r.prompt).collect();
        first_started.sort();
        assert_eq!(first_started, ["prompt 0", "prompt 1", "prompt 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_backend_rejects_without_mutation() {
        let backend = MemoryBackend::default();
        let services = Services {
            assets: None,
            generation: None,
            plan: None,
            persistence: Arc::new(backend.clone()),
        };
        let f = fixture_with(backend, ClientConfig::default(), Some(services));
        let before = f.store.revision();
        let err = f.queue.submit("a fox").await.expect_err("no backend");
        assert!(matches!(err, ClientError::NoBackend));
        assert!(err.is_input_error());
        assert_eq!(f.store.revision(), before);
        assert!(f.store.read(|s| s.scene.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_errors_reject_without_mutation() {
        let f = fixture();
        for text in ["", "(@size: 10)", "fox with @img7"] {
            let err = f.queue.submit(text).await.expect_err("invalid");
            assert!(err.is_input_error(), "{text}: {err}");
        }
        assert_eq!(f.store.revision(), 0);
        assert!(f.backend.runs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_selection_is_busy() {
        let f = fixture();
        insert(&f.store, ElementKind::Image(ImageContent::placeholder("busy")), true);
        let revision = f.store.revision();
        let err = f.queue.submit("another").await.expect_err("busy");
        assert!(matches!(err, ClientError::Canvas(CanvasError::TargetBusy(_))));
        assert_eq!(f.store.revision(), revision);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_seed_converted_in_place_with_requested_size() {
        let f = fixture();
        let generator = GeneratorContent {
            prompt: "castle".into(),
            requested_size: Some(Size::new(1000, 500)),
            ..GeneratorContent::default()
        };
        let seed = insert(&f.store, ElementKind::Generator(generator), true);
        let outcome = f.queue.submit("castle").await.expect("submit").remove(0).outcome().await;

        assert_eq!(outcome.target_key.as_ref(), Some(&seed));
        assert_eq!(outcome.size, Size::new(1000, 504));
        assert_eq!(image_of(&f.store, &seed).status, ImageStatus::Done);
        assert_eq!(f.store.read(|s| s.scene.len()), 1);
        assert_eq!(f.backend.runs()[0].size, "1000x504");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_job_on_same_seed_waits_and_places_new_element() {
        let f = fixture();
        let seed = insert(
            &f.store,
            ElementKind::Generator(GeneratorContent {
                prompt: "tree".into(),
                ..GeneratorContent::default()
            }),
            true,
        );
        let first = f.queue.submit("oak").await.expect("submit").remove(0);
        let second = f.queue.submit("pine").await.expect("submit").remove(0);
        assert_eq!(f.queue.running(), 1);
        assert_eq!(f.queue.pending(), 1);

        let first = first.outcome().await;
        let second = second.outcome().await;
        assert_eq!(first.target_key.as_ref(), Some(&seed));
        assert!(second.is_done());
        assert_ne!(second.target_key.as_ref(), Some(&seed));
        assert_eq!(f.backend.max_active_streams(), 1);
        assert_eq!(f.store.read(|s| s.scene.len()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_run_id_marks_error() {
        let f = fixture();
        f.backend.omit_run_id(true);
        let outcome = f.queue.submit("fox").await.expect("submit").remove(0).outcome().await;
        assert_eq!(outcome.status, JobStatus::Error("backend returned no run id".into()));
        let img = image_of(&f.store, &outcome.target_key.expect("target"));
        assert_eq!(img.status, ImageStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_error_is_recorded_and_queue_continues() {
        let f = fixture();
        f.backend.fail_prompts_containing("broken");
        let bad = f.queue.submit("broken fox").await.expect("submit").remove(0);
        let good = f.queue.submit("fine fox").await.expect("submit").remove(0);
        let bad = bad.outcome().await;
        assert_eq!(bad.status, JobStatus::Error("generation failed".into()));
        assert!(good.outcome().await.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_stream_payloads_are_skipped() {
        let f = fixture();
        f.backend.prepend_events(vec![
            json!({"type": "progress", "payload": {"pct": 40}}),
            json!({"type": "imageDone", "payload": {"nope": true}}),
            json!("not even an object"),
        ]);
        let outcome = f.queue.submit("fox").await.expect("submit").remove(0).outcome().await;
        assert!(outcome.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_uploaded_before_run() {
        let f = fixture();
        let reference = insert(
            &f.store,
            ElementKind::Image(ImageContent::from_src("data:image/png;base64,AAAA")),
            false,
        );
        let token = f.store.mention(&reference).expect("mention");
        let outcome = f
            .queue
            .submit(&format!("like {token} but blue"))
            .await
            .expect("submit")
            .remove(0)
            .outcome()
            .await;
        assert!(outcome.is_done());

        let img = image_of(&f.store, &reference);
        assert_eq!(img.sync_status, Some(SyncStatus::Synced));
        let hash = img.content_hash.expect("hash");
        assert_eq!(f.backend.uploads().len(), 1);
        assert_eq!(f.backend.runs()[0].reference_content_hash.as_deref(), Some(hash.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_references_follow_mention_order_not_selection_order() {
        let f = fixture();
        let first = insert(
            &f.store,
            ElementKind::Image(ImageContent::from_src("data:image/png;base64,AAAA")),
            false,
        );
        let second = insert(
            &f.store,
            ElementKind::Image(ImageContent::from_src("data:image/png;base64,BBBB")),
            false,
        );
        assert_eq!(f.store.mention(&first).expect("mention"), "@img1");
        assert_eq!(f.store.mention(&second).expect("mention"), "@img2");
        f.store.apply(|s| {
            s.selection.set_single(first.clone());
            s.selection.append(second.clone());
            canvas_core::Effects {
                selection: true,
                ..canvas_core::Effects::none()
            }
        });

        let handle = f.queue.submit("@img2 and @img1 combined").await.expect("submit").remove(0);
        assert_eq!(handle.job().reference_keys, vec![second.clone(), first.clone()]);
        assert_eq!(handle.job().primary_reference_key.as_ref(), Some(&second));
        assert!(handle.outcome().await.is_done());

        // Both references were made durable before the run, in mention order.
        assert_eq!(f.backend.uploads().len(), 2);
        let hash_of = |key: &ElementKey| {
            let img = image_of(&f.store, key);
            assert_eq!(img.sync_status, Some(SyncStatus::Synced));
            img.content_hash.expect("hash")
        };
        let expected = vec![hash_of(&second), hash_of(&first)];
        let run = &f.backend.runs()[0];
        assert_eq!(run.reference_content_hashes, expected);
        assert_eq!(run.reference_content_hash.as_ref(), Some(&expected[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_upload_failure_fails_target() {
        let f = fixture();
        f.backend.fail_uploads(true);
        insert(
            &f.store,
            ElementKind::Image(ImageContent::from_src("data:image/png;base64,AAAA")),
            true,
        );
        let outcome = f.queue.submit("variation").await.expect("submit").remove(0).outcome().await;
        assert!(!outcome.is_done());
        let reference = f.store.read(|s| s.selection.single().cloned()).expect("selected");
        let img = image_of(&f.store, &reference);
        assert_eq!(img.sync_status, Some(SyncStatus::Failed));
        assert!(img.sync_error.is_some());
        assert!(f.backend.runs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_mode_queues_one_job_per_step() {
        let config = ClientConfig {
            direct_prompt: false,
            ..ClientConfig::default()
        };
        let f = fixture_with(MemoryBackend::default(), config, None);
        let handles = f.queue.submit("a cat; a dog;  ; a bird").await.expect("submit");
        assert_eq!(handles.len(), 3);
        for handle in handles {
            assert!(handle.outcome().await.is_done());
        }
        let mut prompts: Vec<String> = f.backend.runs().into_iter().map(|r| r.prompt).collect();
        prompts.sort();
        assert_eq!(prompts, ["a bird", "a cat", "a dog"]);
    }
}
