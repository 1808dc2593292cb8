//! One open workspace: the scene store wired to autosave and the job queue.

use std::sync::{Mutex, PoisonError};

use canvas_core::schema::{self, AssetCatalog, DecodeOutcome};
use canvas_core::{CanvasState, Effects, ElementKey, ElementKind, SceneStore};
use tokio::task::JoinHandle;

use crate::autosave::{Autosaver, SaveReport};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::queue::{GenerationQueue, JobHandle};
use crate::services::Services;
use crate::stream::{fail_element, follow_run};

/// Viewport size used until a view reports its own.
pub const DEFAULT_VIEW_SIZE: (f64, f64) = (1280.0, 800.0);

/// What loading the workspace found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Elements restored.
    pub elements: usize,
    /// Images whose asset the catalog no longer lists.
    pub missing_assets: usize,
    /// Images saved without a durable source.
    pub local_only_images: usize,
    /// Whether the document was unreadable and the scene was rebuilt from
    /// the asset catalog.
    pub rebuilt_from_catalog: bool,
    /// Running placeholders whose result stream was picked up again.
    pub resumed: usize,
    /// Running placeholders that never got a run id and were failed.
    pub interrupted: usize,
}

/// A loaded workspace.
#[derive(Debug)]
pub struct Workspace {
    store: SceneStore,
    autosaver: Autosaver,
    queue: GenerationQueue,
    report: LoadReport,
    followers: Mutex<Vec<JoinHandle<()>>>,
}

impl Workspace {
    /// Load the saved scene and viewport, then start autosaving and resume
    /// any runs still in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the scene or the asset catalog cannot be loaded.
    /// An unreadable document is not an error: the scene is rebuilt from the
    /// catalog instead.
    pub async fn open(config: ClientConfig, services: Services) -> ClientResult<Self> {
        let (view_w, view_h) = DEFAULT_VIEW_SIZE;
        let store = SceneStore::new(CanvasState::new(view_w, view_h));
        let persistence = services.persistence.clone();
        let workspace = config.workspace.as_str();

        let (loaded, assets) = tokio::try_join!(persistence.load_scene(workspace), persistence.list_assets(workspace))
            .inspect_err(|e| tracing::error!("Loading workspace {workspace} failed: {e}"))?;

        let catalog = AssetCatalog::new(assets);
        let outcome = match loaded.document {
            Some(document) => schema::decode_value(document, &catalog),
            None => DecodeOutcome::default(),
        };
        if outcome.rebuilt_from_catalog {
            tracing::warn!(
                "Scene document for {workspace} was unreadable; rebuilt {} element(s) from the asset catalog",
                outcome.scene.len()
            );
        }
        if outcome.missing_assets > 0 {
            tracing::warn!("{} image(s) reference assets missing from the catalog", outcome.missing_assets);
        }
        let mut report = LoadReport {
            elements: outcome.scene.len(),
            missing_assets: outcome.missing_assets,
            local_only_images: outcome.local_only_images,
            rebuilt_from_catalog: outcome.rebuilt_from_catalog,
            ..LoadReport::default()
        };

        store.replace_scene(outcome.scene);
        if let Some(view) = loaded.viewport {
            store.apply(|state| Effects {
                viewport: state.viewport.hydrate(view),
                ..Effects::none()
            });
        }

        let autosaver = Autosaver::new(store.clone(), persistence, &config);
        autosaver.arm();
        let queue = GenerationQueue::new(store.clone(), services.clone(), autosaver.clone(), &config);

        let mut followers = Vec::new();
        for (key, run_id) in running_placeholders(&store) {
            match (run_id, &services.generation) {
                (Some(run_id), Some(generation)) => {
                    tracing::info!("Resuming run {run_id} for {key}");
                    let store = store.clone();
                    let generation = generation.clone();
                    let timeout = config.stream_timeout;
                    followers.push(tokio::spawn(async move {
                        follow_run(&store, generation.as_ref(), &key, &run_id, timeout).await;
                    }));
                    report.resumed += 1;
                }
                (Some(run_id), None) => {
                    tracing::warn!("Cannot resume run {run_id} for {key}: no generation backend");
                }
                (None, _) => {
                    fail_element(&store, &key, "interrupted before the run started");
                    report.interrupted += 1;
                }
            }
        }

        tracing::info!(
            "Opened workspace {workspace}: {} element(s), {} run(s) resumed",
            report.elements,
            report.resumed
        );
        Ok(Self {
            store,
            autosaver,
            queue,
            report,
            followers: Mutex::new(followers),
        })
    }

    /// The workspace's scene store.
    #[must_use]
    pub fn store(&self) -> &SceneStore {
        &self.store
    }

    /// The job queue.
    #[must_use]
    pub fn queue(&self) -> &GenerationQueue {
        &self.queue
    }

    /// What loading found.
    #[must_use]
    pub fn load_report(&self) -> LoadReport {
        self.report
    }

    /// Queue a prompt. See [`GenerationQueue::submit`].
    ///
    /// # Errors
    ///
    /// Returns the queue's rejection.
    pub async fn submit(&self, text: &str) -> ClientResult<Vec<JobHandle>> {
        self.queue.submit(text).await
    }

    /// Wait for every resumed run to settle.
    pub async fn wait_resumed(&self) {
        let followers = std::mem::take(&mut *self.followers.lock().unwrap_or_else(PoisonError::into_inner));
        for follower in followers {
            if let Err(e) = follower.await {
                tracing::warn!("Resumed run task failed: {e}");
            }
        }
    }

    /// Run pending debounced saves now.
    pub async fn flush(&self) {
        self.autosaver.flush().await;
    }

    /// Save the scene immediately.
    ///
    /// # Errors
    ///
    /// Returns the last save error once retries are exhausted.
    pub async fn save_now(&self) -> ClientResult<SaveReport> {
        self.autosaver.save_now().await
    }
}

fn running_placeholders(store: &SceneStore) -> Vec<(ElementKey, Option<String>)> {
    store.read(|state| {
        state
            .scene
            .elements()
            .iter()
            .filter(|el| el.is_running())
            .filter_map(|el| match &el.kind {
                ElementKind::Image(img) => Some((el.key.clone(), img.run_id.clone().filter(|id| !id.is_empty()))),
                _ => None,
            })
            .collect()
    })
}
