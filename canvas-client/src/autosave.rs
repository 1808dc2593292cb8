//! Debounced scene and viewport persistence.
//!
//! Once armed (after the initial load), every scene change schedules a
//! debounced save and every viewport change a debounced viewport save.
//! [`Autosaver::save_now`] bypasses the debounce. Each save request carries a
//! fresh idempotency key that its retries reuse.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use canvas_core::schema;
use canvas_core::{ChangeKind, SceneStore};
use uuid::Uuid;

use crate::config::{ClientConfig, RetryConfig};
use crate::debounce::{DebounceTiming, Debouncer};
use crate::error::ClientResult;
use crate::metrics;
use crate::services::ScenePersistence;

/// Outcome of a scene save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    /// Store revision that was saved.
    pub revision: u64,
    /// Elements written.
    pub saved: usize,
    /// Images left out because they only exist locally.
    pub skipped_local_only: usize,
    /// Oldest elements left out by the element cap.
    pub evicted: usize,
}

struct Inner {
    store: SceneStore,
    persistence: Arc<dyn ScenePersistence>,
    workspace: String,
    retry: RetryConfig,
    armed: AtomicBool,
    save_lock: tokio::sync::Mutex<()>,
    scene_task: Debouncer,
    viewport_task: Debouncer,
}

/// Autosave driver for one workspace. Clones share the same tasks.
#[derive(Clone)]
pub struct Autosaver {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Autosaver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autosaver")
            .field("workspace", &self.inner.workspace)
            .field("armed", &self.is_armed())
            .finish_non_exhaustive()
    }
}

impl Autosaver {
    /// Create the autosaver and register it as the store's change listener.
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(store: SceneStore, persistence: Arc<dyn ScenePersistence>, config: &ClientConfig) -> Self {
        let scene_timing = DebounceTiming {
            quiet: config.autosave_quiet,
            min_spacing: config.autosave_min_spacing,
        };
        let viewport_timing = DebounceTiming {
            quiet: config.viewport_quiet,
            min_spacing: config.viewport_quiet,
        };

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let scene_weak = weak.clone();
            let scene_task = Debouncer::spawn("autosave", scene_timing, move || {
                let weak = scene_weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        // Failures are logged and counted inside.
                        let _ = inner.save_scene().await;
                    }
                }
            });
            let view_weak = weak.clone();
            let viewport_task = Debouncer::spawn("viewport-save", viewport_timing, move || {
                let weak = view_weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let _ = inner.save_viewport().await;
                    }
                }
            });
            Inner {
                store: store.clone(),
                persistence,
                workspace: config.workspace.clone(),
                retry: config.retry.clone(),
                armed: AtomicBool::new(false),
                save_lock: tokio::sync::Mutex::new(()),
                scene_task,
                viewport_task,
            }
        });

        let listener = Arc::downgrade(&inner);
        store.set_on_change(move |kind, _revision| {
            let Some(inner) = listener.upgrade() else {
                return;
            };
            if !inner.armed.load(Ordering::SeqCst) {
                return;
            }
            match kind {
                ChangeKind::Scene => inner.scene_task.trigger(),
                ChangeKind::Viewport => inner.viewport_task.trigger(),
                ChangeKind::Selection => {}
            }
        });

        Self { inner }
    }

    /// Start reacting to changes. Call once the initial load is applied.
    pub fn arm(&self) {
        self.inner.armed.store(true, Ordering::SeqCst);
        tracing::debug!("Autosave armed for {}", self.inner.workspace);
    }

    /// Whether changes trigger saves.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    /// Save the scene immediately.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted.
    pub async fn save_now(&self) -> ClientResult<SaveReport> {
        self.inner.save_scene().await
    }

    /// Run any pending debounced saves and wait for them.
    pub async fn flush(&self) {
        self.inner.scene_task.flush().await;
        self.inner.viewport_task.flush().await;
    }
}

impl Inner {
    async fn save_scene(&self) -> ClientResult<SaveReport> {
        let _guard = self.save_lock.lock().await;
        let revision = self.store.revision();
        let doc = schema::encode(&self.store.snapshot());
        let report = SaveReport {
            revision,
            saved: doc.elements.len(),
            skipped_local_only: doc.meta.skipped_local_only_count,
            evicted: doc.meta.evicted_count,
        };
        let payload = doc.to_value()?;
        let key = Uuid::new_v4().to_string();

        let result = with_retry(&self.retry, "scene save", || {
            self.persistence
                .save_scene(&self.workspace, doc.schema_version, &payload, &key)
        })
        .await;
        metrics::record_save("scene", result.is_ok());

        match result {
            Ok(()) => {
                if report.skipped_local_only > 0 {
                    tracing::info!("{} images not yet saved", report.skipped_local_only);
                }
                tracing::info!("Saved {} element(s) at revision {revision}", report.saved);
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("Scene save failed: {e}");
                Err(e)
            }
        }
    }

    async fn save_viewport(&self) -> ClientResult<()> {
        let view = self.store.read(|s| s.viewport.view_state());
        let key = Uuid::new_v4().to_string();
        let result = with_retry(&self.retry, "viewport save", || {
            self.persistence.save_viewport(&self.workspace, view, &key)
        })
        .await;
        metrics::record_save("viewport", result.is_ok());
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("Viewport save failed: {e}");
                Err(e)
            }
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out.
pub(crate) async fn with_retry<T, F, Fut>(retry: &RetryConfig, what: &str, mut op: F) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = retry.delay_for_attempt(attempt);
                tracing::warn!(
                    "{what} failed (attempt {}/{attempts}), retrying in {}ms: {e}",
                    attempt + 1,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
