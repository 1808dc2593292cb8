//! Shared canvas storage for multi-component access.
//!
//! Provides a thread-safe [`SceneStore`] that pointer handlers, stream
//! callbacks and save reconciliation all mutate. Every mutation is a closure
//! run under the write lock; element updates take the element by value and
//! return its replacement.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::element::{CanvasElement, ElementKey, ElementKind};
use crate::event::InputEvent;
use crate::geometry::Point;
use crate::interaction::Effects;
use crate::mention::mention_token;
use crate::scene::Scene;
use crate::state::CanvasState;
use crate::CanvasResult;

/// What part of the state a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Element list.
    Scene,
    /// Zoom or camera.
    Viewport,
    /// Selection.
    Selection,
}

type ChangeCallback = Arc<dyn Fn(ChangeKind, u64) + Send + Sync>;

/// Thread-safe handle to one canvas.
///
/// # Example
///
/// ```
/// use canvas_core::store::SceneStore;
/// use canvas_core::{CanvasElement, ElementKind, ImageContent, Rect};
///
/// let store = SceneStore::default();
/// let key = store
///     .update_scene(|scene| {
///         scene.insert(CanvasElement::new(
///             ElementKind::Image(ImageContent::from_src("https://cdn.example.com/a.png")),
///             Rect::new(0.0, 0.0, 64.0, 64.0),
///         ))
///     })
///     .unwrap();
/// assert!(store.read(|state| state.scene.contains(&key)));
/// assert_eq!(store.revision(), 1);
/// ```
#[derive(Clone, Default)]
pub struct SceneStore {
    state: Arc<RwLock<CanvasState>>,
    revision: Arc<AtomicU64>,
    on_change: Arc<RwLock<Option<ChangeCallback>>>,
}

impl fmt::Debug for SceneStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneStore")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

impl SceneStore {
    /// Wrap an existing state.
    #[must_use]
    pub fn new(state: CanvasState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            revision: Arc::new(AtomicU64::new(0)),
            on_change: Arc::new(RwLock::new(None)),
        }
    }

    /// Register the change listener, replacing any previous one.
    ///
    /// The listener runs after the lock is released and receives the
    /// revision current at notification time.
    pub fn set_on_change<F>(&self, f: F)
    where
        F: Fn(ChangeKind, u64) + Send + Sync + 'static,
    {
        let mut slot = self.on_change.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(f));
    }

    /// Number of changes applied so far.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Read the state.
    pub fn read<R>(&self, f: impl FnOnce(&CanvasState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Copy of the current scene.
    #[must_use]
    pub fn snapshot(&self) -> Scene {
        self.read(|state| state.scene.clone())
    }

    /// Mutate the state; the closure reports what it changed.
    pub fn apply(&self, f: impl FnOnce(&mut CanvasState) -> Effects) -> Effects {
        let effects = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        };
        self.notify(effects);
        effects
    }

    /// Mutate the scene. Always counts as a scene change; the selection is
    /// pruned afterwards.
    pub fn update_scene<R>(&self, f: impl FnOnce(&mut Scene) -> R) -> R {
        let (out, pruned) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let out = f(&mut state.scene);
            (out, state.prune_selection())
        };
        self.notify(Effects {
            scene: true,
            selection: pruned,
            ..Effects::none()
        });
        out
    }

    /// Swap one element for the closure's replacement.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not in the scene; nothing is
    /// notified in that case.
    pub fn update_element<F>(&self, key: &ElementKey, f: F) -> CanvasResult<()>
    where
        F: FnOnce(CanvasElement) -> CanvasElement,
    {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.scene.replace_with(key, f)?;
        }
        self.notify(Effects {
            scene: true,
            ..Effects::none()
        });
        Ok(())
    }

    /// Insert an element at the free slot nearest `anchor` (viewport center
    /// when `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the key is already in the scene.
    pub fn insert_placed(
        &self,
        key: ElementKey,
        kind: ElementKind,
        w: f64,
        h: f64,
        anchor: Option<Point>,
    ) -> CanvasResult<ElementKey> {
        let placed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.insert_placed(key, kind, w, h, anchor)?
        };
        self.notify(Effects {
            scene: true,
            ..Effects::none()
        });
        Ok(placed)
    }

    /// The `@imgN` token for `key`, assigning its reference id on first
    /// mention. A fresh id counts as a scene change so it gets saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not in the scene.
    pub fn mention(&self, key: &ElementKey) -> CanvasResult<String> {
        let (id, assigned) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let before = state.scene.next_ref_id();
            let id = state.mention(key)?;
            (id, state.scene.next_ref_id() != before)
        };
        if assigned {
            self.notify(Effects {
                scene: true,
                ..Effects::none()
            });
        }
        Ok(mention_token(id))
    }

    /// Route an input event through the state.
    pub fn process_event(&self, event: &InputEvent) -> Effects {
        self.apply(|state| state.process_event(event))
    }

    /// Replace the scene wholesale (after a load).
    pub fn replace_scene(&self, scene: Scene) {
        self.update_scene(|current| *current = scene);
    }

    fn notify(&self, effects: Effects) {
        if !effects.any() {
            return;
        }
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let callback = self
            .on_change
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(callback) = callback else {
            return;
        };
        for (changed, kind) in [
            (effects.scene, ChangeKind::Scene),
            (effects.viewport, ChangeKind::Viewport),
            (effects.selection, ChangeKind::Selection),
        ] {
            if changed {
                callback(kind, revision);
            }
        }
    }
}
