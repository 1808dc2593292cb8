//! Shared helpers for client integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use canvas_client::{ClientConfig, MemoryBackend, Services, Workspace};
use canvas_core::{CanvasElement, ElementKey, ImageContent};

/// Config with short timers so paused-clock tests stay small.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        workspace: "it".into(),
        autosave_quiet: Duration::from_millis(100),
        autosave_min_spacing: Duration::from_millis(200),
        viewport_quiet: Duration::from_millis(100),
        ..ClientConfig::default()
    }
}

/// Open a workspace backed by `backend`.
pub async fn open(backend: &MemoryBackend, config: ClientConfig) -> Workspace {
    Workspace::open(config, Services::from_backend(Arc::new(backend.clone())))
        .await
        .expect("open workspace")
}

/// The image payload of `key`.
pub fn image(workspace: &Workspace, key: &ElementKey) -> ImageContent {
    workspace
        .store()
        .read(|s| s.scene.get(key).and_then(CanvasElement::image).cloned())
        .expect("image element")
}
