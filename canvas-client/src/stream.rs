//! Run result streams: server-sent-event framing, event parsing, and
//! applying results to the scene by element key.

use std::time::Duration;

use canvas_core::{AssetRecord, CanvasElement, ElementKey, ElementKind, ImageStatus, SceneStore, SyncStatus};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::metrics;
use crate::services::GenerationService;

/// A recognised run event.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The image is ready.
    ImageDone {
        /// The stored result.
        asset: AssetRecord,
        /// Element the server wrote the result for, when it says.
        target_key: Option<String>,
    },
    /// Generation failed.
    ImageError {
        /// Reason.
        message: String,
        /// Element the server failed for, when it says.
        target_key: Option<String>,
    },
}

impl RunEvent {
    fn target_key(&self) -> Option<&str> {
        match self {
            Self::ImageDone { target_key, .. } | Self::ImageError { target_key, .. } => target_key.as_deref(),
        }
    }

    /// Parse a raw payload. Unknown types and malformed payloads yield `None`.
    #[must_use]
    pub fn parse(value: &Value) -> Option<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct DonePayload {
            asset: AssetRecord,
            #[serde(default)]
            target_key: Option<String>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ErrorPayload {
            #[serde(default)]
            message: Option<String>,
            #[serde(default)]
            target_key: Option<String>,
        }

        let kind = value.get("type")?.as_str()?;
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        match kind {
            "imageDone" => {
                let p: DonePayload = serde_json::from_value(payload).ok()?;
                Some(Self::ImageDone {
                    asset: p.asset,
                    target_key: p.target_key,
                })
            }
            "imageError" => {
                let p: ErrorPayload = serde_json::from_value(payload).ok()?;
                Some(Self::ImageError {
                    message: p.message.unwrap_or_else(|| "generation failed".to_string()),
                    target_key: p.target_key,
                })
            }
            _ => None,
        }
    }
}

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Placeholder now shows the result.
    Done,
    /// Placeholder now shows an error.
    Error,
    /// Nothing changed: the element is gone, not running, or not the target.
    Ignored,
}

/// Apply a run event to the element `key`.
///
/// Only a running image whose key matches is touched, so late or stray
/// events cannot overwrite a finished element.
pub fn apply_run_event(store: &SceneStore, key: &ElementKey, event: &RunEvent) -> Applied {
    if event.target_key().is_some_and(|t| t != key.as_str()) {
        tracing::debug!("Ignoring run event for {:?}; following {key}", event.target_key());
        return Applied::Ignored;
    }
    let running = store.read(|s| s.scene.get(key).is_some_and(CanvasElement::is_running));
    if !running {
        tracing::debug!("Ignoring run event for {key}: not a running image");
        return Applied::Ignored;
    }

    let mut applied = Applied::Ignored;
    let result = store.update_element(key, |mut el| {
        let ElementKind::Image(img) = &mut el.kind else {
            return el;
        };
        if img.status != ImageStatus::Running {
            return el;
        }
        match event {
            RunEvent::ImageDone { asset, .. } => {
                img.src.clone_from(&asset.url);
                img.status = ImageStatus::Done;
                img.asset_id = Some(asset.id.clone());
                img.content_hash = Some(asset.content_hash.clone());
                img.natural_w = asset.width.map(f64::from);
                img.natural_h = asset.height.map(f64::from);
                img.sync_status = Some(SyncStatus::Synced);
                img.sync_error = None;
                img.error_message = None;
                img.run_id = None;
                applied = Applied::Done;
            }
            RunEvent::ImageError { message, .. } => {
                img.status = ImageStatus::Error;
                img.error_message = Some(message.clone());
                img.run_id = None;
                applied = Applied::Error;
            }
        }
        el
    });
    if result.is_err() {
        return Applied::Ignored;
    }
    match applied {
        Applied::Done => tracing::info!("Run result delivered to {key}"),
        Applied::Error => tracing::warn!("Run failed for {key}"),
        Applied::Ignored => {}
    }
    applied
}

/// Put a running element into the error state.
pub fn fail_element(store: &SceneStore, key: &ElementKey, message: &str) -> Applied {
    apply_run_event(
        store,
        key,
        &RunEvent::ImageError {
            message: message.to_string(),
            target_key: None,
        },
    )
}

/// Follow a run's stream until a result lands on `key`.
///
/// Holds nothing but the store and the key, so it works the same for a job
/// just submitted and for a placeholder found running after a reload. A
/// stream that fails, ends, or times out without a result leaves the element
/// in the error state.
pub async fn follow_run(
    store: &SceneStore,
    generation: &dyn GenerationService,
    key: &ElementKey,
    run_id: &str,
    timeout: Duration,
) -> Applied {
    let consume = async {
        let mut events = match generation.stream_run(run_id).await {
            Ok(events) => events,
            Err(e) => return fail_element(store, key, &format!("result stream unavailable: {e}")),
        };
        while let Some(item) = events.next().await {
            let value = match item {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Run {run_id} stream failed: {e}");
                    return fail_element(store, key, &format!("result stream failed: {e}"));
                }
            };
            let Some(event) = RunEvent::parse(&value) else {
                tracing::debug!("Dropping unrecognised payload on run {run_id}");
                metrics::record_dropped_payload("unknown");
                continue;
            };
            match apply_run_event(store, key, &event) {
                Applied::Ignored => {
                    metrics::record_dropped_payload("stale");
                    let still_running = store.read(|s| s.scene.get(key).is_some_and(CanvasElement::is_running));
                    if !still_running {
                        return Applied::Ignored;
                    }
                }
                applied => return applied,
            }
        }
        fail_element(store, key, "result stream ended")
    };

    if let Ok(applied) = tokio::time::timeout(timeout, consume).await {
        applied
    } else {
        tracing::warn!("Run {run_id} timed out after {}s", timeout.as_secs());
        fail_element(store, key, "timed out waiting for result")
    }
}

/// Incremental server-sent-events decoder.
///
/// Feed raw chunks as they arrive; complete `data:` payloads that parse as
/// JSON come out. Chunks may split lines, events or UTF-8 sequences.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the payloads it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
        let mut out = Vec::new();
        while let Some(idx) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buf.drain(..idx + 2).collect();
            if let Some(value) = Self::decode_event(&raw[..idx]) {
                out.push(value);
            }
        }
        out
    }

    /// Flush a trailing event with no blank line after it.
    pub fn finish(&mut self) -> Option<Value> {
        let raw = std::mem::take(&mut self.buf);
        Self::decode_event(&raw)
    }

    fn decode_event(raw: &[u8]) -> Option<Value> {
        let text = String::from_utf8_lossy(raw);
        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();
        if data.is_empty() {
            return None;
        }
        let data = data.join("\n");
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }
        match serde_json::from_str(data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("Dropping non-JSON stream payload: {e}");
                metrics::record_dropped_payload("malformed");
                None
            }
        }
    }
}
