//! Versioned, size-capped persisted form of a scene.
//!
//! [`encode`] keeps only elements that can be restored from durable data and
//! writes each one's z-position; [`decode`] resolves image content against the
//! remote asset catalog. A document with an unknown schema version, or one
//! that cannot be read at all, is never an error: the scene is rebuilt from
//! the catalog instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::element::{CanvasElement, ElementKey, ElementKind, ImageContent, ImageStatus, SyncStatus};
use crate::geometry::Rect;
use crate::scene::Scene;
use crate::{CanvasError, CanvasResult};

/// Schema version written by [`encode`].
pub const SCHEMA_VERSION: u32 = 2;
/// Maximum number of elements in a persisted scene.
pub const MAX_ELEMENTS: usize = 200;
/// Cell size of the catalog rebuild grid, in world units.
pub const REBUILD_CELL: f64 = 320.0;
/// Gap between cells of the catalog rebuild grid.
pub const REBUILD_GAP: f64 = 24.0;

const MISSING_ASSET_MESSAGE: &str = "asset missing from catalog";

/// An asset as known to the remote asset store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// Asset id.
    pub id: String,
    /// Content hash of the bytes.
    pub content_hash: String,
    /// Where the bytes can be fetched.
    pub url: String,
    /// Pixel width, when known.
    #[serde(default)]
    pub width: Option<u32>,
    /// Pixel height, when known.
    #[serde(default)]
    pub height: Option<u32>,
}

/// The remote asset catalog, in the order the store lists it.
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    assets: Vec<AssetRecord>,
    index: HashMap<String, usize>,
}

impl AssetCatalog {
    /// Build a catalog. Later duplicates of an id are ignored.
    #[must_use]
    pub fn new(assets: Vec<AssetRecord>) -> Self {
        let mut index = HashMap::new();
        let mut kept = Vec::with_capacity(assets.len());
        for asset in assets {
            if !index.contains_key(&asset.id) {
                index.insert(asset.id.clone(), kept.len());
                kept.push(asset);
            }
        }
        Self { assets: kept, index }
    }

    /// Look up an asset by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AssetRecord> {
        self.index.get(id).map(|&i| &self.assets[i])
    }

    /// All assets in listing order.
    #[must_use]
    pub fn assets(&self) -> &[AssetRecord] {
        &self.assets
    }

    /// Number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Persisted element: common fields, z-position and kind payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDocument {
    /// Element key.
    pub key: String,
    /// Z-position at encode time.
    pub z: usize,
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
    /// `@imgN` reference id.
    #[serde(default)]
    pub ref_id: Option<u32>,
    /// Content payload.
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl ElementDocument {
    fn from_element(element: &CanvasElement, z: usize) -> Self {
        let kind = match &element.kind {
            ElementKind::Image(img) => ElementKind::Image(ImageContent {
                // Local bitmaps are never embedded; the asset id restores them.
                src: if img.has_local_src() { String::new() } else { img.src.clone() },
                sync_status: None,
                sync_error: None,
                ..img.clone()
            }),
            other => other.clone(),
        };
        Self {
            key: element.key.to_string(),
            z,
            x: element.x,
            y: element.y,
            w: element.w,
            h: element.h,
            ref_id: element.ref_id,
            kind,
        }
    }
}

/// Counters surfaced to the user after a save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    /// Images left out because they only exist locally.
    pub skipped_local_only_count: usize,
    /// Oldest elements left out to respect [`MAX_ELEMENTS`].
    #[serde(default)]
    pub evicted_count: usize,
}

/// Canonical persisted scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDocument {
    /// Schema version.
    pub schema_version: u32,
    /// Elements with their z-positions.
    pub elements: Vec<ElementDocument>,
    /// Save counters.
    #[serde(default)]
    pub meta: DocumentMeta,
    /// Next `@imgN` id to hand out.
    #[serde(default)]
    pub next_ref_id: u32,
}

impl SceneDocument {
    /// Serialize to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> CanvasResult<serde_json::Value> {
        serde_json::to_value(self).map_err(CanvasError::Serialization)
    }
}

/// Result of [`decode`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutcome {
    /// The restored scene.
    pub scene: Scene,
    /// Images that had an asset id the catalog did not know.
    pub missing_assets: usize,
    /// Images with neither an asset id nor a persistable source.
    pub local_only_images: usize,
    /// Whether the scene was rebuilt from the catalog.
    pub rebuilt_from_catalog: bool,
}

/// Whether an element can be restored from what gets persisted.
#[must_use]
pub fn is_durable(element: &CanvasElement) -> bool {
    match &element.kind {
        ElementKind::Image(img) => {
            img.asset_id.is_some()
                || (!img.src.is_empty() && !img.has_local_src())
                || matches!(img.status, ImageStatus::Running | ImageStatus::Error)
        }
        ElementKind::Generator(_) | ElementKind::Shape { .. } | ElementKind::Text { .. } => true,
    }
}

/// Encode a scene. At most [`MAX_ELEMENTS`] elements are written, keeping the
/// topmost ones.
#[must_use]
pub fn encode(scene: &Scene) -> SceneDocument {
    let (durable, skipped): (Vec<&CanvasElement>, Vec<&CanvasElement>) =
        scene.elements().iter().partition(|el| is_durable(el));
    let evicted = durable.len().saturating_sub(MAX_ELEMENTS);
    if evicted > 0 {
        tracing::warn!("Scene holds {} durable elements; evicting {evicted} oldest", durable.len());
    }
    let elements = durable[evicted..]
        .iter()
        .enumerate()
        .map(|(z, el)| ElementDocument::from_element(el, z))
        .collect();
    SceneDocument {
        schema_version: SCHEMA_VERSION,
        elements,
        meta: DocumentMeta {
            skipped_local_only_count: skipped.len(),
            evicted_count: evicted,
        },
        next_ref_id: scene.next_ref_id(),
    }
}

/// Decode a document against the asset catalog.
///
/// An unknown schema version falls back to [`rebuild_from_catalog`].
#[must_use]
pub fn decode(doc: SceneDocument, catalog: &AssetCatalog) -> DecodeOutcome {
    if doc.schema_version != SCHEMA_VERSION {
        tracing::warn!(
            "Unreadable schema version {} (expected {SCHEMA_VERSION}); rebuilding from catalog",
            doc.schema_version
        );
        return rebuild_from_catalog(catalog);
    }

    let mut docs = doc.elements;
    docs.sort_by_key(|d| d.z);

    let mut outcome = DecodeOutcome::default();
    let mut elements = Vec::with_capacity(docs.len());
    for d in docs {
        let key = ElementKey::from_string(d.key);
        let rect = Rect::new(d.x, d.y, d.w, d.h);
        let kind = match d.kind {
            ElementKind::Image(img) => match restore_image(img, catalog, &mut outcome) {
                Some(img) => ElementKind::Image(img),
                None => continue,
            },
            other => other,
        };
        let mut element = CanvasElement::with_key(key, kind, rect);
        element.ref_id = d.ref_id;
        elements.push(element);
    }
    outcome.scene = Scene::from_elements(elements, doc.next_ref_id);
    outcome
}

/// Decode from raw JSON. Anything unreadable falls back to
/// [`rebuild_from_catalog`].
#[must_use]
pub fn decode_value(value: serde_json::Value, catalog: &AssetCatalog) -> DecodeOutcome {
    let version = value.get("schemaVersion").and_then(serde_json::Value::as_u64);
    if version != Some(u64::from(SCHEMA_VERSION)) {
        tracing::warn!("Unreadable schema version {version:?}; rebuilding from catalog");
        return rebuild_from_catalog(catalog);
    }
    match serde_json::from_value::<SceneDocument>(value) {
        Ok(doc) => decode(doc, catalog),
        Err(e) => {
            tracing::warn!("Malformed scene document ({e}); rebuilding from catalog");
            rebuild_from_catalog(catalog)
        }
    }
}

fn restore_image(mut img: ImageContent, catalog: &AssetCatalog, outcome: &mut DecodeOutcome) -> Option<ImageContent> {
    img.sync_status = None;
    img.sync_error = None;
    if let Some(asset_id) = img.asset_id.clone() {
        if let Some(asset) = catalog.get(&asset_id) {
            img.src = asset.url.clone();
            img.content_hash = Some(asset.content_hash.clone());
            img.natural_w = asset.width.map(f64::from).or(img.natural_w);
            img.natural_h = asset.height.map(f64::from).or(img.natural_h);
            img.sync_status = Some(SyncStatus::Synced);
            img.status = ImageStatus::Done;
            img.error_message = None;
            return Some(img);
        }
        outcome.missing_assets += 1;
        if img.src.is_empty() || img.has_local_src() {
            img.status = ImageStatus::Error;
            img.error_message = Some(MISSING_ASSET_MESSAGE.to_string());
        }
        return Some(img);
    }

    if !img.src.is_empty() && !img.has_local_src() {
        return Some(img);
    }
    if matches!(img.status, ImageStatus::Running | ImageStatus::Error) {
        return Some(img);
    }
    outcome.local_only_images += 1;
    // An embedded local bitmap is still renderable; keep it.
    (!img.src.is_empty()).then_some(img)
}

/// Lay every catalog asset out on a grid, aspect ratio preserved.
#[must_use]
pub fn rebuild_from_catalog(catalog: &AssetCatalog) -> DecodeOutcome {
    let n = catalog.len();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let cols = ((n as f64).sqrt().ceil() as usize).max(1);
    let pitch = REBUILD_CELL + REBUILD_GAP;

    let elements = catalog
        .assets()
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            let nw = asset.width.map_or(REBUILD_CELL, f64::from);
            let nh = asset.height.map_or(REBUILD_CELL, f64::from);
            let scale = (REBUILD_CELL / nw).min(REBUILD_CELL / nh);
            #[allow(clippy::cast_precision_loss)]
            let (col, row) = ((i % cols) as f64, (i / cols) as f64);
            let rect = Rect::new(col * pitch, row * pitch, nw * scale, nh * scale);
            let img = ImageContent {
                natural_w: asset.width.map(f64::from),
                natural_h: asset.height.map(f64::from),
                asset_id: Some(asset.id.clone()),
                content_hash: Some(asset.content_hash.clone()),
                sync_status: Some(SyncStatus::Synced),
                ..ImageContent::from_src(asset.url.clone())
            };
            CanvasElement::with_key(
                ElementKey::from_string(format!("asset-{}", asset.id)),
                ElementKind::Image(img),
                rect,
            )
        })
        .collect();

    DecodeOutcome {
        scene: Scene::from_elements(elements, 1),
        missing_assets: 0,
        local_only_images: 0,
        rebuilt_from_catalog: true,
    }
}
