//! Canvas elements - the building blocks of scenes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Point, Rect};
use crate::{CanvasError, CanvasResult};

/// Smallest width or height an element may have.
pub const MIN_ELEMENT_SIZE: f64 = 1.0;

/// Stable identifier of an element, unique within a scene for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementKey(String);

impl ElementKey {
    /// Create a new unique key.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing key string (for keys coming from a persisted scene).
    #[must_use]
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ElementKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ElementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pixel size requested from the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

impl Size {
    /// Smallest size per axis accepted by the backend.
    pub const MIN_AXIS: u32 = 64;
    /// Largest size per axis accepted by the backend.
    pub const MAX_AXIS: u32 = 4096;
    /// Backend sizes are multiples of this.
    pub const GRANULARITY: u32 = 8;

    /// Create a new size.
    #[must_use]
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    /// Parse `"WxH"` (also accepts `X`, `×` and `*` as separator).
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidSize`] if either side is missing, not a
    /// number, or zero.
    pub fn parse(s: &str) -> CanvasResult<Self> {
        let trimmed = s.trim();
        let (w, h) = trimmed
            .split_once(['x', 'X', '×', '*'])
            .ok_or_else(|| CanvasError::InvalidSize(trimmed.to_string()))?;
        let w: u32 = w
            .trim()
            .parse()
            .map_err(|_| CanvasError::InvalidSize(trimmed.to_string()))?;
        let h: u32 = h
            .trim()
            .parse()
            .map_err(|_| CanvasError::InvalidSize(trimmed.to_string()))?;
        if w == 0 || h == 0 {
            return Err(CanvasError::InvalidSize(trimmed.to_string()));
        }
        Ok(Self { w, h })
    }

    /// Clamp to the backend's accepted range and round to its granularity.
    ///
    /// Returns the adjusted size plus whether the size and the aspect ratio
    /// changed.
    #[must_use]
    pub fn normalized(self) -> (Self, bool, bool) {
        let fit = |v: u32| {
            let clamped = v.clamp(Self::MIN_AXIS, Self::MAX_AXIS);
            let rounded = (clamped + Self::GRANULARITY / 2) / Self::GRANULARITY * Self::GRANULARITY;
            rounded.clamp(Self::MIN_AXIS, Self::MAX_AXIS)
        };
        let out = Self::new(fit(self.w), fit(self.h));
        let size_adjusted = out != self;
        let ratio_adjusted = u64::from(out.w) * u64::from(self.h) != u64::from(self.w) * u64::from(out.h);
        (out, size_adjusted, ratio_adjusted)
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(1024, 1024)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// Render state of an image element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    /// Waiting for a generation result.
    Running,
    /// Has a final bitmap.
    Done,
    /// Generation or loading failed.
    Error,
}

/// Durability of an image's bitmap in the asset store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Not yet uploaded.
    Pending,
    /// Uploaded and addressable by asset id.
    Synced,
    /// Upload failed; retriable.
    Failed,
}

/// Supported vector shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    /// Rectangle.
    Rect,
    /// Circle (ellipse inscribed in the box).
    Circle,
    /// Isosceles triangle.
    Triangle,
    /// Five-pointed star.
    Star,
}

/// Payload of an image element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    /// Resolved bitmap location: data URI, remote URL, or empty while pending.
    pub src: String,
    /// Render state.
    pub status: ImageStatus,
    /// Intrinsic pixel width, when known.
    pub natural_w: Option<f64>,
    /// Intrinsic pixel height, when known.
    pub natural_h: Option<f64>,
    /// Asset id once persisted.
    pub asset_id: Option<String>,
    /// Content hash once persisted.
    pub content_hash: Option<String>,
    /// Upload state, if this image has ever been considered for upload.
    pub sync_status: Option<SyncStatus>,
    /// Last upload error.
    pub sync_error: Option<String>,
    /// Last generation error.
    pub error_message: Option<String>,
    /// Prompt that produced (or is producing) this image.
    pub prompt: Option<String>,
    /// Server run feeding this placeholder.
    pub run_id: Option<String>,
}

impl ImageContent {
    /// A finished image from a source location.
    #[must_use]
    pub fn from_src(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            status: ImageStatus::Done,
            natural_w: None,
            natural_h: None,
            asset_id: None,
            content_hash: None,
            sync_status: None,
            sync_error: None,
            error_message: None,
            prompt: None,
            run_id: None,
        }
    }

    /// An empty placeholder awaiting a generation result.
    #[must_use]
    pub fn placeholder(prompt: impl Into<String>) -> Self {
        Self {
            status: ImageStatus::Running,
            prompt: Some(prompt.into()),
            ..Self::from_src("")
        }
    }

    /// Whether the bitmap is durably stored in the asset store.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.content_hash.is_some() && self.sync_status == Some(SyncStatus::Synced)
    }

    /// Whether the source only exists in this client (data or blob URI).
    #[must_use]
    pub fn has_local_src(&self) -> bool {
        is_local_src(&self.src)
    }

    /// Intrinsic aspect ratio (w / h), when known.
    #[must_use]
    pub fn natural_ratio(&self) -> Option<f64> {
        match (self.natural_w, self.natural_h) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some(w / h),
            _ => None,
        }
    }
}

/// Whether a source string is client-local (data or blob URI).
#[must_use]
pub fn is_local_src(src: &str) -> bool {
    let lower = src.trim_start().to_ascii_lowercase();
    lower.starts_with("data:") || lower.starts_with("blob:")
}

/// Payload of a generator element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorContent {
    /// Prompt typed into the generator.
    pub prompt: String,
    /// Size the user asked for.
    pub requested_size: Option<Size>,
    /// Size actually sent to the backend.
    pub effective_size: Option<Size>,
    /// Whether the requested size had to be adjusted.
    pub size_adjusted: bool,
    /// Whether the adjustment changed the aspect ratio.
    pub ratio_adjusted: bool,
}

/// The type of content an element contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementKind {
    /// A bitmap image (possibly still generating).
    Image(ImageContent),
    /// A reusable generation target.
    Generator(GeneratorContent),
    /// A vector shape.
    #[serde(rename_all = "camelCase")]
    Shape {
        /// Shape type.
        shape_type: ShapeType,
        /// Fill color.
        fill: String,
        /// Stroke color.
        stroke: String,
    },
    /// A text block.
    #[serde(rename_all = "camelCase")]
    Text {
        /// Text content.
        text: String,
        /// Font size in world units.
        font_size: f64,
        /// Text color.
        text_color: String,
        /// Background fill.
        fill: String,
        /// Border stroke.
        stroke: String,
    },
}

impl ElementKind {
    /// Short name of the kind, as written on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Generator(_) => "generator",
            Self::Shape { .. } => "shape",
            Self::Text { .. } => "text",
        }
    }
}

/// A canvas element: identity, world-space box and content.
///
/// Z-order is not stored here; it is the element's position in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasElement {
    /// Stable key.
    pub key: ElementKey,
    /// Left edge in world units.
    pub x: f64,
    /// Top edge in world units.
    pub y: f64,
    /// Width in world units.
    pub w: f64,
    /// Height in world units.
    pub h: f64,
    /// Stable `@imgN` reference id, assigned on first reference.
    #[serde(default)]
    pub ref_id: Option<u32>,
    /// Content payload.
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl CanvasElement {
    /// Create a new element with a fresh key.
    #[must_use]
    pub fn new(kind: ElementKind, rect: Rect) -> Self {
        Self::with_key(ElementKey::new(), kind, rect)
    }

    /// Create an element with a specific key.
    #[must_use]
    pub fn with_key(key: ElementKey, kind: ElementKind, rect: Rect) -> Self {
        Self {
            key,
            x: rect.x,
            y: rect.y,
            w: rect.w.max(MIN_ELEMENT_SIZE),
            h: rect.h.max(MIN_ELEMENT_SIZE),
            ref_id: None,
            kind,
        }
    }

    /// World-space bounding box.
    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.w, self.h)
    }

    /// Return a copy moved to a new top-left corner.
    #[must_use]
    pub fn moved_to(mut self, pos: Point) -> Self {
        self.x = pos.x;
        self.y = pos.y;
        self
    }

    /// Return a copy with a new box, keeping sizes at least [`MIN_ELEMENT_SIZE`].
    #[must_use]
    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.x = rect.x;
        self.y = rect.y;
        self.w = rect.w.max(MIN_ELEMENT_SIZE);
        self.h = rect.h.max(MIN_ELEMENT_SIZE);
        self
    }

    /// Check if a world point is within this element.
    #[must_use]
    pub fn contains_point(&self, p: Point) -> bool {
        self.rect().contains(p)
    }

    /// Image payload, if this is an image.
    #[must_use]
    pub fn image(&self) -> Option<&ImageContent> {
        match &self.kind {
            ElementKind::Image(img) => Some(img),
            _ => None,
        }
    }

    /// Generator payload, if this is a generator.
    #[must_use]
    pub fn generator(&self) -> Option<&GeneratorContent> {
        match &self.kind {
            ElementKind::Generator(gen) => Some(gen),
            _ => None,
        }
    }

    /// Whether aspect lock applies to this element by default.
    #[must_use]
    pub fn locks_aspect(&self) -> bool {
        matches!(self.kind, ElementKind::Image(_) | ElementKind::Generator(_))
    }

    /// Intrinsic ratio when known, else the current box ratio.
    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        self.image()
            .and_then(ImageContent::natural_ratio)
            .unwrap_or(self.w / self.h)
    }

    /// Whether a generation is currently writing into this element.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.image().is_some_and(|img| img.status == ImageStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_parse() {
        assert_eq!(Size::parse("1024x768").expect("parse"), Size::new(1024, 768));
        assert_eq!(Size::parse(" 512 X 512 ").expect("parse"), Size::new(512, 512));
        assert!(Size::parse("1024").is_err());
        assert!(Size::parse("0x10").is_err());
        assert!(Size::parse("axb").is_err());
    }

    #[test]
    fn test_size_normalized() {
        let (s, adjusted, ratio) = Size::new(1024, 768).normalized();
        assert_eq!(s, Size::new(1024, 768));
        assert!(!adjusted);
        assert!(!ratio);

        let (s, adjusted, ratio) = Size::new(10_000, 30).normalized();
        assert_eq!(s, Size::new(4096, 64));
        assert!(adjusted);
        assert!(ratio);
    }

    #[test]
    fn test_local_src_detection() {
        assert!(is_local_src("data:image/png;base64,AAAA"));
        assert!(is_local_src("blob:http://x/1"));
        assert!(!is_local_src("https://cdn.example.com/a.png"));
        assert!(!is_local_src(""));
    }

    #[test]
    fn test_element_min_size() {
        let el = CanvasElement::new(
            ElementKind::Image(ImageContent::from_src("https://x/a.png")),
            Rect::new(0.0, 0.0, 0.0, -3.0),
        );
        assert!(el.w >= MIN_ELEMENT_SIZE);
        assert!(el.h >= MIN_ELEMENT_SIZE);
    }

    #[test]
    fn test_element_serializes_kind_tag() {
        let el = CanvasElement::new(
            ElementKind::Shape {
                shape_type: ShapeType::Star,
                fill: "#fff".to_string(),
                stroke: "#000".to_string(),
            },
            Rect::new(1.0, 2.0, 3.0, 4.0),
        );
        let json = serde_json::to_value(&el).expect("serialize");
        assert_eq!(json["kind"], "shape");
        assert_eq!(json["shapeType"], "star");
        let back: CanvasElement = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, el);
    }
}
