//! # Canvas Core
//!
//! Synchronous engine for an infinite visual canvas.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 canvas-core                 │
//! ├─────────────────────────────────────────────┤
//! │  Scene           │  Interaction             │
//! │  - Elements      │  - Hit testing           │
//! │  - Z-order       │  - Drag / marquee        │
//! │  - Ref ids       │  - Aspect-locked resize  │
//! ├─────────────────────────────────────────────┤
//! │  Viewport        │  Persistence             │
//! │  - Zoom / camera │  - Versioned documents   │
//! │  - Animation     │  - Asset catalog         │
//! │  - Placement     │  - @imgN mentions        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Nothing here performs I/O; the `canvas-client` crate drives it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod element;
pub mod error;
pub mod event;
pub mod geometry;
pub mod interaction;
pub mod mention;
pub mod placement;
pub mod scene;
pub mod schema;
pub mod state;
pub mod store;
pub mod viewport;

pub use element::{
    CanvasElement, ElementKey, ElementKind, GeneratorContent, ImageContent, ImageStatus, ShapeType, Size, SyncStatus,
};
pub use error::{CanvasError, CanvasResult};
pub use event::{Command, InputEvent, Modifiers, PointerEvent, PointerPhase, WheelEvent};
pub use geometry::{Point, Rect};
pub use interaction::{Effects, Interaction, Manipulator, Selection};
pub use mention::{parse_prompt, resolve_references, ParsedPrompt};
pub use placement::{find_nearest_free_slot, SearchExtent};
pub use scene::Scene;
pub use schema::{AssetCatalog, AssetRecord, DecodeOutcome, SceneDocument, SCHEMA_VERSION};
pub use state::CanvasState;
pub use store::{ChangeKind, SceneStore};
pub use viewport::{FrameSync, ViewState, Viewport};

/// Canvas core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
