//! Selection and direct manipulation: drag, marquee, resize and pan.
//!
//! The engine is an explicit state machine ([`Interaction`]) owned by the
//! canvas. Exactly one interaction is active at a time; a new pointer press
//! or a cancel always leaves the previous one.
//!
//! ```text
//! idle --down on element--> dragging   --up/cancel--> idle
//! idle --down on empty----> marqueeing --up/cancel--> idle
//! idle --down on handle---> resizing   --up/cancel--> idle
//! idle --down with hand---> panning    --up/cancel--> idle
//! ```

use serde::{Deserialize, Serialize};

use crate::element::ElementKey;
use crate::event::PointerEvent;
use crate::geometry::{Point, Rect};
use crate::scene::Scene;
use crate::viewport::Viewport;

/// Marquee releases smaller than this (screen px, both axes) count as clicks.
pub const CLICK_SLOP_PX: f64 = 6.0;
/// Smallest box a resize may produce, in world units.
pub const MIN_RESIZE_SIZE: f64 = 40.0;
/// Half-angle of the accepted shrink cone, in degrees.
pub const SHRINK_CONE_DEGREES: f64 = 25.0;
/// Screen-space radius around a corner that grabs its resize handle.
pub const HANDLE_HIT_RADIUS_PX: f64 = 10.0;

/// Ordered set of selected keys. Order is the selection sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    keys: Vec<ElementKey>,
}

impl Selection {
    /// Empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selected keys in selection order.
    #[must_use]
    pub fn keys(&self) -> &[ElementKey] {
        &self.keys
    }

    /// Number of selected elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether a key is selected.
    #[must_use]
    pub fn contains(&self, key: &ElementKey) -> bool {
        self.keys.contains(key)
    }

    /// The only selected key, if exactly one is selected.
    #[must_use]
    pub fn single(&self) -> Option<&ElementKey> {
        match self.keys.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// 1-based position in the selection sequence (multi-select badge).
    #[must_use]
    pub fn badge(&self, key: &ElementKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key).map(|i| i + 1)
    }

    /// Replace the selection with a single key.
    pub fn set_single(&mut self, key: ElementKey) {
        self.keys.clear();
        self.keys.push(key);
    }

    /// Append a key if not already selected.
    pub fn append(&mut self, key: ElementKey) {
        if !self.contains(&key) {
            self.keys.push(key);
        }
    }

    /// Replace the whole selection.
    pub fn replace(&mut self, keys: Vec<ElementKey>) {
        self.keys.clear();
        for key in keys {
            self.append(key);
        }
    }

    /// Deselect everything.
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Drop keys that no longer exist in the scene. Returns true if any were dropped.
    pub fn prune(&mut self, scene: &Scene) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| scene.contains(k));
        before != self.keys.len()
    }
}

/// A corner resize handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    /// Top-left.
    TopLeft,
    /// Top-right.
    TopRight,
    /// Bottom-left.
    BottomLeft,
    /// Bottom-right.
    BottomRight,
}

impl Corner {
    /// All corners.
    pub const ALL: [Self; 4] = [
        Self::TopLeft,
        Self::TopRight,
        Self::BottomLeft,
        Self::BottomRight,
    ];

    fn is_right(self) -> bool {
        matches!(self, Self::TopRight | Self::BottomRight)
    }

    fn is_bottom(self) -> bool {
        matches!(self, Self::BottomLeft | Self::BottomRight)
    }

    /// Position of this corner on `rect`.
    #[must_use]
    pub fn point(self, rect: &Rect) -> Point {
        Point::new(
            if self.is_right() { rect.right() } else { rect.x },
            if self.is_bottom() { rect.bottom() } else { rect.y },
        )
    }

    /// The opposite corner, which stays fixed while this one is dragged.
    #[must_use]
    pub fn anchor(self, rect: &Rect) -> Point {
        Point::new(
            if self.is_right() { rect.x } else { rect.right() },
            if self.is_bottom() { rect.y } else { rect.bottom() },
        )
    }
}

/// Result of hit-testing a screen point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hit {
    /// A resize handle of the single selected element.
    Handle(ElementKey, Corner),
    /// The topmost element under the point.
    Element(ElementKey),
    /// Empty canvas.
    Empty,
}

/// Hit-test a screen point: handles first, then elements top to bottom.
#[must_use]
pub fn hit_test(scene: &Scene, selection: &Selection, viewport: &Viewport, screen: Point) -> Hit {
    if let Some(el) = selection.single().and_then(|key| scene.get(key)) {
        let rect = el.rect();
        for corner in Corner::ALL {
            let handle = viewport.world_to_screen(corner.point(&rect));
            if handle.sub(screen).length() <= HANDLE_HIT_RADIUS_PX {
                return Hit::Handle(el.key.clone(), corner);
            }
        }
    }
    scene
        .element_at(viewport.screen_to_world(screen))
        .map_or(Hit::Empty, |el| Hit::Element(el.key.clone()))
}

/// Compute the box produced by dragging `corner` of `baseline` from
/// `press` to `pointer` (world space).
///
/// With `lock_ratio`, the axis that moved further drives the other through
/// the ratio and both grow uniformly to respect [`MIN_RESIZE_SIZE`]. A locked
/// shrink is only accepted when the pointer moved within
/// [`SHRINK_CONE_DEGREES`] of the corner's inward diagonal; otherwise the
/// baseline is returned unchanged.
#[must_use]
pub fn resize_box(baseline: Rect, corner: Corner, press: Point, pointer: Point, lock_ratio: Option<f64>) -> Rect {
    let anchor = corner.anchor(&baseline);
    let movement = pointer.sub(press);
    let moved_corner = corner.point(&baseline).add(movement);
    let sign_x = if corner.is_right() { 1.0 } else { -1.0 };
    let sign_y = if corner.is_bottom() { 1.0 } else { -1.0 };
    let raw_w = sign_x * (moved_corner.x - anchor.x);
    let raw_h = sign_y * (moved_corner.y - anchor.y);

    let (w, h) = match lock_ratio.filter(|r| r.is_finite() && *r > 0.0) {
        Some(ratio) => {
            let w0 = raw_w.max(1.0);
            let h0 = raw_h.max(1.0);
            let (mut w, mut h) = if (w0 - baseline.w).abs() >= (h0 - baseline.h).abs() {
                (w0, w0 / ratio)
            } else {
                (h0 * ratio, h0)
            };
            if w < MIN_RESIZE_SIZE || h < MIN_RESIZE_SIZE {
                let s = (MIN_RESIZE_SIZE / w).max(MIN_RESIZE_SIZE / h);
                w *= s;
                h *= s;
            }
            if w * h < baseline.w * baseline.h && !within_shrink_cone(&baseline, corner, movement) {
                return baseline;
            }
            (w, h)
        }
        None => (raw_w.max(MIN_RESIZE_SIZE), raw_h.max(MIN_RESIZE_SIZE)),
    };

    let x = if corner.is_right() { anchor.x } else { anchor.x - w };
    let y = if corner.is_bottom() { anchor.y } else { anchor.y - h };
    Rect::new(x, y, w, h)
}

fn within_shrink_cone(baseline: &Rect, corner: Corner, movement: Point) -> bool {
    let Some(ideal) = corner.anchor(baseline).sub(corner.point(baseline)).normalize() else {
        return false;
    };
    let Some(dir) = movement.normalize() else {
        return false;
    };
    let cos = dir.dot(ideal).clamp(-1.0, 1.0);
    cos >= SHRINK_CONE_DEGREES.to_radians().cos()
}

/// State of an in-progress resize.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeSession {
    /// Element being resized.
    pub key: ElementKey,
    /// Handle being dragged.
    pub corner: Corner,
    /// Box at press time.
    pub baseline: Rect,
    /// Pointer position at press time (world).
    pub press_world: Point,
    /// Ratio used when aspect lock applies.
    pub ratio: f64,
    /// Whether aspect lock applies when no modifier is held.
    pub lock_by_default: bool,
}

/// The active interaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Interaction {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Moving the selection rigidly.
    Dragging {
        /// Pointer position at press (screen).
        press_screen: Point,
        /// Top-left of every selected element at press (world).
        origins: Vec<(ElementKey, Point)>,
    },
    /// Rubber-band selection.
    Marqueeing {
        /// Press position (screen).
        start: Point,
        /// Current position (screen).
        current: Point,
        /// Whether the result is added to the existing selection.
        additive: bool,
    },
    /// Resizing one element by a corner.
    Resizing(ResizeSession),
    /// Moving the camera.
    Panning {
        /// Last pointer position (screen).
        last: Point,
    },
}

/// What an input changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects {
    /// Element list changed.
    pub scene: bool,
    /// Selection changed.
    pub selection: bool,
    /// Zoom or camera changed.
    pub viewport: bool,
}

impl Effects {
    /// Nothing changed.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            scene: false,
            selection: false,
            viewport: false,
        }
    }

    /// Combine two effect sets.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            scene: self.scene || other.scene,
            selection: self.selection || other.selection,
            viewport: self.viewport || other.viewport,
        }
    }

    /// Whether anything changed.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.scene || self.selection || self.viewport
    }
}

/// Pointer-driven manipulation engine.
#[derive(Debug, Clone, Default)]
pub struct Manipulator {
    state: Interaction,
}

impl Manipulator {
    /// Create an idle engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current interaction.
    #[must_use]
    pub fn state(&self) -> &Interaction {
        &self.state
    }

    /// Whether nothing is in progress.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == Interaction::Idle
    }

    /// Screen-space marquee rectangle while marqueeing.
    #[must_use]
    pub fn marquee_rect(&self) -> Option<Rect> {
        match &self.state {
            Interaction::Marqueeing { start, current, .. } => Some(Rect::from_points(*start, *current)),
            _ => None,
        }
    }

    /// Handle a press. Any interaction already in progress is abandoned.
    pub fn pointer_down(
        &mut self,
        event: &PointerEvent,
        scene: &Scene,
        selection: &mut Selection,
        viewport: &Viewport,
    ) -> Effects {
        self.state = Interaction::Idle;
        let screen = event.position();

        if event.modifiers.hand {
            tracing::debug!("Pan started");
            self.state = Interaction::Panning { last: screen };
            return Effects::none();
        }

        match hit_test(scene, selection, viewport, screen) {
            Hit::Handle(key, corner) => {
                let Some(el) = scene.get(&key) else {
                    return Effects::none();
                };
                tracing::debug!("Resize started on {key} at {corner:?}");
                self.state = Interaction::Resizing(ResizeSession {
                    baseline: el.rect(),
                    press_world: viewport.screen_to_world(screen),
                    ratio: el.aspect_ratio(),
                    lock_by_default: el.locks_aspect(),
                    key,
                    corner,
                });
                Effects::none()
            }
            Hit::Element(key) => {
                let mut effects = Effects::none();
                if !selection.contains(&key) {
                    if event.modifiers.additive {
                        selection.append(key);
                    } else {
                        selection.set_single(key);
                    }
                    effects.selection = true;
                }
                let origins = selection
                    .keys()
                    .iter()
                    .filter_map(|k| scene.get(k).map(|el| (k.clone(), Point::new(el.x, el.y))))
                    .collect();
                tracing::debug!("Drag started with {} element(s)", selection.len());
                self.state = Interaction::Dragging {
                    press_screen: screen,
                    origins,
                };
                effects
            }
            Hit::Empty => {
                self.state = Interaction::Marqueeing {
                    start: screen,
                    current: screen,
                    additive: event.modifiers.additive,
                };
                Effects::none()
            }
        }
    }

    /// Handle pointer movement.
    pub fn pointer_move(&mut self, event: &PointerEvent, scene: &mut Scene, viewport: &mut Viewport) -> Effects {
        let screen = event.position();
        match &mut self.state {
            Interaction::Idle => Effects::none(),
            Interaction::Panning { last } => {
                viewport.pan_by(screen.sub(*last));
                *last = screen;
                Effects {
                    viewport: true,
                    ..Effects::none()
                }
            }
            Interaction::Marqueeing { current, .. } => {
                *current = screen;
                Effects::none()
            }
            Interaction::Dragging { press_screen, origins } => {
                let delta = viewport.screen_delta_to_world(screen.sub(*press_screen));
                for (key, origin) in origins.iter() {
                    let target = origin.add(delta);
                    // Elements removed mid-drag are skipped.
                    let _ = scene.replace_with(key, |el| el.moved_to(target));
                }
                Effects {
                    scene: true,
                    ..Effects::none()
                }
            }
            Interaction::Resizing(session) => {
                let pointer = viewport.screen_to_world(screen);
                let lock = (session.lock_by_default && !event.modifiers.free_aspect).then_some(session.ratio);
                let rect = resize_box(session.baseline, session.corner, session.press_world, pointer, lock);
                let applied = scene.replace_with(&session.key, |el| el.with_rect(rect)).is_ok();
                Effects {
                    scene: applied,
                    ..Effects::none()
                }
            }
        }
    }

    /// Handle a release.
    pub fn pointer_up(
        &mut self,
        event: &PointerEvent,
        scene: &Scene,
        selection: &mut Selection,
        viewport: &Viewport,
    ) -> Effects {
        let state = std::mem::take(&mut self.state);
        let Interaction::Marqueeing { start, additive, .. } = state else {
            return Effects::none();
        };
        let end = event.position();
        let screen_rect = Rect::from_points(start, end);
        if screen_rect.w < CLICK_SLOP_PX && screen_rect.h < CLICK_SLOP_PX {
            if additive || selection.is_empty() {
                return Effects::none();
            }
            selection.clear();
            return Effects {
                selection: true,
                ..Effects::none()
            };
        }

        let world_rect = Rect::from_points(viewport.screen_to_world(start), viewport.screen_to_world(end));
        let hits = scene.keys_intersecting(&world_rect);
        let before = selection.clone();
        if additive {
            for key in hits {
                selection.append(key);
            }
        } else {
            selection.replace(hits);
        }
        tracing::debug!("Marquee selected {} element(s)", selection.len());
        Effects {
            selection: *selection != before,
            ..Effects::none()
        }
    }

    /// Abandon whatever is in progress. Changes already applied are kept.
    pub fn cancel(&mut self) -> Effects {
        if !self.is_idle() {
            tracing::debug!("Interaction cancelled");
        }
        self.state = Interaction::Idle;
        Effects::none()
    }
}
