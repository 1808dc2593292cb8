//! Canvas state: scene, selection, viewport and the interaction in progress.

use crate::element::{CanvasElement, ElementKey, ElementKind};
use crate::event::{Command, InputEvent, PointerEvent, PointerPhase, WheelEvent};
use crate::geometry::{Point, Rect};
use crate::interaction::{Effects, Manipulator, Selection};
use crate::placement::{find_nearest_free_slot, SearchExtent};
use crate::scene::Scene;
use crate::viewport::{FrameSync, Viewport};
use crate::CanvasResult;

/// Screen padding used when fitting content.
pub const FIT_PADDING_PX: f64 = 48.0;
/// Duration of fit animations.
pub const FIT_ANIMATION_MS: u64 = 320;

/// The complete canvas state.
#[derive(Debug, Clone, Default)]
pub struct CanvasState {
    /// The scene.
    pub scene: Scene,
    /// Current selection.
    pub selection: Selection,
    /// Viewport transform.
    pub viewport: Viewport,
    manipulator: Manipulator,
    frame_sync: FrameSync,
}

impl CanvasState {
    /// Create an empty canvas with the given on-screen size.
    #[must_use]
    pub fn new(view_w: f64, view_h: f64) -> Self {
        Self {
            scene: Scene::new(),
            selection: Selection::new(),
            viewport: Viewport::new(view_w, view_h),
            manipulator: Manipulator::new(),
            frame_sync: FrameSync::new(),
        }
    }

    /// The manipulation engine.
    #[must_use]
    pub fn manipulator(&self) -> &Manipulator {
        &self.manipulator
    }

    /// Frame coalescer for viewport changes.
    pub fn frame_sync(&mut self) -> &mut FrameSync {
        &mut self.frame_sync
    }

    /// Process an input event.
    pub fn process_event(&mut self, event: &InputEvent) -> Effects {
        let effects = match event {
            InputEvent::Pointer(pointer) => self.pointer(pointer),
            InputEvent::Wheel(wheel) => self.wheel(wheel),
            InputEvent::Command { command } => self.command(*command),
        };
        if effects.viewport {
            self.frame_sync.mark_dirty();
        }
        effects
    }

    fn pointer(&mut self, event: &PointerEvent) -> Effects {
        match event.phase {
            PointerPhase::Down => self
                .manipulator
                .pointer_down(event, &self.scene, &mut self.selection, &self.viewport),
            PointerPhase::Move => self.manipulator.pointer_move(event, &mut self.scene, &mut self.viewport),
            PointerPhase::Up => self
                .manipulator
                .pointer_up(event, &self.scene, &mut self.selection, &self.viewport),
            PointerPhase::Cancel => self.manipulator.cancel(),
        }
    }

    fn wheel(&mut self, event: &WheelEvent) -> Effects {
        let before = self.viewport.view_state();
        self.viewport.wheel(
            Point::new(event.x, event.y),
            Point::new(event.dx, event.dy),
            event.modifiers.zoom,
        );
        Effects {
            viewport: self.viewport.view_state() != before,
            ..Effects::none()
        }
    }

    /// Apply a shortcut command.
    pub fn command(&mut self, command: Command) -> Effects {
        let keys = self.selection.keys().to_vec();
        let scene = match command {
            Command::DeleteSelected => return self.delete_selected(),
            Command::ClearSelection => {
                let had = !self.selection.is_empty();
                self.selection.clear();
                return Effects {
                    selection: had,
                    ..Effects::none()
                };
            }
            Command::MoveUp => self.scene.move_up(&keys),
            Command::MoveDown => self.scene.move_down(&keys),
            Command::BringToFront => self.scene.bring_to_front(&keys),
            Command::SendToBack => self.scene.send_to_back(&keys),
        };
        Effects {
            scene,
            ..Effects::none()
        }
    }

    /// Remove every selected element and clear the selection.
    pub fn delete_selected(&mut self) -> Effects {
        if self.selection.is_empty() {
            return Effects::none();
        }
        let removed = self.scene.remove_all(self.selection.keys());
        self.selection.clear();
        self.manipulator.cancel();
        tracing::debug!("Deleted {removed} selected element(s)");
        Effects {
            scene: removed > 0,
            selection: true,
            ..Effects::none()
        }
    }

    /// Drop selected keys that no longer exist. Call after external scene
    /// changes.
    pub fn prune_selection(&mut self) -> bool {
        self.selection.prune(&self.scene)
    }

    /// Insert an element of `w`×`h` at the free slot nearest `anchor`
    /// (viewport center when `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the element's key is already in the scene.
    pub fn insert_placed(
        &mut self,
        key: ElementKey,
        kind: ElementKind,
        w: f64,
        h: f64,
        anchor: Option<Point>,
    ) -> CanvasResult<ElementKey> {
        let anchor = anchor.unwrap_or_else(|| self.viewport.world_center());
        let visible = self.viewport.visible_world_rect();
        let extent = SearchExtent {
            view_w: visible.w,
            view_h: visible.h,
        };
        let pos = find_nearest_free_slot(&self.scene.rects(), w, h, anchor, extent);
        self.scene
            .insert(CanvasElement::with_key(key, kind, Rect::new(pos.x, pos.y, w, h)))
    }

    /// Reference id for `key`, assigned on first mention.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not in the scene.
    pub fn mention(&mut self, key: &ElementKey) -> CanvasResult<u32> {
        let id = self.scene.ensure_ref_id(key)?;
        tracing::debug!("Element {key} is @img{id}");
        Ok(id)
    }

    /// Animate to show the whole scene. Returns false for an empty scene.
    pub fn fit_content(&mut self, now_ms: u64) -> bool {
        let Some(bounds) = self.scene.bounds() else {
            return false;
        };
        let (zoom, camera) = self.viewport.fit_rect(bounds, FIT_PADDING_PX, false);
        self.viewport.animate_to(zoom, camera, now_ms, FIT_ANIMATION_MS);
        self.frame_sync.mark_dirty();
        true
    }

    /// Animate to show one element without magnifying past 1:1.
    pub fn fit_result(&mut self, key: &ElementKey, now_ms: u64) -> bool {
        let Some(rect) = self.scene.get(key).map(CanvasElement::rect) else {
            return false;
        };
        let (zoom, camera) = self.viewport.fit_rect(rect, FIT_PADDING_PX, true);
        self.viewport.animate_to(zoom, camera, now_ms, FIT_ANIMATION_MS);
        self.frame_sync.mark_dirty();
        true
    }

    /// Advance viewport animation; true while still animating.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        let was = self.viewport.is_animating();
        let still = self.viewport.tick(now_ms);
        if was {
            self.frame_sync.mark_dirty();
        }
        still
    }
}
