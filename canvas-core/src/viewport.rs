//! Viewport controller: zoom, camera and world/screen conversion.
//!
//! ```text
//! screen = world * zoom + camera
//! world  = (screen - camera) / zoom
//! ```

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect};

/// Smallest zoom level.
pub const MIN_ZOOM: f64 = 0.05;
/// Largest zoom level.
pub const MAX_ZOOM: f64 = 3.0;
/// Smallest per-step zoom factor for wheel and pinch input.
pub const MIN_STEP_FACTOR: f64 = 0.93;
/// Largest per-step zoom factor for wheel and pinch input.
pub const MAX_STEP_FACTOR: f64 = 1.07;
/// Wheel delta to zoom exponent.
const WHEEL_ZOOM_SENSITIVITY: f64 = 0.0015;
/// Interval between external zoom/camera notifications.
pub const EXTERNAL_SYNC_INTERVAL_MS: u64 = 80;

/// Clamp a zoom value into `[MIN_ZOOM, MAX_ZOOM]`.
#[must_use]
pub fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_nan() {
        1.0
    } else {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    }
}

/// Ease-out cubic: fast start, gentle landing.
#[must_use]
pub fn ease_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

/// Persistable zoom and camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// Zoom level.
    pub zoom: f64,
    /// Camera X (screen-space translation of the world origin).
    pub x: f64,
    /// Camera Y.
    pub y: f64,
}

/// An in-flight animated transition.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Animation {
    from_zoom: f64,
    from_camera: Point,
    to_zoom: f64,
    to_camera: Point,
    start_ms: u64,
    duration_ms: u64,
}

/// The viewport: owns zoom, camera and the on-screen size.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    zoom: f64,
    camera: Point,
    /// On-screen width in pixels.
    pub view_w: f64,
    /// On-screen height in pixels.
    pub view_h: f64,
    animation: Option<Animation>,
    hydrated: bool,
}

impl Viewport {
    /// Create a viewport of the given on-screen size at zoom 1 with the world
    /// origin at the top-left corner.
    #[must_use]
    pub fn new(view_w: f64, view_h: f64) -> Self {
        Self {
            zoom: 1.0,
            camera: Point::zero(),
            view_w,
            view_h,
            animation: None,
            hydrated: false,
        }
    }

    /// Current zoom.
    #[must_use]
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Current camera translation.
    #[must_use]
    pub fn camera(&self) -> Point {
        self.camera
    }

    /// Snapshot for persistence.
    #[must_use]
    pub fn view_state(&self) -> ViewState {
        ViewState {
            zoom: self.zoom,
            x: self.camera.x,
            y: self.camera.y,
        }
    }

    /// Apply a remotely saved view. Only the first call per session has an
    /// effect; returns whether it was applied.
    pub fn hydrate(&mut self, state: ViewState) -> bool {
        if self.hydrated {
            return false;
        }
        self.hydrated = true;
        self.set(state.zoom, Point::new(state.x, state.y));
        true
    }

    /// Whether a remote view has been applied.
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// Set zoom and camera directly, cancelling any animation.
    pub fn set(&mut self, zoom: f64, camera: Point) {
        self.animation = None;
        self.zoom = clamp_zoom(zoom);
        self.camera = camera;
    }

    /// Resize the on-screen area.
    pub fn resize(&mut self, view_w: f64, view_h: f64) {
        self.view_w = view_w;
        self.view_h = view_h;
    }

    /// Convert a world point to screen space.
    #[must_use]
    pub fn world_to_screen(&self, p: Point) -> Point {
        p.scale(self.zoom).add(self.camera)
    }

    /// Convert a screen point to world space.
    #[must_use]
    pub fn screen_to_world(&self, p: Point) -> Point {
        p.sub(self.camera).scale(1.0 / self.zoom)
    }

    /// Convert a screen-space vector (no translation) to world space.
    #[must_use]
    pub fn screen_delta_to_world(&self, d: Point) -> Point {
        d.scale(1.0 / self.zoom)
    }

    /// World point at the center of the screen.
    #[must_use]
    pub fn world_center(&self) -> Point {
        self.screen_to_world(Point::new(self.view_w / 2.0, self.view_h / 2.0))
    }

    /// World-space rectangle currently visible.
    #[must_use]
    pub fn visible_world_rect(&self) -> Rect {
        let tl = self.screen_to_world(Point::zero());
        Rect::new(tl.x, tl.y, self.view_w / self.zoom, self.view_h / self.zoom)
    }

    /// Zoom to `next_zoom` keeping the world point under `screen_point` fixed.
    pub fn zoom_at(&mut self, screen_point: Point, next_zoom: f64) {
        let world = self.screen_to_world(screen_point);
        let next = clamp_zoom(next_zoom);
        self.animation = None;
        self.zoom = next;
        self.camera = screen_point.sub(world.scale(next));
    }

    /// Zoom by a single wheel or pinch step. The factor is clamped to
    /// `[MIN_STEP_FACTOR, MAX_STEP_FACTOR]`.
    pub fn zoom_step(&mut self, screen_point: Point, factor: f64) {
        let factor = if factor.is_finite() {
            factor.clamp(MIN_STEP_FACTOR, MAX_STEP_FACTOR)
        } else {
            1.0
        };
        self.zoom_at(screen_point, self.zoom * factor);
    }

    /// Pan by a screen-space delta (pointer drag: content follows pointer).
    pub fn pan_by(&mut self, delta: Point) {
        self.animation = None;
        self.camera = self.camera.add(delta);
    }

    /// Handle a wheel event: plain scroll pans (the camera moves against the
    /// delta), modifier scroll zooms around the pointer.
    pub fn wheel(&mut self, screen_point: Point, delta: Point, zoom_modifier: bool) {
        if zoom_modifier {
            let factor = (-delta.y * WHEEL_ZOOM_SENSITIVITY).exp();
            self.zoom_step(screen_point, factor);
        } else {
            self.animation = None;
            self.camera = self.camera.sub(delta);
        }
    }

    /// Zoom and camera that fit `rect` with `padding` screen pixels around it,
    /// centered. With `cap_at_one` the zoom never exceeds 1.
    #[must_use]
    pub fn fit_rect(&self, rect: Rect, padding: f64, cap_at_one: bool) -> (f64, Point) {
        let avail_w = (self.view_w - 2.0 * padding).max(1.0);
        let avail_h = (self.view_h - 2.0 * padding).max(1.0);
        let mut zoom = (avail_w / rect.w.max(1.0)).min(avail_h / rect.h.max(1.0));
        if cap_at_one {
            zoom = zoom.min(1.0);
        }
        let zoom = clamp_zoom(zoom);
        let center = rect.center();
        let camera = Point::new(
            self.view_w / 2.0 - center.x * zoom,
            self.view_h / 2.0 - center.y * zoom,
        );
        (zoom, camera)
    }

    /// Start an animated transition. Replaces any animation in flight.
    pub fn animate_to(&mut self, target_zoom: f64, target_camera: Point, now_ms: u64, duration_ms: u64) {
        let to_zoom = clamp_zoom(target_zoom);
        if duration_ms == 0 {
            self.set(to_zoom, target_camera);
            return;
        }
        self.animation = Some(Animation {
            from_zoom: self.zoom,
            from_camera: self.camera,
            to_zoom,
            to_camera: target_camera,
            start_ms: now_ms,
            duration_ms,
        });
    }

    /// Whether an animation is in flight.
    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Advance the animation to `now_ms`. Returns true while still animating.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        let Some(anim) = self.animation else {
            return false;
        };
        let elapsed = now_ms.saturating_sub(anim.start_ms);
        #[allow(clippy::cast_precision_loss)]
        let t = (elapsed as f64 / anim.duration_ms as f64).min(1.0);
        let e = ease_out_cubic(t);
        self.zoom = clamp_zoom(anim.from_zoom + (anim.to_zoom - anim.from_zoom) * e);
        self.camera = anim.from_camera.lerp(anim.to_camera, e);
        if t >= 1.0 {
            self.zoom = anim.to_zoom;
            self.camera = anim.to_camera;
            self.animation = None;
            false
        } else {
            true
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 800.0)
    }
}

/// Coalesces high-frequency viewport changes: one visual update per frame and
/// a slower cadence for externally observable zoom/camera values.
#[derive(Debug, Clone, Default)]
pub struct FrameSync {
    frame_dirty: bool,
    external_dirty: bool,
    last_external_ms: Option<u64>,
}

impl FrameSync {
    /// Create an idle coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the viewport changed.
    pub fn mark_dirty(&mut self) {
        self.frame_dirty = true;
        self.external_dirty = true;
    }

    /// Called once per animation frame; true if a repaint is due.
    pub fn take_frame(&mut self) -> bool {
        std::mem::take(&mut self.frame_dirty)
    }

    /// Called as often as convenient; returns the view state when the
    /// external value should be updated.
    pub fn poll_external(&mut self, viewport: &Viewport, now_ms: u64) -> Option<ViewState> {
        if !self.external_dirty {
            return None;
        }
        let due = self
            .last_external_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= EXTERNAL_SYNC_INTERVAL_MS);
        if !due {
            return None;
        }
        self.external_dirty = false;
        self.last_external_ms = Some(now_ms);
        Some(viewport.view_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: Point, b: Point, tol: f64) -> bool {
        (a.x - b.x).abs() <= tol && (a.y - b.y).abs() <= tol
    }

    #[test]
    fn test_round_trip_conversion() {
        let mut vp = Viewport::new(800.0, 600.0);
        vp.set(2.0, Point::new(100.0, -50.0));
        let world = Point::new(10.0, 20.0);
        let screen = vp.world_to_screen(world);
        assert_eq!(screen, Point::new(120.0, -10.0));
        assert_eq!(vp.screen_to_world(screen), world);
    }

    #[test]
    fn test_zoom_clamped() {
        let mut vp = Viewport::default();
        vp.zoom_at(Point::zero(), 100.0);
        assert!((vp.zoom() - MAX_ZOOM).abs() < f64::EPSILON);
        vp.zoom_at(Point::zero(), 0.0001);
        assert!((vp.zoom() - MIN_ZOOM).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zoom_step_factor_clamped() {
        let mut vp = Viewport::default();
        vp.zoom_step(Point::zero(), 5.0);
        assert!((vp.zoom() - MAX_STEP_FACTOR).abs() < 1e-12);
        vp.set(1.0, Point::zero());
        vp.zoom_step(Point::zero(), 0.1);
        assert!((vp.zoom() - MIN_STEP_FACTOR).abs() < 1e-12);
    }

    #[test]
    fn test_wheel_pans_without_modifier() {
        let mut vp = Viewport::default();
        vp.wheel(Point::new(10.0, 10.0), Point::new(5.0, -7.0), false);
        assert_eq!(vp.camera(), Point::new(-5.0, 7.0));
        assert!((vp.zoom() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wheel_zooms_with_modifier() {
        let mut vp = Viewport::default();
        vp.wheel(Point::new(10.0, 10.0), Point::new(0.0, -40.0), true);
        assert!(vp.zoom() > 1.0);
        assert!(vp.zoom() <= MAX_STEP_FACTOR + 1e-12);
    }

    #[test]
    fn test_fit_rect_centers_and_caps() {
        let vp = Viewport::new(1000.0, 500.0);
        let rect = Rect::new(0.0, 0.0, 100.0, 100.0);
        let (zoom, camera) = vp.fit_rect(rect, 0.0, true);
        assert!((zoom - 1.0).abs() < f64::EPSILON);
        assert_eq!(camera, Point::new(450.0, 200.0));

        let (zoom, _) = vp.fit_rect(rect, 0.0, false);
        assert!((zoom - 3.0).abs() < f64::EPSILON);

        let (zoom, camera) = vp.fit_rect(Rect::new(0.0, 0.0, 2000.0, 500.0), 0.0, false);
        assert!((zoom - 0.5).abs() < f64::EPSILON);
        assert_eq!(camera, Point::new(0.0, 125.0));
    }

    #[test]
    fn test_animation_eases_and_finishes() {
        let mut vp = Viewport::default();
        vp.animate_to(2.0, Point::new(100.0, 100.0), 1_000, 200);
        assert!(vp.tick(1_100));
        // Ease-out is past the linear midpoint at half time.
        assert!(vp.zoom() > 1.5);
        assert!(!vp.tick(1_200));
        assert!((vp.zoom() - 2.0).abs() < f64::EPSILON);
        assert_eq!(vp.camera(), Point::new(100.0, 100.0));
        assert!(!vp.is_animating());
    }

    #[test]
    fn test_mutation_cancels_animation() {
        let mut vp = Viewport::default();
        vp.animate_to(2.0, Point::new(100.0, 100.0), 0, 500);
        vp.pan_by(Point::new(1.0, 1.0));
        assert!(!vp.is_animating());
        assert!(!vp.tick(250));
    }

    #[test]
    fn test_hydrate_once() {
        let mut vp = Viewport::default();
        assert!(vp.hydrate(ViewState { zoom: 0.5, x: 3.0, y: 4.0 }));
        assert!(!vp.hydrate(ViewState { zoom: 2.0, x: 0.0, y: 0.0 }));
        assert!((vp.zoom() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frame_sync_coalesces() {
        let vp = Viewport::default();
        let mut sync = FrameSync::new();
        assert!(!sync.take_frame());
        sync.mark_dirty();
        sync.mark_dirty();
        assert!(sync.take_frame());
        assert!(!sync.take_frame());

        assert!(sync.poll_external(&vp, 0).is_some());
        sync.mark_dirty();
        assert!(sync.poll_external(&vp, 40).is_none());
        assert!(sync.poll_external(&vp, 80).is_some());
        assert!(sync.poll_external(&vp, 500).is_none());
    }

    proptest! {
        #[test]
        fn prop_zoom_at_keeps_point_fixed(
            sx in -2000.0f64..2000.0,
            sy in -2000.0f64..2000.0,
            cx in -5000.0f64..5000.0,
            cy in -5000.0f64..5000.0,
            zoom in MIN_ZOOM..MAX_ZOOM,
            next in 0.01f64..5.0,
        ) {
            let mut vp = Viewport::default();
            vp.set(zoom, Point::new(cx, cy));
            let screen = Point::new(sx, sy);
            prop_assert!(approx(vp.world_to_screen(vp.screen_to_world(screen)), screen, 1e-6));
            let world_before = vp.screen_to_world(screen);
            vp.zoom_at(screen, next);
            prop_assert!(approx(vp.world_to_screen(world_before), screen, 1e-6));
            prop_assert!(approx(vp.world_to_screen(vp.screen_to_world(screen)), screen, 1e-6));
        }

        #[test]
        fn prop_zoom_always_clamped(steps in prop::collection::vec((-500.0f64..500.0, any::<bool>()), 0..60)) {
            let mut vp = Viewport::default();
            for (delta, absolute) in steps {
                if absolute {
                    vp.zoom_at(Point::new(10.0, 10.0), delta);
                } else {
                    vp.wheel(Point::new(10.0, 10.0), Point::new(0.0, delta), true);
                }
                prop_assert!(vp.zoom() >= MIN_ZOOM && vp.zoom() <= MAX_ZOOM);
            }
        }
    }
}
