//! Input events for canvas interaction.

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Phase of a pointer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerPhase {
    /// Button pressed / finger down.
    Down,
    /// Pointer moved.
    Move,
    /// Button released / finger up.
    Up,
    /// The OS took the pointer away (e.g. a system gesture).
    Cancel,
}

/// Modifier state accompanying an input event.
///
/// Fields are semantic rather than tied to physical keys; the host maps
/// Shift/Cmd/Alt/Space to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    /// Add to the selection instead of replacing it.
    #[serde(default)]
    pub additive: bool,
    /// Disable aspect lock while resizing.
    #[serde(default)]
    pub free_aspect: bool,
    /// Treat scrolling as zoom (pinch or Ctrl/Cmd held).
    #[serde(default)]
    pub zoom: bool,
    /// Hand tool active (space held): pointer drags pan.
    #[serde(default)]
    pub hand: bool,
}

impl Modifiers {
    /// No modifiers held.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            additive: false,
            free_aspect: false,
            zoom: false,
            hand: false,
        }
    }

    /// Only the additive modifier held.
    #[must_use]
    pub const fn additive() -> Self {
        Self {
            additive: true,
            ..Self::none()
        }
    }
}

/// A pointer event in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    /// Phase of this event.
    pub phase: PointerPhase,
    /// X position in screen pixels.
    pub x: f64,
    /// Y position in screen pixels.
    pub y: f64,
    /// Modifiers held.
    #[serde(default)]
    pub modifiers: Modifiers,
}

impl PointerEvent {
    /// Create a new pointer event.
    #[must_use]
    pub const fn new(phase: PointerPhase, x: f64, y: f64, modifiers: Modifiers) -> Self {
        Self {
            phase,
            x,
            y,
            modifiers,
        }
    }

    /// Screen position.
    #[must_use]
    pub const fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A wheel or trackpad scroll event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelEvent {
    /// Pointer X in screen pixels.
    pub x: f64,
    /// Pointer Y in screen pixels.
    pub y: f64,
    /// Horizontal scroll delta.
    pub dx: f64,
    /// Vertical scroll delta.
    pub dy: f64,
    /// Modifiers held.
    #[serde(default)]
    pub modifiers: Modifiers,
}

/// Keyboard-level commands, after the host's shortcut mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Delete the selected elements.
    DeleteSelected,
    /// Clear the selection.
    ClearSelection,
    /// Raise the selection one step.
    MoveUp,
    /// Lower the selection one step.
    MoveDown,
    /// Raise the selection to the top.
    BringToFront,
    /// Lower the selection to the bottom.
    SendToBack,
}

/// Any input the canvas can process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Pointer input.
    Pointer(PointerEvent),
    /// Scroll input.
    Wheel(WheelEvent),
    /// A mapped shortcut.
    Command {
        /// The command.
        command: Command,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_event_json_shape() {
        let event = InputEvent::Pointer(PointerEvent::new(PointerPhase::Down, 1.0, 2.0, Modifiers::additive()));
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "pointer");
        assert_eq!(json["phase"], "down");
        assert_eq!(json["modifiers"]["additive"], true);
    }

    #[test]
    fn test_modifiers_default_when_missing() {
        let json = r#"{"type":"wheel","x":0,"y":0,"dx":1,"dy":2}"#;
        let event: InputEvent = serde_json::from_str(json).expect("parse");
        match event {
            InputEvent::Wheel(w) => assert_eq!(w.modifiers, Modifiers::none()),
            other => panic!("Expected wheel, got {other:?}"),
        }
    }
}
