//! Input signals consumed by the viewport pipeline.
//!
//! Cursor samples are produced by the host at a fixed cadence; shape and
//! click information is inferred locally because the host does not expose it.

use serde::{Deserialize, Serialize};

/// Inferred cursor shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CursorShape {
    Text,
    Pointer,
    Grabbing,
    #[default]
    Default,
}

impl CursorShape {
    pub fn as_str(self) -> &'static str {
        match self {
            CursorShape::Text => "text",
            CursorShape::Pointer => "pointer",
            CursorShape::Grabbing => "grabbing",
            CursorShape::Default => "default",
        }
    }
}

/// Shape classification with its confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShapeEstimate {
    pub shape: CursorShape,
    pub confidence: f64,
}

impl ShapeEstimate {
    pub fn new(shape: CursorShape, confidence: f64) -> Self {
        Self {
            shape,
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    pub fn unknown() -> Self {
        Self::new(CursorShape::Default, 0.5)
    }
}

impl Default for ShapeEstimate {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Raw cursor position returned by the host, screen pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorInfo {
    pub x: f64,
    pub y: f64,
    /// Milliseconds on the pipeline clock.
    pub ts: u64,
}

/// One cursor sample with the shape estimate attached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorSample {
    pub x: f64,
    pub y: f64,
    pub ts: u64,
    pub shape: CursorShape,
    pub shape_confidence: f64,
}

impl CursorSample {
    pub fn new(x: f64, y: f64, ts: u64) -> Self {
        Self {
            x,
            y,
            ts,
            shape: CursorShape::Default,
            shape_confidence: 0.5,
        }
    }

    pub fn with_shape(mut self, estimate: ShapeEstimate) -> Self {
        self.shape = estimate.shape;
        self.shape_confidence = estimate.confidence;
        self
    }

    pub fn distance_to(&self, other: &CursorSample) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Cursor position in both screen pixels and recording-relative units.
///
/// `relative_x`/`relative_y` are expressed against the recording bounds and
/// may fall outside `[0, 1]` when the cursor leaves the recorded display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    pub relative_x: f64,
    pub relative_y: f64,
    pub ts: u64,
}

impl CursorPosition {
    pub fn is_inside(&self) -> bool {
        (0.0..=1.0).contains(&self.relative_x) && (0.0..=1.0).contains(&self.relative_y)
    }
}

/// Click inferred from pointer stillness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub x: f64,
    pub y: f64,
    pub ts: u64,
    /// Shape the cursor had when the click was inferred.
    pub shape: CursorShape,
}

/// Key press forwarded by the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyPress {
    pub ts: u64,
    pub key: String,
}

const MODIFIER_KEYS: &[&str] = &[
    "Tab", "Shift", "Control", "Alt", "Meta", "CapsLock", "Escape",
];

impl KeyPress {
    pub fn new(key: impl Into<String>, ts: u64) -> Self {
        Self {
            ts,
            key: key.into(),
        }
    }

    /// Modifier and navigation keys never count as typing.
    pub fn is_modifier(&self) -> bool {
        let key = self
            .key
            .trim_start_matches("Left")
            .trim_start_matches("Right")
            .trim_end_matches("Left")
            .trim_end_matches("Right");
        MODIFIER_KEYS
            .iter()
            .any(|modifier| key.eq_ignore_ascii_case(modifier))
            || self.key.eq_ignore_ascii_case("Esc")
    }

    pub fn is_escape(&self) -> bool {
        self.key.eq_ignore_ascii_case("Escape") || self.key.eq_ignore_ascii_case("Esc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifier_keys_are_not_typing() {
        for key in ["Shift", "ShiftLeft", "ControlRight", "Tab", "Escape", "meta"] {
            assert!(KeyPress::new(key, 0).is_modifier(), "{key} should be a modifier");
        }
        for key in ["a", "Enter", "Backspace", "1"] {
            assert!(!KeyPress::new(key, 0).is_modifier(), "{key} is typing");
        }
    }

    #[test]
    fn escape_accepts_short_alias() {
        assert!(KeyPress::new("Esc", 10).is_escape());
        assert!(KeyPress::new("Escape", 10).is_escape());
        assert!(!KeyPress::new("e", 10).is_escape());
    }

    #[test]
    fn shape_estimate_clamps_confidence() {
        assert_eq!(ShapeEstimate::new(CursorShape::Text, 1.7).confidence, 1.0);
        assert_eq!(ShapeEstimate::new(CursorShape::Text, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn cursor_shape_serializes_lowercase() {
        let json = serde_json::to_string(&CursorShape::Pointer).expect("serialize shape");
        assert_eq!(json, "\"pointer\"");
    }

    #[test]
    fn cursor_position_inside_checks_relative_bounds() {
        let inside = CursorPosition {
            x: 10.0,
            y: 10.0,
            relative_x: 0.5,
            relative_y: 1.0,
            ts: 0,
        };
        let outside = CursorPosition {
            relative_x: -0.1,
            ..inside
        };
        assert!(inside.is_inside());
        assert!(!outside.is_inside());
    }
}
