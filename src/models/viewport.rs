//! Viewport data model: zoom presets, element observations, persistence
//! rules and the snapshot published to the compositor.

use serde::{Deserialize, Serialize};

use crate::models::events::CursorPosition;

/// UI element type recognised by the detectors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ElementKind {
    TextField,
    Button,
    Menu,
    Dropdown,
}

impl ElementKind {
    /// Conflict priority: text-field > dropdown/menu > button.
    pub fn priority(self) -> u8 {
        match self {
            ElementKind::TextField => 4,
            ElementKind::Dropdown | ElementKind::Menu => 3,
            ElementKind::Button => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::TextField => "text-field",
            ElementKind::Button => "button",
            ElementKind::Menu => "menu",
            ElementKind::Dropdown => "dropdown",
        }
    }
}

/// Estimated on-screen size of an element, pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SizeEstimate {
    pub width: f64,
    pub height: f64,
}

impl SizeEstimate {
    pub fn area(self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One "element observed" event. Never mutated after creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementObservation {
    pub kind: ElementKind,
    /// Screen pixels.
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub size: Option<SizeEstimate>,
    pub ts: u64,
    /// Heat-map hits backing this observation at detection time.
    #[serde(default)]
    pub hit_count: u32,
}

impl ElementObservation {
    pub fn new(kind: ElementKind, x: f64, y: f64, confidence: f64, ts: u64) -> Self {
        Self {
            kind,
            x,
            y,
            confidence: confidence.clamp(0.0, 1.0),
            size: None,
            ts,
            hit_count: 0,
        }
    }

    pub fn with_size(mut self, size: SizeEstimate) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_hits(mut self, hit_count: u32) -> Self {
        self.hit_count = hit_count;
        self
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Condition under which a focused element stops justifying zoom.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ExitCondition {
    CursorLeave,
    ClickOutside,
    Click,
    EscapeKey,
    MenuClose,
    Selection,
    Timeout,
}

/// Static per-type persistence configuration.
///
/// A persistent rule is exempt from duration-based expiry and leaves only
/// through one of its exit conditions.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceRule {
    pub duration_ms: u64,
    pub persistent: bool,
    pub exit_conditions: &'static [ExitCondition],
}

impl PersistenceRule {
    pub const TEXT_FIELD: PersistenceRule = PersistenceRule {
        duration_ms: 10_000,
        persistent: true,
        exit_conditions: &[
            ExitCondition::CursorLeave,
            ExitCondition::ClickOutside,
            ExitCondition::EscapeKey,
        ],
    };

    pub const BUTTON: PersistenceRule = PersistenceRule {
        duration_ms: 3_000,
        persistent: false,
        exit_conditions: &[ExitCondition::Click, ExitCondition::CursorLeave],
    };

    pub const MENU: PersistenceRule = PersistenceRule {
        duration_ms: 8_000,
        persistent: false,
        exit_conditions: &[
            ExitCondition::ClickOutside,
            ExitCondition::EscapeKey,
            ExitCondition::MenuClose,
        ],
    };

    pub const DROPDOWN: PersistenceRule = PersistenceRule {
        duration_ms: 8_000,
        persistent: false,
        exit_conditions: &[
            ExitCondition::Selection,
            ExitCondition::ClickOutside,
            ExitCondition::EscapeKey,
        ],
    };

    pub fn for_kind(kind: ElementKind) -> PersistenceRule {
        match kind {
            ElementKind::TextField => Self::TEXT_FIELD,
            ElementKind::Button => Self::BUTTON,
            ElementKind::Menu => Self::MENU,
            ElementKind::Dropdown => Self::DROPDOWN,
        }
    }

    pub fn exits_on(&self, condition: ExitCondition) -> bool {
        self.exit_conditions.contains(&condition)
    }

    /// True once a non-persistent rule has outlived its duration.
    pub fn is_expired(&self, acquired_at: u64, now: u64) -> bool {
        !self.persistent && now.saturating_sub(acquired_at) > self.duration_ms
    }
}

/// The element currently justifying a non-default zoom level.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FocusedElement {
    pub kind: ElementKind,
    pub observation: ElementObservation,
    pub acquired_at: u64,
    pub rule: PersistenceRule,
    /// Estimated bounds, recording-relative.
    pub bounds: RelativeRect,
}

impl FocusedElement {
    pub fn new(observation: ElementObservation, bounds: RelativeRect, acquired_at: u64) -> Self {
        Self {
            kind: observation.kind,
            observation,
            acquired_at,
            rule: PersistenceRule::for_kind(observation.kind),
            bounds,
        }
    }

    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.acquired_at)
    }
}

/// Rectangle in recording-relative units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RelativeRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RelativeRect {
    pub fn center(self) -> RelativePoint {
        RelativePoint {
            x: self.x + self.width * 0.5,
            y: self.y + self.height * 0.5,
        }
    }
}

/// Point in recording-relative units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelativePoint {
    pub x: f64,
    pub y: f64,
}

impl RelativePoint {
    pub const CENTER: RelativePoint = RelativePoint { x: 0.5, y: 0.5 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Same point clamped into `[0, 1]` on both axes; non-finite axes recentre.
    pub fn clamped(self) -> Self {
        let clamp = |value: f64| {
            if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                0.5
            }
        };
        Self {
            x: clamp(self.x),
            y: clamp(self.y),
        }
    }
}

impl Default for RelativePoint {
    fn default() -> Self {
        Self::CENTER
    }
}

/// Screen-space rectangle of the recorded display; the coordinate frame
/// every relative position is expressed against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RecordingBounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    /// Relative position; not clamped, so off-display points fall outside `[0, 1]`.
    pub fn to_relative(&self, x: f64, y: f64) -> RelativePoint {
        RelativePoint {
            x: (x - self.x) / self.width.max(1.0),
            y: (y - self.y) / self.height.max(1.0),
        }
    }

    pub fn position(&self, x: f64, y: f64, ts: u64) -> CursorPosition {
        let relative = self.to_relative(x, y);
        CursorPosition {
            x,
            y,
            relative_x: relative.x,
            relative_y: relative.y,
            ts,
        }
    }
}

/// Fixed zoom magnification ladder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ZoomPreset {
    None,
    Low,
    Medium,
    High,
    Maximum,
}

impl ZoomPreset {
    pub const ALL: [ZoomPreset; 5] = [
        ZoomPreset::None,
        ZoomPreset::Low,
        ZoomPreset::Medium,
        ZoomPreset::High,
        ZoomPreset::Maximum,
    ];

    pub fn level(self) -> f64 {
        match self {
            ZoomPreset::None => 1.0,
            ZoomPreset::Low => 1.5,
            ZoomPreset::Medium => 1.8,
            ZoomPreset::High => 2.2,
            ZoomPreset::Maximum => 2.5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ZoomPreset::None => "none",
            ZoomPreset::Low => "low",
            ZoomPreset::Medium => "medium",
            ZoomPreset::High => "high",
            ZoomPreset::Maximum => "maximum",
        }
    }

    pub fn nearest(level: f64) -> ZoomPreset {
        let mut best = ZoomPreset::None;
        let mut best_distance = f64::INFINITY;
        for preset in Self::ALL {
            let distance = (preset.level() - level).abs();
            if distance < best_distance {
                best = preset;
                best_distance = distance;
            }
        }
        best
    }

    /// Preset within `tolerance` of `level`, if any.
    pub fn matching(level: f64, tolerance: f64) -> Option<ZoomPreset> {
        Self::ALL
            .into_iter()
            .find(|preset| (preset.level() - level).abs() < tolerance)
    }
}

/// Cubic ease-out: fast start, soft landing.
pub fn ease_out_cubic(progress: f64) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    1.0 - (1.0 - p).powi(3)
}

/// Zoom level animation from `start_level` to `target_level`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoomTransition {
    pub active: bool,
    pub start_level: f64,
    pub target_level: f64,
    pub start_ts: u64,
    pub duration_ms: u64,
}

impl ZoomTransition {
    pub fn idle(level: f64) -> Self {
        Self {
            active: false,
            start_level: level,
            target_level: level,
            start_ts: 0,
            duration_ms: 0,
        }
    }

    pub fn start(from: f64, to: f64, now: u64, duration_ms: u64) -> Self {
        Self {
            active: true,
            start_level: from,
            target_level: to,
            start_ts: now,
            duration_ms: duration_ms.max(1),
        }
    }

    pub fn progress(&self, now: u64) -> f64 {
        if !self.active {
            return 1.0;
        }
        let elapsed = now.saturating_sub(self.start_ts) as f64;
        (elapsed / self.duration_ms.max(1) as f64).min(1.0)
    }

    /// Zoom level at `now`. Moves monotonically from start to target.
    pub fn level_at(&self, now: u64) -> f64 {
        if !self.active {
            return self.target_level;
        }
        let eased = ease_out_cubic(self.progress(now));
        self.start_level + (self.target_level - self.start_level) * eased
    }

    pub fn is_finished(&self, now: u64) -> bool {
        self.progress(now) >= 1.0
    }
}

/// State machine phase, derived from the viewport state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ViewportPhase {
    #[default]
    Idle,
    GracePeriod,
    Focusing,
    Focused,
}

/// Continuous zoom/pan state owned by the viewport engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewportState {
    pub zoom_level: f64,
    pub target_zoom_level: f64,
    pub center: RelativePoint,
    pub target_center: RelativePoint,
    pub transition: ZoomTransition,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            zoom_level: 1.0,
            target_zoom_level: 1.0,
            center: RelativePoint::CENTER,
            target_center: RelativePoint::CENTER,
            transition: ZoomTransition::idle(1.0),
        }
    }
}

/// Click marker used by the compositor for click effects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickMark {
    pub position: RelativePoint,
    pub ts: u64,
}

/// Read-only copy of the viewport published once per state-machine tick.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewportSnapshot {
    pub ts: u64,
    pub phase: ViewportPhase,
    pub state: ViewportState,
    pub focused: Option<ElementKind>,
    pub zoom_level_name: &'static str,
    pub user_override: bool,
    /// Cursor, recording-relative; `None` before the first sample.
    pub cursor: Option<RelativePoint>,
    pub last_click: Option<ClickMark>,
}

impl Default for ViewportSnapshot {
    fn default() -> Self {
        Self {
            ts: 0,
            phase: ViewportPhase::Idle,
            state: ViewportState::default(),
            focused: None,
            zoom_level_name: ZoomPreset::None.name(),
            user_override: false,
            cursor: None,
            last_click: None,
        }
    }
}
