use serde::Serialize;

use crate::models::events::{CursorPosition, KeyPress, ShapeEstimate};
use crate::models::settings::{TriggerMode, ZoomSettings};
use crate::models::viewport::{
    ClickMark, ElementKind, ElementObservation, ExitCondition, FocusedElement, RecordingBounds,
    RelativePoint, RelativeRect, ViewportPhase, ViewportSnapshot, ViewportState, ZoomPreset,
    ZoomTransition,
};

const ZOOMED_EPSILON: f64 = 0.05;
const EMERGENCY_MIN_LEVEL: f64 = 1.1;
const CENTER_SNAP: f64 = 0.01;
const PRESET_NAME_TOLERANCE: f64 = 0.1;

/// Picks the preset an element justifies from its type, confidence and size.
pub fn select_zoom_preset(observation: &ElementObservation) -> ZoomPreset {
    let confidence = observation.confidence;
    if confidence < 0.7 {
        return ZoomPreset::Low;
    }
    match observation.kind {
        ElementKind::TextField => {
            if confidence >= 0.9 {
                ZoomPreset::High
            } else if confidence >= 0.8 {
                ZoomPreset::Medium
            } else {
                ZoomPreset::Low
            }
        }
        ElementKind::Button => match observation.size.map(|size| size.area()) {
            Some(area) if area > 0.0 => {
                if area < 1_000.0 {
                    ZoomPreset::Maximum
                } else if area < 2_500.0 {
                    ZoomPreset::High
                } else if area < 5_000.0 {
                    ZoomPreset::Medium
                } else {
                    ZoomPreset::Low
                }
            }
            _ if confidence >= 0.9 => ZoomPreset::Medium,
            _ => ZoomPreset::Low,
        },
        ElementKind::Menu | ElementKind::Dropdown => ZoomPreset::Medium,
    }
}

/// Estimated element bounds in recording-relative units, kept fully inside
/// the unit square.
pub fn estimate_element_bounds(
    observation: &ElementObservation,
    bounds: &RecordingBounds,
) -> RelativeRect {
    let (width, height) = match observation.kind {
        ElementKind::TextField => {
            let mut width = 0.15;
            if observation.hit_count > 3 {
                let precision = (observation.hit_count as f64 / 10.0).min(1.0);
                width *= 1.0 + precision * 0.5;
            }
            (width, 0.03)
        }
        ElementKind::Button => match observation.size {
            Some(size) => (
                (size.width / bounds.width).clamp(0.05, 0.2),
                (size.height / bounds.height).clamp(0.03, 0.1),
            ),
            None => (0.08, 0.04),
        },
        ElementKind::Menu | ElementKind::Dropdown => (0.12, 0.15),
    };

    let center = bounds.to_relative(observation.x, observation.y).clamped();
    let cx = center.x.clamp(width * 0.5, 1.0 - width * 0.5);
    let cy = center.y.clamp(height * 0.5, 1.0 - height * 0.5);
    RelativeRect {
        x: cx - width * 0.5,
        y: cy - height * 0.5,
        width,
        height,
    }
}

/// Where the camera should point for an element: text fields sit slightly
/// below centre to show context above, menus leave room for their options.
pub fn element_center(kind: ElementKind, rect: &RelativeRect) -> RelativePoint {
    let center = rect.center();
    let point = match kind {
        ElementKind::TextField => RelativePoint::new(center.x, (center.y - 0.05).max(0.1)),
        ElementKind::Button => center,
        ElementKind::Menu | ElementKind::Dropdown => {
            RelativePoint::new(center.x, (center.y - 0.1).max(0.15))
        }
    };
    point.clamped()
}

/// Transition duration: base duration from the speed setting, scaled by the
/// level change and capped.
pub fn transition_duration_ms(settings: &ZoomSettings, from: f64, to: f64) -> u64 {
    let multiplier = (to - from).abs().clamp(0.5, 2.0);
    (settings.base_transition_ms() * multiplier).round().max(1.0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingTarget {
    level: f64,
    due_ts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct UserOverride {
    level: f64,
    until_ts: u64,
}

/// Introspection view of the engine for debug panels.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineDebugState {
    pub snapshot: ViewportSnapshot,
    pub focused: Option<FocusedElement>,
    pub conflict_count: usize,
    pub pending_exit_conditions: Vec<ExitCondition>,
    pub grace_remaining_ms: u64,
    pub last_click_ts: Option<u64>,
    pub last_activity_ts: Option<u64>,
    pub cursor_shape: ShapeEstimate,
    pub trigger_mode: TriggerMode,
}

/// Zoom/pan state machine.
///
/// Owns the only long-lived camera state: the continuous [`ViewportState`]
/// and the optional [`FocusedElement`]. Every entry point takes the current
/// pipeline time explicitly.
#[derive(Debug, Clone)]
pub struct ViewportEngine {
    settings: ZoomSettings,
    state: ViewportState,
    focused: Option<FocusedElement>,
    conflicts: Vec<ElementObservation>,
    pending_resolution: bool,
    pending_target: Option<PendingTarget>,
    exit_requests: Vec<ExitCondition>,
    bounds: Option<RecordingBounds>,
    recording_started_at: Option<u64>,
    user_override: Option<UserOverride>,
    cursor: Option<CursorPosition>,
    cursor_shape: ShapeEstimate,
    last_move: Option<CursorPosition>,
    rapid_reference: Option<CursorPosition>,
    last_click: Option<ClickMark>,
    last_click_ts: Option<u64>,
    last_activity_ts: Option<u64>,
    last_zoom_change_ts: Option<u64>,
    last_exit_check_ts: Option<u64>,
    last_force_check_ts: Option<u64>,
    last_tick_ts: u64,
}

impl ViewportEngine {
    pub fn new(settings: ZoomSettings) -> Self {
        Self {
            settings,
            state: ViewportState::default(),
            focused: None,
            conflicts: Vec::new(),
            pending_resolution: false,
            pending_target: None,
            exit_requests: Vec::new(),
            bounds: None,
            recording_started_at: None,
            user_override: None,
            cursor: None,
            cursor_shape: ShapeEstimate::unknown(),
            last_move: None,
            rapid_reference: None,
            last_click: None,
            last_click_ts: None,
            last_activity_ts: None,
            last_zoom_change_ts: None,
            last_exit_check_ts: None,
            last_force_check_ts: None,
            last_tick_ts: 0,
        }
    }

    pub fn settings(&self) -> &ZoomSettings {
        &self.settings
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Starts a recording: clean state, grace period from `now`.
    pub fn start_recording(&mut self, now: u64, bounds: RecordingBounds) {
        self.reset_zoom_state();
        self.bounds = Some(bounds);
        self.recording_started_at = Some(now);
        self.last_tick_ts = now;
        log::info!(
            "ViewportEngine: recording started bounds={}x{}@({}, {}) grace={}ms",
            bounds.width,
            bounds.height,
            bounds.x,
            bounds.y,
            self.settings.grace_period_ms
        );
    }

    pub fn stop_recording(&mut self) {
        self.reset_zoom_state();
        self.bounds = None;
        self.recording_started_at = None;
        log::info!("ViewportEngine: recording stopped");
    }

    /// Back to level 1.0, centred, nothing focused. Idempotent.
    pub fn reset_zoom_state(&mut self) {
        self.state = ViewportState::default();
        self.focused = None;
        self.conflicts.clear();
        self.pending_resolution = false;
        self.pending_target = None;
        self.exit_requests.clear();
        self.user_override = None;
        self.cursor = None;
        self.cursor_shape = ShapeEstimate::unknown();
        self.last_move = None;
        self.rapid_reference = None;
        self.last_click = None;
        self.last_click_ts = None;
        self.last_activity_ts = None;
        self.last_zoom_change_ts = None;
        self.last_exit_check_ts = None;
        self.last_force_check_ts = None;
    }

    pub fn is_recording(&self) -> bool {
        self.recording_started_at.is_some()
    }

    pub fn is_in_grace_period(&self, now: u64) -> bool {
        self.recording_started_at
            .map_or(false, |start| now.saturating_sub(start) < self.settings.grace_period_ms)
    }

    pub fn is_user_override_active(&self, now: u64) -> bool {
        self.user_override
            .map_or(false, |user_override| now <= user_override.until_ts)
    }

    // ─── Ingestion ───────────────────────────────────────────────────────────

    /// An element observation from a detector.
    pub fn on_ui_element_detected(&mut self, observation: ElementObservation, now: u64) {
        if !self.settings.enabled || !self.is_recording() {
            return;
        }
        let window = self.settings.conflict_window_ms;
        self.conflicts
            .retain(|candidate| now.saturating_sub(candidate.ts) < window);
        self.conflicts.push(observation);

        if self.is_user_override_active(now) {
            log::debug!(
                "ViewportEngine: user override active, ignoring {}",
                observation.kind.as_str()
            );
            return;
        }
        if self.is_in_grace_period(now) {
            return;
        }
        if !self.cooldown_elapsed(now) {
            self.pending_resolution = true;
            return;
        }
        self.resolve_and_focus(now);
    }

    /// Inferred click at the current cursor position.
    pub fn on_mouse_click(&mut self, now: u64) {
        self.last_click_ts = Some(now);
        self.last_activity_ts = Some(now);
        if let Some(cursor) = self.cursor {
            let point = RelativePoint::new(cursor.relative_x, cursor.relative_y).clamped();
            self.last_click = Some(ClickMark {
                position: point,
                ts: now,
            });
            if self.focused.is_none() {
                self.state.target_center = point;
            }
        }

        if let Some(focused) = self.focused {
            let condition = match self.cursor {
                Some(cursor)
                    if focused.observation.distance_to(cursor.x, cursor.y)
                        > self.settings.click_outside_px =>
                {
                    ExitCondition::ClickOutside
                }
                _ => ExitCondition::Click,
            };
            self.add_exit_condition(condition, now);
        }

        if self.settings.enabled
            && matches!(self.settings.trigger_mode, TriggerMode::Click | TriggerMode::Both)
        {
            self.reevaluate(now);
        }
    }

    /// Cursor shape changed; recentres the pan target when nothing is focused.
    pub fn on_cursor_type_change(&mut self, x: f64, y: f64, shape: ShapeEstimate) {
        self.cursor_shape = shape;
        if self.focused.is_some() {
            return;
        }
        if let Some(bounds) = self.bounds {
            self.state.target_center = bounds.to_relative(x, y).clamped();
        }
    }

    /// Raw position update at the cursor cadence.
    pub fn update_mouse_position(&mut self, position: CursorPosition, now: u64) {
        self.cursor = Some(position);
        if !self.settings.enabled {
            return;
        }
        self.check_cursor_leave(position, now);
        if !position.is_inside() {
            return;
        }

        let speed = match self.last_move {
            Some(last) if now > last.ts => {
                (position.x - last.x).hypot(position.y - last.y) / (now - last.ts) as f64
            }
            _ => 0.0,
        };
        self.last_move = Some(CursorPosition { ts: now, ..position });

        let moving = speed > self.settings.velocity_threshold();
        if moving {
            self.last_activity_ts = Some(now);
        }

        if self.focused.is_none() && (self.is_zoomed() || moving) {
            self.state.target_center =
                RelativePoint::new(position.relative_x, position.relative_y).clamped();
        }

        self.check_rapid_movement(position, now);
    }

    /// Leaving the recording bounds counts as leaving the element.
    fn check_cursor_leave(&mut self, position: CursorPosition, now: u64) {
        let Some(focused) = self.focused else {
            return;
        };
        if !focused.rule.exits_on(ExitCondition::CursorLeave)
            || self.exit_requests.contains(&ExitCondition::CursorLeave)
        {
            return;
        }
        let left = !position.is_inside()
            || focused.observation.distance_to(position.x, position.y)
                > self.settings.cursor_leave_px;
        if left {
            self.add_exit_condition(ExitCondition::CursorLeave, now);
        }
    }

    pub fn on_key_press(&mut self, key: &KeyPress, now: u64) {
        if key.is_escape() {
            self.add_exit_condition(ExitCondition::EscapeKey, now);
        }
    }

    /// Raises an exit condition and checks it immediately.
    pub fn add_exit_condition(&mut self, condition: ExitCondition, now: u64) {
        if !self.exit_requests.contains(&condition) {
            self.exit_requests.push(condition);
        }
        log::debug!("ViewportEngine: exit condition {condition:?} raised");
        self.check_exit_conditions(now);
    }

    /// Pins the zoom level for the override window and drops element control.
    pub fn activate_user_override(&mut self, level: f64, now: u64) {
        let level = if level.is_finite() {
            level.clamp(ZoomPreset::None.level(), ZoomPreset::Maximum.level())
        } else {
            ZoomPreset::None.level()
        };
        self.user_override = Some(UserOverride {
            level,
            until_ts: now.saturating_add(self.settings.user_override_ms),
        });
        self.focused = None;
        self.conflicts.clear();
        self.pending_resolution = false;
        self.pending_target = None;
        self.exit_requests.clear();
        log::info!(
            "ViewportEngine: user override to {level:.2} for {}ms",
            self.settings.user_override_ms
        );
        let target = if self.is_in_grace_period(now) { 1.0 } else { level };
        self.retarget(target, now, None);
    }

    // ─── Periodic work ───────────────────────────────────────────────────────

    /// State-machine tick: animation, pan lag, deferred work and the
    /// interval-driven safety checks.
    pub fn tick(&mut self, now: u64) {
        self.last_tick_ts = now;
        self.advance_zoom(now);

        if let Some(user_override) = self.user_override {
            if now > user_override.until_ts {
                self.user_override = None;
                log::info!("ViewportEngine: user override expired");
            }
        }

        if let Some(pending) = self.pending_target {
            if now >= pending.due_ts {
                self.pending_target = None;
                if !self.is_in_grace_period(now) && !self.is_user_override_active(now) {
                    self.retarget(pending.level, now, None);
                }
            }
        }

        if self.pending_resolution
            && self.cooldown_elapsed(now)
            && !self.is_in_grace_period(now)
            && !self.is_user_override_active(now)
        {
            self.resolve_and_focus(now);
        }

        if interval_due(
            &mut self.last_exit_check_ts,
            now,
            self.settings.exit_check_interval_ms,
        ) {
            self.check_exit_conditions(now);
        }
        if interval_due(
            &mut self.last_force_check_ts,
            now,
            self.settings.force_check_interval_ms,
        ) {
            self.force_zoom_out_if_needed(now);
        }

        self.update_center();
    }

    /// Re-derives the zoom target from grace, triggers and focus.
    pub fn reevaluate(&mut self, now: u64) {
        if !self.settings.enabled {
            self.retarget(ZoomPreset::None.level(), now, None);
            return;
        }
        if self.is_in_grace_period(now) {
            self.retarget(ZoomPreset::None.level(), now, None);
            return;
        }
        if let Some(user_override) = self.user_override {
            if now <= user_override.until_ts {
                self.retarget(user_override.level, now, None);
                return;
            }
        }

        let target = if !self.is_zoom_justified(now) {
            match self.focused {
                Some(focused) if focused.rule.persistent => select_zoom_preset(&focused.observation),
                Some(_) => {
                    self.clear_focus("inactive");
                    ZoomPreset::None
                }
                None => ZoomPreset::None,
            }
        } else {
            match self.focused {
                Some(focused) if !focused.rule.is_expired(focused.acquired_at, now) => {
                    select_zoom_preset(&focused.observation)
                }
                Some(_) => {
                    self.clear_focus("expired");
                    ZoomPreset::None
                }
                None => ZoomPreset::nearest(self.settings.level),
            }
        };

        if (target.level() - self.state.zoom_level).abs() > self.settings.retarget_epsilon
            || (target.level() - self.state.target_zoom_level).abs() > f64::EPSILON
        {
            self.retarget(target.level(), now, None);
        }
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    pub fn focused(&self) -> Option<&FocusedElement> {
        self.focused.as_ref()
    }

    pub fn phase(&self, now: u64) -> ViewportPhase {
        if self.is_in_grace_period(now) {
            ViewportPhase::GracePeriod
        } else if self.state.transition.active
            && (self.state.transition.target_level - 1.0).abs() > ZOOMED_EPSILON
        {
            ViewportPhase::Focusing
        } else if self.is_zoomed() {
            ViewportPhase::Focused
        } else {
            ViewportPhase::Idle
        }
    }

    /// Preset name within 0.1 of the current level, else `custom`.
    pub fn current_zoom_level_name(&self) -> &'static str {
        ZoomPreset::matching(self.state.zoom_level, PRESET_NAME_TOLERANCE)
            .map_or("custom", ZoomPreset::name)
    }

    pub fn snapshot(&self, now: u64) -> ViewportSnapshot {
        ViewportSnapshot {
            ts: now,
            phase: self.phase(now),
            state: self.state,
            focused: self.focused.map(|focused| focused.kind),
            zoom_level_name: self.current_zoom_level_name(),
            user_override: self.is_user_override_active(now),
            cursor: self
                .cursor
                .map(|cursor| RelativePoint::new(cursor.relative_x, cursor.relative_y)),
            last_click: self.last_click,
        }
    }

    pub fn debug_state(&self, now: u64) -> EngineDebugState {
        let grace_remaining_ms = self.recording_started_at.map_or(0, |start| {
            self.settings
                .grace_period_ms
                .saturating_sub(now.saturating_sub(start))
        });
        EngineDebugState {
            snapshot: self.snapshot(now),
            focused: self.focused,
            conflict_count: self.conflicts.len(),
            pending_exit_conditions: self.exit_requests.clone(),
            grace_remaining_ms,
            last_click_ts: self.last_click_ts,
            last_activity_ts: self.last_activity_ts,
            cursor_shape: self.cursor_shape,
            trigger_mode: self.settings.trigger_mode,
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn is_zoomed(&self) -> bool {
        self.state.zoom_level > 1.0 + ZOOMED_EPSILON
            || self.state.target_zoom_level > 1.0 + ZOOMED_EPSILON
    }

    fn cooldown_elapsed(&self, now: u64) -> bool {
        self.last_zoom_change_ts
            .map_or(true, |last| now.saturating_sub(last) >= self.settings.cooldown_ms)
    }

    fn recent(&self, ts: Option<u64>, now: u64) -> bool {
        ts.map_or(false, |ts| now.saturating_sub(ts) <= self.settings.activity_window_ms)
    }

    fn is_zoom_justified(&self, now: u64) -> bool {
        let clicked = self.recent(self.last_click_ts, now);
        let moved = self.recent(self.last_activity_ts, now);
        match self.settings.trigger_mode {
            TriggerMode::Click => clicked,
            TriggerMode::Mouse => moved,
            TriggerMode::Both => clicked || moved,
        }
    }

    /// Highest priority in the conflict window wins; ties go to the most recent.
    fn resolve_conflicts(&mut self, now: u64) -> Option<(ElementObservation, bool)> {
        let window = self.settings.conflict_window_ms;
        self.conflicts
            .retain(|candidate| now.saturating_sub(candidate.ts) < window);
        let contested = self.conflicts.len() > 1;
        let winner = self.conflicts.iter().copied().max_by(|a, b| {
            a.kind
                .priority()
                .cmp(&b.kind.priority())
                .then(a.ts.cmp(&b.ts))
        })?;
        if contested {
            log::info!(
                "ViewportEngine: conflict between {} observations resolved to {}",
                self.conflicts.len(),
                winner.kind.as_str()
            );
        }
        Some((winner, contested))
    }

    fn resolve_and_focus(&mut self, now: u64) {
        self.pending_resolution = false;
        let Some((winner, contested)) = self.resolve_conflicts(now) else {
            return;
        };
        let Some(bounds) = self.bounds else {
            return;
        };

        let previous = self.focused;
        if let Some(current) = previous {
            if current.observation == winner {
                return;
            }
        }

        let rect = estimate_element_bounds(&winner, &bounds);
        self.focused = Some(FocusedElement::new(winner, rect, now));
        self.exit_requests.clear();

        let target = select_zoom_preset(&winner).level();
        if (target - self.state.target_zoom_level).abs() <= f64::EPSILON {
            return;
        }
        log::info!(
            "ViewportEngine: focusing {} confidence={:.2} zoom {:.2} -> {:.2}",
            winner.kind.as_str(),
            winner.confidence,
            self.state.target_zoom_level,
            target
        );

        match previous {
            Some(previous) if contested => {
                let from = select_zoom_preset(&previous.observation).level();
                if (target - from).abs() > self.settings.conflict_split_delta {
                    let midpoint = (from + target) * 0.5;
                    self.retarget(midpoint, now, None);
                    self.pending_target = Some(PendingTarget {
                        level: target,
                        due_ts: now + self.settings.conflict_split_delay_ms,
                    });
                } else {
                    self.retarget(target, now, None);
                }
            }
            _ => self.retarget(target, now, None),
        }
    }

    fn clear_focus(&mut self, reason: &str) {
        if let Some(focused) = self.focused.take() {
            log::info!(
                "ViewportEngine: releasing {} ({reason})",
                focused.kind.as_str()
            );
        }
        self.exit_requests.clear();
    }

    fn check_exit_conditions(&mut self, now: u64) -> bool {
        let Some(focused) = self.focused else {
            self.exit_requests.clear();
            return false;
        };
        if self.is_user_override_active(now) {
            return false;
        }

        let reason = if focused.rule.is_expired(focused.acquired_at, now) {
            Some(ExitCondition::Timeout)
        } else {
            self.exit_requests
                .iter()
                .copied()
                .find(|condition| focused.rule.exits_on(*condition))
        };

        match reason {
            Some(condition) => {
                self.exit_zoom(condition, now);
                true
            }
            None => false,
        }
    }

    fn exit_zoom(&mut self, reason: ExitCondition, now: u64) {
        log::info!("ViewportEngine: exiting zoom ({reason:?})");
        self.clear_focus("exit");
        self.conflicts.clear();
        self.pending_resolution = false;
        self.pending_target = None;
        let target = if self.is_user_override_active(now) {
            self.user_override
                .map_or(ZoomPreset::None.level(), |user_override| user_override.level)
        } else {
            ZoomPreset::None.level()
        };
        self.retarget(target, now, None);
    }

    fn check_rapid_movement(&mut self, position: CursorPosition, now: u64) {
        let Some(reference) = self.rapid_reference else {
            self.rapid_reference = Some(CursorPosition { ts: now, ..position });
            return;
        };
        let elapsed = now.saturating_sub(reference.ts);
        if elapsed < self.settings.rapid_check_interval_ms {
            return;
        }
        self.rapid_reference = Some(CursorPosition { ts: now, ..position });

        let distance = (position.x - reference.x).hypot(position.y - reference.y);
        let px_per_s = distance / (elapsed as f64 / 1_000.0);
        if px_per_s > self.settings.rapid_movement_px_per_s
            && self.state.zoom_level > EMERGENCY_MIN_LEVEL
            && !self.is_user_override_active(now)
        {
            log::info!("ViewportEngine: rapid movement {px_per_s:.0}px/s, emergency zoom-out");
            self.emergency_zoom_out(now);
        }
    }

    fn emergency_zoom_out(&mut self, now: u64) {
        self.clear_focus("emergency");
        self.conflicts.clear();
        self.pending_resolution = false;
        self.pending_target = None;
        let duration = self.settings.emergency_transition_ms;
        self.retarget(ZoomPreset::None.level(), now, Some(duration));
    }

    fn force_zoom_out_if_needed(&mut self, now: u64) {
        if self.is_in_grace_period(now) {
            if self.state.zoom_level > EMERGENCY_MIN_LEVEL {
                self.retarget(ZoomPreset::None.level(), now, None);
            }
            return;
        }
        if self.is_user_override_active(now)
            || self.state.zoom_level <= EMERGENCY_MIN_LEVEL
            || self.focused.map_or(false, |focused| focused.rule.persistent)
        {
            return;
        }
        let idle = |ts: Option<u64>| {
            ts.map_or(true, |ts| now.saturating_sub(ts) > self.settings.force_inactivity_ms)
        };
        if idle(self.last_click_ts) && idle(self.last_activity_ts) {
            log::info!("ViewportEngine: zoomed without activity, forcing zoom-out");
            self.clear_focus("inactivity");
            self.retarget(ZoomPreset::None.level(), now, None);
        }
    }

    /// Sets a new target and starts a transition from the current level.
    fn retarget(&mut self, target: f64, now: u64, duration_override: Option<u64>) {
        self.advance_zoom(now);
        let same_target = (target - self.state.target_zoom_level).abs() <= f64::EPSILON;
        if same_target && (self.state.transition.active || self.state.zoom_level == target) {
            return;
        }

        let from = self.state.zoom_level;
        let duration =
            duration_override.unwrap_or_else(|| transition_duration_ms(&self.settings, from, target));
        self.state.target_zoom_level = target;
        self.state.transition = ZoomTransition::start(from, target, now, duration);
        self.last_zoom_change_ts = Some(now);
        log::debug!("ViewportEngine: transition {from:.2} -> {target:.2} over {duration}ms");
    }

    fn advance_zoom(&mut self, now: u64) {
        let transition = self.state.transition;
        if !transition.active {
            return;
        }
        if transition.is_finished(now) {
            self.state.zoom_level = transition.target_level;
            self.state.transition.active = false;
        } else {
            self.state.zoom_level = transition.level_at(now).max(f64::MIN_POSITIVE);
        }
    }

    fn update_center(&mut self) {
        let zoomed = self.is_zoomed();
        let lag = match self.focused {
            Some(focused) => {
                let goal = element_center(focused.kind, &focused.bounds);
                let target = self.state.target_center;
                let smoothing = self.settings.center_smoothing;
                let next = RelativePoint::new(
                    target.x + (goal.x - target.x) * smoothing,
                    target.y + (goal.y - target.y) * smoothing,
                );
                self.state.target_center =
                    if (next.x - goal.x).abs() < CENTER_SNAP && (next.y - goal.y).abs() < CENTER_SNAP {
                        goal
                    } else {
                        next
                    };
                if zoomed {
                    self.settings.element_lag_zoomed
                } else {
                    self.settings.element_lag_normal
                }
            }
            None if zoomed => self.settings.follow_lag_zoomed,
            None => self.settings.follow_lag_normal,
        };

        self.state.target_center = self.state.target_center.clamped();
        let center = self.state.center;
        let target = self.state.target_center;
        self.state.center = RelativePoint::new(
            center.x + (target.x - center.x) * lag,
            center.y + (target.y - center.y) * lag,
        )
        .clamped();
    }
}

/// True when `interval_ms` has elapsed since `last`; records `now` if so.
fn interval_due(last: &mut Option<u64>, now: u64, interval_ms: u64) -> bool {
    match *last {
        Some(ts) if now.saturating_sub(ts) < interval_ms => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::viewport::SizeEstimate;

    fn bounds() -> RecordingBounds {
        RecordingBounds::new(0.0, 0.0, 1_920.0, 1_080.0)
    }

    fn engine() -> ViewportEngine {
        let mut engine = ViewportEngine::new(ZoomSettings::default());
        engine.start_recording(0, bounds());
        engine
    }

    fn move_to(engine: &mut ViewportEngine, x: f64, y: f64, ts: u64) {
        let position = bounds().position(x, y, ts);
        engine.update_mouse_position(position, ts);
    }

    fn run_ticks(engine: &mut ViewportEngine, from: u64, to: u64) {
        let mut ts = from;
        while ts <= to {
            engine.tick(ts);
            ts += 16;
        }
    }

    fn text_field(x: f64, y: f64, confidence: f64, ts: u64) -> ElementObservation {
        ElementObservation::new(ElementKind::TextField, x, y, confidence, ts)
    }

    #[test]
    fn grace_period_holds_base_level_for_clicks() {
        for mode in [TriggerMode::Click, TriggerMode::Mouse, TriggerMode::Both] {
            let mut engine = ViewportEngine::new(ZoomSettings {
                trigger_mode: mode,
                ..ZoomSettings::default()
            });
            engine.start_recording(0, bounds());
            move_to(&mut engine, 500.0, 500.0, 0);
            engine.on_mouse_click(0);
            for ts in (0..2_000).step_by(100) {
                move_to(&mut engine, 500.0 + ts as f64, 500.0, ts);
                engine.reevaluate(ts);
                engine.tick(ts);
                assert_eq!(engine.state().target_zoom_level, 1.0, "mode {mode:?} at {ts}");
            }
        }
    }

    #[test]
    fn click_after_grace_zooms_to_configured_preset() {
        let mut engine = engine();
        move_to(&mut engine, 960.0, 540.0, 2_500);
        engine.on_mouse_click(2_500);
        assert_eq!(engine.state().target_zoom_level, ZoomPreset::Low.level());
        run_ticks(&mut engine, 2_500, 3_200);
        assert!((engine.state().zoom_level - 1.5).abs() < 1e-9);
        assert_eq!(engine.current_zoom_level_name(), "low");
    }

    #[test]
    fn conflicting_button_and_text_field_resolve_to_text_field() {
        let mut engine = engine();
        let button = ElementObservation::new(ElementKind::Button, 400.0, 300.0, 0.9, 3_000);
        engine.on_ui_element_detected(button, 3_000);
        engine.on_ui_element_detected(text_field(420.0, 310.0, 0.85, 3_000), 3_000);
        run_ticks(&mut engine, 3_000, 3_400);
        assert_eq!(
            engine.focused().map(|focused| focused.kind),
            Some(ElementKind::TextField)
        );

        let mut reversed = self::engine();
        reversed.on_ui_element_detected(text_field(420.0, 310.0, 0.85, 3_000), 3_000);
        let button = ElementObservation::new(ElementKind::Button, 400.0, 300.0, 0.9, 3_050);
        reversed.on_ui_element_detected(button, 3_050);
        run_ticks(&mut reversed, 3_050, 3_500);
        assert_eq!(
            reversed.focused().map(|focused| focused.kind),
            Some(ElementKind::TextField)
        );
    }

    #[test]
    fn persistent_text_field_survives_until_escape() {
        let mut engine = engine();
        move_to(&mut engine, 600.0, 400.0, 2_000);
        engine.on_ui_element_detected(text_field(600.0, 400.0, 0.95, 2_000), 2_000);
        let acquired = engine.focused().expect("focused").acquired_at;

        let mut ts = 2_000;
        while ts <= acquired + 9_000 {
            engine.tick(ts);
            if ts % 500 == 0 {
                engine.reevaluate(ts);
            }
            ts += 50;
        }
        assert_eq!(
            engine.focused().map(|focused| focused.kind),
            Some(ElementKind::TextField)
        );
        assert_eq!(engine.state().target_zoom_level, ZoomPreset::High.level());

        engine.on_key_press(&KeyPress::new("Escape", ts), ts);
        assert!(engine.focused().is_none());
        assert_eq!(engine.state().target_zoom_level, 1.0);
    }

    #[test]
    fn button_focus_expires_after_duration() {
        let mut engine = engine();
        move_to(&mut engine, 400.0, 300.0, 2_500);
        engine.on_mouse_click(2_500);
        let button = ElementObservation::new(ElementKind::Button, 400.0, 300.0, 0.9, 2_900)
            .with_size(SizeEstimate {
                width: 30.0,
                height: 20.0,
            });
        engine.on_ui_element_detected(button, 2_900);
        assert_eq!(engine.state().target_zoom_level, ZoomPreset::Maximum.level());

        run_ticks(&mut engine, 2_900, 5_800);
        assert!(engine.focused().is_some());
        run_ticks(&mut engine, 5_812, 6_000);
        assert!(engine.focused().is_none());
    }

    #[test]
    fn click_far_from_text_field_exits() {
        let mut engine = engine();
        move_to(&mut engine, 600.0, 400.0, 2_000);
        engine.on_ui_element_detected(text_field(600.0, 400.0, 0.95, 2_000), 2_000);
        move_to(&mut engine, 680.0, 400.0, 2_500);
        engine.on_mouse_click(2_500);
        assert!(engine.focused().is_none());
    }

    #[test]
    fn cursor_leaving_focused_element_exits() {
        let mut engine = engine();
        move_to(&mut engine, 600.0, 400.0, 2_000);
        engine.on_ui_element_detected(text_field(600.0, 400.0, 0.95, 2_000), 2_000);
        move_to(&mut engine, 650.0, 420.0, 2_016);
        assert!(engine.focused().is_some());
        move_to(&mut engine, 900.0, 420.0, 2_600);
        assert!(engine.focused().is_none());
    }

    #[test]
    fn cursor_leaving_recording_bounds_exits_edge_field() {
        let mut engine = engine();
        move_to(&mut engine, 1_850.0, 500.0, 2_000);
        engine.on_ui_element_detected(text_field(1_850.0, 500.0, 0.95, 2_000), 2_000);
        move_to(&mut engine, 1_900.0, 500.0, 2_300);
        assert!(engine.focused().is_some());

        move_to(&mut engine, 1_930.0, 500.0, 2_600);
        assert!(engine.focused().is_none());
        assert_eq!(engine.state().target_zoom_level, 1.0);

        let mut ts = 2_616;
        while ts <= 13_000 {
            move_to(&mut engine, 1_930.0 + (ts - 2_600) as f64 * 0.07, 500.0, ts);
            engine.tick(ts);
            ts += 16;
        }
        assert!(engine.focused().is_none());
    }

    #[test]
    fn reset_is_idempotent() {
        let mut engine = engine();
        move_to(&mut engine, 600.0, 400.0, 2_000);
        engine.on_ui_element_detected(text_field(600.0, 400.0, 0.95, 2_000), 2_000);
        run_ticks(&mut engine, 2_000, 2_500);

        engine.reset_zoom_state();
        let once = (*engine.state(), engine.focused().copied());
        engine.reset_zoom_state();
        let twice = (*engine.state(), engine.focused().copied());
        assert_eq!(once, twice);
        assert_eq!(once.0.zoom_level, 1.0);
        assert!(once.1.is_none());
    }

    #[test]
    fn center_stays_in_unit_square() {
        let mut engine = engine();
        move_to(&mut engine, 960.0, 540.0, 2_100);
        engine.on_mouse_click(2_100);
        let mut ts = 2_100;
        for step in 0..400i64 {
            let x = (step * 137 % 2_600) as f64 - 300.0;
            let y = (step * 89 % 1_500) as f64 - 200.0;
            move_to(&mut engine, x, y, ts);
            engine.tick(ts);
            let center = engine.state().center;
            assert!((0.0..=1.0).contains(&center.x));
            assert!((0.0..=1.0).contains(&center.y));
            ts += 16;
        }
    }

    #[test]
    fn zoom_level_moves_monotonically_toward_target() {
        let mut engine = engine();
        move_to(&mut engine, 960.0, 540.0, 2_500);
        engine.on_ui_element_detected(text_field(960.0, 540.0, 0.95, 2_500), 2_500);
        let target = engine.state().target_zoom_level;
        let mut previous = engine.state().zoom_level;
        let mut ts = 2_500;
        while ts < 3_500 {
            engine.tick(ts);
            let level = engine.state().zoom_level;
            assert!(level >= previous - 1e-12);
            assert!(level <= target + 1e-12);
            previous = level;
            ts += 16;
        }
        assert!((previous - target).abs() < 1e-9);
    }

    #[test]
    fn large_conflict_jump_goes_through_midpoint() {
        let mut engine = engine();
        move_to(&mut engine, 400.0, 300.0, 2_500);
        let low_text = text_field(400.0, 300.0, 0.75, 2_500);
        engine.on_ui_element_detected(low_text, 2_500);
        assert_eq!(engine.state().target_zoom_level, ZoomPreset::Low.level());

        let menu = ElementObservation::new(ElementKind::Menu, 410.0, 305.0, 0.9, 2_900);
        engine.on_ui_element_detected(menu, 2_900);
        assert_eq!(
            engine.focused().map(|focused| focused.kind),
            Some(ElementKind::TextField)
        );

        let mut fresh = self::engine();
        let button = ElementObservation::new(ElementKind::Button, 400.0, 300.0, 0.75, 2_500)
            .with_size(SizeEstimate {
                width: 100.0,
                height: 80.0,
            });
        fresh.on_ui_element_detected(button, 2_500);
        assert_eq!(fresh.state().target_zoom_level, ZoomPreset::Low.level());
        fresh.on_ui_element_detected(text_field(400.0, 300.0, 0.95, 2_900), 2_900);
        let midpoint = (ZoomPreset::Low.level() + ZoomPreset::High.level()) * 0.5;
        assert!((fresh.state().target_zoom_level - midpoint).abs() < 1e-9);
        run_ticks(&mut fresh, 2_900, 3_300);
        assert_eq!(fresh.state().target_zoom_level, ZoomPreset::High.level());
    }

    #[test]
    fn user_override_pins_level_and_ignores_elements() {
        let mut engine = engine();
        engine.activate_user_override(1.8, 3_000);
        engine.on_ui_element_detected(text_field(100.0, 100.0, 0.95, 3_100), 3_100);
        assert!(engine.focused().is_none());
        engine.reevaluate(3_500);
        assert_eq!(engine.state().target_zoom_level, 1.8);
        assert!(engine.snapshot(3_500).user_override);

        run_ticks(&mut engine, 3_500, 8_200);
        engine.reevaluate(8_200);
        assert_eq!(engine.state().target_zoom_level, 1.0);
    }

    #[test]
    fn rapid_movement_triggers_emergency_zoom_out() {
        let mut engine = engine();
        move_to(&mut engine, 960.0, 540.0, 2_500);
        engine.on_mouse_click(2_500);
        run_ticks(&mut engine, 2_500, 3_200);
        assert!(engine.state().zoom_level > 1.1);

        move_to(&mut engine, 960.0, 540.0, 3_300);
        move_to(&mut engine, 1_400.0, 540.0, 3_400);
        assert_eq!(engine.state().target_zoom_level, 1.0);
        assert_eq!(engine.state().transition.duration_ms, 200);
    }

    #[test]
    fn idle_zoom_is_forced_out() {
        let mut engine = engine();
        move_to(&mut engine, 960.0, 540.0, 2_500);
        engine.on_mouse_click(2_500);
        run_ticks(&mut engine, 2_500, 3_000);
        assert!(engine.state().zoom_level > 1.1);
        run_ticks(&mut engine, 3_000, 13_000);
        assert_eq!(engine.state().target_zoom_level, 1.0);
    }

    #[test]
    fn zoom_level_names_follow_presets() {
        let mut engine = engine();
        assert_eq!(engine.current_zoom_level_name(), "none");
        engine.activate_user_override(2.0, 3_000);
        run_ticks(&mut engine, 3_000, 4_000);
        assert_eq!(engine.current_zoom_level_name(), "custom");
    }

    #[test]
    fn element_helpers_match_layout_rules() {
        let button = ElementObservation::new(ElementKind::Button, 1_910.0, 5.0, 0.9, 0);
        let rect = estimate_element_bounds(&button, &bounds());
        assert!((rect.x + rect.width - 1.0).abs() < 1e-9);
        assert!(rect.y.abs() < 1e-9);

        let text = text_field(960.0, 540.0, 0.9, 0).with_hits(10);
        let rect = estimate_element_bounds(&text, &bounds());
        assert!((rect.width - 0.225).abs() < 1e-9);
        let center = element_center(ElementKind::TextField, &rect);
        assert!((center.y - 0.45).abs() < 1e-9);

        let menu = ElementObservation::new(ElementKind::Menu, 100.0, 20.0, 0.9, 0);
        let rect = estimate_element_bounds(&menu, &bounds());
        assert!((element_center(ElementKind::Menu, &rect).y - 0.15).abs() < 1e-9);
    }

    #[test]
    fn preset_selection_follows_confidence_and_size() {
        let text = |confidence| text_field(0.0, 0.0, confidence, 0);
        assert_eq!(select_zoom_preset(&text(0.95)), ZoomPreset::High);
        assert_eq!(select_zoom_preset(&text(0.85)), ZoomPreset::Medium);
        assert_eq!(select_zoom_preset(&text(0.75)), ZoomPreset::Low);
        assert_eq!(select_zoom_preset(&text(0.5)), ZoomPreset::Low);

        let button = |width, height| {
            ElementObservation::new(ElementKind::Button, 0.0, 0.0, 0.85, 0)
                .with_size(SizeEstimate { width, height })
        };
        assert_eq!(select_zoom_preset(&button(30.0, 30.0)), ZoomPreset::Maximum);
        assert_eq!(select_zoom_preset(&button(60.0, 30.0)), ZoomPreset::High);
        assert_eq!(select_zoom_preset(&button(100.0, 40.0)), ZoomPreset::Medium);
        assert_eq!(select_zoom_preset(&button(200.0, 40.0)), ZoomPreset::Low);
    }

    #[test]
    fn transition_duration_scales_with_level_change() {
        let settings = ZoomSettings::default();
        assert_eq!(transition_duration_ms(&settings, 1.0, 1.2), 150);
        assert_eq!(transition_duration_ms(&settings, 1.0, 2.2), 360);
        assert_eq!(transition_duration_ms(&settings, 2.5, 1.0), 450);
    }
}
