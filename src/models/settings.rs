//! Tunable engine settings.
//!
//! Every heuristic threshold lives here with the default the pipeline was
//! tuned against. Settings arrive as JSON from the host application; values
//! outside their usable range are clamped by [`EngineSettings::sanitized`]
//! rather than rejected, so a bad setting never stops a recording.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which recent activity justifies zooming in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case", from = "String")]
pub enum TriggerMode {
    #[default]
    Click,
    Mouse,
    Both,
}

impl From<String> for TriggerMode {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "click" => TriggerMode::Click,
            "mouse" => TriggerMode::Mouse,
            "both" => TriggerMode::Both,
            other => {
                log::warn!("TriggerMode: unsupported trigger mode '{other}', using click");
                TriggerMode::Click
            }
        }
    }
}

/// Click overlay animation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClickAnimation {
    #[default]
    Ripple,
    Pulse,
    Ring,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoomSettings {
    pub enabled: bool,
    /// Configured magnification, snapped to the nearest preset when used.
    pub level: f64,
    /// 1 (slow) ..= 5 (fast).
    pub speed: u8,
    /// 1 ..= 10; higher means smaller movements count as activity.
    pub sensitivity: u8,
    pub trigger_mode: TriggerMode,
    pub grace_period_ms: u64,
    pub activity_window_ms: u64,
    pub cooldown_ms: u64,
    pub conflict_window_ms: u64,
    /// Zoom jumps larger than this are split through the midpoint.
    pub conflict_split_delta: f64,
    pub conflict_split_delay_ms: u64,
    pub center_smoothing: f64,
    pub follow_lag_zoomed: f64,
    pub follow_lag_normal: f64,
    pub element_lag_zoomed: f64,
    pub element_lag_normal: f64,
    pub user_override_ms: u64,
    pub emergency_transition_ms: u64,
    pub rapid_movement_px_per_s: f64,
    pub rapid_check_interval_ms: u64,
    pub reevaluate_interval_ms: u64,
    pub exit_check_interval_ms: u64,
    pub force_check_interval_ms: u64,
    pub force_inactivity_ms: u64,
    pub click_outside_px: f64,
    pub cursor_leave_px: f64,
    /// Minimum level change that starts a new transition.
    pub retarget_epsilon: f64,
}

impl Default for ZoomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 1.5,
            speed: 3,
            sensitivity: 5,
            trigger_mode: TriggerMode::Click,
            grace_period_ms: 2_000,
            activity_window_ms: 8_000,
            cooldown_ms: 300,
            conflict_window_ms: 2_000,
            conflict_split_delta: 0.5,
            conflict_split_delay_ms: 300,
            center_smoothing: 0.15,
            follow_lag_zoomed: 0.2,
            follow_lag_normal: 0.1,
            element_lag_zoomed: 0.08,
            element_lag_normal: 0.05,
            user_override_ms: 5_000,
            emergency_transition_ms: 200,
            rapid_movement_px_per_s: 500.0,
            rapid_check_interval_ms: 100,
            reevaluate_interval_ms: 500,
            exit_check_interval_ms: 1_000,
            force_check_interval_ms: 2_000,
            force_inactivity_ms: 10_000,
            click_outside_px: 50.0,
            cursor_leave_px: 200.0,
            retarget_epsilon: 0.05,
        }
    }
}

impl ZoomSettings {
    /// Base transition duration: `(6 - speed) * 100` ms.
    pub fn base_transition_ms(&self) -> f64 {
        (6.0 - self.speed.clamp(1, 5) as f64) * 100.0
    }

    /// Movement-activity threshold, px/ms.
    pub fn velocity_threshold(&self) -> f64 {
        2.0 * (11.0 - self.sensitivity.clamp(1, 10) as f64) / 10.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MouseSettings {
    pub highlight: bool,
    pub highlight_size: f64,
    /// `#rrggbb`.
    pub highlight_color: String,
    pub click_effects: bool,
    pub click_animation: ClickAnimation,
    pub click_effect_ms: u64,
}

impl Default for MouseSettings {
    fn default() -> Self {
        Self {
            highlight: true,
            highlight_size: 3.0,
            highlight_color: "#1db954".to_string(),
            click_effects: false,
            click_animation: ClickAnimation::Ripple,
            click_effect_ms: 1_000,
        }
    }
}

impl MouseSettings {
    /// Parses `highlight_color`; falls back to the default green.
    pub fn highlight_rgb(&self) -> [u8; 3] {
        parse_hex_color(&self.highlight_color).unwrap_or([0x1d, 0xb9, 0x54])
    }
}

fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

/// Activity classifier thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierSettings {
    pub history_len: usize,
    pub shape_window: usize,
    pub click_still_px: f64,
    pub click_min_pause_ms: u64,
    pub click_max_pause_ms: u64,
    pub click_debounce_ms: u64,
    /// Average per-sample movement below which the cursor dwells.
    pub text_max_movement_px: f64,
    pub text_min_dwell_ms: u64,
    /// Dwell at which text confidence saturates.
    pub text_full_dwell_ms: u64,
    pub pointer_max_movement_px: f64,
    pub grabbing_min_speed_px_per_ms: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            history_len: 50,
            shape_window: 5,
            click_still_px: 2.0,
            click_min_pause_ms: 80,
            click_max_pause_ms: 400,
            click_debounce_ms: 1_000,
            text_max_movement_px: 1.5,
            text_min_dwell_ms: 150,
            text_full_dwell_ms: 1_000,
            pointer_max_movement_px: 12.0,
            grabbing_min_speed_px_per_ms: 1.5,
        }
    }
}

/// Heat map geometry for one detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeatMapSettings {
    pub grid_px: f64,
    pub retention_ms: u64,
    pub lookup_radius_px: f64,
    pub confidence_floor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionSettings {
    pub emit_threshold: f64,
    pub field_heat_map: HeatMapSettings,
    pub button_heat_map: HeatMapSettings,
    pub text_shape_strong: f64,
    pub text_shape_weak: f64,
    pub pointer_shape_strong: f64,
    pub pointer_shape_weak: f64,
    pub weak_signal_weight: f64,
    pub click_to_type_window_ms: u64,
    pub hover_min_ms: u64,
    pub hover_max_ms: u64,
    pub hover_still_px: f64,
    pub hover_history_len: usize,
    pub velocity_history_len: usize,
    /// Final speed that counts as coming to rest, px/s.
    pub decel_rest_speed: f64,
    /// Final speed of a slower, weaker deceleration, px/s.
    pub decel_slow_speed: f64,
    /// Lower bound for the divisor of relative speed drops, px/s.
    pub decel_speed_floor: f64,
    pub latency_budget_ms: f64,
    pub latency_window: usize,
    pub latency_min_samples: usize,
    pub disable_cooldown_ms: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            emit_threshold: 0.8,
            field_heat_map: HeatMapSettings {
                grid_px: 10.0,
                retention_ms: 60_000,
                lookup_radius_px: 20.0,
                confidence_floor: 0.5,
            },
            button_heat_map: HeatMapSettings {
                grid_px: 15.0,
                retention_ms: 90_000,
                lookup_radius_px: 25.0,
                confidence_floor: 0.6,
            },
            text_shape_strong: 0.7,
            text_shape_weak: 0.5,
            pointer_shape_strong: 0.8,
            pointer_shape_weak: 0.6,
            weak_signal_weight: 0.8,
            click_to_type_window_ms: 2_000,
            hover_min_ms: 200,
            hover_max_ms: 5_000,
            hover_still_px: 25.0,
            hover_history_len: 20,
            velocity_history_len: 10,
            decel_rest_speed: 2.0,
            decel_slow_speed: 5.0,
            decel_speed_floor: 1.0,
            latency_budget_ms: 30.0,
            latency_window: 50,
            latency_min_samples: 10,
            disable_cooldown_ms: 5_000,
        }
    }
}

/// Root settings object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub zoom: ZoomSettings,
    pub mouse: MouseSettings,
    pub classifier: ClassifierSettings,
    pub detection: DetectionSettings,
}

fn unit_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value.min(1.0)
    } else {
        fallback
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

impl EngineSettings {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let settings: EngineSettings = serde_json::from_str(raw)?;
        Ok(settings.sanitized())
    }

    /// Clamps every value into its usable range.
    pub fn sanitized(mut self) -> Self {
        let defaults = EngineSettings::default();

        let zoom = &mut self.zoom;
        zoom.level = if zoom.level.is_finite() {
            zoom.level.clamp(1.0, 2.5)
        } else {
            defaults.zoom.level
        };
        zoom.speed = zoom.speed.clamp(1, 5);
        zoom.sensitivity = zoom.sensitivity.clamp(1, 10);
        zoom.activity_window_ms = zoom.activity_window_ms.max(1);
        zoom.conflict_split_delta = positive_or(zoom.conflict_split_delta, 0.5);
        zoom.center_smoothing = unit_or(zoom.center_smoothing, defaults.zoom.center_smoothing);
        zoom.follow_lag_zoomed = unit_or(zoom.follow_lag_zoomed, defaults.zoom.follow_lag_zoomed);
        zoom.follow_lag_normal = unit_or(zoom.follow_lag_normal, defaults.zoom.follow_lag_normal);
        zoom.element_lag_zoomed =
            unit_or(zoom.element_lag_zoomed, defaults.zoom.element_lag_zoomed);
        zoom.element_lag_normal =
            unit_or(zoom.element_lag_normal, defaults.zoom.element_lag_normal);
        zoom.emergency_transition_ms = zoom.emergency_transition_ms.max(1);
        zoom.rapid_movement_px_per_s =
            positive_or(zoom.rapid_movement_px_per_s, defaults.zoom.rapid_movement_px_per_s);
        zoom.rapid_check_interval_ms = zoom.rapid_check_interval_ms.max(1);
        zoom.click_outside_px = positive_or(zoom.click_outside_px, 50.0);
        zoom.cursor_leave_px = positive_or(zoom.cursor_leave_px, 200.0);
        zoom.retarget_epsilon = zoom.retarget_epsilon.clamp(0.0, 0.5);

        let mouse = &mut self.mouse;
        mouse.highlight_size = if mouse.highlight_size.is_finite() {
            mouse.highlight_size.clamp(1.0, 20.0)
        } else {
            defaults.mouse.highlight_size
        };
        mouse.click_effect_ms = mouse.click_effect_ms.max(1);

        let classifier = &mut self.classifier;
        classifier.history_len = classifier.history_len.clamp(5, 50);
        classifier.shape_window = classifier.shape_window.clamp(2, classifier.history_len);
        classifier.click_max_pause_ms = classifier
            .click_max_pause_ms
            .max(classifier.click_min_pause_ms + 1);

        let detection = &mut self.detection;
        detection.emit_threshold = detection.emit_threshold.clamp(0.0, 1.0);
        for map in [&mut detection.field_heat_map, &mut detection.button_heat_map] {
            map.grid_px = positive_or(map.grid_px, 10.0);
            map.lookup_radius_px = map.lookup_radius_px.max(0.0);
            map.confidence_floor = map.confidence_floor.clamp(0.0, 1.0);
        }
        detection.hover_max_ms = detection.hover_max_ms.max(detection.hover_min_ms);
        detection.hover_history_len = detection.hover_history_len.max(3);
        detection.velocity_history_len = detection.velocity_history_len.max(5);
        detection.decel_speed_floor = positive_or(detection.decel_speed_floor, 1.0);
        detection.latency_window = detection.latency_window.max(1);
        detection.latency_min_samples = detection
            .latency_min_samples
            .clamp(1, detection.latency_window);

        self
    }
}
