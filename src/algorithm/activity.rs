use std::collections::VecDeque;

use crate::models::events::{ClickEvent, CursorInfo, CursorSample, CursorShape, ShapeEstimate};
use crate::models::settings::ClassifierSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocitySample {
    pub ts: u64,
    pub speed_px_per_ms: f64,
}

/// Per-step speeds over a window of samples. Steps with `dt == 0` are skipped.
pub fn velocity_samples(window: &[CursorSample]) -> Vec<VelocitySample> {
    window
        .windows(2)
        .filter_map(|pair| {
            let dt = pair[1].ts.saturating_sub(pair[0].ts);
            if dt == 0 {
                return None;
            }
            Some(VelocitySample {
                ts: pair[1].ts,
                speed_px_per_ms: pair[1].distance_to(&pair[0]) / dt as f64,
            })
        })
        .collect()
}

/// Classifies the cursor shape from a window of recent samples.
///
/// Movement statistics use the last `settings.shape_window` samples; dwell
/// is the span of the trailing run of near-still steps across the whole
/// window. Dwelling in place reads as a text caret, a slow-down followed by
/// a speed-up reads as hovering over a control, sustained speed reads as a
/// drag.
pub fn classify_shape(window: &[CursorSample], settings: &ClassifierSettings) -> ShapeEstimate {
    let take = settings.shape_window.max(2);
    let tail = &window[window.len().saturating_sub(take)..];
    if tail.len() < 2 {
        return ShapeEstimate::unknown();
    }

    let steps = tail.len() - 1;
    let total_movement: f64 = tail
        .windows(2)
        .map(|pair| pair[1].distance_to(&pair[0]))
        .sum();
    let avg_movement = total_movement / steps as f64;

    if avg_movement < settings.text_max_movement_px {
        let dwell_ms = still_dwell_ms(window, settings.text_max_movement_px);
        if dwell_ms >= settings.text_min_dwell_ms {
            let dwell = dwell_ms as f64 / settings.text_full_dwell_ms.max(1) as f64;
            let stillness = 1.0 - avg_movement / settings.text_max_movement_px.max(0.001);
            let confidence = 0.5 + 0.4 * dwell.min(1.0) + 0.05 * stillness;
            return ShapeEstimate::new(CursorShape::Text, confidence.min(0.95));
        }
    }

    let speeds: Vec<f64> = velocity_samples(tail)
        .iter()
        .map(|sample| sample.speed_px_per_ms)
        .collect();
    if speeds.is_empty() {
        return ShapeEstimate::unknown();
    }

    let min_speed = speeds.iter().copied().fold(f64::INFINITY, f64::min);

    if min_speed >= settings.grabbing_min_speed_px_per_ms {
        let avg_speed = speeds.iter().sum::<f64>() / speeds.len() as f64;
        let excess = (avg_speed / settings.grabbing_min_speed_px_per_ms.max(0.001) - 1.0)
            .clamp(0.0, 1.0);
        return ShapeEstimate::new(CursorShape::Grabbing, 0.6 + 0.3 * excess);
    }

    if avg_movement <= settings.pointer_max_movement_px && speeds.len() >= 3 {
        if let Some(depth) = dip_depth(&speeds) {
            return ShapeEstimate::new(CursorShape::Pointer, 0.6 + 0.3 * depth);
        }
    }

    ShapeEstimate::unknown()
}

/// Time the cursor has stayed within `still_px` per step, up to the latest sample.
fn still_dwell_ms(window: &[CursorSample], still_px: f64) -> u64 {
    let Some(last) = window.last() else {
        return 0;
    };
    let mut start = last.ts;
    for pair in window.windows(2).rev() {
        if pair[1].distance_to(&pair[0]) >= still_px {
            break;
        }
        start = pair[0].ts;
    }
    last.ts.saturating_sub(start)
}

/// Relative depth of a decelerate-then-reaccelerate dip, if the speeds
/// contain one with the minimum strictly inside the window.
fn dip_depth(speeds: &[f64]) -> Option<f64> {
    let (min_index, min_speed) = speeds
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (index, speed)| {
            if speed < best.1 {
                (index, speed)
            } else {
                best
            }
        });
    if min_index == 0 || min_index + 1 >= speeds.len() {
        return None;
    }
    let before = speeds[..min_index].iter().copied().fold(0.0, f64::max);
    let after = speeds[min_index + 1..].iter().copied().fold(0.0, f64::max);
    let shoulder = before.min(after);
    if shoulder <= 0.0 || min_speed >= shoulder {
        return None;
    }
    Some(((shoulder - min_speed) / shoulder).clamp(0.0, 1.0))
}

/// Infers clicks from pointer stillness.
///
/// The anchor is the sample where the pointer last came to rest. A click is
/// reported once per resting period, when the pointer has stayed within
/// `click_still_px` of the anchor for a plausible pause and the debounce
/// since the previous inferred click has elapsed.
#[derive(Debug, Clone, Default)]
pub struct ClickInference {
    anchor: Option<CursorSample>,
    clicked_at_anchor: bool,
    last_click_ts: Option<u64>,
}

impl ClickInference {
    pub fn observe(
        &mut self,
        sample: &CursorSample,
        settings: &ClassifierSettings,
    ) -> Option<ClickEvent> {
        let Some(anchor) = self.anchor else {
            self.anchor = Some(*sample);
            return None;
        };

        let dx = (sample.x - anchor.x).abs();
        let dy = (sample.y - anchor.y).abs();
        if dx >= settings.click_still_px || dy >= settings.click_still_px {
            self.anchor = Some(*sample);
            self.clicked_at_anchor = false;
            return None;
        }

        let dt = sample.ts.saturating_sub(anchor.ts);
        let timing_ok = dt > settings.click_min_pause_ms && dt < settings.click_max_pause_ms;
        let debounced = self
            .last_click_ts
            .map_or(true, |last| sample.ts.saturating_sub(last) > settings.click_debounce_ms);

        if self.clicked_at_anchor || !timing_ok || !debounced {
            return None;
        }

        self.clicked_at_anchor = true;
        self.last_click_ts = Some(sample.ts);
        log::debug!(
            "ClickInference: click at ({:.0}, {:.0}) after {dt}ms pause",
            sample.x,
            sample.y
        );
        Some(ClickEvent {
            x: sample.x,
            y: sample.y,
            ts: sample.ts,
            shape: sample.shape,
        })
    }

    pub fn last_click_ts(&self) -> Option<u64> {
        self.last_click_ts
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Result of feeding one cursor reading to the classifier.
#[derive(Debug, Clone, Copy)]
pub struct ActivityUpdate {
    pub sample: CursorSample,
    pub click: Option<ClickEvent>,
    pub speed_px_per_ms: f64,
}

/// Bounded history of cursor samples with click and shape inference.
#[derive(Debug, Clone)]
pub struct ActivityClassifier {
    settings: ClassifierSettings,
    history: VecDeque<CursorSample>,
    clicks: ClickInference,
}

impl ActivityClassifier {
    pub fn new(settings: ClassifierSettings) -> Self {
        let capacity = settings.history_len.max(1);
        Self {
            settings,
            history: VecDeque::with_capacity(capacity),
            clicks: ClickInference::default(),
        }
    }

    pub fn push(&mut self, info: CursorInfo) -> ActivityUpdate {
        let raw = CursorSample::new(info.x, info.y, info.ts);
        let speed_px_per_ms = match self.history.back() {
            Some(previous) if info.ts > previous.ts => {
                raw.distance_to(previous) / (info.ts - previous.ts) as f64
            }
            _ => 0.0,
        };

        if self.history.len() >= self.settings.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(raw);

        let estimate = classify_shape(self.history.make_contiguous(), &self.settings);
        let sample = raw.with_shape(estimate);
        if let Some(last) = self.history.back_mut() {
            *last = sample;
        }

        let click = self.clicks.observe(&sample, &self.settings);
        ActivityUpdate {
            sample,
            click,
            speed_px_per_ms,
        }
    }

    pub fn latest(&self) -> Option<&CursorSample> {
        self.history.back()
    }

    /// The sample before the latest one.
    pub fn previous(&self) -> Option<&CursorSample> {
        self.history.iter().rev().nth(1)
    }

    pub fn history(&self) -> impl Iterator<Item = &CursorSample> {
        self.history.iter()
    }

    /// Speeds of the last `count` steps, oldest first.
    pub fn recent_speeds(&self, count: usize) -> Vec<f64> {
        let samples: Vec<CursorSample> = self.history.iter().copied().collect();
        let speeds = velocity_samples(&samples);
        speeds[speeds.len().saturating_sub(count)..]
            .iter()
            .map(|sample| sample.speed_px_per_ms)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.clicks.reset();
    }
}
