use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

use crate::algorithm::detection::{DetectionLog, DetectorStats};
use crate::algorithm::heat_map::{HeatMap, HeatMapHit};
use crate::algorithm::latency::LatencyGuard;
use crate::models::events::{CursorSample, CursorShape};
use crate::models::settings::DetectionSettings;
use crate::models::viewport::{ElementKind, ElementObservation, SizeEstimate};

const MAX_HOVER_EVENTS: usize = 20;
const DECELERATION_STEPS: usize = 5;
const DECELERATION_GATE: f64 = 0.7;

/// Finished hover with the estimated control size.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HoverEvent {
    pub start_ts: u64,
    pub end_ts: u64,
    pub duration_ms: u64,
    pub center_x: f64,
    pub center_y: f64,
    pub size: SizeEstimate,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
struct HoverArea {
    start_ts: u64,
    anchor: (f64, f64),
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
    positions: VecDeque<(f64, f64)>,
}

impl HoverArea {
    fn new(x: f64, y: f64, ts: u64) -> Self {
        let mut positions = VecDeque::new();
        positions.push_back((x, y));
        Self {
            start_ts: ts,
            anchor: (x, y),
            min_x: x,
            max_x: x,
            min_y: y,
            max_y: y,
            positions,
        }
    }

    fn extend(&mut self, x: f64, y: f64, history_len: usize) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        if self.positions.len() >= history_len {
            self.positions.pop_front();
        }
        self.positions.push_back((x, y));
    }

    fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }

    fn size(&self) -> SizeEstimate {
        SizeEstimate {
            width: self.max_x - self.min_x,
            height: self.max_y - self.min_y,
        }
    }

    /// Mean distance of the recorded positions from the box centre.
    fn movement_variance(&self) -> f64 {
        if self.positions.len() < 3 {
            return 100.0;
        }
        let (cx, cy) = self.center();
        let total: f64 = self
            .positions
            .iter()
            .map(|(x, y)| (x - cx).hypot(y - cy))
            .sum();
        total / self.positions.len() as f64
    }

    fn left_anchor(&self, x: f64, y: f64, radius: f64) -> bool {
        (x - self.anchor.0).hypot(y - self.anchor.1) > radius
    }
}

/// Hover confidence from duration, swept area and positional spread.
pub fn hover_confidence(duration_ms: u64, area: f64, variance: f64) -> f64 {
    let mut confidence: f64 = match duration_ms {
        300..=2_000 => 0.4,
        200..=3_000 => 0.3,
        _ => 0.1,
    };

    confidence += if (400.0..=10_000.0).contains(&area) {
        0.3
    } else if (100.0..=20_000.0).contains(&area) {
        0.2
    } else {
        0.1
    };

    if variance < 10.0 {
        confidence += 0.2;
    } else if variance < 30.0 {
        confidence += 0.1;
    }

    confidence.min(0.9)
}

/// Confidence that the last five speeds (px/s) describe hovering to rest.
///
/// Speeds must strictly decrease; the mean relative drop and the final
/// speed pick the band.
pub fn deceleration_confidence(speeds: &[f64], settings: &DetectionSettings) -> Option<f64> {
    if speeds.len() < DECELERATION_STEPS {
        return None;
    }
    let recent = &speeds[speeds.len() - DECELERATION_STEPS..];

    let mut score = 0.0;
    for pair in recent.windows(2) {
        if pair[1] >= pair[0] {
            return None;
        }
        score += (pair[0] - pair[1]) / pair[0].max(settings.decel_speed_floor);
    }
    let avg = score / (DECELERATION_STEPS - 1) as f64;
    let final_speed = recent[DECELERATION_STEPS - 1];

    let confidence = if avg > 0.5 && final_speed < settings.decel_rest_speed {
        (0.4 + avg).min(0.85)
    } else if avg > 0.3 && final_speed < settings.decel_slow_speed {
        (0.3 + avg).min(0.75)
    } else {
        0.0
    };

    (confidence > 0.5).then_some(confidence)
}

/// Evidence that the cursor rests over a clickable control.
#[derive(Debug, Clone)]
pub struct ButtonDetector {
    settings: DetectionSettings,
    heat_map: HeatMap,
    guard: LatencyGuard,
    monitoring: bool,
    velocities: VecDeque<f64>,
    hover: Option<HoverArea>,
    hover_events: VecDeque<HoverEvent>,
    log: DetectionLog,
}

impl ButtonDetector {
    pub fn new(settings: DetectionSettings) -> Self {
        let heat_map = HeatMap::new(settings.button_heat_map);
        let guard = LatencyGuard::new(
            "ButtonDetector",
            settings.latency_budget_ms,
            settings.latency_window,
            settings.latency_min_samples,
            settings.disable_cooldown_ms,
        );
        Self {
            settings,
            heat_map,
            guard,
            monitoring: false,
            velocities: VecDeque::new(),
            hover: None,
            hover_events: VecDeque::new(),
            log: DetectionLog::default(),
        }
    }

    pub fn start(&mut self) {
        if self.monitoring {
            return;
        }
        self.monitoring = true;
        log::info!("ButtonDetector: monitoring started");
    }

    pub fn stop(&mut self) {
        if self.monitoring {
            log::info!("ButtonDetector: monitoring stopped");
        }
        self.monitoring = false;
        self.reset();
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// One detection tick: shape signal, deceleration and hover tracking.
    pub fn analyze(
        &mut self,
        sample: &CursorSample,
        speed_px_per_ms: f64,
        now: u64,
    ) -> Option<ElementObservation> {
        if !self.monitoring || !self.guard.is_enabled(now) {
            return None;
        }
        let started = Instant::now();

        if self.velocities.len() >= self.settings.velocity_history_len {
            self.velocities.pop_front();
        }
        self.velocities.push_back(speed_px_per_ms.max(0.0) * 1_000.0);

        let hover_over = self.hover.as_ref().map_or(false, |hover| {
            now.saturating_sub(hover.start_ts) > self.settings.hover_max_ms
                || hover.left_anchor(sample.x, sample.y, self.settings.hover_still_px)
        });
        let finished = if hover_over { self.end_hover(now) } else { None };

        let mut confidence = 0.0;
        let mut start_hover = false;
        if sample.shape == CursorShape::Pointer {
            if sample.shape_confidence >= self.settings.pointer_shape_strong {
                confidence = (sample.shape_confidence + 0.1).min(0.9);
                start_hover = true;
                self.heat_map.record(sample.x, sample.y, confidence, now);
            } else if sample.shape_confidence >= self.settings.pointer_shape_weak {
                confidence = sample.shape_confidence;
                self.heat_map.record(
                    sample.x,
                    sample.y,
                    confidence * self.settings.weak_signal_weight,
                    now,
                );
            }
        }

        let speeds: Vec<f64> = self.velocities.iter().copied().collect();
        if let Some(decel) = deceleration_confidence(&speeds, &self.settings) {
            if decel > DECELERATION_GATE {
                confidence = f64::max(confidence, decel);
                start_hover = true;
            }
        }

        let history_len = self.settings.hover_history_len;
        match self.hover.as_mut() {
            Some(hover) => hover.extend(sample.x, sample.y, history_len),
            None if start_hover => self.hover = Some(HoverArea::new(sample.x, sample.y, now)),
            None => {}
        }
        self.log.push(now, confidence);

        let observation = match finished {
            Some(event) if event.confidence > self.settings.emit_threshold => Some(
                ElementObservation::new(
                    ElementKind::Button,
                    event.center_x,
                    event.center_y,
                    event.confidence,
                    now,
                )
                .with_size(event.size)
                .with_hits(self.hits_at(event.center_x, event.center_y)),
            ),
            _ if confidence > self.settings.emit_threshold => {
                let mut observation = ElementObservation::new(
                    ElementKind::Button,
                    sample.x,
                    sample.y,
                    confidence,
                    now,
                )
                .with_hits(self.hits_at(sample.x, sample.y));
                if let Some(size) = self.hover_size_near(sample.x, sample.y) {
                    observation = observation.with_size(size);
                }
                Some(observation)
            }
            _ => None,
        };

        self.guard.record(started.elapsed(), now);
        observation
    }

    /// Closes the current hover; folds it into the heat map when its
    /// duration is plausible for a control.
    pub fn end_hover(&mut self, now: u64) -> Option<HoverEvent> {
        let hover = self.hover.take()?;
        let duration_ms = now.saturating_sub(hover.start_ts);
        if duration_ms < self.settings.hover_min_ms || duration_ms > self.settings.hover_max_ms {
            return None;
        }

        let size = hover.size();
        let (center_x, center_y) = hover.center();
        let event = HoverEvent {
            start_ts: hover.start_ts,
            end_ts: now,
            duration_ms,
            center_x,
            center_y,
            size,
            confidence: hover_confidence(duration_ms, size.area(), hover.movement_variance()),
        };
        self.heat_map.record(center_x, center_y, event.confidence, now);
        if self.hover_events.len() >= MAX_HOVER_EVENTS {
            self.hover_events.pop_front();
        }
        self.hover_events.push_back(event);
        log::debug!(
            "ButtonDetector: hover {duration_ms}ms area={:.0} confidence={:.2}",
            size.area(),
            event.confidence
        );
        Some(event)
    }

    pub fn on_cursor_leave(&mut self, now: u64) -> Option<HoverEvent> {
        self.end_hover(now)
    }

    fn hits_at(&self, x: f64, y: f64) -> u32 {
        self.heat_map.cell_at(x, y).map_or(0, |cell| cell.hit_count)
    }

    fn hover_size_near(&self, x: f64, y: f64) -> Option<SizeEstimate> {
        let radius = self.settings.button_heat_map.lookup_radius_px;
        self.hover_events
            .iter()
            .rev()
            .find(|event| (event.center_x - x).hypot(event.center_y - y) <= radius)
            .map(|event| event.size)
    }

    pub fn detection_at(&self, x: f64, y: f64, radius: f64, now: u64) -> Option<HeatMapHit> {
        self.heat_map.detection_at(x, y, radius, now)
    }

    pub fn stats(&self, now: u64) -> DetectorStats {
        let (recent, high) = self.log.recent_counts(now, 0.8);
        DetectorStats {
            monitoring: self.monitoring,
            enabled: !self.guard.is_disabled(),
            hotspots: self.heat_map.len(),
            total_detections: self.log.len(),
            recent_detections: recent,
            high_confidence_detections: high,
            pattern_events: self.hover_events.len(),
            avg_latency_ms: self.guard.average_ms(),
            currently_hovering: self.hover.is_some(),
        }
    }

    pub fn reset(&mut self) {
        self.heat_map.clear();
        self.velocities.clear();
        self.hover = None;
        self.hover_events.clear();
        self.log.clear();
        self.guard.reset();
    }

    pub fn heat_map(&self) -> &HeatMap {
        &self.heat_map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ButtonDetector {
        let mut detector = ButtonDetector::new(DetectionSettings::default());
        detector.start();
        detector
    }

    fn pointer(x: f64, y: f64, confidence: f64, ts: u64) -> CursorSample {
        CursorSample {
            x,
            y,
            ts,
            shape: CursorShape::Pointer,
            shape_confidence: confidence,
        }
    }

    #[test]
    fn strong_pointer_emits_button_and_starts_hover() {
        let mut detector = detector();
        let observation = detector
            .analyze(&pointer(200.0, 150.0, 0.85, 0), 0.0, 0)
            .expect("expected button observation");
        assert_eq!(observation.kind, ElementKind::Button);
        assert!((observation.confidence - 0.9).abs() < 1e-9);
        assert!(detector.stats(0).currently_hovering);
    }

    #[test]
    fn weak_pointer_feeds_heat_map_silently() {
        let mut detector = detector();
        assert!(detector
            .analyze(&pointer(200.0, 150.0, 0.7, 0), 0.0, 0)
            .is_none());
        let cell = detector
            .heat_map()
            .cell_at(200.0, 150.0)
            .expect("cell recorded");
        assert!((cell.avg_confidence - 0.56).abs() < 1e-9);
    }

    #[test]
    fn deceleration_to_rest_scores_high() {
        let settings = DetectionSettings::default();
        let confidence = deceleration_confidence(&[800.0, 400.0, 150.0, 40.0, 1.0], &settings)
            .expect("expected deceleration");
        assert!((confidence - 0.85).abs() < 1e-9);
        let slowing = deceleration_confidence(&[800.0, 400.0, 150.0, 40.0, 3.0], &settings)
            .expect("expected slow band");
        assert!((confidence - slowing - 0.1).abs() < 1e-9);
        assert!(deceleration_confidence(&[800.0, 400.0, 500.0, 40.0, 1.0], &settings).is_none());
        assert!(deceleration_confidence(&[10.0, 8.0, 6.5, 5.5, 4.5], &settings).is_none());
        assert!(deceleration_confidence(&[1.0, 0.5], &settings).is_none());
    }

    fn decelerate(
        detector: &mut ButtonDetector,
        speeds_px_per_ms: &[f64],
    ) -> Option<ElementObservation> {
        let mut observation = None;
        for (step, speed) in speeds_px_per_ms.iter().enumerate() {
            let ts = step as u64 * 100;
            observation = detector.analyze(&CursorSample::new(640.0, 360.0, ts), *speed, ts);
        }
        observation
    }

    #[test]
    fn deceleration_bands_apply_to_detector_speeds() {
        let mut detector = detector();
        let observation = decelerate(&mut detector, &[0.8, 0.4, 0.15, 0.04, 0.001])
            .expect("coming to rest should emit");
        assert_eq!(observation.kind, ElementKind::Button);
        assert!((observation.confidence - 0.85).abs() < 1e-9);
        assert!(detector.stats(400).currently_hovering);

        let mut drifting = self::detector();
        assert!(decelerate(&mut drifting, &[0.8, 0.4, 0.15, 0.04, 0.003]).is_none());
        assert!(drifting.stats(400).currently_hovering);

        let mut uneven = self::detector();
        assert!(decelerate(&mut uneven, &[0.8, 0.4, 0.5, 0.04, 0.001]).is_none());
        assert!(!uneven.stats(400).currently_hovering);
    }

    #[test]
    fn hover_confidence_rewards_typical_button_hover() {
        assert!((hover_confidence(1_000, 600.0, 4.0) - 0.9).abs() < 1e-9);
        assert!((hover_confidence(2_500, 150.0, 20.0) - 0.6).abs() < 1e-9);
        assert!((hover_confidence(4_000, 50.0, 100.0) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn hover_end_estimates_size_and_emits_button() {
        let mut detector = detector();
        detector.analyze(&pointer(110.0, 110.0, 0.85, 0), 0.0, 0);
        for step in 1..=8u64 {
            let sample = CursorSample::new(110.0, 110.0, step * 100);
            detector.analyze(&sample, 0.0, step * 100);
        }
        detector.analyze(&CursorSample::new(100.0, 100.0, 850), 0.0, 850);
        detector.analyze(&CursorSample::new(120.0, 120.0, 900), 0.0, 900);

        let observation = detector
            .analyze(&CursorSample::new(400.0, 400.0, 1_000), 3.0, 1_000)
            .expect("hover end should emit");
        assert_eq!(observation.kind, ElementKind::Button);
        assert!((observation.x - 110.0).abs() < 1e-9);
        assert!((observation.confidence - 0.9).abs() < 1e-9);
        let size = observation.size.expect("size estimate");
        assert!((size.width - 20.0).abs() < 1e-9);
        assert!((size.height - 20.0).abs() < 1e-9);
        assert!(!detector.stats(1_000).currently_hovering);
        assert_eq!(detector.stats(1_000).pattern_events, 1);
    }

    #[test]
    fn too_short_hover_is_discarded() {
        let mut detector = detector();
        detector.analyze(&pointer(100.0, 100.0, 0.85, 0), 0.0, 0);
        assert!(detector.end_hover(150).is_none());
        assert_eq!(detector.stats(150).pattern_events, 0);
    }

    #[test]
    fn stop_clears_state() {
        let mut detector = detector();
        detector.analyze(&pointer(100.0, 100.0, 0.85, 0), 0.0, 0);
        detector.stop();
        assert!(!detector.is_monitoring());
        assert!(detector.heat_map().is_empty());
        assert!(detector.detection_at(100.0, 100.0, 25.0, 0).is_none());
    }
}
