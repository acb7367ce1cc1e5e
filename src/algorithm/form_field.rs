use std::collections::VecDeque;
use std::time::Instant;

use crate::algorithm::detection::{DetectionLog, DetectorStats};
use crate::algorithm::heat_map::{HeatMap, HeatMapHit};
use crate::algorithm::latency::LatencyGuard;
use crate::models::events::{ClickEvent, CursorSample, CursorShape, KeyPress};
use crate::models::settings::DetectionSettings;
use crate::models::viewport::{ElementKind, ElementObservation};

const MAX_PENDING_CLICKS: usize = 8;
const CLICK_TO_TYPE_HEAT: f64 = 0.9;
const CLICK_TO_TYPE_HEAT_GATE: f64 = 0.85;

#[derive(Debug, Clone, Copy)]
struct PendingClick {
    click: ClickEvent,
    prior_confidence: f64,
}

/// Click-to-type confidence: shape at click, delay, and prior field evidence.
pub fn click_to_type_confidence(shape: CursorShape, delay_ms: u64, prior_confidence: f64) -> f64 {
    let mut confidence: f64 = match shape {
        CursorShape::Text => 0.4,
        CursorShape::Pointer => 0.2,
        _ => 0.1,
    };

    confidence += match delay_ms {
        200..=800 => 0.4,
        100..=1_500 => 0.3,
        50..=2_000 => 0.2,
        _ => 0.0,
    };

    if prior_confidence > 0.7 {
        confidence += 0.1;
    }

    confidence.min(0.95)
}

/// Evidence that the cursor is over a text input.
#[derive(Debug, Clone)]
pub struct FormFieldDetector {
    settings: DetectionSettings,
    heat_map: HeatMap,
    guard: LatencyGuard,
    monitoring: bool,
    pending_clicks: VecDeque<PendingClick>,
    log: DetectionLog,
    click_to_type_events: usize,
}

impl FormFieldDetector {
    pub fn new(settings: DetectionSettings) -> Self {
        let heat_map = HeatMap::new(settings.field_heat_map);
        let guard = LatencyGuard::new(
            "FormFieldDetector",
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
            pending_clicks: VecDeque::with_capacity(MAX_PENDING_CLICKS),
            log: DetectionLog::default(),
            click_to_type_events: 0,
        }
    }

    pub fn start(&mut self) {
        if self.monitoring {
            return;
        }
        self.monitoring = true;
        log::info!("FormFieldDetector: monitoring started");
    }

    pub fn stop(&mut self) {
        if self.monitoring {
            log::info!("FormFieldDetector: monitoring stopped");
        }
        self.monitoring = false;
        self.reset();
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// Direct signal from the inferred cursor shape.
    ///
    /// Strong text shapes and weaker ones both feed the heat map; only the
    /// strong path can produce an observation.
    pub fn analyze_cursor(&mut self, sample: &CursorSample, now: u64) -> Option<ElementObservation> {
        if !self.monitoring || !self.guard.is_enabled(now) {
            return None;
        }
        let started = Instant::now();

        let mut field_confidence = 0.0;
        if sample.shape == CursorShape::Text {
            if sample.shape_confidence >= self.settings.text_shape_strong {
                field_confidence = (sample.shape_confidence + 0.15).min(0.95);
                self.heat_map.record(sample.x, sample.y, field_confidence, now);
            } else if sample.shape_confidence >= self.settings.text_shape_weak {
                field_confidence = sample.shape_confidence;
                self.heat_map.record(
                    sample.x,
                    sample.y,
                    field_confidence * self.settings.weak_signal_weight,
                    now,
                );
            }
        }
        self.log.push(now, field_confidence);

        let observation = if field_confidence > self.settings.emit_threshold {
            let hits = self
                .heat_map
                .cell_at(sample.x, sample.y)
                .map_or(0, |cell| cell.hit_count);
            Some(
                ElementObservation::new(
                    ElementKind::TextField,
                    sample.x,
                    sample.y,
                    field_confidence,
                    now,
                )
                .with_hits(hits),
            )
        } else {
            None
        };

        self.guard.record(started.elapsed(), now);
        observation
    }

    /// Remembers an inferred click as a candidate for click-to-type.
    pub fn on_click(&mut self, click: &ClickEvent) {
        if !self.monitoring {
            return;
        }
        let prior_confidence = self
            .heat_map
            .nearest(click.x, click.y, click.ts)
            .map_or(0.0, |hit| hit.confidence);
        if self.pending_clicks.len() >= MAX_PENDING_CLICKS {
            self.pending_clicks.pop_front();
        }
        self.pending_clicks.push_back(PendingClick {
            click: *click,
            prior_confidence,
        });
    }

    /// Correlates a key press with the most recent click in the window.
    pub fn on_key_press(&mut self, key: &KeyPress) -> Option<ElementObservation> {
        if !self.monitoring || key.is_modifier() || !self.guard.is_enabled(key.ts) {
            return None;
        }
        let window = self.settings.click_to_type_window_ms;
        self.pending_clicks
            .retain(|pending| key.ts.saturating_sub(pending.click.ts) <= window);

        let index = self.pending_clicks.iter().rposition(|pending| {
            let delay = key.ts.saturating_sub(pending.click.ts);
            key.ts >= pending.click.ts && (50..=window).contains(&delay)
        })?;
        let pending = self.pending_clicks.remove(index)?;
        let delay = key.ts - pending.click.ts;
        let confidence =
            click_to_type_confidence(pending.click.shape, delay, pending.prior_confidence);
        self.click_to_type_events += 1;
        self.log.push(key.ts, confidence);
        log::debug!(
            "FormFieldDetector: click-to-type delay={delay}ms confidence={confidence:.2}"
        );

        if confidence >= CLICK_TO_TYPE_HEAT_GATE {
            self.heat_map.record(
                pending.click.x,
                pending.click.y,
                CLICK_TO_TYPE_HEAT,
                key.ts,
            );
        }

        if confidence <= self.settings.emit_threshold {
            return None;
        }
        let hits = self
            .heat_map
            .cell_at(pending.click.x, pending.click.y)
            .map_or(0, |cell| cell.hit_count);
        Some(
            ElementObservation::new(
                ElementKind::TextField,
                pending.click.x,
                pending.click.y,
                confidence,
                key.ts,
            )
            .with_hits(hits),
        )
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
            pattern_events: self.click_to_type_events,
            avg_latency_ms: self.guard.average_ms(),
            currently_hovering: false,
        }
    }

    /// Drops heat map, pending clicks and counters.
    pub fn reset(&mut self) {
        self.heat_map.clear();
        self.pending_clicks.clear();
        self.log.clear();
        self.guard.reset();
        self.click_to_type_events = 0;
    }

    pub fn heat_map(&self) -> &HeatMap {
        &self.heat_map
    }
}
