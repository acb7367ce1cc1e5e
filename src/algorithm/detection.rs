use std::collections::VecDeque;

use serde::Serialize;

const DETECTION_LOG_LEN: usize = 100;
const RECENT_WINDOW_MS: u64 = 10_000;

/// Monitoring counters exposed by each detector.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStats {
    pub monitoring: bool,
    pub enabled: bool,
    pub hotspots: usize,
    pub total_detections: usize,
    pub recent_detections: usize,
    pub high_confidence_detections: usize,
    /// Click-to-type events for the field detector, hover events for buttons.
    pub pattern_events: usize,
    pub avg_latency_ms: f64,
    pub currently_hovering: bool,
}

/// Bounded log of confidence values a detector computed.
#[derive(Debug, Clone, Default)]
pub struct DetectionLog {
    entries: VecDeque<(u64, f64)>,
}

impl DetectionLog {
    pub fn push(&mut self, ts: u64, confidence: f64) {
        if self.entries.len() >= DETECTION_LOG_LEN {
            self.entries.pop_front();
        }
        self.entries.push_back((ts, confidence));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(recent, recent above high_threshold)` within the last ten seconds.
    pub fn recent_counts(&self, now: u64, high_threshold: f64) -> (usize, usize) {
        self.entries
            .iter()
            .filter(|(ts, _)| now.saturating_sub(*ts) < RECENT_WINDOW_MS)
            .fold((0, 0), |(recent, high), (_, confidence)| {
                (recent + 1, high + usize::from(*confidence > high_threshold))
            })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
