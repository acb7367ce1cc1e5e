use std::collections::HashMap;

use serde::Serialize;

use crate::models::settings::HeatMapSettings;

/// Accumulated confidence for one grid cell.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeatMapCell {
    pub cell_x: i64,
    pub cell_y: i64,
    pub hit_count: u32,
    pub total_confidence: f64,
    pub avg_confidence: f64,
    pub last_update: u64,
}

impl HeatMapCell {
    fn empty(cell_x: i64, cell_y: i64) -> Self {
        Self {
            cell_x,
            cell_y,
            hit_count: 0,
            total_confidence: 0.0,
            avg_confidence: 0.0,
            last_update: 0,
        }
    }
}

/// Spatial lookup result.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeatMapHit {
    /// Cell centre, screen pixels.
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub hit_count: u32,
    pub distance: f64,
}

/// Grid-quantized confidence accumulator owned by a single detector.
///
/// Cells older than the retention window are swept on every insertion, so
/// the map never needs a timer of its own.
#[derive(Debug, Clone)]
pub struct HeatMap {
    settings: HeatMapSettings,
    cells: HashMap<(i64, i64), HeatMapCell>,
}

impl HeatMap {
    pub fn new(settings: HeatMapSettings) -> Self {
        Self {
            settings,
            cells: HashMap::new(),
        }
    }

    fn grid(&self) -> f64 {
        self.settings.grid_px.max(1.0)
    }

    fn key_for(&self, x: f64, y: f64) -> (i64, i64) {
        let grid = self.grid();
        ((x / grid).round() as i64, (y / grid).round() as i64)
    }

    /// Folds one confidence value into the cell at `(x, y)`.
    pub fn record(&mut self, x: f64, y: f64, confidence: f64, now: u64) -> HeatMapCell {
        self.sweep(now);

        let key = self.key_for(x, y);
        let cell = self
            .cells
            .entry(key)
            .or_insert_with(|| HeatMapCell::empty(key.0, key.1));
        cell.total_confidence += confidence.clamp(0.0, 1.0);
        cell.hit_count = cell.hit_count.saturating_add(1);
        cell.avg_confidence = cell.total_confidence / cell.hit_count as f64;
        cell.last_update = now;
        *cell
    }

    /// Drops cells whose last update is older than the retention window.
    pub fn sweep(&mut self, now: u64) -> usize {
        let retention = self.settings.retention_ms;
        let before = self.cells.len();
        self.cells
            .retain(|_, cell| now.saturating_sub(cell.last_update) <= retention);
        let removed = before - self.cells.len();
        if removed > 0 {
            log::debug!("HeatMap::sweep: evicted {removed} stale cells");
        }
        removed
    }

    /// Nearest live cell within `radius` whose average confidence exceeds
    /// the floor. Cells past retention are skipped even before a sweep.
    pub fn detection_at(&self, x: f64, y: f64, radius: f64, now: u64) -> Option<HeatMapHit> {
        let grid = self.grid();
        let floor = self.settings.confidence_floor;
        let retention = self.settings.retention_ms;
        self.cells
            .values()
            .filter(|cell| now.saturating_sub(cell.last_update) <= retention)
            .filter(|cell| cell.avg_confidence > floor)
            .map(|cell| {
                let cx = cell.cell_x as f64 * grid;
                let cy = cell.cell_y as f64 * grid;
                HeatMapHit {
                    x: cx,
                    y: cy,
                    confidence: cell.avg_confidence,
                    hit_count: cell.hit_count,
                    distance: (cx - x).hypot(cy - y),
                }
            })
            .filter(|hit| hit.distance <= radius)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Lookup with the configured default radius.
    pub fn nearest(&self, x: f64, y: f64, now: u64) -> Option<HeatMapHit> {
        self.detection_at(x, y, self.settings.lookup_radius_px, now)
    }

    pub fn cell_at(&self, x: f64, y: f64) -> Option<&HeatMapCell> {
        self.cells.get(&self.key_for(x, y))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> HeatMapSettings {
        HeatMapSettings {
            grid_px: 10.0,
            retention_ms: 60_000,
            lookup_radius_px: 20.0,
            confidence_floor: 0.5,
        }
    }

    #[test]
    fn record_averages_confidence_per_cell() {
        let mut map = HeatMap::new(settings());
        map.record(101.0, 99.0, 0.9, 1_000);
        let cell = map.record(98.0, 102.0, 0.7, 1_500);
        assert_eq!(map.len(), 1);
        assert_eq!(cell.hit_count, 2);
        assert!((cell.avg_confidence - 0.8).abs() < 1e-9);
        assert_eq!(cell.last_update, 1_500);
    }

    #[test]
    fn stale_cells_are_swept_on_next_insert() {
        let mut map = HeatMap::new(settings());
        let now = 200_000;
        map.record(10.0, 10.0, 0.9, now - 100_000);
        assert!(map.cell_at(10.0, 10.0).is_some());

        map.record(500.0, 500.0, 0.9, now);
        assert!(map.cell_at(10.0, 10.0).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn lookup_returns_nearest_cell_above_floor() {
        let mut map = HeatMap::new(settings());
        map.record(100.0, 100.0, 0.9, 0);
        map.record(120.0, 100.0, 0.9, 0);
        map.record(105.0, 105.0, 0.2, 0);

        let hit = map.detection_at(118.0, 100.0, 20.0, 0).expect("expected a hit");
        assert_eq!(hit.x, 120.0);
        assert!(map.detection_at(400.0, 400.0, 20.0, 0).is_none());
    }

    #[test]
    fn lookup_skips_cells_past_retention_without_insert() {
        let mut map = HeatMap::new(settings());
        map.record(100.0, 100.0, 0.9, 1_000);
        assert!(map.nearest(100.0, 100.0, 61_000).is_some());
        assert!(map.nearest(100.0, 100.0, 61_001).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn low_confidence_cells_are_ignored_by_lookup() {
        let mut map = HeatMap::new(settings());
        map.record(50.0, 50.0, 0.4, 0);
        assert!(map.nearest(50.0, 50.0, 0).is_none());
        assert_eq!(map.len(), 1);
    }
}
