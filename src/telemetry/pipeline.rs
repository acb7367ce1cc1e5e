//! Single-timeline polling pipeline:
//! cursor samples -> classifier -> detectors -> viewport engine.
//!
//! Every entry point takes the session time explicitly. Host failures are
//! logged and the tick is skipped; nothing here can end a recording.

use serde::Serialize;

use crate::algorithm::activity::{ActivityClassifier, ActivityUpdate};
use crate::algorithm::button::ButtonDetector;
use crate::algorithm::detection::DetectorStats;
use crate::algorithm::form_field::FormFieldDetector;
use crate::algorithm::viewport::{EngineDebugState, ViewportEngine};
use crate::capture::host::CaptureHost;
use crate::error::Result;
use crate::models::events::{CursorInfo, CursorShape, KeyPress, ShapeEstimate};
use crate::models::settings::EngineSettings;
use crate::models::viewport::{ElementObservation, RecordingBounds, ViewportSnapshot};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub skipped_ticks: u64,
    pub observations: u64,
    pub form_field: DetectorStats,
    pub button: DetectorStats,
}

pub struct ViewportPipeline {
    display_id: Option<u32>,
    classifier: ActivityClassifier,
    form_fields: FormFieldDetector,
    buttons: ButtonDetector,
    engine: ViewportEngine,
    bounds: Option<RecordingBounds>,
    last_update: Option<ActivityUpdate>,
    last_shape: CursorShape,
    cursor_inside: bool,
    skipped_ticks: u64,
    observations: u64,
}

impl ViewportPipeline {
    pub fn new(settings: EngineSettings, display_id: Option<u32>) -> Self {
        let settings = settings.sanitized();
        Self {
            display_id,
            classifier: ActivityClassifier::new(settings.classifier.clone()),
            form_fields: FormFieldDetector::new(settings.detection.clone()),
            buttons: ButtonDetector::new(settings.detection.clone()),
            engine: ViewportEngine::new(settings.zoom),
            bounds: None,
            last_update: None,
            last_shape: CursorShape::Default,
            cursor_inside: false,
            skipped_ticks: 0,
            observations: 0,
        }
    }

    /// Starts monitoring. The coordinate frame is fetched now; when the host
    /// cannot report displays yet, it is retried on every cursor tick and the
    /// recording (and its grace period) begins once it succeeds.
    pub fn start<H: CaptureHost + ?Sized>(&mut self, host: &mut H, now: u64) {
        if self.engine.is_recording() {
            self.engine.stop_recording();
        }
        self.reset();
        self.form_fields.start();
        self.buttons.start();
        if let Err(err) = self.ensure_bounds(host, now) {
            log::warn!("ViewportPipeline: display info unavailable at start: {err}");
        }
    }

    /// Halts monitoring and drops every history, heat map and focus.
    pub fn stop(&mut self) {
        self.form_fields.stop();
        self.buttons.stop();
        self.engine.stop_recording();
        self.reset();
    }

    fn reset(&mut self) {
        self.classifier.reset();
        self.form_fields.reset();
        self.buttons.reset();
        self.engine.reset_zoom_state();
        self.bounds = None;
        self.last_update = None;
        self.last_shape = CursorShape::Default;
        self.cursor_inside = false;
        self.skipped_ticks = 0;
        self.observations = 0;
    }

    fn ensure_bounds<H: CaptureHost + ?Sized>(
        &mut self,
        host: &mut H,
        now: u64,
    ) -> Result<RecordingBounds> {
        if let Some(bounds) = self.bounds {
            return Ok(bounds);
        }
        let bounds = host.poll_display_info()?.recording_bounds(self.display_id)?;
        self.bounds = Some(bounds);
        self.engine.start_recording(now, bounds);
        Ok(bounds)
    }

    fn poll_cursor<H: CaptureHost + ?Sized>(host: &mut H, now: u64) -> Result<CursorInfo> {
        match host.poll_cursor_info() {
            Ok(info) => Ok(CursorInfo { ts: now, ..info }),
            Err(err) => {
                log::debug!("ViewportPipeline: cursor info failed ({err}), polling position");
                let (x, y) = host.poll_cursor_position()?;
                Ok(CursorInfo { x, y, ts: now })
            }
        }
    }

    /// Cursor cadence (~60 Hz): classify, feed the engine, advance it.
    pub fn on_cursor_tick<H: CaptureHost + ?Sized>(&mut self, host: &mut H, now: u64) {
        let bounds = match self.ensure_bounds(host, now) {
            Ok(bounds) => bounds,
            Err(err) => {
                self.skip_tick("display info", &err.to_string());
                return;
            }
        };
        let info = match Self::poll_cursor(host, now) {
            Ok(info) => info,
            Err(err) => {
                self.skip_tick("cursor", &err.to_string());
                self.engine.tick(now);
                return;
            }
        };

        let update = self.classifier.push(info);
        self.last_update = Some(update);
        let sample = update.sample;

        let position = bounds.position(sample.x, sample.y, now);
        let inside = position.is_inside();
        if self.cursor_inside && !inside {
            self.buttons.on_cursor_leave(now);
        }
        self.cursor_inside = inside;
        self.engine.update_mouse_position(position, now);

        if sample.shape != self.last_shape {
            self.last_shape = sample.shape;
            self.engine.on_cursor_type_change(
                sample.x,
                sample.y,
                ShapeEstimate::new(sample.shape, sample.shape_confidence),
            );
        }

        if let Some(click) = update.click {
            self.form_fields.on_click(&click);
            self.engine.on_mouse_click(now);
        }

        self.engine.tick(now);
    }

    /// Detection cadence (~10 Hz): run both detectors on the latest sample.
    pub fn on_detection_tick(&mut self, now: u64) {
        let Some(update) = self.last_update else {
            return;
        };
        if !self.cursor_inside {
            return;
        }
        let field = self.form_fields.analyze_cursor(&update.sample, now);
        let button = self
            .buttons
            .analyze(&update.sample, update.speed_px_per_ms, now);
        for observation in [field, button].into_iter().flatten() {
            self.observe(observation, now);
        }
    }

    /// Zoom cadence (~2 Hz).
    pub fn on_zoom_tick(&mut self, now: u64) {
        self.engine.reevaluate(now);
    }

    pub fn on_key_press(&mut self, key: &KeyPress, now: u64) {
        if let Some(observation) = self.form_fields.on_key_press(key) {
            self.observe(observation, now);
        }
        self.engine.on_key_press(key, now);
    }

    fn observe(&mut self, observation: ElementObservation, now: u64) {
        self.observations += 1;
        log::debug!(
            "ViewportPipeline: {} observed confidence={:.2}",
            observation.kind.as_str(),
            observation.confidence
        );
        self.engine.on_ui_element_detected(observation, now);
    }

    fn skip_tick(&mut self, what: &str, err: &str) {
        self.skipped_ticks += 1;
        if self.skipped_ticks == 1 || self.skipped_ticks % 100 == 0 {
            log::warn!(
                "ViewportPipeline: {what} unavailable, skipping tick ({} skipped): {err}",
                self.skipped_ticks
            );
        }
    }

    pub fn engine(&self) -> &ViewportEngine {
        &self.engine
    }

    /// Host-driven manual zoom; element control resumes once it lapses.
    pub fn activate_user_override(&mut self, level: f64, now: u64) {
        self.engine.activate_user_override(level, now);
    }

    pub fn bounds(&self) -> Option<RecordingBounds> {
        self.bounds
    }

    pub fn snapshot(&self, now: u64) -> ViewportSnapshot {
        self.engine.snapshot(now)
    }

    pub fn debug_state(&self, now: u64) -> EngineDebugState {
        self.engine.debug_state(now)
    }

    pub fn stats(&self, now: u64) -> PipelineStats {
        PipelineStats {
            skipped_ticks: self.skipped_ticks,
            observations: self.observations,
            form_field: self.form_fields.stats(now),
            button: self.buttons.stats(now),
        }
    }
}
