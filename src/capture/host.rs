//! Capture host collaborator: cursor and display queries, raw frames in,
//! composited frames out.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::events::CursorInfo;
use crate::models::viewport::RecordingBounds;

/// Display rectangle in virtual-desktop pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Display {
    pub id: u32,
    pub bounds: DisplayRect,
    pub work_area: DisplayRect,
    /// DPI scale (e.g. 1.25 for 125%).
    pub scale_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub displays: Vec<Display>,
    /// Id of the primary display.
    pub primary: u32,
}

impl DisplayInfo {
    /// Coordinate frame for a recording on `display_id`; unknown ids fall
    /// back to the primary display.
    pub fn recording_bounds(&self, display_id: Option<u32>) -> Result<RecordingBounds> {
        let requested = display_id.and_then(|id| self.displays.iter().find(|display| display.id == id));
        if requested.is_none() {
            if let Some(id) = display_id {
                log::warn!("DisplayInfo: display {id} not found, using primary {}", self.primary);
            }
        }
        let display = requested
            .or_else(|| self.displays.iter().find(|display| display.id == self.primary))
            .or_else(|| self.displays.first())
            .ok_or_else(|| EngineError::SignalUnavailable("no displays reported".to_string()))?;

        let bounds = display.bounds;
        Ok(RecordingBounds::new(bounds.x, bounds.y, bounds.width, bounds.height))
    }
}

/// Request/response queries against the capture host. Any call may fail;
/// callers skip the tick and retry on the next one.
pub trait CaptureHost: Send + 'static {
    fn poll_cursor_position(&mut self) -> Result<(f64, f64)>;

    fn poll_cursor_info(&mut self) -> Result<CursorInfo>;

    fn poll_display_info(&mut self) -> Result<DisplayInfo>;
}

/// Raw capture frames, latest wins.
pub trait FrameSource: Send + 'static {
    fn latest_frame(&mut self) -> Option<RgbaImage>;
}

/// Destination of composited frames (encoder, preview...).
pub trait FrameSink: Send + 'static {
    fn push_frame(&mut self, frame: RgbaImage, ts: u64) -> Result<()>;
}
