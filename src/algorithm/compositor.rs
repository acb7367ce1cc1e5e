//! Frame compositor: crops the raw capture frame around the viewport centre,
//! scales it to the output size and draws cursor/click overlays.
//!
//! The compositor only reads [`ViewportSnapshot`]s. Zoom in flight is
//! interpolated from the snapshot's transition so rendering between two
//! state-machine ticks stays smooth.

use std::f64::consts::PI;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::models::settings::{ClickAnimation, MouseSettings};
use crate::models::viewport::{RelativePoint, ViewportSnapshot};

const HIGHLIGHT_RADIUS_PER_SIZE: f64 = 4.0;
const HIGHLIGHT_STROKE_PX: f64 = 3.0;
const RIPPLE_MAX_RADIUS: f64 = 50.0;
const RIPPLE_STROKE_PX: f64 = 3.0;
const PULSE_MAX_RADIUS: f64 = 30.0;
const PULSE_MAX_ALPHA: f64 = 0.7;
const RING_BASE_RADIUS: f64 = 20.0;
const RING_GROWTH: f64 = 30.0;
const RING_MAX_STROKE_PX: f64 = 5.0;

/// Source-frame crop in pixels.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn is_full_frame(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == frame_width && self.height == frame_height
    }
}

fn crop_axis(frame: u32, zoom: f64, center: f64) -> (u32, u32) {
    let frame = frame.max(1);
    let size = ((frame as f64 / zoom).round() as u32).clamp(1, frame);
    let start = (center * frame as f64 - size as f64 * 0.5)
        .round()
        .clamp(0.0, (frame - size) as f64);
    (start as u32, size)
}

/// Crop for `zoom` around `center`, kept fully inside the frame.
pub fn crop_rect(frame_width: u32, frame_height: u32, zoom: f64, center: RelativePoint) -> CropRect {
    let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
    let center = center.clamped();
    let (x, width) = crop_axis(frame_width, zoom, center.x);
    let (y, height) = crop_axis(frame_height, zoom, center.y);
    CropRect {
        x,
        y,
        width,
        height,
    }
}

/// Maps a recording-relative point through the crop/scale transform into
/// output pixels. `None` when the point falls outside the output.
pub fn map_cursor(
    point: RelativePoint,
    frame_width: u32,
    frame_height: u32,
    crop: &CropRect,
    output_width: u32,
    output_height: u32,
) -> Option<(f64, f64)> {
    if !point.x.is_finite() || !point.y.is_finite() {
        return None;
    }
    let source_x = point.x * frame_width as f64;
    let source_y = point.y * frame_height as f64;
    let x = (source_x - crop.x as f64) * output_width as f64 / crop.width.max(1) as f64;
    let y = (source_y - crop.y as f64) * output_height as f64 / crop.height.max(1) as f64;
    if x < 0.0 || y < 0.0 || x > output_width as f64 || y > output_height as f64 {
        return None;
    }
    Some((x, y))
}

/// Zoom level to render at `now`.
pub fn render_zoom(snapshot: &ViewportSnapshot, now: u64) -> f64 {
    let state = &snapshot.state;
    if state.transition.active {
        state.transition.level_at(now)
    } else {
        state.zoom_level
    }
}

/// Radius, stroke and opacity of a click animation at progress `p`.
/// A stroke of `None` means a filled disc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickEffectShape {
    pub radius: f64,
    pub stroke: Option<f64>,
    pub alpha: f64,
}

pub fn click_effect_shape(animation: ClickAnimation, progress: f64) -> ClickEffectShape {
    let p = progress.clamp(0.0, 1.0);
    match animation {
        ClickAnimation::Ripple => ClickEffectShape {
            radius: RIPPLE_MAX_RADIUS * p,
            stroke: Some(RIPPLE_STROKE_PX),
            alpha: 1.0 - p,
        },
        ClickAnimation::Pulse => ClickEffectShape {
            radius: (p * PI).sin() * PULSE_MAX_RADIUS,
            stroke: None,
            alpha: (1.0 - p) * PULSE_MAX_ALPHA,
        },
        ClickAnimation::Ring => ClickEffectShape {
            radius: RING_BASE_RADIUS + RING_GROWTH * p,
            stroke: Some(RING_MAX_STROKE_PX * (1.0 - p)),
            alpha: 1.0 - p,
        },
    }
}

fn blend(pixel: &mut Rgba<u8>, color: [u8; 3], alpha: f64) {
    let alpha = alpha.clamp(0.0, 1.0);
    for (channel, value) in pixel.0.iter_mut().zip(color) {
        let mixed = *channel as f64 * (1.0 - alpha) + value as f64 * alpha;
        *channel = mixed.round().clamp(0.0, 255.0) as u8;
    }
    let coverage = pixel.0[3] as f64 + (255.0 - pixel.0[3] as f64) * alpha;
    pixel.0[3] = coverage.round().clamp(0.0, 255.0) as u8;
}

/// Draws a circle outline (`stroke = Some(width)`) or a filled disc.
fn draw_circle(
    image: &mut RgbaImage,
    cx: f64,
    cy: f64,
    radius: f64,
    stroke: Option<f64>,
    color: [u8; 3],
    alpha: f64,
) {
    if radius <= 0.0 || alpha <= 0.0 {
        return;
    }
    let half_stroke = stroke.map_or(0.0, |width| width.max(0.0) * 0.5);
    if stroke.is_some() && half_stroke <= 0.0 {
        return;
    }
    let outer = radius + half_stroke;
    let inner = if stroke.is_some() { radius - half_stroke } else { 0.0 };
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let x0 = (cx - outer).floor().max(0.0) as u32;
    let y0 = (cy - outer).floor().max(0.0) as u32;
    let x1 = ((cx + outer).ceil().max(0.0) as u32).min(width - 1);
    let y1 = ((cy + outer).ceil().max(0.0) as u32).min(height - 1);

    for y in y0..=y1 {
        for x in x0..=x1 {
            let distance = (x as f64 + 0.5 - cx).hypot(y as f64 + 0.5 - cy);
            if distance <= outer && distance >= inner {
                blend(image.get_pixel_mut(x, y), color, alpha);
            }
        }
    }
}

/// Turns (frame, snapshot) pairs into output frames.
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    mouse: MouseSettings,
    output_size: Option<(u32, u32)>,
    filter: FilterType,
}

impl FrameCompositor {
    pub fn new(mouse: MouseSettings) -> Self {
        Self {
            mouse,
            output_size: None,
            filter: FilterType::Triangle,
        }
    }

    /// Fixed output resolution; by default the output matches the source.
    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.output_size = Some((width.max(1), height.max(1)));
        self
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Renders one output frame. `FrameNotReady` when the source has not
    /// produced a frame yet; callers skip the tick.
    pub fn render(
        &self,
        frame: Option<&RgbaImage>,
        snapshot: &ViewportSnapshot,
        now: u64,
    ) -> Result<RgbaImage> {
        let frame = frame.ok_or(EngineError::FrameNotReady)?;
        let (frame_width, frame_height) = frame.dimensions();
        if frame_width == 0 || frame_height == 0 {
            return Err(EngineError::FrameNotReady);
        }
        let (output_width, output_height) = self.output_size.unwrap_or((frame_width, frame_height));

        let crop = crop_rect(
            frame_width,
            frame_height,
            render_zoom(snapshot, now),
            snapshot.state.center,
        );
        let unscaled = (output_width, output_height) == (frame_width, frame_height);
        let mut output = if unscaled && crop.is_full_frame(frame_width, frame_height) {
            frame.clone()
        } else {
            let cropped =
                imageops::crop_imm(frame, crop.x, crop.y, crop.width, crop.height).to_image();
            imageops::resize(&cropped, output_width, output_height, self.filter)
        };

        let to_output = |point: RelativePoint| {
            map_cursor(point, frame_width, frame_height, &crop, output_width, output_height)
        };
        let color = self.mouse.highlight_rgb();

        if self.mouse.highlight {
            if let Some((x, y)) = snapshot.cursor.and_then(to_output) {
                draw_circle(
                    &mut output,
                    x,
                    y,
                    self.mouse.highlight_size.max(0.0) * HIGHLIGHT_RADIUS_PER_SIZE,
                    Some(HIGHLIGHT_STROKE_PX),
                    color,
                    1.0,
                );
            }
        }

        if self.mouse.click_effects {
            if let Some(click) = snapshot.last_click {
                let elapsed = now.saturating_sub(click.ts);
                let duration = self.mouse.click_effect_ms.max(1);
                if elapsed < duration {
                    if let Some((x, y)) = to_output(click.position) {
                        let shape = click_effect_shape(
                            self.mouse.click_animation,
                            elapsed as f64 / duration as f64,
                        );
                        draw_circle(&mut output, x, y, shape.radius, shape.stroke, color, shape.alpha);
                    }
                }
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::viewport::{ClickMark, ViewportState, ZoomTransition};

    fn snapshot(zoom: f64, center: RelativePoint) -> ViewportSnapshot {
        ViewportSnapshot {
            state: ViewportState {
                zoom_level: zoom,
                target_zoom_level: zoom,
                center,
                target_center: center,
                transition: ZoomTransition::idle(zoom),
            },
            ..ViewportSnapshot::default()
        }
    }

    fn quiet_mouse() -> MouseSettings {
        MouseSettings {
            highlight: false,
            ..MouseSettings::default()
        }
    }

    #[test]
    fn crop_is_centered_and_scaled_by_zoom() {
        let crop = crop_rect(1_920, 1_080, 2.0, RelativePoint::CENTER);
        assert_eq!(
            crop,
            CropRect {
                x: 480,
                y: 270,
                width: 960,
                height: 540,
            }
        );
    }

    #[test]
    fn crop_is_clamped_inside_frame() {
        let crop = crop_rect(1_920, 1_080, 2.0, RelativePoint::new(0.98, 0.01));
        assert_eq!(crop.x, 960);
        assert_eq!(crop.y, 0);

        let wide = crop_rect(1_920, 1_080, 0.5, RelativePoint::new(0.9, 0.9));
        assert!(wide.is_full_frame(1_920, 1_080));
        let broken = crop_rect(1_920, 1_080, f64::NAN, RelativePoint::CENTER);
        assert!(broken.is_full_frame(1_920, 1_080));
    }

    #[test]
    fn cursor_maps_through_crop_and_scale() {
        let crop = crop_rect(1_920, 1_080, 2.0, RelativePoint::CENTER);
        let (x, y) = map_cursor(RelativePoint::CENTER, 1_920, 1_080, &crop, 1_920, 1_080)
            .expect("center visible");
        assert!((x - 960.0).abs() < 1e-9);
        assert!((y - 540.0).abs() < 1e-9);
        assert!(map_cursor(RelativePoint::new(0.1, 0.1), 1_920, 1_080, &crop, 1_920, 1_080).is_none());
    }

    #[test]
    fn render_skips_missing_frame() {
        let compositor = FrameCompositor::new(quiet_mouse());
        let result = compositor.render(None, &ViewportSnapshot::default(), 0);
        assert!(matches!(result, Err(EngineError::FrameNotReady)));
    }

    #[test]
    fn render_crops_to_zoomed_region() {
        let mut frame = RgbaImage::from_pixel(40, 20, Rgba([0, 0, 0, 255]));
        for y in 5..15 {
            for x in 10..30 {
                frame.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        let compositor = FrameCompositor::new(quiet_mouse()).with_filter(FilterType::Nearest);
        let output = compositor
            .render(Some(&frame), &snapshot(2.0, RelativePoint::CENTER), 0)
            .expect("rendered frame");
        assert_eq!(output.dimensions(), (40, 20));
        assert!(output.pixels().all(|pixel| pixel.0 == [255, 0, 0, 255]));
    }

    #[test]
    fn render_interpolates_active_transition() {
        let mut zooming = snapshot(1.0, RelativePoint::CENTER);
        zooming.state.transition = ZoomTransition::start(1.0, 2.0, 0, 100);
        assert!((render_zoom(&zooming, 0) - 1.0).abs() < 1e-9);
        assert!((render_zoom(&zooming, 100) - 2.0).abs() < 1e-9);
        let halfway = render_zoom(&zooming, 50);
        assert!(halfway > 1.5 && halfway < 2.0);
    }

    #[test]
    fn highlight_ring_is_drawn_at_cursor() {
        let frame = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let mut snap = snapshot(1.0, RelativePoint::CENTER);
        snap.cursor = Some(RelativePoint::CENTER);
        let compositor = FrameCompositor::new(MouseSettings::default());
        let output = compositor.render(Some(&frame), &snap, 0).expect("rendered frame");
        assert_eq!(output.get_pixel(62, 50).0, [0x1d, 0xb9, 0x54, 255]);
        assert_eq!(output.get_pixel(50, 50).0, [0, 0, 0, 255]);
    }

    #[test]
    fn click_effects_fade_out() {
        let ripple = click_effect_shape(ClickAnimation::Ripple, 0.5);
        assert!((ripple.radius - 25.0).abs() < 1e-9);
        assert!((ripple.alpha - 0.5).abs() < 1e-9);
        let pulse = click_effect_shape(ClickAnimation::Pulse, 0.5);
        assert!((pulse.radius - 30.0).abs() < 1e-9);
        assert!(pulse.stroke.is_none());
        let ring = click_effect_shape(ClickAnimation::Ring, 1.0);
        assert!((ring.radius - 50.0).abs() < 1e-9);
        assert_eq!(ring.alpha, 0.0);

        let frame = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let mut snap = snapshot(1.0, RelativePoint::CENTER);
        snap.last_click = Some(ClickMark {
            position: RelativePoint::CENTER,
            ts: 1_000,
        });
        let compositor = FrameCompositor::new(MouseSettings {
            highlight: false,
            click_effects: true,
            click_animation: ClickAnimation::Pulse,
            ..MouseSettings::default()
        });
        let fresh = compositor.render(Some(&frame), &snap, 1_500).expect("rendered frame");
        assert_ne!(fresh.get_pixel(50, 50).0, [0, 0, 0, 255]);
        let expired = compositor.render(Some(&frame), &snap, 2_100).expect("rendered frame");
        assert_eq!(expired.get_pixel(50, 50).0, [0, 0, 0, 255]);
    }
}
