//! Render loop: composites the latest capture frame with the latest viewport
//! snapshot on every scheduler tick.
//!
//! While the host window is visible ticks follow the display refresh; when it
//! is hidden the refresh signal stops, so the loop falls back to a fixed 60 Hz
//! timer. The compositor itself never knows which scheduler is driving it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::algorithm::compositor::FrameCompositor;
use crate::capture::host::{FrameSink, FrameSource};
use crate::error::{EngineError, Result};
use crate::models::viewport::ViewportSnapshot;
use crate::telemetry::clock::SessionClock;

const FALLBACK_FPS: u32 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HostVisibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleMode {
    /// One tick per host refresh notification.
    DisplayRefresh,
    /// Fixed-rate timer.
    FixedInterval,
}

impl ScheduleMode {
    pub fn for_visibility(visibility: HostVisibility) -> Self {
        match visibility {
            HostVisibility::Visible => ScheduleMode::DisplayRefresh,
            HostVisibility::Hidden => ScheduleMode::FixedInterval,
        }
    }
}

/// Picks between refresh-driven and timer-driven ticks from host visibility.
pub struct RenderScheduler {
    vsync: watch::Receiver<u64>,
    visibility: watch::Receiver<HostVisibility>,
    interval: Interval,
    mode: ScheduleMode,
    vsync_open: bool,
    visibility_open: bool,
    mode_switches: u64,
}

impl RenderScheduler {
    /// `vsync` carries a counter bumped by the host once per display refresh.
    pub fn new(vsync: watch::Receiver<u64>, visibility: watch::Receiver<HostVisibility>) -> Self {
        let period = Duration::from_micros(1_000_000 / FALLBACK_FPS as u64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mode = ScheduleMode::for_visibility(*visibility.borrow());
        Self {
            vsync,
            visibility,
            interval,
            mode,
            vsync_open: true,
            visibility_open: true,
            mode_switches: 0,
        }
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    pub fn mode_switches(&self) -> u64 {
        self.mode_switches
    }

    fn set_mode(&mut self, mode: ScheduleMode) {
        if mode == self.mode {
            return;
        }
        log::info!("RenderScheduler: switching to {mode:?}");
        self.mode = mode;
        self.mode_switches += 1;
        if mode == ScheduleMode::FixedInterval {
            self.interval.reset();
        }
    }

    fn refresh_mode(&mut self) {
        let wanted = ScheduleMode::for_visibility(*self.visibility.borrow_and_update());
        if wanted == ScheduleMode::DisplayRefresh && !self.vsync_open {
            return;
        }
        self.set_mode(wanted);
    }

    /// Waits for the next render tick.
    pub async fn next_tick(&mut self) {
        loop {
            match self.mode {
                ScheduleMode::DisplayRefresh => {
                    tokio::select! {
                        changed = self.vsync.changed(), if self.vsync_open => {
                            if changed.is_ok() {
                                return;
                            }
                            log::warn!("RenderScheduler: refresh signal closed, using timer");
                            self.vsync_open = false;
                            self.set_mode(ScheduleMode::FixedInterval);
                        }
                        changed = self.visibility.changed(), if self.visibility_open => {
                            match changed {
                                Ok(()) => self.refresh_mode(),
                                Err(_) => self.visibility_open = false,
                            }
                        }
                        else => self.set_mode(ScheduleMode::FixedInterval),
                    }
                }
                ScheduleMode::FixedInterval => {
                    tokio::select! {
                        _ = self.interval.tick() => return,
                        changed = self.visibility.changed(), if self.visibility_open => {
                            match changed {
                                Ok(()) => self.refresh_mode(),
                                Err(_) => self.visibility_open = false,
                            }
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RenderStats {
    pub rendered: u64,
    /// Ticks without a source frame.
    pub skipped: u64,
    pub sink_errors: u64,
    pub mode_switches: u64,
}

/// Handle to a spawned render task.
pub struct RenderLoop {
    cancel: CancellationToken,
    handle: Option<JoinHandle<RenderStats>>,
}

impl RenderLoop {
    pub fn spawn<S, K>(
        compositor: FrameCompositor,
        mut source: S,
        mut sink: K,
        snapshots: watch::Receiver<ViewportSnapshot>,
        mut scheduler: RenderScheduler,
        clock: SessionClock,
    ) -> Self
    where
        S: FrameSource,
        K: FrameSink,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut stats = RenderStats::default();
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = scheduler.next_tick() => {
                        let now = clock.now_ms();
                        let snapshot = snapshots.borrow().clone();
                        let frame = source.latest_frame();
                        match compositor.render(frame.as_ref(), &snapshot, now) {
                            Ok(output) => match sink.push_frame(output, now) {
                                Ok(()) => stats.rendered += 1,
                                Err(err) => {
                                    log::warn!("RenderLoop: sink rejected frame at {now}ms: {err}");
                                    stats.sink_errors += 1;
                                }
                            },
                            Err(EngineError::FrameNotReady) => stats.skipped += 1,
                            Err(err) => {
                                log::warn!("RenderLoop: render failed at {now}ms: {err}");
                                stats.skipped += 1;
                            }
                        }
                    }
                }
            }
            stats.mode_switches = scheduler.mode_switches();
            log::info!(
                "RenderLoop: stopped rendered={} skipped={} sinkErrors={}",
                stats.rendered,
                stats.skipped,
                stats.sink_errors
            );
            stats
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancels the task and waits for it; no frame is rendered afterwards.
    pub async fn stop(mut self) -> Result<RenderStats> {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return Err(EngineError::SessionClosed);
        };
        handle.await.map_err(|err| {
            log::warn!("RenderLoop: render task failed to join: {err}");
            EngineError::SessionClosed
        })
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::models::settings::MouseSettings;

    struct ScriptedSource {
        missing: usize,
    }

    impl FrameSource for ScriptedSource {
        fn latest_frame(&mut self) -> Option<RgbaImage> {
            if self.missing > 0 {
                self.missing -= 1;
                return None;
            }
            Some(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255])))
        }
    }

    #[derive(Clone, Default)]
    struct CollectingSink {
        frames: Arc<Mutex<Vec<u64>>>,
    }

    impl FrameSink for CollectingSink {
        fn push_frame(&mut self, _frame: RgbaImage, ts: u64) -> Result<()> {
            self.frames.lock().expect("sink lock").push(ts);
            Ok(())
        }
    }

    fn compositor() -> FrameCompositor {
        FrameCompositor::new(MouseSettings {
            highlight: false,
            ..MouseSettings::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_host_renders_on_fixed_timer() {
        let (_vsync_tx, vsync_rx) = watch::channel(0u64);
        let (_visibility_tx, visibility_rx) = watch::channel(HostVisibility::Hidden);
        let (_snapshot_tx, snapshot_rx) = watch::channel(ViewportSnapshot::default());
        let scheduler = RenderScheduler::new(vsync_rx, visibility_rx);
        assert_eq!(scheduler.mode(), ScheduleMode::FixedInterval);

        let sink = CollectingSink::default();
        let render = RenderLoop::spawn(
            compositor(),
            ScriptedSource { missing: 2 },
            sink.clone(),
            snapshot_rx,
            scheduler,
            SessionClock::start(),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = render.stop().await.expect("render loop joins");

        assert_eq!(stats.skipped, 2);
        assert!(stats.rendered >= 8, "rendered {}", stats.rendered);
        assert_eq!(
            sink.frames.lock().expect("sink lock").len() as u64,
            stats.rendered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn visible_host_renders_once_per_refresh() {
        let (vsync_tx, vsync_rx) = watch::channel(0u64);
        let (_visibility_tx, visibility_rx) = watch::channel(HostVisibility::Visible);
        let (_snapshot_tx, snapshot_rx) = watch::channel(ViewportSnapshot::default());
        let sink = CollectingSink::default();
        let render = RenderLoop::spawn(
            compositor(),
            ScriptedSource { missing: 0 },
            sink.clone(),
            snapshot_rx,
            RenderScheduler::new(vsync_rx, visibility_rx),
            SessionClock::start(),
        );

        for refresh in 1..=3u64 {
            vsync_tx.send_replace(refresh);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = render.stop().await.expect("render loop joins");
        assert_eq!(stats.rendered, 3);
        assert_eq!(stats.mode_switches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hiding_the_host_switches_to_timer() {
        let (_vsync_tx, vsync_rx) = watch::channel(0u64);
        let (visibility_tx, visibility_rx) = watch::channel(HostVisibility::Visible);
        let (_snapshot_tx, snapshot_rx) = watch::channel(ViewportSnapshot::default());
        let sink = CollectingSink::default();
        let render = RenderLoop::spawn(
            compositor(),
            ScriptedSource { missing: 0 },
            sink.clone(),
            snapshot_rx,
            RenderScheduler::new(vsync_rx, visibility_rx),
            SessionClock::start(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.frames.lock().expect("sink lock").is_empty());

        visibility_tx.send_replace(HostVisibility::Hidden);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = render.stop().await.expect("render loop joins");
        assert!(stats.rendered >= 4, "rendered {}", stats.rendered);
        assert_eq!(stats.mode_switches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_frames_after_stop() {
        let (_vsync_tx, vsync_rx) = watch::channel(0u64);
        let (_visibility_tx, visibility_rx) = watch::channel(HostVisibility::Hidden);
        let (_snapshot_tx, snapshot_rx) = watch::channel(ViewportSnapshot::default());
        let sink = CollectingSink::default();
        let render = RenderLoop::spawn(
            compositor(),
            ScriptedSource { missing: 0 },
            sink.clone(),
            snapshot_rx,
            RenderScheduler::new(vsync_rx, visibility_rx),
            SessionClock::start(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        render.stop().await.expect("render loop joins");
        let count = sink.frames.lock().expect("sink lock").len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.frames.lock().expect("sink lock").len(), count);
    }
}
