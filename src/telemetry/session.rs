//! Tracking session: one tokio task owning the pipeline and its three
//! polling cadences.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::host::CaptureHost;
use crate::error::{EngineError, Result};
use crate::models::events::KeyPress;
use crate::models::settings::EngineSettings;
use crate::models::viewport::ViewportSnapshot;
use crate::telemetry::clock::SessionClock;
use crate::telemetry::pipeline::{PipelineStats, ViewportPipeline};

const CURSOR_INTERVAL_MS: u64 = 16;
const DETECTION_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub display_id: Option<u32>,
}

fn ticker(period_ms: u64) -> Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// A running tracking session. Dropping it cancels the task; `stop` also
/// waits for teardown.
pub struct TrackingSession {
    info: SessionInfo,
    clock: SessionClock,
    cancel: CancellationToken,
    handle: Option<JoinHandle<PipelineStats>>,
    snapshots: watch::Receiver<ViewportSnapshot>,
}

impl TrackingSession {
    /// Spawns the polling task. Key presses from the host arrive on
    /// `key_events`; a closed channel only stops keyboard correlation.
    pub fn start<H: CaptureHost>(
        mut host: H,
        settings: EngineSettings,
        display_id: Option<u32>,
        mut key_events: mpsc::Receiver<KeyPress>,
    ) -> Self {
        let clock = SessionClock::start();
        let info = SessionInfo {
            id: Uuid::new_v4(),
            started_at: clock.started_at(),
            display_id,
        };
        let zoom_interval_ms = settings.zoom.reevaluate_interval_ms;
        let mut pipeline = ViewportPipeline::new(settings, display_id);
        let (snapshot_tx, snapshots) = watch::channel(ViewportSnapshot::default());
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let session_id = info.id;

        log::info!("TrackingSession: starting {session_id} display={display_id:?}");
        let handle = tokio::spawn(async move {
            let mut cursor = ticker(CURSOR_INTERVAL_MS);
            let mut detection = ticker(DETECTION_INTERVAL_MS);
            let mut zoom = ticker(zoom_interval_ms);
            let mut keys_open = true;
            pipeline.start(&mut host, clock.now_ms());

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = cursor.tick() => {
                        let now = clock.now_ms();
                        pipeline.on_cursor_tick(&mut host, now);
                        snapshot_tx.send_replace(pipeline.snapshot(now));
                    }
                    key = key_events.recv(), if keys_open => match key {
                        Some(key) => {
                            let now = clock.now_ms();
                            pipeline.on_key_press(&KeyPress { ts: now, ..key }, now);
                        }
                        None => {
                            log::debug!("TrackingSession: key channel closed");
                            keys_open = false;
                        }
                    },
                    _ = detection.tick() => pipeline.on_detection_tick(clock.now_ms()),
                    _ = zoom.tick() => {
                        let now = clock.now_ms();
                        pipeline.on_zoom_tick(now);
                        snapshot_tx.send_replace(pipeline.snapshot(now));
                    }
                }
            }

            let stats = pipeline.stats(clock.now_ms());
            pipeline.stop();
            snapshot_tx.send_replace(ViewportSnapshot::default());
            log::info!(
                "TrackingSession: {session_id} stopped observations={} skippedTicks={}",
                stats.observations,
                stats.skipped_ticks
            );
            stats
        });

        Self {
            info,
            clock,
            cancel,
            handle: Some(handle),
            snapshots,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn clock(&self) -> SessionClock {
        self.clock
    }

    /// Latest-value channel of viewport snapshots, for the render loop.
    pub fn snapshots(&self) -> watch::Receiver<ViewportSnapshot> {
        self.snapshots.clone()
    }

    /// Cancels polling and waits until all state is discarded. No tick
    /// fires after this returns.
    pub async fn stop(mut self) -> Result<PipelineStats> {
        self.cancel.cancel();
        let handle = self.handle.take().ok_or(EngineError::SessionClosed)?;
        handle.await.map_err(|err| {
            log::warn!("TrackingSession: task failed to join: {err}");
            EngineError::SessionClosed
        })
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owns at most one tracking session.
#[derive(Default)]
pub struct TrackingController {
    session: Option<TrackingSession>,
}

impl TrackingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<H: CaptureHost>(
        &mut self,
        host: H,
        settings: EngineSettings,
        display_id: Option<u32>,
        key_events: mpsc::Receiver<KeyPress>,
    ) -> Result<SessionInfo> {
        if self.session.is_some() {
            return Err(EngineError::SessionActive);
        }
        let session = TrackingSession::start(host, settings, display_id, key_events);
        let info = session.info().clone();
        self.session = Some(session);
        Ok(info)
    }

    pub async fn stop(&mut self) -> Result<PipelineStats> {
        let session = self.session.take().ok_or(EngineError::SessionClosed)?;
        session.stop().await
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }
}
