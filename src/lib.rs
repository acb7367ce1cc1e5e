pub mod algorithm;
pub mod capture;
pub mod error;
pub mod models;
pub mod telemetry;

pub use algorithm::compositor::FrameCompositor;
pub use algorithm::viewport::ViewportEngine;
pub use capture::host::{CaptureHost, DisplayInfo, FrameSink, FrameSource};
pub use capture::render_loop::{HostVisibility, RenderLoop, RenderScheduler};
pub use error::{EngineError, Result};
pub use models::settings::EngineSettings;
pub use models::viewport::ViewportSnapshot;
pub use telemetry::pipeline::ViewportPipeline;
pub use telemetry::session::{TrackingController, TrackingSession};

/// Installs the `env_logger` backend (reads `RUST_LOG`, defaults to `info`).
/// Safe to call more than once.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    if env_logger::Builder::from_env(env).try_init().is_ok() {
        log::info!("smartcam {} logging initialised", env!("CARGO_PKG_VERSION"));
    }
}
