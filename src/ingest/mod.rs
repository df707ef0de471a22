//! Video frame sources.
//!
//! - `stub://name`: synthetic frames, for headless runs and tests
//! - `http(s)://...`: MJPEG stream or single-JPEG snapshot endpoint
//!
//! Every source yields RGB24 `Frame`s in native resolution. `next_frame`
//! returning `Ok(None)` means the stream ended cleanly.

pub mod mjpeg;
pub mod synthetic;

pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;

use anyhow::Result;
use url::Url;

use crate::error::SentryError;
use crate::frame::Frame;

pub trait FrameSource: Send {
    /// Open the device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Block for the next frame. `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    pub url: String,
    /// Synthetic frame size. Network sources report their own.
    pub width: u32,
    pub height: u32,
    /// Source-side decimation. 0 disables it.
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: "stub://driveway".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Build the source for `settings.url`. Unsupported schemes are `MediaUnavailable`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>, SentryError> {
    let url = Url::parse(&settings.url)
        .map_err(|e| SentryError::MediaUnavailable(format!("invalid source url '{}': {}", settings.url, e)))?;
    match url.scheme() {
        "stub" => Ok(Box::new(SyntheticSource::from_url(&url, settings)?)),
        "http" | "https" => Ok(Box::new(MjpegSource::new(settings.clone()))),
        other => Err(SentryError::MediaUnavailable(format!(
            "unsupported source scheme '{}'; expected stub, http or https",
            other
        ))),
    }
}
