use anyhow::{anyhow, Result};
use url::Url;

use super::{FrameSource, SourceSettings, SourceStats};
use crate::error::SentryError;
use crate::frame::Frame;

/// Synthetic `stub://` source.
///
/// Query parameters:
/// - `frames=N`: end the stream after N frames (default: endless)
/// - `fail_after=N`: every read after the N-th frame fails
pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    max_frames: Option<u64>,
    fail_after: Option<u64>,
    connected: bool,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            max_frames: None,
            fail_after: None,
            connected: false,
            frame_count: 0,
        }
    }

    pub fn from_url(url: &Url, settings: &SourceSettings) -> Result<Self, SentryError> {
        let name = url.host_str().unwrap_or("synthetic").to_string();
        let mut source = Self::new(name, settings.width, settings.height);
        for (key, value) in url.query_pairs() {
            let parsed = value.parse::<u64>().map_err(|_| {
                SentryError::MediaUnavailable(format!("invalid {}='{}' in {}", key, value, url))
            })?;
            match key.as_ref() {
                "frames" => source.max_frames = Some(parsed),
                "fail_after" => source.fail_after = Some(parsed),
                other => {
                    return Err(SentryError::MediaUnavailable(format!(
                        "unknown stub parameter '{}'",
                        other
                    )))
                }
            }
        }
        Ok(source)
    }

    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * 3;
        (0..pixel_count)
            .map(|i| ((i as u64 + self.frame_count) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("synthetic source {} has zero size", self.name));
        }
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to stub://{} ({}x{})",
            self.name,
            self.width,
            self.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self.max_frames.is_some_and(|max| self.frame_count >= max) {
            return Ok(None);
        }
        if self.fail_after.is_some_and(|n| self.frame_count >= n) {
            return Err(anyhow!("synthetic source {} failed", self.name));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.width, self.height, self.frame_count).map(Some)
    }

    fn is_healthy(&self) -> bool {
        self.connected && !self.fail_after.is_some_and(|n| self.frame_count >= n)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: format!("stub://{}", self.name),
        }
    }
}
