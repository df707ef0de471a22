//! HTTP camera source.
//!
//! `multipart/x-mixed-replace` responses are split into JPEG frames as they
//! arrive. Any other content type is treated as a snapshot endpoint and polled
//! once per frame period.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_GRACE: Duration = Duration::from_secs(5);
const MIN_STALE_AFTER: Duration = Duration::from_secs(2);

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

pub struct MjpegSource {
    settings: SourceSettings,
    mode: Option<Mode>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frames: u64,
    ended: bool,
}

enum Mode {
    Stream(JpegSplitter),
    Snapshot { next_poll: Instant },
}

impl MjpegSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            settings,
            mode: None,
            connected_at: None,
            last_frame_at: None,
            frames: 0,
            ended: false,
        }
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.settings.url)
            .call()
            .with_context(|| format!("connect to {}", self.settings.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_string();
        self.mode = Some(if content_type.to_lowercase().starts_with("multipart/") {
            Mode::Stream(JpegSplitter::new(response.into_reader()))
        } else {
            Mode::Snapshot {
                next_poll: Instant::now(),
            }
        });
        self.connected_at = Some(Instant::now());
        self.ended = false;
        log::info!("MjpegSource: connected to {} ({})", self.settings.url, content_type);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mode = self
            .mode
            .as_mut()
            .ok_or_else(|| anyhow!("http source not connected; call connect() first"))?;
        let jpeg = match mode {
            Mode::Stream(splitter) => match splitter.next_jpeg()? {
                Some(jpeg) => jpeg,
                None => {
                    self.ended = true;
                    log::info!(
                        "MjpegSource: {} ended after {} frames",
                        self.settings.url,
                        self.frames
                    );
                    return Ok(None);
                }
            },
            Mode::Snapshot { next_poll } => {
                let now = Instant::now();
                if *next_poll > now {
                    std::thread::sleep(*next_poll - now);
                }
                *next_poll = Instant::now() + frame_period(self.settings.target_fps);
                fetch_snapshot(&self.settings.url)?
            }
        };

        let image = image::load_from_memory(&jpeg)
            .context("decode jpeg")?
            .into_rgb8();
        let (width, height) = image.dimensions();
        self.frames += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(image.into_raw(), width, height, self.frames).map(Some)
    }

    fn is_healthy(&self) -> bool {
        if self.ended {
            return false;
        }
        match (self.connected_at, self.last_frame_at) {
            (None, _) => false,
            (Some(connected), None) => connected.elapsed() <= CONNECT_GRACE,
            (Some(_), Some(last)) => last.elapsed() <= stale_after(self.settings.target_fps),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames,
            source: self.settings.url.clone(),
        }
    }
}

/// Cuts a byte stream into JPEG images on SOI/EOI markers. Part headers and
/// boundaries between images are discarded.
struct JpegSplitter {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
    // Bytes after the SOI already searched for an EOI.
    scanned: usize,
}

impl JpegSplitter {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
            scanned: 0,
        }
    }

    /// Next complete JPEG, `None` at end of stream.
    fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(jpeg) = self.take_complete() {
                return Ok(Some(jpeg));
            }
            let read = self.reader.read(&mut chunk).context("read mjpeg stream")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
            if self.buffer.len() > MAX_JPEG_BYTES {
                log::warn!(
                    "MjpegSource: dropping {} bytes without a complete frame",
                    self.buffer.len()
                );
                self.buffer.clear();
                self.scanned = 0;
            }
        }
    }

    fn take_complete(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find_marker(&self.buffer, 0, SOI) else {
            // a trailing 0xFF may be the first half of the next SOI
            let keep_from = self.buffer.len().saturating_sub(1);
            self.buffer.drain(..keep_from);
            self.scanned = 0;
            return None;
        };
        if start > 0 {
            self.buffer.drain(..start);
            self.scanned = self.scanned.saturating_sub(start);
        }

        match find_marker(&self.buffer, self.scanned.max(SOI.len()), EOI) {
            Some(pos) => {
                self.scanned = 0;
                Some(self.buffer.drain(..pos + EOI.len()).collect())
            }
            None => {
                self.scanned = self.buffer.len().saturating_sub(1);
                None
            }
        }
    }
}

fn find_marker(buffer: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

fn fetch_snapshot(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch snapshot from {}", url))?;
    let mut jpeg = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut jpeg)
        .context("read snapshot body")?;
    if jpeg.is_empty() {
        return Err(anyhow!("empty snapshot from {}", url));
    }
    Ok(jpeg)
}

fn frame_period(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / target_fps
    }
}

/// No frame for this long marks the source unhealthy.
fn stale_after(target_fps: u32) -> Duration {
    (frame_period(target_fps) * 6).max(MIN_STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::RgbImage;
    use std::io::Cursor;

    fn tiny_jpeg() -> Vec<u8> {
        let image = RgbImage::from_pixel(4, 2, image::Rgb([10, 200, 30]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&image)
            .unwrap();
        out
    }

    fn multipart(parts: usize) -> Vec<u8> {
        let jpeg = tiny_jpeg();
        let mut stream = Vec::new();
        for _ in 0..parts {
            stream.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            stream.extend_from_slice(&jpeg);
            stream.extend_from_slice(b"\r\n");
        }
        stream
    }

    /// Hands out one byte per read.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    #[test]
    fn markers_are_found_from_offset() {
        let buf = [0x00, 0xFF, 0xD8, 0x01, 0xFF, 0xD9, 0xFF, 0xD9];
        assert_eq!(find_marker(&buf, 0, SOI), Some(1));
        assert_eq!(find_marker(&buf, 0, EOI), Some(4));
        assert_eq!(find_marker(&buf, 5, EOI), Some(6));
        assert_eq!(find_marker(&buf, 20, EOI), None);
    }

    #[test]
    fn splits_stream_and_reports_end() {
        let mut splitter = JpegSplitter::new(Box::new(Cursor::new(multipart(2))));
        for _ in 0..2 {
            let jpeg = splitter.next_jpeg().unwrap().unwrap();
            let image = image::load_from_memory(&jpeg).unwrap().into_rgb8();
            assert_eq!(image.dimensions(), (4, 2));
        }
        assert!(splitter.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn markers_split_across_reads() {
        let expected = tiny_jpeg();
        let mut splitter = JpegSplitter::new(Box::new(Trickle(Cursor::new(multipart(3)))));
        for _ in 0..3 {
            assert_eq!(splitter.next_jpeg().unwrap().unwrap(), expected);
        }
        assert!(splitter.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn junk_without_images_ends_cleanly() {
        let mut splitter = JpegSplitter::new(Box::new(Cursor::new(vec![0x42; 50_000])));
        assert!(splitter.next_jpeg().unwrap().is_none());
        assert!(splitter.buffer.len() <= 1);
    }

    #[test]
    fn pacing_helpers() {
        assert_eq!(frame_period(0), Duration::ZERO);
        assert_eq!(frame_period(10), Duration::from_millis(100));
        assert_eq!(stale_after(30), Duration::from_secs(2));
        assert_eq!(stale_after(1), Duration::from_secs(6));
    }

    #[test]
    fn unconnected_source_errors() {
        let mut source = MjpegSource::new(SourceSettings {
            url: "http://127.0.0.1:9/stream".to_string(),
            ..SourceSettings::default()
        });
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
    }
}
