//! Per-session context: the detector, exclusion mask, overlay and verification
//! gate owned together and threaded through the frame loop.

use std::time::Instant;

use crate::detect::DetectorBackend;
use crate::error::SentryError;
use crate::filter::DetectionFilter;
use crate::frame::Frame;
use crate::gate::{GateDecision, VerificationGate, VerificationTicket};
use crate::mask::{MaskHandle, Point};
use crate::overlay::OverlayRenderer;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// What happened to one processed frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Raw detections reported by the model.
    pub detections: usize,
    /// Overlay elements on the surface after this frame.
    pub rendered: usize,
    pub actionable: usize,
    pub excluded: usize,
    pub rate_limited: usize,
    pub aborted: usize,
    /// Verifications dispatched for this frame (at most one while the cooldown holds).
    pub tickets: Vec<VerificationTicket>,
}

impl FrameReport {
    pub fn dispatched(&self) -> usize {
        self.tickets.len()
    }
}

pub struct Session {
    detector: Option<Box<dyn DetectorBackend>>,
    mask: MaskHandle,
    filter: DetectionFilter,
    overlay: OverlayRenderer,
    gate: VerificationGate,
    preset_strokes: Vec<Vec<Point>>,
    jpeg_quality: u8,
}

impl Session {
    pub fn new(
        mask: MaskHandle,
        filter: DetectionFilter,
        overlay: OverlayRenderer,
        gate: VerificationGate,
    ) -> Self {
        Self {
            detector: None,
            mask,
            filter,
            overlay,
            gate,
            preset_strokes: Vec::new(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Polylines painted as soon as the mask learns the video size.
    pub fn with_preset_strokes(mut self, strokes: Vec<Vec<Point>>) -> Self {
        self.preset_strokes = strokes;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn install_detector(&mut self, detector: Box<dyn DetectorBackend>) {
        log::info!("detector '{}' installed", detector.name());
        self.detector = Some(detector);
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    pub fn mask(&self) -> &MaskHandle {
        &self.mask
    }

    pub fn gate(&self) -> &VerificationGate {
        &self.gate
    }

    /// Size the mask for the video. The first initialization replays preset strokes.
    pub fn on_video_dimensions(&mut self, width: u32, height: u32) {
        let mut mask = self.mask.write();
        let first = !mask.is_initialized();
        if !mask.ensure_size(width, height) {
            return;
        }
        log::info!("exclusion mask sized to {}x{}", mask.width(), mask.height());
        if first && !self.preset_strokes.is_empty() {
            let painted: usize = self
                .preset_strokes
                .iter()
                .map(|stroke| mask.paint_polyline(stroke))
                .sum();
            log::info!(
                "replayed {} preset strokes ({} cells excluded)",
                self.preset_strokes.len(),
                painted
            );
        }
    }

    /// Detect, filter, render and gate one frame.
    ///
    /// On a detection failure the overlay keeps the previous frame's elements
    /// and nothing is dispatched.
    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> Result<FrameReport, SentryError> {
        let detector = self.detector.as_mut().ok_or(SentryError::ModelNotReady)?;
        let raw = detector
            .detect(frame)
            .map_err(|e| SentryError::Detection(format!("{:#}", e)))?;

        self.on_video_dimensions(frame.width, frame.height);
        let outcome = {
            let mask = self.mask.read();
            self.filter.filter(&raw, &mask)
        };

        let mut report = FrameReport {
            frame_index: frame.index,
            detections: raw.len(),
            rendered: self.overlay.render(&outcome.high_confidence),
            actionable: outcome.actionable.len(),
            excluded: outcome.excluded_count(),
            ..FrameReport::default()
        };

        let mask = &self.mask;
        let quality = self.jpeg_quality;
        for screened in outcome.high_confidence.iter().filter(|s| s.is_actionable()) {
            let capture = || frame.snapshot_jpeg(&mask.read(), quality);
            match self.gate.consider(screened, capture, now) {
                GateDecision::Dispatched(ticket) => report.tickets.push(ticket),
                GateDecision::RateLimited { .. } => report.rate_limited += 1,
                GateDecision::Aborted(_) => report.aborted += 1,
                GateDecision::NotActionable => {}
            }
        }
        Ok(report)
    }

    pub fn clear_overlay(&mut self) {
        self.overlay.clear();
    }

    pub fn overlay_count(&self) -> usize {
        self.overlay.live_count()
    }
}
