//! Frame loop state machine.
//!
//! ```text
//! Idle -> WaitingForModel -> Ready -> Running -> Stopped
//! ```
//!
//! The detector loads on a background thread. The camera can only be enabled
//! once it is ready; after that the loop processes one frame at a time,
//! paced by a `FrameScheduler`, until the stream ends, the source keeps
//! failing, or the stop flag is raised.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::detect::{LoadResult, PendingModel};
use crate::error::SentryError;
use crate::frame::Frame;
use crate::gate::{VerificationOutcome, VerificationTicket};
use crate::ingest::FrameSource;
use crate::mask::MaskHandle;
use crate::session::{FrameReport, Session};

pub const DEFAULT_REFRESH_HZ: u32 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    WaitingForModel,
    Ready,
    Running,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The source reported end of stream.
    StreamEnded,
    /// The stop flag was raised.
    Stopped,
    /// Too many consecutive capture errors.
    SourceLost,
}

/// Paces the loop between frames.
pub trait FrameScheduler: Send {
    fn wait_next(&mut self);
}

/// Runs at most once per display refresh period.
pub struct RefreshScheduler {
    period: Duration,
    next: Option<Instant>,
}

impl RefreshScheduler {
    pub fn new(refresh_hz: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / refresh_hz.max(1),
            next: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl FrameScheduler for RefreshScheduler {
    fn wait_next(&mut self) {
        let now = Instant::now();
        let target = self.next.map_or(now + self.period, |next| next.max(now));
        if target > now {
            std::thread::sleep(target - now);
        }
        self.next = Some(target + self.period);
    }
}

/// No pacing. Used by tests and offline replays.
#[derive(Debug, Default)]
pub struct ImmediateScheduler;

impl FrameScheduler for ImmediateScheduler {
    fn wait_next(&mut self) {}
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub max_consecutive_errors: u32,
    pub status_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 30,
            status_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub detections: u64,
    pub detection_failures: u64,
    pub excluded: u64,
    pub dispatched: u64,
    pub rate_limited: u64,
    pub aborted: u64,
    pub matched: u64,
    pub verification_failures: u64,
    pub source_errors: u64,
}

impl LoopStats {
    fn record_frame(&mut self, report: &FrameReport) {
        self.frames += 1;
        self.detections += report.detections as u64;
        self.excluded += report.excluded as u64;
        self.dispatched += report.dispatched() as u64;
        self.rate_limited += report.rate_limited as u64;
        self.aborted += report.aborted as u64;
    }

    fn record_outcome(&mut self, outcome: &VerificationOutcome) {
        match outcome {
            VerificationOutcome::Matched => self.matched += 1,
            VerificationOutcome::Failed(_) => self.verification_failures += 1,
            VerificationOutcome::NoMatch | VerificationOutcome::Rejected => {}
        }
    }
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} detections={} detect_failures={} excluded={} dispatched={} rate_limited={} aborted={} matched={} verify_failures={} source_errors={}",
            self.frames,
            self.detections,
            self.detection_failures,
            self.excluded,
            self.dispatched,
            self.rate_limited,
            self.aborted,
            self.matched,
            self.verification_failures,
            self.source_errors
        )
    }
}

pub struct FrameLoop {
    state: LoopState,
    session: Session,
    pending: Option<PendingModel>,
    source: Option<Box<dyn FrameSource>>,
    first_frame: Option<Frame>,
    scheduler: Box<dyn FrameScheduler>,
    settings: LoopSettings,
    stats: LoopStats,
    in_flight: Vec<VerificationTicket>,
}

impl FrameLoop {
    pub fn new(session: Session, scheduler: Box<dyn FrameScheduler>, settings: LoopSettings) -> Self {
        Self {
            state: LoopState::Idle,
            session,
            pending: None,
            source: None,
            first_frame: None,
            scheduler,
            settings,
            stats: LoopStats::default(),
            in_flight: Vec::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Shared mask, for painting while the loop runs.
    pub fn mask(&self) -> MaskHandle {
        self.session.mask().clone()
    }

    /// Idle -> WaitingForModel.
    pub fn begin_model_load(&mut self, pending: PendingModel) {
        if self.state != LoopState::Idle {
            log::warn!("model load already started (state {:?})", self.state);
            return;
        }
        log::info!("loading detection model");
        self.pending = Some(pending);
        self.state = LoopState::WaitingForModel;
    }

    /// Non-blocking: WaitingForModel -> Ready once the load has finished.
    pub fn poll_model(&mut self) -> Result<LoopState, SentryError> {
        let result = match &self.pending {
            Some(pending) => pending.poll(),
            None => return Ok(self.state),
        };
        self.complete_model_load(result)
    }

    /// Block up to `timeout` for the model.
    pub fn wait_for_model(&mut self, timeout: Duration) -> Result<LoopState, SentryError> {
        let result = match &self.pending {
            Some(pending) => pending.wait(timeout),
            None => return Ok(self.state),
        };
        self.complete_model_load(result)
    }

    fn complete_model_load(&mut self, result: Option<LoadResult>) -> Result<LoopState, SentryError> {
        let Some(result) = result else {
            return Ok(self.state);
        };
        let elapsed = self
            .pending
            .take()
            .map(|p| p.elapsed())
            .unwrap_or_default();
        match result {
            Ok(detector) => {
                log::info!(
                    "model '{}' ready after {} ms",
                    detector.name(),
                    elapsed.as_millis()
                );
                self.session.install_detector(detector);
                self.state = LoopState::Ready;
                Ok(self.state)
            }
            Err(e) => {
                log::error!("{}", e);
                self.state = LoopState::Stopped;
                Err(e)
            }
        }
    }

    /// Ready -> Running. Connects the source and waits for the first frame.
    ///
    /// Refused with `ModelNotReady` until a detector is installed, and with
    /// `MediaUnavailable` once the camera has been enabled.
    pub fn enable_camera(&mut self, mut source: Box<dyn FrameSource>) -> Result<(), SentryError> {
        self.poll_model()?;
        match self.state {
            LoopState::Ready => {}
            LoopState::Running => {
                log::warn!("camera enable ignored: already running");
                return Err(SentryError::MediaUnavailable("camera already enabled".to_string()));
            }
            LoopState::Stopped if self.session.has_detector() => {
                log::warn!("camera enable ignored: frame loop stopped");
                return Err(SentryError::MediaUnavailable("frame loop stopped".to_string()));
            }
            state => {
                log::warn!("camera enable ignored: model not ready (state {:?})", state);
                return Err(SentryError::ModelNotReady);
            }
        }

        let unavailable = |e: anyhow::Error| {
            let err = SentryError::MediaUnavailable(format!("{:#}", e));
            log::error!("{}", err);
            err
        };
        source.connect().map_err(unavailable)?;
        let first = source.next_frame().map_err(unavailable)?.ok_or_else(|| {
            let err = SentryError::MediaUnavailable("stream ended before the first frame".to_string());
            log::error!("{}", err);
            err
        })?;

        log::info!(
            "camera enabled: {} ({}x{})",
            source.stats().source,
            first.width,
            first.height
        );
        self.session.on_video_dimensions(first.width, first.height);
        self.first_frame = Some(first);
        self.source = Some(source);
        self.state = LoopState::Running;
        Ok(())
    }

    /// Process frames until the stream ends, the source is lost or `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<LoopExit, SentryError> {
        if self.state != LoopState::Running {
            return Err(SentryError::MediaUnavailable(format!(
                "camera not enabled (state {:?})",
                self.state
            )));
        }
        let Some(mut source) = self.source.take() else {
            return Err(SentryError::MediaUnavailable("no frame source".to_string()));
        };

        let mut consecutive_errors = 0u32;
        let mut last_status = Instant::now();
        let exit = loop {
            if stop.load(Ordering::SeqCst) {
                break LoopExit::Stopped;
            }

            let next = match self.first_frame.take() {
                Some(frame) => Ok(Some(frame)),
                None => source.next_frame(),
            };
            match next {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    self.process(&frame);
                }
                Ok(None) => break LoopExit::StreamEnded,
                Err(e) => {
                    consecutive_errors += 1;
                    self.stats.source_errors += 1;
                    log::warn!(
                        "frame capture failed ({}/{}): {:#}",
                        consecutive_errors,
                        self.settings.max_consecutive_errors,
                        e
                    );
                    if consecutive_errors >= self.settings.max_consecutive_errors {
                        break LoopExit::SourceLost;
                    }
                }
            }

            self.reap_verifications(false);
            if last_status.elapsed() >= self.settings.status_interval {
                log::info!(
                    "status: healthy={} {}",
                    source.is_healthy(),
                    self.stats
                );
                last_status = Instant::now();
            }
            self.scheduler.wait_next();
        };

        self.session.clear_overlay();
        self.state = LoopState::Stopped;
        log::info!("frame loop exited: {:?} ({})", exit, self.stats);
        Ok(exit)
    }

    fn process(&mut self, frame: &Frame) {
        match self.session.process_frame(frame, Instant::now()) {
            Ok(mut report) => {
                self.stats.record_frame(&report);
                self.in_flight.append(&mut report.tickets);
            }
            Err(e) => {
                self.stats.frames += 1;
                self.stats.detection_failures += 1;
                log::warn!("frame {} skipped [{}]: {}", frame.index, e.kind(), e);
            }
        }
    }

    fn reap_verifications(&mut self, block: bool) {
        let (done, pending): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|t| block || t.is_finished());
        self.in_flight = pending;
        for ticket in done {
            let outcome = ticket.wait();
            self.stats.record_outcome(&outcome);
        }
    }

    /// Block until every dispatched verification has been handled.
    pub fn wait_for_verifications(&mut self) {
        self.reap_verifications(true);
    }

    pub fn verifications_in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::LogAlarm;
    use crate::detect::{DetectorBackend, ScriptedBackend};
    use crate::filter::DetectionFilter;
    use crate::gate::{GateSettings, VerificationGate};
    use crate::ingest::SyntheticSource;
    use crate::mask::ExclusionMask;
    use crate::overlay::{MemorySurface, OverlayRenderer};
    use crate::verify::{VerificationResponse, Verifier};
    use std::sync::Arc;

    struct Silent;

    impl Verifier for Silent {
        fn verify(&self, _jpeg: &[u8]) -> Result<VerificationResponse, SentryError> {
            Ok(VerificationResponse::default())
        }
    }

    fn frame_loop() -> FrameLoop {
        let session = Session::new(
            MaskHandle::new(ExclusionMask::new(50.0)),
            DetectionFilter::default(),
            OverlayRenderer::new(Box::new(MemorySurface::new())),
            VerificationGate::new(GateSettings::default(), Arc::new(Silent), Arc::new(LogAlarm)),
        );
        FrameLoop::new(session, Box::new(ImmediateScheduler), LoopSettings::default())
    }

    fn ready_loop() -> FrameLoop {
        let mut fl = frame_loop();
        fl.begin_model_load(
            PendingModel::start(|| Ok(Box::new(ScriptedBackend::empty()) as Box<dyn DetectorBackend>))
                .unwrap(),
        );
        assert_eq!(fl.wait_for_model(Duration::from_secs(5)).unwrap(), LoopState::Ready);
        fl
    }

    #[test]
    fn camera_refused_before_model_ready() {
        let mut fl = frame_loop();
        assert_eq!(fl.state(), LoopState::Idle);
        let err = fl
            .enable_camera(Box::new(SyntheticSource::new("cam", 32, 24)))
            .unwrap_err();
        assert!(matches!(err, SentryError::ModelNotReady));
        assert_eq!(fl.state(), LoopState::Idle);
    }

    #[test]
    fn model_failure_stops_loop() {
        let mut fl = frame_loop();
        fl.begin_model_load(
            PendingModel::start(|| Err(SentryError::ModelLoad("bad weights".to_string()))).unwrap(),
        );
        assert!(matches!(
            fl.wait_for_model(Duration::from_secs(5)),
            Err(SentryError::ModelLoad(_))
        ));
        assert_eq!(fl.state(), LoopState::Stopped);
        assert!(matches!(
            fl.enable_camera(Box::new(SyntheticSource::new("cam", 16, 16))),
            Err(SentryError::ModelNotReady)
        ));
    }

    #[test]
    fn camera_enable_is_refused_once_running_or_stopped() {
        let mut fl = ready_loop();
        fl.enable_camera(Box::new(SyntheticSource::new("cam", 16, 16).with_max_frames(2)))
            .unwrap();
        let err = fl
            .enable_camera(Box::new(SyntheticSource::new("other", 16, 16)))
            .unwrap_err();
        assert!(matches!(err, SentryError::MediaUnavailable(_)));
        assert_eq!(fl.state(), LoopState::Running);

        assert_eq!(fl.run(&AtomicBool::new(false)).unwrap(), LoopExit::StreamEnded);
        let err = fl
            .enable_camera(Box::new(SyntheticSource::new("other", 16, 16)))
            .unwrap_err();
        assert!(matches!(err, SentryError::MediaUnavailable(_)));
        assert_eq!(fl.state(), LoopState::Stopped);
    }

    #[test]
    fn stream_end_exits_cleanly() {
        let mut fl = ready_loop();
        fl.enable_camera(Box::new(SyntheticSource::new("cam", 32, 24).with_max_frames(5)))
            .unwrap();
        assert_eq!(fl.state(), LoopState::Running);
        assert_eq!(fl.mask().read().width(), 32);

        let exit = fl.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(exit, LoopExit::StreamEnded);
        assert_eq!(fl.stats().frames, 5);
        assert_eq!(fl.state(), LoopState::Stopped);
    }

    #[test]
    fn empty_stream_is_media_unavailable() {
        let mut fl = ready_loop();
        let err = fl
            .enable_camera(Box::new(SyntheticSource::new("cam", 32, 24).with_max_frames(0)))
            .unwrap_err();
        assert!(matches!(err, SentryError::MediaUnavailable(_)));
        assert_eq!(fl.state(), LoopState::Ready);
    }

    #[test]
    fn unconnectable_source_is_media_unavailable() {
        let mut fl = ready_loop();
        let err = fl
            .enable_camera(Box::new(SyntheticSource::new("cam", 0, 0)))
            .unwrap_err();
        assert!(matches!(err, SentryError::MediaUnavailable(_)));
    }

    #[test]
    fn repeated_capture_errors_lose_source() {
        let mut fl = frame_loop();
        fl.settings.max_consecutive_errors = 3;
        fl.begin_model_load(
            PendingModel::start(|| Ok(Box::new(ScriptedBackend::empty()) as Box<dyn DetectorBackend>))
                .unwrap(),
        );
        fl.wait_for_model(Duration::from_secs(5)).unwrap();
        fl.enable_camera(Box::new(SyntheticSource::new("cam", 16, 16).failing_after(2)))
            .unwrap();
        assert_eq!(fl.run(&AtomicBool::new(false)).unwrap(), LoopExit::SourceLost);
        assert_eq!(fl.stats().frames, 2);
        assert_eq!(fl.stats().source_errors, 3);
    }

    #[test]
    fn stop_flag_halts_loop() {
        let mut fl = ready_loop();
        fl.enable_camera(Box::new(SyntheticSource::new("cam", 16, 16)))
            .unwrap();
        let stop = AtomicBool::new(true);
        assert_eq!(fl.run(&stop).unwrap(), LoopExit::Stopped);
        assert!(fl.run(&stop).is_err());
    }

    #[test]
    fn refresh_scheduler_paces_frames() {
        let mut scheduler = RefreshScheduler::new(100);
        assert_eq!(scheduler.period(), Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..3 {
            scheduler.wait_next();
        }
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
