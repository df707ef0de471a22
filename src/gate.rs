//! Rate-limited dispatch of verification requests.
//!
//! A single process-wide timestamp guards admission: a request is only issued
//! when at least `cooldown` has elapsed since the previous one, no matter how
//! many actionable detections arrive in between. The timestamp is taken before
//! the snapshot is captured, so failed attempts still count against the window.
//!
//! Requests run on a detached thread; the caller never waits for the response.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alarm::AlarmSink;
use crate::error::SentryError;
use crate::filter::Screened;
use crate::verify::Verifier;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(2000);
pub const DEFAULT_TARGET_BRAND: &str = "jaguar";

/// How a dispatched verification ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Target brand recognized; the alarm was triggered once.
    Matched,
    /// Service succeeded without recognizing the target brand.
    NoMatch,
    /// Service answered with `is_success: false`.
    Rejected,
    /// Transport or parsing failure. Logged and dropped.
    Failed(String),
}

/// Handle to a detached verification. Dropping it does not cancel the request.
#[derive(Debug)]
pub struct VerificationTicket {
    handle: JoinHandle<VerificationOutcome>,
}

impl VerificationTicket {
    /// Block until the response has been handled.
    pub fn wait(self) -> VerificationOutcome {
        self.handle.join().unwrap_or_else(|_| {
            VerificationOutcome::Failed("verification thread panicked".to_string())
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Debug)]
pub enum GateDecision {
    NotActionable,
    RateLimited { remaining: Duration },
    /// Window consumed, but no request was sent.
    Aborted(SentryError),
    Dispatched(VerificationTicket),
}

impl GateDecision {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, GateDecision::Dispatched(_))
    }
}

#[derive(Clone, Debug)]
pub struct GateSettings {
    pub cooldown: Duration,
    pub target_brand: String,
    /// Where the latest submitted snapshot is written for inspection.
    pub debug_snapshot_path: Option<PathBuf>,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            target_brand: DEFAULT_TARGET_BRAND.to_string(),
            debug_snapshot_path: None,
        }
    }
}

pub struct VerificationGate {
    settings: GateSettings,
    last_request: Option<Instant>,
    verifier: Arc<dyn Verifier>,
    alarm: Arc<dyn AlarmSink>,
    dispatched: u64,
}

impl VerificationGate {
    pub fn new(settings: GateSettings, verifier: Arc<dyn Verifier>, alarm: Arc<dyn AlarmSink>) -> Self {
        Self {
            settings,
            last_request: None,
            verifier,
            alarm,
            dispatched: 0,
        }
    }

    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Admit or reject one detection at time `now`.
    ///
    /// `capture` produces the JPEG still and is only called once the request is admitted.
    pub fn consider<F>(&mut self, screened: &Screened, capture: F, now: Instant) -> GateDecision
    where
        F: FnOnce() -> Result<Vec<u8>, SentryError>,
    {
        if !screened.is_actionable() {
            return GateDecision::NotActionable;
        }

        if let Some(last) = self.last_request {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.settings.cooldown {
                let remaining = self.settings.cooldown - elapsed;
                log::debug!(
                    "verification rate limited for '{}' ({} ms left)",
                    screened.detection.class,
                    remaining.as_millis()
                );
                return GateDecision::RateLimited { remaining };
            }
        }
        self.last_request = Some(now);

        let jpeg = match capture() {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::error!("verification aborted [{}]: {}", e.kind(), e);
                return GateDecision::Aborted(e);
            }
        };
        self.write_debug_snapshot(&jpeg);

        self.dispatched += 1;
        let seq = self.dispatched;
        let verifier = Arc::clone(&self.verifier);
        let alarm = Arc::clone(&self.alarm);
        let brand = self.settings.target_brand.clone();
        log::info!(
            "verification #{} dispatched for '{}' ({:.0}% confidence, {} bytes)",
            seq,
            screened.detection.class,
            screened.detection.score * 100.0,
            jpeg.len()
        );

        let spawned = std::thread::Builder::new()
            .name(format!("verify-{}", seq))
            .spawn(move || handle_verification(verifier.as_ref(), alarm.as_ref(), &brand, &jpeg, seq));
        match spawned {
            Ok(handle) => GateDecision::Dispatched(VerificationTicket { handle }),
            Err(e) => {
                log::error!("failed to start verification thread: {}", e);
                GateDecision::Aborted(SentryError::VerificationTransport(e.to_string()))
            }
        }
    }

    fn write_debug_snapshot(&self, jpeg: &[u8]) {
        if let Some(path) = &self.settings.debug_snapshot_path {
            if let Err(e) = std::fs::write(path, jpeg) {
                log::warn!("failed to write debug snapshot {}: {}", path.display(), e);
            }
        }
    }
}

/// Submit one snapshot and act on the response. Alerts at most once per response.
pub fn handle_verification(
    verifier: &dyn Verifier,
    alarm: &dyn AlarmSink,
    brand: &str,
    jpeg: &[u8],
    seq: u64,
) -> VerificationOutcome {
    let response = match verifier.verify(jpeg) {
        Ok(response) => response,
        Err(e) => {
            log::warn!("verification #{} failed: {}", seq, e);
            return VerificationOutcome::Failed(e.to_string());
        }
    };

    if !response.is_success {
        log::info!("verification #{} rejected by service", seq);
        return VerificationOutcome::Rejected;
    }
    if !response.matches_brand(brand) {
        log::info!("verification #{}: no {} match", seq, brand);
        return VerificationOutcome::NoMatch;
    }

    log::warn!("verification #{}: DETECTED {}", seq, brand);
    if let Err(e) = alarm.trigger() {
        log::error!("{}", e);
    }
    VerificationOutcome::Matched
}
