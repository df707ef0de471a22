//! Brand Sentry
//!
//! Watches a camera feed for vehicles of one brand and raises an audible alarm
//! when a remote make/model service confirms a match.
//!
//! # Pipeline
//!
//! Each frame runs through one cycle:
//!
//! 1. **Detect**: the loaded `DetectorBackend` reports classes, scores and boxes.
//! 2. **Filter**: detections above the confidence threshold are drawn; vehicle
//!    classes outside the user-painted exclusion mask become actionable.
//! 3. **Render**: the overlay is replaced with this frame's highlights.
//! 4. **Gate**: at most one verification request per cooldown window is sent,
//!    carrying the frame with the mask composited in red. A confirmed match
//!    triggers the alarm.
//!
//! Verification runs off the frame loop; the loop never waits for it.
//!
//! # Module Structure
//!
//! - `frame_loop`: model loading, camera enable, frame cycle, exit reasons
//! - `session`: the context object owning detector, mask, overlay and gate
//! - `mask`: exclusion raster and pointer stroke painting
//! - `detect`, `ingest`: detector backends and frame sources
//! - `verify`, `gate`, `alarm`: the verification side channel

pub mod alarm;
pub mod config;
pub mod console;
pub mod detect;
pub mod error;
pub mod filter;
pub mod frame;
pub mod frame_loop;
pub mod gate;
pub mod ingest;
pub mod mask;
pub mod overlay;
pub mod session;
pub mod ui;
pub mod verify;

pub use alarm::{AlarmSink, AudioFileAlarm, LogAlarm};
pub use config::SentryConfig;
pub use detect::{BBox, Detection, DetectorBackend, PendingModel};
pub use error::SentryError;
pub use filter::{DetectionFilter, FilterOutcome, Screened, Verdict};
pub use frame::Frame;
pub use frame_loop::{FrameLoop, LoopExit, LoopSettings, LoopState, LoopStats};
pub use gate::{GateDecision, VerificationGate, VerificationOutcome, VerificationTicket};
pub use ingest::{open_source, FrameSource, SourceSettings};
pub use mask::{DisplayMapping, ExclusionMask, MaskHandle, Point, StrokeTracker};
pub use overlay::{MemorySurface, OverlayRenderer, OverlaySurface};
pub use session::{FrameReport, Session};
pub use verify::{HttpVerifier, VerificationResponse, Verifier};
