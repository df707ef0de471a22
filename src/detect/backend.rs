use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detection capability.
///
/// Given a frame, produces the detections for that frame in the order the model
/// reports them. Bounding boxes are in the frame's native pixel coordinates.
/// Backends are loaded once and then only used from the frame loop.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once on the loader thread after construction.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
