//! Failure taxonomy for the detection pipeline.
//!
//! Every variant is contained where it occurs: none of them terminates the frame
//! loop or leaves overlay or mask state half-updated.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SentryError {
    /// Detection was requested before the model finished loading.
    #[error("detection model is not loaded yet")]
    ModelNotReady,

    #[error("detection model failed to load: {0}")]
    ModelLoad(String),

    /// Camera or stream is unsupported, denied, or could not be opened.
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// Detection failed for a single frame.
    #[error("detection failed: {0}")]
    Detection(String),

    /// Network, HTTP status, or response parsing failure on the verification call.
    #[error("verification transport failure: {0}")]
    VerificationTransport(String),

    /// The frame snapshot could not be encoded for upload.
    #[error("snapshot encoding failed: {0}")]
    BlobEncoding(String),

    #[error("alarm playback failed: {0}")]
    Alarm(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SentryError {
    /// Short machine-friendly tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SentryError::ModelNotReady => "model_not_ready",
            SentryError::ModelLoad(_) => "model_load",
            SentryError::MediaUnavailable(_) => "media_unavailable",
            SentryError::Detection(_) => "detection",
            SentryError::VerificationTransport(_) => "verification_transport",
            SentryError::BlobEncoding(_) => "blob_encoding",
            SentryError::Alarm(_) => "alarm",
            SentryError::Config(_) => "config",
        }
    }
}
