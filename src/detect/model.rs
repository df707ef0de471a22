//! Detector construction and asynchronous loading.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::detect::backend::DetectorBackend;
use crate::detect::backends::ScriptedBackend;
use crate::error::SentryError;

pub type LoadResult = Result<Box<dyn DetectorBackend>, SentryError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackendKind {
    /// Replays a JSON detection script (or nothing, without a path).
    Scripted,
    /// SSD ONNX model through tract. Requires the `backend-tract` feature.
    Tract,
}

impl ModelBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelBackendKind::Scripted => "scripted",
            ModelBackendKind::Tract => "tract",
        }
    }
}

impl FromStr for ModelBackendKind {
    type Err = SentryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scripted" => Ok(ModelBackendKind::Scripted),
            "tract" => Ok(ModelBackendKind::Tract),
            other => Err(SentryError::Config(format!(
                "unknown model backend '{}' (expected scripted or tract)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelSettings {
    pub backend: ModelBackendKind,
    pub path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: ModelBackendKind::Scripted,
            path: None,
            labels_path: None,
            input_width: 300,
            input_height: 300,
        }
    }
}

/// Build and warm up the configured detector. Blocking.
pub fn load_backend(settings: &ModelSettings) -> LoadResult {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend {
        ModelBackendKind::Scripted => match &settings.path {
            Some(path) => Box::new(
                ScriptedBackend::from_file(path)
                    .map_err(|e| SentryError::ModelLoad(format!("{:#}", e)))?,
            ),
            None => Box::new(ScriptedBackend::empty()),
        },
        ModelBackendKind::Tract => load_tract(settings)?,
    };
    backend
        .warm_up()
        .map_err(|e| SentryError::ModelLoad(format!("{} warm-up failed: {:#}", backend.name(), e)))?;
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &ModelSettings) -> LoadResult {
    let path = settings
        .path
        .as_deref()
        .ok_or_else(|| SentryError::ModelLoad("tract backend requires model.path".to_string()))?;
    let backend = crate::detect::backends::TractBackend::new(
        path,
        settings.labels_path.as_deref(),
        settings.input_width,
        settings.input_height,
    )
    .map_err(|e| SentryError::ModelLoad(format!("{:#}", e)))?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &ModelSettings) -> LoadResult {
    Err(SentryError::ModelLoad(
        "tract backend not compiled in (enable feature backend-tract)".to_string(),
    ))
}

/// A detector being loaded on a background thread.
///
/// The result is delivered exactly once; afterwards the handle reports a
/// `ModelLoad` error, so callers drop it once they have taken the result.
pub struct PendingModel {
    rx: Receiver<LoadResult>,
    started: Instant,
}

impl PendingModel {
    pub fn start<F>(loader: F) -> Result<Self, SentryError>
    where
        F: FnOnce() -> LoadResult + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("model-loader".to_string())
            .spawn(move || {
                let _ = tx.send(loader());
            })
            .map_err(|e| SentryError::ModelLoad(format!("failed to start loader thread: {}", e)))?;
        Ok(Self {
            rx,
            started: Instant::now(),
        })
    }

    pub fn from_settings(settings: ModelSettings) -> Result<Self, SentryError> {
        Self::start(move || load_backend(&settings))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking check for a finished load.
    pub fn poll(&self) -> Option<LoadResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(loader_vanished())),
        }
    }

    /// Block up to `timeout` for the load to finish.
    pub fn wait(&self, timeout: Duration) -> Option<LoadResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(loader_vanished())),
        }
    }
}

fn loader_vanished() -> SentryError {
    SentryError::ModelLoad("loader thread exited without a result".to_string())
}
