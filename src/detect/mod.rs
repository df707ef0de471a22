mod backend;
pub mod backends;
mod model;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ScriptStep, ScriptedBackend};
pub use model::{load_backend, LoadResult, ModelBackendKind, ModelSettings, PendingModel};
pub use result::{BBox, Detection};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
