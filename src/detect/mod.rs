mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::{InferenceBackend, InferenceEngine, RawOutput};
pub use backends::StubBackend;
pub use registry::{BackendLoader, BackendRegistry};
pub use result::{
    BoundingBox, Detection, InputSize, ModelInfo, PredictionId, PredictionResult, Statistics,
};
