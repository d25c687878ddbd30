//! Durian Scan
//!
//! On-device object detection for durian fruit, with a local prediction history.
//!
//! # Pipeline
//!
//! An encoded image flows through four stages:
//!
//! 1. **Preprocess**: decode, resize to the model input and normalize to an NCHW tensor.
//! 2. **Infer**: the active [`InferenceBackend`] runs the model and returns a raw tensor.
//! 3. **Postprocess**: threshold, map boxes back to source pixels, class-aware NMS.
//! 4. **Persist**: the [`PredictionResult`] is written to a [`PredictionStore`].
//!
//! The live loop runs stages 1-3 on frames from a [`FrameSource`] at a fixed
//! interval and never persists.
//!
//! # Module Structure
//!
//! - `detect`: data model, inference engine, backend registry and backends
//! - `preprocess` / `postprocess`: tensor preparation and output decoding
//! - `storage`: SQLite and in-memory prediction stores
//! - `service`: `DetectionService`, the entry point tying the stages together
//! - `live`: ticker/worker capture loop
//! - `ingest`: frame sources (image directories, synthetic `stub://`)
//! - `catalog`: model files on disk
//! - `config`: file + environment configuration
//! - `ui`: terminal output helpers

use std::time::{SystemTime, UNIX_EPOCH};

pub mod catalog;
pub mod config;
pub mod detect;
pub mod error;
pub mod ingest;
pub mod live;
pub mod postprocess;
pub mod preprocess;
pub mod service;
pub mod storage;
pub mod ui;

pub use detect::{
    BackendRegistry, BoundingBox, Detection, InferenceBackend, InferenceEngine, InputSize,
    ModelInfo, PredictionId, PredictionResult, RawOutput, Statistics, StubBackend,
};
pub use error::{DetectError, Result};
pub use ingest::{open_source, CapturedFrame, DirectorySource, FrameSource, SyntheticSource};
pub use live::{FrameDetector, LiveDetector, LiveState};
pub use postprocess::Postprocessor;
pub use preprocess::InputTensor;
pub use service::DetectionService;
pub use storage::{InMemoryPredictionStore, PredictionStore, SqlitePredictionStore};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Unique shared-cache in-memory SQLite URI, for tests and ephemeral runs.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    format!(
        "file:durian_scan_{}?mode=memory&cache=shared",
        hex::encode(bytes)
    )
}
