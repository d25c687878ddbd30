use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::detect::{
    Detection, InferenceEngine, ModelInfo, PredictionId, PredictionResult, Statistics,
};
use crate::error::{DetectError, Result};
use crate::postprocess::Postprocessor;
use crate::preprocess::preprocess;
use crate::storage::PredictionStore;

/// The single entry point callers use: model lifecycle, analysis and history.
///
/// Built explicitly from its parts. The engine and the store each sit behind
/// their own mutex, so one service can be shared between the CLI thread and
/// the live loop.
pub struct DetectionService<S: PredictionStore> {
    engine: Mutex<InferenceEngine>,
    postprocessor: Postprocessor,
    store: Mutex<S>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: PredictionStore> DetectionService<S> {
    pub fn new(engine: InferenceEngine, postprocessor: Postprocessor, store: S) -> Self {
        Self {
            engine: Mutex::new(engine),
            postprocessor,
            store: Mutex::new(store),
        }
    }

    pub fn load_model(&self, info: ModelInfo, backend: &str) -> Result<()> {
        lock(&self.engine).load(info, backend)
    }

    pub fn unload_model(&self) {
        lock(&self.engine).unload();
    }

    pub fn is_model_loaded(&self) -> bool {
        lock(&self.engine).is_loaded()
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        lock(&self.engine).model_info().cloned()
    }

    pub fn postprocessor(&self) -> &Postprocessor {
        &self.postprocessor
    }

    /// Preprocess, infer and decode one encoded image. Nothing is persisted.
    pub fn detect(&self, bytes: &[u8]) -> Result<Vec<Detection>> {
        self.detect_with_model(bytes).map(|(detections, _)| detections)
    }

    fn detect_with_model(&self, bytes: &[u8]) -> Result<(Vec<Detection>, ModelInfo)> {
        let mut engine = lock(&self.engine);
        let info = engine.model_info().cloned().ok_or(DetectError::ModelNotLoaded)?;
        let tensor = preprocess(bytes, info.input_size)?;
        let output = engine.run(&tensor)?;
        drop(engine);
        let detections = self.postprocessor.decode(&output, &tensor, &info)?;
        Ok((detections, info))
    }

    /// Detect, build a prediction for `image_uri` and persist it.
    pub fn analyze(&self, image_uri: &str, bytes: &[u8]) -> Result<PredictionResult> {
        let (detections, info) = self.detect_with_model(bytes)?;
        let prediction = PredictionResult {
            id: PredictionId::generate(),
            image_uri: image_uri.to_string(),
            detections,
            timestamp_ms: crate::now_ms(),
            model_used: info.name,
        };
        lock(&self.store).save(&prediction)?;
        log::info!(
            "analyzed {}: {} detection(s)",
            prediction.image_uri,
            prediction.detections.len()
        );
        Ok(prediction)
    }

    /// Analyze an image file; its path becomes the prediction's image URI.
    pub fn analyze_file<P: AsRef<Path>>(&self, path: P) -> Result<PredictionResult> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        self.analyze(&path.display().to_string(), &bytes)
    }

    /// Analyze in-memory bytes, addressed by a `sha256:<hex>` content URI.
    pub fn analyze_bytes(&self, bytes: &[u8]) -> Result<PredictionResult> {
        self.analyze(&content_uri(bytes), bytes)
    }

    pub fn history(&self) -> Result<Vec<PredictionResult>> {
        lock(&self.store).get_all()
    }

    pub fn prediction(&self, id: &str) -> Result<PredictionResult> {
        lock(&self.store).get_by_id(id)
    }

    pub fn statistics(&self) -> Result<Statistics> {
        lock(&self.store).statistics()
    }

    /// Returns false if no prediction had this id.
    pub fn delete_prediction(&self, id: &str) -> Result<bool> {
        lock(&self.store).delete(id)
    }

    pub fn clear_history(&self) -> Result<()> {
        lock(&self.store).clear_all()
    }

    /// Unload the model and close the store.
    pub fn close(&self) -> Result<()> {
        self.unload_model();
        lock(&self.store).close()
    }
}

pub fn content_uri(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}
