use crate::detect::registry::BackendRegistry;
use crate::detect::result::ModelInfo;
use crate::error::{DetectError, Result};
use crate::preprocess::InputTensor;

/// Raw tensor produced by a forward pass. Interpretation is left to the postprocessor.
#[derive(Clone, Debug, PartialEq)]
pub struct RawOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Inference runtime trait.
///
/// A backend wraps one loaded model and executes its forward pass. It does not
/// decode outputs; that belongs to `Postprocessor`.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on a preprocessed tensor.
    fn run(&mut self, input: &InputTensor) -> Result<RawOutput>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Holds at most one active model and the backend executing it.
///
/// The engine is an explicit object with a `load`/`unload` lifecycle; callers
/// that share it across threads wrap it in a `Mutex`.
pub struct InferenceEngine {
    registry: BackendRegistry,
    active: Option<ActiveModel>,
}

struct ActiveModel {
    info: ModelInfo,
    backend: Box<dyn InferenceBackend>,
}

impl InferenceEngine {
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            active: None,
        }
    }

    /// Activate a model on the named backend, replacing any previous one.
    pub fn load(&mut self, info: ModelInfo, backend_name: &str) -> Result<()> {
        if info.classes.is_empty() {
            return Err(DetectError::ModelLoad(format!(
                "model '{}' declares no classes",
                info.name
            )));
        }
        if self.active.is_some() {
            self.unload();
        }
        log::info!(
            "loading model '{}' from {} on backend {}",
            info.name,
            info.path,
            backend_name
        );
        let mut backend = self.registry.open(backend_name, &info)?;
        backend.warm_up()?;
        self.active = Some(ActiveModel { info, backend });
        log::info!("model loaded");
        Ok(())
    }

    /// Release the active model, if any.
    pub fn unload(&mut self) {
        if let Some(active) = self.active.take() {
            log::info!("model '{}' unloaded", active.info.name);
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.active.is_some()
    }

    pub fn model_info(&self) -> Option<&ModelInfo> {
        self.active.as_ref().map(|a| &a.info)
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.active.as_ref().map(|a| a.backend.name())
    }

    /// Execute the active model.
    pub fn run(&mut self, input: &InputTensor) -> Result<RawOutput> {
        let active = self.active.as_mut().ok_or(DetectError::ModelNotLoaded)?;
        active.backend.run(input)
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new(BackendRegistry::with_builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::InputSize;

    fn info(classes: &[&str]) -> ModelInfo {
        ModelInfo {
            name: "Durian Detection Model".into(),
            path: "stub://durian".into(),
            input_size: InputSize {
                width: 32,
                height: 32,
            },
            classes: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn tensor() -> InputTensor {
        InputTensor {
            shape: [1, 3, 32, 32],
            data: vec![0.5; 3 * 32 * 32],
            source_width: 64,
            source_height: 64,
        }
    }

    #[test]
    fn run_without_model_is_model_not_loaded() {
        let mut engine = InferenceEngine::default();
        assert!(!engine.is_loaded());
        let err = engine.run(&tensor()).unwrap_err();
        assert!(matches!(err, DetectError::ModelNotLoaded));
    }

    #[test]
    fn load_then_unload_tracks_state() {
        let mut engine = InferenceEngine::default();
        engine.load(info(&["durian", "background"]), "stub").unwrap();
        assert!(engine.is_loaded());
        assert_eq!(engine.backend_name(), Some("stub"));
        assert_eq!(engine.model_info().unwrap().classes.len(), 2);
        assert!(engine.run(&tensor()).is_ok());

        engine.unload();
        assert!(!engine.is_loaded());
        assert!(engine.model_info().is_none());
        assert!(matches!(
            engine.run(&tensor()),
            Err(DetectError::ModelNotLoaded)
        ));
    }

    #[test]
    fn load_rejects_empty_class_list() {
        let mut engine = InferenceEngine::default();
        let err = engine.load(info(&[]), "stub").unwrap_err();
        assert!(matches!(err, DetectError::ModelLoad(_)));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn unknown_backend_fails_to_load() {
        let mut engine = InferenceEngine::default();
        let err = engine.load(info(&["durian"]), "npu").unwrap_err();
        assert!(matches!(err, DetectError::ModelLoad(_)));
    }
}
