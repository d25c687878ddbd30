use std::collections::HashMap;

use crate::detect::backend::InferenceBackend;
use crate::detect::backends::StubBackend;
use crate::detect::result::ModelInfo;
use crate::error::{DetectError, Result};

/// Opens a backend for a model description.
pub type BackendLoader = fn(&ModelInfo) -> Result<Box<dyn InferenceBackend>>;

/// Registry of inference backends by name.
///
/// The engine asks the registry to open a backend whenever a model is loaded.
pub struct BackendRegistry {
    loaders: HashMap<String, BackendLoader>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", open_stub);
        #[cfg(feature = "backend-tract")]
        registry.register("tract", open_tract);
        registry
    }

    /// Register a loader. The first registered backend becomes the default.
    pub fn register(&mut self, name: &str, loader: BackendLoader) {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.loaders.insert(name.to_string(), loader);
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaders.keys().cloned().collect();
        names.sort();
        names
    }

    /// Open the named backend for `info`. An empty name selects the default.
    pub fn open(&self, name: &str, info: &ModelInfo) -> Result<Box<dyn InferenceBackend>> {
        let name = if name.is_empty() {
            self.default_name
                .as_deref()
                .ok_or_else(|| DetectError::ModelLoad("no backends registered".to_string()))?
        } else {
            name
        };
        let loader = self.loaders.get(name).ok_or_else(|| {
            DetectError::ModelLoad(format!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ))
        })?;
        loader(info)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn open_stub(info: &ModelInfo) -> Result<Box<dyn InferenceBackend>> {
    Ok(Box::new(StubBackend::new(info.classes.len())))
}

#[cfg(feature = "backend-tract")]
fn open_tract(info: &ModelInfo) -> Result<Box<dyn InferenceBackend>> {
    use crate::detect::backends::TractBackend;
    Ok(Box::new(TractBackend::new(&info.path, info.input_size)?))
}
