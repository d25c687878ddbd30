#![cfg(feature = "backend-tract")]

use std::path::Path;

use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceBackend, RawOutput};
use crate::detect::result::InputSize;
use crate::error::{DetectError, Result};
use crate::preprocess::InputTensor;

/// Tract-based backend for ONNX detection models.
///
/// Loads a local model file with its input fixed to `[1, 3, H, W]` f32 and
/// returns the first output tensor untouched.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: InputSize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: InputSize) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(DetectError::ModelLoad(format!(
                "model file not found at {}",
                model_path.display()
            )));
        }
        let load_err =
            |stage: &str, e: TractError| DetectError::ModelLoad(format!("{}: {}", stage, e));

        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load_err("failed to load ONNX model", e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        input_size.height as usize,
                        input_size.width as usize
                    ),
                ),
            )
            .map_err(|e| load_err("failed to set input fact", e))?
            .into_optimized()
            .map_err(|e| load_err("failed to optimize ONNX model", e))?
            .into_runnable()
            .map_err(|e| load_err("failed to build runnable ONNX model", e))?;

        Ok(Self { model, input_size })
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn run(&mut self, input: &InputTensor) -> Result<RawOutput> {
        if input.input_size() != self.input_size {
            return Err(DetectError::Inference(format!(
                "tensor size {}x{} does not match model input {}x{}",
                input.shape[3], input.shape[2], self.input_size.width, self.input_size.height
            )));
        }
        let tensor = Tensor::from_shape::<f32>(&input.shape, &input.data)
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|e| DetectError::Inference(format!("ONNX inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectError::Inference("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|_| DetectError::Inference("model output tensor was not f32".into()))?;

        Ok(RawOutput {
            shape: view.shape().to_vec(),
            data: view.iter().copied().collect(),
        })
    }
}
