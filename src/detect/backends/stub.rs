use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::{InferenceBackend, RawOutput};
use crate::error::{DetectError, Result};
use crate::preprocess::InputTensor;

/// Reference input edge the placeholder box ranges are expressed in.
const REFERENCE_EDGE: f32 = 640.0;
const DETECTION_PROBABILITY: f64 = 0.7;

/// Placeholder runtime used until a real model is wired in.
///
/// Ignores pixel content. With probability 0.7 it emits one class-0 candidate
/// with confidence in [0.85, 0.99), otherwise a zero-score candidate. Output
/// uses the `[1, 4 + C, N]` layout so the regular postprocessor decodes it.
pub struct StubBackend {
    num_classes: usize,
    rng: StdRng,
}

impl StubBackend {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests and reproducible demos.
    pub fn with_seed(num_classes: usize, seed: u64) -> Self {
        Self {
            num_classes,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn run(&mut self, input: &InputTensor) -> Result<RawOutput> {
        if self.num_classes == 0 {
            return Err(DetectError::Inference("stub backend has no classes".into()));
        }
        let sx = input.shape[3] as f32 / REFERENCE_EDGE;
        let sy = input.shape[2] as f32 / REFERENCE_EDGE;

        // Single candidate column: cx, cy, w, h, scores...
        let mut column = vec![0f32; 4 + self.num_classes];
        let x = self.rng.gen_range(100.0..300.0) * sx;
        let y = self.rng.gen_range(100.0..300.0) * sy;
        let w = self.rng.gen_range(150.0..350.0) * sx;
        let h = self.rng.gen_range(150.0..350.0) * sy;
        column[0] = x + w / 2.0;
        column[1] = y + h / 2.0;
        column[2] = w;
        column[3] = h;
        if self.rng.gen_bool(DETECTION_PROBABILITY) {
            column[4] = self.rng.gen_range(0.85..0.99);
        }

        Ok(RawOutput {
            shape: vec![1, 4 + self.num_classes, 1],
            data: column,
        })
    }
}
