//! Decoding raw model output into detections.
//!
//! The decoder understands the anchor-free YOLO export layout: a `[1, 4 + C, N]`
//! tensor whose rows are `cx, cy, w, h` in model-input pixels followed by `C`
//! per-class scores. The transposed `[1, N, 4 + C]` form is accepted as well.

use std::cmp::Ordering;

use crate::detect::{BoundingBox, Detection, ModelInfo, RawOutput};
use crate::error::{DetectError, Result};
use crate::preprocess::InputTensor;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_MAX_DETECTIONS: usize = 100;

#[derive(Clone, Debug)]
pub struct Postprocessor {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for Postprocessor {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    class_id: usize,
    score: f32,
    bbox: BoundingBox,
}

#[derive(Clone, Copy)]
enum Layout {
    /// `[1, 4 + C, N]`
    AttributesFirst { candidates: usize },
    /// `[1, N, 4 + C]`
    CandidatesFirst { candidates: usize },
}

impl Layout {
    fn candidates(self) -> usize {
        match self {
            Layout::AttributesFirst { candidates } | Layout::CandidatesFirst { candidates } => {
                candidates
            }
        }
    }
}

impl Postprocessor {
    /// Turn raw output into detections in source-image pixels, best first.
    pub fn decode(
        &self,
        output: &RawOutput,
        input: &InputTensor,
        model: &ModelInfo,
    ) -> Result<Vec<Detection>> {
        let num_classes = model.classes.len();
        let attrs = 4 + num_classes;
        let layout = detect_layout(&output.shape, attrs)?;
        let n = layout.candidates();
        let expected = attrs * n;
        if output.data.len() != expected {
            return Err(DetectError::Inference(format!(
                "output holds {} values, shape {:?} needs {}",
                output.data.len(),
                output.shape,
                expected
            )));
        }

        let scale_x = input.source_width as f32 / input.shape[3] as f32;
        let scale_y = input.source_height as f32 / input.shape[2] as f32;
        let max_x = input.source_width as f32;
        let max_y = input.source_height as f32;

        let mut candidates = Vec::new();
        for i in 0..n {
            let at = |a: usize| -> f32 {
                match layout {
                    Layout::AttributesFirst { .. } => output.data[a * n + i],
                    Layout::CandidatesFirst { .. } => output.data[i * attrs + a],
                }
            };

            let mut class_id = 0;
            let mut score = f32::NEG_INFINITY;
            for c in 0..num_classes {
                let s = at(4 + c);
                if s > score {
                    score = s;
                    class_id = c;
                }
            }
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (at(0), at(1), at(2), at(3));
            if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
                continue;
            }
            let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, max_x);
            let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, max_y);
            let x2 = ((cx + w / 2.0) * scale_x).clamp(0.0, max_x);
            let y2 = ((cy + h / 2.0) * scale_y).clamp(0.0, max_y);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            candidates.push(Candidate {
                class_id,
                score: score.min(1.0),
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                },
            });
        }

        let kept = non_max_suppression(candidates, self.iou_threshold, self.max_detections);
        log::debug!("postprocess kept {} detection(s)", kept.len());

        kept.into_iter()
            .map(|c| {
                let class_name = model.classes.get(c.class_id).ok_or_else(|| {
                    DetectError::Inference(format!("class index {} out of range", c.class_id))
                })?;
                Ok(Detection {
                    class_name: class_name.clone(),
                    confidence: c.score,
                    bounding_box: c.bbox,
                })
            })
            .collect()
    }
}

fn detect_layout(shape: &[usize], attrs: usize) -> Result<Layout> {
    let dims: Vec<usize> = match shape {
        [1, a, b] => vec![*a, *b],
        [a, b] => vec![*a, *b],
        _ => {
            return Err(DetectError::Inference(format!(
                "unexpected output shape {:?}",
                shape
            )))
        }
    };
    if dims[0] == attrs {
        Ok(Layout::AttributesFirst { candidates: dims[1] })
    } else if dims[1] == attrs {
        Ok(Layout::CandidatesFirst { candidates: dims[0] })
    } else {
        Err(DetectError::Inference(format!(
            "output shape {:?} does not match {} box+class attributes",
            shape, attrs
        )))
    }
}

/// Greedy class-aware NMS. Returns survivors sorted by descending score.
fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::new();
    'outer: for cand in candidates {
        for k in &kept {
            if k.class_id == cand.class_id && k.bbox.iou(&cand.bbox) > iou_threshold {
                continue 'outer;
            }
        }
        kept.push(cand);
        if kept.len() >= max_detections {
            break;
        }
    }
    kept
}
