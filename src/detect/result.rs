use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One labeled, scored, localized object found in an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    /// Score in 0..=1.
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// Full output of one inference invocation over one image.
///
/// `detections` keeps postprocessor order. Once saved, the store owns the record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub id: String,
    pub image_uri: String,
    pub detections: Vec<Detection>,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub model_used: String,
}

impl PredictionResult {
    /// Distinct class names in first-seen order.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for det in &self.detections {
            if !names.contains(&det.class_name.as_str()) {
                names.push(det.class_name.as_str());
            }
        }
        names
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

/// Description of the active model. Loaded once per activation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub path: String,
    pub input_size: InputSize,
    pub classes: Vec<String>,
}

/// Aggregates over everything the store currently holds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_predictions: u64,
    pub total_detections: u64,
    /// Mean confidence over all stored detections; 0.0 when there are none.
    pub average_confidence: f64,
    pub most_detected_class: Option<String>,
}

static LAST_ISSUED_MS: AtomicU64 = AtomicU64::new(0);

/// Time-based prediction identifiers.
pub struct PredictionId;

impl PredictionId {
    /// Returns an id derived from the current epoch milliseconds.
    ///
    /// Ids are strictly increasing within the process: a second call inside the
    /// same millisecond is bumped forward by one.
    pub fn generate() -> String {
        Self::next_after(crate::now_ms().max(0) as u64).to_string()
    }

    fn next_after(now_ms: u64) -> u64 {
        let mut last = LAST_ISSUED_MS.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(last + 1);
            match LAST_ISSUED_MS.compare_exchange_weak(
                last,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bbox(10.0, 10.0, 50.0, 50.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn prediction_ids_never_repeat_within_a_millisecond() {
        let a = PredictionId::next_after(5_000);
        let b = PredictionId::next_after(5_000);
        assert!(b > a);
    }

    #[test]
    fn generated_ids_are_numeric_and_increasing() {
        let a: u64 = PredictionId::generate().parse().unwrap();
        let b: u64 = PredictionId::generate().parse().unwrap();
        assert!(b > a);
    }

    #[test]
    fn class_names_are_deduplicated_in_order() {
        let det = |name: &str| Detection {
            class_name: name.to_string(),
            confidence: 0.9,
            bounding_box: bbox(0.0, 0.0, 1.0, 1.0),
        };
        let p = PredictionResult {
            id: "1".into(),
            image_uri: "a.jpg".into(),
            detections: vec![det("durian"), det("background"), det("durian")],
            timestamp_ms: 1,
            model_used: "m".into(),
        };
        assert_eq!(p.class_names(), vec!["durian", "background"]);
    }
}
