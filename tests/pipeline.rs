//! End-to-end: image file -> stub inference -> decoded detections -> SQLite history.

use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;

use durian_scan::{
    DetectError, DetectionService, InferenceEngine, InputSize, ModelInfo, Postprocessor,
    SqlitePredictionStore,
};

fn model_info() -> ModelInfo {
    ModelInfo {
        name: "Durian Detection Model".to_string(),
        path: "models/durian_model.onnx".to_string(),
        input_size: InputSize {
            width: 640,
            height: 640,
        },
        classes: vec!["durian".to_string(), "background".to_string()],
    }
}

fn write_image(path: &Path, format: ImageFormat) {
    let img = RgbImage::from_fn(800, 600, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 40]));
    img.save_with_format(path, format).expect("write image");
}

fn service() -> DetectionService<SqlitePredictionStore> {
    let store = SqlitePredictionStore::open(":memory:").expect("open store");
    DetectionService::new(InferenceEngine::default(), Postprocessor::default(), store)
}

#[test]
fn analyze_files_builds_a_consistent_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let jpg = dir.path().join("tree-1.jpg");
    let png = dir.path().join("tree-2.png");
    write_image(&jpg, ImageFormat::Jpeg);
    write_image(&png, ImageFormat::Png);

    let svc = service();
    svc.load_model(model_info(), "stub").expect("load model");
    assert_eq!(svc.model_info().expect("info").name, "Durian Detection Model");

    let first = svc.analyze_file(&jpg).expect("analyze jpg");
    let second = svc.analyze_file(&png).expect("analyze png");
    assert_ne!(first.id, second.id);
    assert!(second.id.parse::<u64>().unwrap() > first.id.parse::<u64>().unwrap());
    assert_eq!(first.image_uri, jpg.display().to_string());

    for p in [&first, &second] {
        for d in &p.detections {
            assert_eq!(d.class_name, "durian");
            assert!(d.confidence >= 0.25 && d.confidence <= 1.0);
            let b = d.bounding_box;
            assert!(b.x >= 0.0 && b.y >= 0.0);
            assert!(b.x + b.width <= 800.0 + 1e-3);
            assert!(b.y + b.height <= 600.0 + 1e-3);
        }
    }

    let history = svc.history().expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], second);
    assert_eq!(history[1], first);

    let stats = svc.statistics().expect("stats");
    assert_eq!(stats.total_predictions, 2);
    assert_eq!(
        stats.total_detections as usize,
        first.detections.len() + second.detections.len()
    );

    assert!(svc.delete_prediction(&first.id).expect("delete"));
    assert!(matches!(
        svc.prediction(&first.id),
        Err(DetectError::NotFound(_))
    ));
    svc.clear_history().expect("clear");
    assert!(svc.history().expect("history").is_empty());
    svc.close().expect("close");
}

#[test]
fn unsupported_and_corrupt_images_are_rejected_without_writes() {
    let svc = service();
    svc.load_model(model_info(), "stub").expect("load model");

    let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
    assert!(matches!(
        svc.analyze_bytes(gif),
        Err(DetectError::UnsupportedFormat(_))
    ));
    assert!(matches!(
        svc.analyze_bytes(b"definitely not an image"),
        Err(DetectError::UnsupportedFormat(_))
    ));
    assert!(matches!(
        svc.analyze_bytes(&[]),
        Err(DetectError::Decode(_))
    ));
    assert_eq!(svc.statistics().expect("stats").total_predictions, 0);
}

#[test]
fn missing_file_is_an_io_error() {
    let svc = service();
    svc.load_model(model_info(), "stub").expect("load model");
    let err = svc.analyze_file("/nonexistent/durian.jpg").unwrap_err();
    assert!(matches!(err, DetectError::Io(_)));
}

#[test]
fn unloading_the_model_blocks_analysis() {
    let svc = service();
    svc.load_model(model_info(), "stub").expect("load model");
    svc.unload_model();
    assert!(!svc.is_model_loaded());
    let mut buf = std::io::Cursor::new(Vec::new());
    RgbImage::new(8, 8)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode");
    assert!(matches!(
        svc.analyze_bytes(buf.get_ref()),
        Err(DetectError::ModelNotLoaded)
    ));
}
