use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{InputSize, ModelInfo};
use crate::postprocess::{
    Postprocessor, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_DETECTIONS,
};

const DEFAULT_DB_PATH: &str = "durianapp.db";
const DEFAULT_MODELS_DIR: &str = "models";
const DEFAULT_MODEL_NAME: &str = "Durian Detection Model";
const DEFAULT_MODEL_PATH: &str = "models/durian_model.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CLASSES: [&str; 2] = ["durian", "background"];
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_LIVE_SOURCE: &str = "stub://camera";
const DEFAULT_LIVE_INTERVAL_MS: u64 = 100;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    db_path: Option<String>,
    models_dir: Option<PathBuf>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    live: Option<LiveConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    name: Option<String>,
    path: Option<String>,
    backend: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    source: Option<String>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub models_dir: PathBuf,
    pub model: ModelSettings,
    pub detection: DetectionSettings,
    pub live: LiveSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub name: String,
    pub path: String,
    pub backend: String,
    pub input_width: u32,
    pub input_height: u32,
    pub classes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub source: String,
    pub interval: Duration,
}

impl AppConfig {
    /// Defaults, then the file named by `DURIAN_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DURIAN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let live = file.live.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            models_dir: file
                .models_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR)),
            model: ModelSettings {
                name: model.name.unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
                path: model.path.unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
                backend: model.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                input_width: model.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: model.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
                classes: model
                    .classes
                    .unwrap_or_else(|| DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect()),
            },
            detection: DetectionSettings {
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                max_detections: detection.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
            },
            live: LiveSettings {
                source: live
                    .source
                    .unwrap_or_else(|| DEFAULT_LIVE_SOURCE.to_string()),
                interval: Duration::from_millis(
                    live.interval_ms.unwrap_or(DEFAULT_LIVE_INTERVAL_MS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("DURIAN_DB_PATH") {
            self.db_path = path;
        }
        if let Some(path) = non_empty_env("DURIAN_MODEL_PATH") {
            self.model.path = path;
        }
        if let Some(backend) = non_empty_env("DURIAN_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(dir) = non_empty_env("DURIAN_MODELS_DIR") {
            self.models_dir = PathBuf::from(dir);
        }
        if let Some(classes) = non_empty_env("DURIAN_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.model.classes = parsed;
            }
        }
        if let Some(source) = non_empty_env("DURIAN_LIVE_SOURCE") {
            self.live.source = source;
        }
        if let Some(interval) = non_empty_env("DURIAN_LIVE_INTERVAL_MS") {
            let ms: u64 = interval.parse().map_err(|_| {
                anyhow!("DURIAN_LIVE_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.live.interval = Duration::from_millis(ms);
        }
        if let Some(threshold) = non_empty_env("DURIAN_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("DURIAN_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.detection.confidence_threshold),
            ("iou_threshold", self.detection.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1] (got {})", name, value));
            }
        }
        if self.detection.max_detections == 0 {
            return Err(anyhow!("max_detections must be greater than zero"));
        }
        if self.live.interval.is_zero() {
            return Err(anyhow!("live interval must be greater than zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if self.model.classes.is_empty() {
            return Err(anyhow!("model class list must not be empty"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        Ok(())
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.name.clone(),
            path: self.model.path.clone(),
            input_size: InputSize {
                width: self.model.input_width,
                height: self.model.input_height,
            },
            classes: self.model.classes.clone(),
        }
    }

    pub fn postprocessor(&self) -> Postprocessor {
        Postprocessor {
            confidence_threshold: self.detection.confidence_threshold,
            iou_threshold: self.detection.iou_threshold,
            max_detections: self.detection.max_detections,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg: AppConfigFile = if is_toml {
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))?
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_the_field_app() {
        let cfg = AppConfig::from_file(AppConfigFile::default());
        assert_eq!(cfg.db_path, "durianapp.db");
        assert_eq!(cfg.model.name, "Durian Detection Model");
        assert_eq!(cfg.model.classes, vec!["durian", "background"]);
        assert_eq!(cfg.model_info().input_size.width, 640);
        assert_eq!(cfg.live.interval, Duration::from_millis(100));
        assert_eq!(cfg.live.source, "stub://camera");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn split_csv_trims_and_drops_empties() {
        assert_eq!(split_csv(" durian, ,rambutan ,"), vec!["durian", "rambutan"]);
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut cfg = AppConfig::from_file(AppConfigFile::default());
        cfg.detection.iou_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
