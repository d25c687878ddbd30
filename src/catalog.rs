//! Model files on local disk.
//!
//! Model artifacts live flat in one directory. Only `.onnx` and `.tflite`
//! files count as models.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{DetectError, Result};

const MODEL_EXTENSIONS: [&str; 2] = ["onnx", "tflite"];

pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MODEL_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Model files in `dir`, sorted by name. A missing directory lists as empty.
pub fn list_models<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut models = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_model_file(&path) {
            models.push(path);
        }
    }
    models.sort();
    Ok(models)
}

/// Copy a model artifact into `dir`, creating it if needed.
pub fn install_model<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dir: Q) -> Result<PathBuf> {
    let src = src.as_ref();
    let dir = dir.as_ref();
    if !is_model_file(src) {
        return Err(DetectError::UnsupportedFormat(format!(
            "{} is not an .onnx or .tflite model",
            src.display()
        )));
    }
    let file_name = src.file_name().ok_or_else(|| {
        DetectError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", src.display()),
        ))
    })?;
    std::fs::create_dir_all(dir)?;
    let dest = dir.join(file_name);
    std::fs::copy(src, &dest)?;
    log::info!("model installed: {}", dest.display());
    Ok(dest)
}

/// Delete `file_name` from `dir`. Returns whether a file was removed.
pub fn remove_model<P: AsRef<Path>>(dir: P, file_name: &str) -> Result<bool> {
    let name = Path::new(file_name);
    if name.components().count() != 1 || name.file_name().is_none() {
        return Err(DetectError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("model name must be a bare file name: {file_name}"),
        )));
    }
    let path = dir.as_ref().join(name);
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path)?;
    log::info!("model deleted: {}", path.display());
    Ok(true)
}
