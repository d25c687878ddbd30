use thiserror::Error;

/// Failures surfaced by the detection kernel.
///
/// Every variant is distinguishable by callers; nothing is swallowed inside the
/// library. Binaries wrap these in `anyhow` for reporting.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("prediction store is not open")]
    StoreUninitialized,

    #[error("no model is loaded")]
    ModelNotLoaded,

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("prediction not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectError {
    /// Stable machine-readable code, used in CLI JSON output and logs.
    pub fn code(&self) -> &'static str {
        match self {
            DetectError::StoreUninitialized => "STORE_UNINITIALIZED",
            DetectError::ModelNotLoaded => "MODEL_NOT_LOADED",
            DetectError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            DetectError::Decode(_) => "DECODE_ERROR",
            DetectError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            DetectError::Inference(_) => "INFERENCE_ERROR",
            DetectError::Storage(_) => "STORAGE_ERROR",
            DetectError::NotFound(_) => "NOT_FOUND",
            DetectError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_category() {
        let errors = [
            DetectError::StoreUninitialized,
            DetectError::ModelNotLoaded,
            DetectError::ModelLoad("x".into()),
            DetectError::Decode("x".into()),
            DetectError::UnsupportedFormat("x".into()),
            DetectError::Inference("x".into()),
            DetectError::Storage(rusqlite::Error::QueryReturnedNoRows),
            DetectError::NotFound("x".into()),
            DetectError::Io(std::io::Error::other("x")),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn not_found_message_names_the_id() {
        let err = DetectError::NotFound("1700000000000".into());
        assert_eq!(err.to_string(), "prediction not found: 1700000000000");
    }
}
