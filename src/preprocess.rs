//! Image preprocessing.
//!
//! Turns encoded image bytes into the fixed-size, channel-first, [0, 1]
//! normalized tensor the active model expects.

use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat};

use crate::detect::InputSize;
use crate::error::{DetectError, Result};

/// Model input in NCHW layout (`[1, 3, height, width]`).
#[derive(Clone, Debug)]
pub struct InputTensor {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
    /// Dimensions of the image before resizing, for mapping boxes back.
    pub source_width: u32,
    pub source_height: u32,
}

impl InputTensor {
    pub fn input_size(&self) -> InputSize {
        InputSize {
            width: self.shape[3] as u32,
            height: self.shape[2] as u32,
        }
    }
}

/// Decode encoded image bytes, sniffing the format from the content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(DetectError::Decode("empty image buffer".to_string()));
    }
    let format = image::guess_format(bytes)
        .map_err(|_| DetectError::UnsupportedFormat("unrecognized image encoding".to_string()))?;
    if !format.reading_enabled() {
        return Err(DetectError::UnsupportedFormat(format_name(format)));
    }
    image::load_from_memory_with_format(bytes, format).map_err(|e| match e {
        ImageError::Unsupported(u) => DetectError::UnsupportedFormat(u.to_string()),
        other => DetectError::Decode(other.to_string()),
    })
}

/// Resize to `size` and lay out as normalized RGB planes.
pub fn to_tensor(image: &DynamicImage, size: InputSize) -> Result<InputTensor> {
    if size.width == 0 || size.height == 0 {
        return Err(DetectError::Inference(format!(
            "invalid model input size {}x{}",
            size.width, size.height
        )));
    }
    let rgb = image
        .resize_exact(size.width, size.height, FilterType::Triangle)
        .to_rgb8();

    let w = size.width as usize;
    let h = size.height as usize;
    let plane = w * h;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * w + x as usize;
        for c in 0..3 {
            data[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }

    Ok(InputTensor {
        shape: [1, 3, h, w],
        data,
        source_width: image.width(),
        source_height: image.height(),
    })
}

/// Decode and convert in one step.
pub fn preprocess(bytes: &[u8], size: InputSize) -> Result<InputTensor> {
    let image = decode_image(bytes)?;
    log::debug!(
        "decoded {}x{} image, resizing to {}x{}",
        image.width(),
        image.height(),
        size.width,
        size.height
    );
    to_tensor(&image, size)
}

fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| format!("{:?}", format))
}
