//! Local frame sources.
//!
//! `DirectorySource` replays still images from a local directory; `stub://`
//! locations select `SyntheticSource`, which needs no files at all.

use image::{ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use super::{CapturedFrame, FrameSource};
use crate::error::{DetectError, Result};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const SYNTHETIC_WIDTH: u32 = 320;
const SYNTHETIC_HEIGHT: u32 = 240;
/// Distinct synthetic frames; each is encoded once and then replayed.
const SYNTHETIC_PHASES: usize = 8;

pub(super) fn open(location: &str) -> Result<Box<dyn FrameSource>> {
    if !is_local_source(location) {
        return Err(DetectError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame sources must be local paths or stub:// (got {location})"),
        )));
    }
    if location.starts_with("stub://") {
        Ok(Box::new(SyntheticSource::new(
            location,
            SYNTHETIC_WIDTH,
            SYNTHETIC_HEIGHT,
        )))
    } else {
        Ok(Box::new(DirectorySource::new(location)?))
    }
}

/// Cycles through `.jpg`, `.jpeg` and `.png` files of one directory.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    frame_count: u64,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(DetectError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no .jpg/.jpeg/.png images in {}", dir.display()),
            )));
        }
        files.sort();
        log::info!(
            "DirectorySource: {} image(s) in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir,
            files,
            next: 0,
            frame_count: 0,
        })
    }
}

impl FrameSource for DirectorySource {
    fn capture(&mut self) -> Result<CapturedFrame> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        let bytes = std::fs::read(path)?;
        self.frame_count += 1;
        Ok(CapturedFrame {
            uri: path.display().to_string(),
            bytes,
        })
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

/// Renders PNG gradient frames with a little noise. Selected by `stub://`.
///
/// Frames cycle through a fixed set of phases. Each phase is encoded on first
/// use and its bytes are reused afterwards, so capture stays cheap.
pub struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    frame_count: u64,
    rng: StdRng,
    encoded: Vec<Option<Vec<u8>>>,
}

impl SyntheticSource {
    pub fn new(uri: &str, width: u32, height: u32) -> Self {
        log::info!("SyntheticSource: {} ({}x{})", uri, width, height);
        Self {
            uri: uri.to_string(),
            width: width.max(1),
            height: height.max(1),
            frame_count: 0,
            rng: StdRng::from_entropy(),
            encoded: vec![None; SYNTHETIC_PHASES],
        }
    }

    fn render(&mut self, phase: usize) -> RgbImage {
        let shift = (phase as u32 * 256 / SYNTHETIC_PHASES as u32) % 256;
        let (w, h) = (self.width, self.height);
        let noise: u8 = self.rng.gen_range(0..16);
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                ((x * 255 / w + shift) % 256) as u8,
                ((y * 255 / h) % 256) as u8,
                noise.wrapping_mul(8),
            ])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn capture(&mut self) -> Result<CapturedFrame> {
        let phase = (self.frame_count % SYNTHETIC_PHASES as u64) as usize;
        let bytes = match self.encoded[phase].clone() {
            Some(bytes) => bytes,
            None => {
                let image = self.render(phase);
                let mut out = Cursor::new(Vec::new());
                image.write_to(&mut out, ImageFormat::Png).map_err(|e| {
                    DetectError::Decode(format!("synthetic frame encode failed: {e}"))
                })?;
                let bytes = out.into_inner();
                self.encoded[phase] = Some(bytes.clone());
                bytes
            }
        };
        self.frame_count += 1;
        Ok(CapturedFrame {
            uri: format!("{}#{}", self.uri, self.frame_count),
            bytes,
        })
    }

    fn describe(&self) -> String {
        format!("{} (synthetic)", self.uri)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn is_local_source(location: &str) -> bool {
    if location.trim().is_empty() {
        return false;
    }
    if location.starts_with("stub://") {
        return true;
    }
    !location.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_source_check_rejects_remote_urls() {
        assert!(is_local_source("stub://camera"));
        assert!(is_local_source("/var/lib/durian/frames"));
        assert!(!is_local_source("rtsp://10.0.0.2/stream"));
        assert!(!is_local_source("   "));
    }

    #[test]
    fn image_extensions_are_case_insensitive() {
        assert!(is_image_file(Path::new("a.JPG")));
        assert!(is_image_file(Path::new("b.jpeg")));
        assert!(is_image_file(Path::new("c.Png")));
        assert!(!is_image_file(Path::new("d.gif")));
        assert!(!is_image_file(Path::new("noext")));
    }

    #[test]
    fn synthetic_frames_decode_as_png() {
        let mut source = SyntheticSource::new("stub://camera", 32, 24);
        let frame = source.capture().unwrap();
        assert_eq!(frame.uri, "stub://camera#1");
        let img = image::load_from_memory(&frame.bytes).unwrap();
        assert_eq!((img.width(), img.height()), (32, 24));
        source.capture().unwrap();
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn synthetic_frames_replay_after_a_full_cycle() {
        let mut source = SyntheticSource::new("stub://camera", 16, 12);
        let first = source.capture().unwrap();
        let second = source.capture().unwrap();
        assert_ne!(first.bytes, second.bytes);
        for _ in 2..SYNTHETIC_PHASES {
            source.capture().unwrap();
        }
        let again = source.capture().unwrap();
        assert_eq!(again.bytes, first.bytes);
        assert_eq!(again.uri, format!("stub://camera#{}", SYNTHETIC_PHASES + 1));
    }

    #[test]
    fn directory_source_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        img.save(dir.path().join("b.png")).unwrap();
        img.save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let mut source = DirectorySource::new(dir.path()).unwrap();
        let uris: Vec<String> = (0..3).map(|_| source.capture().unwrap().uri).collect();
        assert!(uris[0].ends_with("a.png"));
        assert!(uris[1].ends_with("b.png"));
        assert!(uris[2].ends_with("a.png"));
    }

    #[test]
    fn empty_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectorySource::new(dir.path()).err().unwrap();
        match err {
            DetectError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn open_source_dispatches_on_scheme() {
        let source = open("stub://yard").unwrap();
        assert!(source.describe().contains("synthetic"));
        assert!(open("http://example.com/cam").is_err());
    }
}
