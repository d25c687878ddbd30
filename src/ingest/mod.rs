//! Frame sources for the live loop.
//!
//! A source hands out encoded images (JPEG or PNG bytes) one at a time:
//! - A local directory of still images, cycled in name order
//! - A synthetic `stub://` source that renders gradient frames (testing)
//!
//! Sources never touch the network; remote URL schemes are rejected.

pub mod file;

pub use file::{DirectorySource, SyntheticSource};

use crate::error::Result;

/// One captured frame, still encoded.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    /// Where the frame came from (file path or `stub://…#n`).
    pub uri: String,
    pub bytes: Vec<u8>,
}

pub trait FrameSource: Send {
    /// Capture the next frame.
    fn capture(&mut self) -> Result<CapturedFrame>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    fn frames_captured(&self) -> u64;
}

/// Open a source from a string: `stub://…` or a local directory path.
pub fn open_source(location: &str) -> Result<Box<dyn FrameSource>> {
    file::open(location)
}
