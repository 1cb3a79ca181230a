//! Writes finished frames to disk as BMP files.

use std::path::{Path, PathBuf};

use spice_core::Frame;
use tracing::debug;

/// Overwrites one file with the latest frame.
#[derive(Debug, Clone)]
pub struct FrameDump {
    path: PathBuf,
    written: u64,
}

impl FrameDump {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, frame: &Frame) -> std::io::Result<()> {
        tokio::fs::write(&self.path, frame.as_bmp()).await?;
        self.written += 1;
        debug!(
            path = %self.path.display(),
            width = frame.width(),
            height = frame.height(),
            n = self.written,
            "frame dumped"
        );
        Ok(())
    }
}
