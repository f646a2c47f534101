//! Destinations for decoded images.
//!
//! A conversion job hands its [`DecodedImage`] to an [`ImageSink`] once
//! decoding succeeds. Sink errors fail the job like decode errors do.

mod png;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use crate::decode::DecodedImage;

pub use png::{encode_png, PngSink};

/// Errors that can occur while storing a decoded image.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Pixel buffer doesn't match the image dimensions
    #[error("Invalid image: {width}x{height} with {samples} samples")]
    InvalidImage {
        width: u32,
        height: u32,
        samples: usize,
    },

    /// Encoding failed
    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Receives each successfully decoded image.
pub trait ImageSink: Send + Sync {
    /// Store the image decoded from `file`.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the image cannot be stored.
    fn store(&self, file: &Path, image: DecodedImage) -> Result<(), SinkError>;
}

/// Keeps decoded images in memory, keyed by source file.
#[derive(Debug, Default)]
pub struct MemorySink {
    images: Mutex<HashMap<PathBuf, DecodedImage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the image decoded from `file`.
    pub fn take(&self, file: &Path) -> Option<DecodedImage> {
        self.images.lock().remove(file)
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.images.lock().contains_key(file)
    }

    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }
}

impl ImageSink for MemorySink {
    fn store(&self, file: &Path, image: DecodedImage) -> Result<(), SinkError> {
        self.images.lock().insert(file.to_path_buf(), image);
        Ok(())
    }
}
