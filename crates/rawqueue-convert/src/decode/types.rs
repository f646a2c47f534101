//! Core types for RAW decoding.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::ChannelOrder;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Validate the extension and open the file or buffer.
    Open,
    /// Unpack raw sensor data.
    Unpack,
    /// Apply levels, white balance and highlight parameters.
    Adjust,
    /// Demosaic. The only stage with in-stage progress and cancellation.
    Process,
    /// Build the in-memory image buffer.
    Materialize,
    /// Copy into a [`DecodedImage`], reordering channels if requested.
    Package,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Open,
        Stage::Unpack,
        Stage::Adjust,
        Stage::Process,
        Stage::Materialize,
        Stage::Package,
    ];

    /// Decode progress reported once this stage completes.
    pub fn progress(self) -> f32 {
        match self {
            Stage::Open => 0.10,
            Stage::Unpack => 0.20,
            Stage::Adjust => 0.25,
            Stage::Process => 0.30,
            Stage::Materialize => 0.35,
            Stage::Package => 0.40,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Open => "open",
            Stage::Unpack => "unpack",
            Stage::Adjust => "adjust",
            Stage::Process => "process",
            Stage::Materialize => "materialize",
            Stage::Package => "package",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error types for RAW decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Cancellation was observed. Not a failure.
    #[error("Decoding cancelled")]
    Cancelled,

    /// The source has no file extension.
    #[error("No file extension: {0}")]
    MissingExtension(String),

    /// The backend does not handle this extension.
    #[error("Unsupported RAW extension: {0}")]
    UnsupportedExtension(String),

    /// The source could not be read.
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A backend stage failed.
    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },
}

impl DecodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DecodeError::Cancelled)
    }

    /// True for problems with the input itself rather than the decoder.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DecodeError::MissingExtension(_)
                | DecodeError::UnsupportedExtension(_)
                | DecodeError::Io { .. }
        )
    }
}

/// Where a RAW file comes from.
#[derive(Debug, Clone)]
pub enum Source {
    Path(PathBuf),
    /// In-memory file contents. `name` is used for the extension check.
    Buffer { name: String, bytes: Arc<[u8]> },
}

impl Source {
    pub fn buffer(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Source::Buffer {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Path used in logs and errors.
    pub fn display_path(&self) -> &Path {
        match self {
            Source::Path(path) => path,
            Source::Buffer { name, .. } => Path::new(name),
        }
    }

    /// Lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.display_path()
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

/// Packaged pixel samples, interleaved three channels per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelData {
    Eight(Vec<u8>),
    Sixteen(Vec<u16>),
}

impl PixelData {
    /// Number of samples (not bytes).
    pub fn len(&self) -> usize {
        match self {
            PixelData::Eight(samples) => samples.len(),
            PixelData::Sixteen(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bits_per_channel(&self) -> u8 {
        match self {
            PixelData::Eight(_) => 8,
            PixelData::Sixteen(_) => 16,
        }
    }

    /// Swap the first and third sample of every pixel.
    pub fn swap_red_blue(&mut self) {
        match self {
            PixelData::Eight(samples) => samples.chunks_exact_mut(3).for_each(|px| px.swap(0, 2)),
            PixelData::Sixteen(samples) => {
                samples.chunks_exact_mut(3).for_each(|px| px.swap(0, 2))
            }
        }
    }
}

/// A fully decoded RAW image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Largest channel value: 255 for 8-bit, 65535 for 16-bit.
    pub max_value: u16,
    pub channel_order: ChannelOrder,
    /// Row-major samples, 3 per pixel, in `channel_order`.
    pub pixels: PixelData,
}

impl DecodedImage {
    /// Get the total number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Check if this is an empty/invalid image.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    /// Convert to an `image::DynamicImage` in RGB order.
    ///
    /// Returns `None` if the buffer does not match the dimensions.
    pub fn to_dynamic_image(&self) -> Option<image::DynamicImage> {
        let mut pixels = self.pixels.clone();
        if self.channel_order == ChannelOrder::Bgr {
            pixels.swap_red_blue();
        }
        match pixels {
            PixelData::Eight(samples) => image::RgbImage::from_raw(self.width, self.height, samples)
                .map(image::DynamicImage::ImageRgb8),
            PixelData::Sixteen(samples) => {
                image::ImageBuffer::<image::Rgb<u16>, Vec<u16>>::from_raw(
                    self.width,
                    self.height,
                    samples,
                )
                .map(image::DynamicImage::ImageRgb16)
            }
        }
    }
}
