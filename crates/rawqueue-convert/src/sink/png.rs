//! PNG output.
//!
//! Both 8-bit and 16-bit images are written losslessly through the `image`
//! crate's PNG encoder.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use tracing::debug;

use super::{ImageSink, SinkError};
use crate::decode::DecodedImage;

/// Encode a decoded image to PNG bytes.
///
/// BGR images are written in RGB order.
///
/// # Errors
///
/// Returns `SinkError::InvalidImage` if the pixel buffer does not match the
/// dimensions, or `SinkError::EncodingFailed` if the encoder fails.
pub fn encode_png(image: &DecodedImage) -> Result<Vec<u8>, SinkError> {
    let dynamic = image
        .to_dynamic_image()
        .filter(|_| !image.is_empty())
        .ok_or(SinkError::InvalidImage {
            width: image.width,
            height: image.height,
            samples: image.pixels.len(),
        })?;

    let mut buffer = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| SinkError::EncodingFailed(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Writes `<stem>.png` into an output directory.
#[derive(Debug, Clone)]
pub struct PngSink {
    output_dir: PathBuf,
}

impl PngSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where the image decoded from `file` is written.
    pub fn output_path(&self, file: &Path) -> PathBuf {
        let mut name = file.file_stem().unwrap_or(file.as_os_str()).to_os_string();
        name.push(".png");
        self.output_dir.join(name)
    }
}

impl ImageSink for PngSink {
    fn store(&self, file: &Path, image: DecodedImage) -> Result<(), SinkError> {
        let bytes = encode_png(&image)?;

        fs::create_dir_all(&self.output_dir).map_err(|source| SinkError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        let path = self.output_path(file);
        fs::write(&path, &bytes).map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(
            file = %file.display(),
            output = %path.display(),
            bytes = bytes.len(),
            "Wrote PNG"
        );
        Ok(())
    }
}
