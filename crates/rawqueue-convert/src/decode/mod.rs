//! RAW decoding pipeline.
//!
//! This module provides:
//! - The [`Decoder`] boundary used by conversion jobs
//! - [`StagedDecoder`], a six-stage driver with cancellation checkpoints
//! - The [`RawBackend`] trait a native RAW library plugs into
//! - [`RawloaderBackend`], a pure-Rust backend
//!
//! # Progress
//!
//! | Stage | Progress after |
//! |---|---|
//! | open | 0.10 |
//! | unpack | 0.20 |
//! | adjust | 0.25 |
//! | process | 0.30 (plus small steps while demosaicing) |
//! | materialize | 0.35 |
//! | package | 0.40 |
//!
//! # Examples
//!
//! ```ignore
//! use rawqueue_convert::decode::{Decoder, RawloaderBackend, Source, StagedDecoder};
//! use rawqueue_convert::DecodeSettings;
//!
//! let decoder = StagedDecoder::new(RawloaderBackend::new());
//! let image = decoder.decode(
//!     &Source::Path("IMG_0001.CR2".into()),
//!     &DecodeSettings::default(),
//!     &mut |p| println!("{:.0}%", p * 100.0),
//!     &|| false,
//! )?;
//! println!("Decoded {}x{} image", image.width, image.height);
//! ```

mod backend;
mod pipeline;
mod rawloader_backend;
mod types;

pub use backend::{BackendError, RawBackend};
pub use pipeline::{Decoder, StagedDecoder, PROCESS_STEP};
pub use rawloader_backend::{RawloaderBackend, RawloaderImage, RawloaderSession, RAW_EXTENSIONS};
pub use types::{DecodeError, DecodedImage, PixelData, Source, Stage};
