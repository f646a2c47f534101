//! Rawqueue Convert - RAW decoding and batch conversion
//!
//! This crate provides:
//! - [`DecodeSettings`], the per-decode parameter set
//! - A staged, cancelable decode pipeline over a pluggable RAW backend
//! - Image sinks for delivering decoded pixels
//! - [`ConversionCoordinator`], which runs one job per file on a
//!   [`rawqueue_core::ThreadPoolManager`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rawqueue_convert::{ConversionCoordinator, DecodeSettings, PngSink};
//! use rawqueue_convert::decode::{RawloaderBackend, StagedDecoder};
//! use rawqueue_core::{EngineConfig, ThreadPoolManager};
//!
//! let manager = Arc::new(ThreadPoolManager::new(EngineConfig::default())?);
//! let coordinator = ConversionCoordinator::new(
//!     manager,
//!     Arc::new(StagedDecoder::new(RawloaderBackend::new())),
//!     Arc::new(PngSink::new("exports")),
//! );
//! let events = coordinator.subscribe();
//! coordinator.submit(["IMG_0001.CR2", "IMG_0002.CR2"], &DecodeSettings::default(), 0);
//!
//! for event in events.iter() {
//!     println!("{event:?}");
//! }
//! ```

pub mod coordinator;
pub mod decode;
pub mod settings;
pub mod sink;

#[cfg(test)]
pub(crate) mod test_utils;

pub use coordinator::{ConversionCoordinator, ConversionEvent};
pub use decode::{DecodeError, DecodedImage, Decoder, PixelData, Source, StagedDecoder};
pub use settings::{
    ChannelOrder, DecodeSettings, DecodingQuality, ExposureCorrection, HighlightMode,
    InputColorSpace, NoiseReduction, OutputColorSpace, WhiteBalance,
};
pub use sink::{encode_png, ImageSink, MemorySink, PngSink, SinkError};
