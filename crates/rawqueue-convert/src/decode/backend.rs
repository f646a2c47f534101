//! Boundary to a native RAW library.

use std::io;
use std::ops::ControlFlow;

use thiserror::Error;

use super::types::{DecodedImage, Source};
use crate::settings::{DecodeSettings, DecodingQuality};

/// Error returned by a backend stage.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The process callback asked the backend to stop.
    #[error("Aborted by callback")]
    Aborted,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        BackendError::Failed(message.to_string())
    }
}

/// A RAW library driven one stage at a time.
///
/// `Session` and `MemImage` own whatever the library allocates. The pipeline
/// drops them on every exit path, so implementations release native
/// resources in `Drop`.
pub trait RawBackend: Send + Sync {
    type Session: Send;
    type MemImage: Send;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Supported file extensions, lower-case, without the dot.
    fn extensions(&self) -> &[&'static str];

    fn supports_quality(&self, quality: DecodingQuality) -> bool;

    fn open(&self, source: &Source) -> Result<Self::Session, BackendError>;

    fn unpack(&self, session: &mut Self::Session) -> Result<(), BackendError>;

    fn adjust(
        &self,
        session: &mut Self::Session,
        settings: &DecodeSettings,
    ) -> Result<(), BackendError>;

    /// Demosaic. `callback` must be invoked periodically; when it returns
    /// `ControlFlow::Break` the backend stops and returns
    /// [`BackendError::Aborted`].
    fn process(
        &self,
        session: &mut Self::Session,
        settings: &DecodeSettings,
        callback: &mut dyn FnMut() -> ControlFlow<()>,
    ) -> Result<(), BackendError>;

    fn materialize(
        &self,
        session: &mut Self::Session,
        settings: &DecodeSettings,
    ) -> Result<Self::MemImage, BackendError>;

    fn package(
        &self,
        image: Self::MemImage,
        settings: &DecodeSettings,
    ) -> Result<DecodedImage, BackendError>;
}
