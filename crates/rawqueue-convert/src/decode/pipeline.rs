//! Staged, cancelable decode driver.
//!
//! [`StagedDecoder`] drives a [`RawBackend`] through the six [`Stage`]s in
//! order. Cancellation is checked before every stage and from inside the
//! process stage through the backend callback. Progress goes up in fixed
//! steps as stages complete and never decreases.
//!
//! Backend sessions and images are owned values, so every exit path
//! (success, failure or cancellation) drops them and releases whatever the
//! backend allocated.

use std::ops::ControlFlow;

use tracing::debug;

use super::backend::{BackendError, RawBackend};
use super::types::{DecodeError, DecodedImage, Source, Stage};
use crate::settings::{DecodeSettings, DecodingQuality};

/// Progress added by each process callback.
pub const PROCESS_STEP: f32 = 0.01;

/// Something that turns a RAW source into pixels.
pub trait Decoder: Send + Sync {
    /// Decode `source`.
    ///
    /// `progress` receives values in `0.0..=1.0`, non-decreasing. `cancel`
    /// is polled at checkpoints; once it returns `true` the decode stops
    /// with [`DecodeError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns an input error if the source cannot be opened or has an
    /// unsupported extension, `DecodeError::Stage` if a backend stage fails,
    /// and `DecodeError::Cancelled` on cancellation.
    fn decode(
        &self,
        source: &Source,
        settings: &DecodeSettings,
        progress: &mut dyn FnMut(f32),
        cancel: &dyn Fn() -> bool,
    ) -> Result<DecodedImage, DecodeError>;
}

/// Monotonic progress reporter.
struct Progress<'a> {
    report: &'a mut dyn FnMut(f32),
    current: f32,
}

impl<'a> Progress<'a> {
    fn new(report: &'a mut dyn FnMut(f32)) -> Self {
        Self {
            report,
            current: 0.0,
        }
    }

    fn advance_to(&mut self, value: f32) {
        if value > self.current {
            self.current = value;
            (self.report)(value);
        }
    }

    fn step(&mut self, step: f32, ceiling: f32) {
        self.advance_to((self.current + step).min(ceiling));
    }
}

/// Runs a [`RawBackend`] stage by stage.
pub struct StagedDecoder<B> {
    backend: B,
}

impl<B: RawBackend> StagedDecoder<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Sanitized copy of `settings` with the quality downgraded to one the
    /// backend can do.
    fn effective_settings(&self, settings: &DecodeSettings) -> DecodeSettings {
        let mut settings = settings.sanitized();
        if !self.backend.supports_quality(settings.quality) {
            debug!(
                backend = self.backend.name(),
                requested = ?settings.quality,
                "Demosaic quality unavailable, using bilinear"
            );
            settings.quality = DecodingQuality::Bilinear;
        }
        settings
    }

    fn check_extension(&self, source: &Source) -> Result<(), DecodeError> {
        let name = source.display_path().display().to_string();
        let ext = source
            .extension()
            .ok_or_else(|| DecodeError::MissingExtension(name))?;
        if self.backend.extensions().contains(&ext.as_str()) {
            Ok(())
        } else {
            Err(DecodeError::UnsupportedExtension(ext))
        }
    }

    fn run_stage<T>(
        &self,
        stage: Stage,
        source: &Source,
        cancel: &dyn Fn() -> bool,
        op: impl FnOnce() -> Result<T, BackendError>,
    ) -> Result<T, DecodeError> {
        match op() {
            Ok(value) => {
                debug!(
                    backend = self.backend.name(),
                    stage = %stage,
                    file = %source.display_path().display(),
                    "Stage complete"
                );
                Ok(value)
            }
            Err(err) => {
                let err = classify(stage, source, err, cancel);
                debug!(
                    backend = self.backend.name(),
                    stage = %stage,
                    file = %source.display_path().display(),
                    error = %err,
                    "Stage stopped"
                );
                Err(err)
            }
        }
    }
}

impl<B: RawBackend> Decoder for StagedDecoder<B> {
    fn decode(
        &self,
        source: &Source,
        settings: &DecodeSettings,
        progress: &mut dyn FnMut(f32),
        cancel: &dyn Fn() -> bool,
    ) -> Result<DecodedImage, DecodeError> {
        let settings = self.effective_settings(settings);
        let mut progress = Progress::new(progress);
        let backend = &self.backend;

        checkpoint(cancel)?;
        self.check_extension(source)?;
        let mut session = self.run_stage(Stage::Open, source, cancel, || backend.open(source))?;
        progress.advance_to(Stage::Open.progress());

        checkpoint(cancel)?;
        self.run_stage(Stage::Unpack, source, cancel, || {
            backend.unpack(&mut session)
        })?;
        progress.advance_to(Stage::Unpack.progress());

        checkpoint(cancel)?;
        self.run_stage(Stage::Adjust, source, cancel, || {
            backend.adjust(&mut session, &settings)
        })?;
        progress.advance_to(Stage::Adjust.progress());

        checkpoint(cancel)?;
        {
            let ceiling = Stage::Materialize.progress() - PROCESS_STEP;
            let mut callback = || {
                progress.step(PROCESS_STEP, ceiling);
                if cancel() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            };
            self.run_stage(Stage::Process, source, cancel, || {
                backend.process(&mut session, &settings, &mut callback)
            })?;
        }
        progress.advance_to(Stage::Process.progress());

        checkpoint(cancel)?;
        let image = self.run_stage(Stage::Materialize, source, cancel, || {
            backend.materialize(&mut session, &settings)
        })?;
        drop(session);
        progress.advance_to(Stage::Materialize.progress());

        checkpoint(cancel)?;
        let decoded = self.run_stage(Stage::Package, source, cancel, || {
            backend.package(image, &settings)
        })?;
        progress.advance_to(Stage::Package.progress());

        Ok(decoded)
    }
}

fn checkpoint(cancel: &dyn Fn() -> bool) -> Result<(), DecodeError> {
    if cancel() {
        Err(DecodeError::Cancelled)
    } else {
        Ok(())
    }
}

fn classify(
    stage: Stage,
    source: &Source,
    err: BackendError,
    cancel: &dyn Fn() -> bool,
) -> DecodeError {
    match err {
        BackendError::Aborted if cancel() => DecodeError::Cancelled,
        BackendError::Io(source_err) if stage == Stage::Open => DecodeError::Io {
            path: source.display_path().to_path_buf(),
            source: source_err,
        },
        other => DecodeError::Stage {
            stage,
            message: other.to_string(),
        },
    }
}
