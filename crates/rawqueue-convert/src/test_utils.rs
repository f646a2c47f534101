//! Shared test helpers: tracing setup and a scripted backend.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rawqueue_core::CancellationToken;

use crate::decode::{BackendError, DecodedImage, PixelData, RawBackend, Source, Stage};
use crate::settings::{DecodeSettings, DecodingQuality};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Counts backend allocations so tests can check they were all released.
#[derive(Debug, Default)]
pub(crate) struct Resources {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl Resources {
    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        self.acquired() - self.released.load(Ordering::SeqCst)
    }

    fn acquire(self: &Arc<Self>) -> Tracked {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Tracked {
            resources: Arc::clone(self),
        }
    }
}

pub(crate) struct Tracked {
    resources: Arc<Resources>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.resources.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend whose behavior is set up per test.
pub(crate) struct ScriptedBackend {
    pub(crate) resources: Arc<Resources>,
    fail_at: Option<Stage>,
    process_ticks: usize,
    tick_delay: Duration,
    cancel_on_tick: Option<(usize, CancellationToken)>,
    bilinear_only: bool,
    seen_quality: Mutex<Option<DecodingQuality>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self {
            resources: Arc::new(Resources::default()),
            fail_at: None,
            process_ticks: 5,
            tick_delay: Duration::ZERO,
            cancel_on_tick: None,
            bilinear_only: false,
            seen_quality: Mutex::new(None),
        }
    }

    pub(crate) fn failing_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    pub(crate) fn with_process_ticks(mut self, ticks: usize) -> Self {
        self.process_ticks = ticks;
        self
    }

    pub(crate) fn with_tick_delay(mut self, delay: Duration) -> Self {
        self.tick_delay = delay;
        self
    }

    /// Cancel `token` right before the given process callback.
    pub(crate) fn cancelling_on_tick(mut self, tick: usize, token: CancellationToken) -> Self {
        self.cancel_on_tick = Some((tick, token));
        self
    }

    pub(crate) fn bilinear_only(mut self) -> Self {
        self.bilinear_only = true;
        self
    }

    pub(crate) fn seen_quality(&self) -> Option<DecodingQuality> {
        *self.seen_quality.lock()
    }

    fn step(&self, stage: Stage) -> Result<(), BackendError> {
        if self.fail_at == Some(stage) {
            Err(BackendError::failed(format!("scripted {stage} failure")))
        } else {
            Ok(())
        }
    }
}

pub(crate) struct ScriptedSession {
    _handle: Tracked,
    buffers: Vec<Tracked>,
}

impl RawBackend for ScriptedBackend {
    type Session = ScriptedSession;
    type MemImage = Tracked;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn extensions(&self) -> &[&'static str] {
        &["arw", "nef", "dng"]
    }

    fn supports_quality(&self, quality: DecodingQuality) -> bool {
        !self.bilinear_only || quality == DecodingQuality::Bilinear
    }

    fn open(&self, _source: &Source) -> Result<Self::Session, BackendError> {
        self.step(Stage::Open)?;
        Ok(ScriptedSession {
            _handle: self.resources.acquire(),
            buffers: Vec::new(),
        })
    }

    fn unpack(&self, session: &mut Self::Session) -> Result<(), BackendError> {
        session.buffers.push(self.resources.acquire());
        self.step(Stage::Unpack)
    }

    fn adjust(
        &self,
        _session: &mut Self::Session,
        settings: &DecodeSettings,
    ) -> Result<(), BackendError> {
        *self.seen_quality.lock() = Some(settings.quality);
        self.step(Stage::Adjust)
    }

    fn process(
        &self,
        _session: &mut Self::Session,
        _settings: &DecodeSettings,
        callback: &mut dyn FnMut() -> ControlFlow<()>,
    ) -> Result<(), BackendError> {
        for tick in 0..self.process_ticks {
            if let Some((at, token)) = &self.cancel_on_tick {
                if tick == *at {
                    token.cancel();
                }
            }
            if !self.tick_delay.is_zero() {
                thread::sleep(self.tick_delay);
            }
            if callback().is_break() {
                return Err(BackendError::Aborted);
            }
        }
        self.step(Stage::Process)
    }

    fn materialize(
        &self,
        _session: &mut Self::Session,
        _settings: &DecodeSettings,
    ) -> Result<Self::MemImage, BackendError> {
        let image = self.resources.acquire();
        self.step(Stage::Materialize)?;
        Ok(image)
    }

    fn package(
        &self,
        _image: Self::MemImage,
        settings: &DecodeSettings,
    ) -> Result<DecodedImage, BackendError> {
        self.step(Stage::Package)?;
        let pixels = if settings.sixteen_bits {
            PixelData::Sixteen(vec![1000; 2 * 2 * 3])
        } else {
            PixelData::Eight(vec![100; 2 * 2 * 3])
        };
        Ok(DecodedImage {
            width: 2,
            height: 2,
            max_value: settings.max_value(),
            channel_order: settings.channel_order,
            pixels,
        })
    }
}
