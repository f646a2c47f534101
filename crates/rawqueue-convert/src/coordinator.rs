//! Batch conversion on top of the job engine.
//!
//! [`ConversionCoordinator`] turns a list of RAW files into one [`Job`] per
//! file, appends them to a [`ThreadPoolManager`] as a single collection and
//! republishes each job's signals as [`ConversionEvent`]s carrying the file
//! path.
//!
//! Event guarantees per file:
//! - cancelled before a worker picked it up: no events at all
//! - started: `Starting`, then `Progress` values that never decrease, then
//!   exactly one of `Finished` or `Failed`
//! - cancelled while running: no terminal event

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use rawqueue_core::{
    EventBus, Job, JobCollection, JobContext, JobError, JobId, JobOutcome, JobPriority, JobSignal,
    ThreadPoolManager,
};
use tracing::{debug, info};

use crate::decode::{Decoder, Source};
use crate::settings::DecodeSettings;
use crate::sink::ImageSink;

/// Per-file conversion event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionEvent {
    Starting { file: PathBuf },
    /// Percent complete, 0 to 100.
    Progress { file: PathBuf, percent: u8 },
    Finished { file: PathBuf },
    Failed { file: PathBuf, message: String },
}

impl ConversionEvent {
    pub fn file(&self) -> &Path {
        match self {
            ConversionEvent::Starting { file }
            | ConversionEvent::Progress { file, .. }
            | ConversionEvent::Finished { file }
            | ConversionEvent::Failed { file, .. } => file,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionEvent::Finished { .. } | ConversionEvent::Failed { .. }
        )
    }
}

/// Submits RAW files for decoding and reports per-file events.
pub struct ConversionCoordinator {
    manager: Arc<ThreadPoolManager>,
    decoder: Arc<dyn Decoder>,
    sink: Arc<dyn ImageSink>,
    events: Arc<EventBus<ConversionEvent>>,
}

impl ConversionCoordinator {
    pub fn new(
        manager: Arc<ThreadPoolManager>,
        decoder: Arc<dyn Decoder>,
        sink: Arc<dyn ImageSink>,
    ) -> Self {
        Self {
            manager,
            decoder,
            sink,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn manager(&self) -> &Arc<ThreadPoolManager> {
        &self.manager
    }

    /// Receive events for files submitted from now on.
    pub fn subscribe(&self) -> Receiver<ConversionEvent> {
        self.events.subscribe()
    }

    /// Queue every file at the same priority.
    ///
    /// Returns the job ids in input order.
    pub fn submit<I, P>(
        &self,
        files: I,
        settings: &DecodeSettings,
        priority: JobPriority,
    ) -> Vec<JobId>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.submit_with_priorities(
            files.into_iter().map(|file| (file.into(), priority)),
            settings,
        )
    }

    /// Queue files with individual priorities (lower runs first).
    ///
    /// All jobs are appended to the manager as one collection. Each job
    /// gets its own copy of `settings`.
    pub fn submit_with_priorities<I>(&self, files: I, settings: &DecodeSettings) -> Vec<JobId>
    where
        I: IntoIterator<Item = (PathBuf, JobPriority)>,
    {
        let mut collection = JobCollection::new();
        let mut ids = Vec::new();

        for (file, priority) in files {
            let job = self.conversion_job(file, settings.clone());
            ids.push(job.id());
            collection.insert(job, priority);
        }

        if !collection.is_empty() {
            info!(files = collection.len(), "Submitting conversion batch");
            self.manager.append_jobs(collection);
        }
        ids
    }

    /// Cancel every queued and running conversion.
    pub fn cancel(&self) {
        self.manager.cancel();
    }

    fn conversion_job(&self, file: PathBuf, settings: DecodeSettings) -> Job {
        let decoder = Arc::clone(&self.decoder);
        let sink = Arc::clone(&self.sink);
        let body_file = file.clone();
        let job = Job::new(move |ctx| {
            convert_file(decoder.as_ref(), sink.as_ref(), &body_file, &settings, ctx)
        });

        let events = Arc::clone(&self.events);
        job.connect(move |id, signal| {
            let event = match signal {
                JobSignal::Started => ConversionEvent::Starting { file: file.clone() },
                JobSignal::Progress(percent) => ConversionEvent::Progress {
                    file: file.clone(),
                    percent: *percent,
                },
                JobSignal::Done(JobOutcome::Succeeded) => {
                    ConversionEvent::Finished { file: file.clone() }
                }
                JobSignal::Done(JobOutcome::Failed(message)) => ConversionEvent::Failed {
                    file: file.clone(),
                    message: message.clone(),
                },
                JobSignal::Done(JobOutcome::Cancelled) => {
                    debug!(job_id = %id, file = %file.display(), "Conversion cancelled");
                    return;
                }
            };
            events.publish(event);
        });
        job
    }
}

impl std::fmt::Debug for ConversionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionCoordinator")
            .field("manager", &self.manager)
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

/// Job body: decode `file`, then hand the image to `sink`.
fn convert_file(
    decoder: &dyn Decoder,
    sink: &dyn ImageSink,
    file: &Path,
    settings: &DecodeSettings,
    ctx: &JobContext<'_>,
) -> Result<(), JobError> {
    let source = Source::Path(file.to_path_buf());
    let mut last_percent = 0u8;
    let mut progress = |fraction: f32| {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
        if percent > last_percent {
            last_percent = percent;
            ctx.report_progress(percent);
        }
    };
    let cancel = || ctx.is_cancelled();

    let image = decoder
        .decode(&source, settings, &mut progress, &cancel)
        .map_err(|e| {
            if e.is_cancelled() {
                JobError::Cancelled
            } else {
                JobError::failed(e)
            }
        })?;

    ctx.checkpoint()?;
    sink.store(file, image).map_err(JobError::failed)?;
    ctx.report_progress(100);
    Ok(())
}
