//! Fan-out of engine events to any number of subscribers.
//!
//! Each subscriber gets its own unbounded crossbeam channel, so publishers
//! (worker threads) never block on slow consumers. Subscribers that drop
//! their receiver are pruned on the next publish.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::job::{JobId, JobOutcome, JobSignal};

/// Engine-level event, one per job signal plus the aggregate idle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Started(JobId),
    Progress(JobId, u8),
    Finished(JobId),
    Failed(JobId, String),
    Cancelled(JobId),
    /// Every appended job has been processed.
    Idle,
}

impl EngineEvent {
    /// Translate a job signal into the matching engine event.
    pub fn from_signal(id: JobId, signal: &JobSignal) -> Self {
        match signal {
            JobSignal::Started => EngineEvent::Started(id),
            JobSignal::Progress(percent) => EngineEvent::Progress(id, *percent),
            JobSignal::Done(JobOutcome::Succeeded) => EngineEvent::Finished(id),
            JobSignal::Done(JobOutcome::Failed(message)) => {
                EngineEvent::Failed(id, message.clone())
            }
            JobSignal::Done(JobOutcome::Cancelled) => EngineEvent::Cancelled(id),
        }
    }
}

/// Broadcast bus for cloneable events.
pub struct EventBus<E> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber. Only events published afterwards are seen.
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send `event` to every live subscriber.
    pub fn publish(&self, event: E) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
