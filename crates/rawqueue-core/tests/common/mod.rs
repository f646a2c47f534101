use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use rawqueue_core::{EngineConfig, EngineEvent, ThreadPoolManager};

/// Initialize tracing for tests with appropriate settings
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn manager(workers: usize) -> ThreadPoolManager {
    init_tracing();
    ThreadPoolManager::new(EngineConfig::new().with_max_workers(workers))
        .expect("manager should start")
}

/// Drain events until `Idle` arrives or the timeout expires.
pub fn collect_until_idle(events: &Receiver<EngineEvent>, timeout: Duration) -> Vec<EngineEvent> {
    let deadline = Instant::now() + timeout;
    let mut received = Vec::new();
    while let Ok(event) = events.recv_deadline(deadline) {
        let idle = event == EngineEvent::Idle;
        received.push(event);
        if idle {
            break;
        }
    }
    received
}

/// Poll `condition` until it holds or the timeout expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
