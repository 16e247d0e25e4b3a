//! Progress events emitted by index runs
//!
//! The core emits structured events; rendering (spinners, bars, logs)
//! belongs to the hosting CLI, which passes its own sink in.

use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    FilesDiscovered { count: u64 },
    FileStarted { path: String },
    FileSkipped { path: String, reason: String },
    ChunksProduced { count: u64 },
    ChunkSkipped { path: String, reason: String },
    BatchCompleted { size: usize, latency_ms: u64 },
    BatchRetried { attempt: u32, reason: String },
    BatchFailed { size: usize, reason: String },
    EmbeddingsGenerated { count: u64 },
    Committed { chunks: u64 },
    Throughput { chunks_per_sec: f32, eta_secs: Option<u64> },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event; the default when no sink is supplied.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Buffers events for inspection. Used by tests and by hosts that
/// render progress after the fact.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}
