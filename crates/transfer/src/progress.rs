use std::time::{Duration, Instant};

use seqlift_protocol::{ProgressEvent, UploadEvent};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::types::AcceptedChunk;

/// Minimum interval between two throughput log lines.
const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Receives a callback for every chunk the server accepts.
pub trait ChunkObserver: Send {
    fn on_chunk_accepted(&mut self, chunk: &AcceptedChunk);
}

/// Ordered list of observers notified for each accepted chunk.
#[derive(Default)]
pub struct ObserverChain<'o> {
    observers: Vec<&'o mut dyn ChunkObserver>,
}

impl<'o> ObserverChain<'o> {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Appends an observer; observers run in insertion order.
    pub fn push(&mut self, observer: &'o mut dyn ChunkObserver) {
        self.observers.push(observer);
    }

    pub fn notify(&mut self, chunk: &AcceptedChunk) {
        for observer in self.observers.iter_mut() {
            observer.on_chunk_accepted(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ProgressNotifier
// ---------------------------------------------------------------------------

/// Static per-sequence context attached to every progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceContext {
    pub sequence_path: String,
    pub sequence_uuid: String,
    pub total_bytes: u64,
    pub sequence_idx: usize,
    pub total_sequences: usize,
}

/// Publishes cumulative byte progress for one archive.
///
/// Emission is fire-and-forget: a full or closed channel never affects the
/// transfer.
pub struct ProgressNotifier {
    context: SequenceContext,
    uploaded_bytes: u64,
    events: Option<mpsc::Sender<UploadEvent>>,
}

impl ProgressNotifier {
    pub fn new(context: SequenceContext, events: Option<mpsc::Sender<UploadEvent>>) -> Self {
        Self {
            context,
            uploaded_bytes: 0,
            events,
        }
    }

    /// Seeds the counter with the server-reported resume offset.
    pub fn reset_to(&mut self, offset: u64) {
        self.uploaded_bytes = offset.min(self.context.total_bytes);
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn context(&self) -> &SequenceContext {
        &self.context
    }
}

impl ChunkObserver for ProgressNotifier {
    fn on_chunk_accepted(&mut self, chunk: &AcceptedChunk) {
        self.uploaded_bytes = (self.uploaded_bytes + chunk.size).min(self.context.total_bytes);

        let Some(tx) = &self.events else {
            return;
        };
        let event = ProgressEvent {
            chunk_size: chunk.size,
            uploaded_bytes: self.uploaded_bytes,
            sequence_path: self.context.sequence_path.clone(),
            sequence_uuid: self.context.sequence_uuid.clone(),
            total_bytes: self.context.total_bytes,
            sequence_idx: self.context.sequence_idx,
            total_sequences: self.context.total_sequences,
        };
        if let Err(e) = tx.try_send(UploadEvent::Progress(event)) {
            trace!("dropped progress event: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// ThroughputObserver
// ---------------------------------------------------------------------------

/// Logs transfer rate and ETA for one archive.
pub struct ThroughputObserver {
    label: String,
    total_bytes: u64,
    uploaded_bytes: u64,
    speed: SpeedCalculator,
    last_log: Option<Instant>,
}

impl ThroughputObserver {
    pub fn new(label: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            label: label.into(),
            total_bytes,
            uploaded_bytes: 0,
            speed: SpeedCalculator::new(None, None),
            last_log: None,
        }
    }

    /// Starts a new attempt at `offset`.
    pub fn reset_to(&mut self, offset: u64) {
        self.uploaded_bytes = offset.min(self.total_bytes);
        self.speed.reset();
        self.last_log = None;
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.speed.bytes_per_second()
    }
}

impl ChunkObserver for ThroughputObserver {
    fn on_chunk_accepted(&mut self, chunk: &AcceptedChunk) {
        self.uploaded_bytes = (self.uploaded_bytes + chunk.size).min(self.total_bytes);
        self.speed.add_sample(chunk.size);

        let now = Instant::now();
        let due = self
            .last_log
            .is_none_or(|last| now.duration_since(last) >= LOG_INTERVAL);
        if !due && self.uploaded_bytes < self.total_bytes {
            return;
        }
        self.last_log = Some(now);

        let remaining = self.total_bytes - self.uploaded_bytes;
        debug!(
            target: "seqlift::progress",
            label = %self.label,
            uploaded = self.uploaded_bytes,
            total = self.total_bytes,
            bytes_per_sec = format_args!("{:.0}", self.speed.bytes_per_second()),
            eta_secs = self.speed.eta(remaining).map(|d| d.as_secs()),
            "uploading"
        );
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: Vec::new(),
            max_samples: max_samples.unwrap_or(100),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(self.window_size) {
            self.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if self.samples.len() > self.max_samples {
            let excess = self.samples.len() - self.max_samples;
            self.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = self.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
