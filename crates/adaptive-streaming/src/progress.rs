//! Progress tracking for a single render.
//!
//! Design Notes "Event emitter": the source emits progress ad hoc from
//! inside async operations; here all progress passes through exactly one
//! publish point the driver owns, so ordering against `on_chunk` stays
//! deterministic. Adapted down from the teacher's Uuid-keyed multi-stream
//! `ProgressTracker` to the single render a driver instance ever holds at
//! once (see the driver's scheduling model).

use std::time::Instant;

/// One `on_chunk`-aligned progress sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub chunk: usize,
    pub total: usize,
    pub percent: u8,
    pub render_time_ms: u64,
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// The default observer: subscribing to progress is optional per the
/// external-interfaces contract, so a render that doesn't ask for events
/// pays nothing for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Computes and publishes one `ProgressEvent` per completed chunk. `percent`
/// is forced to exactly 100 on the last chunk regardless of integer
/// rounding, satisfying "monotone progress, last call reports 100".
pub struct ProgressPublisher<'a> {
    observer: &'a dyn ProgressObserver,
    total: usize,
    started: Instant,
}

impl<'a> ProgressPublisher<'a> {
    pub fn new(observer: &'a dyn ProgressObserver, total: usize) -> Self {
        Self { observer, total, started: Instant::now() }
    }

    pub fn publish(&self, chunk_index: usize) -> ProgressEvent {
        let is_last = chunk_index + 1 >= self.total;
        let percent = if self.total == 0 || is_last {
            100
        } else {
            (((chunk_index + 1) * 100) / self.total) as u8
        };
        let event = ProgressEvent {
            chunk: chunk_index,
            total: self.total,
            percent,
            render_time_ms: self.started.elapsed().as_millis() as u64,
        };
        self.observer.on_progress(event);
        event
    }
}
