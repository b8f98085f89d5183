//! Backpressure control for the single render a driver instance owns.
//!
//! Adapted from the teacher's Uuid-keyed multi-stream `BackpressureController`
//! down to one render at a time (the driver "is not thread-safe to itself —
//! one instance drives one render at a time"): one semaphore bounds
//! `max_in_flight` concurrent CR invocations, one atomic counter tracks the
//! running memory estimate behind the memory policy's aggressive-mode and
//! hard-ceiling checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Resource gate for one render. Cheaply cloneable (every field is an
/// `Arc`) so the same controller can be shared across bounded-parallel
/// render tasks.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    semaphore: Arc<Semaphore>,
    memory_estimate: Arc<AtomicU64>,
    memory_limit: u64,
}

impl BackpressureController {
    pub fn new(max_in_flight: usize, memory_limit: u64) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
            memory_estimate: Arc::new(AtomicU64::new(0)),
            memory_limit,
        }
    }

    /// Acquires a slot for one CR dispatch. Awaited before each dispatch,
    /// the concurrency-model's "before each CR dispatch" suspension point.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        Arc::clone(&self.semaphore).acquire_owned().await.expect("semaphore never closed")
    }

    /// Adds `bytes` to the running estimate (HM size + in-flight chunk
    /// bytes + output queue); returns the estimate after the addition.
    pub fn add_estimate(&self, bytes: u64) -> u64 {
        self.memory_estimate.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    /// Removes `bytes` from the running estimate once a chunk has been
    /// acknowledged by the consumer and its bytes are no longer held.
    pub fn sub_estimate(&self, bytes: u64) {
        self.memory_estimate.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| Some(cur.saturating_sub(bytes))).ok();
    }

    pub fn current_estimate(&self) -> u64 {
        self.memory_estimate.load(Ordering::SeqCst)
    }

    /// `true` once the estimate exceeds the hard ceiling (2x `memory_limit`)
    /// even after aggressive mode has already halved the driver's bounds —
    /// the trigger for a fatal `MemoryExhausted`.
    pub fn is_hard_exhausted(&self) -> bool {
        self.current_estimate() > self.memory_limit.saturating_mul(2)
    }

    /// `true` once past the soft `memory_limit`, the aggressive-mode trigger.
    pub fn is_soft_exceeded(&self) -> bool {
        self.current_estimate() > self.memory_limit
    }

    /// Reactively shrinks concurrency toward one in-flight chunk by
    /// permanently forgetting every permit but one. Irreversible for the
    /// rest of this render — the memory policy only ever shrinks bounds.
    pub fn degrade_to_sequential(&self) {
        let available = self.semaphore.available_permits();
        if available > 1 {
            self.semaphore.forget_permits(available - 1);
        }
    }
}
