//! Cooperative cancellation and progress counters.
//!
//! Nothing in the codec is preempted. Long operations poll
//! [`ProgressSink::is_cancelled`] once per entry and once per read/write
//! call or I/O buffer, so cancellation latency stays bounded by the buffer
//! size the caller picked.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{ZipError, ZipResult};

/// Receiver for progress events and source of the cancellation flag.
pub trait ProgressSink: Send + Sync {
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Payload bytes processed since the last call.
    fn add_bytes(&self, _bytes: u64) {}

    /// One entry has been fully written or read.
    fn entry_done(&self) {}
}

/// Sink that never cancels and discards all counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unmonitored;

impl ProgressSink for Unmonitored {}

/// Thread-safe counters plus a cancel flag, meant to be shared through an
/// `Arc` between the worker and whoever drives the UI.
#[derive(Debug, Default)]
pub struct ProgressMonitor {
    cancelled: AtomicBool,
    bytes: AtomicU64,
    entries: AtomicU64,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn entries_processed(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ProgressMonitor {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn entry_done(&self) {
        self.entries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns [`ZipError::Cancelled`] once the sink has been cancelled.
pub(crate) fn check_cancelled(sink: &dyn ProgressSink) -> ZipResult<()> {
    if sink.is_cancelled() {
        return Err(ZipError::Cancelled);
    }
    Ok(())
}
