#![forbid(unsafe_code)]

//! Process-wide engine counters (for diagnostics/telemetry).

use std::sync::atomic::{AtomicU64, Ordering};

static LOADS_TOTAL: AtomicU64 = AtomicU64::new(0);
static DISPOSALS_TOTAL: AtomicU64 = AtomicU64::new(0);
static STALE_CALLBACKS_TOTAL: AtomicU64 = AtomicU64::new(0);
static HANDLER_PANICS_TOTAL: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record_load() {
    LOADS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_disposal() {
    DISPOSALS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_stale_callback() {
    STALE_CALLBACKS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_handler_panic() {
    HANDLER_PANICS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

/// Loads started.
#[must_use]
pub fn loads_total() -> u64 {
    LOADS_TOTAL.load(Ordering::Relaxed)
}

/// Subscriptions disposed by the engine.
#[must_use]
pub fn disposals_total() -> u64 {
    DISPOSALS_TOTAL.load(Ordering::Relaxed)
}

/// Callbacks dropped because they came from a finished load cycle.
#[must_use]
pub fn stale_callbacks_total() -> u64 {
    STALE_CALLBACKS_TOTAL.load(Ordering::Relaxed)
}

/// Lifecycle handler panics caught and isolated.
#[must_use]
pub fn handler_panics_total() -> u64 {
    HANDLER_PANICS_TOTAL.load(Ordering::Relaxed)
}
