//! # Journal Statistics
//!
//! A process-wide, zero-initialized aggregate of operation counters. The
//! journal increments these with relaxed atomics as it works; on a
//! single-threaded runtime that costs a plain increment. Nothing here is
//! load-bearing: the counters exist for diagnostics and for tests that
//! want to assert behavioral properties (e.g. that a rescan of a clean
//! journal erases nothing).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter aggregate. Zero-initialized at process start; never
/// reset.
pub struct JournalStats {
    pub sectors_scanned: AtomicU64,
    pub sectors_erased: AtomicU64,
    pub sectors_initialized: AtomicU64,
    pub records_written: AtomicU64,
    pub bad_sectors: AtomicU64,
    pub bad_records: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sectors_scanned: u64,
    pub sectors_erased: u64,
    pub sectors_initialized: u64,
    pub records_written: u64,
    pub bad_sectors: u64,
    pub bad_records: u64,
}

pub static STATS: JournalStats = JournalStats {
    sectors_scanned: AtomicU64::new(0),
    sectors_erased: AtomicU64::new(0),
    sectors_initialized: AtomicU64::new(0),
    records_written: AtomicU64::new(0),
    bad_sectors: AtomicU64::new(0),
    bad_records: AtomicU64::new(0),
};

impl JournalStats {
    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sectors_scanned: self.sectors_scanned.load(Ordering::Relaxed),
            sectors_erased: self.sectors_erased.load(Ordering::Relaxed),
            sectors_initialized: self.sectors_initialized.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            bad_sectors: self.bad_sectors.load(Ordering::Relaxed),
            bad_records: self.bad_records.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
