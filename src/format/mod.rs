//! # Journal Format Codec
//!
//! This module defines the seam between the journal engine and the on-media
//! layout: how a sector announces itself as in-use, how records are framed
//! within it, and how a record transitions from "allocated" to "committed"
//! in a way that survives power loss at any byte.
//!
//! The engine never interprets media bytes itself. It hands the codec
//! bounds-clamped `DeviceSpan` views (a whole sector, or the rest of a
//! sector from the write cursor) and acts purely on the `SectorInfo` /
//! `RecordInfo` classifications that come back. This keeps the ring
//! discipline format-agnostic: a fixed-record format or a checksummed format
//! drops in behind the same five operations.
//!
//! ## Classification Model
//!
//! Sectors classify as Empty (header still erased), Valid (recognized magic
//! and sequence), ValidPreceding (Valid, and sequence-adjacent to a
//! reference sector during the backward ring walk), or Bad (header present
//! but unrecognized: a foreign magic, or a torn header write). Records
//! classify as Empty (header erased: end of live records), Valid
//! (committed), or Bad (allocated but never committed, or inconsistent).
//!
//! `Bad` is deliberately the `Default` for both info structs, mirroring a
//! zero-initialized aggregate: a default-constructed info can never be
//! mistaken for a scanned-valid one.
//!
//! ## Two-Phase Record Protocol
//!
//! `init_record` reserves space by programming a header that is explicitly
//! marked unfinished; `commit_record` finishes it with a single program that
//! clears the mark. Power loss between the two leaves a Bad record that
//! enumeration skips using the length already present in the header.

mod simple;

pub use simple::{
    SimpleVariableFormat, MAX_RECORD_PAYLOAD, RECORD_HEADER_SIZE, SECTOR_HEADER_SIZE,
};

use eyre::Result;

use crate::device::{ByteDevice, DeviceSpan};

/// Classification of a sector produced by `JournalFormat::scan_sector`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectorState {
    /// Header present but unrecognized; the sector is skipped.
    #[default]
    Bad,
    /// Header reads as all-ones; the sector has never been initialized
    /// since its last erase.
    Empty,
    /// Header carries a recognized magic and sequence.
    Valid,
    /// Valid, and its sequence immediately precedes the reference sector's.
    ValidPreceding,
}

/// Result of scanning or initializing a sector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorInfo {
    /// Monotonic (wrapping) sequence stamped when the sector was opened.
    pub sequence: u32,
    /// Offset of the first record from the start of the sector.
    pub first_record: u16,
    /// Record size for fixed-record formats; 0 for variable-length formats.
    pub fixed_record_size: u8,
    /// Classification.
    pub state: SectorState,
}

impl SectorInfo {
    pub fn is_bad(&self) -> bool {
        self.state == SectorState::Bad
    }

    pub fn is_empty(&self) -> bool {
        self.state == SectorState::Empty
    }

    /// True for both `Valid` and `ValidPreceding`.
    pub fn is_valid(&self) -> bool {
        self.state >= SectorState::Valid
    }

    pub fn is_preceding(&self) -> bool {
        self.state == SectorState::ValidPreceding
    }
}

/// Classification of a record produced by `scan_record` / `init_record`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordState {
    /// Torn or inconsistent; skippable when `next_record` is nonzero.
    #[default]
    Bad,
    /// Header reads as all-ones; end of live records in this sector.
    Empty,
    /// Framed and committed.
    Valid,
}

/// Result of scanning or allocating a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordInfo {
    /// Payload length in bytes.
    pub payload: u16,
    /// Offset of the following record header from the position this record
    /// was scanned or allocated at. Zero on an unskippable Bad record.
    pub next_record: u16,
    /// Classification.
    pub state: RecordState,
}

impl RecordInfo {
    pub fn is_bad(&self) -> bool {
        self.state == RecordState::Bad
    }

    pub fn is_empty(&self) -> bool {
        self.state == RecordState::Empty
    }

    pub fn is_valid(&self) -> bool {
        self.state == RecordState::Valid
    }
}

/// On-media layout codec used by the journal engine.
///
/// Implementations are stateless apart from configuration (e.g. the magic
/// value identifying their sectors). All offsets in `RecordInfo` and return
/// values are relative to the span passed in.
pub trait JournalFormat {
    /// Classifies a sector from its header.
    ///
    /// With `preceding` given, a valid sector whose sequence is exactly one
    /// less than `preceding.sequence` (wrapping) classifies as
    /// `ValidPreceding`. Never writes to the media.
    fn scan_sector<D: ByteDevice>(
        &self,
        sector: &DeviceSpan<'_, D>,
        preceding: Option<&SectorInfo>,
    ) -> Result<SectorInfo>;

    /// Reads the record header at the start of `rest` (the remainder of a
    /// sector from the current enumeration position).
    ///
    /// Returns the record classification and the offset of the payload from
    /// the start of `rest`.
    fn scan_record<D: ByteDevice>(
        &self,
        rest: &DeviceSpan<'_, D>,
        sector: &SectorInfo,
    ) -> Result<(RecordInfo, usize)>;

    /// Programs a fresh header into an erased sector.
    ///
    /// On entry `info` is the caller's cached last-sector info; the new
    /// sequence is the old one incremented when `info` is valid, 1
    /// otherwise. On success `info` holds the new sector's Valid info; on
    /// failure (program did not take on the media) `info.state` is Bad.
    fn init_sector<D: ByteDevice>(
        &self,
        sector: &DeviceSpan<'_, D>,
        info: &mut SectorInfo,
    ) -> Result<()>;

    /// Reserves space for a record of up to `payload_len` bytes at the
    /// start of `rest`, programming a header marked unfinished.
    ///
    /// Returns the record info and the payload offset from the start of
    /// `rest`. When the record cannot fit, the info is Bad with
    /// `next_record == 0` and nothing is programmed.
    fn init_record<D: ByteDevice>(
        &self,
        rest: &DeviceSpan<'_, D>,
        payload_len: usize,
    ) -> Result<(RecordInfo, usize)>;

    /// Transitions the record owning `payload` from reserved to committed
    /// with a single program.
    ///
    /// `payload` must be the exact span handed out via `init_record`'s
    /// offset; the record header sits immediately before it in the same
    /// sector.
    fn commit_record<D: ByteDevice>(&self, payload: &DeviceSpan<'_, D>) -> Result<()>;
}
