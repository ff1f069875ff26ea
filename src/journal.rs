//! # Ring Journal Engine
//!
//! This module implements the journal proper: a ring of fixed-size sectors
//! on a `ByteDevice`, written front to back with variable-length records
//! and wrapped around by reclaiming the oldest sector when the ring fills.
//!
//! ## Ring Discipline
//!
//! Every initialized sector carries a wrapping 32-bit sequence number,
//! stamped when the sector is opened for writing. At any moment the live
//! data occupies a contiguous run of sequence-adjacent sectors from
//! `first_sector` (oldest) to `last_sector` (newest); records append into
//! `last_sector` at `free_offset`. When a record does not fit, the engine
//! rotates: the ring-next sector is erased (if needed), stamped with the
//! next sequence, and becomes `last_sector`. If that sector was
//! `first_sector`, the oldest data is dropped and `first_sector` moves
//! forward past the next valid sector.
//!
//! ## Recovery
//!
//! `scan` rebuilds the in-memory state from the media alone. One forward
//! pass classifies every sector and picks the highest sequence using
//! wrap-aware comparison, with the first valid sector seen anchoring the
//! comparison so that a corrupted chain of multiple sequence overflows
//! cannot elect an arbitrary winner. The records of the winning sector are
//! then walked to find the free position, and a backward walk over
//! sequence-adjacent sectors finds `first_sector`.
//!
//! ## Write Protocol
//!
//! 1. `begin_write` reserves space: the codec programs a record header
//!    marked unfinished and the engine hands back a `RecordWriter` span for
//!    the payload.
//! 2. The caller programs payload bytes through the writer, in any order.
//! 3. `end_write` commits: a single program clears the unfinished mark.
//!
//! Power loss anywhere in this protocol leaves either an unfinished record
//! (skipped on the next scan) or a committed one; there is no intermediate
//! state. See the format module for the media-level reasoning.
//!
//! ## Enumeration
//!
//! `SectorEnumerator` walks valid sectors oldest-to-newest (or the
//! reverse); `RecordEnumerator` walks the committed records of one sector
//! in write order, skipping torn records using the length their headers
//! already carry. Enumerators are plain caller-owned values and hold no
//! device resources.
//!
//! ## Concurrency
//!
//! Mutating operations take `&mut self`, so the borrow checker rules out
//! interleaved writes or a scan racing a write on the same journal.
//! Introspection (`last_sector_address`, `maximum_record`) takes `&self`
//! and always observes consistent state: the engine never publishes a
//! half-updated position between device calls.

use eyre::Result;
use log::{debug, trace, warn};

use crate::device::{ByteDevice, DeviceSpan};
use crate::format::{JournalFormat, SectorInfo};
use crate::stats::{bump, STATS};

/// Wrap-aware sequence comparison: true iff `a` is newer than `b` on the
/// wrapping 32-bit sequence line.
fn seq_newer(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) as i32 > 0
}

/// Address of a valid sector yielded by a `SectorEnumerator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    addr: u32,
}

impl Sector {
    /// Byte address of the sector start.
    pub fn address(&self) -> u32 {
        self.addr
    }
}

/// Cursor over the valid sectors of a journal.
///
/// Freshly constructed (or after the walk completes) the enumerator is
/// invalid; each successful `next_sector` / `previous_sector` leaves it
/// positioned on a valid sector.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectorEnumerator {
    addr: Option<u32>,
}

impl SectorEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when positioned on a sector.
    pub fn is_valid(&self) -> bool {
        self.addr.is_some()
    }

    /// The sector currently under the cursor.
    pub fn sector(&self) -> Option<Sector> {
        self.addr.map(|addr| Sector { addr })
    }

    /// Address of the sector currently under the cursor.
    pub fn address(&self) -> Option<u32> {
        self.addr
    }
}

/// Cursor over the records of one sector.
///
/// After a successful `next_record`, `address`/`length` describe the
/// current record's payload. The enumerator reports `is_empty` when the
/// walk ended on erased space (the sector has room for more records), as
/// opposed to ending against the sector boundary or an unskippable torn
/// record.
#[derive(Debug, Clone, Copy)]
pub struct RecordEnumerator {
    r: u32,
    r_next: u32,
    len: u32,
    sector_info: Option<SectorInfo>,
    exhausted: bool,
}

impl Default for RecordEnumerator {
    fn default() -> Self {
        // unbound cursors enumerate nothing
        Self {
            r: 0,
            r_next: 0,
            len: 0,
            sector_info: None,
            exhausted: true,
        }
    }
}

impl RecordEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the walk stopped on erased space rather than on a full or
    /// corrupted sector.
    pub fn is_empty(&self) -> bool {
        self.r == self.r_next && !self.exhausted
    }

    /// Device address of the current record's payload.
    pub fn address(&self) -> u32 {
        self.r
    }

    /// Payload length of the current record.
    pub fn length(&self) -> usize {
        self.len as usize
    }
}

/// Payload span handed out by `Journal::begin_write`.
///
/// The caller programs payload bytes through it (in any order, any number
/// of programs) and then commits via `Journal::end_write`. The record
/// header sits immediately before the span and is managed by the engine.
pub struct RecordWriter<'a, D> {
    span: DeviceSpan<'a, D>,
}

impl<'a, D: ByteDevice> RecordWriter<'a, D> {
    /// Programs `data` at `offset` within the payload; returns the clamped
    /// byte count.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<usize> {
        self.span.program(offset, data)
    }

    /// Reads payload bytes back; returns the clamped byte count.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.span.read(offset, buf)
    }

    /// Allocated payload length.
    pub fn size(&self) -> usize {
        self.span.len()
    }

    /// Device address of the payload start.
    pub fn address(&self) -> u32 {
        self.span.offset()
    }

    /// The raw payload span.
    pub fn span(&self) -> &DeviceSpan<'a, D> {
        &self.span
    }
}

/// Ring journal over a `ByteDevice`, laid out by a `JournalFormat`.
///
/// Construction performs no I/O; `scan` must run before anything else.
pub struct Journal<'a, D, F> {
    device: &'a D,
    format: &'a F,
    last: SectorInfo,
    first_sector: u32,
    last_sector: u32,
    free_offset: u32,
    max_record: usize,
}

impl<'a, D: ByteDevice, F: JournalFormat> Journal<'a, D, F> {
    pub fn new(device: &'a D, format: &'a F) -> Self {
        Self {
            device,
            format,
            last: SectorInfo::default(),
            first_sector: 0,
            last_sector: 0,
            free_offset: 0,
            max_record: 0,
        }
    }

    /// Address of the most recently written sector.
    pub fn last_sector_address(&self) -> u32 {
        self.last_sector
    }

    /// Cached info of the most recently written sector.
    pub fn last_sector_info(&self) -> &SectorInfo {
        &self.last
    }

    /// Upper bound on the payload the current sector can still take,
    /// refreshed by `begin_write`. Advisory.
    pub fn maximum_record(&self) -> usize {
        self.max_record
    }

    /// Rebuilds `first_sector` / `last_sector` / the free position from the
    /// media. Must run once after construction, before any write or
    /// enumeration.
    pub fn scan(&mut self) -> Result<()> {
        debug!("scanning journal sectors");
        let sector_size = self.device.sector_size() as u32;
        let device_size = self.device.size() as u32;

        // Forward pass: find the highest-sequence valid sector. The first
        // valid sector seen seeds the comparison anchor; a candidate must
        // beat both the current best and the anchor, which pins down the
        // winner even after multiple sequence overflows.
        let mut best: Option<(u32, SectorInfo)> = None;
        let mut base_seq = 0u32;
        let mut free_sectors = 0usize;
        let mut bad_sectors = 0usize;

        let mut addr = 0u32;
        while addr < device_size {
            let si = self.format.scan_sector(&self.device.sector_span(addr), None)?;
            bump(&STATS.sectors_scanned);
            if si.is_empty() {
                trace!("sector {:#x}: empty", addr);
                free_sectors += 1;
            } else if !si.is_valid() {
                trace!("sector {:#x}: bad", addr);
                bump(&STATS.bad_sectors);
                bad_sectors += 1;
            } else {
                trace!("sector {:#x}: valid, sequence {}", addr, si.sequence);
                let replace = match &best {
                    None => {
                        base_seq = si.sequence;
                        true
                    }
                    Some((_, cur)) => {
                        seq_newer(si.sequence, cur.sequence) && seq_newer(si.sequence, base_seq)
                    }
                };
                if replace {
                    best = Some((addr, si));
                }
            }
            addr += sector_size;
        }

        debug!(
            "{} free and {} bad of {} sectors",
            free_sectors,
            bad_sectors,
            self.device.sector_count()
        );

        let Some((last_addr, si_last)) = best else {
            debug!("journal is empty");
            self.first_sector = 0;
            self.last_sector = 0;
            self.free_offset = 0;
            self.last = SectorInfo::default();
            return Ok(());
        };

        debug!(
            "highest sequence {} found in sector {:#x}",
            si_last.sequence, last_addr
        );
        self.last_sector = last_addr;

        // Walk the last sector's records to find where free space begins.
        let mut re = RecordEnumerator::new();
        self.enumerate_records(&mut re, Sector { addr: last_addr });
        while self.next_record(&mut re)?.is_some() {}

        if re.is_empty() {
            self.free_offset = re.r - last_addr;
            debug!(
                "last sector has free space at offset {:#x}",
                self.free_offset
            );
        } else {
            debug!("last sector is full or corrupted, next write rotates");
            self.free_offset = 0;
        }

        // Walk backward while sequences stay contiguous; the first
        // non-preceding sector of any class ends the run.
        let mut si_first = si_last;
        self.first_sector = last_addr;
        let mut addr = self.prev_sector_addr(last_addr);
        while addr != self.last_sector {
            let si = self
                .format
                .scan_sector(&self.device.sector_span(addr), Some(&si_first))?;
            if !si.is_preceding() {
                if si.is_valid() {
                    debug!(
                        "sequence run broken at sector {:#x} (sequence {})",
                        addr, si.sequence
                    );
                }
                break;
            }
            self.first_sector = addr;
            si_first = si;
            addr = self.prev_sector_addr(addr);
        }

        debug!(
            "sequences {}..={} stored in sectors {:#x}..={:#x}",
            si_first.sequence, si_last.sequence, self.first_sector, self.last_sector
        );
        self.last = si_last;
        Ok(())
    }

    /// Resets a sector enumerator to walk this journal.
    pub fn enumerate_sectors(&self, e: &mut SectorEnumerator) {
        *e = SectorEnumerator::new();
    }

    /// Advances to the next valid sector, oldest first. Returns false and
    /// invalidates the enumerator when the walk is complete.
    pub fn next_sector(&self, e: &mut SectorEnumerator) -> Result<bool> {
        loop {
            if e.addr == Some(self.last_sector) {
                *e = SectorEnumerator::new();
                return Ok(false);
            }
            let addr = match e.addr {
                None => self.first_sector,
                Some(addr) => self.next_sector_addr(addr),
            };
            e.addr = Some(addr);
            let si = self.format.scan_sector(&self.device.sector_span(addr), None)?;
            if si.is_valid() {
                return Ok(true);
            }
        }
    }

    /// Advances to the previous valid sector, newest first. Returns false
    /// and invalidates the enumerator when the walk is complete.
    pub fn previous_sector(&self, e: &mut SectorEnumerator) -> Result<bool> {
        loop {
            if e.addr == Some(self.first_sector) {
                *e = SectorEnumerator::new();
                return Ok(false);
            }
            let addr = match e.addr {
                None => self.last_sector,
                Some(addr) => self.prev_sector_addr(addr),
            };
            e.addr = Some(addr);
            let si = self.format.scan_sector(&self.device.sector_span(addr), None)?;
            if si.is_valid() {
                return Ok(true);
            }
        }
    }

    /// Reads up to `sector_size - offset` bytes of the sector under the
    /// enumerator. Returns 0 for an invalid enumerator or an offset past
    /// the sector end.
    pub fn read_sector_header(
        &self,
        e: &SectorEnumerator,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        let Some(addr) = e.addr else {
            return Ok(0);
        };
        let sector_size = self.device.sector_size();
        if offset >= sector_size {
            return Ok(0);
        }
        let n = buf.len().min(sector_size - offset);
        self.device.read(addr + offset as u32, &mut buf[..n])?;
        Ok(n)
    }

    /// Binds a record enumerator to `sector`.
    pub fn enumerate_records(&self, e: &mut RecordEnumerator, sector: Sector) {
        *e = RecordEnumerator {
            r: sector.addr,
            r_next: sector.addr,
            len: 0,
            sector_info: None,
            exhausted: false,
        };
    }

    /// Advances to the next committed record of the bound sector.
    ///
    /// Returns `Some(payload_length)` for each record in write order
    /// (zero-length records included) and `None` when no records remain.
    /// Torn records are skipped when their headers carry a usable length;
    /// an unskippable one ends the walk for this sector.
    pub fn next_record(&self, e: &mut RecordEnumerator) -> Result<Option<usize>> {
        if e.exhausted {
            return Ok(None);
        }

        let si = match e.sector_info {
            Some(si) => si,
            None => {
                // first step: fetch the sector header
                let si = self.format.scan_sector(&self.device.sector_span(e.r), None)?;
                e.r_next = e.r + si.first_record as u32;
                e.sector_info = Some(si);
                si
            }
        };

        if !si.is_valid() {
            return Ok(None);
        }

        while self.device.is_same_sector(e.r, e.r_next) {
            e.r = e.r_next;
            let (ri, payload_offset) = self
                .format
                .scan_record(&self.device.rest_of_sector_span(e.r), &si)?;
            if ri.is_empty() {
                return Ok(None);
            }
            e.r_next = e.r + ri.next_record as u32;
            if ri.is_bad() {
                bump(&STATS.bad_records);
                if e.r_next != e.r {
                    // torn record with a usable length: step over it
                    continue;
                }
                e.exhausted = true;
                return Ok(None);
            }
            e.r += payload_offset as u32;
            e.len = ri.payload as u32;
            return Ok(Some(ri.payload as usize));
        }

        if e.r_next > self.device.sector_address(e.r) + self.device.sector_size() as u32 {
            warn!("next record pointer {:#x} beyond sector end", e.r_next);
        }
        Ok(None)
    }

    /// Reads payload bytes of the record under the enumerator, starting at
    /// `offset` within the payload. Returns the clamped byte count.
    pub fn read_record(
        &self,
        e: &RecordEnumerator,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        let bound = e.sector_info.is_some_and(|si| si.is_valid());
        if !bound || offset >= e.len as usize {
            return Ok(0);
        }
        let n = buf.len().min(e.len as usize - offset);
        self.device.read(e.r + offset as u32, &mut buf[..n])?;
        Ok(n)
    }

    /// Allocates a record of up to `length` payload bytes, rotating sectors
    /// as needed.
    ///
    /// Returns the payload writer, or `None` when the ring is exhausted
    /// (no sector on the device can be erased and initialized). The
    /// allocated payload may be shorter than requested when `length`
    /// exceeds what a fresh sector can hold; check `RecordWriter::size`.
    pub fn begin_write(&mut self, length: usize) -> Result<Option<RecordWriter<'a, D>>> {
        let device = self.device;
        let sector_size = device.sector_size() as u32;

        loop {
            if self.free_offset == 0 || self.free_offset >= sector_size {
                if !self.new_sector()? {
                    return Ok(None);
                }
                debug_assert!(self.free_offset > 0 && self.free_offset < sector_size);
            }

            let rest = device.rest_of_sector_span(self.last_sector + self.free_offset);
            let (ri, payload_offset) = self.format.init_record(&rest, length)?;
            self.free_offset += ri.next_record as u32;
            self.max_record = (sector_size as isize
                - self.free_offset as isize
                - payload_offset as isize)
                .max(0) as usize;

            if ri.is_valid() {
                let payload_addr = self.last_sector + self.free_offset
                    - ri.next_record as u32
                    + payload_offset as u32;
                let span = device.span(payload_addr, ri.payload as usize);
                return Ok(Some(RecordWriter { span }));
            }

            if !(ri.is_bad() && ri.next_record != 0) {
                // nothing more fits here; force rotation on the next pass
                self.free_offset = sector_size;
            }
        }
    }

    /// Commits the record allocated by `begin_write`.
    pub fn end_write(&self, writer: &RecordWriter<'a, D>) -> Result<()> {
        self.format.commit_record(&writer.span)?;
        bump(&STATS.records_written);
        Ok(())
    }

    /// Allocates, programs, and commits one record. Returns false when the
    /// ring is exhausted.
    pub fn write(&mut self, data: &[u8]) -> Result<bool> {
        let Some(writer) = self.begin_write(data.len())? else {
            return Ok(false);
        };
        writer.write(0, data)?;
        self.end_write(&writer)?;
        Ok(true)
    }

    /// Seals the current sector; the next `begin_write` allocates in a
    /// fresh one.
    pub fn close_sector(&mut self) -> Result<()> {
        if self.free_offset != 0 {
            self.advance_sector()?;
        }
        Ok(())
    }

    /// Moves `last_sector` one position around the ring, evicting
    /// `first_sector` when the ring has wrapped onto it.
    fn advance_sector(&mut self) -> Result<()> {
        self.last_sector = self.next_sector_addr(self.last_sector);
        self.free_offset = 0;
        trace!("advancing to sector {:#x}", self.last_sector);

        if self.last_sector != self.first_sector {
            return Ok(());
        }

        // the oldest stored sector is about to be overwritten
        let mut addr = self.next_sector_addr(self.first_sector);
        while addr != self.last_sector {
            let si = self.format.scan_sector(&self.device.sector_span(addr), None)?;
            if si.is_valid() {
                debug!(
                    "first sector moved to {:#x} (sequence {}), old one will be overwritten",
                    addr, si.sequence
                );
                self.first_sector = addr;
                return Ok(());
            }
            addr = self.next_sector_addr(addr);
        }

        trace!(
            "no other valid sector, first stays at {:#x}",
            self.first_sector
        );
        Ok(())
    }

    /// Erases (when needed) and initializes a sector for writing. Returns
    /// false once a full ring walk produced no usable sector.
    fn new_sector(&mut self) -> Result<bool> {
        if self.free_offset != 0 {
            self.advance_sector()?;
        }

        let sector_size = self.device.sector_size();
        for _ in 0..self.device.sector_count() {
            if !self.device.is_empty(self.last_sector, sector_size)? {
                trace!("erasing sector {:#x}", self.last_sector);
                if !self.device.erase(self.last_sector, sector_size as u32)? {
                    warn!("failed to erase sector {:#x}", self.last_sector);
                    self.advance_sector()?;
                    continue;
                }
                bump(&STATS.sectors_erased);
            }

            // a failed init must not clobber the cached info: the sequence
            // chain continues from the last good sector
            let mut info = self.last;
            self.format
                .init_sector(&self.device.sector_span(self.last_sector), &mut info)?;
            if info.is_valid() {
                self.last = info;
                self.free_offset = info.first_record as u32;
                bump(&STATS.sectors_initialized);
                trace!(
                    "initialized sector {:#x}, sequence {}",
                    self.last_sector,
                    info.sequence
                );
                return Ok(true);
            }

            warn!("failed to initialize sector {:#x}", self.last_sector);
            self.advance_sector()?;
        }

        warn!("ring exhausted: no sector could be initialized");
        Ok(false)
    }

    fn next_sector_addr(&self, addr: u32) -> u32 {
        let next = addr + self.device.sector_size() as u32;
        if next as usize == self.device.size() {
            0
        } else {
            next
        }
    }

    fn prev_sector_addr(&self, addr: u32) -> u32 {
        let base = if addr == 0 {
            self.device.size() as u32
        } else {
            addr
        };
        base - self.device.sector_size() as u32
    }
}
