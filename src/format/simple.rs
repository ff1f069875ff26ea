//! # Simple Variable-Length Record Format
//!
//! The default on-media layout: an 8-byte sector header followed by
//! end-to-end variable-length records, each framed by a 2-byte size field.
//!
//! ## Sector Layout
//!
//! ```text
//! +--------+----------+------------------------------------------+
//! | magic  | sequence | records...                               |
//! | u32 LE | u32 LE   |                                          |
//! +--------+----------+------------------------------------------+
//! 0        4          8                                  sector end
//! ```
//!
//! ## Record Framing
//!
//! ```text
//! +-----------+------------------+
//! | size u16  | payload          |
//! +-----------+------------------+
//! ```
//!
//! Bit 15 of `size` is the unfinished mark; bits 0..14 are the payload
//! length. The erased value 0xFFFF means "no record here", which is also
//! why the maximum payload is 0x7FFF and why allocation programs the size
//! with bit 15 still set: every later state of the field is reachable from
//! the erased state by clearing bits only.
//!
//! ## Torn-Write Behavior
//!
//! `init_sector` programs the sequence before the magic. A power cut
//! between the two leaves a header with a sequence but no recognizable
//! magic, which scans Bad; programming the magic first would leave a
//! valid-looking sector with an erased (all-ones) sequence.
//!
//! `commit_record` is a single program of 0x7FFF over the size field: the
//! AND semantics clear bit 15 and leave the length bits untouched, so the
//! commit is atomic at the media level with no intermediate state.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{JournalFormat, RecordInfo, RecordState, SectorInfo, SectorState};
use crate::device::{ByteDevice, DeviceSpan};

/// Size of the on-media sector header in bytes.
pub const SECTOR_HEADER_SIZE: usize = 8;

/// Size of the on-media record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 2;

/// Maximum payload representable in the 15 length bits of a record header.
pub const MAX_RECORD_PAYLOAD: usize = 0x7FFF;

const UNFINISHED: u16 = 0x8000;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct SectorHeader {
    magic: U32,
    sequence: U32,
}

const _: () = assert!(std::mem::size_of::<SectorHeader>() == SECTOR_HEADER_SIZE);

impl SectorHeader {
    fn new(magic: u32, sequence: u32) -> Self {
        Self {
            magic: U32::new(magic),
            sequence: U32::new(sequence),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct RecordHeader {
    size: U16,
}

const _: () = assert!(std::mem::size_of::<RecordHeader>() == RECORD_HEADER_SIZE);

impl RecordHeader {
    fn is_empty(&self) -> bool {
        self.size.get() == 0xFFFF
    }

    fn is_unfinished(&self) -> bool {
        self.size.get() & UNFINISHED != 0
    }

    fn payload_len(&self) -> u16 {
        self.size.get() & !UNFINISHED
    }
}

/// The default `JournalFormat`: 8-byte sector headers, 2-byte record
/// headers, variable payload lengths up to `MAX_RECORD_PAYLOAD`.
pub struct SimpleVariableFormat {
    magic: u32,
}

impl SimpleVariableFormat {
    /// Creates the format with the given sector magic.
    ///
    /// The magic must be neither zero nor all-ones: all-ones is
    /// indistinguishable from an erased header, and zero from common
    /// corruption patterns.
    pub fn new(magic: u32) -> Self {
        assert!(
            magic != 0 && magic != u32::MAX,
            "sector magic must be neither zero nor all-ones"
        );
        Self { magic }
    }
}

impl JournalFormat for SimpleVariableFormat {
    fn scan_sector<D: ByteDevice>(
        &self,
        sector: &DeviceSpan<'_, D>,
        preceding: Option<&SectorInfo>,
    ) -> Result<SectorInfo> {
        let mut buf = [0u8; SECTOR_HEADER_SIZE];
        let n = sector.read(0, &mut buf)?;
        ensure!(
            n == SECTOR_HEADER_SIZE,
            "sector span too small for header: {} < {}",
            n,
            SECTOR_HEADER_SIZE
        );

        let header = SectorHeader::read_from_bytes(&buf)
            .map_err(|e| eyre::eyre!("failed to parse sector header: {:?}", e))?;

        let mut info = SectorInfo {
            sequence: header.sequence.get(),
            first_record: SECTOR_HEADER_SIZE as u16,
            fixed_record_size: 0,
            state: SectorState::Bad,
        };

        if buf.iter().all(|&b| b == 0xFF) {
            info.state = SectorState::Empty;
        } else if header.magic.get() != self.magic {
            info.state = SectorState::Bad;
        } else if preceding.is_some_and(|p| header.sequence.get().wrapping_add(1) == p.sequence) {
            info.state = SectorState::ValidPreceding;
        } else {
            info.state = SectorState::Valid;
        }

        Ok(info)
    }

    fn scan_record<D: ByteDevice>(
        &self,
        rest: &DeviceSpan<'_, D>,
        _sector: &SectorInfo,
    ) -> Result<(RecordInfo, usize)> {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        let n = rest.read(0, &mut buf)?;
        if n < RECORD_HEADER_SIZE {
            // a remainder shorter than a header cannot hold another record
            return Ok((
                RecordInfo {
                    payload: 0,
                    next_record: 0,
                    state: RecordState::Empty,
                },
                n,
            ));
        }

        let header = RecordHeader::read_from_bytes(&buf)
            .map_err(|e| eyre::eyre!("failed to parse record header: {:?}", e))?;

        let payload = header.payload_len();
        let state = if header.is_empty() {
            RecordState::Empty
        } else if header.is_unfinished() {
            RecordState::Bad
        } else {
            RecordState::Valid
        };

        Ok((
            RecordInfo {
                payload,
                next_record: payload + RECORD_HEADER_SIZE as u16,
                state,
            },
            RECORD_HEADER_SIZE,
        ))
    }

    fn init_sector<D: ByteDevice>(
        &self,
        sector: &DeviceSpan<'_, D>,
        info: &mut SectorInfo,
    ) -> Result<()> {
        let sequence = if info.is_valid() { info.sequence } else { 0 }.wrapping_add(1);
        let header = SectorHeader::new(self.magic, sequence);
        let bytes = header.as_bytes();

        // sequence before magic: a torn header must scan Bad
        sector.program(4, &bytes[4..8])?;
        sector.program(0, &bytes[0..4])?;

        let mut check = [0u8; SECTOR_HEADER_SIZE];
        sector.read(0, &mut check)?;
        if &check[..] != bytes {
            info.state = SectorState::Bad;
            return Ok(());
        }

        info.sequence = sequence;
        info.first_record = SECTOR_HEADER_SIZE as u16;
        info.fixed_record_size = 0;
        info.state = SectorState::Valid;
        Ok(())
    }

    fn init_record<D: ByteDevice>(
        &self,
        rest: &DeviceSpan<'_, D>,
        payload_len: usize,
    ) -> Result<(RecordInfo, usize)> {
        let mut size = payload_len.min(MAX_RECORD_PAYLOAD);

        if rest.offset() & rest.device().sector_mask() == SECTOR_HEADER_SIZE as u32 {
            // first record of the sector: clamp to what the sector can hold
            size = size.min(rest.len().saturating_sub(RECORD_HEADER_SIZE));
        }

        if RECORD_HEADER_SIZE + size > rest.len() {
            return Ok((
                RecordInfo {
                    payload: 0,
                    next_record: 0,
                    state: RecordState::Bad,
                },
                0,
            ));
        }

        let marked = size as u16 | UNFINISHED;
        rest.program(0, &marked.to_le_bytes())?;

        Ok((
            RecordInfo {
                payload: size as u16,
                next_record: (RECORD_HEADER_SIZE + size) as u16,
                state: RecordState::Valid,
            },
            RECORD_HEADER_SIZE,
        ))
    }

    fn commit_record<D: ByteDevice>(&self, payload: &DeviceSpan<'_, D>) -> Result<()> {
        let device = payload.device();
        let header_addr = payload
            .offset()
            .checked_sub(RECORD_HEADER_SIZE as u32)
            .ok_or_else(|| eyre::eyre!("payload span has no room for a record header"))?;
        ensure!(
            device.is_same_sector(payload.offset(), header_addr),
            "record header and payload straddle a sector boundary"
        );

        // clearing the unfinished bit is the whole commit
        device.program(header_addr, &(!UNFINISHED).to_le_bytes())?;
        Ok(())
    }
}
