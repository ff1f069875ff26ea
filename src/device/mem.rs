//! # In-Memory Byte Storage
//!
//! `MemDevice` is the reference implementation of the `ByteDevice` contract,
//! backed by a plain byte vector. It exists for tests, but it is also the
//! executable statement of what a real flash driver must provide:
//!
//! - Fresh storage reads as all-ones, exactly like erased NOR flash.
//! - Programs apply AND semantics byte by byte and are split internally at
//!   256-byte program-page boundaries, the granularity real parts program
//!   at.
//! - Erase works strictly through `erase_first`, one sector at a time, with
//!   the range arithmetic a driver performs against its erase-block table.
//!
//! The device keeps per-operation counters (reads, programs, erases) so
//! tests can assert behavioral properties, most importantly that callers
//! blank-check before erasing and therefore never burn an erase cycle on an
//! already-clean sector.
//!
//! Erase failure can be injected with `set_fail_erase` to exercise the
//! worn-media paths of callers (a device whose sectors can no longer be
//! erased).
//!
//! All mutation is serialized behind a `parking_lot::Mutex`, which is what
//! lets every trait method take `&self`: the device models a single shared
//! bus, and two callers' operations interleave at operation granularity,
//! never mid-byte.

use eyre::{ensure, Result};
use parking_lot::Mutex;

use super::ByteDevice;

/// Program-page granularity of the double; programs are chunked at this
/// boundary the way real NOR parts chunk page programs.
pub const MEM_PROGRAM_PAGE: usize = 256;

/// Operation counts observed by a `MemDevice` since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemCounters {
    /// Read operations, one per program-page chunk touched.
    pub reads: u64,
    /// Program operations, one per program-page chunk touched.
    pub programs: u64,
    /// Sector erases performed.
    pub erases: u64,
}

struct MemState {
    data: Vec<u8>,
    counters: MemCounters,
    fail_erase: bool,
}

/// In-memory `ByteDevice` double with NOR-flash program/erase semantics.
pub struct MemDevice {
    state: Mutex<MemState>,
    size: usize,
    sector_size: usize,
}

impl MemDevice {
    /// Creates a device of `size` bytes with the default 1024-byte sectors,
    /// fully erased.
    pub fn new(size: usize) -> Self {
        Self::with_sector_size(size, 1024)
    }

    /// Creates a device of `size` bytes with `sector_size`-byte sectors,
    /// fully erased.
    ///
    /// `sector_size` must be a power of two dividing `size`.
    pub fn with_sector_size(size: usize, sector_size: usize) -> Self {
        assert!(
            sector_size.is_power_of_two(),
            "sector size {} is not a power of two",
            sector_size
        );
        assert!(
            size > 0 && size % sector_size == 0,
            "size {} is not a multiple of sector size {}",
            size,
            sector_size
        );
        Self {
            state: Mutex::new(MemState {
                data: vec![0xFF; size],
                counters: MemCounters::default(),
                fail_erase: false,
            }),
            size,
            sector_size,
        }
    }

    /// Snapshot of the operation counters.
    pub fn counters(&self) -> MemCounters {
        self.state.lock().counters
    }

    /// When set, every erase attempt fails (simulates worn-out media).
    pub fn set_fail_erase(&self, fail: bool) {
        self.state.lock().fail_erase = fail;
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<()> {
        ensure!(
            addr as usize <= self.size && addr as usize + len <= self.size,
            "range {:#x}+{} out of device bounds ({})",
            addr,
            len,
            self.size
        );
        Ok(())
    }

    fn page_remaining(addr: usize) -> usize {
        MEM_PROGRAM_PAGE - (addr & (MEM_PROGRAM_PAGE - 1))
    }
}

impl ByteDevice for MemDevice {
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.check_range(addr, buf.len())?;
        let mut state = self.state.lock();
        let start = addr as usize;
        buf.copy_from_slice(&state.data[start..start + buf.len()]);
        state.counters.reads += buf.len().div_ceil(MEM_PROGRAM_PAGE).max(1) as u64;
        Ok(())
    }

    fn program(&self, addr: u32, data: &[u8]) -> Result<()> {
        self.check_range(addr, data.len())?;
        let mut state = self.state.lock();
        let mut done = 0;
        while done < data.len() {
            let chunk = Self::page_remaining(addr as usize + done).min(data.len() - done);
            let base = addr as usize + done;
            for i in 0..chunk {
                state.data[base + i] &= data[done + i];
            }
            state.counters.programs += 1;
            done += chunk;
        }
        Ok(())
    }

    fn fill(&self, addr: u32, value: u8, len: usize) -> Result<()> {
        self.check_range(addr, len)?;
        let mut state = self.state.lock();
        let mut done = 0;
        while done < len {
            let chunk = Self::page_remaining(addr as usize + done).min(len - done);
            let base = addr as usize + done;
            for i in 0..chunk {
                state.data[base + i] &= value;
            }
            state.counters.programs += 1;
            done += chunk;
        }
        Ok(())
    }

    fn is_all(&self, addr: u32, value: u8, len: usize) -> Result<bool> {
        self.check_range(addr, len)?;
        let mut state = self.state.lock();
        state.counters.reads += len.div_ceil(MEM_PROGRAM_PAGE).max(1) as u64;
        let start = addr as usize;
        Ok(state.data[start..start + len].iter().all(|&b| b == value))
    }

    fn erase(&self, addr: u32, len: u32) -> Result<bool> {
        self.check_range(addr, len as usize)?;
        let mask = self.sector_mask();
        let mut start = addr & !mask;
        let end = (addr + len + mask) & !mask;
        while start < end {
            let next = self.erase_first(start, end - start)?;
            if next == start {
                return Ok(false);
            }
            start = next;
        }
        Ok(true)
    }

    fn erase_first(&self, addr: u32, len: u32) -> Result<u32> {
        self.check_range(addr, len as usize)?;
        let mask = self.sector_mask();
        let start = (addr & !mask) as usize;
        let end = ((addr + len + mask) & !mask) as usize;

        let mut state = self.state.lock();
        if state.fail_erase {
            return Ok(addr);
        }
        if start + self.sector_size <= end {
            state.data[start..start + self.sector_size].fill(0xFF);
            state.counters.erases += 1;
            return Ok((start + self.sector_size) as u32);
        }
        Ok(addr)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_device_reads_all_ones() {
        let dev = MemDevice::new(4096);
        assert!(dev.is_empty(0, 4096).unwrap());
    }

    #[test]
    fn program_ands_into_existing_bits() {
        let dev = MemDevice::new(4096);

        dev.program(10, &[0xF0]).unwrap();
        dev.program(10, &[0x0F]).unwrap();

        let mut buf = [0u8; 1];
        dev.read(10, &mut buf).unwrap();
        assert_eq!(buf[0], 0x00, "1->0 transitions accumulate; 0->1 never happens");
    }

    #[test]
    fn program_cannot_set_bits_back_to_one() {
        let dev = MemDevice::new(4096);

        dev.program(0, &[0x00]).unwrap();
        dev.program(0, &[0xFF]).unwrap();

        let mut buf = [0u8; 1];
        dev.read(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0x00);
    }

    #[test]
    fn erase_restores_all_ones_per_sector() {
        let dev = MemDevice::new(4096);

        dev.fill(0, 0x00, 4096).unwrap();
        assert!(dev.erase(1024, 1024).unwrap());

        assert!(dev.is_all(0, 0x00, 1024).unwrap());
        assert!(dev.is_empty(1024, 1024).unwrap());
        assert!(dev.is_all(2048, 0x00, 2048).unwrap());
    }

    #[test]
    fn erase_rounds_partial_ranges_out_to_sector_boundaries() {
        let dev = MemDevice::new(4096);

        dev.fill(0, 0x00, 4096).unwrap();
        assert!(dev.erase(1500, 10).unwrap());

        assert!(dev.is_empty(1024, 1024).unwrap());
        assert!(dev.is_all(2048, 0x00, 1024).unwrap());
    }

    #[test]
    fn erase_first_reports_next_sector() {
        let dev = MemDevice::new(4096);

        let next = dev.erase_first(0, 4096).unwrap();
        assert_eq!(next, 1024);

        let next = dev.erase_first(next, 4096 - next).unwrap();
        assert_eq!(next, 2048);
    }

    #[test]
    fn erase_first_signals_failure_by_returning_addr() {
        let dev = MemDevice::new(4096);
        dev.set_fail_erase(true);

        assert_eq!(dev.erase_first(0, 4096).unwrap(), 0);
        assert!(!dev.erase(0, 4096).unwrap());
    }

    #[test]
    fn counters_track_erases() {
        let dev = MemDevice::new(4096);

        assert_eq!(dev.counters().erases, 0);
        dev.erase(0, 4096).unwrap();
        assert_eq!(dev.counters().erases, 4);
    }

    #[test]
    fn out_of_range_read_is_an_error() {
        let dev = MemDevice::new(4096);
        let mut buf = [0u8; 16];
        assert!(dev.read(4090, &mut buf).is_err());
    }

    #[test]
    fn streaming_roundtrip_through_std_io() {
        let dev = MemDevice::new(4096);

        let mut input: &[u8] = b"journal payload";
        let n = dev.program_from_reader(&mut input, 64, 15).unwrap();
        assert_eq!(n, 15);

        let mut out = Vec::new();
        let n = dev.read_to_writer(&mut out, 64, 15).unwrap();
        assert_eq!(n, 15);
        assert_eq!(out, b"journal payload");
    }
}
