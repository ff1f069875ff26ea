//! # Byte-Storage Device Abstraction
//!
//! This module defines `ByteDevice`, the contract between the journal layers
//! and the physical storage underneath them. The device class it models is
//! NOR flash: byte-addressable for reads and programs, but erasable only in
//! fixed-size sectors, with the asymmetric program rule that bits can only be
//! driven from 1 to 0. Setting a 0 back to 1 requires erasing the whole
//! sector containing it.
//!
//! ## Program Semantics
//!
//! A program at address `a` with source bytes `b` performs, per byte:
//!
//! ```text
//! device[a + i] <- device[a + i] AND b[i]
//! ```
//!
//! The erased state is all-ones (0xFF). Callers that need a byte to read
//! back exactly as written must ensure the target still holds 0xFF (or at
//! least has 1s wherever the new value has 1s). The device does not detect
//! violations; it just ANDs.
//!
//! ## Erase Protocol
//!
//! `erase` restores every sector intersecting a range to all-ones, driven by
//! `erase_first` which erases exactly one sector and returns the start of
//! the next unaffected one. A returned address equal to the requested start
//! means nothing was erased, which `erase` reports as failure. Erase is slow
//! relative to reads, so callers are expected to blank-check first
//! (`is_empty`) and skip the erase when the sector is already clean.
//!
//! ## Concurrency
//!
//! All operations take `&self`; implementations serialize internal mutation
//! themselves (the device owns its single bus). `MemDevice` wraps its state
//! in a `parking_lot::Mutex`; a real flash driver serializes through its bus
//! acquisition discipline. `sync()` returns once every previously issued
//! program and erase has completed, and acts as the fence before reads that
//! could otherwise race an in-flight program.
//!
//! ## Geometry
//!
//! Implementations report a total `size()` and a power-of-two
//! `sector_size()` dividing it. Everything else (sector masks, sector
//! base addresses, remaining-bytes-in-sector) is derived here so that
//! implementations cannot disagree on the arithmetic.
//!
//! ## Module Organization
//!
//! - `span`: `DeviceSpan`, a bounds-clamped `(device, addr, len)` view
//! - `mem`: `MemDevice`, the in-memory reference implementation used by the
//!   journal tests; doubles as the executable statement of this contract

mod mem;
mod span;

pub use mem::{MemCounters, MemDevice, MEM_PROGRAM_PAGE};
pub use span::DeviceSpan;

use eyre::{Result, WrapErr};
use std::io;

/// Erase-only byte storage: byte-addressable read and AND-semantics program,
/// with erase available only at sector granularity.
///
/// Implementations must report a power-of-two `sector_size()` that divides
/// `size()`, and must serialize internal mutation so that every method can
/// take `&self`.
pub trait ByteDevice {
    /// Reads exactly `buf.len()` bytes starting at `addr`.
    ///
    /// A range extending past the end of the device is a caller bug and
    /// fails with an error.
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Programs `data` starting at `addr` with AND-into-existing semantics.
    ///
    /// Bits that are 1 on the device and 0 in `data` become 0; bits that are
    /// already 0 stay 0 regardless of `data`.
    fn program(&self, addr: u32, data: &[u8]) -> Result<()>;

    /// Programs `len` copies of `value` starting at `addr`.
    fn fill(&self, addr: u32, value: u8, len: usize) -> Result<()>;

    /// Returns true iff every byte in `[addr, addr + len)` equals `value`.
    fn is_all(&self, addr: u32, value: u8, len: usize) -> Result<bool>;

    /// Returns true iff the range is in the erased (all-ones) state.
    fn is_empty(&self, addr: u32, len: usize) -> Result<bool> {
        self.is_all(addr, 0xFF, len)
    }

    /// Erases every sector intersecting `[addr, addr + len)`.
    ///
    /// Returns false only if no sector could be erased at all.
    fn erase(&self, addr: u32, len: u32) -> Result<bool>;

    /// Erases exactly one sector within `[addr, addr + len)`.
    ///
    /// Returns the start address of the next sector not affected by this
    /// erase. A return value equal to `addr` signals that nothing was
    /// erased.
    fn erase_first(&self, addr: u32, len: u32) -> Result<u32>;

    /// Erases the entire device.
    fn erase_all(&self) -> Result<bool> {
        self.erase(0, self.size() as u32)
    }

    /// Returns once all previously issued programs and erases have
    /// completed.
    fn sync(&self) -> Result<()>;

    /// Total device size in bytes.
    fn size(&self) -> usize;

    /// Sector (erase unit) size in bytes. Always a power of two dividing
    /// `size()`.
    fn sector_size(&self) -> usize;

    /// Low bits covered by a sector: `sector_size() - 1`.
    fn sector_mask(&self) -> u32 {
        self.sector_size() as u32 - 1
    }

    /// Number of sectors on the device.
    fn sector_count(&self) -> usize {
        self.size() / self.sector_size()
    }

    /// Base address of the sector containing `addr`.
    fn sector_address(&self, addr: u32) -> u32 {
        addr & !self.sector_mask()
    }

    /// True iff `a` and `b` fall within the same sector.
    fn is_same_sector(&self, a: u32, b: u32) -> bool {
        (a ^ b) & !self.sector_mask() == 0
    }

    /// Bytes remaining from `addr` to the end of its sector, inclusive of
    /// the byte at `addr`.
    fn sector_remaining(&self, addr: u32) -> usize {
        ((!addr & self.sector_mask()) + 1) as usize
    }

    /// A bounds-clamped view of `[addr, addr + len)`.
    ///
    /// The range must lie within the device.
    fn span(&self, addr: u32, len: usize) -> DeviceSpan<'_, Self>
    where
        Self: Sized,
    {
        assert!(
            addr as usize <= self.size() && addr as usize + len <= self.size(),
            "span {:#x}+{} out of device bounds ({})",
            addr,
            len,
            self.size()
        );
        DeviceSpan::new(self, addr, len)
    }

    /// The span covering the whole sector containing `addr`.
    fn sector_span(&self, addr: u32) -> DeviceSpan<'_, Self>
    where
        Self: Sized,
    {
        assert!((addr as usize) < self.size(), "address {:#x} out of device bounds", addr);
        DeviceSpan::new(self, self.sector_address(addr), self.sector_size())
    }

    /// The span from `addr` to the end of its sector.
    fn rest_of_sector_span(&self, addr: u32) -> DeviceSpan<'_, Self>
    where
        Self: Sized,
    {
        assert!((addr as usize) < self.size(), "address {:#x} out of device bounds", addr);
        DeviceSpan::new(self, addr, self.sector_remaining(addr))
    }

    /// Streams `len` bytes starting at `addr` into `writer`.
    ///
    /// Returns the number of bytes delivered, which may be short if the
    /// writer stops accepting data (a short completion, not an error).
    fn read_to_writer(&self, writer: &mut dyn io::Write, addr: u32, len: usize) -> Result<usize> {
        let mut buf = [0u8; 256];
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(buf.len());
            self.read(addr + done as u32, &mut buf[..chunk])?;
            let n = writer
                .write(&buf[..chunk])
                .wrap_err("writer failed while streaming from storage")?;
            done += n;
            if n < chunk {
                break;
            }
        }
        Ok(done)
    }

    /// Streams up to `len` bytes from `reader` and programs them starting at
    /// `addr`.
    ///
    /// Returns the number of bytes programmed; a reader that runs dry early
    /// yields a short count.
    fn program_from_reader(&self, reader: &mut dyn io::Read, addr: u32, len: usize) -> Result<usize> {
        let mut buf = [0u8; 256];
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(buf.len());
            let n = reader
                .read(&mut buf[..chunk])
                .wrap_err("reader failed while streaming to storage")?;
            if n == 0 {
                break;
            }
            self.program(addr + done as u32, &buf[..n])?;
            done += n;
        }
        Ok(done)
    }
}
