//! # Bounds-Clamped Device Views
//!
//! `DeviceSpan` narrows a `ByteDevice` to a `(addr, len)` window and
//! forwards every operation with the effective length clamped to
//! `max(0, min(len - offset, requested))`. Callers observe short (possibly
//! zero-length) completions instead of errors when they run off the end of
//! the window, which lets the journal layers hand out sector and
//! rest-of-sector views without re-checking bounds at every call site.
//!
//! A span holds a plain shared reference to the device; it is `Copy`-cheap
//! to construct and carries no state that needs dropping.

use eyre::Result;
use std::io;

use super::ByteDevice;

/// A `(device, addr, len)` window over a `ByteDevice`.
///
/// Constructed through `ByteDevice::span`, `sector_span`, or
/// `rest_of_sector_span`, all of which assert the window lies within the
/// device.
#[derive(Clone, Copy)]
pub struct DeviceSpan<'a, D> {
    device: &'a D,
    addr: u32,
    len: usize,
}

impl<'a, D: ByteDevice> DeviceSpan<'a, D> {
    pub(crate) fn new(device: &'a D, addr: u32, len: usize) -> Self {
        Self { device, addr, len }
    }

    /// Absolute offset of this span within the device.
    pub fn offset(&self) -> u32 {
        self.addr
    }

    /// Length of this span in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True iff the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The device this span is a view of.
    pub fn device(&self) -> &'a D {
        self.device
    }

    /// Effective byte count for an operation of `requested` bytes at
    /// `offset` within this span.
    fn limit(&self, offset: usize, requested: usize) -> usize {
        if offset >= self.len {
            0
        } else {
            (self.len - offset).min(requested)
        }
    }

    /// Reads into `buf` starting at `offset` within the span.
    ///
    /// Returns the number of bytes read, clamped to the span.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let n = self.limit(offset, buf.len());
        if n > 0 {
            self.device.read(self.addr + offset as u32, &mut buf[..n])?;
        }
        Ok(n)
    }

    /// Programs `data` starting at `offset` within the span.
    ///
    /// Returns the number of bytes programmed, clamped to the span.
    pub fn program(&self, offset: usize, data: &[u8]) -> Result<usize> {
        let n = self.limit(offset, data.len());
        if n > 0 {
            self.device.program(self.addr + offset as u32, &data[..n])?;
        }
        Ok(n)
    }

    /// Programs `len` copies of `value` starting at `offset` within the
    /// span.
    pub fn fill(&self, offset: usize, value: u8, len: usize) -> Result<usize> {
        let n = self.limit(offset, len);
        if n > 0 {
            self.device.fill(self.addr + offset as u32, value, n)?;
        }
        Ok(n)
    }

    /// Streams span bytes into `writer`; length clamped to the span.
    pub fn read_to_writer(
        &self,
        writer: &mut dyn io::Write,
        offset: usize,
        len: usize,
    ) -> Result<usize> {
        let n = self.limit(offset, len);
        if n == 0 {
            return Ok(0);
        }
        self.device.read_to_writer(writer, self.addr + offset as u32, n)
    }

    /// Streams bytes from `reader` into the span; length clamped to the
    /// span.
    pub fn program_from_reader(
        &self,
        reader: &mut dyn io::Read,
        offset: usize,
        len: usize,
    ) -> Result<usize> {
        let n = self.limit(offset, len);
        if n == 0 {
            return Ok(0);
        }
        self.device.program_from_reader(reader, self.addr + offset as u32, n)
    }
}
