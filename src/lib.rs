//! # norlog - Ring Journal for Erase-Only Storage
//!
//! norlog is a log-structured journal for NOR-flash-class byte storage: a
//! ring of fixed-size sectors into which variable-length records are
//! appended, wrapping around by reclaiming the oldest sector when the ring
//! is full. It is built for media that is byte-addressable for reads and
//! programs but erasable only in whole sectors, where a program can move
//! bits from 1 to 0 only.
//!
//! ## Quick Start
//!
//! ```ignore
//! use norlog::{Journal, MemDevice, SimpleVariableFormat};
//!
//! let device = MemDevice::new(8192);
//! let format = SimpleVariableFormat::new(u32::from_le_bytes(*b"LOG\0"));
//! let mut journal = Journal::new(&device, &format);
//!
//! journal.scan()?;                 // recover state from the media
//! journal.write(b"first entry")?;  // allocate + program + commit
//!
//! let mut sectors = norlog::SectorEnumerator::new();
//! journal.enumerate_sectors(&mut sectors);
//! while journal.next_sector(&mut sectors)? {
//!     let mut records = norlog::RecordEnumerator::new();
//!     journal.enumerate_records(&mut records, sectors.sector().unwrap());
//!     while let Some(len) = journal.next_record(&mut records)? {
//!         let mut buf = vec![0u8; len];
//!         journal.read_record(&records, &mut buf, 0)?;
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------+
//! |        Journal (ring engine)         |   scan / append / enumerate
//! +--------------------------------------+
//! |     JournalFormat (media codec)      |   sector + record framing
//! +--------------------------------------+
//! |   ByteDevice / DeviceSpan (storage)  |   read / program / erase
//! +--------------------------------------+
//! ```
//!
//! The engine owns the ring discipline and never touches media bytes
//! itself; the codec owns the on-media layout and never decides what to
//! write; the device owns the program/erase physics. Each seam is a trait,
//! so the same engine runs over the in-memory `MemDevice` double in tests
//! and over a real flash driver in production, and the same ring works
//! with any record framing.
//!
//! ## Durability Model
//!
//! Records are written in two phases: an allocation that programs a
//! header explicitly marked unfinished, and a commit that clears the mark
//! with a single program. Combined with the codec's header write ordering,
//! every power-loss point leaves media that the next `Journal::scan`
//! classifies unambiguously: torn records are skipped, torn sector
//! headers are treated as bad sectors and rotated around, and committed
//! records are never lost until the ring reclaims their sector.
//!
//! ## Module Overview
//!
//! - [`device`]: the `ByteDevice` contract, bounds-clamped spans, and the
//!   in-memory reference device
//! - [`format`]: the `JournalFormat` codec seam and the simple
//!   variable-length record format
//! - [`journal`]: the ring engine and its enumerators
//! - [`stats`]: process-wide diagnostic counters

pub mod device;
pub mod format;
pub mod journal;
pub mod stats;

pub use device::{ByteDevice, DeviceSpan, MemDevice};
pub use format::{
    JournalFormat, RecordInfo, RecordState, SectorInfo, SectorState, SimpleVariableFormat,
};
pub use journal::{Journal, RecordEnumerator, RecordWriter, Sector, SectorEnumerator};
