//! # Journal End-to-End Scenarios
//!
//! These tests drive the full stack (engine + simple variable format +
//! in-memory device) through realistic append/enumerate workloads:
//!
//! 1. Fixed-size writes filling several sectors
//! 2. Variable-length writes
//! 3. Torn writes (allocation without commit) interleaved with good ones
//! 4. Oversize writes that each consume a whole sector and wrap the ring
//!
//! plus the boundary behaviors around sector capacity: zero-length
//! records, records exactly filling the free space, and the one-byte-more
//! case that forces rotation.
//!
//! All tests use an 8192-byte device with 1024-byte sectors, which keeps
//! whole-ring workloads small while still exercising multi-sector layouts
//! and wrap-around.

use norlog::{
    Journal, MemDevice, RecordEnumerator, SectorEnumerator, SimpleVariableFormat,
};

const MAGIC: u32 = u32::from_le_bytes(*b"TEST");
const DEVICE_SIZE: usize = 8192;
const SECTOR_SIZE: usize = 1024;

fn collect_records(journal: &Journal<MemDevice, SimpleVariableFormat>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut se = SectorEnumerator::new();
    journal.enumerate_sectors(&mut se);
    while journal.next_sector(&mut se).unwrap() {
        let mut re = RecordEnumerator::new();
        journal.enumerate_records(&mut re, se.sector().unwrap());
        while let Some(len) = journal.next_record(&mut re).unwrap() {
            let mut buf = vec![0u8; len];
            let n = journal.read_record(&re, &mut buf, 0).unwrap();
            assert_eq!(n, len, "payload read SHOULD return the full record");
            out.push(buf);
        }
    }
    out
}

fn record_value(record: &[u8]) -> u32 {
    u32::from_le_bytes(record[..4].try_into().unwrap())
}

mod fixed_writes_tests {
    use super::*;

    #[test]
    fn five_hundred_counter_records_enumerate_in_order() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        for i in 0u32..500 {
            assert!(journal.write(&i.to_le_bytes()).unwrap());
        }

        let records = collect_records(&journal);

        assert_eq!(records.len(), 500);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.len(), 4);
            assert_eq!(record_value(record), i as u32);
        }
    }
}

mod variable_writes_tests {
    use super::*;

    #[test]
    fn growing_records_enumerate_in_order() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        for i in 0u32..119 {
            let writer = journal.begin_write(4 + i as usize).unwrap().unwrap();
            writer.write(0, &i.to_le_bytes()).unwrap();
            journal.end_write(&writer).unwrap();
        }

        let records = collect_records(&journal);

        assert_eq!(records.len(), 119);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.len(), 4 + i, "record {} SHOULD keep its allocated length", i);
            assert_eq!(record_value(record), i as u32);
        }
    }
}

mod torn_writes_tests {
    use super::*;

    #[test]
    fn uncommitted_records_are_skipped_on_enumeration() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        for i in 0u32..119 {
            let writer = journal.begin_write(4 + i as usize).unwrap().unwrap();
            writer.write(0, &i.to_le_bytes()).unwrap();
            if i % 2 == 1 {
                // complete every other write
                journal.end_write(&writer).unwrap();
            }
        }

        let records = collect_records(&journal);

        assert_eq!(records.len(), 59, "only the odd-indexed records were committed");
        let mut expected = 1u32;
        for record in &records {
            assert_eq!(record_value(record), expected);
            expected += 2;
        }
        assert_eq!(expected, 119);
    }

    #[test]
    fn torn_records_survive_a_rescan() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        for i in 0u32..20 {
            let writer = journal.begin_write(8).unwrap().unwrap();
            writer.write(0, &i.to_le_bytes()).unwrap();
            if i % 2 == 1 {
                journal.end_write(&writer).unwrap();
            }
        }

        // a restart must neither resurrect the torn records nor lose the
        // committed ones behind them
        let mut journal = Journal::new(&dev, &fmt);
        journal.scan().unwrap();
        journal.write(&100u32.to_le_bytes()).unwrap();

        let records = collect_records(&journal);
        let values: Vec<u32> = records.iter().map(|r| record_value(r)).collect();
        assert_eq!(values, vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19, 100]);
    }
}

mod oversize_writes_tests {
    use super::*;

    #[test]
    fn sector_sized_requests_clamp_and_rotate_the_ring() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();

        let num_sectors = (DEVICE_SIZE / SECTOR_SIZE) as u32;
        for i in 0..num_sectors * 2 {
            let writer = journal.begin_write(SECTOR_SIZE).unwrap().unwrap();
            assert!(
                writer.size() < SECTOR_SIZE,
                "sector and record headers steal payload bytes"
            );
            writer.write(0, &i.to_le_bytes()).unwrap();
            journal.end_write(&writer).unwrap();
        }

        let records = collect_records(&journal);

        assert_eq!(
            records.len(),
            num_sectors as usize,
            "the ring keeps one whole-sector record per sector"
        );
        for (n, record) in records.iter().enumerate() {
            assert_eq!(
                record_value(record),
                num_sectors + n as u32,
                "older records were reclaimed by ring rotation"
            );
        }
    }
}

mod capacity_boundary_tests {
    use super::*;

    #[test]
    fn zero_length_record_roundtrips() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        assert!(journal.write(b"").unwrap());
        assert!(journal.write(b"after").unwrap());

        let records = collect_records(&journal);
        assert_eq!(records.len(), 2);
        assert!(records[0].is_empty());
        assert_eq!(records[1], b"after");
    }

    #[test]
    fn zero_length_record_does_not_confuse_recovery() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        journal.write(b"").unwrap();

        let mut journal = Journal::new(&dev, &fmt);
        journal.scan().unwrap();
        journal.write(b"next").unwrap();

        let records = collect_records(&journal);
        assert_eq!(records.len(), 2);
        assert!(records[0].is_empty());
        assert_eq!(records[1], b"next");
    }

    #[test]
    fn record_exactly_filling_the_sector_does_not_rotate() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        journal.write(&[0xAB; 100]).unwrap();
        let sequence = journal.last_sector_info().sequence;

        let remaining = journal.maximum_record();
        assert!(journal.write(&vec![0xCD; remaining]).unwrap());

        assert_eq!(
            journal.last_sector_info().sequence,
            sequence,
            "an exact fit stays in the same sector"
        );

        let records = collect_records(&journal);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].len(), remaining);
    }

    #[test]
    fn one_byte_over_the_free_space_rotates() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        journal.write(&[0xAB; 100]).unwrap();
        let sequence = journal.last_sector_info().sequence;

        let remaining = journal.maximum_record();
        assert!(journal.write(&vec![0xCD; remaining + 1]).unwrap());

        assert_eq!(
            journal.last_sector_info().sequence,
            sequence + 1,
            "an oversize mid-sector request moves to a fresh sector"
        );

        let records = collect_records(&journal);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1].len(),
            remaining + 1,
            "the fresh sector holds the full request"
        );
    }

    #[test]
    fn close_sector_forces_the_next_record_into_a_new_sector() {
        let dev = MemDevice::with_sector_size(DEVICE_SIZE, SECTOR_SIZE);
        let fmt = SimpleVariableFormat::new(MAGIC);
        let mut journal = Journal::new(&dev, &fmt);

        journal.scan().unwrap();
        journal.write(b"sealed").unwrap();
        let first_sector = journal.last_sector_address();

        journal.close_sector().unwrap();
        let writer = journal.begin_write(4).unwrap().unwrap();

        assert_ne!(
            journal.last_sector_address(),
            first_sector,
            "a sealed sector takes no further records"
        );
        writer.write(0, &0u32.to_le_bytes()).unwrap();
        journal.end_write(&writer).unwrap();

        let records = collect_records(&journal);
        assert_eq!(records.len(), 2);
    }
}
