//! # Block Metadata Records
//!
//! A [`Record`] describes one block of the heap file: where the block starts,
//! how many bytes it occupies, and the bucket key of the id stored in it.
//! Records are the allocator's whole world; a record does not know whether
//! the blob it describes holds data, membership in the index's free map is
//! the truth.
//!
//! ## On-Disk Form
//!
//! Exactly 16 bytes, big-endian, no padding:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -------------------------------------
//! 0       8     offset: file position of the block
//! 8       4     key: hash of the (encrypted) object id
//! 12      4     size: block capacity in bytes
//! ```
//!
//! Only allocated records are serialized; free records are reconstructed
//! from the gaps between allocated ones on load.

use eyre::{ensure, Result};
use zerocopy::big_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct DiskRecord {
    offset: U64,
    key: U32,
    size: U32,
}

const _: () = assert!(std::mem::size_of::<DiskRecord>() == Record::SERIALIZED_SIZE);

/// Metadata for one block of the heap file.
///
/// The `size` is the block's capacity, which may exceed the bytes actually
/// used by its blob when the block was handed over whole from a larger free
/// block or padded up to [`Record::MIN_SIZE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Record {
    offset: u64,
    key: u32,
    size: u32,
}

impl Record {
    /// Serialized size in bytes.
    pub const SERIALIZED_SIZE: usize = 16;

    /// Minimum capacity of any newly created block.
    ///
    /// Small enough that the metadata-to-payload ratio stays low for the
    /// small-to-medium objects this store targets, large enough that a
    /// post-split remainder is always worth keeping.
    pub const MIN_SIZE: u32 = 256;

    pub fn new(offset: u64, key: u32, size: u32) -> Self {
        Self { offset, key, size }
    }

    /// Like [`Record::new`] but rounds `size` up to [`Record::MIN_SIZE`].
    ///
    /// Used on the append path; deserialized records keep their exact
    /// historical capacity and may be smaller.
    pub fn with_min_capacity(offset: u64, key: u32, size: u32) -> Self {
        Self::new(offset, key, size.max(Self::MIN_SIZE))
    }

    /// Constructs the free record covering the gap between two blocks.
    ///
    /// Fails when the blocks touch or overlap, which on the load path means
    /// the serialized metadata is inconsistent.
    pub fn gap_between(left: &Record, right: &Record) -> Result<Self> {
        ensure!(
            left.end() < right.offset,
            "no gap between record ending at {} and record starting at {}",
            left.end(),
            right.offset
        );

        let gap = right.offset - left.end();
        ensure!(
            gap <= u64::from(u32::MAX),
            "gap of {} bytes at offset {} exceeds the record size field",
            gap,
            left.end()
        );

        Ok(Self::new(left.end(), 0, gap as u32))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= Self::SERIALIZED_SIZE,
            "buffer too small for Record: {} < {}",
            bytes.len(),
            Self::SERIALIZED_SIZE
        );

        let disk = DiskRecord::ref_from_bytes(&bytes[..Self::SERIALIZED_SIZE])
            .map_err(|e| eyre::eyre!("failed to read Record: {:?}", e))?;

        Ok(Self {
            offset: disk.offset.get(),
            key: disk.key.get(),
            size: disk.size.get(),
        })
    }

    pub fn write_to(&self, bytes: &mut [u8]) -> Result<()> {
        ensure!(
            bytes.len() >= Self::SERIALIZED_SIZE,
            "buffer too small for Record: {} < {}",
            bytes.len(),
            Self::SERIALIZED_SIZE
        );

        let disk = DiskRecord {
            offset: U64::new(self.offset),
            key: U32::new(self.key),
            size: U32::new(self.size),
        };
        bytes[..Self::SERIALIZED_SIZE].copy_from_slice(disk.as_bytes());
        Ok(())
    }

    /// File position of the block's first byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bucket key: hash of the (encrypted) object id stored in the block.
    pub fn key(&self) -> u32 {
        self.key
    }

    /// Block capacity in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// File position one past the block's last byte.
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }

    pub fn set_key(&mut self, key: u32) {
        self.key = key;
    }

    /// Does `rhs` start exactly where this block ends?
    pub fn shares_right_boundary_with(&self, rhs: &Record) -> bool {
        self.end() == rhs.offset
    }

    /// Absorbs an adjacent record during coalescing. The absorbed record is
    /// expected to be discarded by the caller.
    pub fn absorb(&mut self, other: &Record) {
        debug_assert!(
            self.shares_right_boundary_with(other) || other.shares_right_boundary_with(self)
        );

        self.offset = self.offset.min(other.offset);
        self.size += other.size;
    }

    /// Carves `size` bytes off the left edge into a new record and shrinks
    /// this one accordingly. The new record's key is zero until allocation
    /// assigns one.
    pub fn split_off_left(&mut self, size: u32) -> Record {
        debug_assert!(self.size > size);

        let left = Record::new(self.offset, 0, size);
        self.offset += u64::from(size);
        self.size -= size;
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_default_is_zeroed() {
        let rec = Record::default();

        assert_eq!(rec.offset(), 0);
        assert_eq!(rec.key(), 0);
        assert_eq!(rec.size(), 0);
    }

    #[test]
    fn record_new_keeps_exact_size() {
        let rec = Record::new(1 << 40, 0xdeadbeef, 100 * (2 << 10));

        assert_eq!(rec.offset(), 1 << 40);
        assert_eq!(rec.key(), 0xdeadbeef);
        assert_eq!(rec.size(), 100 * (2 << 10));
    }

    #[test]
    fn record_with_min_capacity_rounds_up() {
        let rec = Record::with_min_capacity(8, 7, 10);

        assert_eq!(rec.size(), Record::MIN_SIZE);
    }

    #[test]
    fn record_with_min_capacity_keeps_larger_sizes() {
        let rec = Record::with_min_capacity(8, 7, 1000);

        assert_eq!(rec.size(), 1000);
    }

    #[test]
    fn record_end_is_offset_plus_size() {
        let rec = Record::new(10, 0, 50);

        assert_eq!(rec.end(), 60);
    }

    #[test]
    fn record_serialization_round_trips() {
        let rec = Record::new(1 << 40, 0xdeadbeef, 100 * (2 << 10));
        let mut buf = [0u8; Record::SERIALIZED_SIZE];

        rec.write_to(&mut buf).unwrap();
        let back = Record::from_bytes(&buf).unwrap();

        assert_eq!(rec, back);
    }

    #[test]
    fn record_serializes_big_endian() {
        let rec = Record::new(0x0102030405060708, 0x0A0B0C0D, 0x11121314);
        let mut buf = [0u8; Record::SERIALIZED_SIZE];

        rec.write_to(&mut buf).unwrap();

        assert_eq!(
            buf,
            [
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0A, 0x0B, 0x0C, 0x0D, 0x11,
                0x12, 0x13, 0x14
            ]
        );
    }

    #[test]
    fn record_from_bytes_rejects_short_buffer() {
        let buf = [0u8; Record::SERIALIZED_SIZE - 1];

        assert!(Record::from_bytes(&buf).is_err());
    }

    #[test]
    fn records_share_boundary_when_adjacent() {
        let left = Record::new(10, 0xdeadbeef, 50);
        let right = Record::new(60, 0, 50);

        assert!(left.shares_right_boundary_with(&right));
        assert!(!right.shares_right_boundary_with(&left));
    }

    #[test]
    fn absorb_merges_adjacent_records() {
        let mut left = Record::new(10, 0xdeadbeef, 50);
        let right = Record::new(60, 0xfeedface, 50);

        left.absorb(&right);

        assert_eq!(left.offset(), 10);
        assert_eq!(left.key(), 0xdeadbeef);
        assert_eq!(left.size(), 100);
    }

    #[test]
    fn split_off_left_carves_prefix() {
        let mut rec = Record::new(10, 0xdeadbeef, 100);

        let left = rec.split_off_left(50);

        assert_eq!(left.offset(), 10);
        assert_eq!(left.size(), 50);
        assert_eq!(left.key(), 0);
        assert_eq!(rec.offset(), 60);
        assert_eq!(rec.size(), 50);
        assert!(left.shares_right_boundary_with(&rec));
    }

    #[test]
    fn gap_between_builds_free_filler() {
        let left = Record::new(8, 1, 100);
        let right = Record::new(300, 2, 50);

        let gap = Record::gap_between(&left, &right).unwrap();

        assert_eq!(gap.offset(), 108);
        assert_eq!(gap.size(), 192);
        assert_eq!(gap.key(), 0);
        assert!(left.shares_right_boundary_with(&gap));
        assert!(gap.shares_right_boundary_with(&right));
    }

    #[test]
    fn gap_between_rejects_touching_records() {
        let left = Record::new(8, 1, 100);
        let right = Record::new(108, 2, 50);

        assert!(Record::gap_between(&left, &right).is_err());
    }

    #[test]
    fn gap_between_rejects_overlapping_records() {
        let left = Record::new(8, 1, 200);
        let right = Record::new(100, 2, 50);

        assert!(Record::gap_between(&left, &right).is_err());
    }
}
