//! # Heap Index
//!
//! This module implements the free-list allocator over file offsets. It is a
//! variation on the implicit free list of K&R malloc, with the metadata of
//! every block divorced from the payload: all [`Record`]s live in memory
//! while the heap is open, and only the allocated ones are ever serialized.
//!
//! ## Three Views Over One Population
//!
//! - `list`: every record, ordered by offset, with the invariant that
//!   consecutive records share a boundary (no gaps, no overlap)
//! - `alloc`: multimap from bucket key to allocated records, so reads for a
//!   previously stored object are near constant time barring collisions
//! - `free`: multimap from size to free records; an ordered lower-bound
//!   lookup finds the smallest sufficient block in logarithmic time, which
//!   beats K&R's linear scan
//!
//! Every record is in `list` and in exactly one of `alloc` or `free`. A
//! record does not itself know which set it is in; membership in `free` is
//! the truth.
//!
//! ## Invariants
//!
//! 1. Contiguity: `list[i].end() == list[i+1].offset()`
//! 2. Membership: each record is in `alloc` xor `free`
//! 3. Tail: the last record of a non-empty `list` is always allocated;
//!    deallocating the tail removes it entirely so the file can be trimmed
//! 4. Every new allocation and split remainder is at least
//!    [`Record::MIN_SIZE`] bytes; deserialized records reflect exact
//!    historical capacity and may be smaller
//!
//! ## Complexity
//!
//! The worst case for `is_free` and `deallocate` is all free records having
//! the same size, which degrades the bucket scan to O(n). The expected case
//! is O(log n) for the map walk plus the handful of collisions per bucket.

use std::collections::BTreeMap;

use eyre::Result;
use hashbrown::HashMap;
use smallvec::SmallVec;

use super::Record;

type Bucket = SmallVec<[Record; 1]>;

/// The in-memory allocator over the heap file's payload region.
///
/// The index never talks to the file. It only manages the blocks it is told
/// about: when no free block satisfies an allocation the caller appends a
/// fresh block via [`HeapIndex::add_allocated_block`].
#[derive(Debug, Default)]
pub struct HeapIndex {
    list: Vec<Record>,
    alloc: HashMap<u32, Bucket>,
    free: BTreeMap<u32, Bucket>,
    alloc_count: u32,
    free_count: u32,
}

impl HeapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.alloc.clear();
        self.free.clear();
        self.alloc_count = 0;
        self.free_count = 0;
    }

    /// Appends a block at the tail of the heap.
    ///
    /// If the previous last block does not share a boundary with `rec`, a
    /// free filler record is synthesized to cover the gap, which is how free
    /// blocks are reconstructed when loading serialized metadata. Fails when
    /// the new block starts inside the previous one, meaning the metadata is
    /// inconsistent.
    pub fn add_allocated_block(&mut self, rec: Record) -> Result<()> {
        if let Some(last) = self.list.last().copied() {
            if !last.shares_right_boundary_with(&rec) {
                let gap = Record::gap_between(&last, &rec)?;
                self.list.push(gap);
                self.insert_free(gap);
            }
        }

        self.list.push(rec);
        self.insert_alloc(rec);
        Ok(())
    }

    /// Allocates a block of at least `size` bytes, keyed by `key`.
    ///
    /// The request is rounded up to [`Record::MIN_SIZE`]. The smallest free
    /// block that fits is chosen; if splitting it would leave a remainder
    /// below `MIN_SIZE`, the whole block is handed over instead, so the
    /// returned capacity may exceed the request. That slack is never
    /// reclaimed while the block stays allocated (allocator internal
    /// fragmentation).
    ///
    /// Returns `None` when no free block fits; the index has no way to grow
    /// the heap itself.
    pub fn allocate(&mut self, size: u32, key: u32) -> Option<Record> {
        let need = size.max(Record::MIN_SIZE);

        let mut rec = self.take_smallest_free(need)?;
        let idx = self.position(rec.offset());

        if need > rec.size() - Record::MIN_SIZE {
            rec.set_key(key);
            self.list[idx] = rec;
            self.insert_alloc(rec);
            return Some(rec);
        }

        let mut left = rec.split_off_left(need);
        left.set_key(key);
        self.list[idx] = rec;
        self.list.insert(idx, left);
        self.insert_free(rec);
        self.insert_alloc(left);
        Some(left)
    }

    /// Releases an allocated block, coalescing with free neighbors.
    ///
    /// The record must match an allocated entry on all three fields. If the
    /// released (possibly merged) block ends up last in offset order it is
    /// removed entirely rather than kept free, which keeps the tail
    /// allocated and lets the owner trim the file.
    ///
    /// Returns whether a matching record was found.
    pub fn deallocate(&mut self, rec: &Record) -> bool {
        if !self.remove_alloc(rec) {
            return false;
        }

        let mut idx = self.position(rec.offset());
        let mut merged = self.list[idx];

        if idx > 0 {
            let left = self.list[idx - 1];
            if self.remove_if_free(&left) {
                merged.absorb(&left);
                self.list.remove(idx - 1);
                idx -= 1;
            }
        }

        if idx + 1 < self.list.len() {
            let right = self.list[idx + 1];
            if self.remove_if_free(&right) {
                merged.absorb(&right);
                self.list.remove(idx + 1);
            }
        }

        self.list[idx] = merged;

        if idx == self.list.len() - 1 {
            self.list.pop();
        } else {
            self.insert_free(merged);
        }
        true
    }

    /// Is this exact record currently in the free map?
    pub fn is_free(&self, rec: &Record) -> bool {
        self.free
            .get(&rec.size())
            .is_some_and(|bucket| bucket.iter().any(|r| r == rec))
    }

    /// Is this record the one with the highest offset?
    pub fn is_last(&self, rec: &Record) -> bool {
        self.list.last().is_some_and(|r| r == rec)
    }

    pub fn num_allocated_records(&self) -> u32 {
        self.alloc_count
    }

    pub fn num_free_records(&self) -> u32 {
        self.free_count
    }

    /// Bytes the serialized index occupies on disk. Only allocated records
    /// are stored.
    pub fn size_on_disk(&self) -> u32 {
        4 + Record::SERIALIZED_SIZE as u32 * self.alloc_count
    }

    /// Every record, free and allocated, in offset order.
    pub fn records(&self) -> &[Record] {
        &self.list
    }

    /// Allocated records whose bucket key equals `key`.
    pub fn allocated_with_key(&self, key: u32) -> &[Record] {
        match self.alloc.get(&key) {
            Some(bucket) => bucket,
            None => &[],
        }
    }

    /// Every free record, in no particular order.
    pub fn free_records(&self) -> impl Iterator<Item = &Record> {
        self.free.values().flatten()
    }

    fn position(&self, offset: u64) -> usize {
        self.list
            .binary_search_by_key(&offset, Record::offset)
            .expect("record missing from offset-ordered list")
    }

    fn insert_alloc(&mut self, rec: Record) {
        self.alloc.entry(rec.key()).or_default().push(rec);
        self.alloc_count += 1;
    }

    fn remove_alloc(&mut self, rec: &Record) -> bool {
        let Some(bucket) = self.alloc.get_mut(&rec.key()) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|r| r == rec) else {
            return false;
        };

        bucket.remove(pos);
        if bucket.is_empty() {
            self.alloc.remove(&rec.key());
        }
        self.alloc_count -= 1;
        true
    }

    fn insert_free(&mut self, rec: Record) {
        self.free.entry(rec.size()).or_default().push(rec);
        self.free_count += 1;
    }

    fn remove_if_free(&mut self, rec: &Record) -> bool {
        let Some(bucket) = self.free.get_mut(&rec.size()) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|r| r == rec) else {
            return false;
        };

        bucket.remove(pos);
        if bucket.is_empty() {
            self.free.remove(&rec.size());
        }
        self.free_count -= 1;
        true
    }

    /// Removes and returns the smallest free record with `size >= need`.
    fn take_smallest_free(&mut self, need: u32) -> Option<Record> {
        let (&size, _) = self.free.range(need..).next()?;
        let bucket = self.free.get_mut(&size)?;
        let rec = bucket.pop()?;

        if bucket.is_empty() {
            self.free.remove(&size);
        }
        self.free_count -= 1;
        Some(rec)
    }
}
