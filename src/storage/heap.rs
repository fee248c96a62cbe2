//! # Heap File
//!
//! [`HeapFile`] ties the allocator, the blob envelope, the cipher, and the
//! mapped file into the user-visible store. It can be thought of as a hash
//! table serialized to disk.
//!
//! ## Load and Commit
//!
//! On open, the header word at byte 0 locates the serialized allocated
//! records, which are replayed into the index; free blocks reappear as the
//! gaps between them. Any inconsistency while loading resets the index and
//! truncates the file to empty rather than failing the open. On close, the
//! allocated records are serialized after the last block and the header word
//! is pointed at them.
//!
//! ## Encryption
//!
//! Ids are encrypted before they are stored, hashed, or compared, and
//! payloads are encrypted as they stream into the mapped region. Metadata is
//! never encrypted, so opening with the wrong key looks like an empty store
//! (reads miss, writes land in their own buckets) rather than a reset: the
//! keys isolate tenants inside one file.
//!
//! ## Eviction
//!
//! The size cap is enforced by deallocating from the file tail, the only
//! place where a deallocation is guaranteed to shrink the file. Erasures in
//! the middle only touch metadata.

use std::path::Path;

use eyre::Result;
use smallvec::SmallVec;

use super::blob::{self, Blob, BlobMut, PayloadSink, PayloadSource, BLOB_OVERHEAD};
use super::{HeapIndex, MappedFile, Record};
use crate::cipher::{Cipher, XorCipher};

/// Bytes reserved at the front of the file for the metadata-offset word.
pub const FILE_HEADER_SIZE: u64 = 8;

/// Sentinel for "no size cap".
pub const UNBOUNDED_MAX_SIZE: u64 = u64::MAX;

/// A persistent, single-file, content-addressed object store.
///
/// Single-owner: the heap holds its file descriptor and mmap window
/// exclusively, and lookups take `&mut self` because they may slide the
/// window. Changes become durable when the heap is closed ([`HeapFile::close`]
/// or drop); callers needing durability between operations must close and
/// reopen.
#[derive(Debug)]
pub struct HeapFile<C: Cipher = XorCipher> {
    index: HeapIndex,
    file: MappedFile,
    cipher: C,
    max_size: u64,
    committed: bool,
}

impl HeapFile<XorCipher> {
    /// Opens or creates the heap at `path` with repeating-key XOR
    /// encryption. An empty key means no encryption.
    pub fn open<P: AsRef<Path>>(path: P, key: &[u8]) -> Result<Self> {
        Self::with_cipher(path, XorCipher::new(key))
    }
}

impl<C: Cipher> HeapFile<C> {
    /// Opens or creates the heap at `path` with a caller-supplied cipher.
    ///
    /// A malformed metadata section resets the index and the file to empty;
    /// the open itself only fails on I/O errors.
    pub fn with_cipher<P: AsRef<Path>>(path: P, cipher: C) -> Result<Self> {
        let file = MappedFile::open(path)?;
        let mut heap = Self {
            index: HeapIndex::new(),
            file,
            cipher,
            max_size: UNBOUNDED_MAX_SIZE,
            committed: false,
        };

        if heap.file.is_empty() {
            return Ok(heap);
        }

        if heap.load().is_err() {
            heap.index.clear();
            heap.file.clear()?;
        }
        Ok(heap)
    }

    /// Heap size on disk in bytes.
    pub fn size(&self) -> u64 {
        self.file.len()
    }

    /// Read-only view of the allocator, mainly for inspection and tests.
    pub fn index(&self) -> &HeapIndex {
        &self.index
    }

    /// Existence test. Reads from disk to compare the stored id with the one
    /// passed in; bucket-key collisions alone never yield a false positive.
    pub fn has(&mut self, id: &[u8]) -> bool {
        let id = self.cipher.encrypt(id);
        self.find_record(&id).is_some()
    }

    /// Returns the payload stored under `id`, or `None` if the id is absent,
    /// stored under a different key, or its blob fails the integrity check.
    /// A corrupt blob is left on disk; the caller may still erase it.
    pub fn get(&mut self, id: &[u8]) -> Option<Vec<u8>> {
        let id = self.cipher.encrypt(id);
        let rec = self.find_record(&id)?;

        let buf = self
            .file
            .read_slice(rec.offset(), u64::from(rec.size()))
            .ok()?;
        let mut sink = DecryptingSink {
            cipher: &self.cipher,
            out: Vec::new(),
        };

        if Blob::new(buf).read_payload(&mut sink) {
            Some(sink.out)
        } else {
            None
        }
    }

    /// Stores `data` under `id`, replacing any previous object with that id.
    ///
    /// Returns `Ok(false)` when the id exceeds 255 bytes, the payload
    /// exceeds the format's 32-bit length field, or the write cannot fit
    /// within the size cap; no allocation survives a failed put.
    pub fn put(&mut self, id: &[u8], data: &[u8]) -> Result<bool> {
        let id = self.cipher.encrypt(id);
        self.erase_encrypted(&id)?;

        if id.len() > usize::from(u8::MAX)
            || data.len() > u32::MAX as usize - BLOB_OVERHEAD - id.len()
        {
            return Ok(false);
        }

        let need = blob::size_for(id.len(), data.len()) as u32;
        let bucket = blob::hash(&id);

        let rec = match self.index.allocate(need, bucket) {
            Some(rec) => rec,
            None => {
                // no free block fits; grab more from the disk
                let offset = match self.index.records().last() {
                    Some(last) => last.end(),
                    None => FILE_HEADER_SIZE,
                };
                let rec = Record::with_min_capacity(offset, bucket, need);
                self.index.add_allocated_block(rec)?;

                let projected = rec.end() + u64::from(self.index.size_on_disk());
                if projected > self.max_size {
                    self.index.deallocate(&rec);
                    return Ok(false);
                }
                self.file.trim(projected)?;
                rec
            }
        };

        let buf = self.file.write_slice(rec.offset(), u64::from(rec.size()))?;
        let source = EncryptingSource {
            cipher: &self.cipher,
            data,
        };
        if BlobMut::new(buf).write(&id, &source) {
            return Ok(true);
        }

        self.release(rec)?;
        Ok(false)
    }

    /// Erases the object stored under `id`. Idempotent: erasing an absent id
    /// is a success. Only a tail erasure touches the file (it truncates);
    /// erasures from the middle are metadata-only.
    pub fn erase(&mut self, id: &[u8]) -> Result<bool> {
        let id = self.cipher.encrypt(id);
        self.erase_encrypted(&id)
    }

    /// Resets the heap entirely: empty index, zero-length file, no size cap.
    pub fn clear(&mut self) -> Result<()> {
        self.index.clear();
        self.file.clear()?;
        self.max_size = UNBOUNDED_MAX_SIZE;
        Ok(())
    }

    /// Caps the heap's on-disk size, evicting objects from the file tail
    /// until it fits. Tail eviction is the one sure-fire way to shrink the
    /// file, at the cost of possibly evicting recently added objects.
    pub fn set_max_size(&mut self, max_size: u64) -> Result<()> {
        self.max_size = max_size;

        if self.file.len() < max_size {
            return Ok(());
        }
        if self.index.num_allocated_records() == 0 {
            return self.clear();
        }

        loop {
            let last = match self.index.records().last() {
                Some(rec) => *rec,
                None => return self.clear(),
            };
            self.index.deallocate(&last);

            if self.index.num_allocated_records() == 0 {
                return self.clear();
            }

            let tail = match self.index.records().last() {
                Some(rec) => *rec,
                None => return self.clear(),
            };
            let current = tail.end() + u64::from(self.index.size_on_disk());
            if current <= max_size {
                return self.file.trim(current);
            }
        }
    }

    /// Commits the metadata and syncs the file. After this the handle is
    /// gone; reopen to keep using the heap.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;

        self.commit()?;
        self.file.sync()
    }

    /// Serializes the allocated records after the last block and points the
    /// header word at them. An empty heap is committed as a zero-length
    /// file.
    fn commit(&mut self) -> Result<()> {
        if self.index.num_allocated_records() == 0 {
            return self.file.clear();
        }

        let last = match self.index.records().last() {
            Some(rec) => *rec,
            None => return Ok(()),
        };
        let meta_off = last.end();

        let header = self.file.write_slice(0, FILE_HEADER_SIZE)?;
        header.copy_from_slice(&meta_off.to_be_bytes());

        let meta_len = u64::from(self.index.size_on_disk());
        let num_alloc = self.index.num_allocated_records();
        let buf = self.file.write_slice(meta_off, meta_len)?;
        buf[..4].copy_from_slice(&num_alloc.to_be_bytes());

        let mut at = 4;
        for rec in self.index.records() {
            if self.index.is_free(rec) {
                continue;
            }
            rec.write_to(&mut buf[at..at + Record::SERIALIZED_SIZE])?;
            at += Record::SERIALIZED_SIZE;
        }

        debug_assert_eq!(at, meta_len as usize);
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let meta_off = {
            let buf = self.file.read_slice(0, FILE_HEADER_SIZE)?;
            u64::from_be_bytes(buf.try_into().unwrap())
        };
        let num_alloc = {
            let buf = self.file.read_slice(meta_off, 4)?;
            u32::from_be_bytes(buf.try_into().unwrap())
        };

        let raw_len = u64::from(num_alloc) * Record::SERIALIZED_SIZE as u64;
        let raw = self.file.read_slice(meta_off + 4, raw_len)?;

        for chunk in raw.chunks_exact(Record::SERIALIZED_SIZE) {
            self.index.add_allocated_block(Record::from_bytes(chunk)?)?;
        }
        Ok(())
    }

    /// Finds the record whose blob stores exactly this (encrypted) id by
    /// walking the bucket of its hash.
    fn find_record(&mut self, encrypted_id: &[u8]) -> Option<Record> {
        let bucket = blob::hash(encrypted_id);
        let candidates: SmallVec<[Record; 2]> = self
            .index
            .allocated_with_key(bucket)
            .iter()
            .copied()
            .collect();

        for rec in candidates {
            let Ok(buf) = self.file.read_slice(rec.offset(), u64::from(rec.size())) else {
                continue;
            };
            if Blob::new(buf).has_id(encrypted_id) {
                return Some(rec);
            }
        }
        None
    }

    fn erase_encrypted(&mut self, encrypted_id: &[u8]) -> Result<bool> {
        let Some(rec) = self.find_record(encrypted_id) else {
            return Ok(true);
        };

        self.release(rec)?;
        Ok(true)
    }

    /// Deallocates a record and, when it was the last one, truncates the
    /// file down to the new tail plus the metadata footprint.
    fn release(&mut self, rec: Record) -> Result<()> {
        let was_last = self.index.is_last(&rec);
        let offset = rec.offset();

        self.index.deallocate(&rec);

        if was_last {
            self.file
                .trim(offset + u64::from(self.index.size_on_disk()))?;
        }
        Ok(())
    }
}

impl<C: Cipher> Drop for HeapFile<C> {
    fn drop(&mut self) {
        // commit must not propagate errors out of drop
        let _ = self.shutdown();
    }
}

struct EncryptingSource<'a, C: Cipher> {
    cipher: &'a C,
    data: &'a [u8],
}

impl<C: Cipher> PayloadSource for EncryptingSource<'_, C> {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn fill(&self, dest: &mut [u8]) {
        self.cipher.encrypt_into(self.data, dest);
    }
}

struct DecryptingSink<'a, C: Cipher> {
    cipher: &'a C,
    out: Vec<u8>,
}

impl<C: Cipher> PayloadSink for DecryptingSink<'_, C> {
    fn consume(&mut self, src: &[u8]) {
        self.out = self.cipher.decrypt(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn heap_at(dir: &tempfile::TempDir, key: &[u8]) -> HeapFile {
        HeapFile::open(dir.path().join("heap.dat"), key).unwrap()
    }

    #[test]
    fn fresh_heap_is_empty() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");

        assert_eq!(heap.size(), 0);
        assert!(!heap.has(&[]));
        assert!(!heap.has(&[10; 10]));
        assert!(heap.get(&[10; 10]).is_none());
    }

    #[test]
    fn put_get_erase_round_trip() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");
        let id = [0xBEu8; 32];
        let data = [0xEFu8; 500];

        assert!(heap.put(&id, &data).unwrap());
        assert!(heap.has(&id));
        assert_eq!(heap.get(&id).unwrap(), data);

        assert!(heap.erase(&id).unwrap());
        assert!(!heap.has(&id));
        assert!(heap.get(&id).is_none());
    }

    #[test]
    fn put_replaces_existing_object() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"k");

        assert!(heap.put(b"id", &[1u8; 200]).unwrap());
        assert!(heap.put(b"id", &[2u8; 300]).unwrap());

        assert_eq!(heap.get(b"id").unwrap(), vec![2u8; 300]);
        assert_eq!(heap.index().num_allocated_records(), 1);
    }

    #[test]
    fn erase_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");
        heap.put(b"id", b"data").unwrap();

        assert!(heap.erase(b"id").unwrap());
        let size_after_first = heap.size();
        assert!(heap.erase(b"id").unwrap());

        assert_eq!(heap.size(), size_after_first);
    }

    #[test]
    fn erasing_only_object_truncates_file() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");
        heap.put(b"id", &[7u8; 1024]).unwrap();
        assert!(heap.size() > 0);

        heap.erase(b"id").unwrap();

        // the header word survives until close commits the empty index
        assert_eq!(heap.size(), FILE_HEADER_SIZE + 4);
        assert_eq!(heap.index().num_allocated_records(), 0);

        drop(heap);
        let heap = heap_at(&dir, b"");
        assert_eq!(heap.size(), 0);
    }

    #[test]
    fn middle_erase_is_metadata_only() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");
        heap.put(b"a", &[1u8; 300]).unwrap();
        heap.put(b"b", &[2u8; 300]).unwrap();
        heap.put(b"c", &[3u8; 300]).unwrap();
        let size = heap.size();

        heap.erase(b"b").unwrap();

        assert_eq!(heap.size(), size);
        assert_eq!(heap.index().num_free_records(), 1);
        assert!(heap.has(b"a"));
        assert!(heap.has(b"c"));
    }

    #[test]
    fn put_rejects_overlong_id() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");
        let id = [9u8; 256];

        assert!(!heap.put(&id, b"data").unwrap());
        assert_eq!(heap.size(), 0);
        assert_eq!(heap.index().num_allocated_records(), 0);
    }

    #[test]
    fn empty_id_and_empty_payload_are_valid() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"key");

        assert!(heap.put(&[], b"payload for empty id").unwrap());
        assert!(heap.put(b"empty-payload", &[]).unwrap());

        assert_eq!(heap.get(&[]).unwrap(), b"payload for empty id");
        assert_eq!(heap.get(b"empty-payload").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn freed_block_is_reused_when_it_fits() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");
        heap.put(b"a", &[1u8; 500]).unwrap();
        heap.put(b"tail", &[2u8; 300]).unwrap();
        heap.erase(b"a").unwrap();
        let size = heap.size();

        heap.put(b"b", &[3u8; 400]).unwrap();

        assert_eq!(heap.size(), size);
        assert_eq!(heap.index().num_free_records(), 0);
        assert_eq!(heap.get(b"b").unwrap(), vec![3u8; 400]);
    }

    #[test]
    fn too_tight_free_block_is_left_alone() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");
        heap.put(b"a", &[1u8; 200]).unwrap();
        heap.put(b"tail", &[2u8; 300]).unwrap();
        heap.erase(b"a").unwrap();
        assert_eq!(heap.index().num_free_records(), 1);

        // 300 bytes plus envelope exceed the freed 256-byte block
        heap.put(b"b", &[3u8; 300]).unwrap();

        assert_eq!(heap.index().num_free_records(), 1);
        assert_eq!(heap.get(b"b").unwrap(), vec![3u8; 300]);
    }

    #[test]
    fn clear_resets_everything() {
        let dir = tempdir().unwrap();
        let mut heap = heap_at(&dir, b"");
        heap.put(b"a", &[1u8; 300]).unwrap();
        heap.set_max_size(10_000).unwrap();

        heap.clear().unwrap();

        assert_eq!(heap.size(), 0);
        assert!(!heap.has(b"a"));
        // the cap is reset too
        assert!(heap.put(b"big", &[0u8; 50_000]).unwrap());
    }
}
