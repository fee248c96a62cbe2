//! # heapstore - Persistent Single-File Object Store
//!
//! heapstore maps opaque byte-string ids to opaque byte-string payloads in a
//! single regular file. The store survives process restarts, detects
//! accidental corruption with a payload hash, enforces an optional size cap
//! by evicting from the file tail, and can encrypt payloads and ids with a
//! caller-supplied key. Metadata is never encrypted, so a wrong key behaves
//! like an empty store rather than a corrupt one.
//!
//! ## Quick Start
//!
//! ```ignore
//! use heapstore::HeapFile;
//!
//! let mut heap = HeapFile::open("./objects.dat", b"secret-key")?;
//!
//! heap.put(b"greeting", b"hello world")?;
//! assert!(heap.has(b"greeting"));
//! assert_eq!(heap.get(b"greeting").as_deref(), Some(&b"hello world"[..]));
//!
//! heap.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   HeapFileCache (dir + cache.dat)   │
//! ├─────────────────────────────────────┤
//! │   HeapFile (load/commit, ops)       │
//! ├──────────────────┬──────────────────┤
//! │ HeapIndex        │ Blob (envelope   │
//! │ (free-list       │  + integrity     │
//! │  allocator)      │  hash)           │
//! ├──────────────────┴──────────────────┤
//! │   MappedFile (sliding mmap window)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! All multi-byte integers are big-endian:
//!
//! ```text
//! [0..8)            meta_off: absolute offset of the metadata section
//! [8..meta_off)     payload region: blobs, possibly with free gaps
//! [meta_off..+4)    num_alloc: number of allocated records
//! [meta_off+4..)    num_alloc x 16-byte records (offset, key, size)
//! ```
//!
//! A zero-length file is a valid, empty store.
//!
//! ## Module Overview
//!
//! - [`storage`]: the mmap window, the record allocator, the blob envelope,
//!   and the [`HeapFile`] that ties them together
//! - [`cipher`]: the [`Cipher`] seam and the default repeating-key XOR
//! - [`cache`]: the directory-managing wrapper used by cache callers

pub mod cache;
pub mod cipher;
pub mod storage;

pub use cache::HeapFileCache;
pub use cipher::{Cipher, XorCipher};
pub use storage::{HeapFile, HeapIndex, MappedFile, Record};
