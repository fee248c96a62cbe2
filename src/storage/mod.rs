//! # Storage Module
//!
//! This module implements the on-disk heap that backs heapstore: a
//! memory-mapped file carved into variable-size blocks by an in-memory
//! free-list allocator, with all block metadata serialized to the file tail
//! on close.
//!
//! ## Architecture Overview
//!
//! The design is a variation on the implicit free list of K&R malloc, with
//! one twist: the metadata of every block is divorced from the payload and
//! held entirely in memory while the heap is open. There is no sbrk
//! equivalent inside the allocator; when no free block fits, the caller
//! appends a fresh block at the file tail.
//!
//! - `mmap`: [`MappedFile`], a sliding page-aligned window over the file
//! - `record`: [`Record`], the 16-byte per-block metadata
//! - `index`: [`HeapIndex`], the allocate/deallocate/coalesce engine
//! - `blob`: the on-disk envelope holding one id+payload pair
//! - `heap`: [`HeapFile`], load/commit and the user-visible operations
//!
//! ## File Layout
//!
//! ```text
//! Offset 0:         u64 meta_off (big-endian)
//! Offset 8:         payload region (blobs and free gaps, contiguous)
//! Offset meta_off:  u32 num_alloc, then num_alloc x 16-byte records
//! ```
//!
//! The payload region has no holes from the allocator's point of view: every
//! byte between offset 8 and `meta_off` belongs to exactly one record, free
//! or allocated, and consecutive records share a boundary.
//!
//! ## Safety Model
//!
//! The window slides as different file ranges are touched, which invalidates
//! previously returned views. Rather than hazard pointers or epochs, the
//! borrow checker enforces the discipline: [`MappedFile`] hands out slices
//! borrowed from `&mut self`, so no view can outlive the next window move.
//!
//! ## Concurrency
//!
//! Single-owner, single-threaded by design. The heap exposes no
//! synchronization; a `HeapFile` owns its file descriptor and window
//! exclusively for its lifetime.

mod blob;
mod heap;
mod index;
mod mmap;
mod record;

pub use blob::{hash, Blob, BlobMut, PayloadSink, PayloadSource, BLOB_OVERHEAD};
pub use heap::{HeapFile, FILE_HEADER_SIZE, UNBOUNDED_MAX_SIZE};
pub use index::HeapIndex;
pub use mmap::MappedFile;
pub use record::Record;
