//! # File-Backed Object Cache
//!
//! The thin wrapper cache callers use: it makes sure the cache directory
//! exists, names the backing file `cache.dat`, and forwards everything else
//! to the [`HeapFile`] underneath.

use std::fs;
use std::path::Path;

use eyre::{Result, WrapErr};

use crate::storage::HeapFile;

pub const CACHE_FILE_NAME: &str = "cache.dat";

/// An object cache stored as a single `cache.dat` inside a directory.
#[derive(Debug)]
pub struct HeapFileCache {
    heap: HeapFile,
}

impl HeapFileCache {
    /// Creates the directory if needed and opens `<dir>/cache.dat`. An empty
    /// key means no encryption.
    pub fn open<P: AsRef<Path>>(dir: P, key: &[u8]) -> Result<Self> {
        let dir = dir.as_ref();

        fs::create_dir_all(dir)
            .wrap_err_with(|| format!("failed to create cache directory '{}'", dir.display()))?;

        let heap = HeapFile::open(dir.join(CACHE_FILE_NAME), key)?;
        Ok(Self { heap })
    }

    pub fn has_object(&mut self, id: &[u8]) -> bool {
        self.heap.has(id)
    }

    pub fn read_object(&mut self, id: &[u8]) -> Option<Vec<u8>> {
        self.heap.get(id)
    }

    pub fn write_object(&mut self, id: &[u8], object: &[u8]) -> Result<bool> {
        self.heap.put(id, object)
    }

    pub fn erase_object(&mut self, id: &[u8]) -> Result<bool> {
        self.heap.erase(id)
    }

    pub fn current_size(&self) -> u64 {
        self.heap.size()
    }

    pub fn set_max_size(&mut self, max_size: u64) -> Result<()> {
        self.heap.set_max_size(max_size)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.heap.clear()
    }

    pub fn close(self) -> Result<()> {
        self.heap.close()
    }
}
