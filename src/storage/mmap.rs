//! # Sliding-Window Memory-Mapped File
//!
//! This module implements [`MappedFile`], a wrapper around a single regular
//! file that presents it as an addressable byte array through a sliding
//! page-aligned mmap window. Unlike a whole-file mapping, only the window is
//! resident in the address space at a time, so the heap can address files
//! much larger than it is willing to map.
//!
//! ## Window Policy
//!
//! The window offset is always a multiple of the OS page size and the window
//! length a multiple rounded up to cover the requested range. A request that
//! already lies inside the window returns without remapping; anything else
//! unmaps and maps a fresh window over the aligned range. Writes grow the
//! file first when the range extends past the end; reads never grow.
//!
//! ## Safety Model
//!
//! Remapping invalidates every pointer into the previous window. Instead of
//! runtime tracking, the borrow checker enforces the discipline:
//!
//! ```text
//! read_slice(&mut self, ..)  -> &[u8]      // view tied to the borrow
//! write_slice(&mut self, ..) -> &mut [u8]  // view tied to the borrow
//! ```
//!
//! Both take `&mut self`, so no view can survive a later call that might
//! slide the window. This costs nothing at runtime.
//!
//! ## Durability
//!
//! Writes land in the shared mapping and are visible to later windows over
//! the same file immediately (same page cache). Durable on-disk commit
//! happens when the owner calls [`MappedFile::sync`], typically once at
//! close.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use eyre::{ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};

fn os_page_size() -> u64 {
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        #[cfg(unix)]
        {
            // SAFETY: sysconf has no memory-safety preconditions; it reads a
            // process-wide constant.
            let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if n > 0 {
                return n as u64;
            }
        }
        4096
    })
}

/// A single regular file addressed through a sliding mmap window.
///
/// Grows the file as needed for writes, never for reads. Truncation via
/// [`MappedFile::trim`] resets the window to the first page.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    file: File,
    file_len: u64,
    window: MmapMut,
    window_off: u64,
    window_len: u64,
}

impl MappedFile {
    /// Opens or creates the file read+write and maps an initial one-page
    /// window at offset zero.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open heap file '{}'", path.display()))?;

        let file_len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat heap file '{}'", path.display()))?
            .len();

        let window_len = os_page_size();
        let window = Self::map(&file, &path, 0, window_len)?;

        Ok(Self {
            path,
            file,
            file_len,
            window,
            window_off: 0,
            window_len,
        })
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.file_len
    }

    pub fn is_empty(&self) -> bool {
        self.file_len == 0
    }

    /// Will the next access to this range reuse the current window?
    ///
    /// The window may extend past the end of the file by page rounding; only
    /// the part backed by file bytes counts.
    pub fn is_in_window(&self, offset: u64, len: u64) -> bool {
        let mapped = self
            .window_len
            .min(self.file_len.saturating_sub(self.window_off));

        self.window_off <= offset && self.window_off + mapped >= offset.saturating_add(len)
    }

    /// A read-only view of `len` bytes at `offset`, sliding the window if
    /// necessary. Fails when the range is not fully inside the file; reads
    /// never grow it.
    pub fn read_slice(&mut self, offset: u64, len: u64) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| eyre::eyre!("read range {}+{} overflows", offset, len))?;
        ensure!(
            end <= self.file_len,
            "read past end of '{}': {}..{} beyond {} bytes",
            self.path.display(),
            offset,
            end,
            self.file_len
        );

        self.ensure_window(offset, len)?;
        let start = (offset - self.window_off) as usize;
        Ok(&self.window[start..start + len as usize])
    }

    /// A writable view of `len` bytes at `offset`, sliding the window if
    /// necessary and growing the file when the range extends past the end.
    pub fn write_slice(&mut self, offset: u64, len: u64) -> Result<&mut [u8]> {
        offset
            .checked_add(len)
            .ok_or_else(|| eyre::eyre!("write range {}+{} overflows", offset, len))?;

        self.ensure_window(offset, len)?;
        let start = (offset - self.window_off) as usize;
        Ok(&mut self.window[start..start + len as usize])
    }

    /// Truncates the file to `keep` bytes and resets the window to the first
    /// page.
    pub fn trim(&mut self, keep: u64) -> Result<()> {
        self.file.set_len(keep).wrap_err_with(|| {
            format!(
                "failed to truncate '{}' to {} bytes",
                self.path.display(),
                keep
            )
        })?;
        self.file_len = keep;

        self.window_len = os_page_size();
        self.window = Self::map(&self.file, &self.path, 0, self.window_len)?;
        self.window_off = 0;
        Ok(())
    }

    /// Truncates to zero length.
    pub fn clear(&mut self) -> Result<()> {
        self.trim(0)
    }

    /// Blocks until the current window's dirty pages reach the disk.
    pub fn sync(&self) -> Result<()> {
        self.window
            .flush()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }

    fn ensure_window(&mut self, offset: u64, len: u64) -> Result<()> {
        if self.is_in_window(offset, len) {
            return Ok(());
        }

        let page = os_page_size();
        let window_off = offset - offset % page;
        let mut window_len = offset - window_off + len;
        window_len += page - window_len % page;

        if self.file_len < offset + len {
            self.file.set_len(offset + len).wrap_err_with(|| {
                format!(
                    "failed to grow '{}' to {} bytes",
                    self.path.display(),
                    offset + len
                )
            })?;
            self.file_len = offset + len;
        }

        self.window
            .flush_async()
            .wrap_err("failed to flush window before remap")?;
        self.window = Self::map(&self.file, &self.path, window_off, window_len)?;
        self.window_off = window_off;
        self.window_len = window_len;

        debug_assert!(self.is_in_window(offset, len));
        Ok(())
    }

    fn map(file: &File, path: &Path, offset: u64, len: u64) -> Result<MmapMut> {
        // SAFETY: MmapMut::map_mut is unsafe because externally modified
        // mappings lead to undefined behavior. This is safe because:
        // 1. The owner holds the file exclusively for its lifetime (single
        //    process, single owner by contract)
        // 2. The window may extend past EOF by page rounding, but every
        //    access is bounds-checked against the file length first
        // 3. The mapping is replaced, never aliased: assignment drops the
        //    previous window
        let window = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(len as usize)
                .map_mut(file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };
        Ok(window)
    }
}
