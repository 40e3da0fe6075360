//! A growable, memory-mapped file: a file-descriptor plus `mmap` region
//! pair with `ftruncate`/remap-based resize and `msync`-on-close
//! semantics.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{Result, TdbError};

pub struct MmapFile {
    path: PathBuf,
    file: fs::File,
    mmap: Option<MmapMut>,
    size: u64,
}

impl MmapFile {
    /// Opens `path` for read/write, creating parent directories and the
    /// file itself if absent, then maps (or extends) it to at least
    /// `initial_size` bytes.
    pub fn open(path: impl Into<PathBuf>, initial_size: u64) -> Result<MmapFile> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TdbError::io(&path, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| TdbError::io(&path, e))?;

        let existing_size = file.metadata().map_err(|e| TdbError::io(&path, e))?.len();

        let mut m = MmapFile {
            path,
            file,
            mmap: None,
            size: existing_size,
        };
        let target = initial_size.max(existing_size);
        if target > 0 {
            m.resize(target)?;
        }
        Ok(m)
    }

    /// Opens an existing file read-write without forcing any minimum size,
    /// mapping exactly its current length. Used when reopening a table.
    pub fn open_existing(path: impl Into<PathBuf>) -> Result<MmapFile> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| TdbError::io(&path, e))?;
        let size = file.metadata().map_err(|e| TdbError::io(&path, e))?.len();
        let mut m = MmapFile {
            path,
            file,
            mmap: None,
            size: 0,
        };
        if size > 0 {
            m.resize(size)?;
        }
        Ok(m)
    }

    /// Grows (never shrinks) the backing file to `new_size` bytes via
    /// `ftruncate`, then remaps. A prior mapping, if any, is dropped first;
    /// the caller must reload any derived pointer/slice after calling this,
    /// since remapping may move the region.
    pub fn resize(&mut self, new_size: u64) -> Result<()> {
        if new_size < self.size {
            return Err(TdbError::InvalidArgument(format!(
                "refusing to shrink mmap file {} from {} to {new_size}",
                self.path.display(),
                self.size
            )));
        }

        self.file
            .set_len(new_size)
            .map_err(|e| TdbError::io(&self.path, e))?;

        // memmap2 has no in-place mremap; drop and remap. The new mapping
        // may land at a different address, which is why callers hold byte
        // offsets rather than raw pointers.
        self.mmap = None;
        if new_size > 0 {
            let mmap = unsafe {
                MmapMut::map_mut(&self.file).map_err(|e| TdbError::io(&self.path, e))?
            };
            self.mmap = Some(mmap);
        }
        self.size = new_size;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.mmap {
            Some(m) => &m[..],
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mmap {
            Some(m) => &mut m[..],
            None => &mut [],
        }
    }

    /// `msync`s the mapping without unmapping it, leaving the file open for
    /// further writes. Used for a durability checkpoint that doesn't end
    /// the file's lifetime.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(m) = &self.mmap {
            m.flush().map_err(|e| TdbError::io(&self.path, e))?;
        }
        Ok(())
    }

    /// `msync` then drop the mapping. Called on partition rotation and
    /// table close.
    pub fn close(mut self) -> Result<()> {
        self.sync_and_unmap()
    }

    fn sync_and_unmap(&mut self) -> Result<()> {
        if let Some(m) = &self.mmap {
            m.flush().map_err(|e| TdbError::io(&self.path, e))?;
        }
        self.mmap = None;
        Ok(())
    }
}

impl Drop for MmapFile {
    fn drop(&mut self) {
        let _ = self.sync_and_unmap();
    }
}
