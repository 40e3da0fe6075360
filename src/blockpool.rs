//! The per-partition block-index pool: a bump arena of 24-byte
//! `BlockRecord`s over a growable mmap file, sorted and written to its
//! final name on partition close.

use std::path::{Path, PathBuf};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Result, TdbError};
use crate::mmapfile::MmapFile;

pub const BLOCK_RECORD_SIZE: usize = 24;

/// On-disk block-index record: a symbol's block within a partition.
/// `num` is the block's ordinal among all blocks ever allocated for this
/// partition; it, together with `ColumnDef::block_size`, locates the
/// block's byte range in each column file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct BlockRecord {
    pub symbol: i32,
    pub len: i32,
    pub ts_min: i64,
    pub num: i64,
}

impl BlockRecord {
    fn is_unused(&self) -> bool {
        self.symbol == 0 && self.len == 0 && self.ts_min == 0 && self.num == 0
    }
}

const POOL_DEFAULT_CAP_RECORDS: u64 = 4096;

/// Bump-allocates `BlockRecord`s into an mmap'd arena, growing by doubling.
/// Records are addressed by byte offset rather than pointer so they survive
/// the arena being remapped to a new address on growth.
pub struct BlockPool {
    file: MmapFile,
    used: u64,
}

impl BlockPool {
    /// Opens (or creates) the pool file at `path`, sized for at least
    /// `POOL_DEFAULT_CAP_RECORDS` records if newly created.
    pub fn open(path: impl Into<PathBuf>) -> Result<BlockPool> {
        let path = path.into();
        let is_new = !path.exists();
        let file = MmapFile::open(&path, POOL_DEFAULT_CAP_RECORDS * BLOCK_RECORD_SIZE as u64)?;
        let used = if is_new {
            0
        } else {
            Self::scan_used_bytes(&file)
        };
        Ok(BlockPool { file, used })
    }

    /// Recovery: a record is either entirely zero (unused capacity, never
    /// written) or a genuine block (`symbol >= 1`, since id 0 is reserved).
    /// The used length is the byte offset one past the last non-zero
    /// record; trailing unused records after it are free capacity.
    fn scan_used_bytes(file: &MmapFile) -> u64 {
        let data = file.as_slice();
        let mut last_used: Option<u64> = None;
        let mut offset = 0u64;
        while (offset as usize) + BLOCK_RECORD_SIZE <= data.len() {
            let chunk = &data[offset as usize..offset as usize + BLOCK_RECORD_SIZE];
            if let Ok(record) = BlockRecord::read_from_bytes(chunk) {
                if !record.is_unused() {
                    last_used = Some(offset);
                }
            }
            offset += BLOCK_RECORD_SIZE as u64;
        }
        match last_used {
            Some(o) => o + BLOCK_RECORD_SIZE as u64,
            None => 0,
        }
    }

    /// Allocates space for a new record and writes it, growing the backing
    /// file (doubling) if the pool is full. Returns the record's byte
    /// offset, which the caller stores in its per-symbol block vector in
    /// place of a pointer.
    pub fn alloc(&mut self, record: BlockRecord) -> Result<u64> {
        let needed = self.used + BLOCK_RECORD_SIZE as u64;
        if needed > self.file.size() {
            let mut new_size = self.file.size().max(BLOCK_RECORD_SIZE as u64);
            while needed > new_size {
                new_size *= 2;
            }
            self.file.resize(new_size)?;
        }

        let offset = self.used;
        self.write_at(offset, &record)?;
        self.used += BLOCK_RECORD_SIZE as u64;
        Ok(offset)
    }

    pub fn read_at(&self, offset: u64) -> Result<BlockRecord> {
        let start = offset as usize;
        let chunk = self
            .file
            .as_slice()
            .get(start..start + BLOCK_RECORD_SIZE)
            .ok_or_else(|| TdbError::InvalidArgument(format!("block record offset {offset} out of range")))?;
        BlockRecord::read_from_bytes(chunk)
            .map_err(|_| TdbError::corrupt(self.file.path(), "misaligned block record"))
    }

    pub fn write_at(&mut self, offset: u64, record: &BlockRecord) -> Result<()> {
        let start = offset as usize;
        let slice = self
            .file
            .as_mut_slice()
            .get_mut(start..start + BLOCK_RECORD_SIZE)
            .ok_or_else(|| TdbError::InvalidArgument(format!("block record offset {offset} out of range")))?;
        slice.copy_from_slice(record.as_bytes());
        Ok(())
    }

    /// All live (non-zero) records currently in the pool, in arena order.
    pub fn live_records(&self) -> Vec<BlockRecord> {
        let data = self.file.as_slice();
        let mut out = Vec::new();
        let mut offset = 0usize;
        while offset + BLOCK_RECORD_SIZE <= self.used as usize && offset + BLOCK_RECORD_SIZE <= data.len() {
            if let Ok(record) = BlockRecord::read_from_bytes(&data[offset..offset + BLOCK_RECORD_SIZE]) {
                if !record.is_unused() {
                    out.push(record);
                }
            }
            offset += BLOCK_RECORD_SIZE;
        }
        out
    }

    /// Sorts live records ascending by `(symbol, ts_min, num, len)` and
    /// writes them to `dest_path`, then closes this pool's backing file.
    /// Zero-valued (unused) records are excluded rather than sorted in,
    /// since they carry no ordering meaning.
    pub fn sort_and_commit(self, dest_path: impl AsRef<Path>) -> Result<()> {
        let mut records = self.live_records();
        records.sort_by_key(|r| (r.symbol, r.ts_min, r.num, r.len));

        let dest_path = dest_path.as_ref();
        let size = (records.len() * BLOCK_RECORD_SIZE) as u64;
        let mut out = MmapFile::open(dest_path, size)?;
        for (i, record) in records.iter().enumerate() {
            out.write_at((i * BLOCK_RECORD_SIZE) as u64, record)?;
        }
        out.close()?;

        let src_path = self.file.path().to_path_buf();
        self.file.close()?;
        if src_path != dest_path {
            std::fs::remove_file(&src_path).map_err(|e| TdbError::io(&src_path, e))?;
        }
        Ok(())
    }

    /// `msync`s the unsorted pool without sorting or committing it, leaving
    /// it open under its working name for further allocation.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.file.flush()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
