//! A single time partition: its column files, block-index pool, and the
//! per-symbol block vectors used to place new rows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::blockpool::{BlockPool, BlockRecord};
use crate::column::Column;
use crate::error::{Result, TdbError};
use crate::schema::Schema;
use crate::units::kib;

/// Row capacity of every block, regardless of column stride: since
/// `block_size = 16KiB * stride`, `rows_per_block = block_size / stride`
/// is always `16 * 1024`.
pub const ROWS_PER_BLOCK: i64 = kib(16) as i64;

const UNSORTED_BLOCKS_NAME: &str = "_blocks.unsorted";
const SORTED_BLOCKS_NAME: &str = "_blocks";

#[derive(Debug, Clone, Copy)]
struct BlockHandle {
    pool_offset: u64,
    num: i64,
    ts_min: i64,
    len: i32,
}

pub struct Partition {
    dir: PathBuf,
    name: String,
    ts_min: i64,
    ts_max: i64,
    columns: HashMap<String, Column>,
    pool: BlockPool,
    symbol_blocks: HashMap<i32, Vec<BlockHandle>>,
    num_blocks: i64,
}

impl Partition {
    /// Creates a brand-new partition directory for `[ts_min, ts_max)`.
    pub fn create(table_dir: &Path, name: &str, ts_min: i64, ts_max: i64, schema: &Schema) -> Result<Partition> {
        let dir = table_dir.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| TdbError::io(&dir, e))?;

        let mut columns = Self::open_value_columns(&dir, schema)?;
        let sym_col_def = Self::sym_column_def(schema)?;
        let sym_ext = schema.sym_type.extension()?;
        let sym_path = dir.join(format!("{}.{}", schema.sym_name, sym_ext));
        columns.insert(schema.sym_name.clone(), Column::open(sym_path, sym_col_def)?);

        let pool = BlockPool::open(dir.join(UNSORTED_BLOCKS_NAME))?;

        Ok(Partition {
            dir,
            name: name.to_string(),
            ts_min,
            ts_max,
            columns,
            pool,
            symbol_blocks: HashMap::new(),
            num_blocks: 0,
        })
    }

    /// Reopens an existing partition directory. If an uncommitted
    /// `_blocks.unsorted` file is present, the partition was left open
    /// (e.g. process restart mid-write); its live records are replayed
    /// into the in-memory block vectors. A partition with only a
    /// committed `_blocks` file is read-only going forward; a fresh
    /// rotation is needed before it can accept more writes.
    pub fn open_existing(table_dir: &Path, name: &str, ts_min: i64, ts_max: i64, schema: &Schema) -> Result<Partition> {
        let dir = table_dir.join(name);
        let unsorted_path = dir.join(UNSORTED_BLOCKS_NAME);
        if !unsorted_path.exists() {
            return Err(TdbError::InvalidArgument(format!(
                "partition {name} has no open block pool; rotate before reopening for writes"
            )));
        }

        let mut columns = Self::open_value_columns(&dir, schema)?;
        let sym_col_def = Self::sym_column_def(schema)?;
        let sym_ext = schema.sym_type.extension()?;
        let sym_path = dir.join(format!("{}.{}", schema.sym_name, sym_ext));
        columns.insert(schema.sym_name.clone(), Column::open(sym_path, sym_col_def)?);

        let pool = BlockPool::open(&unsorted_path)?;
        let mut symbol_blocks: HashMap<i32, Vec<BlockHandle>> = HashMap::new();
        let mut num_blocks = 0i64;

        let mut offset = 0u64;
        for record in pool.live_records() {
            symbol_blocks.entry(record.symbol).or_default().push(BlockHandle {
                pool_offset: offset,
                num: record.num,
                ts_min: record.ts_min,
                len: record.len,
            });
            num_blocks = num_blocks.max(record.num + 1);
            offset += crate::blockpool::BLOCK_RECORD_SIZE as u64;
        }

        Ok(Partition {
            dir,
            name: name.to_string(),
            ts_min,
            ts_max,
            columns,
            pool,
            symbol_blocks,
            num_blocks,
        })
    }

    fn open_value_columns(dir: &Path, schema: &Schema) -> Result<HashMap<String, Column>> {
        let mut columns = HashMap::new();
        for col in &schema.columns {
            let ext = col.col_type.extension()?;
            let path = dir.join(format!("{}.{}", col.name, ext));
            columns.insert(col.name.clone(), Column::open(path, col.clone())?);
        }
        Ok(columns)
    }

    fn sym_column_def(schema: &Schema) -> Result<crate::schema::ColumnDef> {
        let stride = schema.sym_type.stride()?;
        Ok(crate::schema::ColumnDef {
            name: schema.sym_name.clone(),
            col_type: schema.sym_type,
            stride,
            block_size: crate::schema::block_size_for_stride(stride),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ts_min(&self) -> i64 {
        self.ts_min
    }

    pub fn ts_max(&self) -> i64 {
        self.ts_max
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.ts_min && ts < self.ts_max
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// First-fit block allocator: scans `symbol`'s existing blocks for one
    /// with `ts_min <= ts` and `len < ROWS_PER_BLOCK`; allocates a new
    /// block, seeded with `ts_min = ts`, if none qualifies.
    ///
    /// Returns `(block_num, row_in_block)`, the placement for the row
    /// about to be written, and records the allocation.
    pub fn allocate_row(&mut self, symbol: i32, ts: i64) -> Result<(i64, i64)> {
        let blocks = self.symbol_blocks.entry(symbol).or_default();
        if let Some(handle) = blocks
            .iter_mut()
            .find(|h| h.ts_min <= ts && (h.len as i64) < ROWS_PER_BLOCK)
        {
            let row = handle.len as i64;
            handle.len += 1;
            let record = BlockRecord {
                symbol,
                len: handle.len,
                ts_min: handle.ts_min,
                num: handle.num,
            };
            self.pool.write_at(handle.pool_offset, &record)?;
            return Ok((handle.num, row));
        }

        let num = self.num_blocks;
        self.num_blocks += 1;
        let record = BlockRecord {
            symbol,
            len: 1,
            ts_min: ts,
            num,
        };
        let offset = self.pool.alloc(record)?;
        self.symbol_blocks.entry(symbol).or_default().push(BlockHandle {
            pool_offset: offset,
            num,
            ts_min: ts,
            len: 1,
        });
        Ok((num, 0))
    }

    pub fn write_row_bytes(&mut self, column: &str, block_num: i64, row: i64, bytes: &[u8]) -> Result<()> {
        let col = self
            .columns
            .get_mut(column)
            .ok_or_else(|| TdbError::InvalidArgument(format!("no such column {column}")))?;
        col.write_row_bytes(block_num, row, bytes)
    }

    pub fn read_row_bytes(&self, column: &str, block_num: i64, row: i64) -> Result<&[u8]> {
        let col = self
            .columns
            .get(column)
            .ok_or_else(|| TdbError::InvalidArgument(format!("no such column {column}")))?;
        col.read_row_bytes(block_num, row)
    }

    /// All committed or in-progress blocks belonging to `symbol`, in
    /// allocation order. Ascending `ts_min` is not guaranteed until the
    /// block index has been sorted; readers wanting sorted order should
    /// query a closed partition's committed `_blocks` file instead.
    pub fn blocks_for_symbol(&self, symbol: i32) -> Vec<(i64, i64, i32)> {
        self.symbol_blocks
            .get(&symbol)
            .map(|v| v.iter().map(|h| (h.num, h.ts_min, h.len)).collect())
            .unwrap_or_default()
    }

    /// `msync`s every column and the unsorted block pool without
    /// committing the block index, leaving the partition open and
    /// resumable. Use this as a durability checkpoint that doesn't end the
    /// partition's lifetime.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.pool.checkpoint()?;
        for col in self.columns.values_mut() {
            col.checkpoint()?;
        }
        Ok(())
    }

    /// Rotation protocol: sorts and commits the block-index pool to its
    /// final name, then `msync`s and drops every column mapping. Consumes
    /// the partition; callers must open a fresh one to continue writing.
    pub fn close(self) -> Result<()> {
        let dest = self.dir.join(SORTED_BLOCKS_NAME);
        self.pool.sort_and_commit(dest)?;
        for (_, col) in self.columns {
            col.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Schema};
    use tempfile::TempDir;

    fn test_schema() -> Schema {
        let mut s = Schema::init("trades", "%Y/%m/%d", ColumnType::Symbol16, "us_equities").unwrap();
        s.add(ColumnType::Float, "price").unwrap();
        s.add(ColumnType::Uint32, "size").unwrap();
        s
    }

    #[test]
    fn allocate_row_first_fit_within_block_then_spills_to_new_block() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut p = Partition::create(dir.path(), "2023.11.14", 0, 86_400_000_000_000, &schema).unwrap();

        let (b0, r0) = p.allocate_row(1, 100).unwrap();
        let (b1, r1) = p.allocate_row(1, 200).unwrap();
        assert_eq!((b0, r0), (0, 0));
        assert_eq!((b1, r1), (0, 1));

        for i in 0..(ROWS_PER_BLOCK - 2) {
            p.allocate_row(1, 300 + i).unwrap();
        }
        let (b_next, r_next) = p.allocate_row(1, 999_999).unwrap();
        assert_eq!(b_next, 1);
        assert_eq!(r_next, 0);
    }

    #[test]
    fn different_symbols_get_independent_block_streams() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut p = Partition::create(dir.path(), "2023.11.14", 0, 86_400_000_000_000, &schema).unwrap();

        let (b_a, _) = p.allocate_row(1, 100).unwrap();
        let (b_b, _) = p.allocate_row(2, 100).unwrap();
        assert_eq!(b_a, 0);
        assert_eq!(b_b, 1);
    }

    #[test]
    fn write_and_read_row_round_trip_through_partition() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut p = Partition::create(dir.path(), "2023.11.14", 0, 86_400_000_000_000, &schema).unwrap();

        let (block, row) = p.allocate_row(1, 100).unwrap();
        p.write_row_bytes("price", block, row, &42.5f32.to_le_bytes()).unwrap();
        let back = f32::from_le_bytes(p.read_row_bytes("price", block, row).unwrap().try_into().unwrap());
        assert_eq!(back, 42.5);
    }

    #[test]
    fn close_commits_sorted_block_index_and_reopen_finds_nothing_to_resume() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        let mut p = Partition::create(dir.path(), "2023.11.14", 0, 86_400_000_000_000, &schema).unwrap();
        p.allocate_row(1, 100).unwrap();
        p.allocate_row(2, 50).unwrap();
        p.close().unwrap();

        let partition_dir = dir.path().join("2023.11.14");
        assert!(partition_dir.join(SORTED_BLOCKS_NAME).exists());
        assert!(!partition_dir.join(UNSORTED_BLOCKS_NAME).exists());

        let reopened = Partition::open_existing(dir.path(), "2023.11.14", 0, 86_400_000_000_000, &schema);
        assert!(reopened.is_err());
    }

    #[test]
    fn reopen_existing_resumes_an_uncommitted_partition() {
        let dir = TempDir::new().unwrap();
        let schema = test_schema();
        {
            let mut p = Partition::create(dir.path(), "2023.11.14", 0, 86_400_000_000_000, &schema).unwrap();
            p.allocate_row(1, 100).unwrap();
        }

        let mut reopened =
            Partition::open_existing(dir.path(), "2023.11.14", 0, 86_400_000_000_000, &schema).unwrap();
        assert_eq!(reopened.blocks_for_symbol(1).len(), 1);
        let (block, row) = reopened.allocate_row(1, 150).unwrap();
        assert_eq!((block, row), (0, 1));
    }
}
