//! Read iterator over a table's committed partitions. Only committed
//! (rotated) partitions are queried; the currently open partition's block
//! index isn't sorted and is excluded.

use crate::error::{Result, TdbError};
use crate::schema::Schema;
use crate::table::Table;

/// One returned row: the timestamp, the symbol name, and the requested
/// value columns' raw little-endian bytes in request order.
pub struct Row {
    pub ts: i64,
    pub symbol: String,
    pub values: Vec<Vec<u8>>,
}

/// Iterates rows across `[ts_from, ts_to)`, optionally restricted to
/// `symbols`, projecting `columns`. Construct via [`TableIter::new`] and
/// drive with the `Iterator` implementation.
pub struct TableIter<'a> {
    table: &'a Table,
    schema: &'a Schema,
    symbols: Option<Vec<i32>>,
    ts_from: i64,
    ts_to: i64,
    columns: Vec<String>,
    partition_names: Vec<String>,
    partition_idx: usize,
    pending: std::collections::VecDeque<Row>,
}

impl<'a> TableIter<'a> {
    pub fn new(
        table: &'a Table,
        symbols: Option<&[&str]>,
        ts_from: i64,
        ts_to: i64,
        columns: &[&str],
    ) -> Result<TableIter<'a>> {
        let schema = table.schema();
        for name in columns {
            if schema.column(name).is_none() {
                return Err(TdbError::InvalidArgument(format!("no such column {name}")));
            }
        }

        let symbol_ids = match symbols {
            Some(names) => {
                let mut ids = Vec::with_capacity(names.len());
                for name in names {
                    ids.push(table.symbol_id(name)?);
                }
                Some(ids)
            }
            None => None,
        };

        let mut partition_names: Vec<String> = std::fs::read_dir(table.dir())
            .map_err(|e| TdbError::io(table.dir(), e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter(|e| e.path().join("_blocks").exists())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        partition_names.sort();

        Ok(TableIter {
            table,
            schema,
            symbols: symbol_ids,
            ts_from,
            ts_to,
            columns: columns.iter().map(|s| s.to_string()).collect(),
            partition_names,
            partition_idx: 0,
            pending: std::collections::VecDeque::new(),
        })
    }

    fn load_next_partition(&mut self) -> Result<bool> {
        while self.partition_idx < self.partition_names.len() {
            let name = self.partition_names[self.partition_idx].clone();
            self.partition_idx += 1;

            let dir = self.table.dir().join(&name);
            let pool_path = dir.join("_blocks");
            let pool = crate::mmapfile::MmapFile::open_existing(&pool_path)?;
            let data = pool.as_slice();

            let mut offset = 0usize;
            while offset + crate::blockpool::BLOCK_RECORD_SIZE <= data.len() {
                let chunk = &data[offset..offset + crate::blockpool::BLOCK_RECORD_SIZE];
                offset += crate::blockpool::BLOCK_RECORD_SIZE;
                let record: crate::blockpool::BlockRecord =
                    match zerocopy::FromBytes::read_from_bytes(chunk) {
                        Ok(r) => r,
                        Err(_) => continue,
                    };

                if let Some(ids) = &self.symbols {
                    if !ids.contains(&record.symbol) {
                        continue;
                    }
                }

                let ts_col_ext = self.schema.column(&self.schema.ts_name).unwrap().col_type.extension()?;
                let ts_path = dir.join(format!("{}.{}", self.schema.ts_name, ts_col_ext));
                let ts_file = crate::mmapfile::MmapFile::open_existing(&ts_path)?;
                let ts_stride = self.schema.column(&self.schema.ts_name).unwrap().stride as usize;
                let block_size = self.schema.column(&self.schema.ts_name).unwrap().block_size as usize;

                let mut col_files = Vec::with_capacity(self.columns.len());
                for col_name in &self.columns {
                    let def = self.schema.column(col_name).unwrap();
                    let ext = def.col_type.extension()?;
                    let path = dir.join(format!("{}.{}", col_name, ext));
                    col_files.push((crate::mmapfile::MmapFile::open_existing(&path)?, def.stride as usize, def.block_size as usize));
                }

                for row in 0..record.len as i64 {
                    let ts_offset = record.num as usize * block_size + row as usize * ts_stride;
                    let ts_bytes = &ts_file.as_slice()[ts_offset..ts_offset + ts_stride];
                    let ts = i64::from_le_bytes(ts_bytes.try_into().unwrap());
                    if ts < self.ts_from || ts >= self.ts_to {
                        continue;
                    }

                    let symbol = self.table.symbol_name(record.symbol)?.to_string();
                    let mut values = Vec::with_capacity(col_files.len());
                    for (file, stride, blk_size) in &col_files {
                        let off = record.num as usize * blk_size + row as usize * stride;
                        values.push(file.as_slice()[off..off + stride].to_vec());
                    }
                    self.pending.push_back(Row { ts, symbol, values });
                }
            }

            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<'a> Iterator for TableIter<'a> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            match self.load_next_partition() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Convenience entry point: `table_iter(table, symbols?, ts_from, ts_to,
/// columns[])`.
pub fn table_iter<'a>(
    table: &'a Table,
    symbols: Option<&[&str]>,
    ts_from: i64,
    ts_to: i64,
    columns: &[&str],
) -> Result<TableIter<'a>> {
    TableIter::new(table, symbols, ts_from, ts_to, columns)
}
