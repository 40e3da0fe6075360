//! The table engine: schema, symbol interner, and the currently open
//! partition, tied together behind a typed row-write API.
//!
//! Writes take column names alongside every value, so a caller whose
//! column order doesn't match the schema gets a named `InvalidArgument`
//! rather than a value silently landing in the wrong column.

use std::path::{Path, PathBuf};

use crate::error::{Result, TdbError};
use crate::partition::Partition;
use crate::schema::{ColumnType, Schema};
use crate::symbol::SymbolInterner;
use crate::timeutil;

const SCHEMA_FILE_NAME: &str = "_schema";

/// A single scalar value to write into one named column. The variant must
/// match the column's declared `ColumnType` exactly; no implicit
/// widening/narrowing is performed.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Value {
    fn matches(&self, col_type: ColumnType) -> bool {
        use ColumnType::*;
        matches!(
            (self, col_type),
            (Value::I8(_), Int8)
                | (Value::I16(_), Int16)
                | (Value::I32(_), Int32)
                | (Value::I64(_), Int64 | Currency)
                | (Value::U8(_), Uint8)
                | (Value::U16(_), Uint16)
                | (Value::U32(_), Uint32)
                | (Value::U64(_), Uint64)
                | (Value::F32(_), Float)
                | (Value::F64(_), Double)
        )
    }

    fn to_le_bytes(self) -> Vec<u8> {
        match self {
            Value::I8(v) => v.to_le_bytes().to_vec(),
            Value::I16(v) => v.to_le_bytes().to_vec(),
            Value::I32(v) => v.to_le_bytes().to_vec(),
            Value::I64(v) => v.to_le_bytes().to_vec(),
            Value::U8(v) => v.to_le_bytes().to_vec(),
            Value::U16(v) => v.to_le_bytes().to_vec(),
            Value::U32(v) => v.to_le_bytes().to_vec(),
            Value::U64(v) => v.to_le_bytes().to_vec(),
            Value::F32(v) => v.to_le_bytes().to_vec(),
            Value::F64(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// Encodes a 1-based interned symbol id into `stride` little-endian bytes,
/// the width declared by the schema's `sym_type`. The symbol column stores
/// the interned id per row, the same as any other column.
fn encode_symbol_id(id: i32, stride: u32) -> Result<Vec<u8>> {
    match stride {
        1 => {
            let v: u8 = id
                .try_into()
                .map_err(|_| TdbError::InvalidArgument(format!("symbol id {id} does not fit in SYMBOL8")))?;
            Ok(v.to_le_bytes().to_vec())
        }
        2 => {
            let v: u16 = id
                .try_into()
                .map_err(|_| TdbError::InvalidArgument(format!("symbol id {id} does not fit in SYMBOL16")))?;
            Ok(v.to_le_bytes().to_vec())
        }
        4 => Ok((id as u32).to_le_bytes().to_vec()),
        8 => Ok((id as u64).to_le_bytes().to_vec()),
        _ => Err(TdbError::InvalidArgument(format!("unsupported symbol stride {stride}"))),
    }
}

pub struct Table {
    dir: PathBuf,
    schema: Schema,
    symbols: SymbolInterner,
    partition: Option<Partition>,
}

impl Table {
    /// Creates a new table directory under `root`, writing the schema file
    /// and opening a fresh (empty) symbol interner.
    pub fn init(root: &Path, schema: Schema) -> Result<Table> {
        let dir = root.join(&schema.name);
        std::fs::create_dir_all(&dir).map_err(|e| TdbError::io(&dir, e))?;
        schema.serialize(&dir.join(SCHEMA_FILE_NAME))?;

        let sym_ext = schema.sym_type.extension()?;
        let sym_path = dir.join(format!("{}.{}", schema.sym_universe, sym_ext));
        let symbols = SymbolInterner::open(sym_path)?;

        Ok(Table {
            dir,
            schema,
            symbols,
            partition: None,
        })
    }

    /// Reopens an existing table directory, replaying the symbol file and
    /// resuming whichever partition, if any, was left uncommitted.
    pub fn open(root: &Path, name: &str) -> Result<Table> {
        let dir = root.join(name);
        let schema = Schema::deserialize(&dir.join(SCHEMA_FILE_NAME))?;

        let sym_ext = schema.sym_type.extension()?;
        let sym_path = dir.join(format!("{}.{}", schema.sym_universe, sym_ext));
        let symbols = SymbolInterner::open(sym_path)?;

        let mut partition = None;
        for entry in std::fs::read_dir(&dir).map_err(|e| TdbError::io(&dir, e))? {
            let entry = entry.map_err(|e| TdbError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !path.join("_blocks.unsorted").exists() {
                continue;
            }
            let part_name = entry.file_name().to_string_lossy().to_string();
            let peek = crate::blockpool::BlockPool::open(path.join("_blocks.unsorted"))?;
            if let Some(sample) = peek.live_records().first().map(|r| r.ts_min) {
                let ts_min = timeutil::min_partition_ts(&schema.partition_fmt, sample)?;
                let ts_max = timeutil::max_partition_ts(&schema.partition_fmt, sample)?;
                partition = Some(Partition::open_existing(&dir, &part_name, ts_min, ts_max, &schema)?);
            }
            break;
        }

        Ok(Table {
            dir,
            schema,
            symbols,
            partition,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensures a partition covering `ts` is open, rotating the previous
    /// one (if any, and if it doesn't already cover `ts`).
    fn partition_for(&mut self, ts: i64) -> Result<&mut Partition> {
        let needs_rotation = match &self.partition {
            Some(p) => !p.contains(ts),
            None => true,
        };

        if needs_rotation {
            if let Some(old) = self.partition.take() {
                old.close()?;
            }
            let name = timeutil::render_partition_name(&self.schema.partition_fmt, ts)?;
            let ts_min = timeutil::min_partition_ts(&self.schema.partition_fmt, ts)?;
            let ts_max = timeutil::max_partition_ts(&self.schema.partition_fmt, ts)?;
            let part = Partition::create(&self.dir, &name, ts_min, ts_max, &self.schema)?;
            self.partition = Some(part);
        }

        Ok(self.partition.as_mut().expect("just ensured"))
    }

    /// Writes one row: interns `symbol`, allocates its block, and writes
    /// `ts`, the symbol id, and every entry of `values` into their named
    /// columns. `values` must name exactly the schema's non-`ts`,
    /// non-symbol columns, each with a matching `Value` variant.
    pub fn write_row(&mut self, symbol: &str, ts: i64, values: &[(&str, Value)]) -> Result<()> {
        let expected: Vec<&str> = self
            .schema
            .columns
            .iter()
            .filter(|c| c.name != self.schema.ts_name)
            .map(|c| c.name.as_str())
            .collect();
        if values.len() != expected.len() {
            return Err(TdbError::InvalidArgument(format!(
                "expected {} value column(s), got {}",
                expected.len(),
                values.len()
            )));
        }
        for (name, value) in values {
            let col = self
                .schema
                .column(name)
                .ok_or_else(|| TdbError::InvalidArgument(format!("no such column {name}")))?;
            if !value.matches(col.col_type) {
                return Err(TdbError::InvalidArgument(format!(
                    "value for column {name} does not match its declared type"
                )));
            }
        }

        let symbol_id = self.symbols.intern(symbol)?;
        let sym_name = self.schema.sym_name.clone();
        let ts_name = self.schema.ts_name.clone();
        let sym_stride = self.schema.sym_type.stride()?;

        let partition = self.partition_for(ts)?;
        let (block, row) = partition.allocate_row(symbol_id, ts)?;

        partition.write_row_bytes(&ts_name, block, row, &ts.to_le_bytes())?;
        partition.write_row_bytes(&sym_name, block, row, &encode_symbol_id(symbol_id, sym_stride)?)?;
        for (name, value) in values {
            partition.write_row_bytes(name, block, row, &value.to_le_bytes())?;
        }
        Ok(())
    }

    /// Looks up a symbol's dense id without interning it if absent.
    pub fn symbol_id(&self, symbol: &str) -> Result<i32> {
        self.symbols
            .lookup_by_name(symbol)
            .ok_or_else(|| TdbError::NotFound(format!("unknown symbol {symbol}")))
    }

    pub fn symbol_name(&self, id: i32) -> Result<&str> {
        self.symbols.lookup(id)
    }

    /// Durability checkpoint: `msync`s the current partition's columns and
    /// unsorted block pool, but leaves it open. A caller that writes again
    /// into the same time window afterward resumes the same partition and
    /// blocks, rather than rotating into a fresh, conflicting one.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(p) = &mut self.partition {
            p.checkpoint()?;
        }
        Ok(())
    }

    /// Closes the table: commits the current partition's sorted block
    /// index (if one is open) and consumes `self`. No further writes are
    /// possible afterward.
    pub fn close(mut self) -> Result<()> {
        if let Some(p) = self.partition.take() {
            p.close()?;
        }
        Ok(())
    }
}
