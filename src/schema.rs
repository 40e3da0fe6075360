//! Column types and the immutable per-table schema.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, TdbError};
use crate::units::kib;

/// A closed enumeration of fixed-width scalar column types.
///
/// `Timestamp` is a placeholder the caller must never actually use for a
/// column stride or extension lookup; it exists only so callers can name
/// "a timestamp of unspecified width" conceptually before picking one of the
/// concrete `Timestamp*` variants. [`ColumnType::stride`] and
/// [`ColumnType::extension`] both reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ColumnType {
    Timestamp = 0,
    Timestamp8 = 1,
    Timestamp16 = 2,
    Timestamp32 = 3,
    Timestamp64 = 4,
    Symbol8 = 5,
    Symbol16 = 6,
    Symbol32 = 7,
    Symbol64 = 8,
    Currency = 9,
    Int8 = 10,
    Int16 = 11,
    Int32 = 12,
    Int64 = 13,
    Uint8 = 14,
    Uint16 = 15,
    Uint32 = 16,
    Uint64 = 17,
    Float = 18,
    Double = 19,
}

impl ColumnType {
    /// Stride in bytes.
    pub fn stride(self) -> Result<u32> {
        use ColumnType::*;
        Ok(match self {
            Timestamp8 | Int8 | Uint8 | Symbol8 => 1,
            Timestamp16 | Int16 | Uint16 | Symbol16 => 2,
            Timestamp32 | Int32 | Uint32 | Float | Symbol32 => 4,
            Timestamp64 | Int64 | Uint64 | Double | Currency | Symbol64 => 8,
            Timestamp => {
                return Err(TdbError::InvalidArgument(
                    "TIMESTAMP is a placeholder; use a concrete TIMESTAMP{8,16,32,64}".into(),
                ));
            }
        })
    }

    /// Two/three-character filename extension tag, pattern `{i,u,f,s,c}<bits>`.
    /// Timestamp columns reuse the integer tag since their on-disk
    /// representation is a plain signed integer count of time units.
    pub fn extension(self) -> Result<&'static str> {
        use ColumnType::*;
        Ok(match self {
            Timestamp8 | Int8 => "i8",
            Uint8 => "u8",
            Symbol8 => "s8",
            Timestamp16 | Int16 => "i16",
            Uint16 => "u16",
            Symbol16 => "s16",
            Timestamp32 | Int32 => "i32",
            Uint32 => "u32",
            Float => "f32",
            Symbol32 => "s32",
            Timestamp64 | Int64 => "i64",
            Uint64 => "u64",
            Double => "f64",
            Currency => "c64",
            Symbol64 => "s64",
            Timestamp => {
                return Err(TdbError::InvalidArgument(
                    "TIMESTAMP is a placeholder; use a concrete TIMESTAMP{8,16,32,64}".into(),
                ));
            }
        })
    }

    pub fn is_symbol(self) -> bool {
        matches!(
            self,
            ColumnType::Symbol8 | ColumnType::Symbol16 | ColumnType::Symbol32 | ColumnType::Symbol64
        )
    }

    fn to_ordinal(self) -> u32 {
        self as u32
    }

    fn from_ordinal(v: u32) -> Option<ColumnType> {
        use ColumnType::*;
        Some(match v {
            0 => Timestamp,
            1 => Timestamp8,
            2 => Timestamp16,
            3 => Timestamp32,
            4 => Timestamp64,
            5 => Symbol8,
            6 => Symbol16,
            7 => Symbol32,
            8 => Symbol64,
            9 => Currency,
            10 => Int8,
            11 => Int16,
            12 => Int32,
            13 => Int64,
            14 => Uint8,
            15 => Uint16,
            16 => Uint32,
            17 => Uint64,
            18 => Float,
            19 => Double,
            _ => return None,
        })
    }
}

/// Block size by stride: `{1B->16KiB, 2B->32KiB, 4B->64KiB, 8B->128KiB}`.
/// Invariant per column for the life of the table.
pub fn block_size_for_stride(stride: u32) -> u32 {
    (kib(16) as u32) * stride
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub stride: u32,
    pub block_size: u32,
}

impl ColumnDef {
    fn new(name: impl Into<String>, col_type: ColumnType) -> Result<Self> {
        let stride = col_type.stride()?;
        Ok(ColumnDef {
            name: name.into(),
            col_type,
            stride,
            block_size: block_size_for_stride(stride),
        })
    }

    /// Rows that fit in one block of this column.
    pub fn rows_per_block(&self) -> u64 {
        self.block_size as u64 / self.stride as u64
    }
}

/// Immutable after creation. The first column is always the
/// timestamp column, `TIMESTAMP64`, inserted by [`Schema::init`].
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub partition_fmt: String,
    pub ts_name: String,
    pub sym_name: String,
    pub sym_type: ColumnType,
    pub sym_universe: String,
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    /// Creates a schema with a single implicit `ts: TIMESTAMP64` column.
    ///
    /// Fails with `InvalidArgument` if `sym_type` is not one of
    /// `SYMBOL{8,16,32,64}`.
    pub fn init(
        name: impl Into<String>,
        partition_fmt: impl Into<String>,
        sym_type: ColumnType,
        sym_universe: impl Into<String>,
    ) -> Result<Schema> {
        if !sym_type.is_symbol() {
            return Err(TdbError::InvalidArgument(format!(
                "sym_type must be one of SYMBOL{{8,16,32,64}}, got {sym_type:?}"
            )));
        }

        let ts_col = ColumnDef::new("ts", ColumnType::Timestamp64)?;

        Ok(Schema {
            name: name.into(),
            partition_fmt: partition_fmt.into(),
            ts_name: "ts".to_string(),
            sym_name: "sym".to_string(),
            sym_type,
            sym_universe: sym_universe.into(),
            columns: vec![ts_col],
        })
    }

    /// Appends a column with the given concrete type. Fails if `col_type`
    /// is the `TIMESTAMP` placeholder, or if `name` duplicates an existing
    /// column name.
    pub fn add(&mut self, col_type: ColumnType, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.columns.iter().any(|c| c.name == name) {
            return Err(TdbError::InvalidArgument(format!(
                "duplicate column name: {name}"
            )));
        }
        let col = ColumnDef::new(name, col_type)?;
        self.columns.push(col);
        Ok(())
    }

    pub fn min_stride(&self) -> u32 {
        self.columns.iter().map(|c| c.stride).min().unwrap_or(1)
    }

    pub fn max_stride(&self) -> u32 {
        self.columns.iter().map(|c| c.stride).max().unwrap_or(1)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Writes the schema as a section-prefixed key/value text file: a
    /// top-level `[schema]` section and one `[schema.column.<name>]`
    /// section per column, in declaration order.
    pub fn serialize(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("[schema]\n");
        out.push_str(&format!("name = {}\n", self.name));
        out.push_str(&format!("ts_name = {}\n", self.ts_name));
        out.push_str(&format!("partition_fmt = {}\n", self.partition_fmt));
        out.push_str(&format!("sym_name = {}\n", self.sym_name));
        out.push_str(&format!("sym_universe = {}\n", self.sym_universe));
        out.push_str(&format!("sym_type = {}\n", self.sym_type.to_ordinal()));

        for col in &self.columns {
            out.push_str(&format!("\n[schema.column.{}]\n", col.name));
            out.push_str(&format!("type = {}\n", col.col_type.to_ordinal()));
            out.push_str(&format!("stride = {}\n", col.stride));
            out.push_str(&format!("block_size = {}\n", col.block_size));
        }

        let mut file = fs::File::create(path).map_err(|e| TdbError::io(path, e))?;
        file.write_all(out.as_bytes())
            .map_err(|e| TdbError::io(path, e))?;
        file.sync_all().map_err(|e| TdbError::io(path, e))?;
        Ok(())
    }

    /// Reads a schema file written by [`Schema::serialize`].
    pub fn deserialize(path: &Path) -> Result<Schema> {
        let content = fs::read_to_string(path).map_err(|e| TdbError::io(path, e))?;

        let mut section: Option<String> = None;
        let mut top: std::collections::HashMap<String, String> = std::collections::HashMap::new();
        let mut column_order: Vec<String> = Vec::new();
        let mut columns: std::collections::HashMap<String, std::collections::HashMap<String, String>> =
            std::collections::HashMap::new();

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].to_string();
                if let Some(col_name) = name.strip_prefix("schema.column.") {
                    column_order.push(col_name.to_string());
                    columns.entry(col_name.to_string()).or_default();
                }
                section = Some(name);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_string();
            let value = value.trim().to_string();

            match &section {
                Some(s) if s == "schema" => {
                    top.insert(key, value);
                }
                Some(s) => {
                    if let Some(col_name) = s.strip_prefix("schema.column.") {
                        columns.entry(col_name.to_string()).or_default().insert(key, value);
                    }
                }
                None => {}
            }
        }

        let get = |key: &str| -> Result<String> {
            top.get(key)
                .cloned()
                .ok_or_else(|| TdbError::corrupt(path, format!("missing key [schema].{key}")))
        };

        let sym_type_ord: u32 = get("sym_type")?
            .parse()
            .map_err(|_| TdbError::corrupt(path, "sym_type is not an integer"))?;
        let sym_type = ColumnType::from_ordinal(sym_type_ord)
            .ok_or_else(|| TdbError::corrupt(path, "unknown sym_type ordinal"))?;

        let mut cols = Vec::with_capacity(column_order.len());
        for col_name in &column_order {
            let section = columns
                .get(col_name)
                .ok_or_else(|| TdbError::corrupt(path, format!("missing column section {col_name}")))?;
            let type_ord: u32 = section
                .get("type")
                .ok_or_else(|| TdbError::corrupt(path, format!("column {col_name} missing type")))?
                .parse()
                .map_err(|_| TdbError::corrupt(path, format!("column {col_name} type not an integer")))?;
            let col_type = ColumnType::from_ordinal(type_ord)
                .ok_or_else(|| TdbError::corrupt(path, format!("column {col_name} unknown type ordinal")))?;
            let stride: u32 = section
                .get("stride")
                .ok_or_else(|| TdbError::corrupt(path, format!("column {col_name} missing stride")))?
                .parse()
                .map_err(|_| TdbError::corrupt(path, format!("column {col_name} stride not an integer")))?;
            let block_size: u32 = section
                .get("block_size")
                .ok_or_else(|| TdbError::corrupt(path, format!("column {col_name} missing block_size")))?
                .parse()
                .map_err(|_| TdbError::corrupt(path, format!("column {col_name} block_size not an integer")))?;

            cols.push(ColumnDef {
                name: col_name.clone(),
                col_type,
                stride,
                block_size,
            });
        }

        Ok(Schema {
            name: get("name")?,
            partition_fmt: get("partition_fmt")?,
            ts_name: get("ts_name")?,
            sym_name: get("sym_name")?,
            sym_type,
            sym_universe: get("sym_universe")?,
            columns: cols,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stride_table_matches_spec() {
        use ColumnType::*;
        for t in [Timestamp8, Int8, Uint8, Symbol8] {
            assert_eq!(t.stride().unwrap(), 1);
        }
        for t in [Timestamp16, Int16, Uint16, Symbol16] {
            assert_eq!(t.stride().unwrap(), 2);
        }
        for t in [Timestamp32, Int32, Uint32, Float, Symbol32] {
            assert_eq!(t.stride().unwrap(), 4);
        }
        for t in [Timestamp64, Int64, Uint64, Double, Currency, Symbol64] {
            assert_eq!(t.stride().unwrap(), 8);
        }
        assert!(Timestamp.stride().is_err());
    }

    #[test]
    fn extension_suffix_is_8x_stride() {
        use ColumnType::*;
        for (t, ext) in [
            (Int8, "i8"),
            (Uint16, "u16"),
            (Symbol32, "s32"),
            (Currency, "c64"),
            (Float, "f32"),
            (Double, "f64"),
        ] {
            let tag = t.extension().unwrap();
            assert_eq!(tag, ext);
            let digits: String = tag.chars().filter(|c| c.is_ascii_digit()).collect();
            let bits: u32 = digits.parse().unwrap();
            assert_eq!(bits, 8 * t.stride().unwrap());
        }
    }

    #[test]
    fn schema_rejects_non_symbol_sym_type() {
        let res = Schema::init("trades", "%Y/%m/%d", ColumnType::Int32, "us_equities");
        assert!(res.is_err());
    }

    #[test]
    fn schema_add_rejects_duplicate_and_placeholder() {
        let mut s = Schema::init("trades", "%Y/%m/%d", ColumnType::Symbol16, "us_equities").unwrap();
        s.add(ColumnType::Float, "price").unwrap();
        assert!(s.add(ColumnType::Int32, "price").is_err());
        assert!(s.add(ColumnType::Timestamp, "oops").is_err());
    }

    #[test]
    fn schema_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut s = Schema::init("trades", "%Y/%m/%d", ColumnType::Symbol16, "us_equities").unwrap();
        s.add(ColumnType::Float, "price").unwrap();
        s.add(ColumnType::Uint32, "size").unwrap();

        let path = dir.path().join("_schema");
        s.serialize(&path).unwrap();
        let back = Schema::deserialize(&path).unwrap();

        assert_eq!(back.partition_fmt, s.partition_fmt);
        assert_eq!(back.ts_name, s.ts_name);
        assert_eq!(back.sym_name, s.sym_name);
        assert_eq!(back.sym_universe, s.sym_universe);
        assert_eq!(back.sym_type, s.sym_type);
        assert_eq!(back.columns.len(), s.columns.len());
        for (a, b) in back.columns.iter().zip(s.columns.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.col_type, b.col_type);
            assert_eq!(a.stride, b.stride);
            assert_eq!(a.block_size, b.block_size);
        }
    }

    #[test]
    fn block_size_by_stride() {
        assert_eq!(block_size_for_stride(1), 16 * 1024);
        assert_eq!(block_size_for_stride(2), 32 * 1024);
        assert_eq!(block_size_for_stride(4), 64 * 1024);
        assert_eq!(block_size_for_stride(8), 128 * 1024);
    }
}
