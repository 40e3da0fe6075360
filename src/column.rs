//! A single growable, memory-mapped column file.

use std::path::PathBuf;

use crate::error::{Result, TdbError};
use crate::mmapfile::MmapFile;
use crate::schema::ColumnDef;
use crate::units::COL_DEFAULT_CAP;

/// A type-homogeneous, headerless array of fixed-stride values backing one
/// column within one partition. No header or magic number is stored; the
/// schema alone determines how to interpret the bytes.
pub struct Column {
    def: ColumnDef,
    file: MmapFile,
}

impl Column {
    /// Opens `path`, creating it sized for `COL_DEFAULT_CAP` rows if new.
    pub fn open(path: impl Into<PathBuf>, def: ColumnDef) -> Result<Column> {
        let path = path.into();
        let initial = COL_DEFAULT_CAP * def.stride as u64;
        let file = MmapFile::open(path, initial)?;
        Ok(Column { def, file })
    }

    pub fn def(&self) -> &ColumnDef {
        &self.def
    }

    /// Row capacity given the current file size.
    pub fn capacity_rows(&self) -> u64 {
        self.file.size() / self.def.stride as u64
    }

    /// Ensures the column can hold `min_rows` rows, doubling capacity until
    /// it can. Any previously borrowed slice into this column must be
    /// reacquired after a growing write, since remapping may relocate the
    /// region.
    pub fn ensure_capacity(&mut self, min_rows: u64) -> Result<()> {
        let mut cap = self.capacity_rows().max(1);
        if min_rows <= cap {
            return Ok(());
        }
        while cap < min_rows {
            cap *= 2;
        }
        self.file.resize(cap * self.def.stride as u64)
    }

    /// Writes `bytes` (exactly one row's worth, `stride` long) at the byte
    /// offset implied by `block_num` and `row_in_block`, per the placement
    /// formula `offset = block_num * block_size + row_in_block * stride`.
    pub fn write_row_bytes(&mut self, block_num: i64, row_in_block: i64, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.def.stride as usize {
            return Err(TdbError::InvalidArgument(format!(
                "column {} expects {}-byte rows, got {}",
                self.def.name,
                self.def.stride,
                bytes.len()
            )));
        }
        let offset = block_num as u64 * self.def.block_size as u64 + row_in_block as u64 * self.def.stride as u64;
        let end = offset + self.def.stride as u64;
        self.ensure_capacity((end + self.def.stride as u64 - 1) / self.def.stride as u64)?;

        let start = offset as usize;
        let slice = self
            .file
            .as_mut_slice()
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| TdbError::InvalidArgument(format!("column write offset {offset} out of range")))?;
        slice.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_row_bytes(&self, block_num: i64, row_in_block: i64) -> Result<&[u8]> {
        let offset = block_num as u64 * self.def.block_size as u64 + row_in_block as u64 * self.def.stride as u64;
        let start = offset as usize;
        self.file
            .as_slice()
            .get(start..start + self.def.stride as usize)
            .ok_or_else(|| TdbError::InvalidArgument(format!("column read offset {offset} out of range")))
    }

    /// `msync`s without closing, leaving the column open for further writes.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.file.flush()
    }

    pub fn close(self) -> Result<()> {
        self.file.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;
    use tempfile::TempDir;

    fn float_def() -> ColumnDef {
        let mut schema = crate::schema::Schema::init(
            "trades",
            "%Y/%m/%d",
            ColumnType::Symbol16,
            "us_equities",
        )
        .unwrap();
        schema.add(ColumnType::Float, "price").unwrap();
        schema.column("price").unwrap().clone()
    }

    #[test]
    fn write_then_read_row_round_trips() {
        let dir = TempDir::new().unwrap();
        let def = float_def();
        let mut col = Column::open(dir.path().join("price.f32"), def).unwrap();

        let value: f32 = 123.5;
        col.write_row_bytes(0, 0, &value.to_le_bytes()).unwrap();
        col.write_row_bytes(0, 1, &250.0f32.to_le_bytes()).unwrap();

        let back = f32::from_le_bytes(col.read_row_bytes(0, 0).unwrap().try_into().unwrap());
        assert_eq!(back, value);
        let back2 = f32::from_le_bytes(col.read_row_bytes(0, 1).unwrap().try_into().unwrap());
        assert_eq!(back2, 250.0);
    }

    #[test]
    fn ensure_capacity_doubles_until_sufficient() {
        let dir = TempDir::new().unwrap();
        let def = float_def();
        let mut col = Column::open(dir.path().join("price.f32"), def).unwrap();
        let starting_cap = col.capacity_rows();

        col.ensure_capacity(starting_cap + 1).unwrap();
        assert!(col.capacity_rows() >= starting_cap + 1);
        assert_eq!(col.capacity_rows() % starting_cap, 0);
    }

    #[test]
    fn write_wrong_stride_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let def = float_def();
        let mut col = Column::open(dir.path().join("price.f32"), def).unwrap();
        assert!(col.write_row_bytes(0, 0, &[0u8; 3]).is_err());
    }

    #[test]
    fn writes_into_second_block_land_past_block_size() {
        let dir = TempDir::new().unwrap();
        let def = float_def();
        let block_size = def.block_size as i64;
        let mut col = Column::open(dir.path().join("price.f32"), def).unwrap();

        col.write_row_bytes(1, 0, &7.0f32.to_le_bytes()).unwrap();
        let back = f32::from_le_bytes(col.read_row_bytes(1, 0).unwrap().try_into().unwrap());
        assert_eq!(back, 7.0);
        assert!(col.capacity_rows() as i64 * 4 >= block_size);
    }
}
