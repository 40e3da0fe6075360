//! An embeddable, memory-mapped time-series storage engine for tick data:
//! fixed-width columns, strftime-named partitions, and a per-partition
//! block index for `(symbol, time)` lookup. See each module for the
//! component it implements.

mod blockpool;
mod column;
mod error;
mod iter;
mod mmapfile;
mod partition;
mod schema;
mod symbol;
mod table;
mod timeutil;
mod units;

pub use error::{Result, TdbError};
pub use iter::{table_iter, Row, TableIter};
pub use schema::{ColumnDef, ColumnType, Schema};
pub use table::{Table, Value};
pub use units::Nanos;

/// End-to-end scenarios exercising the full write -> rotate -> reopen ->
/// read path across the public surface, one test per scenario.
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DAY_NANOS: i64 = 86_400_000_000_000;

    fn trades_schema() -> Schema {
        let mut s = Schema::init("trades", "%Y.%m.%d", ColumnType::Symbol32, "us_equities").unwrap();
        s.add(ColumnType::Float, "price").unwrap();
        s.add(ColumnType::Uint32, "size").unwrap();
        s
    }

    // E1: a freshly initialized table accepts writes, and a checkpointed
    // row becomes readable once the table is closed and reopened.
    #[test]
    fn e1_init_write_flush_read() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::init(dir.path(), trades_schema()).unwrap();
        table
            .write_row("AAPL", 10 * DAY_NANOS + 123, &[("price", Value::F32(190.0)), ("size", Value::U32(50))])
            .unwrap();
        table.flush().unwrap();
        table.close().unwrap();

        let reopened = Table::open(dir.path(), "trades").unwrap();
        let rows: Vec<Row> = table_iter(&reopened, None, 0, 20 * DAY_NANOS, &["price", "size"])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "AAPL");
        assert_eq!(rows[0].ts, 10 * DAY_NANOS + 123);
    }

    // E2: many rows for the same symbol within a partition spill across
    // multiple blocks once the first is full, and all remain readable.
    #[test]
    fn e2_block_spill_within_a_partition() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::init(dir.path(), trades_schema()).unwrap();

        let n = 20_000i64;
        for i in 0..n {
            table
                .write_row(
                    "AAPL",
                    10 * DAY_NANOS + i,
                    &[("price", Value::F32(i as f32)), ("size", Value::U32(1))],
                )
                .unwrap();
        }
        table.close().unwrap();

        let reopened = Table::open(dir.path(), "trades").unwrap();
        let rows: Vec<Row> = table_iter(&reopened, None, 0, 20 * DAY_NANOS, &["price"])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), n as usize);
    }

    // E3: writes that cross a day boundary rotate into a second partition
    // directory; closing the table commits whichever one is still open.
    #[test]
    fn e3_day_boundary_rotates_partitions() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::init(dir.path(), trades_schema()).unwrap();

        table
            .write_row("AAPL", 10 * DAY_NANOS + 1, &[("price", Value::F32(1.0)), ("size", Value::U32(1))])
            .unwrap();
        table
            .write_row("AAPL", 12 * DAY_NANOS + 1, &[("price", Value::F32(2.0)), ("size", Value::U32(2))])
            .unwrap();
        table.close().unwrap();

        let dirs: Vec<_> = std::fs::read_dir(dir.path().join("trades"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert_eq!(dirs.len(), 2);
        for d in &dirs {
            assert!(d.path().join("_blocks").exists());
        }
    }

    // E4: interleaved symbols keep independent block streams and both
    // remain queryable by name.
    #[test]
    fn e4_interleaved_symbols_stay_independent() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::init(dir.path(), trades_schema()).unwrap();

        for i in 0..10i64 {
            table
                .write_row("AAPL", 10 * DAY_NANOS + i * 2, &[("price", Value::F32(i as f32)), ("size", Value::U32(1))])
                .unwrap();
            table
                .write_row("MSFT", 10 * DAY_NANOS + i * 2 + 1, &[("price", Value::F32(-(i as f32))), ("size", Value::U32(2))])
                .unwrap();
        }
        table.close().unwrap();

        let reopened = Table::open(dir.path(), "trades").unwrap();
        let aapl: Vec<Row> = table_iter(&reopened, Some(&["AAPL"]), 0, 20 * DAY_NANOS, &["price"])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let msft: Vec<Row> = table_iter(&reopened, Some(&["MSFT"]), 0, 20 * DAY_NANOS, &["price"])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(aapl.len(), 10);
        assert_eq!(msft.len(), 10);
    }

    // E5: a process restart resumes the uncommitted partition, preserving
    // symbol ids and letting writes continue into the same blocks.
    #[test]
    fn e5_resume_after_restart_preserves_symbol_ids() {
        let dir = TempDir::new().unwrap();
        {
            let mut table = Table::init(dir.path(), trades_schema()).unwrap();
            table
                .write_row("AAPL", 10 * DAY_NANOS + 1, &[("price", Value::F32(1.0)), ("size", Value::U32(1))])
                .unwrap();
            // Process "crashes": no flush/close call, pool stays unsorted.
        }

        let mut reopened = Table::open(dir.path(), "trades").unwrap();
        assert_eq!(reopened.symbol_id("AAPL").unwrap(), 1);
        reopened
            .write_row("AAPL", 10 * DAY_NANOS + 2, &[("price", Value::F32(2.0)), ("size", Value::U32(2))])
            .unwrap();
        reopened.close().unwrap();

        let twice_reopened = Table::open(dir.path(), "trades").unwrap();
        let rows: Vec<Row> = table_iter(&twice_reopened, None, 0, 20 * DAY_NANOS, &["price"])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    // E6: a query range outside every committed partition's bounds returns
    // no rows, rather than an error.
    #[test]
    fn e6_query_outside_all_partitions_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::init(dir.path(), trades_schema()).unwrap();
        table
            .write_row("AAPL", 10 * DAY_NANOS + 1, &[("price", Value::F32(1.0)), ("size", Value::U32(1))])
            .unwrap();
        table.close().unwrap();

        let reopened = Table::open(dir.path(), "trades").unwrap();
        let rows: Vec<Row> = table_iter(&reopened, None, 100 * DAY_NANOS, 101 * DAY_NANOS, &["price"])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert!(rows.is_empty());
    }
}
