mod repl;
mod storage;

pub use repl::*;
pub use storage::{
    Column, ColumnType, CountedResultSet, Database, IndexDef, Options, RebuildReport,
    Record, ResultSet, StoreError, Structure, Table, TableDef, Value,
};

/// On-disk layout constants, exposed for tooling that inspects raw files.
pub mod layout {
    pub use crate::storage::layout::*;
}

macro_rules! calculate_offsets {
    ($start:ident, $size:ident) => {{
        let start = $start;
        let end = start + $size;
        (start, end)
    }};
}

pub(crate) use calculate_offsets;
