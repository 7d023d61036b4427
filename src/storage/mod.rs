mod codec;
mod cursor;
mod database;
mod error;
mod header;
mod index;
pub(crate) mod layout;
mod page;
mod pager;
mod record;
mod recovery;
mod schema;
mod slot;
mod structure;
mod table;
mod value;

pub use cursor::{CountedResultSet, ResultSet};
pub use database::Database;
pub use error::StoreError;
pub use record::Record;
pub use recovery::RebuildReport;
pub use schema::{Column, IndexDef, TableDef};
pub use structure::{Options, Structure};
pub use table::Table;
pub use value::{ColumnType, Value};

pub type Result<T> = std::result::Result<T, StoreError>;
