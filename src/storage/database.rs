use log::debug;

use super::{error::StoreError, table::Table, Result};

/// The open tables of a loaded structure
pub struct Database {
    name: String,
    tables: Vec<Table>,
}

impl Database {
    pub(crate) fn new(name: String, tables: Vec<Table>) -> Self {
        Self { name, tables }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| StoreError::NoSuchTable(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| t.name() == name)
            .ok_or_else(|| StoreError::NoSuchTable(name.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn tables_mut(&mut self) -> impl Iterator<Item = &mut Table> {
        self.tables.iter_mut()
    }

    pub fn is_dirty(&self) -> bool {
        self.tables.iter().any(Table::is_dirty)
    }

    /// Writes pending changes of every table and its indexes
    pub fn flush(&mut self) -> Result<()> {
        for table in self.tables.iter_mut() {
            table.flush()?;
        }
        debug!("flushed database {}", self.name);
        Ok(())
    }
}
