use std::sync::Arc;

use chrono::NaiveDateTime;

use super::{
    error::StoreError,
    schema::TableDef,
    slot::SlotHandle,
    table::Table,
    value::Value,
    Result,
};

/// Where a committed record lives and the values its index entries were built from
#[derive(Debug, Clone)]
pub(crate) struct Stored {
    pub handle: SlotHandle,
    pub values: Vec<Value>,
}

/// One row of a table.
///
/// Changes made with [set_value](Record::set_value) have no durable effect
/// until [commit](Record::commit).
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) def: Arc<TableDef>,
    pub(crate) id: u32,
    pub(crate) values: Vec<Value>,
    pub(crate) assigned: Vec<bool>,
    pub(crate) stored: Option<Stored>,
}

impl Record {
    pub(crate) fn new(def: Arc<TableDef>, id: u32) -> Self {
        let values = def.columns().iter().map(|c| c.kind.default_value()).collect();
        let assigned = vec![false; def.columns().len()];

        Self {
            def,
            id,
            values,
            assigned,
            stored: None,
        }
    }

    pub(crate) fn loaded(
        def: Arc<TableDef>,
        id: u32,
        values: Vec<Value>,
        handle: SlotHandle,
    ) -> Self {
        let assigned = vec![true; values.len()];

        Self {
            def,
            id,
            stored: Some(Stored {
                handle,
                values: values.clone(),
            }),
            values,
            assigned,
        }
    }

    /// Identifier assigned at creation; never reused within the table
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn table_name(&self) -> &str {
        self.def.name()
    }

    pub fn is_committed(&self) -> bool {
        self.stored.is_some()
    }

    pub(crate) fn slot_index(&self) -> u32 {
        self.stored.as_ref().map_or(u32::MAX, |s| s.handle.index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal)
    }

    pub fn int_value(&self, ordinal: usize) -> Option<i32> {
        self.value(ordinal).and_then(Value::as_int)
    }

    pub fn string_value(&self, ordinal: usize) -> Option<&str> {
        self.value(ordinal).and_then(Value::as_str)
    }

    pub fn datetime_value(&self, ordinal: usize) -> Option<NaiveDateTime> {
        self.value(ordinal).and_then(Value::as_datetime)
    }

    /// Assigns a field, checking it against the column's type
    pub fn set_value(&mut self, ordinal: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let column = self
            .def
            .column(ordinal)
            .ok_or_else(|| StoreError::NoSuchColumn(format!("{}#{ordinal}", self.def.name())))?;

        if column.kind != value.column_type() {
            return Err(StoreError::TypeMismatch {
                column: column.name.clone(),
                expected: column.kind.name(),
                found: value.column_type().name(),
            });
        }

        self.values[ordinal] = value;
        self.assigned[ordinal] = true;
        Ok(())
    }

    /// Writes the record and updates every index of `table`
    pub fn commit(&mut self, table: &mut Table) -> Result<()> {
        table.commit_record(self)
    }

    /// Removes the record from `table` and all of its indexes
    pub fn delete(self, table: &mut Table) -> Result<()> {
        table.delete_record(&self)
    }

    /// Fails if a non-nullable column was never assigned
    pub(crate) fn check_assigned(&self) -> Result<()> {
        match self
            .def
            .columns()
            .iter()
            .find(|c| !c.nullable && !self.assigned[c.ordinal])
        {
            Some(column) => Err(StoreError::MissingValue(column.name.clone())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.id)?;
        for (column, value) in self.def.columns().iter().zip(self.values.iter()) {
            write!(f, " {}={}", column.name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::value::ColumnType;

    fn def() -> Arc<TableDef> {
        let mut def = TableDef::new("Mail");
        def.create_column("Id", ColumnType::Integer, false).unwrap();
        def.create_column("Subject", ColumnType::String, true)
            .unwrap();
        def.create_column("Received", ColumnType::DateTime, true)
            .unwrap();
        Arc::new(def)
    }

    #[test]
    fn new_record_starts_with_defaults() {
        let record = Record::new(def(), 3);
        assert_eq!(record.id(), 3);
        assert_eq!(record.int_value(0), Some(0));
        assert_eq!(record.string_value(1), Some(""));
        assert!(!record.is_committed());
    }

    #[test]
    fn set_value_checks_types() {
        let mut record = Record::new(def(), 0);
        record.set_value(1, "hello").unwrap();
        assert_eq!(record.string_value(1), Some("hello"));

        let res = record.set_value(0, "nope");
        assert!(matches!(res, Err(StoreError::TypeMismatch { .. })));
        assert!(matches!(
            record.set_value(9, 1),
            Err(StoreError::NoSuchColumn(_))
        ));
    }

    #[test]
    fn non_nullable_columns_must_be_assigned() {
        let mut record = Record::new(def(), 0);
        assert!(matches!(
            record.check_assigned(),
            Err(StoreError::MissingValue(name)) if name == "Id"
        ));

        record.set_value(0, 12).unwrap();
        assert!(record.check_assigned().is_ok());
    }

    #[test]
    fn display_lists_fields() {
        let mut record = Record::new(def(), 5);
        record.set_value(0, 12).unwrap();
        record.set_value(1, "hi").unwrap();
        assert!(record
            .to_string()
            .starts_with("5: Id=12 Subject=\"hi\" Received=0001-01-01T00:00:00"));
    }
}
