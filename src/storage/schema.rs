use super::{error::StoreError, value::ColumnType, Result};

/// Typed field descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ordinal: usize,
    pub kind: ColumnType,
    /// Unset values of a nullable column are stored as the type's default
    pub nullable: bool,
}

/// Index descriptor.
///
/// `keys` is the ordered key tuple. `values` lists the covering columns whose
/// values are inlined at every entry; it is empty for a plain index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexDef {
    pub keys: Vec<usize>,
    pub values: Vec<usize>,
}

impl IndexDef {
    pub fn new(keys: Vec<usize>, values: Vec<usize>) -> Self {
        Self { keys, values }
    }

    pub fn leading_key(&self) -> usize {
        self.keys[0]
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    /// Returns whether `ordinals` is a prefix of this index's key tuple
    pub fn has_key_prefix(&self, ordinals: &[usize]) -> bool {
        !ordinals.is_empty() && self.keys.starts_with(ordinals)
    }
}

/// Definition of a table: its columns and declared indexes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: String,
    columns: Vec<Column>,
    indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub(crate) fn from_parts(name: String, columns: Vec<Column>, indexes: Vec<IndexDef>) -> Self {
        Self {
            name,
            columns,
            indexes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn column(&self, ordinal: usize) -> Option<&Column> {
        self.columns.get(ordinal)
    }

    pub fn ordinal(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| StoreError::NoSuchColumn(name.to_string()))
    }

    /// Appends a column and returns its ordinal
    pub fn create_column(
        &mut self,
        name: impl Into<String>,
        kind: ColumnType,
        nullable: bool,
    ) -> Result<usize> {
        let name = name.into();
        if self.columns.iter().any(|c| c.name == name) {
            return Err(StoreError::DuplicateName(name));
        }

        let ordinal = self.columns.len();
        self.columns.push(Column {
            name,
            ordinal,
            kind,
            nullable,
        });
        Ok(ordinal)
    }

    /// Declares a single-column index
    pub fn set_index(&mut self, column: &str) -> Result<()> {
        self.set_compound_index(&[column])
    }

    /// Declares an index keyed on the ordered tuple `columns`
    pub fn set_compound_index(&mut self, columns: &[&str]) -> Result<()> {
        self.set_compound_index_with_value(columns, &[])
    }

    /// Declares an index keyed on `keys` that also inlines `values`
    pub fn set_compound_index_with_value(&mut self, keys: &[&str], values: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Err(StoreError::format("an index needs at least one key column"));
        }

        let keys = self.ordinals(keys)?;
        let values = self.ordinals(values)?;
        if let Some(dup) = values.iter().find(|v| keys.contains(v)) {
            return Err(StoreError::DuplicateName(self.columns[*dup].name.clone()));
        }
        if self.indexes.iter().any(|i| i.keys == keys) {
            return Err(StoreError::DuplicateName(self.index_name(&keys)));
        }

        self.indexes.push(IndexDef::new(keys, values));
        Ok(())
    }

    /// Removes the index keyed on exactly `columns`, with or without values
    pub fn drop_compound_index(&mut self, columns: &[&str]) -> Result<()> {
        let keys = self.ordinals(columns)?;
        let before = self.indexes.len();
        self.indexes.retain(|i| i.keys != keys);

        if self.indexes.len() == before {
            Err(StoreError::NoSuchIndex(self.index_name(&keys)))
        } else {
            Ok(())
        }
    }

    fn ordinals(&self, names: &[&str]) -> Result<Vec<usize>> {
        names.iter().map(|n| self.ordinal(n)).collect()
    }

    fn index_name(&self, keys: &[usize]) -> String {
        let names: Vec<&str> = keys
            .iter()
            .filter_map(|k| self.columns.get(*k))
            .map(|c| c.name.as_str())
            .collect();
        format!("{}({})", self.name, names.join(","))
    }
}
