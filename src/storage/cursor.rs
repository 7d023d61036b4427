use std::vec;

use super::{
    error::StoreError,
    index::{Entry, Index},
    record::Record,
    table::Table,
    value::Value,
    Result,
};

#[derive(Debug, Clone, PartialEq)]
struct Term {
    ordinal: usize,
    value: Value,
    /// Otherwise the field must be greater or equal
    exact: bool,
}

/// Conditions an index entry promised about the record it points at.
///
/// Every record read through an index is checked against them; a record
/// that disagrees means the index and the data diverged.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Filter {
    terms: Vec<Term>,
}

impl Filter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn equal(ordinals: &[usize], values: &[Value]) -> Self {
        let terms = ordinals
            .iter()
            .zip(values)
            .map(|(ordinal, value)| Term {
                ordinal: *ordinal,
                value: value.clone(),
                exact: true,
            })
            .collect();
        Self { terms }
    }

    pub fn with_value(mut self, ordinal: usize, value: Value, exact: bool) -> Self {
        self.terms.push(Term {
            ordinal,
            value,
            exact,
        });
        self
    }

    pub fn verify(&self, record: &Record) -> Result<()> {
        for term in &self.terms {
            let found = record.value(term.ordinal);
            let holds = match (found, term.exact) {
                (Some(v), true) => *v == term.value,
                (Some(v), false) => *v >= term.value,
                (None, _) => false,
            };

            if !holds {
                return Err(StoreError::bad_indexes(format!(
                    "record {} of {} does not match its index entry on column {}",
                    record.id(),
                    record.table_name(),
                    term.ordinal
                )));
            }
        }
        Ok(())
    }
}

/// Column values copied out of the index entries a result set was built from
#[derive(Debug, Clone, Default)]
pub(crate) struct Covered {
    /// Key ordinals followed by inlined value ordinals
    ordinals: Vec<usize>,
    rows: Vec<Vec<Value>>,
}

impl Covered {
    pub fn new(index: &Index) -> Self {
        let def = index.def();
        Self {
            ordinals: def.keys.iter().chain(def.values.iter()).copied().collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: &Entry<'_>) {
        self.rows
            .push(entry.key.iter().chain(entry.values).cloned().collect());
    }
}

/// Lazy sequence of records produced by a lookup.
///
/// Each record is read and checked when the iterator reaches it. The
/// borrow on the table keeps it from being modified while the set is open.
pub struct ResultSet<'t> {
    table: &'t Table,
    slots: vec::IntoIter<u32>,
    filter: Filter,
}

impl<'t> ResultSet<'t> {
    fn new(table: &'t Table, slots: Vec<u32>, filter: Filter) -> Self {
        Self {
            table,
            slots: slots.into_iter(),
            filter,
        }
    }

    /// Releases the set; the table may be modified again afterwards
    pub fn dispose(self) {}
}

impl Iterator for ResultSet<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.slots.next()?;

        let record = self
            .table
            .read_record(slot)
            .and_then(|r| self.filter.verify(&r).map(|_| r));
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.slots.size_hint()
    }
}

/// A result set whose size is known up front, with random access
pub struct CountedResultSet<'t> {
    table: &'t Table,
    slots: Vec<u32>,
    filter: Filter,
    covered: Option<Covered>,
}

impl<'t> CountedResultSet<'t> {
    pub(crate) fn new(table: &'t Table, slots: Vec<u32>, filter: Filter) -> Self {
        Self {
            table,
            slots,
            filter,
            covered: None,
        }
    }

    pub(crate) fn with_covered(mut self, covered: Covered) -> Self {
        self.covered = Some(covered);
        self
    }

    pub(crate) fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reads the `i`th matching record
    pub fn get(&self, i: usize) -> Option<Result<Record>> {
        let slot = *self.slots.get(i)?;
        let record = self
            .table
            .read_record(slot)
            .and_then(|r| self.filter.verify(&r).map(|_| r));
        Some(record)
    }

    /// Value of column `ordinal` for the `i`th match, taken from the index
    /// entry without reading the record.
    ///
    /// `None` when the index neither keys on nor inlines that column.
    pub fn covered_value(&self, i: usize, ordinal: usize) -> Option<&Value> {
        let covered = self.covered.as_ref()?;
        let pos = covered.ordinals.iter().position(|o| *o == ordinal)?;
        covered.rows.get(i)?.get(pos)
    }

    pub fn iter(&self) -> ResultSet<'t> {
        ResultSet::new(self.table, self.slots.clone(), self.filter.clone())
    }

    pub fn dispose(self) {}
}

impl<'t> IntoIterator for CountedResultSet<'t> {
    type Item = Result<Record>;
    type IntoIter = ResultSet<'t>;

    fn into_iter(self) -> Self::IntoIter {
        ResultSet::new(self.table, self.slots, self.filter)
    }
}
