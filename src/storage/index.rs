use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use super::{
    codec::{read_value, write_value},
    error::StoreError,
    layout::{INDEX_MAGIC, INDEX_VERSION},
    schema::{Column, IndexDef},
    value::Value,
    Result,
};

/// Table counters an index file was written against.
///
/// An index file is only trusted when its stamp matches the table header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStamp {
    pub live_count: u32,
    pub next_id: u32,
    pub commit_seq: u32,
}

/// An ordered map from key tuples to the slots holding matching records.
///
/// Entries are ordered by key then slot, so duplicate keys are allowed and a
/// key prefix selects a contiguous range.
#[derive(Debug, Clone)]
pub struct Index {
    def: IndexDef,
    entries: BTreeMap<(Vec<Value>, u32), Vec<Value>>,
}

/// A single index entry
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub key: &'a [Value],
    pub slot: u32,
    /// Inlined covering values, in the order of the index's value columns
    pub values: &'a [Value],
}

impl Index {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
        }
    }

    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_of(&self, values: &[Value]) -> Vec<Value> {
        self.def.keys.iter().map(|k| values[*k].clone()).collect()
    }

    fn inline_of(&self, values: &[Value]) -> Vec<Value> {
        self.def.values.iter().map(|k| values[*k].clone()).collect()
    }

    pub fn insert(&mut self, slot: u32, values: &[Value]) {
        let key = self.key_of(values);
        let inline = self.inline_of(values);
        self.entries.insert((key, slot), inline);
    }

    pub fn remove(&mut self, slot: u32, values: &[Value]) -> bool {
        let key = self.key_of(values);
        self.entries.remove(&(key, slot)).is_some()
    }

    /// Drops every entry pointing at `slot`, whatever its key
    pub fn remove_slot(&mut self, slot: u32) {
        self.entries.retain(|(_, s), _| *s != slot);
    }

    pub fn iter(&self) -> impl Iterator<Item = Entry<'_>> {
        self.entries.iter().map(to_entry)
    }

    /// Entries whose key starts with `prefix`, in key order
    pub fn prefix<'a>(&'a self, prefix: &'a [Value]) -> impl Iterator<Item = Entry<'a>> + 'a {
        self.entries
            .range((prefix.to_vec(), 0)..)
            .take_while(move |((key, _), _)| key.starts_with(prefix))
            .map(to_entry)
    }

    /// Position of `ordinal` among the inlined values
    pub fn value_position(&self, ordinal: usize) -> Option<usize> {
        self.def.values.iter().position(|v| *v == ordinal)
    }
}

fn to_entry<'a>(((key, slot), values): (&'a (Vec<Value>, u32), &'a Vec<Value>)) -> Entry<'a> {
    Entry {
        key,
        slot: *slot,
        values,
    }
}

/// Every declared index of one table
#[derive(Debug, Clone)]
pub struct IndexSet {
    indexes: Vec<Index>,
}

impl IndexSet {
    pub fn new(defs: &[IndexDef]) -> Self {
        Self {
            indexes: defs.iter().cloned().map(Index::new).collect(),
        }
    }

    pub fn insert_record(&mut self, slot: u32, values: &[Value]) {
        for index in self.indexes.iter_mut() {
            index.insert(slot, values);
        }
    }

    pub fn remove_record(&mut self, slot: u32, values: &[Value]) {
        for index in self.indexes.iter_mut() {
            if !index.remove(slot, values) {
                debug!("slot {} had no entry in index {:?}", slot, index.def().keys);
            }
        }
    }

    pub fn remove_slot(&mut self, slot: u32) {
        for index in self.indexes.iter_mut() {
            index.remove_slot(slot);
        }
    }

    /// First index whose key tuple starts with `ordinals`
    pub fn by_prefix(&self, ordinals: &[usize]) -> Option<&Index> {
        self.indexes.iter().find(|i| i.def().has_key_prefix(ordinals))
    }

    /// First index led by `key` that also inlines `value`
    pub fn with_value(&self, key: usize, value: usize) -> Option<&Index> {
        self.indexes
            .iter()
            .find(|i| i.def().leading_key() == key && i.value_position(value).is_some())
    }

    /// Writes all indexes to `path`, replacing the previous file atomically
    pub fn save(&self, path: &Path, stamp: IndexStamp, sync: bool) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.write_u8(INDEX_VERSION)?;
        buf.write_u32::<LittleEndian>(stamp.live_count)?;
        buf.write_u32::<LittleEndian>(stamp.next_id)?;
        buf.write_u32::<LittleEndian>(stamp.commit_seq)?;
        buf.write_u16::<LittleEndian>(self.indexes.len() as u16)?;

        for index in self.indexes.iter() {
            write_def(&mut buf, index.def())?;
            buf.write_u32::<LittleEndian>(index.len() as u32)?;
            for entry in index.iter() {
                buf.write_u32::<LittleEndian>(entry.slot)?;
                for value in entry.key.iter().chain(entry.values.iter()) {
                    write_value(&mut buf, value)?;
                }
            }
        }

        replace_file(path, &buf, sync)?;
        debug!("saved {} indexes to {:?}", self.indexes.len(), path);
        Ok(())
    }

    /// Loads indexes from `path`.
    ///
    /// Returns `None` when the file is missing, unreadable, or was written
    /// for a different set of index definitions. Such a file is stale and the
    /// table must be rebuilt before its indexes can be trusted.
    pub fn load(path: &Path, defs: &[IndexDef], columns: &[Column]) -> Option<(Self, IndexStamp)> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("no index file at {:?}; {}", path, e);
                return None;
            }
        };

        match Self::parse(&bytes, defs, columns) {
            Ok(Some(loaded)) => Some(loaded),
            Ok(None) => {
                warn!("index file {:?} was written for other index definitions", path);
                None
            }
            Err(e) => {
                warn!("index file {:?} is unreadable; {}", path, e);
                None
            }
        }
    }

    fn parse(
        mut rdr: &[u8],
        defs: &[IndexDef],
        columns: &[Column],
    ) -> Result<Option<(Self, IndexStamp)>> {
        let mut magic = [0u8; 4];
        rdr.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(StoreError::format("content is not a valid index file"));
        }
        let version = rdr.read_u8()?;
        if version != INDEX_VERSION {
            return Err(StoreError::format(format!(
                "unsupported index format {:#x}",
                version
            )));
        }

        let stamp = IndexStamp {
            live_count: rdr.read_u32::<LittleEndian>()?,
            next_id: rdr.read_u32::<LittleEndian>()?,
            commit_seq: rdr.read_u32::<LittleEndian>()?,
        };

        let count = rdr.read_u16::<LittleEndian>()? as usize;
        if count != defs.len() {
            return Ok(None);
        }

        let mut set = Self::new(defs);
        for index in set.indexes.iter_mut() {
            let def = read_def(&mut rdr)?;
            if &def != index.def() {
                return Ok(None);
            }

            let entries = rdr.read_u32::<LittleEndian>()?;
            for _ in 0..entries {
                let slot = rdr.read_u32::<LittleEndian>()?;
                let key = read_values(&mut rdr, &def.keys, columns)?;
                let inline = read_values(&mut rdr, &def.values, columns)?;
                index.entries.insert((key, slot), inline);
            }
        }

        Ok(Some((set, stamp)))
    }
}

/// Writes `bytes` beside `path` and renames the copy over it
pub fn replace_file(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    if sync {
        file.sync_all()?;
    }
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_values(rdr: &mut &[u8], ordinals: &[usize], columns: &[Column]) -> Result<Vec<Value>> {
    ordinals
        .iter()
        .map(|o| {
            let column = columns
                .get(*o)
                .ok_or_else(|| StoreError::format(format!("column {o} does not exist")))?;
            read_value(rdr, column.kind)
        })
        .collect()
}

/// Writes an index descriptor: key ordinals then value ordinals
pub fn write_def(buf: &mut Vec<u8>, def: &IndexDef) -> Result<()> {
    buf.write_u8(def.keys.len() as u8)?;
    for key in def.keys.iter() {
        buf.write_u16::<LittleEndian>(*key as u16)?;
    }
    buf.write_u8(def.values.len() as u8)?;
    for value in def.values.iter() {
        buf.write_u16::<LittleEndian>(*value as u16)?;
    }
    Ok(())
}

pub fn read_def<R: Read>(rdr: &mut R) -> Result<IndexDef> {
    let keys = rdr.read_u8()?;
    let keys = (0..keys)
        .map(|_| rdr.read_u16::<LittleEndian>().map(usize::from))
        .collect::<std::io::Result<Vec<_>>>()?;
    let values = rdr.read_u8()?;
    let values = (0..values)
        .map(|_| rdr.read_u16::<LittleEndian>().map(usize::from))
        .collect::<std::io::Result<Vec<_>>>()?;

    if keys.is_empty() {
        return Err(StoreError::format("index without key columns"));
    }
    Ok(IndexDef::new(keys, values))
}

#[cfg(test)]
mod test {
    use assert_fs::TempDir;

    use super::*;
    use crate::storage::value::ColumnType;

    fn columns() -> Vec<Column> {
        ["Type", "Id", "Number"]
            .into_iter()
            .enumerate()
            .map(|(ordinal, name)| Column {
                name: name.to_string(),
                ordinal,
                kind: ColumnType::Integer,
                nullable: false,
            })
            .collect()
    }

    fn row(t: i32, id: i32, number: i32) -> Vec<Value> {
        vec![Value::Int(t), Value::Int(id), Value::Int(number)]
    }

    fn compound() -> IndexSet {
        let mut set = IndexSet::new(&[IndexDef::new(vec![0, 1], vec![2])]);
        for i in 0..5 {
            set.insert_record(i as u32, &row(i % 2, i, i * 100));
        }
        set
    }

    #[test]
    fn prefix_selects_contiguous_keys() {
        let set = compound();
        let index = set.by_prefix(&[0]).unwrap();

        let odd = [Value::Int(1)];
        let slots: Vec<u32> = index.prefix(&odd).map(|e| e.slot).collect();
        assert_eq!(slots, vec![1, 3]);

        let exact = [Value::Int(0), Value::Int(4)];
        let hit: Vec<_> = index.prefix(&exact).collect();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].values, &[Value::Int(400)]);
    }

    #[test]
    fn index_selection_by_ordinals() {
        let set = compound();
        assert!(set.by_prefix(&[0, 1]).is_some());
        assert!(set.by_prefix(&[1]).is_none());
        assert!(set.with_value(0, 2).is_some());
        assert!(set.with_value(0, 1).is_none());
    }

    #[test]
    fn remove_drops_only_that_slot() {
        let mut set = compound();
        set.insert_record(9, &row(1, 1, 100));
        set.remove_record(1, &row(1, 1, 100));

        let index = set.by_prefix(&[0]).unwrap();
        let key = [Value::Int(1), Value::Int(1)];
        let slots: Vec<u32> = index.prefix(&key).map(|e| e.slot).collect();
        assert_eq!(slots, vec![9]);
    }

    #[test]
    fn save_and_load_index_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.index.dat");
        let set = compound();
        let stamp = IndexStamp {
            live_count: 5,
            next_id: 5,
            commit_seq: 5,
        };
        set.save(&path, stamp, false).unwrap();

        let defs = [IndexDef::new(vec![0, 1], vec![2])];
        let (loaded, loaded_stamp) = IndexSet::load(&path, &defs, &columns()).unwrap();
        assert_eq!(loaded_stamp, stamp);

        let index = loaded.by_prefix(&[0]).unwrap();
        assert_eq!(index.len(), 5);
        let values: Vec<_> = index.iter().map(|e| e.values[0].clone()).collect();
        assert_eq!(
            values,
            vec![
                Value::Int(0),
                Value::Int(200),
                Value::Int(400),
                Value::Int(100),
                Value::Int(300)
            ]
        );
    }

    #[test]
    fn replaced_file_leaves_no_copy_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.index.dat");
        std::fs::write(&path, b"old").unwrap();

        replace_file(&path, b"new", true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn changed_definitions_make_file_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.index.dat");
        compound()
            .save(&path, IndexStamp::default(), true)
            .unwrap();

        let other = [IndexDef::new(vec![0, 1], vec![])];
        assert!(IndexSet::load(&path, &other, &columns()).is_none());
        assert!(IndexSet::load(&dir.path().join("missing"), &other, &columns()).is_none());
    }
}
