use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};

use super::{
    codec::{decode_body, encode_body, encode_slot},
    cursor::{CountedResultSet, Covered, Filter, ResultSet},
    error::StoreError,
    header::{Footer, TableHeader},
    index::{Entry, Index, IndexSet, IndexStamp},
    layout::{
        FOOTER_SIZE, MARKER_DELETED, MARKER_LIVE, SLOT_CAPACITY_OFFSET, SLOT_HEADER_SIZE,
        SLOT_SENTINEL, SLOT_SENTINEL_SIZE, TABLE_HEADER_SIZE,
    },
    pager::Pager,
    record::{Record, Stored},
    recovery,
    schema::TableDef,
    slot::{SlotArena, SlotHandle, SlotState},
    value::Value,
    Result,
};

/// An open table: one data file, its slots and its indexes.
///
/// Reads take `&self`; every mutation takes `&mut self`, so a live
/// [ResultSet] rules out concurrent writes to the same table.
pub struct Table {
    pub(super) def: Arc<TableDef>,
    pub(super) pager: Pager,
    pub(super) data_path: PathBuf,
    pub(super) index_path: PathBuf,
    pub(super) header: TableHeader,
    pub(super) arena: SlotArena,
    pub(super) indexes: IndexSet,
    /// Set when the indexes or counters cannot be trusted until a rebuild
    pub(super) stale: Option<String>,
    /// Next identifier handed out by `new_record`; reaches the header at commit
    pub(super) reserved_id: u32,
    pub(super) dirty: bool,
    pub(super) sync: bool,
}

impl Table {
    /// Opens the table files, creating them if absent.
    ///
    /// A file that ends inside its last record is repaired here: the missing
    /// trailing fields take their default values.
    pub(crate) fn open(
        def: Arc<TableDef>,
        data_path: &Path,
        index_path: &Path,
        sync: bool,
    ) -> Result<Self> {
        let pager = Pager::open(data_path, sync)?;
        let mut table = Self {
            indexes: IndexSet::new(def.indexes()),
            def,
            pager,
            data_path: data_path.to_path_buf(),
            index_path: index_path.to_path_buf(),
            header: TableHeader::default(),
            arena: SlotArena::default(),
            stale: None,
            reserved_id: 0,
            dirty: false,
            sync,
        };

        if table.pager.is_empty() {
            info!("creating table {}", table.def.name());
            table.write_counters()?;
            table.dirty = true;
            table.flush()?;
            return Ok(table);
        }

        table.load()?;
        Ok(table)
    }

    fn load(&mut self) -> Result<()> {
        self.header =
            TableHeader::from_bytes(&self.pager.read_available(0, TABLE_HEADER_SIZE)?)?;
        self.reserved_id = self.header.next_id;
        let scan = recovery::scan_frames(&self.pager, &self.header)?;
        let truncated = self.pager.len() < self.header.end_offset + FOOTER_SIZE as u64;

        if let Some(reason) = scan.broken.clone() {
            warn!("table {} is damaged; {}", self.def.name(), reason);
            self.arena = scan.arena;
            self.stale = Some(reason);
            return Ok(());
        }

        let mut repaired = None;
        if truncated {
            let tail = recovery::repair_tail(&mut self.pager, &self.def, scan)?;
            let live = count_live(&tail.arena);
            if live != self.header.live_count {
                warn!(
                    "table {} header counted {} records, {} survived truncation",
                    self.def.name(),
                    self.header.live_count,
                    live
                );
            }

            self.arena = tail.arena;
            self.header.live_count = live;
            self.header.end_offset = tail.end;
            self.write_counters()?;
            self.pager.truncate(tail.end + FOOTER_SIZE as u64)?;
            self.pager.flush()?;
            repaired = tail.repaired;
        } else {
            self.arena = scan.arena;
            let footer = Footer::from_bytes(&self.pager.read(self.header.end_offset, FOOTER_SIZE)?);
            self.stale = self.check_counters(footer);
        }

        let stamp = self.stamp();
        match IndexSet::load(&self.index_path, self.def.indexes(), self.def.columns()) {
            Some((indexes, found)) if found == stamp => self.indexes = indexes,
            Some((_, found)) => {
                debug!("index stamp {:?} does not match table {:?}", found, stamp);
                self.stale
                    .get_or_insert_with(|| "index file is out of date".to_string());
            }
            None if count_live(&self.arena) == 0 => {}
            None => {
                self.stale
                    .get_or_insert_with(|| "index file is missing or unusable".to_string());
            }
        }

        if let (Some((slot, values)), None) = (repaired, &self.stale) {
            self.indexes.remove_slot(slot);
            self.indexes.insert_record(slot, &values);
            self.dirty = true;
        }

        if let Some(reason) = &self.stale {
            warn!("indexes of {} need a rebuild; {}", self.def.name(), reason);
        }
        debug!(
            "opened table {} from {:?}; {} slots, {} live",
            self.def.name(),
            self.pager.path(),
            self.arena.len(),
            self.header.live_count
        );
        Ok(())
    }

    /// Compares header, footer and slot markers; returns why they disagree
    fn check_counters(&self, footer: Option<Footer>) -> Option<String> {
        let expected = self.header.live_count;
        let observed = count_live(&self.arena);
        let lost = self.arena.lost() as u32;

        match footer {
            None => Some("end-of-table sentinel is missing".to_string()),
            Some(f) if f.live_count != expected => Some(format!(
                "header counts {} records, end-of-table sentinel {}",
                expected, f.live_count
            )),
            // lost slots surface individually when an index reaches them
            _ if observed <= expected && expected <= observed + lost => None,
            _ => Some(format!(
                "header counts {} records, slots hold {}",
                expected, observed
            )),
        }
    }

    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn def(&self) -> &TableDef {
        &self.def
    }

    pub fn column_ordinal(&self, name: &str) -> Result<usize> {
        self.def.ordinal(name)
    }

    /// Number of live records; slots lost to corruption are not counted
    pub fn count(&self) -> usize {
        count_live(&self.arena) as usize
    }

    /// Whether a commit or delete happened since the last flush or load
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reason the indexes must be rebuilt before use, if any
    pub fn needs_rebuild(&self) -> Option<&str> {
        self.stale.as_deref()
    }

    /// Creates a record with the next identifier; it has no durable effect until committed
    pub fn new_record(&mut self) -> Result<Record> {
        let id = self.reserved_id;
        self.reserved_id = id
            .checked_add(1)
            .ok_or_else(|| StoreError::format("record identifiers exhausted"))?;
        Ok(Record::new(Arc::clone(&self.def), id))
    }

    pub(crate) fn commit_record(&mut self, record: &mut Record) -> Result<()> {
        self.check_owner(record)?;
        self.ensure_trusted()?;
        record.check_assigned()?;

        let body = encode_body(record.id, &record.values)?;
        let handle = match record.stored.take() {
            Some(stored) => match self.rewrite(&stored, &body) {
                Ok(handle) => handle,
                Err(e) => {
                    record.stored = Some(stored);
                    return Err(e);
                }
            },
            None => {
                let handle = self.place(&body)?;
                self.header.live_count += 1;
                handle
            }
        };

        self.indexes.insert_record(handle.index, &record.values);
        self.header.next_id = self.header.next_id.max(record.id.saturating_add(1));
        record.stored = Some(Stored {
            handle,
            values: record.values.clone(),
        });
        debug!(
            "committed record {} of {} to slot {}",
            record.id,
            self.def.name(),
            handle.index
        );

        self.touch()
    }

    /// Rewrites a committed record in place, or moves it when it outgrew its slot.
    ///
    /// The old slot and its index entries are only released once the new
    /// bytes are written.
    fn rewrite(&mut self, stored: &Stored, body: &[u8]) -> Result<SlotHandle> {
        let slot = *self
            .arena
            .resolve(stored.handle)
            .map_err(|_| StoreError::StaleRecord(id_of(body)))?;

        if body.len() <= slot.capacity as usize {
            let bytes = encode_slot(MARKER_LIVE, slot.capacity as usize, body);
            self.pager.write(slot.offset, &bytes)?;
            self.indexes.remove_record(stored.handle.index, &stored.values);
            return Ok(stored.handle);
        }

        let handle = self.place(body)?;
        if let Err(e) = self.pager.write(slot.offset, &[MARKER_DELETED]) {
            self.release(handle);
            return Err(e);
        }
        self.arena.free(stored.handle.index);
        self.indexes.remove_record(stored.handle.index, &stored.values);
        Ok(handle)
    }

    /// Stores `body` in a free slot large enough, or appends a new one
    fn place(&mut self, body: &[u8]) -> Result<SlotHandle> {
        if let Some(handle) = self.arena.allocate(body.len()) {
            let slot = *self.arena.resolve(handle)?;
            let bytes = encode_slot(MARKER_LIVE, slot.capacity as usize, body);
            if let Err(e) = self.pager.write(slot.offset, &bytes) {
                self.arena.free(handle.index);
                return Err(e);
            }
            return Ok(handle);
        }

        let offset = self.header.end_offset;
        let bytes = encode_slot(MARKER_LIVE, body.len(), body);
        self.pager.write(offset, &bytes)?;
        self.header.end_offset += bytes.len() as u64;

        Ok(self
            .arena
            .push(offset, body.len() as u32, SlotState::Live))
    }

    /// Undoes a `place` whose record could not be committed
    fn release(&mut self, handle: SlotHandle) {
        if let Ok(slot) = self.arena.resolve(handle) {
            let offset = slot.offset;
            if let Err(e) = self.pager.write(offset, &[MARKER_DELETED]) {
                warn!("could not release slot {} of {}; {}", handle.index, self.def.name(), e);
            }
        }
        self.arena.free(handle.index);
        if let Err(e) = self.write_counters() {
            warn!("could not rewrite counters of {}; {}", self.def.name(), e);
        }
    }

    pub(crate) fn delete_record(&mut self, record: &Record) -> Result<()> {
        self.check_owner(record)?;
        let Some(stored) = &record.stored else {
            return Ok(());
        };
        self.ensure_trusted()?;

        let slot = *self
            .arena
            .resolve(stored.handle)
            .map_err(|_| StoreError::StaleRecord(record.id))?;
        self.pager.write(slot.offset, &[MARKER_DELETED])?;
        self.arena.free(stored.handle.index);
        self.indexes.remove_record(stored.handle.index, &stored.values);
        self.header.live_count = self.header.live_count.saturating_sub(1);
        debug!("deleted record {} of {}", record.id, self.def.name());

        self.touch()
    }

    fn touch(&mut self) -> Result<()> {
        self.header.commit_seq = self.header.commit_seq.wrapping_add(1);
        self.dirty = true;
        self.write_counters()
    }

    /// Writes the header and the end-of-table sentinel
    pub(super) fn write_counters(&mut self) -> Result<()> {
        self.pager.write(0, &self.header.to_bytes())?;
        let footer = Footer {
            live_count: self.header.live_count,
        };
        self.pager.write(self.header.end_offset, &footer.to_bytes())
    }

    pub(super) fn stamp(&self) -> IndexStamp {
        IndexStamp {
            live_count: self.header.live_count,
            next_id: self.header.next_id,
            commit_seq: self.header.commit_seq,
        }
    }

    fn check_owner(&self, record: &Record) -> Result<()> {
        if record.table_name() != self.def.name() {
            return Err(StoreError::NoSuchTable(record.table_name().to_string()));
        }
        Ok(())
    }

    pub(super) fn ensure_trusted(&self) -> Result<()> {
        match &self.stale {
            Some(reason) => Err(StoreError::bad_indexes(format!(
                "table {}: {}",
                self.def.name(),
                reason
            ))),
            None => Ok(()),
        }
    }

    /// Reads and strictly decodes the live record in slot `index`
    pub(crate) fn read_record(&self, index: u32) -> Result<Record> {
        let (handle, slot) = self.arena.live(index)?;
        let frame = self.pager.read(slot.offset, slot.span() as usize)?;

        if frame[0] != MARKER_LIVE {
            return Err(StoreError::bad_indexes(format!(
                "slot {index} has marker {:#x}",
                frame[0]
            )));
        }
        let capacity = &frame[SLOT_CAPACITY_OFFSET..SLOT_HEADER_SIZE];
        let sentinel = &frame[frame.len() - SLOT_SENTINEL_SIZE..];
        if capacity != slot.capacity.to_le_bytes() || sentinel != SLOT_SENTINEL {
            return Err(StoreError::bad_indexes(format!(
                "slot {index} frame is damaged"
            )));
        }

        let body = &frame[SLOT_HEADER_SIZE..frame.len() - SLOT_SENTINEL_SIZE];
        let (id, values) = decode_body(body, self.def.columns()).map_err(|fault| {
            StoreError::bad_indexes(format!("slot {index} of {}: {fault}", self.def.name()))
        })?;

        Ok(Record::loaded(Arc::clone(&self.def), id, values, handle))
    }

    /// Point lookup through the first index led by `ordinal`.
    ///
    /// Returns `Ok(None)` when no index covers the column or nothing matches.
    pub fn get_record_by_equal(
        &self,
        ordinal: usize,
        value: impl Into<Value>,
    ) -> Result<Option<Record>> {
        self.ensure_trusted()?;
        let Some(index) = self.indexes.by_prefix(&[ordinal]) else {
            return Ok(None);
        };

        let key = [value.into()];
        let Some(entry) = index.prefix(&key).next() else {
            return Ok(None);
        };

        let filter = Filter::equal(&[ordinal], &key);
        let record = self.read_record(entry.slot)?;
        filter.verify(&record)?;
        Ok(Some(record))
    }

    /// Every record of the index whose key starts with `ordinals`, in key order
    pub fn create_result_set_all(&self, ordinals: &[usize]) -> Result<ResultSet<'_>> {
        Ok(self.create_counted_result_set_all(ordinals)?.into_iter())
    }

    pub fn create_counted_result_set_all(
        &self,
        ordinals: &[usize],
    ) -> Result<CountedResultSet<'_>> {
        self.ensure_trusted()?;
        Ok(match self.indexes.by_prefix(ordinals) {
            Some(index) => self.covered_set(index, index.iter(), Filter::none()),
            None => CountedResultSet::new(self, Vec::new(), Filter::none()),
        })
    }

    /// Records whose column `ordinal` equals `value`
    pub fn create_result_set(
        &self,
        ordinal: usize,
        value: impl Into<Value>,
    ) -> Result<ResultSet<'_>> {
        Ok(self.create_counted_result_set(ordinal, value)?.into_iter())
    }

    pub fn create_counted_result_set(
        &self,
        ordinal: usize,
        value: impl Into<Value>,
    ) -> Result<CountedResultSet<'_>> {
        self.ensure_trusted()?;
        let key = [value.into()];
        let filter = Filter::equal(&[ordinal], &key);
        Ok(match self.indexes.by_prefix(&[ordinal]) {
            Some(index) => self.covered_set(index, index.prefix(&key), filter),
            None => CountedResultSet::new(self, Vec::new(), filter),
        })
    }

    /// Records whose column `ordinal` equals `value`, ordered by `sort_ordinal`
    pub fn create_sorted_result_set(
        &self,
        ordinal: usize,
        value: impl Into<Value>,
        sort_ordinal: usize,
        ascending: bool,
    ) -> Result<ResultSet<'_>> {
        if self.def.column(sort_ordinal).is_none() {
            return Err(StoreError::NoSuchColumn(format!(
                "{}#{sort_ordinal}",
                self.def.name()
            )));
        }

        let matches = self.create_counted_result_set(ordinal, value)?;
        let filter = matches.filter().clone();
        let mut keyed = matches
            .into_iter()
            .map(|r| r.map(|r| (r.values()[sort_ordinal].clone(), r.slot_index())))
            .collect::<Result<Vec<_>>>()?;

        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        if !ascending {
            keyed.reverse();
        }

        let slots = keyed.into_iter().map(|(_, slot)| slot).collect();
        Ok(CountedResultSet::new(self, slots, filter).into_iter())
    }

    /// Lookup through an index with value.
    ///
    /// Entries are matched on the leading key and on the inlined value of
    /// `value_ordinal` (equal when `exact`, otherwise greater or equal)
    /// without reading the records.
    pub fn create_result_set_with_value(
        &self,
        key_ordinal: usize,
        key: impl Into<Value>,
        value_ordinal: usize,
        value: impl Into<Value>,
        exact: bool,
    ) -> Result<ResultSet<'_>> {
        Ok(self
            .create_counted_result_set_with_value(key_ordinal, key, value_ordinal, value, exact)?
            .into_iter())
    }

    pub fn create_counted_result_set_with_value(
        &self,
        key_ordinal: usize,
        key: impl Into<Value>,
        value_ordinal: usize,
        value: impl Into<Value>,
        exact: bool,
    ) -> Result<CountedResultSet<'_>> {
        self.ensure_trusted()?;
        let key = [key.into()];
        let value = value.into();

        let filter =
            Filter::equal(&[key_ordinal], &key).with_value(value_ordinal, value.clone(), exact);

        Ok(match self.indexes.with_value(key_ordinal, value_ordinal) {
            Some(index) => {
                let pos = index.value_position(value_ordinal).unwrap_or_default();
                let entries = index.prefix(&key).filter(|e| match exact {
                    true => e.values[pos] == value,
                    false => e.values[pos] >= value,
                });
                self.covered_set(index, entries, filter)
            }
            None => CountedResultSet::new(self, Vec::new(), filter),
        })
    }

    fn covered_set<'e>(
        &self,
        index: &Index,
        entries: impl Iterator<Item = Entry<'e>>,
        filter: Filter,
    ) -> CountedResultSet<'_> {
        let mut covered = Covered::new(index);
        let slots = entries
            .map(|e| {
                covered.push(&e);
                e.slot
            })
            .collect();
        CountedResultSet::new(self, slots, filter).with_covered(covered)
    }

    /// Every live record in slot order; does not use the indexes
    pub fn records(&self) -> ResultSet<'_> {
        let slots = self
            .arena
            .iter()
            .filter(|(_, s)| s.state == SlotState::Live)
            .map(|(i, _)| i)
            .collect();
        CountedResultSet::new(self, slots, Filter::none()).into_iter()
    }

    /// Writes dirty pages and, when they can be trusted, the indexes
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty && !self.pager.is_dirty() {
            return Ok(());
        }

        self.pager.flush()?;
        if self.stale.is_none() {
            self.indexes.save(&self.index_path, self.stamp(), self.sync)?;
        }
        self.dirty = false;
        debug!("flushed table {}", self.def.name());
        Ok(())
    }
}

fn count_live(arena: &SlotArena) -> u32 {
    arena
        .iter()
        .filter(|(_, s)| s.state == SlotState::Live)
        .count() as u32
}

fn id_of(body: &[u8]) -> u32 {
    body.get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .unwrap_or_default()
}
