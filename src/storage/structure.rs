use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};

use super::{
    codec::{read_str, write_str},
    database::Database,
    error::StoreError,
    index::{read_def, replace_file, write_def},
    layout::{
        STRUCTURE_HEADER_SIZE, STRUCTURE_MAGIC, STRUCTURE_MAGIC_OFFSET, STRUCTURE_MAGIC_SIZE,
        STRUCTURE_VERSION, STRUCTURE_VERSION_OFFSET,
    },
    recovery::RebuildReport,
    schema::{Column, TableDef},
    table::Table,
    value::ColumnType,
    Result,
};

/// File naming and durability settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    extension: String,
    sync: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            extension: "dat".to_string(),
            sync: false,
        }
    }
}

impl Options {
    /// Extension shared by every file of the database
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Whether flushes wait for the data to reach the disk
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

/// Schema of a database and the entry point to its data.
///
/// Table definitions are built with [create_table](Structure::create_table)
/// and persisted with [save_structure](Structure::save_structure); loading
/// opens every table and exposes them through [Database].
pub struct Structure {
    dir: PathBuf,
    name: String,
    options: Options,
    defs: Vec<TableDef>,
    database: Option<Database>,
}

impl Structure {
    pub fn new(dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self::with_options(dir, name, Options::default())
    }

    pub fn with_options(dir: impl AsRef<Path>, name: impl Into<String>, options: Options) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            name: name.into(),
            options,
            defs: Vec::new(),
            database: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn structure_path(&self) -> PathBuf {
        self.file("database", "struct")
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.file(table, "table")
    }

    pub fn index_path(&self, table: &str) -> PathBuf {
        self.file(table, "index")
    }

    fn file(&self, part: &str, kind: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}.{}",
            self.name, part, kind, self.options.extension
        ))
    }

    /// Whether a structure file already exists for this database
    pub fn exists(&self) -> bool {
        self.structure_path().exists()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.defs.iter().map(TableDef::name)
    }

    pub fn table_def(&self, name: &str) -> Option<&TableDef> {
        self.defs.iter().find(|d| d.name() == name)
    }

    pub fn table_def_mut(&mut self, name: &str) -> Result<&mut TableDef> {
        self.defs
            .iter_mut()
            .find(|d| d.name() == name)
            .ok_or_else(|| StoreError::NoSuchTable(name.to_string()))
    }

    /// Adds an empty table definition
    pub fn create_table(&mut self, name: &str) -> Result<&mut TableDef> {
        if name.is_empty() || name.contains(['.', '/', '\\']) {
            return Err(StoreError::format(format!("invalid table name `{name}`")));
        }
        if self.table_def(name).is_some() {
            return Err(StoreError::DuplicateName(name.to_string()));
        }

        self.defs.push(TableDef::new(name));
        let last = self.defs.len() - 1;
        Ok(&mut self.defs[last])
    }

    /// Writes the structure file; the open database keeps its current definitions
    pub fn save_structure(&self) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&STRUCTURE_MAGIC);
        buf.write_u8(STRUCTURE_VERSION)?;
        encode_defs(&mut buf, &self.defs)?;

        fs::create_dir_all(&self.dir)?;
        let path = self.structure_path();
        replace_file(&path, &buf, self.options.sync)?;
        info!("saved structure of {} with {} tables", self.name, self.defs.len());
        Ok(())
    }

    /// Reads the structure file and opens every table.
    ///
    /// The whole file is validated before any data file is touched, so a
    /// version mismatch leaves the data files unopened.
    pub fn load_structure(&mut self) -> Result<()> {
        self.shutdown()?;

        let bytes = fs::read(self.structure_path())?;
        let defs = decode_structure(&bytes)?;

        let mut tables = Vec::with_capacity(defs.len());
        for def in defs.iter() {
            let table = Table::open(
                Arc::new(def.clone()),
                &self.table_path(def.name()),
                &self.index_path(def.name()),
                self.options.sync,
            )?;
            tables.push(table);
        }

        info!("loaded structure of {} with {} tables", self.name, tables.len());
        self.defs = defs;
        self.database = Some(Database::new(self.name.clone(), tables));
        Ok(())
    }

    /// Loads the structure if needed and returns the open database
    pub fn open_database(&mut self) -> Result<&mut Database> {
        if self.database.is_none() {
            self.load_structure()?;
        }
        self.database()
    }

    pub fn database(&mut self) -> Result<&mut Database> {
        self.database.as_mut().ok_or(StoreError::NotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.database.is_some()
    }

    /// Rebuilds the indexes of every table; see [Table::rebuild]
    pub fn rebuild_indexes(&mut self, aggressive: bool) -> Result<Vec<(String, RebuildReport)>> {
        let database = self.database()?;
        let mut reports = Vec::new();
        for table in database.tables_mut() {
            let report = table.rebuild(aggressive)?;
            reports.push((table.name().to_string(), report));
        }
        Ok(reports)
    }

    /// Flushes and closes the database; does nothing when it is not loaded
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(mut database) = self.database.take() {
            database.flush()?;
            debug!("shut down {}", self.name);
        }
        Ok(())
    }
}

impl Drop for Structure {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("failed to flush {} on drop: {}", self.name, e);
        }
    }
}

fn encode_defs(buf: &mut Vec<u8>, defs: &[TableDef]) -> Result<()> {
    buf.write_u16::<LittleEndian>(defs.len() as u16)?;
    for def in defs {
        write_str(buf, def.name())?;
        buf.write_u16::<LittleEndian>(def.columns().len() as u16)?;
        for column in def.columns() {
            write_str(buf, &column.name)?;
            buf.write_u8(column.kind.into())?;
            buf.write_u8(column.nullable as u8)?;
        }
        buf.write_u16::<LittleEndian>(def.indexes().len() as u16)?;
        for index in def.indexes() {
            write_def(buf, index)?;
        }
    }
    Ok(())
}

fn decode_structure(bytes: &[u8]) -> Result<Vec<TableDef>> {
    if bytes.len() < STRUCTURE_HEADER_SIZE
        || bytes[STRUCTURE_MAGIC_OFFSET..STRUCTURE_MAGIC_OFFSET + STRUCTURE_MAGIC_SIZE]
            != STRUCTURE_MAGIC
    {
        return Err(StoreError::format("content is not a structure file"));
    }

    let version = bytes[STRUCTURE_VERSION_OFFSET];
    if version != STRUCTURE_VERSION {
        return Err(StoreError::BackwardIncompatibility {
            found: version,
            expected: STRUCTURE_VERSION,
        });
    }

    let mut rdr = &bytes[STRUCTURE_HEADER_SIZE..];
    let count = rdr.read_u16::<LittleEndian>()?;
    let mut defs: Vec<TableDef> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let def = read_table(&mut rdr)?;
        if defs.iter().any(|d| d.name() == def.name()) {
            return Err(StoreError::DuplicateName(def.name().to_string()));
        }
        defs.push(def);
    }

    Ok(defs)
}

fn read_table<R: Read>(rdr: &mut R) -> Result<TableDef> {
    let name = read_str(rdr)?;

    let count = rdr.read_u16::<LittleEndian>()?;
    let mut columns = Vec::with_capacity(count as usize);
    for ordinal in 0..count as usize {
        let column_name = read_str(rdr)?;
        let kind = ColumnType::try_from(rdr.read_u8()?).map_err(StoreError::Format)?;
        let nullable = rdr.read_u8()? != 0;
        columns.push(Column {
            name: column_name,
            ordinal,
            kind,
            nullable,
        });
    }

    let count = rdr.read_u16::<LittleEndian>()?;
    let mut indexes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let index = read_def(rdr)?;
        let mut ordinals = index.keys.iter().chain(index.values.iter());
        if let Some(bad) = ordinals.find(|o| **o >= columns.len()) {
            return Err(StoreError::format(format!(
                "index of {name} refers to column {bad}"
            )));
        }
        indexes.push(index);
    }

    Ok(TableDef::from_parts(name, columns, indexes))
}
