use std::fs::{self, OpenOptions};

use assert_fs::TempDir;
use chrono::NaiveDate;
use flatdb::{
    layout::{
        FOOTER_SIZE, SLOT_HEADER_SIZE, SLOT_SENTINEL_SIZE, STRUCTURE_VERSION_OFFSET,
        TABLE_HEADER_SIZE,
    },
    ColumnType, StoreError, Structure,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Two records: (1, "alpha") then (2, "beta"), flushed and closed
fn notes(dir: &TempDir) -> Result<Structure> {
    let mut structure = Structure::new(dir.path(), "notes");
    let def = structure.create_table("Notes")?;
    def.create_column("Id", ColumnType::Integer, false)?;
    def.create_column("Text", ColumnType::String, true)?;
    def.set_index("Id")?;
    structure.save_structure()?;

    let table = structure.open_database()?.table_mut("Notes")?;
    for (id, text) in [(1, "alpha"), (2, "beta")] {
        let mut record = table.new_record()?;
        record.set_value(0, id)?;
        record.set_value(1, text)?;
        record.commit(table)?;
    }
    structure.shutdown()?;
    Ok(structure)
}

fn corrupt(path: &std::path::Path, offset: usize, byte: u8) -> Result<()> {
    let mut bytes = fs::read(path)?;
    bytes[offset] = byte;
    fs::write(path, bytes)?;
    Ok(())
}

#[test]
fn corrupted_marker_is_dropped_by_aggressive_rebuild() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = notes(&dir)?;
    corrupt(&structure.table_path("Notes"), TABLE_HEADER_SIZE, 0x00)?;

    let table = structure.open_database()?.table("Notes")?;
    assert_eq!(table.count(), 1);
    assert_eq!(table.records().count(), 1);
    let err = table.get_record_by_equal(0, 1).unwrap_err();
    assert!(matches!(err, StoreError::BadIndexes(_)), "{err}");

    let err = structure.rebuild_indexes(false).unwrap_err();
    assert!(err.is_corruption());

    let reports = structure.rebuild_indexes(true)?;
    assert_eq!(reports[0].1.lost, 1);
    let table = structure.database()?.table("Notes")?;
    assert_eq!(table.count(), 1);
    assert!(table.get_record_by_equal(0, 1)?.is_none());
    let sibling = table.get_record_by_equal(0, 2)?.unwrap();
    assert_eq!(sibling.string_value(1), Some("beta"));
    structure.shutdown()?;

    let mut structure = Structure::new(dir.path(), "notes");
    let table = structure.open_database()?.table("Notes")?;
    assert_eq!(table.count(), 1);
    assert!(table.needs_rebuild().is_none());

    Ok(())
}

#[test]
fn corrupted_string_length_is_salvaged() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = notes(&dir)?;
    // slot header, id and the integer column precede the length prefix
    let length_at = TABLE_HEADER_SIZE + SLOT_HEADER_SIZE + 4 + 4;
    corrupt(&structure.table_path("Notes"), length_at, 0xFF)?;

    let table = structure.open_database()?.table("Notes")?;
    let err = table.get_record_by_equal(0, 1).unwrap_err();
    assert!(err.is_corruption(), "{err}");
    assert!(table.records().any(|r| r.is_err()));

    let reports = structure.rebuild_indexes(true)?;
    assert_eq!(reports[0].1.salvaged, 1);
    assert_eq!(reports[0].1.lost, 0);
    let table = structure.database()?.table("Notes")?;
    assert_eq!(table.count(), 2);
    let salvaged = table.get_record_by_equal(0, 1)?.unwrap();
    assert_eq!(salvaged.string_value(1), Some("alpha"));
    let sibling = table.get_record_by_equal(0, 2)?.unwrap();
    assert_eq!(sibling.string_value(1), Some("beta"));
    assert!(table.records().all(|r| r.is_ok()));

    Ok(())
}

#[test]
fn truncated_datetime_takes_default() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = Structure::new(dir.path(), "events");
    let def = structure.create_table("Events")?;
    def.create_column("Id", ColumnType::Integer, false)?;
    def.create_column("At", ColumnType::DateTime, true)?;
    def.set_index("Id")?;
    structure.save_structure()?;

    let at = NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(10, 0, 0))
        .unwrap();
    let table = structure.open_database()?.table_mut("Events")?;
    let mut record = table.new_record()?;
    record.set_value(0, 1)?;
    record.set_value(1, at)?;
    record.commit(table)?;
    structure.shutdown()?;

    // cut the footer, the slot sentinel and half of the timestamp
    let path = structure.table_path("Events");
    let len = fs::metadata(&path)?.len();
    let cut = (FOOTER_SIZE + SLOT_SENTINEL_SIZE + 4) as u64;
    OpenOptions::new().write(true).open(&path)?.set_len(len - cut)?;

    let table = structure.open_database()?.table("Events")?;
    assert_eq!(table.count(), 1);
    let record = table.get_record_by_equal(0, 1)?.unwrap();
    assert_eq!(record.value(1), Some(&ColumnType::DateTime.default_value()));
    structure.shutdown()?;

    assert_eq!(fs::metadata(&path)?.len(), len);
    Ok(())
}

#[test]
fn missing_index_file_requires_rebuild() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = notes(&dir)?;
    fs::remove_file(structure.index_path("Notes"))?;

    let table = structure.open_database()?.table("Notes")?;
    assert!(table.needs_rebuild().is_some());
    assert!(table.create_result_set(0, 2).is_err());
    assert_eq!(table.records().count(), 2);

    structure.rebuild_indexes(false)?;
    let table = structure.database()?.table("Notes")?;
    assert_eq!(table.create_result_set(0, 2)?.count(), 1);

    Ok(())
}

#[test]
fn altered_version_byte_opens_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = Structure::new(dir.path(), "old");
    let def = structure.create_table("Mail")?;
    def.create_column("Id", ColumnType::Integer, false)?;
    structure.save_structure()?;
    corrupt(&structure.structure_path(), STRUCTURE_VERSION_OFFSET, 0x7F)?;

    let err = structure.load_structure().unwrap_err();
    assert!(
        matches!(err, StoreError::BackwardIncompatibility { found: 0x7F, .. }),
        "{err}"
    );
    assert!(!structure.is_loaded());
    assert!(!structure.table_path("Mail").exists());
    assert!(!structure.index_path("Mail").exists());

    Ok(())
}
