use assert_fs::TempDir;
use chrono::NaiveDate;
use flatdb::{ColumnType, StoreError, Structure, Table, Value};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const ID: usize = 0;
const SUBJECT: usize = 1;
const RECEIVED: usize = 2;

fn mail_structure(dir: &TempDir) -> Result<Structure> {
    let mut structure = Structure::new(dir.path(), "mail");
    let def = structure.create_table("Mail")?;
    def.create_column("Id", ColumnType::Integer, false)?;
    def.create_column("Subject", ColumnType::String, true)?;
    def.create_column("Received", ColumnType::DateTime, true)?;
    def.set_index("Id")?;
    def.set_index("Subject")?;
    structure.save_structure()?;
    structure.open_database()?;
    Ok(structure)
}

fn insert(table: &mut Table, id: i32, subject: &str) -> Result<u32> {
    let mut record = table.new_record()?;
    record.set_value(ID, id)?;
    record.set_value(SUBJECT, subject)?;
    record.commit(table)?;
    Ok(record.id())
}

#[test]
fn committed_records_survive_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let received = NaiveDate::from_ymd_opt(2024, 3, 9)
        .and_then(|d| d.and_hms_opt(8, 30, 0))
        .unwrap();

    let table = structure.database()?.table_mut("Mail")?;
    for i in 0..5 {
        insert(table, i, &format!("subject {i}"))?;
    }
    let mut record = table.new_record()?;
    record.set_value(ID, 99)?;
    record.set_value(RECEIVED, received)?;
    record.commit(table)?;
    assert_eq!(table.count(), 6);
    assert!(table.is_dirty());
    structure.shutdown()?;

    let mut structure = Structure::new(dir.path(), "mail");
    let table = structure.open_database()?.table("Mail")?;
    assert_eq!(table.count(), 6);
    assert!(!table.is_dirty());

    let found = table.get_record_by_equal(ID, 3)?.unwrap();
    assert_eq!(found.string_value(SUBJECT), Some("subject 3"));
    let found = table.get_record_by_equal(ID, 99)?.unwrap();
    assert_eq!(found.datetime_value(RECEIVED), Some(received));
    assert_eq!(found.string_value(SUBJECT), Some(""));
    assert!(table.get_record_by_equal(ID, 42)?.is_none());

    Ok(())
}

#[test]
fn delete_leaves_every_index() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let table = structure.database()?.table_mut("Mail")?;
    insert(table, 1, "keep")?;
    insert(table, 2, "drop")?;

    let record = table.get_record_by_equal(ID, 2)?.unwrap();
    record.delete(table)?;

    assert_eq!(table.count(), 1);
    assert!(table.get_record_by_equal(ID, 2)?.is_none());
    assert_eq!(table.create_result_set(SUBJECT, "drop")?.count(), 0);
    assert_eq!(table.records().count(), 1);

    Ok(())
}

#[test]
fn identifiers_are_never_reused() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let table = structure.database()?.table_mut("Mail")?;
    let first = insert(table, 1, "a")?;
    let second = insert(table, 2, "b")?;
    table.get_record_by_equal(ID, 2)?.unwrap().delete(table)?;
    structure.shutdown()?;

    let mut structure = Structure::new(dir.path(), "mail");
    let table = structure.open_database()?.table_mut("Mail")?;
    let third = insert(table, 3, "c")?;

    assert_eq!((first, second), (0, 1));
    assert_eq!(third, 2);
    Ok(())
}

#[test]
fn uncommitted_record_has_no_effect() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let table = structure.database()?.table_mut("Mail")?;

    let mut record = table.new_record()?;
    record.set_value(ID, 7)?;
    assert_eq!(table.count(), 0);
    assert!(table.get_record_by_equal(ID, 7)?.is_none());

    let mut missing = table.new_record()?;
    missing.set_value(SUBJECT, "no id")?;
    assert!(matches!(
        missing.commit(table),
        Err(StoreError::MissingValue(column)) if column == "Id"
    ));
    assert!(matches!(
        record.set_value(ID, "seven"),
        Err(StoreError::TypeMismatch { .. })
    ));
    assert_eq!(table.count(), 0);

    Ok(())
}

#[test]
fn abandoned_record_leaves_indexes_usable() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let table = structure.database()?.table_mut("Mail")?;
    insert(table, 1, "kept")?;
    let abandoned = table.new_record()?;
    assert_eq!(abandoned.id(), 1);
    drop(abandoned);
    structure.shutdown()?;

    let mut structure = Structure::new(dir.path(), "mail");
    let table = structure.open_database()?.table_mut("Mail")?;
    assert_eq!(table.count(), 1);
    assert!(table.needs_rebuild().is_none());
    let found = table.get_record_by_equal(ID, 1)?.unwrap();
    assert_eq!(found.string_value(SUBJECT), Some("kept"));
    assert_eq!(insert(table, 2, "next")?, 1);

    Ok(())
}

#[test]
fn updates_move_index_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let table = structure.database()?.table_mut("Mail")?;
    insert(table, 1, "old subject")?;

    let mut record = table.get_record_by_equal(ID, 1)?.unwrap();
    record.set_value(SUBJECT, "a new and noticeably longer subject")?;
    record.commit(table)?;

    assert_eq!(table.count(), 1);
    assert_eq!(table.create_result_set(SUBJECT, "old subject")?.count(), 0);
    let found: Vec<flatdb::Record> = table
        .create_result_set(SUBJECT, "a new and noticeably longer subject")?
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), record.id());

    Ok(())
}

fn items_structure(dir: &TempDir) -> Result<Structure> {
    let mut structure = Structure::new(dir.path(), "items");
    let def = structure.create_table("Items")?;
    def.create_column("Id", ColumnType::Integer, false)?;
    def.create_column("Type", ColumnType::Integer, false)?;
    def.create_column("Number", ColumnType::Integer, false)?;
    def.set_compound_index_with_value(&["Type", "Id"], &["Number"])?;
    structure.save_structure()?;

    let table = structure.open_database()?.table_mut("Items")?;
    for i in 0..10 {
        let mut record = table.new_record()?;
        record.set_value(0, i)?;
        record.set_value(1, i)?;
        record.set_value(2, i * 100)?;
        record.commit(table)?;
    }
    Ok(structure)
}

#[test]
fn compound_index_with_value_lookups() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = items_structure(&dir)?;
    let table = structure.database()?.table("Items")?;

    let found = table.get_record_by_equal(1, 2)?.unwrap();
    assert_eq!(found.int_value(2), Some(200));

    let matches = table
        .create_result_set_with_value(1, 2, 2, 200, true)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].int_value(2), Some(200));
    assert_eq!(matches[0].values(), found.values());

    assert_eq!(table.create_result_set_with_value(1, 2, 2, 201, true)?.count(), 0);
    assert_eq!(table.create_result_set_with_value(1, 2, 2, 150, false)?.count(), 1);
    assert_eq!(table.create_result_set_with_value(1, 2, 2, 201, false)?.count(), 0);

    Ok(())
}

#[test]
fn index_with_value_serves_inlined_columns() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = items_structure(&dir)?;
    let table = structure.database()?.table("Items")?;

    let set = table.create_counted_result_set_with_value(1, 7, 2, 0, false)?;
    assert_eq!(set.len(), 1);
    let record = set.get(0).unwrap()?;
    assert_eq!(set.covered_value(0, 2), Some(&Value::Int(700)));
    assert_eq!(set.covered_value(0, 2), record.value(2));
    assert_eq!(record.int_value(2), Some(700));
    assert_eq!(set.covered_value(0, 0), Some(&Value::Int(7)));
    assert_eq!(set.covered_value(1, 2), None);

    let by_type = table.create_counted_result_set(1, 4)?;
    assert_eq!(by_type.covered_value(0, 2), Some(&Value::Int(400)));

    Ok(())
}

#[test]
fn sorted_and_counted_result_sets() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = items_structure(&dir)?;
    let table = structure.database()?.table_mut("Items")?;
    for number in [5, 900, 40] {
        let mut record = table.new_record()?;
        record.set_value(0, 100 + number)?;
        record.set_value(1, 3)?;
        record.set_value(2, number)?;
        record.commit(table)?;
    }

    let numbers: Vec<i32> = table
        .create_sorted_result_set(1, 3, 2, false)?
        .map(|r| r.map(|r| r.int_value(2).unwrap_or_default()))
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(numbers, vec![900, 300, 40, 5]);

    let all = table.create_counted_result_set_all(&[1])?;
    assert_eq!(all.len(), 13);
    let first = all.get(0).unwrap()?;
    assert_eq!(first.int_value(1), Some(0));
    assert!(all.get(13).is_none());
    all.dispose();

    let typed = table.create_counted_result_set(1, 3)?;
    assert_eq!(typed.len(), 4);
    assert_eq!(typed.iter().count(), 4);

    let mut open = typed.into_iter();
    assert!(open.next().is_some());
    open.dispose();
    let mut record = table.new_record()?;
    record.set_value(0, 500)?;
    record.set_value(1, 3)?;
    record.set_value(2, 1)?;
    record.commit(table)?;
    assert_eq!(table.create_result_set(1, 3)?.count(), 5);

    Ok(())
}

#[test]
fn defragment_compacts_and_keeps_identifiers() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let path = structure.table_path("Mail");
    let table = structure.database()?.table_mut("Mail")?;
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(insert(table, i, &"x".repeat(40))?);
    }
    for i in [1, 4] {
        table.get_record_by_equal(ID, i)?.unwrap().delete(table)?;
    }
    table.flush()?;
    let before = std::fs::metadata(&path)?.len();

    table.defragment()?;
    let after = std::fs::metadata(&path)?.len();
    assert!(after < before, "{after} should be below {before}");
    assert_eq!(table.count(), 4);

    let found = table.get_record_by_equal(ID, 5)?.unwrap();
    assert_eq!(found.id(), ids[5]);
    assert!(table.get_record_by_equal(ID, 4)?.is_none());
    structure.shutdown()?;

    let mut structure = Structure::new(dir.path(), "mail");
    let table = structure.open_database()?.table_mut("Mail")?;
    assert_eq!(table.count(), 4);
    assert_eq!(insert(table, 10, "next")?, 6);

    Ok(())
}

#[test]
fn new_index_needs_rebuild() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let table = structure.database()?.table_mut("Mail")?;
    insert(table, 1, "one")?;
    structure.shutdown()?;

    structure.table_def_mut("Mail")?.set_index("Received")?;
    structure.save_structure()?;
    let table = structure.open_database()?.table("Mail")?;
    assert!(table.needs_rebuild().is_some());
    let err = table.get_record_by_equal(ID, 1).unwrap_err();
    assert!(err.is_corruption());

    structure.rebuild_indexes(false)?;
    let table = structure.database()?.table("Mail")?;
    assert!(table.get_record_by_equal(ID, 1)?.is_some());
    let unset = ColumnType::DateTime.default_value();
    assert_eq!(table.create_result_set(RECEIVED, unset)?.count(), 1);

    Ok(())
}

#[test]
fn unknown_names_are_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let mut structure = mail_structure(&dir)?;
    let database = structure.database()?;

    assert!(matches!(database.table("Nope"), Err(StoreError::NoSuchTable(_))));
    let table = database.table("Mail")?;
    assert!(matches!(table.column_ordinal("Nope"), Err(StoreError::NoSuchColumn(_))));
    assert_eq!(table.column_ordinal("Received")?, RECEIVED);

    Ok(())
}
