use assert_cmd::prelude::*;
use assert_fs::TempDir;
use flatdb::{ColumnType, Structure};
use predicates::prelude::*;
use std::{
    io::Write,
    process::{Command, Stdio},
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn seed(dir: &TempDir) -> Result<()> {
    let mut structure = Structure::new(dir.path(), "mail");
    let def = structure.create_table("Mail")?;
    def.create_column("Id", ColumnType::Integer, false)?;
    def.create_column("Subject", ColumnType::String, true)?;
    def.set_index("Id")?;
    structure.save_structure()?;

    let table = structure.open_database()?.table_mut("Mail")?;
    for (id, subject) in [(1, "hello world!"), (2, "second"), (3, "third")] {
        let mut record = table.new_record()?;
        record.set_value(0, id)?;
        record.set_value(1, subject)?;
        record.commit(table)?;
    }
    structure.shutdown()?;
    Ok(())
}

fn run(dir: &TempDir, input: &[u8]) -> Result<std::process::Output> {
    let mut cmd = Command::cargo_bin("flatdb")?
        .arg("--dir")
        .arg(dir.path())
        .arg("mail")
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;

    cmd.stdin.as_mut().unwrap().write_all(input)?;
    Ok(cmd.wait_with_output()?)
}

#[test]
fn selects_records() -> Result<()> {
    let dir = TempDir::new()?;
    seed(&dir)?;

    run(&dir, b"select Mail\n.exit\n")?
        .assert()
        .success()
        .stdout(predicate::str::contains("Subject=\"hello world!\""))
        .stdout(predicate::str::contains("2: Id=3 Subject=\"third\""));
    Ok(())
}

#[test]
fn counts_and_lists_tables() -> Result<()> {
    let dir = TempDir::new()?;
    seed(&dir)?;

    run(&dir, b".tables\n.count Mail\n.exit\n")?
        .assert()
        .success()
        .stdout(predicate::str::contains("Mail (3)"))
        .stdout(predicate::str::contains("mail > 3\n"));
    Ok(())
}

#[test]
fn rebuild_and_defrag_report_totals() -> Result<()> {
    let dir = TempDir::new()?;
    seed(&dir)?;

    run(&dir, b".rebuild\n.rebuild aggressive\n.defrag Mail\n")?
        .assert()
        .success()
        .stdout(predicate::str::contains("Mail: 3 live, 0 salvaged, 0 lost"))
        .stdout(predicate::str::contains("Mail: 3 live\n"));
    Ok(())
}

#[test]
fn unknown_input_reports_error() -> Result<()> {
    let dir = TempDir::new()?;
    seed(&dir)?;

    run(&dir, b".drop Mail\ninsert 1 hi\nselect Nope\n.layout\n.exit\n")?
        .assert()
        .success()
        .stdout(predicate::str::contains("error: unknown command `.drop Mail`."))
        .stdout(predicate::str::contains("error: unrecognized statement `insert 1 hi`"))
        .stdout(predicate::str::contains("error: no such table `Nope`"))
        .stdout(predicate::str::contains("Slot overhead: 7"));
    Ok(())
}

#[test]
fn missing_database_fails() -> Result<()> {
    let dir = TempDir::new()?;

    Command::cargo_bin("flatdb")?
        .arg("--dir")
        .arg(dir.path())
        .arg("mail")
        .stdin(Stdio::null())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no database `mail`"));
    Ok(())
}
