//! File-backed SQLite behaviour: WAL mode, persistence and a reader alongside a writer.

use unisql_core::{Backend, DatabaseConfig, Value};
use unisql_sqlite::{SqliteConfig, SqliteConnection};

fn temp_db() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("app.db").to_string_lossy().into_owned();
    (dir, path)
}

#[test]
fn sqlite_file_database_uses_wal() {
    let (_dir, path) = temp_db();
    let conn = SqliteConnection::open_file(&path).unwrap();
    let rs = conn.query("PRAGMA journal_mode", &[]).unwrap();
    assert_eq!(
        rs.rows()[0].get(0).map(str::to_ascii_lowercase).as_deref(),
        Some("wal")
    );
}

#[test]
fn sqlite_data_persists_across_connections() {
    let (_dir, path) = temp_db();
    {
        let conn = SqliteConnection::open_file(&path).unwrap();
        conn.execute_raw("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
            .unwrap();
        conn.execute("INSERT INTO notes (body) VALUES (?)", &[Value::from("hello")])
            .unwrap();
    }
    let conn = SqliteConnection::open_file(&path).unwrap();
    let rs = conn.query("SELECT body FROM notes", &[]).unwrap();
    assert_eq!(rs.rows()[0].get_string("body"), Some("hello"));
}

#[test]
fn sqlite_reader_sees_committed_data_while_writer_is_open() {
    let (_dir, path) = temp_db();
    let writer = SqliteConnection::open_file(&path).unwrap();
    writer
        .execute_raw("CREATE TABLE counters (n INTEGER); INSERT INTO counters VALUES (1);")
        .unwrap();

    let reader = SqliteConnection::open_file(&path).unwrap();
    writer.begin().unwrap();
    writer.execute("UPDATE counters SET n = 2", &[]).unwrap();

    // WAL lets the reader proceed and see the last committed value.
    let rs = reader.query("SELECT n FROM counters", &[]).unwrap();
    assert_eq!(rs.rows()[0].get_int("n"), Some(1));

    writer.commit().unwrap();
    let rs = reader.query("SELECT n FROM counters", &[]).unwrap();
    assert_eq!(rs.rows()[0].get_int("n"), Some(2));
}

#[test]
fn sqlite_config_from_url() {
    let (_dir, path) = temp_db();
    let config = DatabaseConfig::from_url(&format!("sqlite://{path}")).unwrap();
    let sqlite = SqliteConfig::from_database_config(&config).unwrap();
    assert_eq!(sqlite.path, path);
    let conn = SqliteConnection::open(&sqlite).unwrap();
    assert!(conn.ping().is_ok());
}
