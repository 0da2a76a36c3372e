use std::path::Path;

use crunch::{
    ColumnType, CrunchError, Engine, OpenOptions, Row, RowValues, StatementState, StepOutcome,
};

fn collect(conn: &crunch::Connection, sql: &str) -> Result<Vec<Row>, CrunchError> {
    conn.query(sql)?.collect()
}

#[test]
fn test2_bad_query_reports_code_and_message() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    let err = conn.query("foo bar baz").unwrap_err();
    assert!(matches!(err, CrunchError::SqlError { .. }));
    assert!(
        err.to_string()
            .contains("SQL logic error: near \"foo\": syntax error"),
        "unexpected message: {err}"
    );
    assert_eq!(conn.live_statements(), 0);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_simple_select() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;

    let query = conn.query("select 1+1 as a")?;
    assert_eq!(query.columns()?, vec!["a".to_string()]);
    assert_eq!(query.num_columns()?, 1);
    let rows = query.collect::<Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("a"), Some(&RowValues::Int(2)));
    assert_eq!(serde_json::to_string(&rows)?, r#"[{"a":2}]"#);

    let tau = collect(&conn, "select 3.141592*2 as tau")?;
    let value = tau[0].get("tau").and_then(RowValues::as_float).unwrap_or_default();
    assert!((value - 6.283_185_4).abs() < 1e-3);

    conn.close()?;
    Ok(())
}

#[test]
fn test2_create_insert_select() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    conn.exec("create table foo(a string, b integer)")?;
    conn.exec("insert into foo(a,b) values ('a',1),('b',2)")?;
    assert_eq!(conn.changes(), 2);
    assert_eq!(conn.last_insert_rowid(), 2);

    let rows = collect(&conn, "select * from foo")?;
    let json = serde_json::to_value(&rows)?;
    assert_eq!(json, serde_json::json!([{"a": "a", "b": 1}, {"a": "b", "b": 2}]));
    for row in &rows {
        assert_eq!(row.column_names(), ["a", "b"]);
    }
    conn.close()?;
    Ok(())
}

#[test]
fn test2_every_value_type() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    let rows = collect(
        &conn,
        "select 7 as i, 1.25 as f, 'txt' as t, x'0102' as b, null as n",
    )?;
    let row = &rows[0];
    assert_eq!(row.get("i"), Some(&RowValues::Int(7)));
    assert_eq!(row.get("f"), Some(&RowValues::Float(1.25)));
    assert_eq!(row.get("t").and_then(RowValues::as_text), Some("txt"));
    assert_eq!(row.get("b").and_then(RowValues::as_blob), Some(&[1u8, 2][..]));
    assert!(row.get("n").is_some_and(RowValues::is_null));
    conn.close()?;
    Ok(())
}

#[test]
fn test2_types_can_differ_between_rows() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    conn.exec_batch("create table mixed(v); insert into mixed values (1), ('two'), (null);")?;
    let kinds: Vec<ColumnType> = collect(&conn, "select v from mixed order by rowid")?
        .iter()
        .map(|row| row.values()[0].column_type())
        .collect();
    assert_eq!(kinds, vec![ColumnType::Integer, ColumnType::Text, ColumnType::Null]);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_exhausted_query_stays_exhausted() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    let mut query = conn.query("select 1 union all select 2")?;
    assert!(query.next().is_some());
    assert!(query.next().is_some());
    assert!(query.next().is_none());
    assert!(query.is_exhausted());
    assert_eq!(query.state(), StatementState::Finalized);
    assert!(query.next().is_none());
    assert!(query.next().is_none());
    assert!(matches!(query.columns(), Err(CrunchError::MisuseError(_))));
    assert_eq!(conn.live_statements(), 0);
    drop(query);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_abandoned_query_is_finalized_on_drop() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    {
        let mut query = conn.query("select 1 union all select 2 union all select 3")?;
        assert!(query.next().is_some());
        assert_eq!(conn.live_statements(), 1);
    }
    assert_eq!(conn.live_statements(), 0);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_step_error_surfaces_from_iterator() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    let mut query = conn.query("select abs(-9223372036854775807 - 1)")?;
    match query.next() {
        Some(Err(err)) => assert!(err.to_string().contains("integer overflow"), "{err}"),
        other => panic!("expected a step error, got {other:?}"),
    }
    assert!(query.next().is_none());
    drop(query);
    assert_eq!(conn.live_statements(), 0);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_exec_step_error_still_finalizes() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    conn.exec("create table u(a unique)")?;
    conn.exec("insert into u values (1)")?;
    let err = conn.exec("insert into u values (1)").unwrap_err();
    assert!(err.to_string().contains("UNIQUE constraint failed: u.a"), "{err}");
    assert!(err.status().is_some());
    assert_eq!(conn.live_statements(), 0);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_exec_batch_runs_every_statement() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    let changed = conn.exec_batch(
        "create table b(x);\n insert into b values (1);\n insert into b values (2); -- done\n",
    )?;
    assert_eq!(changed, 2);
    assert_eq!(conn.last_insert_rowid(), 2);
    let rows = collect(&conn, "select count(*) as n from b")?;
    assert_eq!(rows[0].get("n"), Some(&RowValues::Int(2)));

    let err = conn
        .exec_batch("insert into b values (3); nonsense; insert into b values (4);")
        .unwrap_err();
    assert!(matches!(err, CrunchError::SqlError { .. }));
    let rows = collect(&conn, "select count(*) as n from b")?;
    assert_eq!(rows[0].get("n"), Some(&RowValues::Int(3)));

    assert_eq!(conn.exec_batch("")?, 0);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_exec_batch_counts_only_its_own_changes() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    let changed = conn.exec_batch("create table a(x); insert into a values (1), (2);")?;
    assert_eq!(changed, 2);

    // The engine's last-statement counter still reads 2 after DDL.
    assert_eq!(conn.exec_batch("create table z(x)")?, 0);
    assert_eq!(conn.changes(), 2);

    assert_eq!(conn.exec_batch("select * from a")?, 0);
    assert_eq!(
        conn.exec_batch("update a set x = x + 1; delete from a where x = 3;")?,
        3
    );
    assert_eq!(conn.total_changes(), 5);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_statement_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    let mut stmt = conn.prepare("select 5 as five")?;
    assert_eq!(stmt.state(), StatementState::Prepared);
    assert_eq!(stmt.columns()?, vec!["five".to_string()]);
    assert!(matches!(stmt.column_type(0), Err(CrunchError::MisuseError(_))));

    assert_eq!(stmt.step()?, StepOutcome::Row);
    assert_eq!(stmt.column_type(0)?, ColumnType::Integer);
    assert_eq!(stmt.read_value(0)?, RowValues::Int(5));
    assert!(matches!(stmt.column_name(1), Err(CrunchError::MisuseError(_))));

    assert_eq!(stmt.step()?, StepOutcome::Done);
    assert_eq!(stmt.step()?, StepOutcome::Done);
    stmt.finalize()?;
    assert!(matches!(stmt.finalize(), Err(CrunchError::MisuseError(_))));
    assert!(matches!(stmt.step(), Err(CrunchError::MisuseError(_))));
    drop(stmt);

    let mut empty = conn.prepare("  ")?;
    assert!(empty.is_empty());
    assert_eq!(empty.step()?, StepOutcome::Done);
    empty.finalize()?;
    drop(empty);

    conn.close()?;
    Ok(())
}

#[test]
fn test2_read_row_only_on_an_available_row() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let conn = engine.open_memory()?;
    let mut stmt = conn.prepare("select 1 as a, 'b' as a, null as c")?;
    assert!(matches!(stmt.read_row(), Err(CrunchError::MisuseError(_))));

    assert_eq!(stmt.step()?, StepOutcome::Row);
    let row = stmt.read_row()?;
    assert_eq!(row.column_names(), ["a", "a", "c"]);
    assert_eq!(row.get("a"), Some(&RowValues::Int(1)));
    assert_eq!(row.get_by_index(1), Some(&RowValues::Text("b".into())));
    assert_eq!(row.values()[2], stmt.read_value(2)?);
    assert!(matches!(stmt.read_value(3), Err(CrunchError::MisuseError(_))));

    assert_eq!(stmt.step()?, StepOutcome::Done);
    assert!(matches!(stmt.read_row(), Err(CrunchError::MisuseError(_))));
    stmt.finalize()?;
    assert!(matches!(stmt.read_row(), Err(CrunchError::MisuseError(_))));
    drop(stmt);
    conn.close()?;
    Ok(())
}

#[test]
fn test2_file_image_and_read_only() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("people.db");
    let path_str = path.to_string_lossy().into_owned();
    let engine = Engine::initialize()?;

    let conn = engine.open(&OpenOptions::file(path_str.as_str()))?;
    conn.exec_batch("create table people(name text); insert into people values ('ada');")?;
    conn.close()?;

    let image = std::fs::read(&path)?;
    let from_image = engine.open(&OpenOptions::image(image))?;
    assert_ne!(from_image.uri(), path_str);
    let rows = collect(&from_image, "select name from people")?;
    assert_eq!(rows[0].get("name").and_then(RowValues::as_text), Some("ada"));
    from_image.close()?;

    let options = OpenOptions::builder()
        .path(path_str.as_str())
        .read_only(true)
        .finish()?;
    let read_only = engine.open(&options)?;
    let err = read_only.exec("insert into people values ('bob')").unwrap_err();
    assert!(err.to_string().contains("readonly"), "{err}");
    read_only.close()?;
    Ok(())
}

#[test]
fn test2_staged_image_is_removed_with_its_connection() -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::initialize()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("seed.db");
    let writer = engine.open(&OpenOptions::file(path.to_string_lossy()))?;
    writer.exec("create table t(x)")?;
    writer.close()?;
    let image = std::fs::read(&path)?;

    let closed = engine.open(&OpenOptions::image(image.clone()))?;
    let closed_path = closed
        .staged_image()
        .map(Path::to_path_buf)
        .ok_or("no staged image")?;
    assert!(closed_path.exists());
    closed.close()?;
    assert!(!closed_path.exists());

    let dropped = engine.open(&OpenOptions::image(image))?;
    let dropped_path = dropped
        .staged_image()
        .map(Path::to_path_buf)
        .ok_or("no staged image")?;
    assert_ne!(dropped_path, closed_path);
    drop(dropped);
    assert!(!dropped_path.exists());

    let memory = engine.open_memory()?;
    assert!(memory.staged_image().is_none());
    memory.close()?;
    Ok(())
}

#[test]
fn test2_open_failure_is_a_connection_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("nope").join("missing.db");
    let engine = Engine::initialize()?;
    let options = OpenOptions::builder()
        .path(missing.to_string_lossy())
        .read_only(true)
        .finish()?;
    let err = engine.open(&options).unwrap_err();
    assert!(matches!(err, CrunchError::ConnectionError(_)), "{err}");
    Ok(())
}
