mod common;

use common::TestWorkspace;
use csv_ingest::{
    backend::{RelationalBackend, SqliteBackend},
    history::{ATTEMPTS_LIMIT, ImportStatus},
    import::ImportEngine,
};

fn engine() -> ImportEngine {
    ImportEngine::new(SqliteBackend::open_in_memory().expect("open backend")).expect("engine")
}

fn query_string(engine: &ImportEngine, sql: &str) -> String {
    let conn = engine.backend().connection();
    let conn = conn.lock().expect("lock");
    conn.query_row(sql, [], |row| row.get::<_, String>(0))
        .expect("query")
}

fn query_i64(engine: &ImportEngine, sql: &str) -> i64 {
    let conn = engine.backend().connection();
    let conn = conn.lock().expect("lock");
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .expect("query")
}

fn exec(engine: &ImportEngine, sql: &str) {
    let conn = engine.backend().connection();
    let conn = conn.lock().expect("lock");
    conn.execute(sql, []).expect("exec");
}

#[test]
fn imports_a_routed_file_end_to_end() {
    let ws = TestWorkspace::new();
    ws.write(
        "fees_report_acme_123_20200101_50.csv",
        "id;amount\n1;9.50\n-----\nrows=1\n",
    );
    ws.write("notes.txt", "not a data file");
    let engine = engine();

    let summary = engine
        .run(&ws.sources_config("uploads"), None, None)
        .expect("run");
    assert_eq!(summary.files_seen, 1);
    assert_eq!(summary.files_imported, 1);
    assert_eq!(summary.rows_inserted, 1);
    assert_eq!(summary.files_failed, 0);

    let columns = engine
        .backend()
        .column_listing("fees_report")
        .expect("columns");
    for expected in [
        "id",
        "row_id",
        "amount",
        "file_name",
        "file_path",
        "client_name",
        "file_id",
        "file_date",
        "file_count",
        "created_at",
    ] {
        assert!(columns.iter().any(|c| c == expected), "missing {expected}");
    }

    assert_eq!(query_i64(&engine, "SELECT id FROM fees_report"), 1);
    assert_eq!(
        query_string(&engine, "SELECT row_id FROM fees_report"),
        "1"
    );
    assert_eq!(
        query_string(&engine, "SELECT amount FROM fees_report"),
        "9.50"
    );
    assert_eq!(
        query_string(&engine, "SELECT client_name FROM fees_report"),
        "acme"
    );
    assert_eq!(
        query_string(&engine, "SELECT file_date FROM fees_report"),
        "2020-01-01 00:00:00"
    );
    assert_eq!(
        query_string(&engine, "SELECT file_count FROM fees_report"),
        "50"
    );

    let record = engine
        .history()
        .find("uploads", "fees_report_acme_123_20200101_50.csv")
        .expect("history query")
        .expect("history record");
    assert_eq!(record.status, ImportStatus::Success);
    assert_eq!(record.attempts, 1);
    assert!(record.meta.expect("meta captured").contains("rows=1"));
    assert_eq!(record.errors, None);
}

#[test]
fn unchanged_file_is_skipped_on_the_next_run() {
    let ws = TestWorkspace::new();
    ws.write("fees_report_acme_123_20200101_1.csv", "id;amount\n1;9.50\n");
    let engine = engine();
    let config = ws.sources_config("uploads");

    engine.run(&config, None, None).expect("first run");
    let summary = engine.run(&config, None, None).expect("second run");
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.files_imported, 0);
    assert_eq!(query_i64(&engine, "SELECT COUNT(*) FROM fees_report"), 1);
}

#[test]
fn modified_file_is_reimported_and_upserted_in_place() {
    let ws = TestWorkspace::new();
    let path = "fees_report_acme_123_20200101_1.csv";
    ws.write(path, "id;amount\n1;9.50\n");
    let engine = engine();
    let config = ws.sources_config("uploads");
    engine.run(&config, None, None).expect("first run");

    ws.write(path, "id;amount\n1;10.00\n");
    // force a modification-time mismatch; filesystem clocks are too coarse
    exec(
        &engine,
        "UPDATE import_history SET file_modification_time = 1",
    );
    let summary = engine.run(&config, None, None).expect("second run");
    assert_eq!(summary.files_imported, 1);
    assert_eq!(summary.rows_updated, 1);
    assert_eq!(query_i64(&engine, "SELECT COUNT(*) FROM fees_report"), 1);
    assert_eq!(
        query_string(&engine, "SELECT amount FROM fees_report"),
        "10.00"
    );

    // a successful re-import resets the attempt counter
    let record = engine
        .history()
        .find("uploads", path)
        .expect("history query")
        .expect("record");
    assert_eq!(record.attempts, 1);
}

#[test]
fn schema_grows_additively_for_new_columns() {
    let ws = TestWorkspace::new();
    ws.write("fees_report_acme_1_20200101_1.csv", "id;amount\n1;9.50\n");
    let engine = engine();
    engine
        .run(&ws.sources_config("uploads"), None, None)
        .expect("first run");

    ws.write(
        "fees_report_acme_2_20200102_1.csv",
        "id,amount,currency\n1,3.25,EUR\n",
    );
    engine
        .run(&ws.sources_config("uploads"), None, None)
        .expect("second run");

    let columns = engine
        .backend()
        .column_listing("fees_report")
        .expect("columns");
    assert!(columns.iter().any(|c| c == "currency"));
    assert_eq!(query_i64(&engine, "SELECT COUNT(*) FROM fees_report"), 2);
    // the earlier row keeps its data, with NULL in the new column
    assert_eq!(
        query_i64(
            &engine,
            "SELECT COUNT(*) FROM fees_report WHERE currency IS NULL",
        ),
        1
    );
    assert_eq!(
        query_string(
            &engine,
            "SELECT amount FROM fees_report WHERE currency = 'EUR'",
        ),
        "3.25"
    );
}

#[test]
fn files_sharing_literal_id_values_do_not_collide() {
    let ws = TestWorkspace::new();
    ws.write("fees_report_acme_1_20200101_1.csv", "id;amount\n1;9.50\n");
    ws.write("fees_report_beta_2_20200102_1.csv", "id;amount\n1;4.00\n");
    let engine = engine();

    let summary = engine
        .run(&ws.sources_config("uploads"), None, None)
        .expect("run");
    assert_eq!(summary.files_imported, 2);
    assert_eq!(summary.files_failed, 0);
    assert_eq!(query_i64(&engine, "SELECT COUNT(*) FROM fees_report"), 2);
    // both rows keep their file-supplied identifier alongside distinct
    // engine-assigned identity values
    assert_eq!(
        query_i64(
            &engine,
            "SELECT COUNT(DISTINCT id) FROM fees_report WHERE row_id = '1'",
        ),
        2
    );
}

#[test]
fn unroutable_file_fails_then_retries_until_the_limit() {
    let ws = TestWorkspace::new();
    ws.write("bad.csv", "a;b\n1;2\n");
    let engine = engine();
    let config = ws.sources_config("uploads");

    let summary = engine.run(&config, None, None).expect("first run");
    assert_eq!(summary.files_failed, 1);
    let record = engine
        .history()
        .find("uploads", "bad.csv")
        .expect("history query")
        .expect("record");
    assert_eq!(record.status, ImportStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert!(record.errors.expect("errors recorded").contains("routed"));

    // still failing and under the limit: retried, attempts increment
    engine.run(&config, None, None).expect("second run");
    let record = engine
        .history()
        .find("uploads", "bad.csv")
        .expect("history query")
        .expect("record");
    assert_eq!(record.attempts, 2);

    // over the limit and unmodified: permanently skipped
    exec(
        &engine,
        &format!("UPDATE import_history SET attempts = {}", ATTEMPTS_LIMIT + 1),
    );
    let summary = engine.run(&config, None, None).expect("third run");
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.files_failed, 0);
    let record = engine
        .history()
        .find("uploads", "bad.csv")
        .expect("history query")
        .expect("record");
    assert_eq!(record.attempts, ATTEMPTS_LIMIT + 1);
}

#[test]
fn source_and_file_filters_narrow_the_run() {
    let ws = TestWorkspace::new();
    ws.write("fees_report_acme_1_20200101_1.csv", "id;amount\n1;9.50\n");
    ws.write("fees_report_acme_2_20200102_1.csv", "id;amount\n1;4.00\n");
    let engine = engine();
    let config = ws.sources_config("uploads");

    let summary = engine
        .run(&config, Some("elsewhere"), None)
        .expect("filtered run");
    assert_eq!(summary.files_seen, 0);

    let summary = engine
        .run(&config, Some("uploads"), Some("fees_report_acme_2_20200102_1.csv"))
        .expect("filtered run");
    assert_eq!(summary.files_seen, 1);
    assert_eq!(summary.files_imported, 1);
    assert_eq!(query_i64(&engine, "SELECT COUNT(*) FROM fees_report"), 1);
}
