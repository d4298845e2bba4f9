use std::fs;
use std::path::Path;

use exporter_logging::init_test_logging;
use pretty_assertions::assert_eq;
use query_catalog::{
    default_catalog, load_queries, CatalogError, ColumnUsage, ValidationError, ValidationPolicy,
};
use tempfile::TempDir;

const LOCKS: &str = r#"
pg_locks:
  desc: Lock counts, overridden
  query:
    - sql: SELECT 'db' AS datname, 3 AS count
  metrics:
    - name: datname
      usage: LABEL
    - name: count
      usage: COUNTER
    - name: COUNT
      usage: GAUGE
  ttl: 10
"#;

const CUSTOM: &str = r#"
- name: app_jobs
  queries:
    - sql: SELECT queue, count(*) AS pending FROM jobs GROUP BY queue
  columns:
    - name: queue
      usage: label
    - name: pending
      usage: gauge
- name: app_broken
  queries:
    - sql: SELECT 1 AS one
  columns:
    - name: one
      usage: summary
"#;

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn loads_directory_in_name_order() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    write(dir.path(), "b_custom.yml", CUSTOM);
    write(dir.path(), "a_locks.yaml", LOCKS);
    write(dir.path(), "notes.txt", "not yaml at all: [");

    let loaded = load_queries(dir.path(), ValidationPolicy::Skip).unwrap();

    assert_eq!(
        loaded.files.iter().map(|f| f.file_name()).collect::<Vec<_>>(),
        vec!["a_locks.yaml", "b_custom.yml"]
    );
    assert_eq!(
        loaded.files[0].checksum,
        format!("{:x}", md5::compute(LOCKS.as_bytes()))
    );
    assert!(loaded.files[0].loaded());
    // app_broken was rejected
    assert!(!loaded.files[1].loaded());
    assert_eq!(
        loaded.instances.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
        vec!["pg_locks", "app_jobs"]
    );
    // the duplicate COUNT column was dropped
    assert_eq!(loaded.instances[0].columns.len(), 2);
    assert_eq!(
        loaded.instances[0].column("count").unwrap().usage,
        ColumnUsage::Counter
    );
}

#[test]
fn fail_fast_rejects_invalid_instance() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "custom.yaml", CUSTOM);

    let err = load_queries(dir.path(), ValidationPolicy::FailFast).unwrap_err();
    match err {
        CatalogError::Validation { source, .. } => assert_eq!(
            source,
            ValidationError::ColumnUsage {
                instance: "app_broken".into(),
                column: "one".into(),
                usage: "summary".into(),
            }
        ),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn parse_errors_are_recorded_unless_failing_fast() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(&path, "pg_locks: [unterminated").unwrap();

    let loaded = load_queries(&path, ValidationPolicy::Skip).unwrap();
    assert!(loaded.instances.is_empty());
    assert_eq!(loaded.files.len(), 1);
    assert!(!loaded.files[0].loaded());
    assert!(!loaded.files[0].checksum.is_empty());

    assert!(matches!(
        load_queries(&path, ValidationPolicy::FailFast),
        Err(CatalogError::Parse { .. })
    ));
}

#[test]
fn missing_path_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        load_queries(&dir.path().join("nope.yaml"), ValidationPolicy::Skip),
        Err(CatalogError::Io { .. })
    ));
}

#[test]
fn overrides_replace_defaults_in_place() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.yaml");
    fs::write(&path, LOCKS).unwrap();

    let defaults = default_catalog();
    let loaded = load_queries(&path, ValidationPolicy::Skip).unwrap();
    let merged = defaults.merged(loaded.instances);

    assert_eq!(merged.len(), defaults.len());
    assert_eq!(
        merged.iter().map(|i| i.name.clone()).collect::<Vec<_>>(),
        defaults.iter().map(|i| i.name.clone()).collect::<Vec<_>>()
    );
    let locks = merged.get("pg_locks").unwrap();
    assert_eq!(locks.description, "Lock counts, overridden");
    assert_eq!(locks.ttl, 10.0);
    assert_eq!(
        defaults.get("pg_locks").unwrap().description,
        "Locks held, by database and lock mode"
    );
}
