use super::*;
use catalog::Column;
use std::time::Duration;
use tempfile::tempdir;
use types::{SqlType, Value};

fn test_config(dir: &std::path::Path) -> Config {
    Config::builder()
        .data_dir(dir.to_path_buf())
        .page_size(4096)
        .page_cache_capacity(32)
        .wal_max_batch_size(8)
        .wal_max_batch_delay(Duration::from_millis(5))
        .build()
}

fn users_columns() -> Vec<Column> {
    vec![
        Column::new("id", SqlType::Int),
        Column::new("name", SqlType::Text),
    ]
}

fn open_with_users(dir: &std::path::Path) -> Database {
    let db = Database::open(test_config(dir)).unwrap();
    db.execute(Plan::CreateTable {
        table: "users".into(),
        columns: users_columns(),
    })
    .unwrap();
    db
}

#[test]
fn insert_and_get_round_trip() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());

    let result = db
        .execute(Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(1), Value::Text("ada".into())]),
        })
        .unwrap();
    let row_ref = match result {
        QueryResult::RowRef(r) => r,
        other => panic!("expected RowRef, got {other:?}"),
    };

    let got = db
        .execute(Plan::Get {
            table: "users".into(),
            row_ref,
        })
        .unwrap();
    match got {
        QueryResult::Rows(batch) => {
            assert_eq!(batch.columns, vec!["id", "name"]);
            assert_eq!(
                batch.rows[0].values,
                vec![Value::Int(1), Value::Text("ada".into())]
            );
        }
        other => panic!("expected Rows, got {other:?}"),
    }
}

#[test]
fn update_then_get_reflects_new_value() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());

    let row_ref = match db
        .execute(Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(1), Value::Text("ada".into())]),
        })
        .unwrap()
    {
        QueryResult::RowRef(r) => r,
        _ => unreachable!(),
    };

    db.execute(Plan::Update {
        table: "users".into(),
        row_ref,
        row: Row::new(vec![Value::Int(1), Value::Text("ada lovelace".into())]),
    })
    .unwrap();

    match db
        .execute(Plan::Get {
            table: "users".into(),
            row_ref,
        })
        .unwrap()
    {
        QueryResult::Rows(batch) => {
            assert_eq!(
                batch.rows[0].values,
                vec![Value::Int(1), Value::Text("ada lovelace".into())]
            );
        }
        other => panic!("expected Rows, got {other:?}"),
    }
}

#[test]
fn delete_then_get_fails() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());

    let row_ref = match db
        .execute(Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(1), Value::Text("ada".into())]),
        })
        .unwrap()
    {
        QueryResult::RowRef(r) => r,
        _ => unreachable!(),
    };

    db.execute(Plan::Delete {
        table: "users".into(),
        row_ref,
    })
    .unwrap();

    let err = db
        .execute(Plan::Get {
            table: "users".into(),
            row_ref,
        })
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

#[test]
fn scan_with_no_predicate_returns_every_row() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());

    for i in 0..5 {
        db.execute(Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(i), Value::Text(format!("user-{i}"))]),
        })
        .unwrap();
    }

    match db
        .execute(Plan::Scan {
            table: "users".into(),
            predicate: None,
        })
        .unwrap()
    {
        QueryResult::Rows(batch) => assert_eq!(batch.rows.len(), 5),
        other => panic!("expected Rows, got {other:?}"),
    }
}

#[test]
fn scan_with_equality_predicate_uses_hash_index_when_present() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());
    db.execute(Plan::CreateIndex {
        table: "users".into(),
        index_name: "idx_id".into(),
        columns: vec!["id".into()],
    })
    .unwrap();

    for i in 0..5 {
        db.execute(Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(i), Value::Text(format!("user-{i}"))]),
        })
        .unwrap();
    }

    match db
        .execute(Plan::Scan {
            table: "users".into(),
            predicate: Some(Predicate {
                column: "id".into(),
                op: CompareOp::Eq,
                value: Value::Int(3),
            }),
        })
        .unwrap()
    {
        QueryResult::Rows(batch) => {
            assert_eq!(batch.rows.len(), 1);
            assert_eq!(batch.rows[0].values[0], Value::Int(3));
        }
        other => panic!("expected Rows, got {other:?}"),
    }
}

#[test]
fn prepare_and_execute_prepared_reuses_plan_with_new_row() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());

    db.prepare(
        "insert_user",
        Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![]),
        },
    );

    db.execute_prepared(
        "insert_user",
        Some(Row::new(vec![Value::Int(1), Value::Text("a".into())])),
    )
    .unwrap();
    db.execute_prepared(
        "insert_user",
        Some(Row::new(vec![Value::Int(2), Value::Text("b".into())])),
    )
    .unwrap();

    match db
        .execute(Plan::Scan {
            table: "users".into(),
            predicate: None,
        })
        .unwrap()
    {
        QueryResult::Rows(batch) => assert_eq!(batch.rows.len(), 2),
        other => panic!("expected Rows, got {other:?}"),
    }
}

#[test]
fn batch_execute_commits_once_for_the_whole_batch() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());

    let before = db.wal_stats().batches_committed;

    let plans = (0..4)
        .map(|i| Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(i), Value::Text(format!("user-{i}"))]),
        })
        .collect();
    let results = db.batch_execute(plans).unwrap();
    assert_eq!(results.len(), 4);

    let after = db.wal_stats().batches_committed;
    assert_eq!(after - before, 1);
}

#[test]
fn batch_execute_rejects_row_ref_from_a_different_table() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());
    db.execute(Plan::CreateTable {
        table: "orders".into(),
        columns: vec![Column::new("id", SqlType::Int)],
    })
    .unwrap();

    let user_ref = match db
        .execute(Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(1), Value::Text("a".into())]),
        })
        .unwrap()
    {
        QueryResult::RowRef(r) => r,
        _ => unreachable!(),
    };

    let before = db.wal_stats().batches_committed;
    let err = db
        .batch_execute(vec![Plan::Delete {
            table: "orders".into(),
            row_ref: user_ref,
        }])
        .unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));

    // Nothing was committed: the batch never applied any mutation.
    assert_eq!(db.wal_stats().batches_committed, before);
    assert!(
        db.execute(Plan::Get {
            table: "users".into(),
            row_ref: user_ref,
        })
        .is_ok(),
        "the user row must be untouched by the aborted batch"
    );
}

#[test]
fn batch_execute_rejects_schema_changing_plans() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());

    let err = db
        .batch_execute(vec![Plan::CreateTable {
            table: "orders".into(),
            columns: vec![Column::new("id", SqlType::Int)],
        }])
        .unwrap_err();
    assert!(matches!(err, DbError::SchemaViolation(_)));
}

#[test]
fn close_then_reopen_preserves_data() {
    let dir = tempdir().unwrap();
    {
        let db = open_with_users(dir.path());
        db.execute(Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(1), Value::Text("ada".into())]),
        })
        .unwrap();
        db.close().unwrap();
    }

    let db = Database::open(test_config(dir.path())).unwrap();
    match db
        .execute(Plan::Scan {
            table: "users".into(),
            predicate: None,
        })
        .unwrap()
    {
        QueryResult::Rows(batch) => assert_eq!(batch.rows.len(), 1),
        other => panic!("expected Rows, got {other:?}"),
    }
}

#[test]
fn reopen_without_close_recovers_committed_writes_from_the_wal() {
    let dir = tempdir().unwrap();
    {
        let db = open_with_users(dir.path());
        db.execute(Plan::Insert {
            table: "users".into(),
            row: Row::new(vec![Value::Int(1), Value::Text("ada".into())]),
        })
        .unwrap();
        // No `close()` call: simulates a crash after the WAL commit
        // resolved but before any checkpoint was recorded.
    }

    let db = Database::open(test_config(dir.path())).unwrap();
    match db
        .execute(Plan::Scan {
            table: "users".into(),
            predicate: None,
        })
        .unwrap()
    {
        QueryResult::Rows(batch) => assert_eq!(batch.rows.len(), 1),
        other => panic!("expected Rows, got {other:?}"),
    }
}

#[test]
fn create_index_then_insert_is_reflected_in_lookups() {
    let dir = tempdir().unwrap();
    let db = open_with_users(dir.path());
    db.execute(Plan::CreateIndex {
        table: "users".into(),
        index_name: "idx_id".into(),
        columns: vec!["id".into()],
    })
    .unwrap();

    db.execute(Plan::Insert {
        table: "users".into(),
        row: Row::new(vec![Value::Int(42), Value::Text("answer".into())]),
    })
    .unwrap();

    match db
        .execute(Plan::Scan {
            table: "users".into(),
            predicate: Some(Predicate {
                column: "id".into(),
                op: CompareOp::Eq,
                value: Value::Int(42),
            }),
        })
        .unwrap()
    {
        QueryResult::Rows(batch) => assert_eq!(batch.rows.len(), 1),
        other => panic!("expected Rows, got {other:?}"),
    }
}
