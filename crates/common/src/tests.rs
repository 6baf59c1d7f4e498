use super::*;
use std::io;

#[test]
fn config_defaults_are_sane() {
    let cfg = Config::default();
    assert_eq!(cfg.page_size, 4096);
    assert_eq!(cfg.page_cache_capacity, 1000);
    assert_eq!(cfg.wal_max_batch_size, 100);
    assert_eq!(cfg.wal_max_batch_delay, Duration::from_millis(10));
    assert_eq!(cfg.prepared_plan_cache_capacity, 2000);
    assert_eq!(cfg.durability_mode, DurabilityMode::FullSync);
    assert!(!cfg.encryption.is_enabled());
}

#[test]
fn config_builder_overrides_defaults() {
    let cfg = Config::builder()
        .data_dir(PathBuf::from("./custom"))
        .page_size(8192)
        .page_cache_capacity(64)
        .durability_mode(DurabilityMode::Async)
        .wal_max_batch_size(32)
        .build();

    assert_eq!(cfg.page_size, 8192);
    assert_eq!(cfg.page_cache_capacity, 64);
    assert_eq!(cfg.durability_mode, DurabilityMode::Async);
    assert_eq!(cfg.wal_max_batch_size, 32);
}

#[test]
fn db_error_formats_cleanly() {
    let err = DbError::Storage("corruption".into());
    assert!(format!("{err}").contains("storage"));

    assert!(format!("{}", DbError::Corruption("bad checksum".into())).contains("corruption"));
    assert!(format!("{}", DbError::AuthError("bad tag".into())).contains("authentication"));
    assert!(format!("{}", DbError::Shutdown).contains("shutting down"));
}

#[test]
fn recordbatch_consistency() {
    let rb = RecordBatch {
        columns: vec!["id".into()],
        rows: vec![Row::new(vec![Value::Int(1)])],
    };
    assert_eq!(rb.columns.len(), 1);
    assert_eq!(rb.rows[0].values.len(), 1);
}

#[test]
fn io_error_converts() {
    let e = io::Error::other("oops");
    let db_err: DbError = e.into();
    assert!(matches!(db_err, DbError::Io(_)));
}

#[test]
fn row_ref_round_trips_table_page_and_slot() {
    let table_id = TableId(7);
    let record_id = RecordId {
        page_id: PageId(42),
        slot: 3,
    };

    let row_ref = RowRef::encode(table_id, record_id);
    let (decoded_table, decoded_record) = row_ref.decode();

    assert_eq!(decoded_table, table_id);
    assert_eq!(decoded_record, record_id);
}

#[test]
fn row_ref_distinguishes_tables_sharing_a_page() {
    let record_id = RecordId {
        page_id: PageId(1),
        slot: 0,
    };

    let a = RowRef::encode(TableId(1), record_id);
    let b = RowRef::encode(TableId(2), record_id);

    assert_ne!(a, b);
}
