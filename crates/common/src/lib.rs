#[cfg(test)]
mod tests;

pub mod pretty;

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io, path::PathBuf, time::Duration};
use thiserror::Error;
use types::Value;

/// Identifier for a column within a table schema.
/// Examples:
/// - `let id_col: ColumnId = 1; // maps to "id"`
/// - `let name_col: ColumnId = 2; // maps to "name"`
/// - `let price_col: ColumnId = 5; // maps to "price"`
pub type ColumnId = u16;

/// Logical identifier for a page in the storage layer.
/// Examples:
/// - `let freelist_page = PageId(0);`
/// - `let user_data_page = PageId(42);`
/// - `let index_page = PageId(9001);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// Logical identifier for a table registered in the catalog.
/// Examples:
/// - `let users = TableId(7);`
/// - `let orders = TableId(11);`
/// - `let system_tables = TableId(0);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u64);

/// Fully-qualified identifier for a record within a page, scoped to a
/// single table's heap file.
/// Examples:
/// - `let rid = RecordId { page_id: PageId(42), slot: 3 };`
/// - `let rid = RecordId { page_id: PageId(1024), slot: 0 };`
/// - `let rid = RecordId { page_id: PageId(1), slot: 255 };`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

/// Opaque external row reference, packing `(table_id, page_id, slot)` into a
/// single 64-bit integer so callers outside the storage engine (the WAL, the
/// hash index, the batch driver) can carry a row's identity without knowing
/// which heap file it lives in. Layout: table_id in bits 48-63, page_id in
/// bits 16-47, slot in bits 0-15 — chosen over a wider struct because the WAL
/// frame format and the hash index both want a fixed-width key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRef(pub u64);

impl RowRef {
    pub fn encode(table_id: TableId, record_id: RecordId) -> Self {
        let table = (table_id.0 & 0xFFFF) << 48;
        let page = (record_id.page_id.0 & 0xFFFF_FFFF) << 16;
        let slot = record_id.slot as u64;
        RowRef(table | page | slot)
    }

    pub fn decode(self) -> (TableId, RecordId) {
        let table_id = TableId((self.0 >> 48) & 0xFFFF);
        let page_id = PageId((self.0 >> 16) & 0xFFFF_FFFF);
        let slot = (self.0 & 0xFFFF) as u16;
        (table_id, RecordId { page_id, slot })
    }
}

/// Positional row representation backed by `types::Value`.
/// Examples:
/// - `let row = Row::new(vec![Value::Int(1)]);`
/// - `let row = Row::new(vec![Value::Text("alice".into()), Value::Bool(true)]);`
/// - `let row = Row::new(vec![Value::Int(10), Value::Null]);`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
    #[serde(skip)]
    #[serde(default)]
    rid: Option<RecordId>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, rid: None }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self::new(values)
    }

    pub fn with_rid(mut self, rid: RecordId) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn set_rid(&mut self, rid: Option<RecordId>) {
        self.rid = rid;
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Named projection of a row keyed by column name.
/// Examples:
/// - `let mut map = RowMap::new(); map.insert("id".into(), Value::Int(1));`
/// - `let map = RowMap::from([("name".into(), Value::Text("alice".into()))]);`
/// - `let map = RowMap::from([("active".into(), Value::Bool(true)), ("age".into(), Value::Int(30))]);`
/// - `let map = RowMap::from([("deleted_at".into(), Value::Null)]);`
pub type RowMap = HashMap<String, Value>;

/// Rectangular result set carrying column labels and rows.
/// Examples:
/// - `let rb = RecordBatch { columns: vec!["id".into()], rows: vec![Row::new(vec![Value::Int(1)])] };`
/// - `let rb = RecordBatch { columns: vec!["id".into(), "name".into()], rows: vec![Row::new(vec![Value::Int(1), Value::Text("alice".into())])] };`
/// - `let rb = RecordBatch { columns: vec!["count".into()], rows: vec![Row::new(vec![Value::Int(42)]), Row::new(vec![Value::Int(84)])] };`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Canonical error type shared across database subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("wal: {0}")]
    Wal(String),
    /// A checksum mismatch or otherwise structurally invalid page/WAL frame.
    #[error("corruption: {0}")]
    Corruption(String),
    /// AEAD tag verification or key derivation failed while opening an
    /// encrypted page or WAL frame.
    #[error("authentication failed: {0}")]
    AuthError(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Returned to callers still waiting on the committer once `Close` has
    /// begun draining in-flight commits.
    #[error("database is shutting down")]
    Shutdown,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Durability mode for the group-commit WAL.
///
/// `FullSync` fsyncs every committed batch before returning; `Async` returns
/// once the batch is durably queued and only fsyncs on segment rotation (the
/// safer reading of the tradeoff the WAL design leaves open).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityMode {
    FullSync,
    Async,
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::FullSync
    }
}

/// At-rest encryption configuration. `Enabled` carries the passphrase and
/// the Argon2 cost parameters used to derive the page/WAL key; the derived
/// key itself never appears in `Config` so it isn't accidentally logged or
/// serialized alongside the rest of the configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EncryptionConfig {
    Disabled,
    Enabled {
        passphrase: String,
        kdf_memory_cost_kib: u32,
        kdf_iterations: u32,
        kdf_parallelism: u32,
    },
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig::Disabled
    }
}

impl EncryptionConfig {
    pub fn is_enabled(&self) -> bool {
        matches!(self, EncryptionConfig::Enabled { .. })
    }
}

/// Runtime configuration for the database components.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .page_size(8192)
///     .page_cache_capacity(512)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory where table data, catalog metadata, and WAL files live.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Fixed-size page allocation in bytes.
    #[builder(default = 4096)]
    pub page_size: usize,
    /// Number of pages the bounded page cache keeps resident.
    #[builder(default = 1000)]
    pub page_cache_capacity: usize,
    /// Fsync behavior applied by the group committer.
    #[builder(default)]
    pub durability_mode: DurabilityMode,
    /// Maximum number of statements the committer accumulates into one
    /// batch before closing it early (closed-by-size).
    #[builder(default = 100)]
    pub wal_max_batch_size: usize,
    /// Maximum time the committer waits for more statements before closing
    /// the current batch (closed-by-timeout).
    #[builder(default = Duration::from_millis(10))]
    pub wal_max_batch_delay: Duration,
    /// Size at which an active WAL segment is rotated to a new file.
    #[builder(default = 64 * 1024 * 1024)]
    pub wal_segment_size: usize,
    /// Capacity of the prepared-plan cache kept by the facade.
    #[builder(default = 2000)]
    pub prepared_plan_cache_capacity: usize,
    /// Whether hash indexes are consulted and maintained during writes.
    #[builder(default = true)]
    pub enable_hash_indexes: bool,
    /// At-rest encryption for pages and WAL frames.
    #[builder(default)]
    pub encryption: EncryptionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            page_size: 4096,
            page_cache_capacity: 1000,
            durability_mode: DurabilityMode::default(),
            wal_max_batch_size: 100,
            wal_max_batch_delay: Duration::from_millis(10),
            wal_segment_size: 64 * 1024 * 1024,
            prepared_plan_cache_capacity: 2000,
            enable_hash_indexes: true,
            encryption: EncryptionConfig::default(),
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        Config, DbError, DbResult, DurabilityMode, EncryptionConfig, PageId, RecordBatch,
        RecordId, Row, RowMap, RowRef, TableId,
    };
    pub use types::{SqlType, Value};
}
