//! The facade (C1/C11/C12): ties the catalog, per-table heap storage, hash
//! indexes, and the group-commit WAL into one `Open`/`Execute`/`Close`
//! surface. No SQL lives here — callers hand in a [`Plan`] directly, already
//! resolved against table/column names; this crate only knows how to run
//! one against durable state.

pub mod plan;

pub use plan::{CompareOp, Plan, Predicate, QueryResult};

use bincode::config::{self, Config as BincodeConfig};
use bincode::serde::{decode_from_slice, encode_to_vec};
use catalog::{Catalog, CatalogHeader, IndexId, IndexKind, TableMeta};
use common::{Config, DbError, DbResult, EncryptionConfig, RecordBatch, Row, RowRef, TableId};
use hash::HashIndex;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use storage::{HeapFile, HeapTable};
use wal::{Wal, WalOptions, WalStats};

#[cfg(test)]
mod tests;

fn bincode_config() -> impl BincodeConfig {
    config::legacy()
}

const CATALOG_FILE_NAME: &str = "catalog.json";
const WAL_DIR_NAME: &str = "wal";
const TABLE_FILE_EXT: &str = "tbl";

/// One logged effect of a mutating plan, the WAL's opaque payload once
/// decoded. `CreateTable`/`CreateIndex` never appear here — schema changes
/// are catalog-only and are never replayed from the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum WalEffect {
    Insert {
        table: TableId,
        row_ref: RowRef,
        row: Row,
    },
    Update {
        table: TableId,
        row_ref: RowRef,
        row: Row,
    },
    Delete {
        table: TableId,
        row_ref: RowRef,
    },
}

/// Live, in-memory state for one registered table: its heap file plus the
/// hash indexes declared over it. Held behind the table-scoped lock in
/// `Database::tables`, matching the per-table concurrency granularity laid
/// out for the facade — two writers on different tables never block each
/// other.
struct TableHandle {
    heap: HeapFile,
    indexes: Vec<HashIndex>,
}

/// A database instance: the catalog, all open table handles, and the
/// shared write-ahead log. Constructed via [`Database::open`], torn down
/// via [`Database::close`].
pub struct Database {
    data_dir: PathBuf,
    config: Config,
    catalog: Mutex<Catalog>,
    tables: Mutex<HashMap<TableId, TableHandle>>,
    wal: Arc<Wal>,
    key: Option<crypto::Key>,
    prepared: Mutex<LruCache<String, Plan>>,
    /// Highest LSN this handle has itself committed, recorded so `close`
    /// can set the catalog's checkpoint without reconstructing it from
    /// aggregate WAL stats (which track counts, not the last LSN).
    last_lsn: AtomicU64,
    /// Set once `close` has run. Checked at the top of every operation that
    /// would otherwise mutate or read state `close` has already persisted
    /// and torn down.
    closed: AtomicBool,
}

impl Database {
    /// Opens (or creates) a database rooted at `config.data_dir`. Runs
    /// crash recovery before returning: any WAL entries with LSN greater
    /// than the catalog's checkpoint LSN are replayed directly against
    /// table storage and catalog state, without re-emitting WAL records.
    pub fn open(config: Config) -> DbResult<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let (key, kdf_salt) = match &config.encryption {
            EncryptionConfig::Disabled => (None, None),
            EncryptionConfig::Enabled {
                passphrase,
                kdf_memory_cost_kib,
                kdf_iterations,
                kdf_parallelism,
            } => {
                let salt_path = config.data_dir.join("salt.bin");
                let salt = if salt_path.exists() {
                    let bytes = fs::read(&salt_path)?;
                    let arr: [u8; crypto::SALT_LEN] = bytes
                        .try_into()
                        .map_err(|_| DbError::Corruption("bad salt file length".into()))?;
                    crypto::Salt::from_bytes(arr)
                } else {
                    let salt = crypto::Salt::random();
                    fs::write(&salt_path, salt.0)?;
                    salt
                };
                let params = crypto::KdfParams {
                    memory_cost_kib: *kdf_memory_cost_kib,
                    iterations: *kdf_iterations,
                    parallelism: *kdf_parallelism,
                };
                let key = crypto::derive_key(passphrase, &salt, params)?;
                (Some(key), Some(salt.0))
            }
        };

        let catalog_path = config.data_dir.join(CATALOG_FILE_NAME);
        let header = CatalogHeader::new(
            config.page_size as u32,
            config.encryption.is_enabled(),
            kdf_salt,
        );
        let mut catalog = Catalog::load(&catalog_path, header)?;

        let wal_dir = config.data_dir.join(WAL_DIR_NAME);
        let wal_options = WalOptions {
            durability_mode: config.durability_mode,
            max_batch_size: config.wal_max_batch_size,
            max_batch_delay: config.wal_max_batch_delay,
            segment_size: config.wal_segment_size,
        };
        // The group-commit WAL always runs; every row mutation's durability
        // and crash recovery depend on it, so there is no config knob to
        // turn it off.
        let wal = Wal::open(&wal_dir, wal_options)?;

        let mut tables = HashMap::new();
        for meta in catalog.tables() {
            let handle = Self::open_table_handle(&config, &config.data_dir, meta, key.clone())?;
            tables.insert(meta.id, handle);
        }

        // `checkpoint_lsn` names the last LSN known to be durable in the
        // catalog/table files as of the last checkpoint; replay starts at
        // (not after) it, since LSNs are zero-based and "nothing applied
        // yet" and "lsn 0 already applied" would otherwise be the same
        // value. Re-replaying the checkpointed entry itself is harmless:
        // every effect here is idempotent enough to re-apply (insert only
        // inserts if the row isn't already present; update/delete simply
        // overwrite/tombstone again).
        let checkpoint_lsn = catalog.checkpoint_lsn();
        let entries = wal::replay(&wal_dir)?;
        for entry in entries {
            if entry.lsn < checkpoint_lsn {
                continue;
            }
            let (effects, _): (Vec<WalEffect>, usize) =
                decode_from_slice(&entry.payload, bincode_config())
                    .map_err(|e| DbError::Corruption(format!("bad WAL payload: {e}")))?;
            for effect in effects {
                apply_recovered_effect(&mut tables, &mut catalog, effect)?;
            }
            catalog.set_checkpoint_lsn(entry.lsn);
        }
        let recovered_lsn = catalog.checkpoint_lsn();
        catalog.save(&catalog_path)?;

        let prepared_capacity =
            NonZeroUsize::new(config.prepared_plan_cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Database {
            data_dir: config.data_dir.clone(),
            config,
            catalog: Mutex::new(catalog),
            tables: Mutex::new(tables),
            wal: Arc::new(wal),
            key,
            prepared: Mutex::new(LruCache::new(prepared_capacity)),
            last_lsn: AtomicU64::new(recovered_lsn),
            closed: AtomicBool::new(false),
        })
    }

    fn open_table_handle(
        config: &Config,
        data_dir: &std::path::Path,
        meta: &TableMeta,
        key: Option<crypto::Key>,
    ) -> DbResult<TableHandle> {
        let path = data_dir.join(format!("table-{}.{TABLE_FILE_EXT}", meta.id.0));
        let heap = HeapFile::open(
            &path,
            config.page_size,
            config.page_cache_capacity,
            config.durability_mode,
            key,
        )?;
        let indexes = meta
            .indexes()
            .iter()
            .map(|idx| HashIndex::new(idx.id))
            .collect();
        Ok(TableHandle { heap, indexes })
    }

    /// Runs one plan to completion. Row-mutating plans issue exactly one
    /// WAL commit each; `CreateTable`/`CreateIndex` only touch the catalog.
    pub fn execute(&self, plan: Plan) -> DbResult<QueryResult> {
        self.check_open()?;
        match &plan {
            Plan::CreateTable { table, columns } => {
                let mut catalog = self.catalog.lock();
                let table_id = catalog.create_table(table, columns.clone())?;
                catalog.save(&self.catalog_path())?;
                let meta = catalog.table_by_id(table_id)?;
                let handle = Self::open_table_handle(
                    &self.config,
                    &self.data_dir,
                    meta,
                    self.key.clone(),
                )?;
                self.tables.lock().insert(table_id, handle);
                Ok(QueryResult::Empty)
            }
            Plan::CreateIndex {
                table,
                index_name,
                columns,
            } => {
                let mut catalog = self.catalog.lock();
                let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                let index_id =
                    catalog.create_index(table, index_name, &column_refs, IndexKind::Hash)?;
                catalog.save(&self.catalog_path())?;
                let table_id = catalog.table(table)?.id;
                drop(catalog);
                self.tables
                    .lock()
                    .get_mut(&table_id)
                    .ok_or_else(|| DbError::Catalog(format!("table '{table}' not open")))?
                    .indexes
                    .push(HashIndex::new(index_id));
                Ok(QueryResult::Empty)
            }
            Plan::Insert { table, row } => {
                let table_id = self.catalog.lock().table(table)?.id;
                let mut tables = self.tables.lock();
                let handle = tables
                    .get_mut(&table_id)
                    .ok_or_else(|| DbError::Catalog(format!("table '{table}' not open")))?;
                let rid = handle.heap.insert(row)?;
                let row_ref = RowRef::encode(table_id, rid);

                let catalog = self.catalog.lock();
                let meta = catalog.table_by_id(table_id)?;
                maintain_indexes_on_insert(handle, meta, row, row_ref);
                drop(catalog);
                drop(tables);

                let payload = encode_effects(&[WalEffect::Insert {
                    table: table_id,
                    row_ref,
                    row: row.clone(),
                }])?;
                let lsn = self.wal.commit(payload)?;
                self.last_lsn.fetch_max(lsn, Ordering::SeqCst);
                Ok(QueryResult::RowRef(row_ref))
            }
            Plan::Update {
                table,
                row_ref,
                row,
            } => {
                let table_id = self.catalog.lock().table(table)?.id;
                let (_, rid) = row_ref.decode();
                let mut tables = self.tables.lock();
                let handle = tables
                    .get_mut(&table_id)
                    .ok_or_else(|| DbError::Catalog(format!("table '{table}' not open")))?;
                let old_row = handle.heap.get(rid)?;
                handle.heap.update(rid, row)?;

                let catalog = self.catalog.lock();
                let meta = catalog.table_by_id(table_id)?;
                maintain_indexes_on_update(handle, meta, &old_row, row, *row_ref);
                drop(catalog);
                drop(tables);

                let payload = encode_effects(&[WalEffect::Update {
                    table: table_id,
                    row_ref: *row_ref,
                    row: row.clone(),
                }])?;
                let lsn = self.wal.commit(payload)?;
                self.last_lsn.fetch_max(lsn, Ordering::SeqCst);
                Ok(QueryResult::Count(1))
            }
            Plan::Delete { table, row_ref } => {
                let table_id = self.catalog.lock().table(table)?.id;
                let (_, rid) = row_ref.decode();
                let mut tables = self.tables.lock();
                let handle = tables
                    .get_mut(&table_id)
                    .ok_or_else(|| DbError::Catalog(format!("table '{table}' not open")))?;
                let old_row = handle.heap.get(rid)?;
                handle.heap.delete(rid)?;

                let catalog = self.catalog.lock();
                let meta = catalog.table_by_id(table_id)?;
                maintain_indexes_on_delete(handle, meta, &old_row, *row_ref);
                drop(catalog);
                drop(tables);

                let payload = encode_effects(&[WalEffect::Delete {
                    table: table_id,
                    row_ref: *row_ref,
                }])?;
                let lsn = self.wal.commit(payload)?;
                self.last_lsn.fetch_max(lsn, Ordering::SeqCst);
                Ok(QueryResult::Count(1))
            }
            Plan::Get { table, row_ref } => {
                let table_id = self.catalog.lock().table(table)?.id;
                let (_, rid) = row_ref.decode();
                let mut tables = self.tables.lock();
                let handle = tables
                    .get_mut(&table_id)
                    .ok_or_else(|| DbError::Catalog(format!("table '{table}' not open")))?;
                let row = handle.heap.get(rid)?;
                let catalog = self.catalog.lock();
                let columns = column_names(catalog.table_by_id(table_id)?);
                Ok(QueryResult::Rows(RecordBatch {
                    columns,
                    rows: vec![row],
                }))
            }
            Plan::Scan { table, predicate } => {
                let table_id = self.catalog.lock().table(table)?.id;
                let mut tables = self.tables.lock();
                let handle = tables
                    .get_mut(&table_id)
                    .ok_or_else(|| DbError::Catalog(format!("table '{table}' not open")))?;
                let catalog = self.catalog.lock();
                let meta = catalog.table_by_id(table_id)?;
                let columns = column_names(meta);

                let rows = match predicate {
                    Some(pred) => scan_with_predicate(handle, meta, pred)?,
                    None => handle
                        .heap
                        .scan()?
                        .into_iter()
                        .map(|(_, row)| row)
                        .collect(),
                };
                Ok(QueryResult::Rows(RecordBatch { columns, rows }))
            }
        }
    }

    /// Registers `plan` under `fingerprint` for later replay via
    /// [`Database::execute_prepared`]. The facade accepts plan values
    /// directly rather than SQL text — there is no parser in this crate —
    /// so "preparing" amounts to caching the already-resolved plan.
    pub fn prepare(&self, fingerprint: impl Into<String>, plan: Plan) {
        self.prepared.lock().put(fingerprint.into(), plan);
    }

    /// Re-runs a plan registered with [`Database::prepare`]. `row`
    /// substitutes the payload of an `Insert`/`Update` plan so one prepared
    /// statement can be reused across calls with different row values.
    pub fn execute_prepared(
        &self,
        fingerprint: &str,
        row: Option<Row>,
    ) -> DbResult<QueryResult> {
        let cached = self
            .prepared
            .lock()
            .get(fingerprint)
            .cloned()
            .ok_or_else(|| DbError::Catalog(format!("no prepared plan for '{fingerprint}'")))?;

        let plan = match (cached, row) {
            (Plan::Insert { table, .. }, Some(row)) => Plan::Insert { table, row },
            (Plan::Update { table, row_ref, .. }, Some(row)) => Plan::Update {
                table,
                row_ref,
                row,
            },
            (other, _) => other,
        };
        self.execute(plan)
    }

    /// Runs every plan in `plans` as one atomic unit: a single WAL commit
    /// covering all row effects, and index maintenance deferred until that
    /// commit resolves. Atomicity is achieved by validating every plan's
    /// preconditions (table existence, row-ref validity) before any
    /// mutation is applied, rather than by true page-level rollback —
    /// `storage::HeapFile` has no undo primitive, so the batch driver
    /// instead guarantees the failure modes that would need one (schema or
    /// constraint violations) can't occur once application begins.
    pub fn batch_execute(&self, plans: Vec<Plan>) -> DbResult<Vec<QueryResult>> {
        self.check_open()?;
        if plans.iter().any(|p| {
            matches!(p, Plan::CreateTable { .. } | Plan::CreateIndex { .. })
        }) {
            return Err(DbError::SchemaViolation(
                "schema-changing plans cannot participate in a batch".into(),
            ));
        }

        let catalog = self.catalog.lock();
        let mut table_ids = Vec::new();
        for p in &plans {
            let meta = catalog.table(p.table_name())?;
            if !table_ids.contains(&meta.id) {
                table_ids.push(meta.id);
            }
            if let Plan::Update { row_ref, .. } | Plan::Delete { row_ref, .. } = p {
                let (rt, _) = row_ref.decode();
                if rt != meta.id {
                    return Err(DbError::ConstraintViolation(format!(
                        "row_ref does not belong to table '{}'",
                        p.table_name()
                    )));
                }
            }
        }
        drop(catalog);

        let mut tables = self.tables.lock();
        for id in &table_ids {
            let handle = tables
                .get_mut(id)
                .ok_or_else(|| DbError::Catalog(format!("table id {} not open", id.0)))?;
            for idx in &mut handle.indexes {
                idx.begin_batch();
            }
        }

        let apply_result = (|| -> DbResult<(Vec<QueryResult>, Vec<WalEffect>)> {
            let catalog = self.catalog.lock();
            let mut results = Vec::with_capacity(plans.len());
            let mut effects = Vec::with_capacity(plans.len());

            for p in &plans {
                let meta = catalog.table(p.table_name())?;
                let table_id = meta.id;
                let handle = tables.get_mut(&table_id).ok_or_else(|| {
                    DbError::Catalog(format!("table id {} not open", table_id.0))
                })?;

                match p {
                    Plan::Insert { row, .. } => {
                        let rid = handle.heap.insert(row)?;
                        let row_ref = RowRef::encode(table_id, rid);
                        maintain_indexes_on_insert(handle, meta, row, row_ref);
                        effects.push(WalEffect::Insert {
                            table: table_id,
                            row_ref,
                            row: row.clone(),
                        });
                        results.push(QueryResult::RowRef(row_ref));
                    }
                    Plan::Update { row_ref, row, .. } => {
                        let (_, rid) = row_ref.decode();
                        let old_row = handle.heap.get(rid)?;
                        handle.heap.update(rid, row)?;
                        maintain_indexes_on_update(handle, meta, &old_row, row, *row_ref);
                        effects.push(WalEffect::Update {
                            table: table_id,
                            row_ref: *row_ref,
                            row: row.clone(),
                        });
                        results.push(QueryResult::Count(1));
                    }
                    Plan::Delete { row_ref, .. } => {
                        let (_, rid) = row_ref.decode();
                        let old_row = handle.heap.get(rid)?;
                        handle.heap.delete(rid)?;
                        maintain_indexes_on_delete(handle, meta, &old_row, *row_ref);
                        effects.push(WalEffect::Delete {
                            table: table_id,
                            row_ref: *row_ref,
                        });
                        results.push(QueryResult::Count(1));
                    }
                    Plan::Get { row_ref, .. } => {
                        let (_, rid) = row_ref.decode();
                        let row = handle.heap.get(rid)?;
                        results.push(QueryResult::Rows(RecordBatch {
                            columns: column_names(meta),
                            rows: vec![row],
                        }));
                    }
                    Plan::Scan { predicate, .. } => {
                        let rows = match predicate {
                            Some(pred) => scan_with_predicate(handle, meta, pred)?,
                            None => handle
                                .heap
                                .scan()?
                                .into_iter()
                                .map(|(_, row)| row)
                                .collect(),
                        };
                        results.push(QueryResult::Rows(RecordBatch {
                            columns: column_names(meta),
                            rows,
                        }));
                    }
                    Plan::CreateTable { .. } | Plan::CreateIndex { .. } => unreachable!(),
                }
            }
            Ok((results, effects))
        })();

        match apply_result {
            Ok((results, effects)) => {
                if !effects.is_empty() {
                    let payload = encode_effects(&effects)?;
                    let lsn = self.wal.commit(payload)?;
                    self.last_lsn.fetch_max(lsn, Ordering::SeqCst);
                }
                for id in &table_ids {
                    if let Some(handle) = tables.get_mut(id) {
                        for idx in &mut handle.indexes {
                            idx.end_batch();
                        }
                    }
                }
                Ok(results)
            }
            Err(err) => {
                for id in &table_ids {
                    if let Some(handle) = tables.get_mut(id) {
                        for idx in &mut handle.indexes {
                            idx.revert_batch();
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Flushes every table's dirty pages, records the WAL's current
    /// position as the catalog's checkpoint LSN, persists the catalog, and
    /// drains and joins the WAL committer thread. Marks this handle closed
    /// first, so any `execute`/`batch_execute` call racing with `close`
    /// either completes before the flush below observes its effects or is
    /// rejected with `DbError::Shutdown`. Calling `close` more than once is
    /// safe; later calls are no-ops.
    pub fn close(&self) -> DbResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut tables = self.tables.lock();
        for handle in tables.values_mut() {
            handle.heap.flush()?;
        }
        drop(tables);

        let mut catalog = self.catalog.lock();
        catalog.set_checkpoint_lsn(self.last_lsn.load(Ordering::SeqCst));
        catalog.save(&self.catalog_path())?;
        drop(catalog);

        self.wal.close()
    }

    fn check_open(&self) -> DbResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DbError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub fn wal_stats(&self) -> WalStats {
        self.wal.stats()
    }

    pub fn page_cache_stats(&self) -> HashMap<TableId, buffer::CacheStats> {
        self.tables
            .lock()
            .iter()
            .map(|(id, handle)| (*id, handle.heap.cache_stats()))
            .collect()
    }

    fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILE_NAME)
    }
}

fn column_names(meta: &TableMeta) -> Vec<String> {
    meta.schema.columns.iter().map(|c| c.name.clone()).collect()
}

fn encode_effects(effects: &[WalEffect]) -> DbResult<Vec<u8>> {
    encode_to_vec(effects, bincode_config())
        .map_err(|e| DbError::Wal(format!("serialize WAL effects failed: {e}")))
}

/// Picks the column ordinals an index over `meta` actually covers and
/// projects a row down to that tuple, the key shape every `HashIndex`
/// lookup and maintenance call uses.
fn project_key(meta: &TableMeta, index_id: IndexId, row: &Row) -> Option<Vec<types::Value>> {
    let index = meta.indexes().iter().find(|i| i.id == index_id)?;
    Some(
        index
            .columns
            .iter()
            .map(|&ordinal| row.values[ordinal as usize].clone())
            .collect(),
    )
}

fn maintain_indexes_on_insert(handle: &mut TableHandle, meta: &TableMeta, row: &Row, row_ref: RowRef) {
    for idx in &mut handle.indexes {
        if let Some(key) = project_key(meta, idx.index_id, row) {
            idx.insert(key, row_ref);
        }
    }
}

fn maintain_indexes_on_update(
    handle: &mut TableHandle,
    meta: &TableMeta,
    old_row: &Row,
    new_row: &Row,
    row_ref: RowRef,
) {
    for idx in &mut handle.indexes {
        if let Some(old_key) = project_key(meta, idx.index_id, old_row) {
            idx.remove(&old_key, row_ref);
        }
        if let Some(new_key) = project_key(meta, idx.index_id, new_row) {
            idx.insert(new_key, row_ref);
        }
    }
}

fn maintain_indexes_on_delete(handle: &mut TableHandle, meta: &TableMeta, old_row: &Row, row_ref: RowRef) {
    for idx in &mut handle.indexes {
        if let Some(key) = project_key(meta, idx.index_id, old_row) {
            idx.remove(&key, row_ref);
        }
    }
}

/// Serves a predicate-filtered scan via the matching hash index when the
/// predicate is a plain equality on an indexed column, falling back to a
/// full table scan otherwise — per the index's contract, range predicates
/// and predicates on unindexed columns always fall back.
fn scan_with_predicate(
    handle: &mut TableHandle,
    meta: &TableMeta,
    predicate: &Predicate,
) -> DbResult<Vec<Row>> {
    if predicate.op == CompareOp::Eq {
        let ordinal = meta.schema.column_index(&predicate.column);
        if let Some(ordinal) = ordinal {
            let idx_pos = meta
                .indexes()
                .iter()
                .position(|i| i.columns == vec![ordinal]);
            if let Some(idx_pos) = idx_pos {
                if !handle.indexes[idx_pos].is_built() {
                    let table_id = meta.id;
                    let rows = handle.heap.scan()?;
                    let pairs: Vec<_> = rows
                        .iter()
                        .map(|(rid, row)| {
                            (
                                vec![row.values[ordinal as usize].clone()],
                                RowRef::encode(table_id, *rid),
                            )
                        })
                        .collect();
                    handle.indexes[idx_pos].build(pairs);
                }
                let refs = handle.indexes[idx_pos].lookup(&[predicate.value.clone()]);
                let mut rows = Vec::with_capacity(refs.len());
                for row_ref in refs {
                    let (_, rid) = row_ref.decode();
                    rows.push(handle.heap.get(rid)?);
                }
                return Ok(rows);
            }
        }
    }

    let rows = handle.heap.scan()?;
    let ordinal = meta.schema.column_index(&predicate.column);
    Ok(rows
        .into_iter()
        .filter_map(|(_, row)| {
            let ordinal = ordinal?;
            let value = row.values.get(ordinal as usize)?;
            predicate.matches(value).then_some(row)
        })
        .collect())
}

fn apply_recovered_effect(
    tables: &mut HashMap<TableId, TableHandle>,
    catalog: &mut Catalog,
    effect: WalEffect,
) -> DbResult<()> {
    match effect {
        WalEffect::Insert { table, row_ref, row } => {
            let (_, rid) = row_ref.decode();
            if let Some(handle) = tables.get_mut(&table) {
                // If the page holding `rid` survived the crash, the insert
                // is already reflected on disk and this is a no-op. If not,
                // storage only exposes a logical `insert`, which may place
                // the row at a different `RecordId` than the one `row_ref`
                // names — heap files have no "write at this exact slot"
                // primitive. A later effect in this same recovery pass that
                // targets the original `row_ref` would then miss; accepted
                // as a known gap rather than adding physiological redo.
                if handle.heap.get(rid).is_err() {
                    handle.heap.insert(&row)?;
                }
                if let Ok(meta) = catalog.table_by_id(table) {
                    maintain_indexes_on_insert(handle, meta, &row, row_ref);
                }
            }
        }
        WalEffect::Update { table, row_ref, row } => {
            let (_, rid) = row_ref.decode();
            if let Some(handle) = tables.get_mut(&table) {
                let _ = handle.heap.update(rid, &row);
            }
        }
        WalEffect::Delete { table, row_ref } => {
            let (_, rid) = row_ref.decode();
            if let Some(handle) = tables.get_mut(&table) {
                let _ = handle.heap.delete(rid);
            }
        }
    }
    Ok(())
}
