//! The heap storage engine (C8): insert/update/delete/read over rows, page
//! allocation via the free-space directory (C5), and in-place semantics
//! with bounded-depth forwarding for updates that outgrow their slot.
//!
//! Built directly on [`buffer::PageCache`] — this crate owns no file
//! handles of its own. Readers and writers both resolve a [`RecordId`]
//! through the same path, so a forwarded row looks identical to a reader
//! whether or not it has ever been updated.

use bincode::config::{self, Config as BincodeConfig};
use bincode::serde::{decode_from_slice, encode_to_vec};
use buffer::{PageCache, PageType, PinMode, SLOT_LEN};
use common::{DbError, DbResult, DurabilityMode, PageId, RecordId, Row};
use std::collections::HashMap;
use std::path::Path;


fn bincode_config() -> impl BincodeConfig {
    config::legacy()
}

/// A forwarding chain longer than this is treated as corruption rather
/// than followed indefinitely — it can only arise from a cyclic or
/// dangling pointer, never from normal update traffic.
const MAX_FORWARD_HOPS: u8 = 8;

/// Tracks, for each allocated data page, how many free bytes it currently
/// has — derived data recomputed from each page's header rather than a
/// separately persisted structure, since it's cheap to rebuild by reading
/// the pages the heap file already owns.
struct FreeSpaceDirectory {
    free_bytes: HashMap<u64, usize>,
}

impl FreeSpaceDirectory {
    fn new() -> Self {
        FreeSpaceDirectory {
            free_bytes: HashMap::new(),
        }
    }

    fn note(&mut self, page_id: u64, free: usize) {
        self.free_bytes.insert(page_id, free);
    }

    /// First-fit: the lowest-numbered page with enough free space. Lowest
    /// numbered (rather than best-fit) keeps early pages dense, which is
    /// the usual heap-file tradeoff when fragmentation is reclaimed lazily.
    fn first_fit(&self, needed: usize) -> Option<u64> {
        self.free_bytes
            .iter()
            .filter(|(_, &free)| free >= needed)
            .map(|(&page_id, _)| page_id)
            .min()
    }
}

pub trait HeapTable {
    fn insert(&mut self, row: &Row) -> DbResult<RecordId>;
    fn get(&mut self, rid: RecordId) -> DbResult<Row>;
    fn update(&mut self, rid: RecordId, row: &Row) -> DbResult<()>;
    fn delete(&mut self, rid: RecordId) -> DbResult<()>;
}

/// A table's row storage: one [`PageCache`]-backed file plus the
/// free-space bookkeeping used to place new and relocated rows.
pub struct HeapFile {
    cache: PageCache,
    free_space: FreeSpaceDirectory,
    next_row_id: u64,
}

impl HeapFile {
    pub fn open(
        path: &Path,
        page_size: usize,
        capacity: usize,
        durability_mode: DurabilityMode,
        key: Option<crypto::Key>,
    ) -> DbResult<Self> {
        let mut cache = PageCache::open(path, page_size, capacity, durability_mode, key)?;
        let mut free_space = FreeSpaceDirectory::new();
        let mut next_row_id = 0u64;

        for page_id in 0..cache.num_pages() {
            let pinned = cache.get(page_id, PinMode::Read)?;
            let page = pinned.read();
            if page.page_type()? != PageType::Data {
                continue;
            }
            free_space.note(page_id, page.free_space()?);
            if let Some(max) = page.max_row_id()? {
                next_row_id = next_row_id.max(max + 1);
            }
        }

        Ok(HeapFile {
            cache,
            free_space,
            next_row_id,
        })
    }

    pub fn flush(&mut self) -> DbResult<()> {
        self.cache.flush_dirty()
    }

    pub fn cache_stats(&self) -> buffer::CacheStats {
        self.cache.stats()
    }

    /// A full-table cursor: every live row together with the `RecordId`
    /// it currently resolves under. Used both by plan execution (scans
    /// with no usable index) and by the hash index's lazy first-access
    /// build. Collected eagerly rather than returned as a lazy iterator —
    /// the table's page-cache pins would otherwise have to outlive the
    /// caller's loop body, which doesn't fit this crate's pin-per-call
    /// discipline.
    pub fn scan(&mut self) -> DbResult<Vec<(RecordId, Row)>> {
        let mut rows = Vec::new();
        for page_id in 0..self.cache.num_pages() {
            let pinned = self.cache.get(page_id, PinMode::Read)?;
            let page = pinned.read();
            if page.page_type()? != PageType::Data {
                continue;
            }
            for slot in 0..page.entry_count()? {
                if page.is_forward(slot)? {
                    continue;
                }
                if let Some(bytes) = page.read_tuple(slot)? {
                    let (row, _) = decode_from_slice(bytes, bincode_config()).map_err(|e| {
                        DbError::Storage(format!("deserialize row failed: {e}"))
                    })?;
                    rows.push((
                        RecordId {
                            page_id: PageId(page_id),
                            slot,
                        },
                        row,
                    ));
                }
            }
        }
        Ok(rows)
    }

    fn refresh_free(&mut self, page_id: u64) -> DbResult<()> {
        let pinned = self.cache.get(page_id, PinMode::Read)?;
        let free = pinned.read().free_space()?;
        self.free_space.note(page_id, free);
        Ok(())
    }

    fn next_row_id(&mut self) -> u64 {
        let id = self.next_row_id;
        self.next_row_id += 1;
        id
    }

    /// Follows forwarding pointers to the slot that actually holds (or
    /// tombstones) the row's bytes, without decoding them.
    fn resolve(&mut self, rid: RecordId, depth: u8) -> DbResult<(u64, u16)> {
        if depth > MAX_FORWARD_HOPS {
            return Err(DbError::Corruption(format!(
                "forwarding chain from {rid:?} exceeds {MAX_FORWARD_HOPS} hops"
            )));
        }
        let pinned = self.cache.get(rid.page_id.0, PinMode::Read)?;
        let page = pinned.read();
        if page.is_forward(rid.slot)? {
            let (target_page, target_slot) = page.forward_target(rid.slot)?;
            drop(page);
            drop(pinned);
            return self.resolve(
                RecordId {
                    page_id: PageId(target_page),
                    slot: target_slot,
                },
                depth + 1,
            );
        }
        Ok((rid.page_id.0, rid.slot))
    }
}

impl HeapTable for HeapFile {
    fn insert(&mut self, row: &Row) -> DbResult<RecordId> {
        let bytes = encode_to_vec(row, bincode_config())
            .map_err(|e| DbError::Storage(format!("serialize row failed: {e}")))?;
        let row_id = self.next_row_id();

        let page_id = match self.free_space.first_fit(bytes.len() + SLOT_LEN) {
            Some(id) => id,
            None => {
                let pinned = self.cache.allocate(PageType::Data)?;
                pinned.page_id()
            }
        };

        let slot = {
            let pinned = self.cache.get(page_id, PinMode::Write)?;
            let mut page = pinned.write()?;
            page.append_tuple(row_id, &bytes)?
        };
        self.refresh_free(page_id)?;

        Ok(RecordId {
            page_id: PageId(page_id),
            slot,
        })
    }

    fn get(&mut self, rid: RecordId) -> DbResult<Row> {
        self.get_with_depth(rid, 0)
    }

    fn update(&mut self, rid: RecordId, row: &Row) -> DbResult<()> {
        let (page_id, slot) = self.resolve(rid, 0)?;
        let bytes = encode_to_vec(row, bincode_config())
            .map_err(|e| DbError::Storage(format!("serialize row failed: {e}")))?;

        let old_len = {
            let pinned = self.cache.get(page_id, PinMode::Read)?;
            let page = pinned.read();
            page.read_tuple(slot)?
                .map(|b| b.len())
                .ok_or_else(|| DbError::NotFound(format!("rid {rid:?} already deleted")))?
        };

        if bytes.len() == old_len {
            let pinned = self.cache.get(page_id, PinMode::Write)?;
            pinned.write()?.overwrite_tuple(slot, &bytes)?;
            self.refresh_free(page_id)?;
            return Ok(());
        }

        // Doesn't fit in its current slot: relocate the row and leave a
        // forwarding pointer behind so `rid` stays valid for callers.
        let new_row_id = self.next_row_id();
        let target_page = match self.free_space.first_fit(bytes.len() + SLOT_LEN) {
            Some(id) => id,
            None => self.cache.allocate(PageType::Data)?.page_id(),
        };

        let target_slot = {
            let pinned = self.cache.get(target_page, PinMode::Write)?;
            let mut page = pinned.write()?;
            page.append_tuple(new_row_id, &bytes)?
        };
        self.refresh_free(target_page)?;

        let pinned = self.cache.get(page_id, PinMode::Write)?;
        pinned
            .write()?
            .write_forward(slot, target_page, target_slot)?;
        drop(pinned);
        self.refresh_free(page_id)?;
        Ok(())
    }

    fn delete(&mut self, rid: RecordId) -> DbResult<()> {
        let (page_id, slot) = self.resolve(rid, 0)?;
        let pinned = self.cache.get(page_id, PinMode::Write)?;
        pinned.write()?.tombstone(slot)?;
        drop(pinned);
        self.refresh_free(page_id)
    }
}

impl HeapFile {
    fn get_with_depth(&mut self, rid: RecordId, depth: u8) -> DbResult<Row> {
        if depth > MAX_FORWARD_HOPS {
            return Err(DbError::Corruption(format!(
                "forwarding chain from {rid:?} exceeds {MAX_FORWARD_HOPS} hops"
            )));
        }
        let pinned = self.cache.get(rid.page_id.0, PinMode::Read)?;
        let page = pinned.read();
        if page.is_forward(rid.slot)? {
            let (target_page, target_slot) = page.forward_target(rid.slot)?;
            drop(page);
            drop(pinned);
            return self.get_with_depth(
                RecordId {
                    page_id: PageId(target_page),
                    slot: target_slot,
                },
                depth + 1,
            );
        }
        let bytes = page
            .read_tuple(rid.slot)?
            .ok_or_else(|| DbError::NotFound(format!("rid {rid:?} already deleted")))?;
        let (row, _) = decode_from_slice(bytes, bincode_config())
            .map_err(|e| DbError::Storage(format!("deserialize row failed: {e}")))?;
        Ok(row)
    }
}
