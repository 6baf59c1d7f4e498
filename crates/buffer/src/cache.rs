//! The bounded page cache (C4) and its buffer-pool-style pin bookkeeping
//! (C3). Readers and writers both go through [`PageCache::get`]; nothing
//! else in this crate touches the backing file directly.

use crate::page::Page;
use common::{DbError, DbResult, DurabilityMode};
use crypto::Key;
use lru::LruCache;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

const TAG_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinMode {
    Read,
    Write,
}

#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Shared {
    pin_counts: Mutex<HashMap<u64, usize>>,
}

/// A guard over one cached page. Dropping it releases the pin; it never
/// flushes on its own — flushing is [`PageCache::flush_dirty`]'s job, run
/// at `EndBatch` once the caller has released its pins.
pub struct PinnedPage {
    shared: Arc<Shared>,
    page_id: u64,
    inner: Arc<RwLock<Page>>,
    mode: PinMode,
}

impl PinnedPage {
    pub fn page_id(&self) -> u64 {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.inner.read()
    }

    pub fn write(&self) -> DbResult<RwLockWriteGuard<'_, Page>> {
        if self.mode != PinMode::Write {
            return Err(DbError::Storage(format!(
                "page {} was pinned read-only",
                self.page_id
            )));
        }
        Ok(self.inner.write())
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        let mut pins = self.shared.pin_counts.lock();
        if let Some(count) = pins.get_mut(&self.page_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pins.remove(&self.page_id);
            }
        }
    }
}

/// Bounded cache of decrypted, checksum-validated pages backing one table's
/// (or index's) heap/data file.
pub struct PageCache {
    file: File,
    page_size: usize,
    capacity: usize,
    durability_mode: DurabilityMode,
    key: Option<Key>,
    entries: LruCache<u64, Arc<RwLock<Page>>>,
    dirty: HashSet<u64>,
    shared: Arc<Shared>,
    file_pages: u64,
    stats: CacheStats,
}

impl PageCache {
    pub fn open(
        path: &Path,
        page_size: usize,
        capacity: usize,
        durability_mode: DurabilityMode,
        key: Option<Key>,
    ) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let on_disk_len = Self::on_disk_len_for(page_size, key.is_some());
        let file_pages = if on_disk_len == 0 {
            0
        } else {
            file.metadata()?.len() / on_disk_len as u64
        };

        Ok(PageCache {
            file,
            page_size,
            capacity: capacity.max(1),
            durability_mode,
            key,
            entries: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            dirty: HashSet::new(),
            shared: Arc::new(Shared {
                pin_counts: Mutex::new(HashMap::new()),
            }),
            file_pages,
            stats: CacheStats::default(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> u64 {
        self.file_pages
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.evictions = self.stats.evictions;
        stats
    }

    fn on_disk_len_for(page_size: usize, encrypted: bool) -> usize {
        if encrypted {
            crypto::NONCE_LEN + page_size + TAG_LEN
        } else {
            page_size
        }
    }

    fn on_disk_len(&self) -> usize {
        Self::on_disk_len_for(self.page_size, self.key.is_some())
    }

    /// Fetches `page_id` from the cache, or loads, decrypts, and validates
    /// it from disk on a miss.
    pub fn get(&mut self, page_id: u64, mode: PinMode) -> DbResult<PinnedPage> {
        if !self.entries.contains(&page_id) {
            self.stats.misses += 1;
            if self.entries.len() >= self.capacity && self.evict_one()?.is_none() {
                return Err(DbError::Storage(format!(
                    "page cache full ({} pages) and every resident page is pinned or dirty",
                    self.entries.len()
                )));
            }
            let page = self.read_from_disk(page_id)?;
            self.entries.put(page_id, Arc::new(RwLock::new(page)));
        } else {
            self.stats.hits += 1;
        }

        let inner = self.entries.get(&page_id).unwrap().clone();
        if mode == PinMode::Write {
            self.dirty.insert(page_id);
        }
        *self.shared.pin_counts.lock().entry(page_id).or_insert(0) += 1;

        Ok(PinnedPage {
            shared: self.shared.clone(),
            page_id,
            inner,
            mode,
        })
    }

    /// Allocates a fresh page of `page_type`, pinned for write, inserted
    /// into the cache as dirty. The backing file only grows once
    /// [`PageCache::flush_dirty`] writes it out.
    pub fn allocate(&mut self, page_type: crate::page::PageType) -> DbResult<PinnedPage> {
        let page_id = self.file_pages;

        if self.entries.len() >= self.capacity && self.evict_one()?.is_none() {
            return Err(DbError::Storage(format!(
                "page cache full ({} pages) and every resident page is pinned or dirty",
                self.entries.len()
            )));
        }
        self.file_pages += 1;

        let mut page = Page::new(page_id, page_type, self.page_size);
        page.seal_checksum();
        self.entries.put(page_id, Arc::new(RwLock::new(page)));
        self.dirty.insert(page_id);
        *self.shared.pin_counts.lock().entry(page_id).or_insert(0) += 1;

        Ok(PinnedPage {
            shared: self.shared.clone(),
            page_id,
            inner: self.entries.get(&page_id).unwrap().clone(),
            mode: PinMode::Write,
        })
    }

    /// Picks a clean, unpinned page to evict by LRU order. Never evicts a
    /// dirty or pinned page — those must be flushed (or released) first.
    pub fn evict_one(&mut self) -> DbResult<Option<u64>> {
        let mut skipped = Vec::new();
        let mut evicted = None;

        while let Some((page_id, page)) = self.entries.pop_lru() {
            let pinned = self
                .shared
                .pin_counts
                .lock()
                .get(&page_id)
                .copied()
                .unwrap_or(0)
                > 0;
            let dirty = self.dirty.contains(&page_id);
            if pinned || dirty {
                skipped.push((page_id, page));
                continue;
            }
            evicted = Some(page_id);
            break;
        }

        for (page_id, page) in skipped.into_iter().rev() {
            self.entries.put(page_id, page);
        }

        if let Some(page_id) = evicted {
            self.stats.evictions += 1;
            log::debug!("evicted page {page_id} from cache");
        }

        Ok(evicted)
    }

    /// Writes every dirty, unpinned page back to disk, encrypting under
    /// `AAD = page_id` when a key is configured, then fsyncs iff the
    /// durability mode requires it.
    pub fn flush_dirty(&mut self) -> DbResult<()> {
        let page_ids: Vec<u64> = self.dirty.iter().copied().collect();
        for page_id in &page_ids {
            let Some(entry) = self.entries.peek(page_id) else {
                continue;
            };
            let entry = entry.clone();
            let mut page = entry.write();
            page.seal_checksum();
            self.write_to_disk(&page)?;
            drop(page);
        }

        if matches!(self.durability_mode, DurabilityMode::FullSync) && !page_ids.is_empty() {
            self.file.sync_all()?;
        }

        self.dirty.clear();
        log::debug!("flushed {} dirty pages", page_ids.len());
        Ok(())
    }

    fn read_from_disk(&mut self, page_id: u64) -> DbResult<Page> {
        let len = self.on_disk_len();
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(page_id * len as u64))?;
        self.file.read_exact(&mut buf)?;

        let plaintext = if let Some(key) = &self.key {
            let nonce: [u8; crypto::NONCE_LEN] = buf[0..crypto::NONCE_LEN].try_into().unwrap();
            let ciphertext = &buf[crypto::NONCE_LEN..];
            crypto::open(key, &page_id.to_le_bytes(), &nonce, ciphertext)?
        } else {
            buf
        };

        Page::from_bytes(page_id, plaintext)
    }

    fn write_to_disk(&mut self, page: &Page) -> DbResult<()> {
        let len = self.on_disk_len();
        let on_disk = if let Some(key) = &self.key {
            let sealed = crypto::seal(key, &page.id.to_le_bytes(), &page.data)?;
            let mut out = Vec::with_capacity(len);
            out.extend_from_slice(&sealed.nonce);
            out.extend_from_slice(&sealed.ciphertext);
            out
        } else {
            page.data.clone()
        };

        self.file.seek(SeekFrom::Start(page.id * len as u64))?;
        self.file.write_all(&on_disk)?;
        Ok(())
    }
}
