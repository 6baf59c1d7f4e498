use super::*;
use common::DurabilityMode;
use tempfile::tempdir;

fn open_cache(path: &std::path::Path, capacity: usize) -> PageCache {
    PageCache::open(path, 4096, capacity, DurabilityMode::FullSync, None).unwrap()
}

#[test]
fn allocate_write_flush_and_reopen_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.dat");

    let mut cache = open_cache(&path, 8);
    let pinned = cache.allocate(PageType::Data).unwrap();
    let page_id = pinned.page_id();
    {
        let mut page = pinned.write().unwrap();
        page.append_tuple(1, b"hello").unwrap();
    }
    drop(pinned);
    cache.flush_dirty().unwrap();

    let mut reopened = open_cache(&path, 8);
    let pinned = reopened.get(page_id, PinMode::Read).unwrap();
    let page = pinned.read();
    assert_eq!(page.read_tuple(0).unwrap().unwrap(), b"hello");
}

#[test]
fn checksum_mismatch_is_reported_as_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.dat");

    let mut cache = open_cache(&path, 8);
    let pinned = cache.allocate(PageType::Data).unwrap();
    let page_id = pinned.page_id();
    {
        pinned.write().unwrap().append_tuple(1, b"data").unwrap();
    }
    drop(pinned);
    cache.flush_dirty().unwrap();
    drop(cache);

    // Corrupt one payload byte on disk.
    use std::io::{Seek, SeekFrom, Write};
    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(4090)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    drop(file);

    let mut reopened = open_cache(&path, 8);
    let err = reopened.get(page_id, PinMode::Read).unwrap_err();
    assert!(matches!(err, DbError::Corruption(_)));
}

#[test]
fn eviction_never_drops_a_pinned_page() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.dat");
    let mut cache = open_cache(&path, 1);

    let pinned_a = cache.allocate(PageType::Data).unwrap();
    cache.flush_dirty().unwrap();

    // Allocating a second page would normally evict, but `pinned_a` is
    // still held and the cache is at capacity, so there is nothing
    // evictable — the cache must refuse rather than silently drop it.
    let err = cache.allocate(PageType::Data).unwrap_err();
    assert!(matches!(err, DbError::Storage(_)));
    assert_eq!(pinned_a.page_id(), 0);
}

#[test]
fn evict_one_skips_dirty_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.dat");
    let mut cache = open_cache(&path, 8);

    let pinned = cache.allocate(PageType::Data).unwrap();
    drop(pinned); // unpinned, but still dirty until flush_dirty runs

    assert_eq!(cache.evict_one().unwrap(), None);
    cache.flush_dirty().unwrap();
}

#[test]
fn encrypted_round_trip_requires_matching_key() {
    use crypto::{derive_key, KdfParams, Salt};

    let dir = tempdir().unwrap();
    let path = dir.path().join("table.dat");
    let salt = Salt::random();
    let key = derive_key("hunter2", &salt, KdfParams::default()).unwrap();

    let mut cache = PageCache::open(&path, 4096, 8, DurabilityMode::FullSync, Some(key.clone()))
        .unwrap();
    let pinned = cache.allocate(PageType::Data).unwrap();
    let page_id = pinned.page_id();
    pinned.write().unwrap().append_tuple(1, b"secret").unwrap();
    drop(pinned);
    cache.flush_dirty().unwrap();
    drop(cache);

    let mut reopened =
        PageCache::open(&path, 4096, 8, DurabilityMode::FullSync, Some(key)).unwrap();
    let pinned = reopened.get(page_id, PinMode::Read).unwrap();
    assert_eq!(pinned.read().read_tuple(0).unwrap().unwrap(), b"secret");

    let wrong_key = derive_key("wrong", &Salt::random(), KdfParams::default()).unwrap();
    let mut wrong = PageCache::open(&path, 4096, 8, DurabilityMode::FullSync, Some(wrong_key))
        .unwrap();
    let err = wrong.get(page_id, PinMode::Read).unwrap_err();
    assert!(matches!(err, DbError::AuthError(_)));
}
