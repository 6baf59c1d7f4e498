//! Append-only, segmented write-ahead log with group commit (C6) and
//! crash recovery (C7).
//!
//! Producers call [`Wal::commit`] with an opaque payload; a single
//! background committer thread drains a channel of these requests in
//! bursts, assigns contiguous LSNs, writes one frame per burst, and
//! resolves every burst member's completion handle in enqueue order. This
//! is the same shape as the write-coordinator pattern the corpus uses for
//! group commit: one committer, a channel, and `Arc<(Mutex<_>, Condvar)>`
//! completion handles — chosen over a `tokio` runtime so the storage core
//! stays free of an async dependency.


use common::{DbError, DbResult, DurabilityMode};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SEGMENT_MAGIC: u32 = 0x5343_5747; // "SCWG"
const SEGMENT_VERSION: u16 = 1;
const SEGMENT_HEADER_LEN: usize = 16; // magic:4 + version:2 + pad:2 + created_lsn:8
const FRAME_HEADER_LEN: usize = 8 + 4 + 4; // lsn_start + count + body_len
const FRAME_TRAILER_LEN: usize = 4; // crc32

/// Durability + batching knobs the committer thread reads once at spawn.
#[derive(Clone, Copy, Debug)]
pub struct WalOptions {
    pub durability_mode: DurabilityMode,
    pub max_batch_size: usize,
    pub max_batch_delay: Duration,
    pub segment_size: usize,
}

#[derive(Clone, Debug, Default)]
pub struct WalStats {
    pub batches_committed: u64,
    pub statements_committed: u64,
    pub fsync_count: u64,
    pub batches_closed_by_size: u64,
    pub batches_closed_by_timeout: u64,
    pub segment_rotations: u64,
}

impl WalStats {
    pub fn avg_batch_size(&self) -> f64 {
        if self.batches_committed == 0 {
            0.0
        } else {
            self.statements_committed as f64 / self.batches_committed as f64
        }
    }
}

type CompletionSlot = Arc<(Mutex<Option<DbResult<u64>>>, Condvar)>;

struct CommitRequest {
    payload: Vec<u8>,
    completion: CompletionSlot,
}

enum ControlMessage {
    Commit(CommitRequest),
    Shutdown,
}

/// A handle to the group-commit WAL. Cloning is not supported — callers
/// share one `Wal` (typically behind an `Arc`) the same way the corpus
/// shares one write coordinator per database.
pub struct Wal {
    sender: Sender<ControlMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Mutex<WalStats>>,
}

impl Wal {
    pub fn open(dir: impl Into<PathBuf>, options: WalOptions) -> DbResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let stats = Arc::new(Mutex::new(WalStats::default()));
        let (sender, receiver) = mpsc::channel::<ControlMessage>();

        let mut state = CommitterState::open(dir, options, stats.clone())?;
        let worker = std::thread::spawn(move || {
            committer_loop(&receiver, &mut state);
        });

        Ok(Wal {
            sender,
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    /// Enqueues `payload` and blocks until it is durable per the
    /// configured durability mode, returning the LSN it was assigned.
    pub fn commit(&self, payload: Vec<u8>) -> DbResult<u64> {
        let completion: CompletionSlot = Arc::new((Mutex::new(None), Condvar::new()));
        self.sender
            .send(ControlMessage::Commit(CommitRequest {
                payload,
                completion: completion.clone(),
            }))
            .map_err(|_| DbError::Shutdown)?;

        let (lock, cvar) = &*completion;
        let mut guard = lock.lock().unwrap();
        while guard.is_none() {
            guard = cvar.wait(guard).unwrap();
        }
        guard.take().unwrap()
    }

    pub fn stats(&self) -> WalStats {
        self.stats.lock().unwrap().clone()
    }

    /// Drains in-flight commits and joins the committer thread. Further
    /// calls to [`Wal::commit`] fail with `DbError::Shutdown`. Callable
    /// through a shared `Arc<Wal>` — the join handle lives behind a mutex
    /// so this doesn't need exclusive access, and is safe to call more
    /// than once (later calls are no-ops).
    pub fn close(&self) -> DbResult<()> {
        let _ = self.sender.send(ControlMessage::Shutdown);
        let mut worker = self.worker.lock().unwrap();
        if let Some(handle) = worker.take() {
            handle.join().map_err(|_| {
                DbError::Wal("committer thread panicked during shutdown".into())
            })?;
        }
        Ok(())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn committer_loop(receiver: &mpsc::Receiver<ControlMessage>, state: &mut CommitterState) {
    loop {
        let first = match receiver.recv() {
            Ok(ControlMessage::Commit(req)) => req,
            Ok(ControlMessage::Shutdown) | Err(_) => return,
        };

        let mut burst = vec![first];
        let deadline = Instant::now() + state.options.max_batch_delay;
        let mut closed_by_timeout = false;

        while burst.len() < state.options.max_batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                closed_by_timeout = true;
                break;
            }
            match receiver.recv_timeout(remaining) {
                Ok(ControlMessage::Commit(req)) => burst.push(req),
                Ok(ControlMessage::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {
                    closed_by_timeout = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let closed_by_size = !closed_by_timeout && burst.len() >= state.options.max_batch_size;
        let result = state.commit_burst(&burst, closed_by_size, closed_by_timeout);

        for (i, req) in burst.into_iter().enumerate() {
            let outcome = match &result {
                Ok(lsn_start) => Ok(lsn_start + i as u64),
                Err(e) => Err(clone_db_error(e)),
            };
            let (lock, cvar) = &*req.completion;
            *lock.lock().unwrap() = Some(outcome);
            cvar.notify_all();
        }
    }
}

/// `DbError` isn't `Clone` (its `Io` variant wraps `std::io::Error`), but
/// every completion handle in a burst needs its own copy of the same
/// failure — including the original variant, so an `Io` failure (a real
/// disk write or fsync error) still surfaces as `DbError::Io` to every
/// caller rather than being collapsed into a generic `Wal` error.
fn clone_db_error(e: &DbError) -> DbError {
    match e {
        DbError::Catalog(s) => DbError::Catalog(s.clone()),
        DbError::Storage(s) => DbError::Storage(s.clone()),
        DbError::Wal(s) => DbError::Wal(s.clone()),
        DbError::Corruption(s) => DbError::Corruption(s.clone()),
        DbError::AuthError(s) => DbError::AuthError(s.clone()),
        DbError::NotFound(s) => DbError::NotFound(s.clone()),
        DbError::SchemaViolation(s) => DbError::SchemaViolation(s.clone()),
        DbError::ConstraintViolation(s) => DbError::ConstraintViolation(s.clone()),
        DbError::Timeout(s) => DbError::Timeout(s.clone()),
        DbError::Shutdown => DbError::Shutdown,
        DbError::Io(io_err) => DbError::Io(std::io::Error::new(io_err.kind(), io_err.to_string())),
    }
}

/// Owns the committer thread's file handles and bookkeeping. Lives only
/// inside the committer thread; the public `Wal` handle never touches it
/// directly.
struct CommitterState {
    dir: PathBuf,
    options: WalOptions,
    stats: Arc<Mutex<WalStats>>,
    segment_index: u64,
    segment_file: File,
    segment_len: usize,
    next_lsn: u64,
}

impl CommitterState {
    fn open(dir: PathBuf, options: WalOptions, stats: Arc<Mutex<WalStats>>) -> DbResult<Self> {
        let segments = list_segments(&dir)?;
        let (segment_index, next_lsn) = match segments.last() {
            Some(&idx) => {
                let (_, max_lsn) = read_segment_bounds(&segment_path(&dir, idx))?;
                (idx, max_lsn.map(|lsn| lsn + 1).unwrap_or(0))
            }
            None => (0, 0),
        };

        let path = segment_path(&dir, segment_index);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            write_segment_header(&mut file, next_lsn)?;
        }
        let segment_len = file.metadata()?.len() as usize;

        Ok(CommitterState {
            dir,
            options,
            stats,
            segment_index,
            segment_file: file,
            segment_len,
            next_lsn,
        })
    }

    fn commit_burst(
        &mut self,
        burst: &[CommitRequest],
        closed_by_size: bool,
        closed_by_timeout: bool,
    ) -> DbResult<u64> {
        let lsn_start = self.next_lsn;

        let mut body = Vec::new();
        for req in burst {
            body.extend_from_slice(&(req.payload.len() as u32).to_le_bytes());
            body.extend_from_slice(&req.payload);
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len() + FRAME_TRAILER_LEN);
        frame.extend_from_slice(&lsn_start.to_le_bytes());
        frame.extend_from_slice(&(burst.len() as u32).to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        if self.segment_len + frame.len() > self.options.segment_size {
            self.rotate()?;
        }

        self.segment_file.write_all(&frame)?;
        self.segment_len += frame.len();

        let fsync = matches!(self.options.durability_mode, DurabilityMode::FullSync);
        if fsync {
            self.segment_file.sync_all()?;
        }

        self.next_lsn += burst.len() as u64;

        let mut stats = self.stats.lock().unwrap();
        stats.batches_committed += 1;
        stats.statements_committed += burst.len() as u64;
        if fsync {
            stats.fsync_count += 1;
        }
        if closed_by_size {
            stats.batches_closed_by_size += 1;
        }
        if closed_by_timeout {
            stats.batches_closed_by_timeout += 1;
        }
        drop(stats);

        log::debug!(
            "committed batch lsn_start={lsn_start} count={} closed_by_size={closed_by_size} closed_by_timeout={closed_by_timeout}",
            burst.len()
        );

        Ok(lsn_start)
    }

    fn rotate(&mut self) -> DbResult<()> {
        // Segment rotation is fsynced under both durability modes: losing
        // an un-rotated segment boundary risks orphaning the entire prior
        // segment, a worse outcome than the bounded loss Async mode
        // otherwise accepts.
        self.segment_file.sync_all()?;

        self.segment_index += 1;
        let path = segment_path(&self.dir, self.segment_index);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        write_segment_header(&mut file, self.next_lsn)?;
        self.segment_file = file;
        self.segment_len = SEGMENT_HEADER_LEN;

        self.stats.lock().unwrap().segment_rotations += 1;
        log::debug!("rotated WAL to segment {}", self.segment_index);
        Ok(())
    }
}

fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("wal-{index:020}.seg"))
}

fn list_segments(dir: &Path) -> DbResult<Vec<u64>> {
    let mut indices = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stripped) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".seg")) {
            if let Ok(idx) = stripped.parse::<u64>() {
                indices.push(idx);
            }
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

fn write_segment_header(file: &mut File, created_lsn: u64) -> DbResult<()> {
    let mut header = [0u8; SEGMENT_HEADER_LEN];
    header[0..4].copy_from_slice(&SEGMENT_MAGIC.to_le_bytes());
    header[4..6].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&created_lsn.to_le_bytes());
    file.write_all(&header)?;
    Ok(())
}

/// Reads a segment's header and the highest LSN among its well-formed
/// frames, without validating CRCs — used only to figure out where a
/// freshly-opened committer should resume numbering from.
fn read_segment_bounds(path: &Path) -> DbResult<(u32, Option<u64>)> {
    let mut file = File::open(path)?;
    let mut header = [0u8; SEGMENT_HEADER_LEN];
    if file.read_exact(&mut header).is_err() {
        return Ok((SEGMENT_MAGIC, None));
    }
    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());

    let mut max_lsn = None;
    loop {
        let mut frame_header = [0u8; FRAME_HEADER_LEN];
        if file.read_exact(&mut frame_header).is_err() {
            break;
        }
        let lsn_start = u64::from_le_bytes(frame_header[0..8].try_into().unwrap());
        let count = u32::from_le_bytes(frame_header[8..12].try_into().unwrap());
        let body_len = u32::from_le_bytes(frame_header[12..16].try_into().unwrap());

        if file
            .seek(SeekFrom::Current(body_len as i64 + FRAME_TRAILER_LEN as i64))
            .is_err()
        {
            break;
        }
        max_lsn = Some(lsn_start + count.saturating_sub(1) as u64);
    }

    Ok((magic, max_lsn))
}

/// One durable commit as recovered from the log: the LSN it was assigned
/// and the opaque payload it carried.
#[derive(Clone, Debug)]
pub struct ReplayedEntry {
    pub lsn: u64,
    pub payload: Vec<u8>,
}

/// Sequentially replays every segment in `dir`, validating each frame's
/// CRC. The first invalid frame — whether from a torn write or real
/// corruption — truncates the log at that byte offset: everything from
/// there onward (including later segment files) is discarded, matching
/// the "tail corruption is benign" contract. This intentionally does not
/// try to distinguish a torn tail from mid-log corruption; a forward-only
/// scan can't tell them apart without a second backward pass this design
/// doesn't perform, and a torn tail is overwhelmingly the common case.
pub fn replay(dir: impl AsRef<Path>) -> DbResult<Vec<ReplayedEntry>> {
    let dir = dir.as_ref();
    let segments = list_segments(dir)?;
    let mut entries = Vec::new();

    for (pos, &index) in segments.iter().enumerate() {
        let path = segment_path(dir, index);
        let (valid_len, segment_entries) = replay_segment(&path)?;
        entries.extend(segment_entries);

        let file_len = fs::metadata(&path)?.len();
        if valid_len < file_len {
            log::warn!(
                "truncating WAL segment {} at offset {} ({} trailing bytes discarded)",
                index,
                valid_len,
                file_len - valid_len
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid_len)?;

            for &later in &segments[pos + 1..] {
                fs::remove_file(segment_path(dir, later))?;
            }
            break;
        }
    }

    Ok(entries)
}

fn replay_segment(path: &Path) -> DbResult<(u64, Vec<ReplayedEntry>)> {
    let mut file = File::open(path)?;
    let mut header = [0u8; SEGMENT_HEADER_LEN];
    if file.read_exact(&mut header).is_err() {
        return Ok((0, Vec::new()));
    }
    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if magic != SEGMENT_MAGIC {
        return Err(DbError::Corruption(format!(
            "bad WAL segment magic in {}",
            path.display()
        )));
    }

    let mut entries = Vec::new();
    let mut offset = SEGMENT_HEADER_LEN as u64;

    loop {
        let mut frame_header = [0u8; FRAME_HEADER_LEN];
        if file.read_exact(&mut frame_header).is_err() {
            break;
        }
        let lsn_start = u64::from_le_bytes(frame_header[0..8].try_into().unwrap());
        let count = u32::from_le_bytes(frame_header[8..12].try_into().unwrap());
        let body_len = u32::from_le_bytes(frame_header[12..16].try_into().unwrap());

        let mut body = vec![0u8; body_len as usize];
        if file.read_exact(&mut body).is_err() {
            break;
        }
        let mut trailer = [0u8; FRAME_TRAILER_LEN];
        if file.read_exact(&mut trailer).is_err() {
            break;
        }
        let stored_crc = u32::from_le_bytes(trailer);

        let mut check = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        check.extend_from_slice(&frame_header);
        check.extend_from_slice(&body);
        if crc32fast::hash(&check) != stored_crc {
            break;
        }

        let mut cursor = 0usize;
        let mut lsn = lsn_start;
        for _ in 0..count {
            if cursor + 4 > body.len() {
                break;
            }
            let len = u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if cursor + len > body.len() {
                break;
            }
            entries.push(ReplayedEntry {
                lsn,
                payload: body[cursor..cursor + len].to_vec(),
            });
            cursor += len;
            lsn += 1;
        }

        offset += (FRAME_HEADER_LEN + body.len() + FRAME_TRAILER_LEN) as u64;
    }

    Ok((offset, entries))
}
