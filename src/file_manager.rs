//! Byte-addressed read/write access to the database file.
//!
//! In write mode, a single dedicated thread owns the file descriptor and
//! drains an append queue; in read mode, a single dedicated thread owns a
//! filesystem watcher and reacts to size growth. Either way, exactly one
//! thread ever mutates the size counter or runs the subscriber fanout, and
//! subscribers observe calls strictly in row-index order.

use std::fs::{File, OpenOptions};
#[cfg(not(unix))]
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use fs4::fs_std::FileExt;
use log::{debug, error, warn};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::header::HEADER_SIZE;
use crate::row::{self, RowKind};

/// Which way a [`FileManager`] was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No lock taken; multiple readers may coexist.
    Read,
    /// An exclusive, non-blocking advisory lock is held for the handle's lifetime.
    Write,
}

type Callback = Box<dyn Fn(usize, &RowKind) -> Result<()> + Send + Sync>;

struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

impl Subscribers {
    fn new() -> Self {
        Subscribers {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    fn add(&mut self, cb: Callback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, cb));
        id
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(existing, _)| *existing != id);
    }
}

/// Opaque subscription handle; dropping it does not unsubscribe, call
/// [`FileManager::unsubscribe`] explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

enum WriterMessage {
    Append {
        bytes: Vec<u8>,
        reply: mpsc::SyncSender<Result<usize>>,
    },
    Shutdown,
}

struct WriteState {
    sender: mpsc::SyncSender<WriterMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    #[allow(dead_code)] // held only to keep the advisory lock alive
    lock_file: Arc<File>,
}

struct ReadState {
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

enum ModeState {
    Write(WriteState),
    Read(ReadState),
}

/// Byte-addressed access to the database file, shared between the Finder and
/// the transaction engine.
pub struct FileManager {
    path: PathBuf,
    row_size: u32,
    size: Arc<AtomicU64>,
    read_file: File,
    subscribers: Arc<Mutex<Subscribers>>,
    mode_state: ModeState,
}

impl FileManager {
    /// Open `path` in the given mode. `row_size` must already be known (from
    /// a validated header) so the read-mode watcher can interpret growth in
    /// terms of complete rows.
    pub fn open(path: &Path, mode: Mode, row_size: u32) -> Result<Self> {
        let read_file = File::open(path).map_err(Error::read_io)?;
        let initial_size = read_file.metadata().map_err(Error::read_io)?.len();
        let size = Arc::new(AtomicU64::new(initial_size));
        let subscribers = Arc::new(Mutex::new(Subscribers::new()));

        let mode_state = match mode {
            Mode::Write => {
                let file = OpenOptions::new()
                    .append(true)
                    .open(path)
                    .map_err(Error::write_io)?;
                file.try_lock_exclusive().map_err(|e| {
                    warn!("advisory lock contention on {}: {e}", path.display());
                    Error::new(
                        crate::error::Kind::Write,
                        format!("failed to acquire exclusive lock on {}: {e}", path.display()),
                    )
                })?;
                let lock_file = Arc::new(file);
                let (sender, receiver) = mpsc::sync_channel(0);
                let worker = spawn_writer(
                    lock_file.clone(),
                    receiver,
                    size.clone(),
                    subscribers.clone(),
                    row_size,
                );
                ModeState::Write(WriteState {
                    sender,
                    worker: Mutex::new(Some(worker)),
                    lock_file,
                })
            }
            Mode::Read => {
                // Capture initial size before starting the watcher, and register
                // the watch before returning, so the race window between "open"
                // and "watch" cannot hide an append: the watcher's first
                // notification always re-reads the current size from disk and
                // compares against our atomic, catching anything that happened
                // in between.
                let (watcher, worker) =
                    spawn_watcher(path, size.clone(), subscribers.clone(), row_size)?;
                ModeState::Read(ReadState {
                    watcher: Mutex::new(Some(watcher)),
                    worker: Mutex::new(Some(worker)),
                })
            }
        };

        Ok(FileManager {
            path: path.to_path_buf(),
            row_size,
            size,
            read_file,
            subscribers,
            mode_state,
        })
    }

    /// Current known file size. Lock-free.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// The row width this file manager was opened with.
    pub fn row_size(&self) -> u32 {
        self.row_size
    }

    /// Read `length` bytes starting at `offset`, bounds-checked against the
    /// current size.
    pub fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let size = self.size();
        let end = offset
            .checked_add(length as u64)
            .ok_or_else(|| Error::invalid_input("offset + length overflows"))?;
        if end > size {
            return Err(Error::invalid_input(format!(
                "read of [{offset}, {end}) is past current size {size}"
            )));
        }
        let mut buf = vec![0u8; length];
        read_at(&self.read_file, offset, &mut buf)?;
        Ok(buf)
    }

    /// Append a complete row. Write-mode only. Returns the row's index.
    pub fn append(&self, bytes: Vec<u8>) -> Result<usize> {
        let ModeState::Write(ref state) = self.mode_state else {
            return Err(Error::invalid_action("append is only legal on a write-mode FileManager"));
        };
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        state
            .sender
            .send(WriterMessage::Append {
                bytes,
                reply: reply_tx,
            })
            .map_err(|_| Error::write_io(std::io::Error::other("writer thread gone")))?;
        reply_rx
            .recv()
            .map_err(|_| Error::write_io(std::io::Error::other("writer thread dropped reply")))?
    }

    /// Register a callback invoked after every durably-appended, visible row.
    pub fn subscribe(&self, callback: impl Fn(usize, &RowKind) -> Result<()> + Send + Sync + 'static) -> SubscriptionId {
        let mut subs = self.subscribers.lock();
        SubscriptionId(subs.add(Box::new(callback)))
    }

    /// Remove a previously registered subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().remove(id.0);
    }

    /// The path this file manager was opened against.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the file manager. Idempotent.
    pub fn close(&self) -> Result<()> {
        match &self.mode_state {
            ModeState::Write(state) => {
                let _ = state.sender.send(WriterMessage::Shutdown);
                if let Some(handle) = state.worker.lock().take() {
                    let _ = handle.join();
                }
                FileExt::unlock(state.lock_file.as_ref())
                    .map_err(Error::write_io)?;
            }
            ModeState::Read(state) => {
                if let Some(watcher) = state.watcher.lock().take() {
                    drop(watcher);
                }
                if let Some(handle) = state.worker.lock().take() {
                    let _ = handle.join();
                }
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    use std::os::unix::fs::FileExt as _;
    file.read_exact_at(buf, offset).map_err(Error::read_io)
}

#[cfg(not(unix))]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut f = file.try_clone().map_err(Error::read_io)?;
    f.seek(SeekFrom::Start(offset)).map_err(Error::read_io)?;
    f.read_exact(buf).map_err(Error::read_io)
}

fn spawn_writer(
    lock_file: Arc<File>,
    receiver: mpsc::Receiver<WriterMessage>,
    size: Arc<AtomicU64>,
    subscribers: Arc<Mutex<Subscribers>>,
    row_size: u32,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        use std::io::Write;
        let mut file = lock_file.as_ref();
        loop {
            match receiver.recv() {
                Ok(WriterMessage::Append { bytes, reply }) => {
                    let result = (|| -> Result<usize> {
                        let offset = size.load(Ordering::Acquire);
                        file.write_all(&bytes).map_err(Error::write_io)?;
                        file.sync_data().map_err(Error::write_io)?;
                        let new_size = offset + bytes.len() as u64;
                        size.store(new_size, Ordering::Release);
                        let index = row_index(offset, row_size);
                        let decoded = row::unmarshal(&bytes, row_size)?;
                        debug!("accepted append at index {index} (offset {offset}, {} bytes)", bytes.len());
                        fan_out(&subscribers, index, &decoded);
                        Ok(index)
                    })();
                    let _ = reply.send(result);
                }
                Ok(WriterMessage::Shutdown) | Err(_) => break,
            }
        }
        debug!("writer thread exiting");
    })
}

fn spawn_watcher(
    path: &Path,
    size: Arc<AtomicU64>,
    subscribers: Arc<Mutex<Subscribers>>,
    row_size: u32,
) -> Result<(notify::RecommendedWatcher, JoinHandle<()>)> {
    let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = event_tx.send(res);
    })
    .map_err(|e| Error::write_io(std::io::Error::other(e.to_string())))?;
    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| Error::write_io(std::io::Error::other(e.to_string())))?;

    let path = path.to_path_buf();
    let worker = std::thread::spawn(move || {
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("read-mode watcher could not reopen {}: {e}", path.display());
                return;
            }
        };
        loop {
            match event_rx.recv_timeout(Duration::from_secs(3600)) {
                Ok(Ok(event)) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
                    ) {
                        continue;
                    }
                    debug!("watcher wakeup for {}: {:?}", path.display(), event.kind);
                    if let Err(e) = react_to_growth(&file, &size, &subscribers, row_size) {
                        error!("read-mode watcher update cycle failed: {e}");
                    }
                }
                Ok(Err(e)) => {
                    warn!("filesystem watcher reported an error: {e}");
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("watcher thread exiting");
    });

    Ok((watcher, worker))
}

fn react_to_growth(
    file: &File,
    size: &Arc<AtomicU64>,
    subscribers: &Arc<Mutex<Subscribers>>,
    row_size: u32,
) -> Result<()> {
    let new_size = file.metadata().map_err(Error::read_io)?.len();
    let old_size = size.load(Ordering::Acquire);
    if new_size <= old_size {
        return Ok(());
    }
    let old_count = row_index(old_size, row_size) as u64;
    let new_count = complete_row_count(new_size, row_size);
    for i in old_count..new_count {
        let offset = HEADER_SIZE as u64 + i * row_size as u64;
        let mut buf = vec![0u8; row_size as usize];
        read_at(file, offset, &mut buf)?;
        let decoded = row::unmarshal(&buf, row_size)?;
        size.store(offset + row_size as u64, Ordering::Release);
        fan_out(subscribers, i as usize, &decoded);
    }
    // Pick up any trailing partial-row growth that doesn't complete a row.
    size.store(new_size, Ordering::Release);
    Ok(())
}

fn complete_row_count(size: u64, row_size: u32) -> u64 {
    if size <= HEADER_SIZE as u64 {
        return 0;
    }
    (size - HEADER_SIZE as u64) / row_size as u64
}

fn row_index(offset: u64, row_size: u32) -> usize {
    ((offset.saturating_sub(HEADER_SIZE as u64)) / row_size as u64) as usize
}

fn fan_out(subscribers: &Arc<Mutex<Subscribers>>, index: usize, row: &RowKind) {
    let callbacks: Vec<u64> = {
        let subs = subscribers.lock();
        subs.entries.iter().map(|(id, _)| *id).collect()
    };
    for id in callbacks {
        let outcome = {
            let subs = subscribers.lock();
            subs.entries
                .iter()
                .find(|(existing, _)| *existing == id)
                .map(|(_, cb)| cb(index, row))
        };
        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!("subscriber {id} failed on row {index}: {e}; stopping fanout for this row");
                break;
            }
            None => {} // unsubscribed mid-cycle
        }
    }
}
