//! The engine-facing API: `create`, `open`, transaction lifecycle, and key
//! lookup, per the open/validate flow and the transaction-validity
//! resolution rules.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use uuid::Uuid;

use crate::creator::{FileCreator, NoopFileCreator};
use crate::error::{Error, Kind, Result};
use crate::file_manager::{FileManager, Mode};
use crate::finder::{self, BinarySearchFinder, Finder, FinderKind, InMemoryFinder, SharedFinder, SimpleFinder};
use crate::header::{Header, HEADER_SIZE};
use crate::integrity::{self, ChecksumScheduler};
use crate::row::{self, NullRow, RowKind};
use crate::transaction::Tx;

/// An open frozenDB file: either a single reader or the single writer.
pub struct Handle {
    file_manager: Arc<FileManager>,
    finder: SharedFinder,
    mode: Mode,
    row_size: u32,
    skew_ms: i64,
    tx_active: Arc<AtomicBool>,
    /// `Some` only in write mode: readers never append, so never schedule
    /// periodic checksum rows.
    checksum_scheduler: Option<ChecksumScheduler>,
}

impl Handle {
    /// Create a new database file: write the header and the mandatory first
    /// checksum row (covering the header), then hand off to the host's
    /// append-only attribute mechanism (a no-op by default; real platform
    /// enforcement is out of scope here).
    pub fn create(path: &Path, row_size: u32, skew_ms: i64) -> Result<()> {
        Self::create_with(path, row_size, skew_ms, &NoopFileCreator)
    }

    /// As [`Handle::create`], but with an explicit [`FileCreator`] collaborator.
    pub fn create_with(
        path: &Path,
        row_size: u32,
        skew_ms: i64,
        creator: &dyn FileCreator,
    ) -> Result<()> {
        let header = Header::new(row_size, skew_ms)?;
        let header_bytes = header.marshal()?;
        let checksum = integrity::compute_block_checksum(&header_bytes);
        let checksum_bytes = row::marshal(&RowKind::Checksum(checksum), row_size)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(Error::write_io)?;
        file.write_all(&header_bytes).map_err(Error::write_io)?;
        file.write_all(&checksum_bytes).map_err(Error::write_io)?;
        file.sync_all().map_err(Error::write_io)?;
        drop(file);

        creator.mark_append_only(path)?;
        info!("created frozenDB file at {} (row_size={row_size}, skew_ms={skew_ms})", path.display());
        Ok(())
    }

    /// Open an existing database file, validating its header and mandatory
    /// first checksum row before constructing the requested Finder.
    pub fn open(path: &Path, mode: Mode, finder_kind: FinderKind) -> Result<Self> {
        let header_bytes = std::fs::read(path).map_err(Error::read_io)?;
        if header_bytes.len() < HEADER_SIZE {
            warn!("rejecting {}: shorter than the 64-byte header", path.display());
            return Err(Error::corruption("file shorter than the 64-byte header").with_offset(0));
        }
        let header = Header::unmarshal(&header_bytes[..HEADER_SIZE]).map_err(|e| {
            warn!("rejecting {}: invalid header: {e}", path.display());
            e
        })?;
        let row_size = header.row_size;
        let skew_ms = header.skew_ms;

        let min_size = HEADER_SIZE as u64 + row_size as u64;
        if (header_bytes.len() as u64) < min_size {
            return Err(Error::corruption(format!(
                "file size {} smaller than header + first checksum row ({min_size})",
                header_bytes.len()
            ))
            .with_offset(HEADER_SIZE as u64));
        }

        let first_row_bytes = &header_bytes[HEADER_SIZE..HEADER_SIZE + row_size as usize];
        let first_row = row::unmarshal(first_row_bytes, row_size)
            .map_err(|e| e.with_offset(HEADER_SIZE as u64))?;
        let RowKind::Checksum(checksum) = first_row else {
            return Err(Error::corruption("row at index 0 is not a ChecksumRow").with_offset(HEADER_SIZE as u64));
        };
        checksum
            .verify(&header_bytes[..HEADER_SIZE])
            .map_err(|e| e.with_offset(0))?;

        let file_manager = Arc::new(FileManager::open(path, mode, row_size)?);
        let initial_row_count = finder::complete_row_count(&file_manager);

        let finder: SharedFinder = match finder_kind {
            FinderKind::Simple => Arc::new(SimpleFinder::new(file_manager.clone(), initial_row_count)?),
            FinderKind::Binary => {
                Arc::new(BinarySearchFinder::new(file_manager.clone(), initial_row_count, skew_ms)?)
            }
            FinderKind::InMemory => Arc::new(InMemoryFinder::new(&file_manager, initial_row_count)?),
        };

        let callback_finder = finder.clone();
        file_manager.subscribe(move |index, row| callback_finder.on_row_added(index, row));

        let checksum_scheduler = match mode {
            Mode::Write => Some(ChecksumScheduler::from_file(&file_manager)?),
            Mode::Read => None,
        };

        info!(
            "opened {} in {mode:?} mode (row_size={row_size}, skew_ms={skew_ms}, finder={finder_kind:?})",
            path.display()
        );
        Ok(Handle {
            file_manager,
            finder,
            mode,
            row_size,
            skew_ms,
            tx_active: Arc::new(AtomicBool::new(false)),
            checksum_scheduler,
        })
    }

    /// Begin a transaction. Write-mode only; fails if one is already active.
    pub fn begin_tx(&self) -> Result<Tx<'_>> {
        if self.mode != Mode::Write {
            return Err(Error::invalid_action("begin_tx requires a write-mode handle"));
        }
        if self
            .tx_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::invalid_action("a transaction is already active on this handle"));
        }
        Tx::begin(
            &self.file_manager,
            &self.finder,
            self.checksum_scheduler
                .as_ref()
                .expect("write-mode handle always has a checksum scheduler"),
            self.row_size,
            self.skew_ms,
            self.tx_active.clone(),
        )
    }

    /// Write a single-row empty transaction. The NullRow's key carries the
    /// Finder's current `max_timestamp`.
    pub fn insert_null_row(&self) -> Result<()> {
        if self.mode != Mode::Write {
            return Err(Error::invalid_action("insert_null_row requires a write-mode handle"));
        }
        if self.tx_active.load(Ordering::Acquire) {
            return Err(Error::invalid_action(
                "cannot insert a NullRow while a transaction is active",
            ));
        }
        let row = NullRow::new(self.finder.max_timestamp());
        let bytes = row::marshal(&RowKind::Null(row), self.row_size)?;
        self.file_manager.append(bytes)?;
        self.checksum_scheduler
            .as_ref()
            .expect("write-mode handle always has a checksum scheduler")
            .record_row(&self.file_manager)?;
        Ok(())
    }

    /// Look up `key`, resolving transaction-commit and rollback-to-savepoint
    /// validity. Returns `Kind::KeyNotFound` for any key whose containing
    /// transaction did not commit it (rolled back, fully or past the row's
    /// savepoint, or still open).
    pub fn get(&self, key: &Uuid) -> Result<Vec<u8>> {
        let index = self.finder.get_index(key)?;
        let start = self.finder.get_transaction_start(index)?;
        let end = match self.finder.get_transaction_end(index) {
            Ok(end) => end,
            Err(e) if e.kind() == Kind::TransactionActive => {
                return Err(Error::new(
                    Kind::KeyNotFound,
                    format!("key {key} not found (containing transaction still open)"),
                ));
            }
            Err(e) => return Err(e),
        };
        if !committed_at(&self.file_manager, start, end, index)? {
            return Err(Error::new(
                Kind::KeyNotFound,
                format!("key {key} not found (invalidated by rollback)"),
            ));
        }
        match finder::read_row(&self.file_manager, index)? {
            RowKind::Data(data) => Ok(data.value),
            _ => Err(Error::corruption(format!("index {index} is not a DataRow"))),
        }
    }

    /// Close the handle. Idempotent.
    pub fn close(&self) -> Result<()> {
        info!("closing {}", self.file_manager.path().display());
        self.file_manager.close()
    }

    /// The row width this handle was opened with.
    pub fn row_size(&self) -> u32 {
        self.row_size
    }

    /// The skew window this handle was opened with.
    pub fn skew_ms(&self) -> i64 {
        self.skew_ms
    }
}

/// Whether the DataRow at `index`, within the terminated transaction
/// spanning `[start, end]`, survives that transaction's outcome: committed
/// outright, or created at or before the savepoint a partial rollback
/// targeted.
fn committed_at(file_manager: &FileManager, start: usize, end: usize, index: usize) -> Result<bool> {
    let RowKind::Data(terminal) = finder::read_row(file_manager, end)? else {
        return Err(Error::corruption(format!(
            "transaction terminal row at index {end} is not a DataRow"
        )));
    };
    match terminal.end_control.rollback_target() {
        None => Ok(true),
        Some(0) => Ok(false),
        Some(target) => {
            let mut seen = 0u8;
            for i in start..=end {
                let row = finder::read_row(file_manager, i)?;
                if row.end_control().sets_savepoint() {
                    seen += 1;
                    if seen == target {
                        return Ok(index <= i);
                    }
                }
            }
            Err(Error::corruption(format!(
                "rollback target savepoint {target} not found in transaction [{start}, {end}]"
            )))
        }
    }
}
