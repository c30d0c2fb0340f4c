//! Error taxonomy for the row engine.
//!
//! Errors are modeled as a single type with a `Kind` discriminant rather than as a
//! class hierarchy: callers match on `Kind` to decide whether an error is a normal
//! domain outcome (`KeyNotFound`, `TransactionActive`), a caller mistake
//! (`InvalidInput`, `InvalidAction`), or terminal for the handle (`Corruption`,
//! `Tombstoned`).

use std::fmt;

/// Discriminant for the kind of failure that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Caller violated a contract: bad UUID version, out-of-range `skew_ms`, index
    /// out of bounds, wrong row type at an index, empty value, oversized payload,
    /// duplicate key, skew-order violation, too many savepoints/rows.
    InvalidInput,
    /// Operation not permitted in the current state (commit on a start-only
    /// partial row, `begin_tx` while a transaction is active, etc).
    InvalidAction,
    /// On-disk bytes violate the format: bad sentinel, bad parity, CRC mismatch,
    /// impossible end-control sequence, file size inconsistent with `row_size`.
    Corruption,
    /// `GetTransactionEnd` reached EOF with the transaction unterminated.
    TransactionActive,
    /// `GetIndex` could not locate the requested key.
    KeyNotFound,
    /// Underlying read I/O failed.
    Read,
    /// Underlying write I/O or lock acquisition failed.
    Write,
    /// A background update cycle previously failed on this Finder; all further
    /// operations on it return this.
    Tombstoned,
}

/// The error type returned by every fallible operation in this crate.
pub struct Error {
    kind: Kind,
    message: String,
    offset: Option<u64>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Construct an error of the given kind with a message.
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            offset: None,
            source: None,
        }
    }

    /// Attach the byte offset at which the failure was detected.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Wrap an underlying error as the cause of this one.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The kind discriminant.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The byte offset the failure was detected at, if known.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        Error::new(Kind::Corruption, message)
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Error::new(Kind::InvalidInput, message)
    }

    pub(crate) fn invalid_action(message: impl Into<String>) -> Self {
        Error::new(Kind::InvalidAction, message)
    }

    pub(crate) fn tombstoned(message: impl Into<String>) -> Self {
        Error::new(Kind::Tombstoned, message)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("offset", &self.offset)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(offset) = self.offset {
            write!(f, " (at offset {offset})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    /// Wrap an I/O error encountered while reading, tagging it `Kind::Read`.
    pub(crate) fn read_io(e: std::io::Error) -> Self {
        Error::new(Kind::Read, e.to_string()).with_source(e)
    }

    /// Wrap an I/O error encountered while writing or locking, tagging it `Kind::Write`.
    pub(crate) fn write_io(e: std::io::Error) -> Self {
        Error::new(Kind::Write, e.to_string()).with_source(e)
    }
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, Error>;
