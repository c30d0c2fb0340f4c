//! `InMemoryFinder`: hash index plus incrementally-populated transaction
//! boundary maps. O(1) `get_index` and boundary lookups at the cost of O(n)
//! memory.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use super::{read_row, row_timestamp, Finder, Tombstone};
use crate::control::StartControl;
use crate::error::{Error, Kind, Result};
use crate::file_manager::FileManager;
use crate::row::RowKind;
use crate::uuid7;

struct State {
    visible_count: usize,
    key_index: HashMap<Uuid, usize>,
    /// `index -> transaction_start` for every row seen so far, including
    /// rows in a still-open transaction. Never populated for checksum rows.
    tx_start: HashMap<usize, usize>,
    /// `index -> transaction_end`, populated for a whole transaction's range
    /// only once its terminal row arrives.
    tx_end: HashMap<usize, usize>,
    /// Start index of the transaction currently open at the tail of the
    /// file, if any.
    open_tx_start: Option<usize>,
    max_timestamp: i64,
}

impl State {
    fn apply(&mut self, index: usize, row: &RowKind) {
        match row.start_control() {
            StartControl::Checksum => {
                // No transaction membership; GetTransactionStart/End on this
                // index is rejected at the `tx_start`/`tx_end` lookup.
            }
            StartControl::Transaction => {
                self.tx_start.insert(index, index);
                self.open_tx_start = Some(index);
            }
            StartControl::Continuation => {
                let start = self.open_tx_start.unwrap_or(index);
                self.tx_start.insert(index, start);
            }
        }

        if let RowKind::Data(data) = row {
            self.key_index.insert(data.key, index);
        }

        if !matches!(row.start_control(), StartControl::Checksum) && row.end_control().is_transaction_terminal() {
            let start = self.open_tx_start.unwrap_or(index);
            for i in start..=index {
                self.tx_end.insert(i, index);
            }
            self.open_tx_start = None;
        }

        if let Some(ts) = row_timestamp(row) {
            if ts > self.max_timestamp {
                self.max_timestamp = ts;
            }
        }

        self.visible_count = index + 1;
    }
}

/// Hash-indexed Finder. Open-time initialization scans the entire file once;
/// afterward every row arrives exclusively through `on_row_added`, so no
/// further reads through the file manager are needed.
pub struct InMemoryFinder {
    state: RwLock<State>,
    tombstone: Tombstone,
}

impl InMemoryFinder {
    /// Construct against an already-open file manager, scanning every row up
    /// to `initial_row_count` once to build the full index.
    pub fn new(file_manager: &FileManager, initial_row_count: usize) -> Result<Self> {
        let mut state = State {
            visible_count: 0,
            key_index: HashMap::new(),
            tx_start: HashMap::new(),
            tx_end: HashMap::new(),
            open_tx_start: None,
            max_timestamp: 0,
        };
        for i in 0..initial_row_count {
            let row = read_row(file_manager, i)?;
            state.apply(i, &row);
        }
        Ok(InMemoryFinder {
            state: RwLock::new(state),
            tombstone: Tombstone::new(),
        })
    }
}

impl Finder for InMemoryFinder {
    fn get_index(&self, key: &Uuid) -> Result<usize> {
        self.tombstone.check()?;
        uuid7::validate_uuidv7(key)?;
        if uuid7::is_nullrow_uuid(key) {
            return Err(Error::invalid_input("NullRow-shaped UUID is never a DataRow key"));
        }
        let state = self.state.read();
        state
            .key_index
            .get(key)
            .copied()
            .ok_or_else(|| Error::new(Kind::KeyNotFound, format!("key {key} not found")))
    }

    fn get_transaction_start(&self, index: usize) -> Result<usize> {
        self.tombstone.check()?;
        let state = self.state.read();
        if index >= state.visible_count {
            return Err(Error::invalid_input(format!(
                "index {index} out of range (only {} complete rows visible)",
                state.visible_count
            )));
        }
        state.tx_start.get(&index).copied().ok_or_else(|| {
            Error::invalid_input(format!("index {index} refers to a checksum row"))
        })
    }

    fn get_transaction_end(&self, index: usize) -> Result<usize> {
        self.tombstone.check()?;
        let state = self.state.read();
        if index >= state.visible_count {
            return Err(Error::invalid_input(format!(
                "index {index} out of range (only {} complete rows visible)",
                state.visible_count
            )));
        }
        if let Some(end) = state.tx_end.get(&index) {
            return Ok(*end);
        }
        if state.tx_start.contains_key(&index) {
            return Err(Error::new(
                Kind::TransactionActive,
                "transaction open at end of file",
            ));
        }
        Err(Error::invalid_input(format!(
            "index {index} refers to a checksum row"
        )))
    }

    fn on_row_added(&self, index: usize, row: &RowKind) -> Result<()> {
        let mut state = self.state.write();
        if let Err(err) = (|| -> Result<()> {
            self.tombstone.check()?;
            if index != state.visible_count {
                return Err(Error::invalid_input(format!(
                    "on_row_added called out of order: index {index}, expected {}",
                    state.visible_count
                )));
            }
            Ok(())
        })() {
            drop(state);
            return Err(self.tombstone.set(err));
        }
        state.apply(index, row);
        Ok(())
    }

    fn max_timestamp(&self) -> i64 {
        self.state.read().max_timestamp
    }
}
