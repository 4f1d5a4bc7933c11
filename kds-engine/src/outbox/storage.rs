//! redb-based storage for queued mutations and the last-known-good order list

use super::types::OutboxEntry;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use shared::error::{AppError, ErrorCode};
use shared::order::Order;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Outbox table: key = insertion sequence, value = JSON
const OUTBOX_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("outbox_entries");

/// Snapshot table: key = snapshot name, value = JSON list of orders
const SNAPSHOT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("order_snapshot");

const ACTIVE_ORDERS_KEY: &str = "active_orders";

#[derive(Debug, Error)]
pub enum OutboxStorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Outbox entry not found: {0}")]
    EntryNotFound(String),

    #[error("Outbox entry {0} is not in failed state")]
    NotFailed(String),
}

impl From<OutboxStorageError> for AppError {
    fn from(err: OutboxStorageError) -> Self {
        let code = match &err {
            OutboxStorageError::EntryNotFound(_) => ErrorCode::OutboxEntryNotFound,
            OutboxStorageError::NotFailed(_) => ErrorCode::InvalidRequest,
            _ => ErrorCode::StorageError,
        };
        AppError::with_message(code, err.to_string())
    }
}

pub type OutboxStorageResult<T> = Result<T, OutboxStorageError>;

/// Durable outbox storage
#[derive(Clone)]
pub struct OutboxStorage {
    db: Arc<Database>,
}

impl OutboxStorage {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> OutboxStorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> OutboxStorageResult<Self> {
        let db =
            Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> OutboxStorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(OUTBOX_TABLE)?;
            let _ = write_txn.open_table(SNAPSHOT_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ========== Outbox Entries ==========

    /// Append an entry, assigning the next sequence number
    pub fn append(&self, mut entry: OutboxEntry) -> OutboxStorageResult<OutboxEntry> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(OUTBOX_TABLE)?;
            let next_seq = match table.last()? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };
            entry.seq = next_seq;

            let value = serde_json::to_vec(&entry)?;
            table.insert(entry.seq, value.as_slice())?;
        }
        txn.commit()?;
        Ok(entry)
    }

    /// Overwrite an existing entry
    pub fn update(&self, entry: &OutboxEntry) -> OutboxStorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(OUTBOX_TABLE)?;
            if table.get(entry.seq)?.is_none() {
                return Err(OutboxStorageError::EntryNotFound(entry.id.clone()));
            }
            let value = serde_json::to_vec(entry)?;
            table.insert(entry.seq, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove an entry; returns whether it existed
    pub fn remove(&self, seq: u64) -> OutboxStorageResult<bool> {
        let txn = self.db.begin_write()?;
        let existed = {
            let mut table = txn.open_table(OUTBOX_TABLE)?;
            table.remove(seq)?.is_some()
        };
        txn.commit()?;
        Ok(existed)
    }

    /// All entries in insertion order
    pub fn list(&self) -> OutboxStorageResult<Vec<OutboxEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_, guard) = result?;
            let entry: OutboxEntry = serde_json::from_slice(guard.value())?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn find(&self, id: &str) -> OutboxStorageResult<Option<OutboxEntry>> {
        Ok(self.list()?.into_iter().find(|e| e.id == id))
    }

    pub fn len(&self) -> OutboxStorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> OutboxStorageResult<bool> {
        Ok(self.len()? == 0)
    }

    // ========== Order Snapshot ==========

    /// Replace the last-known-good order list
    pub fn save_snapshot(&self, orders: &[Order]) -> OutboxStorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SNAPSHOT_TABLE)?;
            let value = serde_json::to_vec(orders)?;
            table.insert(ACTIVE_ORDERS_KEY, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Last-known-good order list, empty if never saved
    pub fn load_snapshot(&self) -> OutboxStorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SNAPSHOT_TABLE)?;

        match table.get(ACTIVE_ORDERS_KEY)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::types::EntryState;
    use shared::order::OrderStatus;

    fn entry(order_id: &str, target: OrderStatus) -> OutboxEntry {
        OutboxEntry {
            id: format!("e-{order_id}-{target}"),
            seq: 0,
            order_id: order_id.to_string(),
            target_status: target,
            created_at: 0,
            attempts: 0,
            state: EntryState::Pending,
            next_attempt_at: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_append_assigns_increasing_seq() {
        let storage = OutboxStorage::open_in_memory().unwrap();

        let a = storage.append(entry("1", OrderStatus::Preparing)).unwrap();
        let b = storage.append(entry("2", OrderStatus::Preparing)).unwrap();
        let c = storage.append(entry("1", OrderStatus::Ready)).unwrap();
        assert!(a.seq < b.seq && b.seq < c.seq);

        let listed: Vec<u64> = storage.list().unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(listed, vec![a.seq, b.seq, c.seq]);
        assert_eq!(storage.len().unwrap(), 3);
    }

    #[test]
    fn test_update_and_remove() {
        let storage = OutboxStorage::open_in_memory().unwrap();
        let mut stored = storage.append(entry("1", OrderStatus::Preparing)).unwrap();

        stored.attempts = 2;
        stored.last_error = Some("timeout".into());
        storage.update(&stored).unwrap();
        assert_eq!(storage.find(&stored.id).unwrap().unwrap().attempts, 2);

        assert!(storage.remove(stored.seq).unwrap());
        assert!(!storage.remove(stored.seq).unwrap());
        assert!(storage.is_empty().unwrap());
        assert!(matches!(
            storage.update(&stored),
            Err(OutboxStorageError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_seq_keeps_increasing_after_head_removal() {
        let storage = OutboxStorage::open_in_memory().unwrap();
        let a = storage.append(entry("1", OrderStatus::Preparing)).unwrap();
        let b = storage.append(entry("2", OrderStatus::Preparing)).unwrap();
        storage.remove(a.seq).unwrap();

        let c = storage.append(entry("3", OrderStatus::Preparing)).unwrap();
        assert!(c.seq > b.seq);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let storage = OutboxStorage::open_in_memory().unwrap();
        assert!(storage.load_snapshot().unwrap().is_empty());

        let orders = vec![Order::new("1", OrderStatus::Pending), Order::new("2", OrderStatus::Ready)];
        storage.save_snapshot(&orders).unwrap();
        assert_eq!(storage.load_snapshot().unwrap(), orders);

        storage.save_snapshot(&orders[..1]).unwrap();
        assert_eq!(storage.load_snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.redb");

        {
            let storage = OutboxStorage::open(&path).unwrap();
            storage.append(entry("102", OrderStatus::Preparing)).unwrap();
            storage.save_snapshot(&[Order::new("102", OrderStatus::Pending)]).unwrap();
        }

        let storage = OutboxStorage::open(&path).unwrap();
        let entries = storage.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].order_id, "102");
        assert_eq!(storage.load_snapshot().unwrap().len(), 1);
    }
}
