use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("Database creation error: {0}")]
    RedbCreate(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
}

/// One URL the crawler has ever admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub url: String,
    pub completed: bool,
}

/// Durable URL ledger plus a small blob table for crawl snapshots.
///
/// Keys are URL identity hashes (see [`crate::url_utils::url_identity`]).
/// Every mutation is its own committed write transaction, so concurrent
/// writers from several workers are serialized by redb.
pub struct Ledger {
    db: Database,
    path: PathBuf,
}

impl Ledger {
    const ENTRIES: TableDefinition<'static, &'static str, &'static [u8]> =
        TableDefinition::new("entries");
    const SNAPSHOTS: TableDefinition<'static, &'static str, &'static [u8]> =
        TableDefinition::new("snapshots");

    /// Open (or create) the ledger at `path`. With `fresh`, an existing file is discarded first.
    pub fn open<P: AsRef<Path>>(path: P, fresh: bool) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            if fresh {
                tracing::info!(path = %path.display(), "found save file, deleting it");
                std::fs::remove_file(&path)?;
            }
        } else if !fresh {
            tracing::info!(path = %path.display(), "did not find save file, starting from seed");
        }

        let db = Database::create(&path)?;

        // Open each table so read transactions never hit a missing table.
        let write_txn = db.begin_write()?;
        {
            let _entries = write_txn.open_table(Self::ENTRIES)?;
            let _snapshots = write_txn.open_table(Self::SNAPSHOTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert an incomplete entry unless the key is already present.
    /// Returns true if the entry was new.
    pub fn record(&self, key: &str, url: &str) -> Result<bool, LedgerError> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(Self::ENTRIES)?;
            let exists = table.get(key)?.is_some();
            if !exists {
                let entry = LedgerEntry {
                    url: url.to_string(),
                    completed: false,
                };
                let bytes = serde_json::to_vec(&entry)?;
                table.insert(key, bytes.as_slice())?;
            }
            !exists
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Flip an entry to completed, creating it if missing.
    /// Returns false when the key was not present beforehand.
    pub fn mark_complete(&self, key: &str, url: &str) -> Result<bool, LedgerError> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(Self::ENTRIES)?;
            let existed = table.get(key)?.is_some();
            let entry = LedgerEntry {
                url: url.to_string(),
                completed: true,
            };
            let bytes = serde_json::to_vec(&entry)?;
            table.insert(key, bytes.as_slice())?;
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    pub fn get(&self, key: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::ENTRIES)?;
        match table.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::ENTRIES)?;
        Ok(table.get(key)?.is_some())
    }

    pub fn len(&self) -> Result<u64, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::ENTRIES)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    /// Visit every entry in key order.
    pub fn for_each_entry<F>(&self, mut f: F) -> Result<(), LedgerError>
    where
        F: FnMut(&str, LedgerEntry) -> Result<(), LedgerError>,
    {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::ENTRIES)?;
        for result in table.iter()? {
            let (key, value) = result?;
            let entry: LedgerEntry = serde_json::from_slice(value.value())?;
            f(key.value(), entry)?;
        }
        Ok(())
    }

    pub fn store_snapshot<T: Serialize>(&self, name: &str, value: &T) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(Self::SNAPSHOTS)?;
            table.insert(name, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn load_snapshot<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Result<Option<T>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::SNAPSHOTS)?;
        match table.get(name)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_is_insert_if_absent() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path().join("frontier.redb"), false).unwrap();

        assert!(ledger.record("k1", "https://cs.uci.edu").unwrap());
        assert!(!ledger.record("k1", "https://cs.uci.edu").unwrap());
        assert_eq!(ledger.len().unwrap(), 1);
        assert_eq!(
            ledger.get("k1").unwrap(),
            Some(LedgerEntry {
                url: "https://cs.uci.edu".to_string(),
                completed: false
            })
        );
    }

    #[test]
    fn test_mark_complete() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path().join("frontier.redb"), false).unwrap();

        ledger.record("k1", "https://cs.uci.edu/a").unwrap();
        assert!(ledger.mark_complete("k1", "https://cs.uci.edu/a").unwrap());
        assert!(ledger.get("k1").unwrap().unwrap().completed);

        // Unknown keys are still written but reported.
        assert!(!ledger.mark_complete("k2", "https://cs.uci.edu/b").unwrap());
        assert!(ledger.contains("k2").unwrap());

        // A completed entry is not reset by a later record.
        assert!(!ledger.record("k1", "https://cs.uci.edu/a").unwrap());
        assert!(ledger.get("k1").unwrap().unwrap().completed);
    }

    #[test]
    fn test_survives_reopen_and_fresh_discards() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frontier.redb");
        {
            let ledger = Ledger::open(&path, false).unwrap();
            ledger.record("a", "https://stat.uci.edu/a").unwrap();
            ledger.record("b", "https://stat.uci.edu/b").unwrap();
            ledger.mark_complete("a", "https://stat.uci.edu/a").unwrap();
        }
        {
            let ledger = Ledger::open(&path, false).unwrap();
            let mut pending = Vec::new();
            ledger
                .for_each_entry(|_, entry| {
                    if !entry.completed {
                        pending.push(entry.url);
                    }
                    Ok(())
                })
                .unwrap();
            assert_eq!(pending, vec!["https://stat.uci.edu/b".to_string()]);
        }
        let ledger = Ledger::open(&path, true).unwrap();
        assert!(ledger.is_empty().unwrap());
    }

    #[test]
    fn test_snapshots() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path().join("frontier.redb"), false).unwrap();

        assert_eq!(ledger.load_snapshot::<Vec<u32>>("numbers").unwrap(), None);
        ledger.store_snapshot("numbers", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(
            ledger.load_snapshot::<Vec<u32>>("numbers").unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_concurrent_point_writes() {
        let dir = TempDir::new().unwrap();
        let ledger = std::sync::Arc::new(Ledger::open(dir.path().join("frontier.redb"), false).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = std::sync::Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let key = format!("{}-{}", t, i);
                        ledger.record(&key, &format!("https://cs.uci.edu/{}", key)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.len().unwrap(), 100);
    }
}
