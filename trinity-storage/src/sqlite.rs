use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use crate::error::StorageError;
use crate::traits::{BatchOp, KvPairs, KvStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS state (key BLOB PRIMARY KEY, value BLOB NOT NULL)";
const UPSERT: &str = "INSERT OR REPLACE INTO state (key, value) VALUES (?1, ?2)";
const REMOVE: &str = "DELETE FROM state WHERE key = ?1";

/// SQLite-backed key-value store used for relayer state that must survive
/// restarts (lane nonces, watcher cursors, submission records).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Volatile database, for tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        // FULL sync: a nonce commit must not be lost on power failure.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Poisoned { backend: "sqlite" })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT value FROM state WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.lock()?.execute(UPSERT, params![key, value])?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.lock()?.execute(REMOVE, params![key])?;
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<KvPairs, StorageError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT key, value FROM state WHERE key >= ?1 ORDER BY key")?;
        let mut rows = stmt.query(params![prefix])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let key: Vec<u8> = row.get(0)?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key, row.get(1)?));
        }
        Ok(results)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let count = ops.len();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    tx.execute(UPSERT, params![key, value])?;
                }
                BatchOp::Delete { key } => {
                    tx.execute(REMOVE, params![key])?;
                }
            }
        }
        tx.commit().map_err(|e| StorageError::BatchAborted {
            ops: count,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_and_delete() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(b"key", b"value1").unwrap();
        store.put(b"key", b"value2").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value2".to_vec()));
        store.delete(b"key").unwrap();
        assert_eq!(store.get(b"key").unwrap(), None);
        // Deleting a missing key is not an error.
        store.delete(b"key").unwrap();
    }

    #[test]
    fn test_prefix_scan_stops_at_prefix_boundary() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(b"cursor:\x01", b"1").unwrap();
        store.put(b"cursor:\x03", b"3").unwrap();
        store.put(b"cursor:\xff", b"f").unwrap();
        store.put(b"nonce:\x01", b"n").unwrap();

        let results = store.prefix_scan(b"cursor:").unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, b"cursor:\x01".to_vec());
        assert_eq!(results[2].1, b"f".to_vec());
        assert!(store.prefix_scan(b"missing:").unwrap().is_empty());
    }

    #[test]
    fn test_batch_is_applied() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(b"to_delete", b"value").unwrap();
        store
            .write_batch(vec![
                BatchOp::Put {
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                },
                BatchOp::Put {
                    key: b"b".to_vec(),
                    value: b"2".to_vec(),
                },
                BatchOp::Delete {
                    key: b"to_delete".to_vec(),
                },
            ])
            .unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"to_delete").unwrap(), None);
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayer.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(b"nonce:\x02", &9u64.to_le_bytes()).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get(b"nonce:\x02").unwrap(),
            Some(9u64.to_le_bytes().to_vec())
        );
    }
}
