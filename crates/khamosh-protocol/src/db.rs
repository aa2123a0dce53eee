use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use khamosh_crypto::{CryptoError, Keychain, SessionRecord, SessionRecordStore};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ProtocolError;

/// Schema version. Bump when the schema changes.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS keychain (
    vault TEXT NOT NULL,
    name TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (vault, name)
);

CREATE TABLE IF NOT EXISTS session_records (
    peer TEXT PRIMARY KEY,
    peer_identity_key BLOB NOT NULL,
    ratchet_state BLOB,
    updated_at INTEGER NOT NULL
);
";

/// `SQLite`-backed keychain and session record store.
///
/// One connection behind a mutex; every trait call is a short synchronous
/// statement, so contention stays low.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> CryptoError + '_ {
    move |e| CryptoError::Storage(format!("{context}: {e}"))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ProtocolError::Storage(format!("failed to open database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| ProtocolError::Storage(format!("failed to set WAL mode: {e}")))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ProtocolError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ProtocolError::Storage(format!("failed to open database: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ProtocolError> {
        let current: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current != SCHEMA_VERSION {
            if current > SCHEMA_VERSION {
                return Err(ProtocolError::Storage(format!(
                    "database schema {current} is newer than supported {SCHEMA_VERSION}"
                )));
            }
            conn.execute_batch(SCHEMA)
                .map_err(|e| ProtocolError::Storage(format!("failed to run schema: {e}")))?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| ProtocolError::Storage(format!("failed to set schema version: {e}")))?;
            tracing::info!(old = current, new = SCHEMA_VERSION, "database schema applied");
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Keychain for SqliteStore {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO keychain (vault, name, data) VALUES (?1, ?2, ?3)",
                params![vault, key, data],
            )
            .map_err(storage_err("store key"))?;
        Ok(())
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        self.conn
            .lock()
            .query_row(
                "SELECT data FROM keychain WHERE vault = ?1 AND name = ?2",
                params![vault, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("load key"))
    }

    fn take_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(storage_err("begin take"))?;
        let data: Option<Vec<u8>> = tx
            .query_row(
                "SELECT data FROM keychain WHERE vault = ?1 AND name = ?2",
                params![vault, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("take key"))?;
        if data.is_some() {
            tx.execute(
                "DELETE FROM keychain WHERE vault = ?1 AND name = ?2",
                params![vault, key],
            )
            .map_err(storage_err("take key"))?;
        }
        tx.commit().map_err(storage_err("commit take"))?;
        Ok(data)
    }

    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM keychain WHERE vault = ?1 AND name = ?2",
                params![vault, key],
            )
            .map_err(storage_err("delete key"))?;
        Ok(())
    }

    fn key_exists(&self, vault: &str, key: &str) -> Result<bool, CryptoError> {
        self.conn
            .lock()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM keychain WHERE vault = ?1 AND name = ?2)",
                params![vault, key],
                |row| row.get(0),
            )
            .map_err(storage_err("key exists"))
    }

    fn list_keys(&self, vault: &str) -> Result<Vec<String>, CryptoError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM keychain WHERE vault = ?1 ORDER BY name")
            .map_err(storage_err("list keys"))?;
        let names = stmt
            .query_map(params![vault], |row| row.get(0))
            .map_err(storage_err("list keys"))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(storage_err("list keys"))?;
        Ok(names)
    }
}

impl SessionRecordStore for SqliteStore {
    fn load_record(&self, peer: &str) -> Result<Option<SessionRecord>, CryptoError> {
        self.conn
            .lock()
            .query_row(
                "SELECT peer_identity_key, ratchet_state FROM session_records WHERE peer = ?1",
                params![peer],
                |row| {
                    Ok(SessionRecord {
                        peer_identity_key: row.get(0)?,
                        ratchet_state: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(storage_err("load session record"))
    }

    fn store_record(&self, peer: &str, record: &SessionRecord) -> Result<(), CryptoError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO session_records (peer, peer_identity_key, ratchet_state, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![peer, record.peer_identity_key, record.ratchet_state, now_millis()],
            )
            .map_err(storage_err("store session record"))?;
        Ok(())
    }

    fn delete_record(&self, peer: &str) -> Result<(), CryptoError> {
        self.conn
            .lock()
            .execute("DELETE FROM session_records WHERE peer = ?1", params![peer])
            .map_err(storage_err("delete session record"))?;
        Ok(())
    }

    fn has_record(&self, peer: &str) -> Result<bool, CryptoError> {
        self.conn
            .lock()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM session_records WHERE peer = ?1)",
                params![peer],
                |row| row.get(0),
            )
            .map_err(storage_err("has session record"))
    }

    fn list_peers(&self) -> Result<Vec<String>, CryptoError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT peer FROM session_records ORDER BY peer")
            .map_err(storage_err("list peers"))?;
        let peers = stmt
            .query_map([], |row| row.get(0))
            .map_err(storage_err("list peers"))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(storage_err("list peers"))?;
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use khamosh_crypto::keychain::VAULT_OPKS;

    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("khamosh.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.store_key(VAULT_OPKS, "opk-1", &[1; 32]).unwrap();
            store
                .store_record(
                    "bob",
                    &SessionRecord {
                        peer_identity_key: vec![2; 32],
                        ratchet_state: Some(vec![3; 10]),
                    },
                )
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_key(VAULT_OPKS, "opk-1").unwrap(), Some(vec![1; 32]));
        let record = store.load_record("bob").unwrap().unwrap();
        assert_eq!(record.peer_identity_key, vec![2; 32]);
        assert_eq!(record.ratchet_state, Some(vec![3; 10]));
        assert_eq!(store.list_peers().unwrap(), vec!["bob"]);
    }

    #[test]
    fn take_key_is_single_use() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.store_key("v", "k", b"secret").unwrap();
        assert!(store.key_exists("v", "k").unwrap());

        assert_eq!(store.take_key("v", "k").unwrap(), Some(b"secret".to_vec()));
        assert_eq!(store.take_key("v", "k").unwrap(), None);
        assert!(!store.key_exists("v", "k").unwrap());
    }

    #[test]
    fn keys_listed_per_vault() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.store_key("a", "k2", b"x").unwrap();
        store.store_key("a", "k1", b"x").unwrap();
        store.store_key("b", "k3", b"x").unwrap();
        store.delete_key("b", "k3").unwrap();

        assert_eq!(store.list_keys("a").unwrap(), vec!["k1", "k2"]);
        assert!(store.list_keys("b").unwrap().is_empty());
    }

    #[test]
    fn records_replace_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = SessionRecord {
            peer_identity_key: vec![1; 32],
            ratchet_state: None,
        };
        store.store_record("bob", &record).unwrap();
        record.ratchet_state = Some(vec![5]);
        store.store_record("bob", &record).unwrap();

        assert_eq!(store.load_record("bob").unwrap(), Some(record));
        store.delete_record("bob").unwrap();
        assert!(!store.has_record("bob").unwrap());
        assert_eq!(store.load_record("bob").unwrap(), None);
    }
}
