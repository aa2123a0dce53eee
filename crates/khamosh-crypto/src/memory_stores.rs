//! In-memory implementations of the storage traits.
//!
//! Suitable for tests and the loopback binary. Data is lost on process exit;
//! `khamosh-protocol` ships SQLite-backed versions for anything longer lived.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::error::CryptoError;
use crate::keychain::Keychain;
use crate::store::{SessionRecord, SessionRecordStore};

/// In-memory keychain. Vaults are kept sorted so `list_keys` is stable.
#[derive(Default)]
pub struct MemoryKeychain {
    vaults: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keychain for MemoryKeychain {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        self.vaults
            .lock()
            .entry(vault.to_string())
            .or_default()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self
            .vaults
            .lock()
            .get(vault)
            .and_then(|entries| entries.get(key).cloned()))
    }

    fn take_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self
            .vaults
            .lock()
            .get_mut(vault)
            .and_then(|entries| entries.remove(key)))
    }

    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError> {
        if let Some(entries) = self.vaults.lock().get_mut(vault) {
            entries.remove(key);
        }
        Ok(())
    }

    fn key_exists(&self, vault: &str, key: &str) -> Result<bool, CryptoError> {
        Ok(self
            .vaults
            .lock()
            .get(vault)
            .is_some_and(|entries| entries.contains_key(key)))
    }

    fn list_keys(&self, vault: &str) -> Result<Vec<String>, CryptoError> {
        Ok(self
            .vaults
            .lock()
            .get(vault)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory session record store.
#[derive(Default)]
pub struct MemorySessionRecordStore {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRecordStore for MemorySessionRecordStore {
    fn load_record(&self, peer: &str) -> Result<Option<SessionRecord>, CryptoError> {
        Ok(self.records.lock().get(peer).cloned())
    }

    fn store_record(&self, peer: &str, record: &SessionRecord) -> Result<(), CryptoError> {
        self.records.lock().insert(peer.to_string(), record.clone());
        Ok(())
    }

    fn delete_record(&self, peer: &str) -> Result<(), CryptoError> {
        self.records.lock().remove(peer);
        Ok(())
    }

    fn has_record(&self, peer: &str) -> Result<bool, CryptoError> {
        Ok(self.records.lock().contains_key(peer))
    }

    fn list_peers(&self) -> Result<Vec<String>, CryptoError> {
        let mut peers: Vec<String> = self.records.lock().keys().cloned().collect();
        peers.sort();
        Ok(peers)
    }
}
