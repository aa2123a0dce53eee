use crate::error::CryptoError;
use crate::keys::{key_array, KEY_LEN};

/// What is persisted per conversation.
///
/// Created on the first successful handshake. `ratchet_state` is the opaque
/// blob produced by `RatchetSessionManager::serialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub peer_identity_key: Vec<u8>,
    pub ratchet_state: Option<Vec<u8>>,
}

impl SessionRecord {
    /// The peer identity key, if it is a well-formed 32-byte key.
    pub fn peer_identity(&self) -> Result<[u8; KEY_LEN], CryptoError> {
        key_array("peer identity key", &self.peer_identity_key)
    }
}

/// Storage trait for per-peer session records.
///
/// Records are keyed by the peer's user id.
pub trait SessionRecordStore: Send + Sync {
    fn load_record(&self, peer: &str) -> Result<Option<SessionRecord>, CryptoError>;

    /// Insert or replace the record for a peer.
    fn store_record(&self, peer: &str, record: &SessionRecord) -> Result<(), CryptoError>;

    /// Delete a record (e.g. on session reset). Missing records are ignored.
    fn delete_record(&self, peer: &str) -> Result<(), CryptoError>;

    fn has_record(&self, peer: &str) -> Result<bool, CryptoError>;

    /// All peers with a stored record.
    fn list_peers(&self) -> Result<Vec<String>, CryptoError>;
}
