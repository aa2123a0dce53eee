//! Per-peer session records plus the live ratchets built from them.
//!
//! The record store is the source of truth. A live ratchet is a cache that can
//! be dropped at any time and is rebuilt from the stored blob on next use.

use std::sync::Arc;

use khamosh_crypto::keys::KEY_LEN;
use khamosh_crypto::{RatchetSessionManager, SessionRecord, SessionRecordStore};

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Established,
    /// A record exists but its identity key or ratchet state cannot be used.
    /// The next outgoing message starts over with a handshake.
    Broken,
}

pub struct SessionStore {
    records: Arc<dyn SessionRecordStore>,
    ratchets: RatchetSessionManager,
}

impl SessionStore {
    pub fn new(records: Arc<dyn SessionRecordStore>, ratchets: RatchetSessionManager) -> Self {
        Self { records, ratchets }
    }

    pub fn ratchets(&self) -> &RatchetSessionManager {
        &self.ratchets
    }

    pub fn state(&self, peer: &str) -> Result<SessionState, ProtocolError> {
        let Some(record) = self.records.load_record(peer)? else {
            return Ok(SessionState::NoSession);
        };
        if record.peer_identity().is_err() {
            return Ok(SessionState::Broken);
        }
        if self.ratchets.contains(peer) {
            return Ok(SessionState::Established);
        }
        match &record.ratchet_state {
            Some(blob) if self.ratchets.deserialize(peer, blob).is_ok() => {
                Ok(SessionState::Established)
            }
            _ => Ok(SessionState::Broken),
        }
    }

    pub fn peer_identity_key(&self, peer: &str) -> Result<Option<[u8; KEY_LEN]>, ProtocolError> {
        Ok(self
            .records
            .load_record(peer)?
            .and_then(|record| record.peer_identity().ok()))
    }

    /// Record `key` as the peer's identity, keeping any ratchet state.
    pub fn save_peer_identity_key(&self, peer: &str, key: &[u8]) -> Result<(), ProtocolError> {
        let ratchet_state = self
            .records
            .load_record(peer)?
            .and_then(|record| record.ratchet_state);
        self.records.store_record(
            peer,
            &SessionRecord {
                peer_identity_key: key.to_vec(),
                ratchet_state,
            },
        )?;
        Ok(())
    }

    /// Make sure a live ratchet exists, restoring it from the record if needed.
    pub fn ensure_loaded(&self, peer: &str) -> Result<(), ProtocolError> {
        if self.ratchets.contains(peer) {
            return Ok(());
        }
        let blob = self
            .records
            .load_record(peer)?
            .and_then(|record| record.ratchet_state)
            .ok_or_else(|| ProtocolError::NoSession(peer.to_string()))?;
        self.ratchets.deserialize(peer, &blob)?;
        tracing::debug!(peer, "ratchet restored from record");
        Ok(())
    }

    /// Write the live ratchet and the peer's identity key to the record store.
    pub fn persist(&self, peer: &str, peer_identity_key: &[u8]) -> Result<(), ProtocolError> {
        let blob = self.ratchets.serialize(peer)?;
        self.records.store_record(
            peer,
            &SessionRecord {
                peer_identity_key: peer_identity_key.to_vec(),
                ratchet_state: Some(blob),
            },
        )?;
        Ok(())
    }

    /// Whether our own handshake with `peer` is still unanswered. A record
    /// that cannot be restored counts as not waiting.
    pub fn awaiting_reply(&self, peer: &str) -> bool {
        if self.ensure_loaded(peer).is_err() {
            return false;
        }
        self.ratchets.awaiting_reply(peer)
    }

    /// Drop the live ratchet only. The record stays.
    pub fn unload(&self, peer: &str) {
        self.ratchets.free(peer);
    }

    /// Forget the session entirely.
    pub fn clear(&self, peer: &str) -> Result<(), ProtocolError> {
        self.ratchets.free(peer);
        self.records.delete_record(peer)?;
        Ok(())
    }

    pub fn peers(&self) -> Result<Vec<String>, ProtocolError> {
        Ok(self.records.list_peers()?)
    }
}
