use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CryptoError;
use crate::keys::{key_array, KeyPair, KEY_LEN};
use crate::provider::CryptoProvider;
use crate::x3dh::SharedSecret;

use super::codec;
use super::header::MessageHeader;
use super::session::{EncryptedMessage, RatchetLimits, RatchetSession};

/// Live ratchet sessions, one per peer id.
///
/// Callers refer to a session by the peer's id instead of an opaque handle.
/// Sessions only live in memory here; persistence goes through
/// [`serialize`](Self::serialize) and [`deserialize`](Self::deserialize).
pub struct RatchetSessionManager {
    provider: Arc<dyn CryptoProvider>,
    limits: RatchetLimits,
    sessions: Mutex<HashMap<String, RatchetSession>>,
}

impl RatchetSessionManager {
    pub fn new(provider: Arc<dyn CryptoProvider>, limits: RatchetLimits) -> Self {
        Self {
            provider,
            limits,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> RatchetLimits {
        self.limits
    }

    /// Start a session as the initiator. Replaces any live session for `peer`.
    pub fn init_sender(
        &self,
        peer: &str,
        shared_secret: &SharedSecret,
        receiver_ratchet_public: &[u8],
    ) -> Result<(), CryptoError> {
        let receiver: [u8; KEY_LEN] = key_array("receiver ratchet key", receiver_ratchet_public)?;
        let session =
            RatchetSession::init_sender(self.provider.as_ref(), shared_secret, &receiver, self.limits)?;
        self.sessions.lock().insert(peer.to_string(), session);
        tracing::debug!(peer, "ratchet initialized as sender");
        Ok(())
    }

    /// Start a session as the responder, using the signed pre-key pair as the
    /// first ratchet key. Replaces any live session for `peer`.
    pub fn init_receiver(
        &self,
        peer: &str,
        shared_secret: &SharedSecret,
        own_ratchet_private: &[u8],
        own_ratchet_public: &[u8],
    ) -> Result<(), CryptoError> {
        let own = KeyPair::from_parts(
            key_array("own ratchet private key", own_ratchet_private)?,
            key_array("own ratchet public key", own_ratchet_public)?,
        );
        let session = RatchetSession::init_receiver(shared_secret, own, self.limits);
        self.sessions.lock().insert(peer.to_string(), session);
        tracing::debug!(peer, "ratchet initialized as receiver");
        Ok(())
    }

    pub fn encrypt(
        &self,
        peer: &str,
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<EncryptedMessage, CryptoError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(peer)
            .ok_or_else(|| CryptoError::SessionNotFound(peer.to_string()))?;
        session.encrypt(self.provider.as_ref(), plaintext, ad)
    }

    /// Decrypt with the encoded 40-byte header as it came off the wire.
    ///
    /// A malformed header is an `Authentication` failure like any other.
    pub fn decrypt(
        &self,
        peer: &str,
        header: &[u8],
        ciphertext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(peer)
            .ok_or_else(|| CryptoError::SessionNotFound(peer.to_string()))?;
        let header = MessageHeader::from_bytes(header).map_err(|_| CryptoError::Authentication)?;
        session.decrypt(self.provider.as_ref(), &header, ciphertext, ad)
    }

    pub fn serialize(&self, peer: &str) -> Result<Vec<u8>, CryptoError> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(peer)
            .ok_or_else(|| CryptoError::SessionNotFound(peer.to_string()))?;
        codec::serialize(session)
    }

    /// Restore a serialized session under `peer`, replacing any live one.
    pub fn deserialize(&self, peer: &str, data: &[u8]) -> Result<(), CryptoError> {
        let session = codec::deserialize(data, self.limits)?;
        self.sessions.lock().insert(peer.to_string(), session);
        Ok(())
    }

    /// Drop the live session. Unknown peers are ignored.
    pub fn free(&self, peer: &str) {
        if self.sessions.lock().remove(peer).is_some() {
            tracing::debug!(peer, "ratchet session freed");
        }
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.sessions.lock().contains_key(peer)
    }

    /// Whether the live session for `peer` has a sending chain.
    pub fn can_send(&self, peer: &str) -> bool {
        self.sessions
            .lock()
            .get(peer)
            .is_some_and(RatchetSession::can_send)
    }

    /// Whether the live session for `peer` was started here and nothing has
    /// been decrypted on it yet.
    pub fn awaiting_reply(&self, peer: &str) -> bool {
        self.sessions
            .lock()
            .get(peer)
            .is_some_and(RatchetSession::awaiting_reply)
    }
}
