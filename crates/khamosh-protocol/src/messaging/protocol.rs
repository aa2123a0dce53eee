use std::collections::HashMap;
use std::sync::Arc;

use khamosh_crypto::keys::{fingerprint, KEY_LEN};
use khamosh_crypto::{
    CryptoProvider, Keychain, LocalKeys, OneTimePreKeyStore, PreKeyBundle, RatchetSessionManager,
    SessionRecordStore,
};
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::config::ProtocolConfig;
use crate::directory::{BundleRequest, Directory, PublishedBundle};
use crate::error::ProtocolError;
use crate::sessions::{SessionState, SessionStore};
use crate::topic;
use crate::transport::Transport;

/// Which framing a message went out or came in with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Initial,
    Subsequent,
}

/// A decrypted incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub sender: String,
    pub plaintext: Vec<u8>,
    pub kind: MessageKind,
}

/// One local party's messaging endpoint.
///
/// Every operation that touches a peer's session holds that peer's async lock
/// for its whole duration, so sends and receives for one conversation never
/// interleave. Different peers proceed independently.
pub struct MessageEnvelopeProtocol<D, T> {
    pub(super) local_id: String,
    pub(super) keys: LocalKeys,
    pub(super) prekeys: OneTimePreKeyStore,
    pub(super) provider: Arc<dyn CryptoProvider>,
    pub(super) sessions: SessionStore,
    pub(super) directory: Arc<D>,
    pub(super) transport: Arc<T>,
    pub(super) config: ProtocolConfig,
    peer_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<D: Directory, T: Transport> MessageEnvelopeProtocol<D, T> {
    /// Build an endpoint for `local_id`, loading (or creating on first run)
    /// its identity and signed pre-key from `keychain`.
    pub fn new(
        config: ProtocolConfig,
        local_id: impl Into<String>,
        keychain: Arc<dyn Keychain>,
        records: Arc<dyn SessionRecordStore>,
        provider: Arc<dyn CryptoProvider>,
        directory: Arc<D>,
        transport: Arc<T>,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let local_id = local_id.into();
        let keys = LocalKeys::load_or_generate(&keychain, provider.as_ref(), config.signed_prekey_id)?;
        let prekeys = OneTimePreKeyStore::new(keychain, Arc::clone(&provider));
        let ratchets = RatchetSessionManager::new(Arc::clone(&provider), config.ratchet_limits());

        tracing::info!(
            local_id = %local_id,
            identity = %fingerprint(&keys.identity.public_key_bytes()),
            "messaging endpoint ready"
        );

        Ok(Self {
            local_id,
            keys,
            prekeys,
            provider,
            sessions: SessionStore::new(records, ratchets),
            directory,
            transport,
            config,
            peer_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn identity_public(&self) -> [u8; KEY_LEN] {
        self.keys.identity.public_key_bytes()
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Topic prefix this party should subscribe to.
    pub fn inbox(&self) -> String {
        topic::inbox_prefix(&self.config.topic_prefix, &self.local_id)
    }

    /// Generate `opk_count` one-time pre-keys and return one directory bundle
    /// per key. With a count of zero a single bundle without an OPK is returned.
    pub fn publishable_bundle(&self, opk_count: u32) -> Result<Vec<PublishedBundle>, ProtocolError> {
        let spk = &self.keys.signed_prekey;
        let base = PreKeyBundle {
            identity_key: self.identity_public(),
            spk_id: spk.id(),
            spk_public: *spk.public(),
            spk_signature: *spk.signature(),
            opk_id: 0,
            opk_public: None,
        };
        if opk_count == 0 {
            return Ok(vec![PublishedBundle::from_prekey_bundle(&base)]);
        }

        let bundles = self
            .prekeys
            .generate(opk_count)?
            .into_iter()
            .map(|opk| {
                PublishedBundle::from_prekey_bundle(&PreKeyBundle {
                    opk_id: opk.id,
                    opk_public: Some(opk.public),
                    ..base.clone()
                })
            })
            .collect();
        Ok(bundles)
    }

    /// Publish the identity, signed pre-key and a batch of one-time pre-keys.
    /// Returns how many one-time pre-keys went out.
    pub async fn register(&self) -> Result<usize, ProtocolError> {
        let bundles = self.publishable_bundle(self.config.opk_batch_size)?;
        let count = bundles.len();
        for bundle in bundles {
            self.directory.publish_bundle(&self.local_id, bundle).await?;
        }
        tracing::info!(local_id = %self.local_id, opks = count, "registered with directory");
        Ok(count)
    }

    /// Signed request for `target`'s bundle.
    pub fn bundle_request(&self, target: &str) -> Result<BundleRequest, ProtocolError> {
        BundleRequest::new(
            self.provider.as_ref(),
            &self.local_id,
            target,
            self.keys.signed_prekey.secret(),
        )
    }

    pub fn remaining_prekeys(&self) -> Result<usize, ProtocolError> {
        Ok(self.prekeys.remaining()?)
    }

    pub async fn session_state(&self, peer: &str) -> Result<SessionState, ProtocolError> {
        let _guard = self.lock_peer(peer).await;
        self.sessions.state(peer)
    }

    pub fn peer_identity_key(&self, peer: &str) -> Result<Option<[u8; KEY_LEN]>, ProtocolError> {
        self.sessions.peer_identity_key(peer)
    }

    pub async fn save_peer_identity_key(&self, peer: &str, key: &[u8]) -> Result<(), ProtocolError> {
        let _guard = self.lock_peer(peer).await;
        self.sessions.save_peer_identity_key(peer, key)
    }

    /// Forget everything about the conversation. The next message to `peer`
    /// starts with a handshake.
    pub async fn reset_session(&self, peer: &str) -> Result<(), ProtocolError> {
        let _guard = self.lock_peer(peer).await;
        self.sessions.clear(peer)?;
        tracing::info!(peer, "session reset");
        Ok(())
    }

    /// Release the in-memory ratchet. The stored record is untouched and is
    /// loaded again on the next send or receive.
    pub async fn end_conversation(&self, peer: &str) {
        let _guard = self.lock_peer(peer).await;
        self.sessions.unload(peer);
    }

    pub(super) async fn lock_peer(&self, peer: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.peer_locks
                .lock()
                .entry(peer.to_string())
                .or_default(),
        );
        lock.lock_owned().await
    }
}
