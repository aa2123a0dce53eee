//! One-time pre-key generation and single-use consumption.
//!
//! Secrets live in the keychain under `opks/opk-<id>`. Ids come from a
//! persisted counter and are never handed out twice, even after the key
//! with that id has been consumed.

use std::sync::Arc;

use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keychain::{
    opk_key_name, parse_opk_key_name, Keychain, KEY_NEXT_OPK_ID, VAULT_OPKS, VAULT_OPK_META,
};
use crate::keys::{key_array, KEY_LEN};
use crate::provider::CryptoProvider;

const FIRST_OPK_ID: u32 = 1;

/// Public half of a freshly generated one-time pre-key, ready to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneTimePreKeyPublic {
    pub id: u32,
    pub public: [u8; KEY_LEN],
}

pub struct OneTimePreKeyStore {
    keychain: Arc<dyn Keychain>,
    provider: Arc<dyn CryptoProvider>,
    /// Serializes id allocation.
    issue: Mutex<()>,
}

impl OneTimePreKeyStore {
    pub fn new(keychain: Arc<dyn Keychain>, provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            keychain,
            provider,
            issue: Mutex::new(()),
        }
    }

    /// Create `count` key pairs, persist their secrets and return the public halves.
    pub fn generate(&self, count: u32) -> Result<Vec<OneTimePreKeyPublic>, CryptoError> {
        let _guard = self.issue.lock();

        let first = self.next_id()?;
        let next = first
            .checked_add(count)
            .ok_or_else(|| CryptoError::Storage("one-time pre-key ids exhausted".into()))?;
        // Counter first: ids of a partially written batch stay burned.
        self.keychain
            .store_key(VAULT_OPK_META, KEY_NEXT_OPK_ID, &next.to_le_bytes())?;

        let mut published = Vec::with_capacity(count as usize);
        for id in first..next {
            let pair = self.provider.generate_keypair();
            self.keychain
                .store_key(VAULT_OPKS, &opk_key_name(id), pair.secret())?;
            published.push(OneTimePreKeyPublic {
                id,
                public: *pair.public(),
            });
        }

        tracing::debug!(first, count, "generated one-time pre-keys");
        Ok(published)
    }

    /// Read and delete the secret for `id` in one step.
    pub fn consume(&self, id: u32) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        let stored = self
            .keychain
            .take_key(VAULT_OPKS, &opk_key_name(id))?
            .map(Zeroizing::new)
            .ok_or(CryptoError::NotFound(id))?;
        let secret = key_array::<KEY_LEN>("one-time pre-key", &stored)?;
        tracing::debug!(opk_id = id, "consumed one-time pre-key");
        Ok(Zeroizing::new(secret))
    }

    /// Number of unconsumed one-time pre-keys.
    pub fn remaining(&self) -> Result<usize, CryptoError> {
        Ok(self
            .keychain
            .list_keys(VAULT_OPKS)?
            .iter()
            .filter(|name| parse_opk_key_name(name).is_some())
            .count())
    }

    fn next_id(&self) -> Result<u32, CryptoError> {
        match self.keychain.load_key(VAULT_OPK_META, KEY_NEXT_OPK_ID)? {
            Some(bytes) => Ok(u32::from_le_bytes(key_array("opk id counter", &bytes)?)),
            None => Ok(FIRST_OPK_ID),
        }
    }
}
