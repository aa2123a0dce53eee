//! Key directory seam: publishing bundles and fetching a peer's bundle.
//!
//! Fetches are authenticated. The requester signs the target's id with its
//! signed pre-key (VXEdDSA), and the directory checks the signature against
//! the pre-key the requester itself published.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use khamosh_crypto::vxeddsa::{SIGNATURE_LEN, VRF_OUTPUT_LEN};
use khamosh_crypto::{CryptoError, CryptoProvider, PreKeyBundle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::serde_b64;

/// Version of the directory JSON form.
pub const BUNDLE_VERSION: u8 = 1;

/// A one-time pre-key as published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedOpk {
    pub id: u32,
    #[serde(with = "serde_b64")]
    pub key: [u8; 32],
}

/// Directory JSON form of a pre-key bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedBundle {
    pub version: u8,
    #[serde(with = "serde_b64")]
    pub identity_key: [u8; 32],
    #[serde(with = "serde_b64")]
    pub signed_pre_key: [u8; 32],
    pub spk_id: u32,
    #[serde(with = "serde_b64")]
    pub signature: [u8; SIGNATURE_LEN],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opk: Option<PublishedOpk>,
}

impl PublishedBundle {
    pub fn from_prekey_bundle(bundle: &PreKeyBundle) -> Self {
        Self {
            version: BUNDLE_VERSION,
            identity_key: bundle.identity_key,
            signed_pre_key: bundle.spk_public,
            spk_id: bundle.spk_id,
            signature: bundle.spk_signature,
            opk: bundle.opk().map(|(id, key)| PublishedOpk { id, key: *key }),
        }
    }

    pub fn to_prekey_bundle(&self) -> Result<PreKeyBundle, ProtocolError> {
        if self.version != BUNDLE_VERSION {
            return Err(CryptoError::Format(format!(
                "unsupported bundle version {}",
                self.version
            ))
            .into());
        }
        Ok(PreKeyBundle {
            identity_key: self.identity_key,
            spk_id: self.spk_id,
            spk_public: self.signed_pre_key,
            spk_signature: self.signature,
            opk_id: self.opk.map_or(0, |opk| opk.id),
            opk_public: self.opk.map(|opk| opk.key),
        })
    }

    fn without_opk(&self) -> Self {
        Self {
            opk: None,
            ..self.clone()
        }
    }
}

/// Authenticated request for someone's bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    pub requester: String,
    pub target: String,
    /// VXEdDSA signature over the target id, by the requester's signed pre-key.
    #[serde(with = "serde_b64")]
    pub signature: [u8; SIGNATURE_LEN],
    #[serde(with = "serde_b64")]
    pub vrf: [u8; VRF_OUTPUT_LEN],
}

impl BundleRequest {
    pub fn new(
        provider: &dyn CryptoProvider,
        requester: &str,
        target: &str,
        spk_secret: &[u8; 32],
    ) -> Result<Self, ProtocolError> {
        let signed = provider.sign(spk_secret, target.as_bytes())?;
        Ok(Self {
            requester: requester.to_string(),
            target: target.to_string(),
            signature: signed.signature,
            vrf: signed.vrf,
        })
    }

    pub fn verify(&self, provider: &dyn CryptoProvider, requester_spk: &[u8; 32]) -> bool {
        provider.verify(requester_spk, self.target.as_bytes(), &self.signature)
    }
}

pub trait Directory: Send + Sync {
    /// Fetch the target's bundle. Each fetch hands out a different one-time
    /// pre-key while any remain.
    fn fetch_bundle(
        &self,
        request: &BundleRequest,
    ) -> impl Future<Output = Result<PublishedBundle, ProtocolError>> + Send;

    /// Publish a bundle for `owner`. Bundles carrying an OPK add it to the
    /// owner's pool; the identity and signed pre-key replace the previous ones.
    fn publish_bundle(
        &self,
        owner: &str,
        bundle: PublishedBundle,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

struct DirectoryEntry {
    base: PublishedBundle,
    opks: VecDeque<PublishedOpk>,
}

/// In-memory directory for tests and the loopback binary.
pub struct MemoryDirectory {
    provider: Arc<dyn CryptoProvider>,
    entries: Mutex<HashMap<String, DirectoryEntry>>,
}

impl MemoryDirectory {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// One-time pre-keys still available for `owner`.
    pub fn remaining_opks(&self, owner: &str) -> usize {
        self.entries
            .lock()
            .get(owner)
            .map_or(0, |entry| entry.opks.len())
    }

    fn fetch(&self, request: &BundleRequest) -> Result<PublishedBundle, ProtocolError> {
        let mut entries = self.entries.lock();

        let requester_spk = entries
            .get(&request.requester)
            .map(|entry| entry.base.signed_pre_key)
            .ok_or_else(|| {
                ProtocolError::Directory(format!("unknown requester {}", request.requester))
            })?;
        if !request.verify(self.provider.as_ref(), &requester_spk) {
            tracing::warn!(requester = %request.requester, "bundle request signature rejected");
            return Err(ProtocolError::Directory("bundle request not authenticated".into()));
        }

        let entry = entries
            .get_mut(&request.target)
            .ok_or_else(|| ProtocolError::Directory(format!("no bundle for {}", request.target)))?;
        let mut bundle = entry.base.clone();
        bundle.opk = entry.opks.pop_front();
        tracing::debug!(
            target_id = %request.target,
            opk_id = ?bundle.opk.map(|opk| opk.id),
            "bundle handed out"
        );
        Ok(bundle)
    }

    fn publish(&self, owner: &str, bundle: PublishedBundle) -> Result<(), ProtocolError> {
        if bundle.version != BUNDLE_VERSION {
            return Err(ProtocolError::Directory(format!(
                "unsupported bundle version {}",
                bundle.version
            )));
        }
        let mut entries = self.entries.lock();
        let base = bundle.without_opk();
        let entry = entries
            .entry(owner.to_string())
            .or_insert_with(|| DirectoryEntry {
                base: base.clone(),
                opks: VecDeque::new(),
            });
        if entry.base.identity_key != base.identity_key || entry.base.spk_id != base.spk_id {
            entry.opks.clear();
        }
        entry.base = base;
        if let Some(opk) = bundle.opk {
            entry.opks.push_back(opk);
        }
        Ok(())
    }
}

impl Directory for MemoryDirectory {
    fn fetch_bundle(
        &self,
        request: &BundleRequest,
    ) -> impl Future<Output = Result<PublishedBundle, ProtocolError>> + Send {
        std::future::ready(self.fetch(request))
    }

    fn publish_bundle(
        &self,
        owner: &str,
        bundle: PublishedBundle,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send {
        std::future::ready(self.publish(owner, bundle))
    }
}

#[cfg(test)]
mod tests {
    use khamosh_crypto::{DalekProvider, LocalKeys};

    use super::*;

    fn published(keys: &LocalKeys, opk: Option<PublishedOpk>) -> PublishedBundle {
        PublishedBundle {
            version: BUNDLE_VERSION,
            identity_key: keys.identity.public_key_bytes(),
            signed_pre_key: *keys.signed_prekey.public(),
            spk_id: keys.signed_prekey.id(),
            signature: *keys.signed_prekey.signature(),
            opk,
        }
    }

    #[test]
    fn json_shape() {
        let keys = LocalKeys::generate(&DalekProvider, 7).unwrap();
        let bundle = published(&keys, Some(PublishedOpk { id: 3, key: [1; 32] }));
        let json: serde_json::Value = serde_json::to_value(&bundle).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["spkId"], 7);
        assert_eq!(json["opk"]["id"], 3);
        assert!(json["identityKey"].is_string());
        assert!(json["signedPreKey"].is_string());

        let without = published(&keys, None);
        let json = serde_json::to_string(&without).unwrap();
        assert!(!json.contains("opk"));
        assert_eq!(serde_json::from_str::<PublishedBundle>(&json).unwrap(), without);
    }

    #[test]
    fn version_checked_on_conversion() {
        let keys = LocalKeys::generate(&DalekProvider, 1).unwrap();
        let mut bundle = published(&keys, None);
        assert!(!bundle.to_prekey_bundle().unwrap().has_opk());

        bundle.version = 2;
        assert!(matches!(
            bundle.to_prekey_bundle(),
            Err(ProtocolError::Crypto(CryptoError::Format(_)))
        ));
    }

    #[tokio::test]
    async fn fetch_requires_valid_request_and_pops_opks() {
        let provider: Arc<dyn CryptoProvider> = Arc::new(DalekProvider);
        let directory = MemoryDirectory::new(Arc::clone(&provider));
        let alice = LocalKeys::generate(provider.as_ref(), 1).unwrap();
        let bob = LocalKeys::generate(provider.as_ref(), 1).unwrap();

        directory.publish_bundle("alice", published(&alice, None)).await.unwrap();
        for id in [10, 11] {
            directory
                .publish_bundle("bob", published(&bob, Some(PublishedOpk { id, key: [id as u8; 32] })))
                .await
                .unwrap();
        }
        assert_eq!(directory.remaining_opks("bob"), 2);

        let request =
            BundleRequest::new(provider.as_ref(), "alice", "bob", alice.signed_prekey.secret())
                .unwrap();
        let first = directory.fetch_bundle(&request).await.unwrap();
        let second = directory.fetch_bundle(&request).await.unwrap();
        let third = directory.fetch_bundle(&request).await.unwrap();
        assert_eq!(first.opk.map(|o| o.id), Some(10));
        assert_eq!(second.opk.map(|o| o.id), Some(11));
        assert_eq!(third.opk, None);

        // Signed by the wrong key.
        let forged =
            BundleRequest::new(provider.as_ref(), "alice", "bob", bob.signed_prekey.secret())
                .unwrap();
        assert!(matches!(
            directory.fetch_bundle(&forged).await,
            Err(ProtocolError::Directory(_))
        ));

        // Signature over a different target.
        let mut retargeted = request.clone();
        retargeted.target = "carol".into();
        assert!(matches!(
            directory.fetch_bundle(&retargeted).await,
            Err(ProtocolError::Directory(_))
        ));
    }
}
