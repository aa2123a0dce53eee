use std::sync::Arc;

use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keychain::{
    Keychain, KEY_IDENTITY_SECRET, KEY_SIGNED_PREKEY, VAULT_IDENTITY,
};
use crate::keys::{fingerprint, key_array, KeyPair, KEY_LEN};
use crate::provider::{CryptoProvider, SignatureOutput};
use crate::vxeddsa::SIGNATURE_LEN;

/// A user's long-term identity key.
///
/// An X25519 key pair that is used both for the X3DH agreement terms and,
/// through VXEdDSA, for signing the signed pre-key. Created once at
/// registration.
#[derive(Clone)]
pub struct IdentityKeyPair {
    pair: KeyPair,
}

impl IdentityKeyPair {
    pub fn generate(provider: &dyn CryptoProvider) -> Self {
        Self {
            pair: provider.generate_keypair(),
        }
    }

    /// Restore an identity from its 32-byte secret.
    pub fn from_secret_bytes(provider: &dyn CryptoProvider, secret: &[u8; KEY_LEN]) -> Self {
        let public = provider.public_key(secret);
        Self {
            pair: KeyPair::from_parts(*secret, public),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; KEY_LEN] {
        *self.pair.public()
    }

    /// # Security
    /// Handle with care, this is the private key material.
    pub fn secret_key_bytes(&self) -> &[u8; KEY_LEN] {
        self.pair.secret()
    }

    pub fn sign(
        &self,
        provider: &dyn CryptoProvider,
        message: &[u8],
    ) -> Result<SignatureOutput, CryptoError> {
        provider.sign(self.pair.secret(), message)
    }

    pub fn public_key_hex(&self) -> String {
        self.pair.public_hex()
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Encoding of a public key as it is signed and published: the raw 32-byte
/// u-coordinate.
pub fn encode_public_key(public: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    *public
}

/// Medium-lived pre-key whose public half is signed by the identity key.
#[derive(Clone)]
pub struct SignedPreKey {
    id: u32,
    pair: KeyPair,
    signature: [u8; SIGNATURE_LEN],
}

impl SignedPreKey {
    pub fn generate(
        provider: &dyn CryptoProvider,
        identity: &IdentityKeyPair,
        id: u32,
    ) -> Result<Self, CryptoError> {
        let pair = provider.generate_keypair();
        let signed = identity.sign(provider, &encode_public_key(pair.public()))?;
        Ok(Self {
            id,
            pair,
            signature: signed.signature,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public(&self) -> &[u8; KEY_LEN] {
        self.pair.public()
    }

    /// # Security
    /// Raw private key material.
    pub fn secret(&self) -> &[u8; KEY_LEN] {
        self.pair.secret()
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    /// id(4 LE) | secret(32) | signature(96), as kept in the keychain.
    fn to_stored(&self) -> Zeroizing<Vec<u8>> {
        let mut data = Zeroizing::new(Vec::with_capacity(4 + KEY_LEN + SIGNATURE_LEN));
        data.extend_from_slice(&self.id.to_le_bytes());
        data.extend_from_slice(self.pair.secret());
        data.extend_from_slice(&self.signature);
        data
    }

    fn from_stored(provider: &dyn CryptoProvider, data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() != 4 + KEY_LEN + SIGNATURE_LEN {
            return Err(CryptoError::Storage(format!(
                "stored signed pre-key has {} bytes",
                data.len()
            )));
        }
        let id = u32::from_le_bytes(key_array("signed pre-key id", &data[..4])?);
        let secret: [u8; KEY_LEN] = key_array("signed pre-key", &data[4..4 + KEY_LEN])?;
        let signature = key_array("signed pre-key signature", &data[4 + KEY_LEN..])?;
        let public = provider.public_key(&secret);
        Ok(Self {
            id,
            pair: KeyPair::from_parts(secret, public),
            signature,
        })
    }
}

impl std::fmt::Debug for SignedPreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPreKey")
            .field("id", &self.id)
            .field("public", &self.pair.public_hex())
            .finish_non_exhaustive()
    }
}

/// The local party's identity and current signed pre-key.
#[derive(Debug, Clone)]
pub struct LocalKeys {
    pub identity: IdentityKeyPair,
    pub signed_prekey: SignedPreKey,
}

impl LocalKeys {
    pub fn generate(provider: &dyn CryptoProvider, signed_prekey_id: u32) -> Result<Self, CryptoError> {
        let identity = IdentityKeyPair::generate(provider);
        let signed_prekey = SignedPreKey::generate(provider, &identity, signed_prekey_id)?;
        Ok(Self {
            identity,
            signed_prekey,
        })
    }

    /// Load the identity and signed pre-key from the keychain, creating and
    /// persisting both on first run.
    pub fn load_or_generate(
        keychain: &Arc<dyn Keychain>,
        provider: &dyn CryptoProvider,
        signed_prekey_id: u32,
    ) -> Result<Self, CryptoError> {
        let stored_identity = keychain.load_key(VAULT_IDENTITY, KEY_IDENTITY_SECRET)?;
        let stored_spk = keychain.load_key(VAULT_IDENTITY, KEY_SIGNED_PREKEY)?;

        if let (Some(identity_secret), Some(spk)) = (stored_identity, stored_spk) {
            let secret = Zeroizing::new(key_array::<KEY_LEN>("identity key", &identity_secret)?);
            let identity = IdentityKeyPair::from_secret_bytes(provider, &secret);
            let signed_prekey = SignedPreKey::from_stored(provider, &spk)?;
            tracing::debug!(
                identity = %fingerprint(&identity.public_key_bytes()),
                spk_id = signed_prekey.id(),
                "loaded local keys"
            );
            return Ok(Self {
                identity,
                signed_prekey,
            });
        }

        let keys = Self::generate(provider, signed_prekey_id)?;
        keychain.store_key(
            VAULT_IDENTITY,
            KEY_IDENTITY_SECRET,
            keys.identity.secret_key_bytes(),
        )?;
        keychain.store_key(VAULT_IDENTITY, KEY_SIGNED_PREKEY, &keys.signed_prekey.to_stored())?;
        tracing::info!(
            identity = %fingerprint(&keys.identity.public_key_bytes()),
            spk_id = signed_prekey_id,
            "generated local keys"
        );
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_stores::MemoryKeychain;
    use crate::provider::DalekProvider;

    #[test]
    fn signed_prekey_signature_verifies_under_identity() {
        let provider = DalekProvider;
        let keys = LocalKeys::generate(&provider, 1).unwrap();
        assert!(provider.verify(
            &keys.identity.public_key_bytes(),
            &encode_public_key(keys.signed_prekey.public()),
            keys.signed_prekey.signature(),
        ));
    }

    #[test]
    fn roundtrip_secret_bytes() {
        let provider = DalekProvider;
        let identity = IdentityKeyPair::generate(&provider);
        let restored = IdentityKeyPair::from_secret_bytes(&provider, identity.secret_key_bytes());
        assert_eq!(identity.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn load_or_generate_is_stable() {
        let provider = DalekProvider;
        let keychain: Arc<dyn Keychain> = Arc::new(MemoryKeychain::new());

        let first = LocalKeys::load_or_generate(&keychain, &provider, 3).unwrap();
        let second = LocalKeys::load_or_generate(&keychain, &provider, 99).unwrap();

        assert_eq!(first.identity.public_key_bytes(), second.identity.public_key_bytes());
        assert_eq!(second.signed_prekey.id(), 3);
        assert_eq!(first.signed_prekey.public(), second.signed_prekey.public());
        assert_eq!(first.signed_prekey.signature(), second.signed_prekey.signature());
    }
}
