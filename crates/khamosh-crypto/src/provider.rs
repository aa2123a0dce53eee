//! Capability interface over the curve, signature and AEAD primitives.
//!
//! Everything above this module talks to a `CryptoProvider`, never to a
//! concrete library, so a platform keystore or hardware-backed implementation
//! can be swapped in without touching protocol code.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{KeyPair, KEY_LEN};
use crate::vxeddsa::{self, NONCE_LEN, SIGNATURE_LEN, VRF_OUTPUT_LEN};

/// AEAD key length (AES-256-GCM).
pub const AEAD_KEY_LEN: usize = 32;
/// AEAD nonce length (AES-256-GCM).
pub const AEAD_NONCE_LEN: usize = 12;

/// A VXEdDSA signature together with its verifiable random output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutput {
    pub signature: [u8; SIGNATURE_LEN],
    pub vrf: [u8; VRF_OUTPUT_LEN],
}

pub trait CryptoProvider: Send + Sync {
    /// Fresh X25519 key pair from the system RNG.
    fn generate_keypair(&self) -> KeyPair;

    /// Public half of an X25519 secret.
    fn public_key(&self, secret: &[u8; KEY_LEN]) -> [u8; KEY_LEN];

    /// X25519 agreement. Rejects non-contributory (low-order) public keys.
    fn dh(
        &self,
        secret: &[u8; KEY_LEN],
        public: &[u8; KEY_LEN],
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError>;

    fn sign(&self, secret: &[u8; KEY_LEN], message: &[u8]) -> Result<SignatureOutput, CryptoError>;

    fn verify(&self, public: &[u8; KEY_LEN], message: &[u8], signature: &[u8; SIGNATURE_LEN])
        -> bool;

    fn aead_seal(
        &self,
        key: &[u8; AEAD_KEY_LEN],
        nonce: &[u8; AEAD_NONCE_LEN],
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Any tag mismatch is `CryptoError::Authentication`.
    fn aead_open(
        &self,
        key: &[u8; AEAD_KEY_LEN],
        nonce: &[u8; AEAD_NONCE_LEN],
        ciphertext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

/// Default provider: x25519-dalek, VXEdDSA on curve25519-dalek, AES-256-GCM.
#[derive(Debug, Clone, Copy, Default)]
pub struct DalekProvider;

impl CryptoProvider for DalekProvider {
    fn generate_keypair(&self) -> KeyPair {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        KeyPair::from_parts(secret.to_bytes(), public.to_bytes())
    }

    fn public_key(&self, secret: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
        PublicKey::from(&StaticSecret::from(*secret)).to_bytes()
    }

    fn dh(
        &self,
        secret: &[u8; KEY_LEN],
        public: &[u8; KEY_LEN],
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        let shared = StaticSecret::from(*secret).diffie_hellman(&PublicKey::from(*public));
        if !shared.was_contributory() {
            return Err(CryptoError::InternalCrypto(
                "non-contributory Diffie-Hellman output".into(),
            ));
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }

    fn sign(&self, secret: &[u8; KEY_LEN], message: &[u8]) -> Result<SignatureOutput, CryptoError> {
        let mut z = Zeroizing::new([0u8; NONCE_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut z[..]);
        let (signature, vrf) = vxeddsa::sign(secret, message, &z)
            .ok_or_else(|| CryptoError::InternalCrypto("VXEdDSA hash-to-point failed".into()))?;
        Ok(SignatureOutput { signature, vrf })
    }

    fn verify(
        &self,
        public: &[u8; KEY_LEN],
        message: &[u8],
        signature: &[u8; SIGNATURE_LEN],
    ) -> bool {
        vxeddsa::verify(public, message, signature).is_some()
    }

    fn aead_seal(
        &self,
        key: &[u8; AEAD_KEY_LEN],
        nonce: &[u8; AEAD_NONCE_LEN],
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InternalCrypto(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad: ad })
            .map_err(|e| CryptoError::InternalCrypto(format!("AES-GCM seal: {e}")))
    }

    fn aead_open(
        &self,
        key: &[u8; AEAD_KEY_LEN],
        nonce: &[u8; AEAD_NONCE_LEN],
        ciphertext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InternalCrypto(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: ad })
            .map_err(|_| CryptoError::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_agreement() {
        let provider = DalekProvider;
        let alice = provider.generate_keypair();
        let bob = provider.generate_keypair();

        let shared_a = provider.dh(alice.secret(), bob.public()).unwrap();
        let shared_b = provider.dh(bob.secret(), alice.public()).unwrap();
        assert_eq!(*shared_a, *shared_b);
    }

    #[test]
    fn public_key_matches_generated_pair() {
        let provider = DalekProvider;
        let pair = provider.generate_keypair();
        assert_eq!(&provider.public_key(pair.secret()), pair.public());
    }

    #[test]
    fn low_order_public_key_rejected() {
        let provider = DalekProvider;
        let pair = provider.generate_keypair();
        let result = provider.dh(pair.secret(), &[0u8; 32]);
        assert!(matches!(result, Err(CryptoError::InternalCrypto(_))));
    }

    #[test]
    fn sign_verify_through_provider() {
        let provider = DalekProvider;
        let identity = provider.generate_keypair();
        let out = provider.sign(identity.secret(), b"spk").unwrap();
        assert!(provider.verify(identity.public(), b"spk", &out.signature));
        assert!(!provider.verify(identity.public(), b"spk!", &out.signature));
    }

    #[test]
    fn aead_binds_associated_data() {
        let provider = DalekProvider;
        let key = [7u8; 32];
        let nonce = [1u8; 12];
        let sealed = provider.aead_seal(&key, &nonce, b"hello", b"ad").unwrap();

        assert_eq!(provider.aead_open(&key, &nonce, &sealed, b"ad").unwrap(), b"hello");
        assert_eq!(
            provider.aead_open(&key, &nonce, &sealed, b"other ad"),
            Err(CryptoError::Authentication)
        );
    }
}
