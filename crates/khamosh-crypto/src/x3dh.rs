//! X3DH key agreement.
//!
//! The initiator combines its identity key and a fresh ephemeral key with the
//! responder's identity, signed pre-key and (optionally) one-time pre-key. The
//! responder recomputes the same DH terms in the same order from the
//! initiator's identity and ephemeral public keys.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::bundle::PreKeyBundle;
use crate::error::CryptoError;
use crate::identity::encode_public_key;
use crate::keys::{key_array, KEY_LEN};
use crate::provider::CryptoProvider;

const X3DH_INFO: &[u8] = b"KhamoshChat_X3DH";

/// The 32-byte secret both parties derive. Wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_LEN]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

#[derive(Debug, Clone)]
pub struct X3dhResult {
    pub shared_secret: SharedSecret,
    /// Sent to the responder in the initial message.
    pub ephemeral_public: [u8; KEY_LEN],
}

/// Run the initiator side against a fetched bundle.
///
/// Fails with `SignatureVerification` before any key material is generated if
/// the signed pre-key is not signed by the bundle's identity key.
pub fn initiator(
    provider: &dyn CryptoProvider,
    identity_private: &[u8],
    bundle: &PreKeyBundle,
) -> Result<X3dhResult, CryptoError> {
    let identity_private = Zeroizing::new(key_array::<KEY_LEN>("identity key", identity_private)?);

    if !provider.verify(
        &bundle.identity_key,
        &encode_public_key(&bundle.spk_public),
        &bundle.spk_signature,
    ) {
        tracing::warn!(spk_id = bundle.spk_id, "signed pre-key signature rejected");
        return Err(CryptoError::SignatureVerification);
    }

    let ephemeral = provider.generate_keypair();

    let mut terms = Zeroizing::new(Vec::with_capacity(4 * KEY_LEN));
    terms.extend_from_slice(&*provider.dh(&identity_private, &bundle.spk_public)?);
    terms.extend_from_slice(&*provider.dh(ephemeral.secret(), &bundle.identity_key)?);
    terms.extend_from_slice(&*provider.dh(ephemeral.secret(), &bundle.spk_public)?);
    if let Some((_, opk_public)) = bundle.opk() {
        terms.extend_from_slice(&*provider.dh(ephemeral.secret(), opk_public)?);
    }

    tracing::debug!(
        spk_id = bundle.spk_id,
        opk_id = ?bundle.opk().map(|(id, _)| id),
        "X3DH initiator agreement complete"
    );

    Ok(X3dhResult {
        shared_secret: derive(&terms)?,
        ephemeral_public: *ephemeral.public(),
    })
}

/// Run the responder side when an initial message arrives.
///
/// `opk_private` must be given exactly when the initiator announced a
/// one-time pre-key, otherwise the secrets will not match.
pub fn responder(
    provider: &dyn CryptoProvider,
    identity_private: &[u8],
    spk_private: &[u8],
    opk_private: Option<&[u8]>,
    peer_identity_public: &[u8],
    peer_ephemeral_public: &[u8],
) -> Result<SharedSecret, CryptoError> {
    let identity_private = Zeroizing::new(key_array::<KEY_LEN>("identity key", identity_private)?);
    let spk_private = Zeroizing::new(key_array::<KEY_LEN>("signed pre-key", spk_private)?);
    let opk_private = opk_private
        .map(|opk| key_array::<KEY_LEN>("one-time pre-key", opk).map(Zeroizing::new))
        .transpose()?;
    let peer_identity: [u8; KEY_LEN] = key_array("peer identity key", peer_identity_public)?;
    let peer_ephemeral: [u8; KEY_LEN] = key_array("peer ephemeral key", peer_ephemeral_public)?;

    let mut terms = Zeroizing::new(Vec::with_capacity(4 * KEY_LEN));
    terms.extend_from_slice(&*provider.dh(&spk_private, &peer_identity)?);
    terms.extend_from_slice(&*provider.dh(&identity_private, &peer_ephemeral)?);
    terms.extend_from_slice(&*provider.dh(&spk_private, &peer_ephemeral)?);
    if let Some(opk_private) = &opk_private {
        terms.extend_from_slice(&*provider.dh(opk_private, &peer_ephemeral)?);
    }

    tracing::debug!(with_opk = opk_private.is_some(), "X3DH responder agreement complete");
    derive(&terms)
}

/// HKDF-SHA256 over `0xFF * 32 || DH1 || DH2 || DH3 [|| DH4]` with a zero salt.
fn derive(terms: &[u8]) -> Result<SharedSecret, CryptoError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(KEY_LEN + terms.len()));
    ikm.extend_from_slice(&[0xFF; KEY_LEN]);
    ikm.extend_from_slice(terms);

    let hk = Hkdf::<Sha256>::new(Some(&[0u8; KEY_LEN][..]), &ikm);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(X3DH_INFO, &mut okm)
        .map_err(|e| CryptoError::InternalCrypto(format!("X3DH HKDF expand: {e}")))?;
    Ok(SharedSecret(okm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityKeyPair, SignedPreKey};
    use crate::provider::DalekProvider;

    struct Bob {
        identity: IdentityKeyPair,
        spk: SignedPreKey,
        opk_secret: [u8; 32],
        opk_public: [u8; 32],
    }

    fn bob(provider: &DalekProvider) -> Bob {
        let identity = IdentityKeyPair::from_secret_bytes(provider, &[0x01; 32]);
        let spk = SignedPreKey::generate(provider, &identity, 1).unwrap();
        Bob {
            identity,
            spk,
            opk_secret: [0x03; 32],
            opk_public: provider.public_key(&[0x03; 32]),
        }
    }

    fn bundle_for(bob: &Bob, with_opk: bool) -> PreKeyBundle {
        PreKeyBundle {
            identity_key: bob.identity.public_key_bytes(),
            spk_id: bob.spk.id(),
            spk_public: *bob.spk.public(),
            spk_signature: *bob.spk.signature(),
            opk_id: if with_opk { 5 } else { 0 },
            opk_public: with_opk.then_some(bob.opk_public),
        }
    }

    #[test]
    fn initiator_and_responder_agree() {
        let provider = DalekProvider;
        let bob = bob(&provider);
        let alice = IdentityKeyPair::from_secret_bytes(&provider, &[0x04; 32]);

        for with_opk in [true, false] {
            let result =
                initiator(&provider, alice.secret_key_bytes(), &bundle_for(&bob, with_opk))
                    .unwrap();
            assert_eq!(result.shared_secret.as_bytes().len(), 32);
            assert_eq!(result.ephemeral_public.len(), 32);

            let responder_secret = responder(
                &provider,
                bob.identity.secret_key_bytes(),
                bob.spk.secret(),
                with_opk.then_some(&bob.opk_secret[..]),
                &alice.public_key_bytes(),
                &result.ephemeral_public,
            )
            .unwrap();
            assert_eq!(result.shared_secret, responder_secret);
        }
    }

    #[test]
    fn missing_opk_on_responder_side_diverges() {
        let provider = DalekProvider;
        let bob = bob(&provider);
        let alice = IdentityKeyPair::generate(&provider);

        let result = initiator(&provider, alice.secret_key_bytes(), &bundle_for(&bob, true)).unwrap();
        let responder_secret = responder(
            &provider,
            bob.identity.secret_key_bytes(),
            bob.spk.secret(),
            None,
            &alice.public_key_bytes(),
            &result.ephemeral_public,
        )
        .unwrap();
        assert_ne!(result.shared_secret, responder_secret);
    }

    #[test]
    fn bad_signature_rejected() {
        let provider = DalekProvider;
        let bob = bob(&provider);
        let alice = IdentityKeyPair::generate(&provider);

        let mut bundle = bundle_for(&bob, true);
        bundle.spk_signature[40] ^= 0x01;
        assert_eq!(
            initiator(&provider, alice.secret_key_bytes(), &bundle).unwrap_err(),
            CryptoError::SignatureVerification
        );

        // A signature by someone else's identity does not verify either.
        let mut bundle = bundle_for(&bob, false);
        bundle.identity_key = alice.public_key_bytes();
        assert_eq!(
            initiator(&provider, alice.secret_key_bytes(), &bundle).unwrap_err(),
            CryptoError::SignatureVerification
        );
    }

    #[test]
    fn wrong_key_lengths_rejected() {
        let provider = DalekProvider;
        let bob = bob(&provider);

        let err = initiator(&provider, &[0x04; 33], &bundle_for(&bob, false)).unwrap_err();
        assert!(matches!(err, CryptoError::InputLength { actual: 33, .. }));

        let err = responder(
            &provider,
            bob.identity.secret_key_bytes(),
            bob.spk.secret(),
            None,
            &[0x05; 33],
            &[0x06; 32],
        )
        .unwrap_err();
        assert!(matches!(err, CryptoError::InputLength { what: "peer identity key", .. }));
    }

    #[test]
    fn low_order_peer_key_is_internal_error() {
        let provider = DalekProvider;
        let bob = bob(&provider);

        let err = responder(
            &provider,
            bob.identity.secret_key_bytes(),
            bob.spk.secret(),
            None,
            &[0u8; 32],
            &[0u8; 32],
        )
        .unwrap_err();
        assert!(matches!(err, CryptoError::InternalCrypto(_)));
    }
}
