//! Root and chain key derivations.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::keys::KEY_LEN;
use crate::provider::{AEAD_KEY_LEN, AEAD_NONCE_LEN};

const ROOT_INFO: &[u8] = b"KhamoshChat_Ratchet";
const MESSAGE_KEY_INFO: &[u8] = b"KhamoshChat_MessageKey";
const CHAIN_KEY_INFO: &[u8] = b"KhamoshChat_ChainKey";
const MESSAGE_KEYS_INFO: &[u8] = b"KhamoshChat_MessageKeys";

/// AEAD key and nonce expanded from a single message key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct MessageKeys {
    pub key: [u8; AEAD_KEY_LEN],
    pub nonce: [u8; AEAD_NONCE_LEN],
}

fn expand_err(e: hkdf::InvalidLength) -> CryptoError {
    CryptoError::InternalCrypto(format!("ratchet HKDF expand: {e}"))
}

/// `KDF_RK(rk, dh) -> (rk', ck)`.
pub(crate) fn kdf_rk(
    root_key: &[u8; KEY_LEN],
    dh_out: &[u8; KEY_LEN],
) -> Result<([u8; KEY_LEN], [u8; KEY_LEN]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(&root_key[..]), dh_out);
    let mut okm = [0u8; 2 * KEY_LEN];
    hk.expand(ROOT_INFO, &mut okm).map_err(expand_err)?;

    let mut next_root = [0u8; KEY_LEN];
    let mut chain_key = [0u8; KEY_LEN];
    next_root.copy_from_slice(&okm[..KEY_LEN]);
    chain_key.copy_from_slice(&okm[KEY_LEN..]);
    okm.zeroize();
    Ok((next_root, chain_key))
}

/// `KDF_CK(ck) -> (ck', mk)`. One-way: `ck` cannot be recovered from either output.
pub(crate) fn kdf_ck(
    chain_key: &[u8; KEY_LEN],
) -> Result<([u8; KEY_LEN], [u8; KEY_LEN]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, chain_key);
    let mut message_key = [0u8; KEY_LEN];
    let mut next_chain = [0u8; KEY_LEN];
    hk.expand(MESSAGE_KEY_INFO, &mut message_key)
        .map_err(expand_err)?;
    hk.expand(CHAIN_KEY_INFO, &mut next_chain)
        .map_err(expand_err)?;
    Ok((next_chain, message_key))
}

pub(crate) fn message_keys(message_key: &[u8; KEY_LEN]) -> Result<MessageKeys, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, message_key);
    let mut okm = [0u8; AEAD_KEY_LEN + AEAD_NONCE_LEN];
    hk.expand(MESSAGE_KEYS_INFO, &mut okm).map_err(expand_err)?;

    let mut keys = MessageKeys {
        key: [0u8; AEAD_KEY_LEN],
        nonce: [0u8; AEAD_NONCE_LEN],
    };
    keys.key.copy_from_slice(&okm[..AEAD_KEY_LEN]);
    keys.nonce.copy_from_slice(&okm[AEAD_KEY_LEN..]);
    okm.zeroize();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_step_is_deterministic_and_distinct() {
        let ck = [9u8; 32];
        let (next_a, mk_a) = kdf_ck(&ck).unwrap();
        let (next_b, mk_b) = kdf_ck(&ck).unwrap();
        assert_eq!((next_a, mk_a), (next_b, mk_b));
        assert_ne!(next_a, mk_a);
        assert_ne!(next_a, ck);
    }

    #[test]
    fn root_step_depends_on_both_inputs() {
        let (rk_1, ck_1) = kdf_rk(&[1u8; 32], &[2u8; 32]).unwrap();
        let (rk_2, ck_2) = kdf_rk(&[1u8; 32], &[3u8; 32]).unwrap();
        let (rk_3, _) = kdf_rk(&[4u8; 32], &[2u8; 32]).unwrap();
        assert_ne!(rk_1, ck_1);
        assert_ne!(rk_1, rk_2);
        assert_ne!(ck_1, ck_2);
        assert_ne!(rk_1, rk_3);
    }
}
