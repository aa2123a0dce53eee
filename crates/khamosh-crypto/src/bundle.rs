//! Fixed-width binary codec for a peer's pre-key bundle.
//!
//! Layout (integers little-endian):
//!
//! ```text
//! identity_key(32) | spk_id(4) | spk_public(32) | spk_signature(96) | opk_id(4) | opk_public(32)?
//! ```
//!
//! The trailing OPK public key is present only when the bundle carries one, so
//! the caller has to say which shape to expect when decoding.

use crate::error::CryptoError;
use crate::keys::{key_array, KEY_LEN};
use crate::vxeddsa::SIGNATURE_LEN;

pub const BUNDLE_LEN_WITHOUT_OPK: usize = KEY_LEN + 4 + KEY_LEN + SIGNATURE_LEN + 4;
pub const BUNDLE_LEN_WITH_OPK: usize = BUNDLE_LEN_WITHOUT_OPK + KEY_LEN;

/// A peer's published pre-keys, as fetched from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub identity_key: [u8; KEY_LEN],
    pub spk_id: u32,
    pub spk_public: [u8; KEY_LEN],
    pub spk_signature: [u8; SIGNATURE_LEN],
    /// Meaningful only when `opk_public` is set. Zero otherwise.
    pub opk_id: u32,
    pub opk_public: Option<[u8; KEY_LEN]>,
}

impl PreKeyBundle {
    pub fn has_opk(&self) -> bool {
        self.opk_public.is_some()
    }

    /// The announced OPK id, if the bundle carries an OPK.
    pub fn opk(&self) -> Option<(u32, &[u8; KEY_LEN])> {
        self.opk_public.as_ref().map(|key| (self.opk_id, key))
    }

    pub fn encoded_len(&self) -> usize {
        if self.has_opk() {
            BUNDLE_LEN_WITH_OPK
        } else {
            BUNDLE_LEN_WITHOUT_OPK
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.identity_key);
        out.extend_from_slice(&self.spk_id.to_le_bytes());
        out.extend_from_slice(&self.spk_public);
        out.extend_from_slice(&self.spk_signature);
        out.extend_from_slice(&self.opk_id.to_le_bytes());
        if let Some(opk) = &self.opk_public {
            out.extend_from_slice(opk);
        }
        out
    }
}

/// Encode bundle fields given as raw slices.
///
/// Every key slice must be exactly 32 bytes and the signature 96 bytes. With
/// `has_opk` set, `opk_public` is required.
pub fn encode(
    identity_key: &[u8],
    spk_id: u32,
    spk_public: &[u8],
    spk_signature: &[u8],
    opk_id: u32,
    opk_public: Option<&[u8]>,
    has_opk: bool,
) -> Result<Vec<u8>, CryptoError> {
    let opk_public = if has_opk {
        let key = opk_public.ok_or(CryptoError::InputLength {
            what: "one-time pre-key",
            expected: KEY_LEN,
            actual: 0,
        })?;
        Some(key_array("one-time pre-key", key)?)
    } else {
        None
    };

    let bundle = PreKeyBundle {
        identity_key: key_array("identity key", identity_key)?,
        spk_id,
        spk_public: key_array("signed pre-key", spk_public)?,
        spk_signature: key_array("signed pre-key signature", spk_signature)?,
        opk_id,
        opk_public,
    };
    Ok(bundle.to_bytes())
}

/// Decode a bundle, requiring exactly the size implied by `has_opk`.
pub fn decode(bytes: &[u8], has_opk: bool) -> Result<PreKeyBundle, CryptoError> {
    let expected = if has_opk {
        BUNDLE_LEN_WITH_OPK
    } else {
        BUNDLE_LEN_WITHOUT_OPK
    };
    if bytes.len() != expected {
        return Err(CryptoError::Format(format!(
            "pre-key bundle is {} bytes, expected {expected}",
            bytes.len()
        )));
    }

    let (identity_key, rest) = bytes.split_at(KEY_LEN);
    let (spk_id, rest) = rest.split_at(4);
    let (spk_public, rest) = rest.split_at(KEY_LEN);
    let (spk_signature, rest) = rest.split_at(SIGNATURE_LEN);
    let (opk_id, opk_public) = rest.split_at(4);

    let identity_key = key_array("identity key", identity_key)?;
    let spk_id = u32::from_le_bytes(key_array("spk id", spk_id)?);
    let spk_public = key_array("signed pre-key", spk_public)?;
    let spk_signature = key_array("signed pre-key signature", spk_signature)?;
    let opk_id = u32::from_le_bytes(key_array("opk id", opk_id)?);
    let opk_public = if has_opk {
        Some(key_array("one-time pre-key", opk_public)?)
    } else {
        None
    };

    Ok(PreKeyBundle {
        identity_key,
        spk_id,
        spk_public,
        spk_signature,
        opk_id,
        opk_public,
    })
}
