use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of every Curve25519 key, secret or public.
pub const KEY_LEN: usize = 32;

/// An X25519 key pair. The secret half is wiped when the pair is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    public: [u8; KEY_LEN],
    secret: [u8; KEY_LEN],
}

impl KeyPair {
    pub fn from_parts(secret: [u8; KEY_LEN], public: [u8; KEY_LEN]) -> Self {
        Self { public, secret }
    }

    pub fn public(&self) -> &[u8; KEY_LEN] {
        &self.public
    }

    /// # Security
    /// Raw private key material.
    pub fn secret(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

/// Copy a byte slice into a fixed-size array, reporting `InputLength` on mismatch.
pub fn key_array<const N: usize>(what: &'static str, bytes: &[u8]) -> Result<[u8; N], CryptoError> {
    <[u8; N]>::try_from(bytes).map_err(|_| CryptoError::InputLength {
        what,
        expected: N,
        actual: bytes.len(),
    })
}

/// Short hex prefix of a public key, for log fields.
pub fn fingerprint(public: &[u8]) -> String {
    hex::encode(&public[..public.len().min(8)])
}
