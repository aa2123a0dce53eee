use crate::CryptoError;

/// Trait for secret key storage, abstracting over the actual backend.
///
/// The crypto crate only defines the trait. Backends live with the
/// application (in-memory for tests, SQLite in `khamosh-protocol`).
pub trait Keychain: Send + Sync {
    /// Store a key under a vault/key pair, replacing any previous value.
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError>;

    /// Retrieve a key from a vault/key pair.
    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Remove and return a key in one step.
    ///
    /// Two concurrent callers must never both receive the value.
    fn take_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Delete a key from a vault/key pair. Deleting a missing key is not an error.
    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError>;

    fn key_exists(&self, vault: &str, key: &str) -> Result<bool, CryptoError>;

    /// Key names currently stored in a vault.
    fn list_keys(&self, vault: &str) -> Result<Vec<String>, CryptoError>;
}

/// Vault for the long-term identity and the signed pre-key.
pub const VAULT_IDENTITY: &str = "identity";
/// X25519 identity private key.
pub const KEY_IDENTITY_SECRET: &str = "identity_secret";
/// Current signed pre-key: id, secret and signature.
pub const KEY_SIGNED_PREKEY: &str = "signed_prekey";

/// Vault holding one-time pre-key secrets.
pub const VAULT_OPKS: &str = "opks";
/// Vault for one-time pre-key bookkeeping.
pub const VAULT_OPK_META: &str = "opks_meta";
/// Next one-time pre-key id to issue (u32 LE).
pub const KEY_NEXT_OPK_ID: &str = "next_id";

/// Storage key name for a one-time pre-key.
pub fn opk_key_name(id: u32) -> String {
    format!("opk-{id}")
}

/// Inverse of [`opk_key_name`].
pub fn parse_opk_key_name(name: &str) -> Option<u32> {
    name.strip_prefix("opk-")?.parse().ok()
}
