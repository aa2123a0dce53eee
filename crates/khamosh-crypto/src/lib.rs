pub mod associated_data;
pub mod bundle;
pub mod error;
pub mod identity;
pub mod keychain;
pub mod keys;
pub mod memory_stores;
pub mod prekeys;
pub mod provider;
pub mod ratchet;
pub mod store;
pub mod vxeddsa;
pub mod x3dh;

pub use bundle::PreKeyBundle;
pub use error::CryptoError;
pub use identity::{IdentityKeyPair, LocalKeys, SignedPreKey};
pub use keychain::Keychain;
pub use keys::KeyPair;
pub use memory_stores::{MemoryKeychain, MemorySessionRecordStore};
pub use prekeys::{OneTimePreKeyPublic, OneTimePreKeyStore};
pub use provider::{CryptoProvider, DalekProvider, SignatureOutput};
pub use ratchet::{EncryptedMessage, MessageHeader, RatchetLimits, RatchetSessionManager};
pub use store::{SessionRecord, SessionRecordStore};
pub use x3dh::{SharedSecret, X3dhResult};
