//! Double Ratchet sessions.

mod chain;
pub mod codec;
mod header;
mod manager;
mod session;

pub use header::{MessageHeader, HEADER_LEN};
pub use manager::RatchetSessionManager;
pub use session::{
    EncryptedMessage, RatchetLimits, RatchetSession, DEFAULT_MAX_SKIP, DEFAULT_MAX_SKIPPED_KEYS,
};
