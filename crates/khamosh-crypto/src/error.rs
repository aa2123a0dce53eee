use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InputLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("malformed encoding: {0}")]
    Format(String),

    #[error("signed pre-key signature verification failed")]
    SignatureVerification,

    /// AEAD failure. Tampering, a wrong associated data and a desynchronized
    /// chain all end up here on purpose.
    #[error("message authentication failed")]
    Authentication,

    #[error("no ratchet session for peer {0}")]
    SessionNotFound(String),

    #[error("ratchet session has no sending chain until it receives a message")]
    SessionNotReady,

    #[error("one-time pre-key {0} not found")]
    NotFound(u32),

    #[error("crypto provider failure: {0}")]
    InternalCrypto(String),

    #[error("key storage error: {0}")]
    Storage(String),
}
