use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Crypto(#[from] khamosh_crypto::CryptoError),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("signed pre-key {0} is not the current one")]
    UnknownSignedPreKey(u32),

    #[error("no established session with {0}")]
    NoSession(String),

    #[error("handshake with {0} crossed ours and lost the tie-break")]
    HandshakeCollision(String),
}

impl ProtocolError {
    /// Whether this is a message authentication failure from the ratchet.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Crypto(khamosh_crypto::CryptoError::Authentication))
    }
}
