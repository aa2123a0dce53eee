use crate::error::CryptoError;
use crate::keys::{key_array, KEY_LEN};

/// `ratchet_public(32) | previous_chain_length(4 LE) | message_number(4 LE)`.
pub const HEADER_LEN: usize = KEY_LEN + 4 + 4;

/// Cleartext header sent alongside every ratchet message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub ratchet_public: [u8; KEY_LEN],
    /// Length of the sender's previous sending chain.
    pub previous_chain_length: u32,
    pub message_number: u32,
}

impl MessageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..KEY_LEN].copy_from_slice(&self.ratchet_public);
        out[KEY_LEN..KEY_LEN + 4].copy_from_slice(&self.previous_chain_length.to_le_bytes());
        out[KEY_LEN + 4..].copy_from_slice(&self.message_number.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != HEADER_LEN {
            return Err(CryptoError::Format(format!(
                "message header is {} bytes, expected {HEADER_LEN}",
                bytes.len()
            )));
        }
        Ok(Self {
            ratchet_public: key_array("ratchet key", &bytes[..KEY_LEN])?,
            previous_chain_length: u32::from_le_bytes(key_array(
                "previous chain length",
                &bytes[KEY_LEN..KEY_LEN + 4],
            )?),
            message_number: u32::from_le_bytes(key_array("message number", &bytes[KEY_LEN + 4..])?),
        })
    }
}
