//! JSON wire payloads carried on a conversation topic.

use khamosh_crypto::keys::KEY_LEN;
use khamosh_crypto::ratchet::HEADER_LEN;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::serde_b64;

/// First message of a conversation. Carries everything the responder needs
/// to run X3DH before decrypting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialMessage {
    #[serde(with = "serde_b64")]
    pub identity_key: [u8; KEY_LEN],
    #[serde(with = "serde_b64")]
    pub ephemeral_key: [u8; KEY_LEN],
    pub spk_id: u32,
    /// `null` when the fetched bundle had no one-time pre-key.
    pub opk_id: Option<u32>,
    #[serde(with = "serde_b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "serde_b64")]
    pub header: [u8; HEADER_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubsequentMessage {
    #[serde(with = "serde_b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "serde_b64")]
    pub header: [u8; HEADER_LEN],
}

/// Either payload, told apart by shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    Initial(InitialMessage),
    Subsequent(SubsequentMessage),
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Deserialization(format!("unrecognized payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initial(opk_id: Option<u32>) -> WireMessage {
        WireMessage::Initial(InitialMessage {
            identity_key: [1; KEY_LEN],
            ephemeral_key: [2; KEY_LEN],
            spk_id: 1,
            opk_id,
            ciphertext: vec![3; 20],
            header: [4; HEADER_LEN],
        })
    }

    #[test]
    fn initial_json_fields() {
        let bytes = initial(None).to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        for field in ["identityKey", "ephemeralKey", "spkId", "ciphertext", "header"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert!(json["opkId"].is_null());
        assert!(json["identityKey"].is_string());
    }

    #[test]
    fn shape_selects_variant() {
        let subsequent = WireMessage::Subsequent(SubsequentMessage {
            ciphertext: vec![9; 17],
            header: [8; HEADER_LEN],
        });
        let parsed = WireMessage::from_bytes(&subsequent.to_bytes().unwrap()).unwrap();
        assert!(matches!(parsed, WireMessage::Subsequent(_)));

        let parsed = WireMessage::from_bytes(&initial(Some(5)).to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, initial(Some(5)));
    }

    #[test]
    fn malformed_payloads_rejected() {
        // Header one byte short.
        let short = format!(
            r#"{{"ciphertext":"AAAA","header":"{}"}}"#,
            base64_of(&[0; HEADER_LEN - 1])
        );
        for bad in [&b"{}"[..], b"not json", short.as_bytes()] {
            assert!(matches!(
                WireMessage::from_bytes(bad),
                Err(ProtocolError::Deserialization(_))
            ));
        }
    }

    fn base64_of(bytes: &[u8]) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }
}
