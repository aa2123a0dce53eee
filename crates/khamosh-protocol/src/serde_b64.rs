//! `#[serde(with = "serde_b64")]` for byte fields carried as standard base64.
//!
//! Works for `Vec<u8>` and fixed-size arrays; a decoded value of the wrong
//! length is a deserialization error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<Vec<u8>>,
{
    let encoded = String::deserialize(deserializer)?;
    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| D::Error::custom(format!("invalid base64: {e}")))?;
    let len = bytes.len();
    T::try_from(bytes).map_err(|_| D::Error::custom(format!("unexpected byte length {len}")))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "super")]
        key: [u8; 4],
        #[serde(with = "super")]
        blob: Vec<u8>,
    }

    #[test]
    fn standard_alphabet_with_padding() {
        let sample = Sample {
            key: [0xFB, 0xFF, 0x00, 0x01],
            blob: vec![1, 2],
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"key":"+/8AAQ==","blob":"AQI="}"#);
        assert_eq!(serde_json::from_str::<Sample>(&json).unwrap(), sample);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(serde_json::from_str::<Sample>(r#"{"key":"AQI=","blob":""}"#).is_err());
        assert!(serde_json::from_str::<Sample>(r#"{"key":"!!!","blob":""}"#).is_err());
    }
}
