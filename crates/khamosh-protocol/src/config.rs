use std::path::Path;

use khamosh_crypto::ratchet::{DEFAULT_MAX_SKIP, DEFAULT_MAX_SKIPPED_KEYS};
use khamosh_crypto::RatchetLimits;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

pub const DEFAULT_TOPIC_PREFIX: &str = "khamoshchat";
/// One-time pre-keys generated per registration batch.
pub const DEFAULT_OPK_BATCH_SIZE: u32 = 25;
pub const DEFAULT_SIGNED_PREKEY_ID: u32 = 1;

/// Runtime settings for a messaging party.
///
/// Every field has a default, so a JSON file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub topic_prefix: String,
    pub opk_batch_size: u32,
    pub signed_prekey_id: u32,
    pub max_skip: u32,
    pub max_skipped_keys: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            opk_batch_size: DEFAULT_OPK_BATCH_SIZE,
            signed_prekey_id: DEFAULT_SIGNED_PREKEY_ID,
            max_skip: DEFAULT_MAX_SKIP,
            max_skipped_keys: DEFAULT_MAX_SKIPPED_KEYS,
        }
    }
}

impl ProtocolConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ProtocolError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.topic_prefix.is_empty() || self.topic_prefix.contains('/') {
            return Err(ProtocolError::Config(format!(
                "topic prefix {:?} must be non-empty and contain no '/'",
                self.topic_prefix
            )));
        }
        if self.opk_batch_size == 0 {
            return Err(ProtocolError::Config("opk_batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn ratchet_limits(&self) -> RatchetLimits {
        RatchetLimits {
            max_skip: self.max_skip,
            max_skipped_keys: self.max_skipped_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.topic_prefix, "khamoshchat");
        assert_eq!(config.opk_batch_size, 25);
        assert_eq!(config.ratchet_limits(), RatchetLimits::default());
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_overrides() {
        let config = ProtocolConfig::from_json_str(r#"{"max_skip": 10, "topic_prefix": "test"}"#).unwrap();
        assert_eq!(config.max_skip, 10);
        assert_eq!(config.topic_prefix, "test");
        assert_eq!(config.max_skipped_keys, 2000);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            ProtocolConfig::from_json_str(r#"{"topic_prefix": "a/b"}"#),
            Err(ProtocolError::Config(_))
        ));
        assert!(matches!(
            ProtocolConfig::from_json_str(r#"{"opk_batch_size": 0}"#),
            Err(ProtocolError::Config(_))
        ));
        assert!(matches!(
            ProtocolConfig::from_json_str("not json"),
            Err(ProtocolError::Config(_))
        ));
    }

    #[test]
    fn reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"opk_batch_size": 5}"#).unwrap();
        assert_eq!(ProtocolConfig::from_json_file(&path).unwrap().opk_batch_size, 5);
        assert!(ProtocolConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
