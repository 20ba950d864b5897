//! Tunables for the vault services.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```json
//! { "chunk_size": 1048576, "verify_delay_ms": 500 }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::stream;

/// Free-space headroom required on top of the payload size (100 MiB).
pub const DEFAULT_MIN_FREE_SPACE: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Plaintext bytes per streaming chunk.
    pub chunk_size: usize,
    /// Headroom that must remain free after a write.
    pub min_free_space: u64,
    /// Payloads at or above this size go through the streaming codec.
    pub stream_threshold: u64,
    /// Blobs re-encrypted between pauses.
    pub reencrypt_batch_size: usize,
    /// Pause between re-encryption batches.
    pub reencrypt_batch_pause_ms: u64,
    /// Delay applied to every password verification by the `Vault` facade.
    pub verify_delay_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            chunk_size: stream::DEFAULT_CHUNK_SIZE,
            min_free_space: DEFAULT_MIN_FREE_SPACE,
            stream_threshold: stream::DEFAULT_CHUNK_SIZE as u64,
            reencrypt_batch_size: 10,
            reencrypt_batch_pause_ms: 100,
            verify_delay_ms: 0,
        }
    }
}

impl VaultConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| VaultError::from_io(e, path))?;
        Self::from_json_str(&json)
    }

    /// Normalise the chunk size and reject values no service can run with.
    pub fn validate(mut self) -> Result<Self> {
        self.chunk_size = stream::normalize_chunk_size(self.chunk_size);
        if self.reencrypt_batch_size == 0 {
            return Err(VaultError::Config("reencrypt_batch_size must be at least 1".into()));
        }
        if self.stream_threshold == 0 {
            return Err(VaultError::Config("stream_threshold must be at least 1".into()));
        }
        Ok(self)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.reencrypt_batch_pause_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = VaultConfig::from_json_str(r#"{ "verify_delay_ms": 250 }"#).unwrap();
        assert_eq!(config.verify_delay(), Duration::from_millis(250));
        assert_eq!(config.chunk_size, stream::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.min_free_space, DEFAULT_MIN_FREE_SPACE);
    }

    #[test]
    fn test_chunk_size_is_clamped() {
        let config = VaultConfig::from_json_str(r#"{ "chunk_size": 1024 }"#).unwrap();
        assert_eq!(config.chunk_size, stream::MIN_CHUNK_SIZE);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(VaultConfig::from_json_str(r#"{ "reencrypt_batch_size": 0 }"#).is_err());
        assert!(VaultConfig::from_json_str(r#"{ "stream_threshold": 0 }"#).is_err());
        assert!(VaultConfig::from_json_str(r#"{ "no_such_field": 1 }"#).is_err());
        assert!(VaultConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        fs::write(&path, r#"{ "reencrypt_batch_size": 3 }"#).unwrap();
        assert_eq!(VaultConfig::from_json_file(&path).unwrap().reencrypt_batch_size, 3);
        assert!(matches!(
            VaultConfig::from_json_file(dir.path().join("missing.json")),
            Err(VaultError::FileNotFound(_))
        ));
    }
}
