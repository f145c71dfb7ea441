//! Runtime configuration.
//!
//! A [`Config`] selects algorithms and cost parameters for the message and
//! key pipelines. Every field has a default, so a JSON document only needs
//! the values it overrides.

use crate::crypto::aead::MAX_CHUNK_SIZE_OCTET;
use crate::crypto::{Argon2Params, HashAlgorithm, SymmetricAlgorithm};
use crate::error::{PgpError, Result};
use crate::packet::CompressionAlgorithm;
use crate::validation::Validator;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Upper bound on session-key wrap workers
const MAX_WRAP_WORKERS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cipher for message encryption and session keys
    pub cipher: SymmetricAlgorithm,
    /// Digest for new signatures
    pub hash: HashAlgorithm,
    /// Compression applied before encryption
    pub compression: CompressionAlgorithm,
    /// AEAD chunk size as `log2(size) - 6`
    pub chunk_size_octet: u8,
    /// Worker threads used to wrap the session key for many recipients
    pub wrap_workers: usize,
    /// Cost of passphrase protection for keys and password messages
    pub argon2: Argon2Params,
    /// Lifetime in seconds given to generated keys; `None` never expires
    pub key_lifetime: Option<u32>,
    /// Fixed clock in Unix seconds, used instead of the system time
    pub now: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cipher: SymmetricAlgorithm::Aes256,
            hash: HashAlgorithm::Sha256,
            compression: CompressionAlgorithm::Uncompressed,
            chunk_size_octet: 12,
            wrap_workers: 4,
            argon2: Argon2Params::default(),
            key_lifetime: None,
            now: None,
        }
    }
}

impl Config {
    /// Parses a JSON document and validates it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| PgpError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path)
            .map_err(|e| PgpError::config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Writes the config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| PgpError::config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| PgpError::config(format!("Failed to write {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_octet > MAX_CHUNK_SIZE_OCTET {
            return Err(PgpError::config(format!(
                "chunk_size_octet {} exceeds {}",
                self.chunk_size_octet, MAX_CHUNK_SIZE_OCTET
            )));
        }
        if self.wrap_workers == 0 || self.wrap_workers > MAX_WRAP_WORKERS {
            return Err(PgpError::config(format!(
                "wrap_workers must be between 1 and {}",
                MAX_WRAP_WORKERS
            )));
        }
        if self.key_lifetime == Some(0) {
            return Err(PgpError::config(
                "key_lifetime must be positive; omit it for keys that never expire",
            ));
        }
        self.argon2
            .validate()
            .and_then(|_| Validator::validate_argon2_params(&self.argon2))
            .map_err(|e| PgpError::config(format!("argon2: {}", e)))
    }

    /// Current time in Unix seconds
    pub fn now(&self) -> u64 {
        self.now.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        })
    }

    /// Current time as a packet timestamp
    pub fn timestamp(&self) -> u32 {
        u32::try_from(self.now()).unwrap_or(u32::MAX)
    }
}
