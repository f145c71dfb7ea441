//! Primitive cryptographic layer for pgpcore.
//!
//! This module wraps every primitive the higher layers need behind a uniform
//! interface keyed by OpenPGP algorithm identifiers:
//!
//! - **ML-KEM-1024**: key encapsulation for session-key wrapping
//! - **ML-DSA-87**: digital signatures over message digests
//! - **AES-GCM**: AEAD for message bodies, wrapped session keys and locked secrets
//! - **SHA-2 / SHA3**: digests for signatures and fingerprints
//!
//! Unknown algorithm identifiers fail with [`PgpError::UnsupportedAlgorithm`].

use crate::error::{PgpError, Result};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use subtle::ConstantTimeEq;

pub mod aead;
pub mod hash;
pub mod keys;
pub mod password;
pub mod sym;

pub use aead::ChunkedAead;
pub use hash::Hasher;
pub use keys::{
    decapsulate, encapsulate, sign, unwrap_session_key, verify, verify_signature,
    wrap_session_key, KeyPair, PrivateKey, PublicKey, WrappedSessionKey,
};
pub use password::{derive_key, Argon2Params, Password, ProtectedSecret};
pub use sym::{decrypt_symmetric, encrypt_symmetric, SessionKey};

/// Public-key algorithms carried in key, signature and session-key packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublicKeyAlgorithm {
    /// ML-KEM-1024 key encapsulation (NIST FIPS 203)
    MlKem1024 = 100,
    /// ML-DSA-87 digital signatures (NIST FIPS 204)
    MlDsa87 = 101,
}

impl PublicKeyAlgorithm {
    /// Returns the algorithm name as a string
    pub fn name(&self) -> &'static str {
        match self {
            PublicKeyAlgorithm::MlKem1024 => "ML-KEM-1024",
            PublicKeyAlgorithm::MlDsa87 => "ML-DSA-87",
        }
    }

    /// Returns the public key size in bytes for this algorithm
    pub fn public_key_size(&self) -> usize {
        match self {
            PublicKeyAlgorithm::MlKem1024 => 1568,
            PublicKeyAlgorithm::MlDsa87 => 2592,
        }
    }

    /// Returns true if keys of this algorithm can wrap session keys
    pub fn can_encrypt(&self) -> bool {
        matches!(self, PublicKeyAlgorithm::MlKem1024)
    }

    /// Returns true if keys of this algorithm can produce signatures
    pub fn can_sign(&self) -> bool {
        matches!(self, PublicKeyAlgorithm::MlDsa87)
    }
}

impl TryFrom<u8> for PublicKeyAlgorithm {
    type Error = PgpError;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            100 => Ok(Self::MlKem1024),
            101 => Ok(Self::MlDsa87),
            other => Err(PgpError::unsupported(format!(
                "public-key algorithm id {}",
                other
            ))),
        }
    }
}

impl fmt::Display for PublicKeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Symmetric ciphers, always used in AES-GCM mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymmetricAlgorithm {
    /// AES with 128-bit key
    Aes128 = 7,
    /// AES with 192-bit key
    Aes192 = 8,
    /// AES with 256-bit key
    Aes256 = 9,
}

impl SymmetricAlgorithm {
    /// Returns the short algorithm name used by session-key helpers
    pub fn name(&self) -> &'static str {
        match self {
            SymmetricAlgorithm::Aes128 => "aes128",
            SymmetricAlgorithm::Aes192 => "aes192",
            SymmetricAlgorithm::Aes256 => "aes256",
        }
    }

    /// Looks up a cipher by its short name.
    ///
    /// Legacy names (`3des`, `cast5`) are recognized but not supported.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aes128" => Ok(Self::Aes128),
            "aes192" => Ok(Self::Aes192),
            "aes256" => Ok(Self::Aes256),
            "3des" | "cast5" => Err(PgpError::unsupported(format!(
                "legacy cipher {} is not supported",
                name
            ))),
            other => Err(PgpError::unsupported(format!("cipher name {}", other))),
        }
    }

    /// Returns the key size in bytes
    pub fn key_size(&self) -> usize {
        match self {
            SymmetricAlgorithm::Aes128 => 16,
            SymmetricAlgorithm::Aes192 => 24,
            SymmetricAlgorithm::Aes256 => 32,
        }
    }
}

impl TryFrom<u8> for SymmetricAlgorithm {
    type Error = PgpError;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            7 => Ok(Self::Aes128),
            8 => Ok(Self::Aes192),
            9 => Ok(Self::Aes256),
            other => Err(PgpError::unsupported(format!(
                "symmetric algorithm id {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// AEAD modes for chunked encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeadAlgorithm {
    /// Galois/Counter Mode
    Gcm = 3,
}

impl AeadAlgorithm {
    /// Nonce size in bytes
    pub fn nonce_size(&self) -> usize {
        match self {
            AeadAlgorithm::Gcm => 12,
        }
    }

    /// Authentication tag size in bytes
    pub fn tag_size(&self) -> usize {
        match self {
            AeadAlgorithm::Gcm => 16,
        }
    }
}

impl TryFrom<u8> for AeadAlgorithm {
    type Error = PgpError;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            3 => Ok(Self::Gcm),
            other => Err(PgpError::unsupported(format!("AEAD algorithm id {}", other))),
        }
    }
}

/// Hash algorithms for signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "sha256")]
    Sha256 = 8,
    #[serde(rename = "sha384")]
    Sha384 = 9,
    #[serde(rename = "sha512")]
    Sha512 = 10,
    #[serde(rename = "sha3-256")]
    Sha3_256 = 12,
    #[serde(rename = "sha3-512")]
    Sha3_512 = 14,
}

impl HashAlgorithm {
    /// Returns the algorithm name as a string
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Sha3_256 => "SHA3-256",
            HashAlgorithm::Sha3_512 => "SHA3-512",
        }
    }

    /// Digest size in bytes
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Sha3_256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 | HashAlgorithm::Sha3_512 => 64,
        }
    }

    /// Computes a one-shot digest of `data`
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = Hasher::new(*self);
        hasher.update(data);
        hasher.finalize()
    }
}

impl TryFrom<u8> for HashAlgorithm {
    type Error = PgpError;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            8 => Ok(Self::Sha256),
            9 => Ok(Self::Sha384),
            10 => Ok(Self::Sha512),
            12 => Ok(Self::Sha3_256),
            14 => Ok(Self::Sha3_512),
            other => Err(PgpError::unsupported(format!("hash algorithm id {}", other))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Key usage flags indicating how a key may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyUsage {
    /// Key may be used for encryption
    pub encrypt: bool,
    /// Key may be used for digital signatures
    pub sign: bool,
    /// Key may be used to certify other keys
    pub certify: bool,
    /// Key may be used for authentication
    pub authenticate: bool,
}

const FLAG_CERTIFY: u8 = 0x01;
const FLAG_SIGN: u8 = 0x02;
const FLAG_ENCRYPT_COMMS: u8 = 0x04;
const FLAG_ENCRYPT_STORAGE: u8 = 0x08;
const FLAG_AUTHENTICATE: u8 = 0x20;

impl KeyUsage {
    /// Creates a new KeyUsage with all permissions disabled
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a new KeyUsage for encryption only
    pub fn encrypt_only() -> Self {
        Self {
            encrypt: true,
            ..Self::default()
        }
    }

    /// Creates a new KeyUsage for signing only
    pub fn sign_only() -> Self {
        Self {
            sign: true,
            ..Self::default()
        }
    }

    /// Usage of a freshly generated primary key
    pub fn certify_and_sign() -> Self {
        Self {
            certify: true,
            sign: true,
            ..Self::default()
        }
    }

    /// Decodes the first octet of a key-flags subpacket
    pub fn from_flags(flags: u8) -> Self {
        Self {
            certify: flags & FLAG_CERTIFY != 0,
            sign: flags & FLAG_SIGN != 0,
            encrypt: flags & (FLAG_ENCRYPT_COMMS | FLAG_ENCRYPT_STORAGE) != 0,
            authenticate: flags & FLAG_AUTHENTICATE != 0,
        }
    }

    /// Encodes these usage flags as a key-flags octet
    pub fn to_flags(&self) -> u8 {
        let mut flags = 0;
        if self.certify {
            flags |= FLAG_CERTIFY;
        }
        if self.sign {
            flags |= FLAG_SIGN;
        }
        if self.encrypt {
            flags |= FLAG_ENCRYPT_COMMS | FLAG_ENCRYPT_STORAGE;
        }
        if self.authenticate {
            flags |= FLAG_AUTHENTICATE;
        }
        flags
    }
}

/// Hashes data with SHA3-256
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Secure random number generation for cryptographic operations
pub fn secure_random_bytes<R: CryptoRng + RngCore>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Constant-time comparison of key IDs
pub fn key_ids_equal(a: u64, b: u64) -> bool {
    a.to_be_bytes().ct_eq(&b.to_be_bytes()).into()
}

/// Constant-time comparison of byte strings of equal length
pub fn bytes_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
