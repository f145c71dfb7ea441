//! Passphrase-based protection using Argon2id and AES-256-GCM.
//!
//! Argon2 cost parameters travel with the protected data so that keys locked
//! under one configuration still unlock under another.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::sym::GCM_NONCE_SIZE;
use crate::{error::PgpError, Result};

/// Salt size for Argon2 (128 bits)
pub const SALT_SIZE: usize = 16;

/// Largest accepted memory exponent (2^22 KiB = 4 GiB)
const MAX_MEMORY_EXPONENT: u8 = 22;

/// Argon2id cost parameters as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Params {
    /// Number of passes
    pub iterations: u8,
    /// Degree of parallelism
    pub parallelism: u8,
    /// Memory cost as a power of two in KiB
    pub memory_exponent: u8,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            iterations: 2,
            parallelism: 1,
            memory_exponent: 14,
        }
    }
}

impl Argon2Params {
    /// Checks that the parameters are acceptable to Argon2id
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 || self.parallelism == 0 {
            return Err(PgpError::invalid_input(
                "Argon2 iterations and parallelism must be non-zero",
            ));
        }
        if self.memory_exponent > MAX_MEMORY_EXPONENT {
            return Err(PgpError::invalid_input(format!(
                "Argon2 memory exponent {} exceeds {}",
                self.memory_exponent, MAX_MEMORY_EXPONENT
            )));
        }
        if (1u32 << self.memory_exponent) < 8 * u32::from(self.parallelism) {
            return Err(PgpError::invalid_input(
                "Argon2 memory must be at least 8 KiB per lane",
            ));
        }
        Ok(())
    }

    fn to_argon2(self, output_len: usize) -> Result<argon2::Params> {
        self.validate()?;
        argon2::Params::new(
            1u32 << self.memory_exponent,
            u32::from(self.iterations),
            u32::from(self.parallelism),
            Some(output_len),
        )
        .map_err(|e| PgpError::invalid_input(format!("Invalid Argon2 parameters: {}", e)))
    }
}

/// Password for key encryption/decryption
#[derive(Clone)]
pub struct Password(Vec<u8>);

impl Password {
    /// Create a new password from a string
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into().into_bytes())
    }

    /// Create a password from raw bytes
    pub fn from_bytes(password: &[u8]) -> Self {
        Self(password.to_vec())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if password is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// Derives `len` key bytes from a password with Argon2id
pub fn derive_key(
    password: &Password,
    salt: &[u8],
    params: Argon2Params,
    len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    if password.is_empty() {
        return Err(PgpError::passphrase("Password cannot be empty"));
    }
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params.to_argon2(len)?,
    );
    let mut out = Zeroizing::new(vec![0u8; len]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|e| PgpError::passphrase(format!("Password hashing failed: {}", e)))?;
    Ok(out)
}

/// Secret bytes sealed under a passphrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedSecret {
    /// Argon2id cost parameters
    pub params: Argon2Params,
    /// Argon2 salt
    pub salt: [u8; SALT_SIZE],
    /// AES-256-GCM nonce
    pub nonce: [u8; GCM_NONCE_SIZE],
    /// Ciphertext including the authentication tag
    pub ciphertext: Vec<u8>,
}

impl ProtectedSecret {
    /// Seals `secret` under `password`, binding `aad` into the tag
    pub fn seal<R: CryptoRng + RngCore>(
        secret: &[u8],
        password: &Password,
        params: Argon2Params,
        aad: &[u8],
        rng: &mut R,
    ) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);
        let mut nonce = [0u8; GCM_NONCE_SIZE];
        rng.fill_bytes(&mut nonce);

        let derived = derive_key(password, &salt, params, 32)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: secret, aad })
            .map_err(|_| PgpError::passphrase("Failed to encrypt secret key material"))?;

        Ok(Self {
            params,
            salt,
            nonce,
            ciphertext,
        })
    }

    /// Opens the secret; a wrong password fails with a passphrase error
    pub fn open(&self, password: &Password, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let derived = derive_key(password, &self.salt, self.params, 32)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&self.nonce),
                Payload {
                    msg: self.ciphertext.as_ref(),
                    aad,
                },
            )
            .map_err(|_| PgpError::passphrase("Failed to unlock secret key (wrong password?)"))?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn fast_params() -> Argon2Params {
        Argon2Params {
            iterations: 1,
            parallelism: 1,
            memory_exponent: 8,
        }
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let password = Password::new("test_password_123!");
        let secret = b"secret private key data for testing";

        let sealed = ProtectedSecret::seal(secret, &password, fast_params(), b"pub", &mut OsRng)
            .expect("Sealing should succeed");
        let opened = sealed.open(&password, b"pub").expect("Opening should succeed");
        assert_eq!(opened.as_slice(), secret);
    }

    #[test]
    fn test_wrong_password_fails() {
        let password = Password::new("correct_password");
        let wrong_password = Password::new("wrong_password");

        let sealed =
            ProtectedSecret::seal(b"secret", &password, fast_params(), b"", &mut OsRng).unwrap();
        let err = sealed.open(&wrong_password, b"").unwrap_err();
        assert!(matches!(err, PgpError::Passphrase(_)));
        assert!(err.to_string().contains("wrong password"));
    }

    #[test]
    fn test_aad_is_bound() {
        let password = Password::new("pw");
        let sealed =
            ProtectedSecret::seal(b"secret", &password, fast_params(), b"key-a", &mut OsRng)
                .unwrap();
        assert!(sealed.open(&password, b"key-b").is_err());
    }

    #[test]
    fn test_empty_password_fails() {
        let result = ProtectedSecret::seal(b"x", &Password::new(""), fast_params(), b"", &mut OsRng);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Password cannot be empty"));
    }

    #[test]
    fn test_different_salts_produce_different_ciphertexts() {
        let password = Password::new("same_password");
        let first =
            ProtectedSecret::seal(b"same data", &password, fast_params(), b"", &mut OsRng).unwrap();
        let second =
            ProtectedSecret::seal(b"same data", &password, fast_params(), b"", &mut OsRng).unwrap();

        assert_ne!(first.salt, second.salt);
        assert_ne!(first.ciphertext, second.ciphertext);
        assert_eq!(
            first.open(&password, b"").unwrap().as_slice(),
            second.open(&password, b"").unwrap().as_slice()
        );
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let password = Password::from_bytes(b"pw");
        let a = derive_key(&password, &[1u8; 16], fast_params(), 24).unwrap();
        let b = derive_key(&password, &[1u8; 16], fast_params(), 24).unwrap();
        assert_eq!(a.len(), 24);
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_param_validation() {
        assert!(Argon2Params::default().validate().is_ok());
        let bad = Argon2Params {
            iterations: 0,
            ..Argon2Params::default()
        };
        assert!(bad.validate().is_err());
        let too_big = Argon2Params {
            memory_exponent: 30,
            ..Argon2Params::default()
        };
        assert!(too_big.validate().is_err());
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("sensitive_password");
        assert!(!format!("{:?}", password).contains("sensitive"));
    }
}
