//! AES-GCM symmetric encryption and session keys.

use crate::crypto::{secure_random_bytes, SymmetricAlgorithm};
use crate::error::{PgpError, Result};
use crate::validation::Validator;
use aes_gcm::{
    aead::{consts::U12, Aead, KeyInit, Payload},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm, Nonce,
};
use rand::{CryptoRng, RngCore};
use std::fmt;
use zeroize::Zeroizing;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AES-GCM nonce size in bytes
pub const GCM_NONCE_SIZE: usize = 12;

/// Nonce size used when sealing wrapped session keys
pub const WRAP_NONCE_SIZE: usize = GCM_NONCE_SIZE;

/// A symmetric session key; key bytes are zeroized on drop
#[derive(Clone)]
pub struct SessionKey {
    algorithm: SymmetricAlgorithm,
    key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SessionKey {
    /// Generates a random session key for the algorithm
    pub fn generate<R: CryptoRng + RngCore>(algorithm: SymmetricAlgorithm, rng: &mut R) -> Self {
        Self {
            algorithm,
            key: Zeroizing::new(secure_random_bytes(rng, algorithm.key_size())),
        }
    }

    /// Wraps existing key bytes, checking their length
    pub fn from_bytes(algorithm: SymmetricAlgorithm, key: &[u8]) -> Result<Self> {
        if key.len() != algorithm.key_size() {
            return Err(PgpError::invalid_input(format!(
                "{} session key must be {} bytes, got {}",
                algorithm,
                algorithm.key_size(),
                key.len()
            )));
        }
        Ok(Self {
            algorithm,
            key: Zeroizing::new(key.to_vec()),
        })
    }

    /// Returns the cipher this key is for
    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    /// Returns the raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Two-octet additive checksum over the key bytes
    pub fn checksum(&self) -> u16 {
        self.key
            .iter()
            .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
    }

    /// Encodes `[algo || key || checksum]` for wrapping
    pub(crate) fn to_checksummed(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.key.len() + 3));
        out.push(self.algorithm as u8);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.checksum().to_be_bytes());
        out
    }

    /// Decodes `[algo || key || checksum]`, verifying the checksum
    pub(crate) fn from_checksummed(data: &[u8]) -> Result<Self> {
        let (&algo, rest) = data
            .split_first()
            .ok_or_else(|| PgpError::malformed("Empty session key block"))?;
        let algorithm = SymmetricAlgorithm::try_from(algo)?;
        if rest.len() != algorithm.key_size() + 2 {
            return Err(PgpError::malformed("Session key block has wrong length"));
        }
        let (key, checksum) = rest.split_at(algorithm.key_size());
        let session_key = Self::from_bytes(algorithm, key)?;
        let expected = u16::from_be_bytes([checksum[0], checksum[1]]);
        if session_key.checksum() != expected {
            return Err(PgpError::malformed("Session key checksum mismatch"));
        }
        Ok(session_key)
    }
}

fn seal<C>(key: &[u8], nonce: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + Aead<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| PgpError::invalid_input("Invalid key length"))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| PgpError::invalid_input("AES-GCM encryption failed"))
}

fn open<C>(key: &[u8], nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + Aead<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| PgpError::invalid_input("Invalid key length"))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| PgpError::authentication("AES-GCM tag mismatch"))
}

/// Encrypts `plaintext` with AES-GCM, appending the 16-byte tag
pub fn encrypt_symmetric(
    algorithm: SymmetricAlgorithm,
    key: &[u8],
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    Validator::validate_nonce_size(nonce, GCM_NONCE_SIZE)?;
    match algorithm {
        SymmetricAlgorithm::Aes128 => seal::<Aes128Gcm>(key, nonce, plaintext, aad),
        SymmetricAlgorithm::Aes192 => seal::<Aes192Gcm>(key, nonce, plaintext, aad),
        SymmetricAlgorithm::Aes256 => seal::<Aes256Gcm>(key, nonce, plaintext, aad),
    }
}

/// Decrypts and authenticates AES-GCM ciphertext.
///
/// Fails with [`PgpError::Authentication`] when the tag does not verify.
pub fn decrypt_symmetric(
    algorithm: SymmetricAlgorithm,
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    Validator::validate_nonce_size(nonce, GCM_NONCE_SIZE)?;
    match algorithm {
        SymmetricAlgorithm::Aes128 => open::<Aes128Gcm>(key, nonce, ciphertext, aad),
        SymmetricAlgorithm::Aes192 => open::<Aes192Gcm>(key, nonce, ciphertext, aad),
        SymmetricAlgorithm::Aes256 => open::<Aes256Gcm>(key, nonce, ciphertext, aad),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_symmetric_roundtrip_all_ciphers() {
        let mut rng = OsRng;
        for algorithm in [
            SymmetricAlgorithm::Aes128,
            SymmetricAlgorithm::Aes192,
            SymmetricAlgorithm::Aes256,
        ] {
            let key = SessionKey::generate(algorithm, &mut rng);
            let nonce = [3u8; GCM_NONCE_SIZE];
            let ct = encrypt_symmetric(algorithm, key.as_bytes(), &nonce, b"payload", b"aad")
                .unwrap();
            assert_eq!(ct.len(), b"payload".len() + 16);
            let pt = decrypt_symmetric(algorithm, key.as_bytes(), &nonce, &ct, b"aad").unwrap();
            assert_eq!(pt, b"payload");
        }
    }

    #[test]
    fn test_tampering_is_authentication_error() {
        let mut rng = OsRng;
        let key = SessionKey::generate(SymmetricAlgorithm::Aes256, &mut rng);
        let nonce = [0u8; GCM_NONCE_SIZE];
        let mut ct =
            encrypt_symmetric(SymmetricAlgorithm::Aes256, key.as_bytes(), &nonce, b"x", b"")
                .unwrap();
        ct[0] ^= 1;
        let err = decrypt_symmetric(SymmetricAlgorithm::Aes256, key.as_bytes(), &nonce, &ct, b"")
            .unwrap_err();
        assert!(matches!(err, PgpError::Authentication(_)));
    }

    #[test]
    fn test_bad_nonce_and_key_lengths() {
        assert!(encrypt_symmetric(SymmetricAlgorithm::Aes128, &[0u8; 16], &[0u8; 8], b"", b"")
            .is_err());
        assert!(encrypt_symmetric(SymmetricAlgorithm::Aes128, &[0u8; 15], &[0u8; 12], b"", b"")
            .is_err());
    }

    #[test]
    fn test_checksummed_block() {
        let key = SessionKey::from_bytes(SymmetricAlgorithm::Aes128, &[1u8; 16]).unwrap();
        assert_eq!(key.checksum(), 16);

        let block = key.to_checksummed();
        assert_eq!(block[0], 7);
        let decoded = SessionKey::from_checksummed(&block).unwrap();
        assert_eq!(decoded.as_bytes(), key.as_bytes());

        let mut corrupted = block.to_vec();
        corrupted[17] ^= 0xFF;
        assert!(SessionKey::from_checksummed(&corrupted).is_err());
        assert!(SessionKey::from_checksummed(&[]).is_err());
    }

    #[test]
    fn test_session_key_debug_is_redacted() {
        let key = SessionKey::from_bytes(SymmetricAlgorithm::Aes128, &[0xAB; 16]).unwrap();
        assert!(!format!("{:?}", key).contains("171"));
    }
}
