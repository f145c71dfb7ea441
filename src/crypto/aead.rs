//! Chunked AEAD for version 2 symmetrically encrypted integrity protected data.
//!
//! A per-message key and IV are derived with HKDF-SHA256 from the session key
//! and a random salt. The plaintext is split into chunks of `2^(c+6)` octets,
//! each sealed with nonce `IV || chunk_index`. A final empty chunk authenticates
//! the total plaintext length so truncation at a chunk boundary is detected.

use crate::cancel::CancellationToken;
use crate::crypto::sym::{decrypt_symmetric, encrypt_symmetric, SessionKey, GCM_NONCE_SIZE};
use crate::crypto::{AeadAlgorithm, SymmetricAlgorithm};
use crate::error::{PgpError, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

/// Salt size for message key derivation
pub const SALT_SIZE: usize = 32;

/// Largest chunk size octet accepted (4 MiB chunks)
pub const MAX_CHUNK_SIZE_OCTET: u8 = 16;

/// Encrypted-data packet tag in new-format header form
const SEIPD_V2_HEADER_OCTET: u8 = 0xD2;
const SEIPD_VERSION: u8 = 2;
const IV_SIZE: usize = GCM_NONCE_SIZE - 8;

/// Derived per-message AEAD state
pub struct ChunkedAead {
    symmetric: SymmetricAlgorithm,
    aead: AeadAlgorithm,
    chunk_size: usize,
    key: Zeroizing<Vec<u8>>,
    iv: [u8; IV_SIZE],
    info: [u8; 5],
}

impl std::fmt::Debug for ChunkedAead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedAead")
            .field("symmetric", &self.symmetric)
            .field("aead", &self.aead)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Converts a chunk size octet to the chunk size in bytes
pub fn chunk_size(chunk_size_octet: u8) -> Result<usize> {
    if chunk_size_octet > MAX_CHUNK_SIZE_OCTET {
        return Err(PgpError::malformed(format!(
            "Chunk size octet {} exceeds {}",
            chunk_size_octet, MAX_CHUNK_SIZE_OCTET
        )));
    }
    Ok(1usize << (chunk_size_octet as usize + 6))
}

impl ChunkedAead {
    /// Derives the message key and IV for one encrypted-data packet
    pub fn new(
        session_key: &SessionKey,
        aead: AeadAlgorithm,
        chunk_size_octet: u8,
        salt: &[u8; SALT_SIZE],
    ) -> Result<Self> {
        let symmetric = session_key.algorithm();
        let chunk_size = chunk_size(chunk_size_octet)?;
        let info = [
            SEIPD_V2_HEADER_OCTET,
            SEIPD_VERSION,
            symmetric as u8,
            aead as u8,
            chunk_size_octet,
        ];

        let key_len = symmetric.key_size();
        let hk = Hkdf::<Sha256>::new(Some(salt), session_key.as_bytes());
        let mut okm = Zeroizing::new(vec![0u8; key_len + IV_SIZE]);
        hk.expand(&info, &mut okm)
            .map_err(|_| PgpError::invalid_input("HKDF output length rejected"))?;

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&okm[key_len..]);
        Ok(Self {
            symmetric,
            aead,
            chunk_size,
            key: Zeroizing::new(okm[..key_len].to_vec()),
            iv,
            info,
        })
    }

    fn nonce(&self, index: u64) -> [u8; GCM_NONCE_SIZE] {
        let mut nonce = [0u8; GCM_NONCE_SIZE];
        nonce[..IV_SIZE].copy_from_slice(&self.iv);
        nonce[IV_SIZE..].copy_from_slice(&index.to_be_bytes());
        nonce
    }

    fn final_aad(&self, total: u64) -> Vec<u8> {
        let mut aad = self.info.to_vec();
        aad.extend_from_slice(&total.to_be_bytes());
        aad
    }

    /// Encrypts `plaintext` into the chunk sequence followed by the final tag
    pub fn encrypt(&self, plaintext: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        let tag_size = self.aead.tag_size();
        let chunks = plaintext.len().div_ceil(self.chunk_size);
        let mut out = Vec::with_capacity(plaintext.len() + (chunks + 1) * tag_size);

        let mut index = 0u64;
        for chunk in plaintext.chunks(self.chunk_size) {
            cancel.check()?;
            let sealed = encrypt_symmetric(
                self.symmetric,
                &self.key,
                &self.nonce(index),
                chunk,
                &self.info,
            )?;
            out.extend_from_slice(&sealed);
            index += 1;
        }

        let final_tag = encrypt_symmetric(
            self.symmetric,
            &self.key,
            &self.nonce(index),
            &[],
            &self.final_aad(plaintext.len() as u64),
        )?;
        out.extend_from_slice(&final_tag);
        debug!(chunks = index, bytes = plaintext.len(), "sealed AEAD chunks");
        Ok(out)
    }

    /// Decrypts and authenticates every chunk and the final tag.
    ///
    /// No plaintext is returned unless all tags verify.
    pub fn decrypt(&self, ciphertext: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        let tag_size = self.aead.tag_size();
        if ciphertext.len() < tag_size {
            return Err(PgpError::malformed("Encrypted data shorter than final tag"));
        }
        let (body, final_tag) = ciphertext.split_at(ciphertext.len() - tag_size);
        let mut out = Vec::with_capacity(body.len());

        let mut index = 0u64;
        for chunk in body.chunks(self.chunk_size + tag_size) {
            cancel.check()?;
            if chunk.len() <= tag_size {
                return Err(PgpError::malformed("Truncated AEAD chunk"));
            }
            let opened = decrypt_symmetric(
                self.symmetric,
                &self.key,
                &self.nonce(index),
                chunk,
                &self.info,
            )?;
            out.extend_from_slice(&opened);
            index += 1;
        }

        decrypt_symmetric(
            self.symmetric,
            &self.key,
            &self.nonce(index),
            final_tag,
            &self.final_aad(out.len() as u64),
        )
        .map_err(|_| PgpError::authentication("Final AEAD tag mismatch"))?;
        debug!(chunks = index, bytes = out.len(), "opened AEAD chunks");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn setup(octet: u8) -> ChunkedAead {
        let key = SessionKey::generate(SymmetricAlgorithm::Aes256, &mut OsRng);
        ChunkedAead::new(&key, AeadAlgorithm::Gcm, octet, &[9u8; SALT_SIZE]).unwrap()
    }

    #[test]
    fn test_roundtrip_across_chunk_boundaries() {
        let aead = setup(0);
        let token = CancellationToken::new();
        for len in [0usize, 1, 63, 64, 65, 200] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let sealed = aead.encrypt(&data, &token).unwrap();
            assert_eq!(
                sealed.len(),
                len + (len.div_ceil(64) + 1) * 16,
                "length {}",
                len
            );
            assert_eq!(aead.decrypt(&sealed, &token).unwrap(), data);
        }
    }

    #[test]
    fn test_dropping_a_chunk_is_detected() {
        let aead = setup(0);
        let token = CancellationToken::new();
        let data = vec![5u8; 128];
        let sealed = aead.encrypt(&data, &token).unwrap();

        let mut truncated = sealed[..80].to_vec();
        truncated.extend_from_slice(&sealed[sealed.len() - 16..]);
        let err = aead.decrypt(&truncated, &token).unwrap_err();
        assert!(matches!(err, PgpError::Authentication(_)));
    }

    #[test]
    fn test_bit_flip_is_detected() {
        let aead = setup(2);
        let token = CancellationToken::new();
        let mut sealed = aead.encrypt(b"some secret text", &token).unwrap();
        sealed[3] ^= 0x40;
        assert!(matches!(
            aead.decrypt(&sealed, &token),
            Err(PgpError::Authentication(_))
        ));
    }

    #[test]
    fn test_cancelled_token_stops_work() {
        let aead = setup(0);
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            aead.encrypt(&[1u8; 100], &token),
            Err(PgpError::Cancelled)
        ));
    }

    #[test]
    fn test_chunk_size_octet_limits() {
        assert_eq!(chunk_size(0).unwrap(), 64);
        assert_eq!(chunk_size(12).unwrap(), 256 * 1024);
        assert!(chunk_size(17).is_err());
    }
}
