//! Post-quantum key material, signatures and session-key encapsulation.
//!
//! Keys here are bare algorithm material. Framing (creation time, fingerprint,
//! usage flags) lives in the packet and key layers.

use crate::crypto::sym::{SessionKey, WRAP_NONCE_SIZE};
use crate::crypto::{secure_random_bytes, PublicKeyAlgorithm};
use crate::error::{PgpError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use pqcrypto_mldsa::mldsa87::{
    self, DetachedSignature as Mldsa87Signature, PublicKey as Mldsa87PublicKey,
    SecretKey as Mldsa87SecretKey,
};
use pqcrypto_mlkem::mlkem1024::{
    self, Ciphertext as Mlkem1024Ciphertext, PublicKey as Mlkem1024PublicKey,
    SecretKey as Mlkem1024SecretKey,
};
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as KemPublicKey, SecretKey as KemSecretKey, SharedSecret as _,
};
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as SignPublicKey, SecretKey as SignSecretKey,
};
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

const KEK_INFO: &[u8] = b"pgpcore ML-KEM-1024 session key wrap";

/// Public key material for one algorithm
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    algorithm: PublicKeyAlgorithm,
    key_bytes: Vec<u8>,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_bytes.len())
            .finish()
    }
}

impl PublicKey {
    /// Wraps raw public key bytes, checking the size for the algorithm
    pub fn from_bytes(algorithm: PublicKeyAlgorithm, key_bytes: Vec<u8>) -> Result<Self> {
        if key_bytes.len() != algorithm.public_key_size() {
            return Err(PgpError::malformed(format!(
                "{} public key must be {} bytes, got {}",
                algorithm,
                algorithm.public_key_size(),
                key_bytes.len()
            )));
        }
        Ok(Self {
            algorithm,
            key_bytes,
        })
    }

    /// Returns the algorithm used by this key
    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    /// Returns the raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    fn as_mlkem1024(&self) -> Result<Mlkem1024PublicKey> {
        if self.algorithm != PublicKeyAlgorithm::MlKem1024 {
            return Err(PgpError::invalid_input("Key is not a ML-KEM-1024 key"));
        }
        Mlkem1024PublicKey::from_bytes(&self.key_bytes)
            .map_err(|_| PgpError::malformed("Invalid ML-KEM-1024 public key bytes"))
    }

    fn as_mldsa87(&self) -> Result<Mldsa87PublicKey> {
        if self.algorithm != PublicKeyAlgorithm::MlDsa87 {
            return Err(PgpError::invalid_input("Key is not a ML-DSA-87 key"));
        }
        Mldsa87PublicKey::from_bytes(&self.key_bytes)
            .map_err(|_| PgpError::malformed("Invalid ML-DSA-87 public key bytes"))
    }
}

/// Unlocked private key material; zeroized on drop
#[derive(Clone)]
pub struct PrivateKey {
    algorithm: PublicKeyAlgorithm,
    key_bytes: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}

impl PrivateKey {
    /// Wraps raw secret key bytes
    pub fn from_bytes(algorithm: PublicKeyAlgorithm, key_bytes: Zeroizing<Vec<u8>>) -> Result<Self> {
        let valid = match algorithm {
            PublicKeyAlgorithm::MlKem1024 => Mlkem1024SecretKey::from_bytes(&key_bytes).is_ok(),
            PublicKeyAlgorithm::MlDsa87 => Mldsa87SecretKey::from_bytes(&key_bytes).is_ok(),
        };
        if !valid {
            return Err(PgpError::malformed(format!(
                "Invalid {} secret key length {}",
                algorithm,
                key_bytes.len()
            )));
        }
        Ok(Self {
            algorithm,
            key_bytes,
        })
    }

    /// Returns the algorithm used by this key
    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    /// Returns the raw secret bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    fn as_mlkem1024(&self) -> Result<Mlkem1024SecretKey> {
        if self.algorithm != PublicKeyAlgorithm::MlKem1024 {
            return Err(PgpError::invalid_input("Key is not a ML-KEM-1024 key"));
        }
        Mlkem1024SecretKey::from_bytes(&self.key_bytes)
            .map_err(|_| PgpError::malformed("Invalid ML-KEM-1024 secret key bytes"))
    }

    fn as_mldsa87(&self) -> Result<Mldsa87SecretKey> {
        if self.algorithm != PublicKeyAlgorithm::MlDsa87 {
            return Err(PgpError::invalid_input("Key is not a ML-DSA-87 key"));
        }
        Mldsa87SecretKey::from_bytes(&self.key_bytes)
            .map_err(|_| PgpError::malformed("Invalid ML-DSA-87 secret key bytes"))
    }
}

/// A matching public/private key pair
#[derive(Clone)]
pub struct KeyPair {
    /// The public key component
    pub public: PublicKey,
    /// The private key component
    pub private: PrivateKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.public.algorithm)
            .finish()
    }
}

impl KeyPair {
    /// Generates a new ML-KEM-1024 key pair.
    ///
    /// pqcrypto draws from its own CSPRNG, so no rng is taken here.
    pub fn generate_mlkem1024() -> Self {
        let (public_key, secret_key) = mlkem1024::keypair();
        Self {
            public: PublicKey {
                algorithm: PublicKeyAlgorithm::MlKem1024,
                key_bytes: KemPublicKey::as_bytes(&public_key).to_vec(),
            },
            private: PrivateKey {
                algorithm: PublicKeyAlgorithm::MlKem1024,
                key_bytes: Zeroizing::new(KemSecretKey::as_bytes(&secret_key).to_vec()),
            },
        }
    }

    /// Generates a new ML-DSA-87 key pair
    pub fn generate_mldsa87() -> Self {
        let (public_key, secret_key) = mldsa87::keypair();
        Self {
            public: PublicKey {
                algorithm: PublicKeyAlgorithm::MlDsa87,
                key_bytes: SignPublicKey::as_bytes(&public_key).to_vec(),
            },
            private: PrivateKey {
                algorithm: PublicKeyAlgorithm::MlDsa87,
                key_bytes: Zeroizing::new(SignSecretKey::as_bytes(&secret_key).to_vec()),
            },
        }
    }

    /// Generates a key pair for the given algorithm
    pub fn generate(algorithm: PublicKeyAlgorithm) -> Self {
        match algorithm {
            PublicKeyAlgorithm::MlKem1024 => Self::generate_mlkem1024(),
            PublicKeyAlgorithm::MlDsa87 => Self::generate_mldsa87(),
        }
    }
}

/// Signs a message digest with an ML-DSA-87 private key
pub fn sign(private_key: &PrivateKey, digest: &[u8]) -> Result<Vec<u8>> {
    if !private_key.algorithm.can_sign() {
        return Err(PgpError::invalid_input(format!(
            "{} keys cannot sign",
            private_key.algorithm
        )));
    }
    let secret_key = private_key.as_mldsa87()?;
    let signature = mldsa87::detached_sign(digest, &secret_key);
    Ok(signature.as_bytes().to_vec())
}

/// Verifies a signature over a message digest
///
/// Returns `false` for any failure, including undecodable signature bytes
/// or a key of the wrong algorithm.
pub fn verify(public_key: &PublicKey, digest: &[u8], signature: &[u8]) -> bool {
    verify_signature(public_key, digest, signature).is_ok()
}

/// Verifies a signature, failing with [`PgpError::InvalidSignature`]
pub fn verify_signature(public_key: &PublicKey, digest: &[u8], signature: &[u8]) -> Result<()> {
    let key = public_key
        .as_mldsa87()
        .map_err(|e| PgpError::invalid_signature(format!("Unusable verification key: {}", e)))?;
    let detached = Mldsa87Signature::from_bytes(signature)
        .map_err(|_| PgpError::invalid_signature("Undecodable ML-DSA-87 signature"))?;
    mldsa87::verify_detached_signature(&detached, digest, &key)
        .map_err(|_| PgpError::invalid_signature("Signature verification failed"))
}

/// Encapsulates a fresh shared secret to an ML-KEM-1024 public key.
///
/// Returns the shared secret and the KEM ciphertext.
pub fn encapsulate(public_key: &PublicKey) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>)> {
    let key = public_key.as_mlkem1024()?;
    let (shared_secret, ciphertext) = mlkem1024::encapsulate(&key);
    Ok((
        Zeroizing::new(shared_secret.as_bytes().to_vec()),
        ciphertext.as_bytes().to_vec(),
    ))
}

/// Recovers the shared secret from a KEM ciphertext
pub fn decapsulate(private_key: &PrivateKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let key = private_key.as_mlkem1024()?;
    let ciphertext = Mlkem1024Ciphertext::from_bytes(ciphertext)
        .map_err(|_| PgpError::malformed("Invalid ML-KEM-1024 ciphertext length"))?;
    let shared_secret = mlkem1024::decapsulate(&ciphertext, &key);
    Ok(Zeroizing::new(shared_secret.as_bytes().to_vec()))
}

/// A session key wrapped to one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedSessionKey {
    /// ML-KEM-1024 ciphertext
    pub kem_ciphertext: Vec<u8>,
    /// Nonce followed by the AES-256-GCM sealed `[algo || key || checksum]`
    pub sealed: Vec<u8>,
}

fn derive_kek(shared_secret: &[u8], kem_ciphertext: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(Some(kem_ciphertext), shared_secret);
    let mut kek = Zeroizing::new([0u8; 32]);
    hk.expand(KEK_INFO, kek.as_mut())
        .map_err(|_| PgpError::invalid_input("HKDF output length rejected"))?;
    Ok(kek)
}

/// Wraps a session key for an ML-KEM-1024 recipient.
///
/// `aad` binds the wrapped key to the surrounding packet header.
pub fn wrap_session_key<R: CryptoRng + RngCore>(
    public_key: &PublicKey,
    session_key: &SessionKey,
    aad: &[u8],
    rng: &mut R,
) -> Result<WrappedSessionKey> {
    let (shared_secret, kem_ciphertext) = encapsulate(public_key)?;
    let kek = derive_kek(&shared_secret, &kem_ciphertext)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_ref()));

    let nonce_bytes = secure_random_bytes(rng, WRAP_NONCE_SIZE);
    let plaintext = session_key.to_checksummed();
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &plaintext,
                aad,
            },
        )
        .map_err(|_| PgpError::invalid_input("Failed to seal session key"))?;

    let mut sealed = nonce_bytes;
    sealed.extend_from_slice(&ciphertext);
    Ok(WrappedSessionKey {
        kem_ciphertext,
        sealed,
    })
}

/// Unwraps a session key with an ML-KEM-1024 private key.
///
/// A key that does not match the recipient fails with an authentication error.
pub fn unwrap_session_key(
    private_key: &PrivateKey,
    wrapped: &WrappedSessionKey,
    aad: &[u8],
) -> Result<SessionKey> {
    if wrapped.sealed.len() <= WRAP_NONCE_SIZE {
        return Err(PgpError::malformed("Wrapped session key too short"));
    }
    let shared_secret = decapsulate(private_key, &wrapped.kem_ciphertext)?;
    let kek = derive_kek(&shared_secret, &wrapped.kem_ciphertext)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_ref()));

    let (nonce, ciphertext) = wrapped.sealed.split_at(WRAP_NONCE_SIZE);
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| PgpError::authentication("Session key unwrap failed"))?,
    );
    SessionKey::from_checksummed(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SymmetricAlgorithm;
    use rand::rngs::OsRng;

    #[test]
    fn test_mldsa87_sign_verify() {
        let keypair = KeyPair::generate_mldsa87();
        let digest = [7u8; 32];

        let signature = sign(&keypair.private, &digest).unwrap();
        assert!(verify(&keypair.public, &digest, &signature));
        assert!(!verify(&keypair.public, &[8u8; 32], &signature));

        let err = verify_signature(&keypair.public, &[8u8; 32], &signature).unwrap_err();
        assert!(matches!(err, PgpError::InvalidSignature(_)));
    }

    #[test]
    fn test_verify_rejects_garbage_and_wrong_algorithm() {
        let dsa = KeyPair::generate_mldsa87();
        let kem = KeyPair::generate_mlkem1024();
        assert!(!verify(&dsa.public, b"digest", b"not a signature"));
        assert!(!verify(&kem.public, b"digest", &[0u8; 4627]));
        assert!(sign(&kem.private, b"digest").is_err());
    }

    #[test]
    fn test_encapsulation_roundtrip() {
        let keypair = KeyPair::generate_mlkem1024();
        let (shared, ciphertext) = encapsulate(&keypair.public).unwrap();
        let recovered = decapsulate(&keypair.private, &ciphertext).unwrap();
        assert_eq!(shared.as_slice(), recovered.as_slice());
    }

    #[test]
    fn test_session_key_wrap_roundtrip() {
        let mut rng = OsRng;
        let keypair = KeyPair::generate_mlkem1024();
        let session_key = SessionKey::generate(SymmetricAlgorithm::Aes256, &mut rng);

        let wrapped = wrap_session_key(&keypair.public, &session_key, b"hdr", &mut rng).unwrap();
        let unwrapped = unwrap_session_key(&keypair.private, &wrapped, b"hdr").unwrap();
        assert_eq!(unwrapped.algorithm(), SymmetricAlgorithm::Aes256);
        assert_eq!(unwrapped.as_bytes(), session_key.as_bytes());
    }

    #[test]
    fn test_unwrap_with_wrong_key_fails() {
        let mut rng = OsRng;
        let recipient = KeyPair::generate_mlkem1024();
        let other = KeyPair::generate_mlkem1024();
        let session_key = SessionKey::generate(SymmetricAlgorithm::Aes128, &mut rng);

        let wrapped = wrap_session_key(&recipient.public, &session_key, b"", &mut rng).unwrap();
        let err = unwrap_session_key(&other.private, &wrapped, b"").unwrap_err();
        assert!(matches!(err, PgpError::Authentication(_)));

        let err = unwrap_session_key(&recipient.private, &wrapped, b"other").unwrap_err();
        assert!(matches!(err, PgpError::Authentication(_)));
    }

    #[test]
    fn test_public_key_size_checked() {
        let err = PublicKey::from_bytes(PublicKeyAlgorithm::MlKem1024, vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, PgpError::MalformedPacket(_)));
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let keypair = KeyPair::generate_mldsa87();
        let debug = format!("{:?}", keypair.private);
        assert!(debug.contains("REDACTED"));
    }
}
