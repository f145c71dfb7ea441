//! Public-key and symmetric-key encrypted session key packets.

use crate::crypto::password::SALT_SIZE;
use crate::crypto::sym::GCM_NONCE_SIZE;
use crate::crypto::{
    decrypt_symmetric, derive_key, encrypt_symmetric, unwrap_session_key, wrap_session_key,
    AeadAlgorithm, Argon2Params, Password, PrivateKey, PublicKeyAlgorithm, SessionKey,
    SymmetricAlgorithm, WrappedSessionKey,
};
use crate::error::{PgpError, Result};
use crate::packet::key::{read_u16_field, read_vec, write_u16_field, PublicKeyPacket};
use crate::validation::Validator;
use byteorder::{BigEndian, ReadBytesExt};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use std::io::Read;
use zeroize::Zeroizing;

const PKESK_VERSION: u8 = 3;
const SKESK_VERSION: u8 = 6;
const S2K_TYPE_ARGON2: u8 = 4;
/// SKESK tag in new-format header form, used in the KEK derivation info
const SKESK_HEADER_OCTET: u8 = 0xC3;

/// Public-key encrypted session key packet (tag 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkeskPacket {
    /// Recipient key id; zero is a wildcard
    pub key_id: u64,
    pub pk_algorithm: PublicKeyAlgorithm,
    pub wrapped: WrappedSessionKey,
}

impl PkeskPacket {
    /// Wraps `session_key` for the recipient key
    pub fn wrap<R: CryptoRng + RngCore>(
        recipient: &PublicKeyPacket,
        session_key: &SessionKey,
        rng: &mut R,
    ) -> Result<Self> {
        if !recipient.algorithm().can_encrypt() {
            return Err(PgpError::invalid_input(format!(
                "{} keys cannot receive session keys",
                recipient.algorithm()
            )));
        }
        let key_id = recipient.key_id();
        let aad = Self::aad(key_id, recipient.algorithm());
        let wrapped = wrap_session_key(&recipient.key, session_key, &aad, rng)?;
        Ok(Self {
            key_id,
            pk_algorithm: recipient.algorithm(),
            wrapped,
        })
    }

    fn aad(key_id: u64, algorithm: PublicKeyAlgorithm) -> Vec<u8> {
        let mut aad = vec![PKESK_VERSION];
        aad.extend_from_slice(&key_id.to_be_bytes());
        aad.push(algorithm as u8);
        aad
    }

    /// True if the packet does not name its recipient
    pub fn is_wildcard(&self) -> bool {
        self.key_id == 0
    }

    /// Unwraps the session key with a candidate private key
    pub fn unwrap(&self, private: &PrivateKey) -> Result<SessionKey> {
        if private.algorithm() != self.pk_algorithm {
            return Err(PgpError::invalid_input(
                "Private key algorithm does not match session key packet",
            ));
        }
        unwrap_session_key(
            private,
            &self.wrapped,
            &Self::aad(self.key_id, self.pk_algorithm),
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![PKESK_VERSION];
        out.extend_from_slice(&self.key_id.to_be_bytes());
        out.push(self.pk_algorithm as u8);
        write_u16_field(&mut out, &self.wrapped.kem_ciphertext);
        write_u16_field(&mut out, &self.wrapped.sealed);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let short = || PgpError::malformed("Truncated session key packet");
        let mut reader = data;
        let version = reader.read_u8().map_err(|_| short())?;
        if version != PKESK_VERSION {
            return Err(PgpError::malformed(format!(
                "Unsupported PKESK version {}",
                version
            )));
        }
        let key_id = reader.read_u64::<BigEndian>().map_err(|_| short())?;
        let pk_algorithm = PublicKeyAlgorithm::try_from(reader.read_u8().map_err(|_| short())?)?;
        let kem_ciphertext = read_u16_field(&mut reader, "session key")?;
        let sealed = read_u16_field(&mut reader, "session key")?;
        if !reader.is_empty() {
            return Err(PgpError::malformed("Trailing data after session key packet"));
        }
        Ok(Self {
            key_id,
            pk_algorithm,
            wrapped: WrappedSessionKey {
                kem_ciphertext,
                sealed,
            },
        })
    }
}

/// Symmetric-key encrypted session key packet (tag 3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeskPacket {
    pub symmetric: SymmetricAlgorithm,
    pub aead: AeadAlgorithm,
    pub params: Argon2Params,
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; GCM_NONCE_SIZE],
    /// Session key sealed under the password-derived key
    pub encrypted_key: Vec<u8>,
}

impl SkeskPacket {
    fn info(symmetric: SymmetricAlgorithm, aead: AeadAlgorithm) -> [u8; 4] {
        [SKESK_HEADER_OCTET, SKESK_VERSION, symmetric as u8, aead as u8]
    }

    fn kek(
        password: &Password,
        salt: &[u8],
        params: Argon2Params,
        symmetric: SymmetricAlgorithm,
        info: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let ikm = derive_key(password, salt, params, symmetric.key_size())?;
        let hk = Hkdf::<Sha256>::new(None, &ikm);
        let mut kek = Zeroizing::new(vec![0u8; symmetric.key_size()]);
        hk.expand(info, &mut kek)
            .map_err(|_| PgpError::invalid_input("HKDF output length rejected"))?;
        Ok(kek)
    }

    /// Seals `session_key` under a password; an empty password is rejected
    pub fn encrypt<R: CryptoRng + RngCore>(
        session_key: &SessionKey,
        password: &Password,
        params: Argon2Params,
        rng: &mut R,
    ) -> Result<Self> {
        if password.is_empty() {
            return Err(PgpError::passphrase("Password cannot be empty"));
        }
        let symmetric = session_key.algorithm();
        let aead = AeadAlgorithm::Gcm;
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);
        let mut nonce = [0u8; GCM_NONCE_SIZE];
        rng.fill_bytes(&mut nonce);

        let info = Self::info(symmetric, aead);
        let kek = Self::kek(password, &salt, params, symmetric, &info)?;
        let encrypted_key =
            encrypt_symmetric(symmetric, &kek, &nonce, session_key.as_bytes(), &info)?;
        Ok(Self {
            symmetric,
            aead,
            params,
            salt,
            nonce,
            encrypted_key,
        })
    }

    /// Recovers the session key; a wrong password fails with a passphrase error
    pub fn decrypt(&self, password: &Password) -> Result<SessionKey> {
        let info = Self::info(self.symmetric, self.aead);
        let kek = Self::kek(password, &self.salt, self.params, self.symmetric, &info)?;
        let key = Zeroizing::new(
            decrypt_symmetric(self.symmetric, &kek, &self.nonce, &self.encrypted_key, &info)
                .map_err(|_| PgpError::passphrase("Wrong password for session key"))?,
        );
        SessionKey::from_bytes(self.symmetric, &key)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            SKESK_VERSION,
            self.symmetric as u8,
            self.aead as u8,
            S2K_TYPE_ARGON2,
        ];
        out.extend_from_slice(&self.salt);
        out.push(self.params.iterations);
        out.push(self.params.parallelism);
        out.push(self.params.memory_exponent);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.encrypted_key);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let short = || PgpError::malformed("Truncated symmetric session key packet");
        let mut reader = data;
        let version = reader.read_u8().map_err(|_| short())?;
        if version != SKESK_VERSION {
            return Err(PgpError::malformed(format!(
                "Unsupported SKESK version {}",
                version
            )));
        }
        let symmetric = SymmetricAlgorithm::try_from(reader.read_u8().map_err(|_| short())?)?;
        let aead = AeadAlgorithm::try_from(reader.read_u8().map_err(|_| short())?)?;
        let s2k = reader.read_u8().map_err(|_| short())?;
        if s2k != S2K_TYPE_ARGON2 {
            return Err(PgpError::unsupported(format!("S2K type {}", s2k)));
        }
        let mut salt = [0u8; SALT_SIZE];
        reader.read_exact(&mut salt).map_err(|_| short())?;
        let params = Argon2Params {
            iterations: reader.read_u8().map_err(|_| short())?,
            parallelism: reader.read_u8().map_err(|_| short())?,
            memory_exponent: reader.read_u8().map_err(|_| short())?,
        };
        Validator::validate_argon2_params(&params)?;
        let mut nonce = [0u8; GCM_NONCE_SIZE];
        reader.read_exact(&mut nonce).map_err(|_| short())?;
        let expected = symmetric.key_size() + aead.tag_size();
        let encrypted_key = read_vec(&mut reader, expected, "symmetric session key")?;
        if !reader.is_empty() {
            return Err(PgpError::malformed("Trailing data after SKESK packet"));
        }
        Ok(Self {
            symmetric,
            aead,
            params,
            salt,
            nonce,
            encrypted_key,
        })
    }
}
