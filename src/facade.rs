//! Byte and string surface for language bindings.
//!
//! Every call takes plain buffers (keys armored or binary) and returns plain
//! buffers. Failures surface as a [`FacadeError`] carrying a stable kind
//! string, so binding layers never see internal error types.

use crate::armor::{self, ArmorKind};
use crate::config::Config;
use crate::crypto::{Password, SessionKey, SymmetricAlgorithm};
use crate::error::PgpError;
use crate::key::{self, KeyRing};
use crate::message::{self, Decryptor, Encryptor, SignatureStatus};
use rand::rngs::OsRng;
use std::fmt;

/// Error returned across the binding boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacadeError {
    /// Stable snake_case kind, see [`crate::error::ErrorKind::as_str`]
    pub kind: String,
    pub message: String,
}

impl fmt::Display for FacadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FacadeError {}

impl From<PgpError> for FacadeError {
    fn from(error: PgpError) -> Self {
        Self {
            kind: error.kind().as_str().to_string(),
            message: error.to_string(),
        }
    }
}

pub type FacadeResult<T> = std::result::Result<T, FacadeError>;

/// Passphrase bytes; empty means none
fn optional_passphrase(bytes: &[u8]) -> Option<Password> {
    (!bytes.is_empty()).then(|| Password::from_bytes(bytes))
}

fn rings(keys: &[&[u8]]) -> FacadeResult<Vec<KeyRing>> {
    let mut out = Vec::with_capacity(keys.len());
    for data in keys {
        out.extend(key::import_many(data)?);
    }
    Ok(out)
}

fn cipher(name: &str) -> FacadeResult<SymmetricAlgorithm> {
    Ok(SymmetricAlgorithm::from_name(name)?)
}

/// Facade bound to one [`Config`]
#[derive(Debug, Clone, Default)]
pub struct Facade {
    config: Config,
}

impl Facade {
    pub fn new(config: Config) -> FacadeResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Encrypts to every key in `public_keys`; each entry may hold several rings
    pub fn encrypt(&self, public_keys: &[&[u8]], plaintext: &[u8]) -> FacadeResult<Vec<u8>> {
        let rings = rings(public_keys)?;
        Ok(Encryptor::new(&self.config)
            .recipients(rings.iter())
            .encrypt(plaintext, &mut OsRng)?)
    }

    /// Decrypts with the private keys in `private_keys`
    pub fn decrypt(
        &self,
        private_keys: &[&[u8]],
        passphrase: &[u8],
        ciphertext: &[u8],
    ) -> FacadeResult<Vec<u8>> {
        let rings = rings(private_keys)?;
        let passphrase = optional_passphrase(passphrase);
        let mut decryptor = Decryptor::new(&self.config).keys(rings.iter());
        if let Some(passphrase) = passphrase.as_ref() {
            decryptor = decryptor.passphrase(passphrase);
        }
        Ok(decryptor.decrypt(ciphertext)?.data)
    }

    /// Detached binary signature over `data`
    pub fn sign(&self, private_key: &[u8], passphrase: &[u8], data: &[u8]) -> FacadeResult<Vec<u8>> {
        let ring = key::import_key(private_key)?;
        let passphrase = optional_passphrase(passphrase);
        Ok(message::sign_detached(
            &ring,
            passphrase.as_ref(),
            data,
            false,
            &self.config,
        )?)
    }

    pub fn verify(
        &self,
        public_keys: &[&[u8]],
        data: &[u8],
        signature: &[u8],
    ) -> FacadeResult<SignatureStatus> {
        let rings = rings(public_keys)?;
        let verifiers: Vec<&KeyRing> = rings.iter().collect();
        let (status, _) =
            message::verify_detached(&verifiers, data, signature, self.config.now())?;
        Ok(status)
    }

    /// New key ring, returned as an armored private key block
    pub fn generate_key(&self, name: &str, email: &str, passphrase: &[u8]) -> FacadeResult<Vec<u8>> {
        let passphrase = optional_passphrase(passphrase);
        let ring = key::generate(name, email, passphrase.as_ref(), &self.config, &mut OsRng)?;
        Ok(key::export_key_armored(&ring, true)?.into_bytes())
    }

    /// Armored public part of a key, private material stripped
    pub fn public_key(&self, key_data: &[u8]) -> FacadeResult<Vec<u8>> {
        let ring = key::import_key(key_data)?;
        Ok(key::export_key_armored(&ring, false)?.into_bytes())
    }

    /// Encrypts under a password
    pub fn encrypt_with_password(&self, password: &[u8], plaintext: &[u8]) -> FacadeResult<Vec<u8>> {
        let password = Password::from_bytes(password);
        Ok(message::encrypt_with_password(
            &password,
            plaintext,
            &self.config,
            &mut OsRng,
        )?)
    }

    pub fn decrypt_with_password(&self, password: &[u8], ciphertext: &[u8]) -> FacadeResult<Vec<u8>> {
        let password = Password::from_bytes(password);
        Ok(message::decrypt_with_password(&password, ciphertext, &self.config)?.data)
    }

    /// Session key and cipher name from the key packets of a message
    pub fn decrypt_session_key(
        &self,
        key_packets: &[u8],
        private_keys: &[&[u8]],
        passphrase: &[u8],
    ) -> FacadeResult<(Vec<u8>, String)> {
        let rings = rings(private_keys)?;
        let refs: Vec<&KeyRing> = rings.iter().collect();
        let passphrase = optional_passphrase(passphrase);
        let session_key = message::decrypt_session_key(key_packets, &refs, passphrase.as_ref())?;
        Ok(session_key_parts(&session_key))
    }

    /// Key packet wrapping `key` for the encryption key of `public_key`
    pub fn encrypt_session_key(
        &self,
        key: &[u8],
        algorithm: &str,
        public_key: &[u8],
    ) -> FacadeResult<Vec<u8>> {
        let session_key = SessionKey::from_bytes(cipher(algorithm)?, key)?;
        let ring = key::import_key(public_key)?;
        Ok(message::encrypt_session_key(
            &session_key,
            &ring,
            self.config.now(),
            &mut OsRng,
        )?)
    }

    pub fn decrypt_session_key_with_password(
        &self,
        key_packets: &[u8],
        password: &[u8],
    ) -> FacadeResult<(Vec<u8>, String)> {
        let password = Password::from_bytes(password);
        let session_key = message::decrypt_session_key_with_password(key_packets, &password)?;
        Ok(session_key_parts(&session_key))
    }

    pub fn encrypt_session_key_with_password(
        &self,
        key: &[u8],
        algorithm: &str,
        password: &[u8],
    ) -> FacadeResult<Vec<u8>> {
        let session_key = SessionKey::from_bytes(cipher(algorithm)?, key)?;
        let password = Password::from_bytes(password);
        Ok(message::encrypt_session_key_with_password(
            &session_key,
            &password,
            self.config.argon2,
            &mut OsRng,
        )?)
    }

    /// Opens a bare data packet with a raw session key
    pub fn decrypt_data_packet(
        &self,
        data_packet: &[u8],
        key: &[u8],
        algorithm: &str,
    ) -> FacadeResult<Vec<u8>> {
        let session_key = SessionKey::from_bytes(cipher(algorithm)?, key)?;
        Ok(message::decrypt_data_packet(data_packet, &session_key, &[], self.config.now())?.data)
    }
}

fn session_key_parts(session_key: &SessionKey) -> (Vec<u8>, String) {
    (
        session_key.as_bytes().to_vec(),
        session_key.algorithm().name().to_string(),
    )
}

/// Encrypts with the default configuration
pub fn encrypt(public_keys: &[&[u8]], plaintext: &[u8]) -> FacadeResult<Vec<u8>> {
    Facade::default().encrypt(public_keys, plaintext)
}

pub fn decrypt(private_keys: &[&[u8]], passphrase: &[u8], ciphertext: &[u8]) -> FacadeResult<Vec<u8>> {
    Facade::default().decrypt(private_keys, passphrase, ciphertext)
}

pub fn sign(private_key: &[u8], passphrase: &[u8], data: &[u8]) -> FacadeResult<Vec<u8>> {
    Facade::default().sign(private_key, passphrase, data)
}

pub fn verify(
    public_keys: &[&[u8]],
    data: &[u8],
    signature: &[u8],
) -> FacadeResult<SignatureStatus> {
    Facade::default().verify(public_keys, data, signature)
}

pub fn generate_key(name: &str, email: &str, passphrase: &[u8]) -> FacadeResult<Vec<u8>> {
    Facade::default().generate_key(name, email, passphrase)
}

pub fn public_key(key_data: &[u8]) -> FacadeResult<Vec<u8>> {
    Facade::default().public_key(key_data)
}

/// Armors a binary message
pub fn armor(data: &[u8]) -> String {
    armor::encode(ArmorKind::Message, data)
}

/// Removes armor of any block type
pub fn dearmor(armored: &str) -> FacadeResult<Vec<u8>> {
    let (_, data) = armor::decode(armored.as_bytes())?;
    Ok(data)
}

/// 32 random bytes
pub fn random_token() -> Vec<u8> {
    message::random_token(&mut OsRng)
}

pub fn random_token_with(size: usize) -> FacadeResult<Vec<u8>> {
    Ok(message::random_token_with(size, &mut OsRng)?)
}

/// Splits a message into `(key_packets, data_packet)`
pub fn split_message(message: &[u8]) -> FacadeResult<(Vec<u8>, Vec<u8>)> {
    let split = message::split_message(message)?;
    Ok((split.key_packets, split.data_packet))
}
