//! Version 4 public and secret key packets.

use crate::crypto::password::SALT_SIZE;
use crate::crypto::sym::GCM_NONCE_SIZE;
use crate::crypto::{
    bytes_equal, hash_data, AeadAlgorithm, Argon2Params, Password, PrivateKey, ProtectedSecret,
    PublicKey, PublicKeyAlgorithm, SymmetricAlgorithm,
};
use crate::error::{PgpError, Result};
use crate::validation::Validator;
use byteorder::{BigEndian, ReadBytesExt};
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::io::Read;
use zeroize::Zeroizing;

const KEY_VERSION: u8 = 4;
const S2K_USAGE_PLAIN: u8 = 0;
const S2K_USAGE_AEAD: u8 = 253;
const S2K_TYPE_ARGON2: u8 = 4;

/// SHA3-256 fingerprint of a v4 public key
#[derive(Clone, Copy, Hash, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Key id: the low 64 bits of the fingerprint
    pub fn key_id(&self) -> u64 {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[24..]);
        u64::from_be_bytes(id)
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        bytes_equal(&self.0, &other.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Public key or public subkey packet body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyPacket {
    /// Key creation time (Unix timestamp)
    pub created: u32,
    /// Public key material
    pub key: PublicKey,
}

impl PublicKeyPacket {
    pub fn new(key: PublicKey, created: u32) -> Self {
        Self { created, key }
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.key.algorithm()
    }

    /// Serialize to packet body bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let material = self.key.as_bytes();
        let mut bytes = Vec::with_capacity(8 + material.len());
        bytes.push(KEY_VERSION);
        bytes.extend_from_slice(&self.created.to_be_bytes());
        bytes.push(self.algorithm() as u8);
        bytes.extend_from_slice(&((material.len() * 8) as u16).to_be_bytes());
        bytes.extend_from_slice(material);
        bytes
    }

    /// Parse from the front of a packet body, returning the consumed length
    pub fn parse_prefix(data: &[u8]) -> Result<(Self, usize)> {
        let mut reader = data;
        let version = reader.read_u8().map_err(|_| short("public key"))?;
        if version != KEY_VERSION {
            return Err(PgpError::malformed(format!(
                "Unsupported key version: {}",
                version
            )));
        }
        let created = reader
            .read_u32::<BigEndian>()
            .map_err(|_| short("public key"))?;
        let algorithm =
            PublicKeyAlgorithm::try_from(reader.read_u8().map_err(|_| short("public key"))?)?;

        let bit_len = reader
            .read_u16::<BigEndian>()
            .map_err(|_| short("public key"))? as usize;
        let byte_len = bit_len.div_ceil(8);
        Validator::validate_key_size(byte_len)?;
        let material = Validator::validate_slice_extraction(data, 8, byte_len)?.to_vec();

        let key = PublicKey::from_bytes(algorithm, material)?;
        Ok((Self { created, key }, 8 + byte_len))
    }

    /// Parse a complete public key packet body
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (packet, used) = Self::parse_prefix(data)?;
        if used != data.len() {
            return Err(PgpError::malformed("Trailing data after public key"));
        }
        Ok(packet)
    }

    /// Bytes hashed for fingerprints and key signatures: `0x99 || len || body`
    pub fn hash_context(&self) -> Vec<u8> {
        let body = self.to_bytes();
        let mut ctx = Vec::with_capacity(3 + body.len());
        ctx.push(0x99);
        ctx.extend_from_slice(&(body.len() as u16).to_be_bytes());
        ctx.extend_from_slice(&body);
        ctx
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(hash_data(&self.hash_context()))
    }

    pub fn key_id(&self) -> u64 {
        self.fingerprint().key_id()
    }
}

fn short(what: &str) -> PgpError {
    PgpError::malformed(format!("Truncated {} packet", what))
}

/// How secret key material is stored
#[derive(Clone, PartialEq, Eq)]
pub enum SecretMaterial {
    /// Unprotected material
    Plain(Zeroizing<Vec<u8>>),
    /// Argon2id + AES-256-GCM protected material
    Protected(ProtectedSecret),
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretMaterial::Plain(_) => f.write_str("Plain([REDACTED])"),
            SecretMaterial::Protected(p) => f
                .debug_struct("Protected")
                .field("params", &p.params)
                .field("size", &p.ciphertext.len())
                .finish(),
        }
    }
}

/// Secret key or secret subkey packet body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeyPacket {
    pub public: PublicKeyPacket,
    pub secret: SecretMaterial,
}

impl SecretKeyPacket {
    /// Stores `private` unprotected
    pub fn new_plain(public: PublicKeyPacket, private: &PrivateKey) -> Self {
        Self {
            public,
            secret: SecretMaterial::Plain(Zeroizing::new(private.as_bytes().to_vec())),
        }
    }

    /// Seals `private` under `password`, bound to the public key body
    pub fn new_protected<R: CryptoRng + RngCore>(
        public: PublicKeyPacket,
        private: &PrivateKey,
        password: &Password,
        params: Argon2Params,
        rng: &mut R,
    ) -> Result<Self> {
        let aad = public.to_bytes();
        let sealed = ProtectedSecret::seal(private.as_bytes(), password, params, &aad, rng)?;
        Ok(Self {
            public,
            secret: SecretMaterial::Protected(sealed),
        })
    }

    pub fn is_protected(&self) -> bool {
        matches!(self.secret, SecretMaterial::Protected(_))
    }

    /// Returns the unlocked private key.
    ///
    /// Protected material needs a password; a missing or wrong one fails with
    /// a passphrase error.
    pub fn unlock(&self, password: Option<&Password>) -> Result<PrivateKey> {
        let algorithm = self.public.algorithm();
        match &self.secret {
            SecretMaterial::Plain(bytes) => PrivateKey::from_bytes(algorithm, bytes.clone()),
            SecretMaterial::Protected(sealed) => {
                let password = password
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| PgpError::passphrase("Passphrase required for protected key"))?;
                let bytes = sealed.open(password, &self.public.to_bytes())?;
                PrivateKey::from_bytes(algorithm, bytes)
            }
        }
    }

    /// Serialize to packet body bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.public.to_bytes();
        match &self.secret {
            SecretMaterial::Plain(material) => {
                bytes.push(S2K_USAGE_PLAIN);
                bytes.extend_from_slice(&(material.len() as u32).to_be_bytes());
                bytes.extend_from_slice(material);
                let checksum = material
                    .iter()
                    .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
                bytes.extend_from_slice(&checksum.to_be_bytes());
            }
            SecretMaterial::Protected(sealed) => {
                bytes.push(S2K_USAGE_AEAD);
                bytes.push(SymmetricAlgorithm::Aes256 as u8);
                bytes.push(AeadAlgorithm::Gcm as u8);
                bytes.push(S2K_TYPE_ARGON2);
                bytes.extend_from_slice(&sealed.salt);
                bytes.push(sealed.params.iterations);
                bytes.push(sealed.params.parallelism);
                bytes.push(sealed.params.memory_exponent);
                bytes.extend_from_slice(&sealed.nonce);
                bytes.extend_from_slice(&(sealed.ciphertext.len() as u32).to_be_bytes());
                bytes.extend_from_slice(&sealed.ciphertext);
            }
        }
        bytes
    }

    /// Parse from packet body bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (public, offset) = PublicKeyPacket::parse_prefix(data)?;
        let mut reader = &data[offset..];

        let usage = reader.read_u8().map_err(|_| short("secret key"))?;
        let secret = match usage {
            S2K_USAGE_PLAIN => {
                let len = reader
                    .read_u32::<BigEndian>()
                    .map_err(|_| short("secret key"))? as usize;
                Validator::validate_key_size(len)?;
                let material = Zeroizing::new(read_vec(&mut reader, len, "secret key")?);
                let checksum = reader
                    .read_u16::<BigEndian>()
                    .map_err(|_| short("secret key"))?;
                let computed = material
                    .iter()
                    .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
                if checksum != computed {
                    return Err(PgpError::malformed("Secret key checksum mismatch"));
                }
                SecretMaterial::Plain(material)
            }
            S2K_USAGE_AEAD => {
                let sym = reader.read_u8().map_err(|_| short("secret key"))?;
                let sym = SymmetricAlgorithm::try_from(sym)?;
                let aead = reader.read_u8().map_err(|_| short("secret key"))?;
                let aead = AeadAlgorithm::try_from(aead)?;
                if sym != SymmetricAlgorithm::Aes256 || aead != AeadAlgorithm::Gcm {
                    return Err(PgpError::unsupported(
                        "Secret keys must be protected with AES-256-GCM",
                    ));
                }
                let s2k = reader.read_u8().map_err(|_| short("secret key"))?;
                if s2k != S2K_TYPE_ARGON2 {
                    return Err(PgpError::unsupported(format!("S2K type {}", s2k)));
                }
                let mut salt = [0u8; SALT_SIZE];
                reader
                    .read_exact(&mut salt)
                    .map_err(|_| short("secret key"))?;
                let mut param_bytes = [0u8; 3];
                reader
                    .read_exact(&mut param_bytes)
                    .map_err(|_| short("secret key"))?;
                let params = Argon2Params {
                    iterations: param_bytes[0],
                    parallelism: param_bytes[1],
                    memory_exponent: param_bytes[2],
                };
                Validator::validate_argon2_params(&params)?;
                let mut nonce = [0u8; GCM_NONCE_SIZE];
                reader
                    .read_exact(&mut nonce)
                    .map_err(|_| short("secret key"))?;
                let len = reader
                    .read_u32::<BigEndian>()
                    .map_err(|_| short("secret key"))? as usize;
                Validator::validate_key_size(len)?;
                let ciphertext = read_vec(&mut reader, len, "secret key")?;
                SecretMaterial::Protected(ProtectedSecret {
                    params,
                    salt,
                    nonce,
                    ciphertext,
                })
            }
            other => {
                return Err(PgpError::unsupported(format!("S2K usage {}", other)));
            }
        };

        if !reader.is_empty() {
            return Err(PgpError::malformed("Trailing data after secret key"));
        }
        Ok(Self { public, secret })
    }
}

/// Reads exactly `len` bytes from a slice reader
pub(crate) fn read_vec(reader: &mut &[u8], len: usize, what: &str) -> Result<Vec<u8>> {
    if reader.len() < len {
        return Err(short(what));
    }
    let (head, tail) = reader.split_at(len);
    *reader = tail;
    Ok(head.to_vec())
}

/// Writes a u16 length-prefixed field
pub(crate) fn write_u16_field(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

/// Reads a u16 length-prefixed field
pub(crate) fn read_u16_field(reader: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    let len = reader.read_u16::<BigEndian>().map_err(|_| short(what))? as usize;
    read_vec(reader, len, what)
}
