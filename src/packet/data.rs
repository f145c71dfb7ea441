//! Literal, compressed and encrypted data packets.

use crate::cancel::CancellationToken;
use crate::crypto::aead::{chunk_size, SALT_SIZE};
use crate::crypto::{AeadAlgorithm, ChunkedAead, SessionKey, SymmetricAlgorithm};
use crate::error::{PgpError, Result};
use crate::packet::key::read_vec;
use crate::validation::{Validator, MAX_MESSAGE_SIZE};
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Literal data format octet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Binary = b'b' as isize,
    Text = b't' as isize,
    Utf8 = b'u' as isize,
}

impl TryFrom<u8> for DataFormat {
    type Error = PgpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            b'b' => Ok(Self::Binary),
            b't' => Ok(Self::Text),
            b'u' => Ok(Self::Utf8),
            other => Err(PgpError::malformed(format!(
                "Unknown literal data format {:#04x}",
                other
            ))),
        }
    }
}

/// Literal data packet (tag 11)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralDataPacket {
    pub format: DataFormat,
    pub file_name: Vec<u8>,
    pub date: u32,
    pub data: Vec<u8>,
}

impl LiteralDataPacket {
    pub fn binary(data: Vec<u8>, date: u32) -> Self {
        Self {
            format: DataFormat::Binary,
            file_name: Vec::new(),
            date,
            data,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.file_name.len() + self.data.len());
        out.push(self.format as u8);
        out.push(self.file_name.len() as u8);
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.date.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let short = || PgpError::malformed("Truncated literal data packet");
        let mut reader = data;
        let format = DataFormat::try_from(reader.read_u8().map_err(|_| short())?)?;
        let name_len = reader.read_u8().map_err(|_| short())? as usize;
        let file_name = read_vec(&mut reader, name_len, "literal data")?;
        let date = reader.read_u32::<BigEndian>().map_err(|_| short())?;
        Validator::validate_message_size(reader)?;
        Ok(Self {
            format,
            file_name,
            date,
            data: reader.to_vec(),
        })
    }
}

/// Compression algorithms for compressed data packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Uncompressed = 0,
    /// Raw DEFLATE
    Zip = 1,
    Zlib = 2,
}

impl TryFrom<u8> for CompressionAlgorithm {
    type Error = PgpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Uncompressed),
            1 => Ok(Self::Zip),
            2 => Ok(Self::Zlib),
            other => Err(PgpError::unsupported(format!(
                "compression algorithm id {}",
                other
            ))),
        }
    }
}

/// Compressed data packet (tag 8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedDataPacket {
    pub algorithm: CompressionAlgorithm,
    /// Compressed packet stream, kept as received
    pub compressed: Vec<u8>,
}

impl CompressedDataPacket {
    /// Compresses a serialized packet stream
    pub fn compress(algorithm: CompressionAlgorithm, packets: &[u8]) -> Result<Self> {
        let compressed = match algorithm {
            CompressionAlgorithm::Uncompressed => packets.to_vec(),
            CompressionAlgorithm::Zip => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(packets)?;
                encoder.finish()?
            }
            CompressionAlgorithm::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(packets)?;
                encoder.finish()?
            }
        };
        Ok(Self {
            algorithm,
            compressed,
        })
    }

    /// Decompresses the inner packet stream, bounded by the message size limit
    pub fn decompress(&self) -> Result<Vec<u8>> {
        let limit = MAX_MESSAGE_SIZE as u64 + 1;
        let mut out = Vec::new();
        let read = match self.algorithm {
            CompressionAlgorithm::Uncompressed => {
                self.compressed.as_slice().take(limit).read_to_end(&mut out)
            }
            CompressionAlgorithm::Zip => DeflateDecoder::new(self.compressed.as_slice())
                .take(limit)
                .read_to_end(&mut out),
            CompressionAlgorithm::Zlib => ZlibDecoder::new(self.compressed.as_slice())
                .take(limit)
                .read_to_end(&mut out),
        };
        read.map_err(|e| PgpError::malformed(format!("Decompression failed: {}", e)))?;
        Validator::validate_message_size(&out)?;
        Ok(out)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.compressed.len());
        out.push(self.algorithm as u8);
        out.extend_from_slice(&self.compressed);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (&algorithm, compressed) = data
            .split_first()
            .ok_or_else(|| PgpError::malformed("Empty compressed data packet"))?;
        Ok(Self {
            algorithm: CompressionAlgorithm::try_from(algorithm)?,
            compressed: compressed.to_vec(),
        })
    }
}

const SEIPD_VERSION: u8 = 2;

/// Symmetrically encrypted integrity protected data, version 2 (tag 18)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedDataPacket {
    pub symmetric: SymmetricAlgorithm,
    pub aead: AeadAlgorithm,
    pub chunk_size_octet: u8,
    pub salt: [u8; SALT_SIZE],
    /// AEAD chunks followed by the final tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedDataPacket {
    /// Encrypts a serialized packet stream under `session_key`
    pub fn encrypt<R: CryptoRng + RngCore>(
        session_key: &SessionKey,
        chunk_size_octet: u8,
        plaintext: &[u8],
        cancel: &CancellationToken,
        rng: &mut R,
    ) -> Result<Self> {
        let aead = AeadAlgorithm::Gcm;
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);
        let cipher = ChunkedAead::new(session_key, aead, chunk_size_octet, &salt)?;
        let ciphertext = cipher.encrypt(plaintext, cancel)?;
        Ok(Self {
            symmetric: session_key.algorithm(),
            aead,
            chunk_size_octet,
            salt,
            ciphertext,
        })
    }

    /// Decrypts and authenticates the packet stream
    pub fn decrypt(&self, session_key: &SessionKey, cancel: &CancellationToken) -> Result<Vec<u8>> {
        if session_key.algorithm() != self.symmetric {
            return Err(PgpError::authentication(
                "Session key cipher does not match encrypted data",
            ));
        }
        let cipher = ChunkedAead::new(session_key, self.aead, self.chunk_size_octet, &self.salt)?;
        cipher.decrypt(&self.ciphertext, cancel)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + SALT_SIZE + self.ciphertext.len());
        out.push(SEIPD_VERSION);
        out.push(self.symmetric as u8);
        out.push(self.aead as u8);
        out.push(self.chunk_size_octet);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let short = || PgpError::malformed("Truncated encrypted data packet");
        let mut reader = data;
        let version = reader.read_u8().map_err(|_| short())?;
        if version != SEIPD_VERSION {
            return Err(PgpError::malformed(format!(
                "Unsupported encrypted data version {}",
                version
            )));
        }
        let symmetric = SymmetricAlgorithm::try_from(reader.read_u8().map_err(|_| short())?)?;
        let aead = AeadAlgorithm::try_from(reader.read_u8().map_err(|_| short())?)?;
        let chunk_size_octet = reader.read_u8().map_err(|_| short())?;
        chunk_size(chunk_size_octet)?;
        let mut salt = [0u8; SALT_SIZE];
        reader.read_exact(&mut salt).map_err(|_| short())?;
        if reader.len() < aead.tag_size() {
            return Err(short());
        }
        Validator::validate_encrypted_size(reader)?;
        Ok(Self {
            symmetric,
            aead,
            chunk_size_octet,
            salt,
            ciphertext: reader.to_vec(),
        })
    }
}
