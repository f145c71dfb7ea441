//! OpenPGP packet codec.
//!
//! Packets are parsed from a binary stream into the closed [`Packet`] enum and
//! serialized back with new-format headers and minimal length encodings. A
//! byte stream that was already canonical therefore round-trips unchanged,
//! while old-format, partial and indeterminate framings normalize.

pub mod data;
pub mod header;
pub mod key;
pub mod session_key;
pub mod signature;

pub use data::{
    CompressedDataPacket, CompressionAlgorithm, DataFormat, EncryptedDataPacket, LiteralDataPacket,
};
pub use header::{PacketHeader, PacketParser, RawPacket};
pub use key::{Fingerprint, PublicKeyPacket, SecretKeyPacket, SecretMaterial};
pub use session_key::{PkeskPacket, SkeskPacket};
pub use signature::{
    SignatureBuilder, SignaturePacket, SignatureType, Subpacket, SubpacketData,
};

use crate::armor;
use crate::error::{PgpError, Result};
use crate::validation::Validator;
use std::io::Read;
use tracing::warn;

/// Body of a marker packet
pub const MARKER_BODY: &[u8] = b"PGP";

/// PGP packet tags (RFC 4880 section 4.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Public-Key Encrypted Session Key Packet
    PublicKeyEncryptedSessionKey = 1,
    /// Signature Packet
    Signature = 2,
    /// Symmetric-Key Encrypted Session Key Packet
    SymmetricKeyEncryptedSessionKey = 3,
    /// Secret-Key Packet
    SecretKey = 5,
    /// Public-Key Packet
    PublicKey = 6,
    /// Secret-Subkey Packet
    SecretSubkey = 7,
    /// Compressed Data Packet
    CompressedData = 8,
    /// Marker Packet
    Marker = 10,
    /// Literal Data Packet
    LiteralData = 11,
    /// User ID Packet
    UserId = 13,
    /// Public-Subkey Packet
    PublicSubkey = 14,
    /// Sym. Encrypted and Integrity Protected Data Packet
    SymEncryptedIntegrityProtectedData = 18,
}

impl PacketType {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Maps a tag to a known packet type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::PublicKeyEncryptedSessionKey),
            2 => Some(Self::Signature),
            3 => Some(Self::SymmetricKeyEncryptedSessionKey),
            5 => Some(Self::SecretKey),
            6 => Some(Self::PublicKey),
            7 => Some(Self::SecretSubkey),
            8 => Some(Self::CompressedData),
            10 => Some(Self::Marker),
            11 => Some(Self::LiteralData),
            13 => Some(Self::UserId),
            14 => Some(Self::PublicSubkey),
            18 => Some(Self::SymEncryptedIntegrityProtectedData),
            _ => None,
        }
    }

    /// Tags in the non-critical range may be ignored by implementations
    /// that do not understand them.
    pub fn is_non_critical(tag: u8) -> bool {
        (40..=63).contains(&tag)
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    PublicKey(PublicKeyPacket),
    PublicSubkey(PublicKeyPacket),
    SecretKey(SecretKeyPacket),
    SecretSubkey(SecretKeyPacket),
    Signature(SignaturePacket),
    Pkesk(PkeskPacket),
    Skesk(SkeskPacket),
    EncryptedData(EncryptedDataPacket),
    LiteralData(LiteralDataPacket),
    CompressedData(CompressedDataPacket),
    Marker,
    UserId(String),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::PublicKey(_) => PacketType::PublicKey,
            Packet::PublicSubkey(_) => PacketType::PublicSubkey,
            Packet::SecretKey(_) => PacketType::SecretKey,
            Packet::SecretSubkey(_) => PacketType::SecretSubkey,
            Packet::Signature(_) => PacketType::Signature,
            Packet::Pkesk(_) => PacketType::PublicKeyEncryptedSessionKey,
            Packet::Skesk(_) => PacketType::SymmetricKeyEncryptedSessionKey,
            Packet::EncryptedData(_) => PacketType::SymEncryptedIntegrityProtectedData,
            Packet::LiteralData(_) => PacketType::LiteralData,
            Packet::CompressedData(_) => PacketType::CompressedData,
            Packet::Marker => PacketType::Marker,
            Packet::UserId(_) => PacketType::UserId,
        }
    }

    pub fn tag(&self) -> u8 {
        self.packet_type().to_byte()
    }

    /// Packet body without header
    pub fn body(&self) -> Vec<u8> {
        match self {
            Packet::PublicKey(p) | Packet::PublicSubkey(p) => p.to_bytes(),
            Packet::SecretKey(p) | Packet::SecretSubkey(p) => p.to_bytes(),
            Packet::Signature(p) => p.to_bytes(),
            Packet::Pkesk(p) => p.to_bytes(),
            Packet::Skesk(p) => p.to_bytes(),
            Packet::EncryptedData(p) => p.to_bytes(),
            Packet::LiteralData(p) => p.to_bytes(),
            Packet::CompressedData(p) => p.to_bytes(),
            Packet::Marker => MARKER_BODY.to_vec(),
            Packet::UserId(uid) => uid.as_bytes().to_vec(),
        }
    }

    /// Serialize with a canonical header
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body();
        let mut out = Vec::with_capacity(body.len() + 6);
        out.push(0xC0 | self.tag());
        out.extend_from_slice(&header::encode_length(body.len()));
        out.extend_from_slice(&body);
        out
    }

    /// Typed decode of a raw packet.
    ///
    /// Returns `Ok(None)` for non-critical tags that are skipped.
    pub fn from_raw(raw: &RawPacket) -> Result<Option<Self>> {
        let Some(packet_type) = PacketType::from_byte(raw.tag) else {
            if PacketType::is_non_critical(raw.tag) {
                warn!(tag = raw.tag, len = raw.body.len(), "skipping unknown packet");
                return Ok(None);
            }
            return Err(PgpError::UnknownPacketTag(raw.tag));
        };

        let body = raw.body.as_slice();
        let packet = match packet_type {
            PacketType::PublicKey => Packet::PublicKey(PublicKeyPacket::from_bytes(body)?),
            PacketType::PublicSubkey => Packet::PublicSubkey(PublicKeyPacket::from_bytes(body)?),
            PacketType::SecretKey => Packet::SecretKey(SecretKeyPacket::from_bytes(body)?),
            PacketType::SecretSubkey => Packet::SecretSubkey(SecretKeyPacket::from_bytes(body)?),
            PacketType::Signature => Packet::Signature(SignaturePacket::from_bytes(body)?),
            PacketType::PublicKeyEncryptedSessionKey => {
                Packet::Pkesk(PkeskPacket::from_bytes(body)?)
            }
            PacketType::SymmetricKeyEncryptedSessionKey => {
                Packet::Skesk(SkeskPacket::from_bytes(body)?)
            }
            PacketType::SymEncryptedIntegrityProtectedData => {
                Packet::EncryptedData(EncryptedDataPacket::from_bytes(body)?)
            }
            PacketType::LiteralData => Packet::LiteralData(LiteralDataPacket::from_bytes(body)?),
            PacketType::CompressedData => {
                Packet::CompressedData(CompressedDataPacket::from_bytes(body)?)
            }
            PacketType::Marker => {
                if body != MARKER_BODY {
                    return Err(PgpError::malformed("Invalid marker packet body"));
                }
                Packet::Marker
            }
            PacketType::UserId => {
                let uid = std::str::from_utf8(body)
                    .map_err(|_| PgpError::malformed("User ID is not valid UTF-8"))?;
                Validator::validate_user_id(uid)?;
                Packet::UserId(uid.to_string())
            }
        };
        Ok(Some(packet))
    }
}

/// Parses a packet stream from any reader
pub fn parse_reader<R: Read>(reader: R) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();
    for raw in PacketParser::new(reader) {
        if let Some(packet) = Packet::from_raw(&raw?)? {
            packets.push(packet);
        }
    }
    Ok(packets)
}

/// Parses binary or armored packet data
pub fn parse(data: &[u8]) -> Result<Vec<Packet>> {
    if armor::is_armored(data) {
        let (_, binary) = armor::decode(data)?;
        return parse_reader(binary.as_slice());
    }
    parse_reader(data)
}

/// Serializes packets in canonical form
pub fn serialize(packets: &[Packet]) -> Vec<u8> {
    packets.iter().flat_map(|p| p.to_bytes()).collect()
}
