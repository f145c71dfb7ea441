//! Message pipelines: encrypt, decrypt, sign and verify.
//!
//! Encrypted messages are a run of session key packets (one PKESK per
//! recipient key, one SKESK per password) followed by a single SEIPD v2
//! packet. The SEIPD plaintext is a packet stream holding optional
//! signatures and exactly one literal data packet, possibly wrapped in a
//! compressed data packet.

pub mod decrypt;
pub mod encrypt;
pub mod session;
pub mod sign;

pub use decrypt::{decrypt, decrypt_with_password, Decryptor};
pub use encrypt::{encrypt, encrypt_and_sign, encrypt_with_password, Encryptor};
pub use session::{
    decrypt_data_packet, decrypt_session_key, decrypt_session_key_with_password,
    encrypt_session_key, encrypt_session_key_with_password, random_token, random_token_with,
    split_message, SplitMessage,
};
pub use sign::{sign_detached, sign_inline, verify_detached, verify_inline, VerifiedMessage};

use crate::error::{PgpError, Result};
use crate::packet::{self, Fingerprint, LiteralDataPacket, Packet, SignaturePacket};
use crate::validation::Validator;
use std::fmt;

/// Outcome of checking a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureStatus {
    Valid,
    /// Bad signature, or made by a revoked or unbound key
    Invalid,
    /// No supplied key matches the issuer
    KeyNotFound,
    /// The signature or the signing key had expired
    Expired,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Valid => "valid",
            SignatureStatus::Invalid => "invalid",
            SignatureStatus::KeyNotFound => "key_not_found",
            SignatureStatus::Expired => "expired",
        }
    }

    pub fn is_valid(&self) -> bool {
        *self == SignatureStatus::Valid
    }

    /// Ordering used when a message carries several signatures
    fn rank(&self) -> u8 {
        match self {
            SignatureStatus::Valid => 3,
            SignatureStatus::Expired => 2,
            SignatureStatus::Invalid => 1,
            SignatureStatus::KeyNotFound => 0,
        }
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub data: Vec<u8>,
    /// File name from the literal data packet, often empty
    pub file_name: Vec<u8>,
    /// `None` when the message was not signed
    pub signature_status: Option<SignatureStatus>,
    /// Key that made the best-ranked signature, if it was found
    pub signer: Option<Fingerprint>,
}

/// Literal data plus the signatures that cover it
#[derive(Debug)]
pub(crate) struct Content {
    pub literal: LiteralDataPacket,
    pub signatures: Vec<SignaturePacket>,
}

/// Collects signatures and the literal data packet from a decrypted or
/// signed packet stream, unpacking compressed data up to the nesting limit.
pub(crate) fn read_content(packets: Vec<Packet>) -> Result<Content> {
    let mut literal = None;
    let mut signatures = Vec::new();
    collect_content(packets, 0, &mut literal, &mut signatures)?;
    let literal = literal.ok_or_else(|| PgpError::malformed("Message has no literal data"))?;
    Ok(Content {
        literal,
        signatures,
    })
}

fn collect_content(
    packets: Vec<Packet>,
    depth: usize,
    literal: &mut Option<LiteralDataPacket>,
    signatures: &mut Vec<SignaturePacket>,
) -> Result<()> {
    Validator::validate_nesting_depth(depth)?;
    for packet in packets {
        match packet {
            Packet::Signature(sig) => signatures.push(sig),
            Packet::LiteralData(data) => {
                if literal.replace(data).is_some() {
                    return Err(PgpError::malformed("Message has more than one literal data packet"));
                }
            }
            Packet::CompressedData(compressed) => {
                let inner = packet::parse_reader(compressed.decompress()?.as_slice())?;
                collect_content(inner, depth + 1, literal, signatures)?;
            }
            Packet::Marker => {}
            other => {
                return Err(PgpError::malformed(format!(
                    "Unexpected {:?} packet in message content",
                    other.packet_type()
                )))
            }
        }
    }
    Ok(())
}
