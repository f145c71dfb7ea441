//! Version 4 signature packets, subpackets and signature hashing.
//!
//! The signed digest covers, in order: a context that depends on the
//! signature type (document bytes, key framing, user id framing), the hashed
//! portion of the signature body, and the v4 trailer `0x04 0xFF || u32 len`.

use crate::crypto::{sign, verify_signature, HashAlgorithm, Hasher, KeyUsage, PrivateKey};
use crate::crypto::{PublicKey, PublicKeyAlgorithm};
use crate::error::{PgpError, Result};
use crate::packet::header::{encode_length, read_subpacket_length};
use crate::packet::key::{read_vec, Fingerprint, PublicKeyPacket};
use crate::validation::Validator;
use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

const SIGNATURE_VERSION: u8 = 4;

/// Revocation reason codes carried in reason-for-revocation subpackets
pub mod reason {
    pub const NO_REASON: u8 = 0;
    pub const KEY_SUPERSEDED: u8 = 1;
    pub const KEY_COMPROMISED: u8 = 2;
    pub const KEY_RETIRED: u8 = 3;
    pub const USER_ID_INVALID: u8 = 32;
}

/// Signature types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    /// Signature over a binary document
    Binary = 0x00,
    /// Signature over a canonical text document
    Text = 0x01,
    GenericCertification = 0x10,
    PersonaCertification = 0x11,
    CasualCertification = 0x12,
    PositiveCertification = 0x13,
    SubkeyBinding = 0x18,
    DirectKey = 0x1F,
    KeyRevocation = 0x20,
    SubkeyRevocation = 0x28,
    /// Certification revocation; with a signature target it reverses a revocation
    CertificationRevocation = 0x30,
}

impl SignatureType {
    pub fn is_certification(&self) -> bool {
        matches!(
            self,
            SignatureType::GenericCertification
                | SignatureType::PersonaCertification
                | SignatureType::CasualCertification
                | SignatureType::PositiveCertification
        )
    }

    pub fn is_revocation(&self) -> bool {
        matches!(
            self,
            SignatureType::KeyRevocation | SignatureType::SubkeyRevocation
        )
    }
}

impl TryFrom<u8> for SignatureType {
    type Error = PgpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Binary),
            0x01 => Ok(Self::Text),
            0x10 => Ok(Self::GenericCertification),
            0x11 => Ok(Self::PersonaCertification),
            0x12 => Ok(Self::CasualCertification),
            0x13 => Ok(Self::PositiveCertification),
            0x18 => Ok(Self::SubkeyBinding),
            0x1F => Ok(Self::DirectKey),
            0x20 => Ok(Self::KeyRevocation),
            0x28 => Ok(Self::SubkeyRevocation),
            0x30 => Ok(Self::CertificationRevocation),
            other => Err(PgpError::malformed(format!(
                "Unknown signature type {:#04x}",
                other
            ))),
        }
    }
}

/// Decoded subpacket contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubpacketData {
    SignatureCreationTime(u32),
    /// Seconds after creation; zero means no expiry
    SignatureExpirationTime(u32),
    /// Seconds after key creation; zero means no expiry
    KeyExpirationTime(u32),
    Issuer(u64),
    PrimaryUserId(bool),
    KeyFlags(Vec<u8>),
    RevocationReason { code: u8, reason: Vec<u8> },
    SignatureTarget {
        pk_algorithm: u8,
        hash_algorithm: u8,
        digest: Vec<u8>,
    },
    IssuerFingerprint { version: u8, fingerprint: Vec<u8> },
    /// Any subpacket type not decoded above, kept verbatim
    Other { tag: u8, data: Vec<u8> },
}

/// One signature subpacket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subpacket {
    pub critical: bool,
    pub data: SubpacketData,
}

impl Subpacket {
    pub fn new(data: SubpacketData) -> Self {
        Self {
            critical: false,
            data,
        }
    }

    pub fn critical(data: SubpacketData) -> Self {
        Self {
            critical: true,
            data,
        }
    }

    fn tag(&self) -> u8 {
        match &self.data {
            SubpacketData::SignatureCreationTime(_) => 2,
            SubpacketData::SignatureExpirationTime(_) => 3,
            SubpacketData::KeyExpirationTime(_) => 9,
            SubpacketData::Issuer(_) => 16,
            SubpacketData::PrimaryUserId(_) => 25,
            SubpacketData::KeyFlags(_) => 27,
            SubpacketData::RevocationReason { .. } => 29,
            SubpacketData::SignatureTarget { .. } => 31,
            SubpacketData::IssuerFingerprint { .. } => 33,
            SubpacketData::Other { tag, .. } => *tag,
        }
    }

    /// True for subpacket types this implementation does not interpret
    pub fn is_unknown(&self) -> bool {
        matches!(self.data, SubpacketData::Other { .. })
    }

    fn body(&self) -> Vec<u8> {
        match &self.data {
            SubpacketData::SignatureCreationTime(t)
            | SubpacketData::SignatureExpirationTime(t)
            | SubpacketData::KeyExpirationTime(t) => t.to_be_bytes().to_vec(),
            SubpacketData::Issuer(id) => id.to_be_bytes().to_vec(),
            SubpacketData::PrimaryUserId(primary) => vec![u8::from(*primary)],
            SubpacketData::KeyFlags(flags) => flags.clone(),
            SubpacketData::RevocationReason { code, reason } => {
                let mut out = vec![*code];
                out.extend_from_slice(reason);
                out
            }
            SubpacketData::SignatureTarget {
                pk_algorithm,
                hash_algorithm,
                digest,
            } => {
                let mut out = vec![*pk_algorithm, *hash_algorithm];
                out.extend_from_slice(digest);
                out
            }
            SubpacketData::IssuerFingerprint {
                version,
                fingerprint,
            } => {
                let mut out = vec![*version];
                out.extend_from_slice(fingerprint);
                out
            }
            SubpacketData::Other { data, .. } => data.clone(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let body = self.body();
        out.extend_from_slice(&encode_length(body.len() + 1));
        let tag = if self.critical {
            self.tag() | 0x80
        } else {
            self.tag()
        };
        out.push(tag);
        out.extend_from_slice(&body);
    }

    fn decode(tag: u8, body: &[u8]) -> Result<SubpacketData> {
        let fixed = |n: usize| -> Result<()> {
            if body.len() != n {
                return Err(PgpError::malformed(format!(
                    "Subpacket {} must be {} bytes, got {}",
                    tag,
                    n,
                    body.len()
                )));
            }
            Ok(())
        };
        let u32_body = || u32::from_be_bytes([body[0], body[1], body[2], body[3]]);

        let data = match tag {
            2 => {
                fixed(4)?;
                SubpacketData::SignatureCreationTime(u32_body())
            }
            3 => {
                fixed(4)?;
                SubpacketData::SignatureExpirationTime(u32_body())
            }
            9 => {
                fixed(4)?;
                SubpacketData::KeyExpirationTime(u32_body())
            }
            16 => {
                fixed(8)?;
                let mut id = [0u8; 8];
                id.copy_from_slice(body);
                SubpacketData::Issuer(u64::from_be_bytes(id))
            }
            25 => {
                fixed(1)?;
                SubpacketData::PrimaryUserId(body[0] != 0)
            }
            27 => SubpacketData::KeyFlags(body.to_vec()),
            29 => {
                let (&code, reason) = body
                    .split_first()
                    .ok_or_else(|| PgpError::malformed("Empty revocation reason"))?;
                SubpacketData::RevocationReason {
                    code,
                    reason: reason.to_vec(),
                }
            }
            31 => {
                if body.len() < 2 {
                    return Err(PgpError::malformed("Short signature target subpacket"));
                }
                SubpacketData::SignatureTarget {
                    pk_algorithm: body[0],
                    hash_algorithm: body[1],
                    digest: body[2..].to_vec(),
                }
            }
            33 => {
                let (&version, fingerprint) = body
                    .split_first()
                    .ok_or_else(|| PgpError::malformed("Empty issuer fingerprint"))?;
                SubpacketData::IssuerFingerprint {
                    version,
                    fingerprint: fingerprint.to_vec(),
                }
            }
            other => SubpacketData::Other {
                tag: other,
                data: body.to_vec(),
            },
        };
        Ok(data)
    }
}

fn write_subpackets(subpackets: &[Subpacket]) -> Vec<u8> {
    let mut out = Vec::new();
    for subpacket in subpackets {
        subpacket.write(&mut out);
    }
    out
}

fn parse_subpackets(mut data: &[u8]) -> Result<Vec<Subpacket>> {
    let mut subpackets = Vec::new();
    while !data.is_empty() {
        let len = read_subpacket_length(&mut data)?;
        if len == 0 {
            return Err(PgpError::malformed("Zero-length subpacket"));
        }
        let body = read_vec(&mut data, len, "subpacket")?;
        let critical = body[0] & 0x80 != 0;
        let tag = body[0] & 0x7F;
        subpackets.push(Subpacket {
            critical,
            data: Subpacket::decode(tag, &body[1..])?,
        });
    }
    Ok(subpackets)
}

/// Signature packet body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePacket {
    pub sig_type: SignatureType,
    pub pk_algorithm: PublicKeyAlgorithm,
    pub hash_algorithm: HashAlgorithm,
    hashed: Vec<Subpacket>,
    /// Hashed subpacket area exactly as signed
    hashed_area: Vec<u8>,
    pub unhashed: Vec<Subpacket>,
    /// Leftmost two octets of the signed digest
    pub hash_prefix: [u8; 2],
    pub signature: Vec<u8>,
}

impl SignaturePacket {
    /// Subpackets covered by the signature
    pub fn hashed(&self) -> &[Subpacket] {
        &self.hashed
    }

    fn hashed_subpacket(&self) -> impl Iterator<Item = &SubpacketData> {
        self.hashed.iter().map(|s| &s.data)
    }

    /// Signature creation time from the hashed area
    pub fn created(&self) -> Option<u32> {
        self.hashed_subpacket().find_map(|d| match d {
            SubpacketData::SignatureCreationTime(t) => Some(*t),
            _ => None,
        })
    }

    /// Signature lifetime in seconds after creation, if limited
    pub fn signature_lifetime(&self) -> Option<u32> {
        self.hashed_subpacket().find_map(|d| match d {
            SubpacketData::SignatureExpirationTime(t) if *t > 0 => Some(*t),
            _ => None,
        })
    }

    /// Key lifetime in seconds after key creation, if limited
    pub fn key_lifetime(&self) -> Option<u32> {
        self.hashed_subpacket().find_map(|d| match d {
            SubpacketData::KeyExpirationTime(t) if *t > 0 => Some(*t),
            _ => None,
        })
    }

    pub fn key_flags(&self) -> Option<KeyUsage> {
        self.hashed_subpacket().find_map(|d| match d {
            SubpacketData::KeyFlags(flags) => Some(KeyUsage::from_flags(
                flags.first().copied().unwrap_or_default(),
            )),
            _ => None,
        })
    }

    pub fn is_primary_user_id(&self) -> bool {
        self.hashed_subpacket()
            .any(|d| matches!(d, SubpacketData::PrimaryUserId(true)))
    }

    /// Reason code and text of a revocation
    pub fn revocation_reason(&self) -> Option<(u8, &[u8])> {
        self.hashed_subpacket().find_map(|d| match d {
            SubpacketData::RevocationReason { code, reason } => Some((*code, reason.as_slice())),
            _ => None,
        })
    }

    /// Hash algorithm and digest named by a signature target subpacket
    pub fn signature_target(&self) -> Option<(u8, &[u8])> {
        self.hashed_subpacket().find_map(|d| match d {
            SubpacketData::SignatureTarget {
                hash_algorithm,
                digest,
                ..
            } => Some((*hash_algorithm, digest.as_slice())),
            _ => None,
        })
    }

    pub fn issuer_fingerprint(&self) -> Option<&[u8]> {
        self.hashed
            .iter()
            .chain(self.unhashed.iter())
            .find_map(|s| match &s.data {
                SubpacketData::IssuerFingerprint { fingerprint, .. } => {
                    Some(fingerprint.as_slice())
                }
                _ => None,
            })
    }

    /// Issuer key id from the issuer subpacket or the issuer fingerprint
    pub fn issuer(&self) -> Option<u64> {
        let from_issuer = self
            .hashed
            .iter()
            .chain(self.unhashed.iter())
            .find_map(|s| match s.data {
                SubpacketData::Issuer(id) => Some(id),
                _ => None,
            });
        from_issuer.or_else(|| {
            self.issuer_fingerprint()
                .filter(|fp| fp.len() == 32)
                .map(|fp| {
                    let mut id = [0u8; 8];
                    id.copy_from_slice(&fp[24..]);
                    u64::from_be_bytes(id)
                })
        })
    }

    /// True if issued by the key with this fingerprint
    pub fn is_issued_by(&self, fingerprint: &Fingerprint) -> bool {
        match self.issuer_fingerprint() {
            Some(fp) => crate::crypto::bytes_equal(fp, fingerprint.as_bytes()),
            None => self
                .issuer()
                .is_some_and(|id| crate::crypto::key_ids_equal(id, fingerprint.key_id())),
        }
    }

    /// True if a hashed subpacket is marked critical but not understood
    pub fn has_unknown_critical(&self) -> bool {
        self.hashed.iter().any(|s| s.critical && s.is_unknown())
    }

    /// True once the signature's own lifetime has elapsed at `at`
    pub fn is_expired_at(&self, at: u64) -> bool {
        match (self.created(), self.signature_lifetime()) {
            (Some(created), Some(lifetime)) => at >= u64::from(created) + u64::from(lifetime),
            _ => false,
        }
    }

    /// Version, type, algorithms and hashed subpackets: the hashed portion
    fn hashed_portion(&self) -> Vec<u8> {
        let hashed = &self.hashed_area;
        let mut out = Vec::with_capacity(6 + hashed.len());
        out.push(SIGNATURE_VERSION);
        out.push(self.sig_type as u8);
        out.push(self.pk_algorithm as u8);
        out.push(self.hash_algorithm as u8);
        out.extend_from_slice(&(hashed.len() as u16).to_be_bytes());
        out.extend_from_slice(hashed);
        out
    }

    /// Computes the digest this signature signs over `context`
    pub fn digest(&self, context: &[u8]) -> Vec<u8> {
        let mut hasher = Hasher::new(self.hash_algorithm);
        hasher.update(context);
        let hashed = self.hashed_portion();
        hasher.update(&hashed);
        hasher.update(&[SIGNATURE_VERSION, 0xFF]);
        hasher.update(&(hashed.len() as u32).to_be_bytes());
        hasher.finalize()
    }

    /// Verifies the signature over `context` with `key`.
    ///
    /// Unknown critical hashed subpackets make the signature invalid.
    pub fn verify(&self, key: &PublicKey, context: &[u8]) -> Result<()> {
        if self.has_unknown_critical() {
            return Err(PgpError::invalid_signature(
                "Unknown critical subpacket in hashed area",
            ));
        }
        if key.algorithm() != self.pk_algorithm {
            return Err(PgpError::invalid_signature(
                "Key algorithm does not match signature",
            ));
        }
        let digest = self.digest(context);
        if digest[..2] != self.hash_prefix {
            return Err(PgpError::invalid_signature("Hash prefix mismatch"));
        }
        verify_signature(key, &digest, &self.signature)
    }

    /// Digest identifying this signature in a signature target subpacket
    pub fn target_digest(&self, hash_algorithm: HashAlgorithm) -> Vec<u8> {
        hash_algorithm.digest(&self.to_bytes())
    }

    /// Serialize to packet body bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.hashed_portion();
        let unhashed = write_subpackets(&self.unhashed);
        out.extend_from_slice(&(unhashed.len() as u16).to_be_bytes());
        out.extend_from_slice(&unhashed);
        out.extend_from_slice(&self.hash_prefix);
        out.extend_from_slice(&((self.signature.len() * 8) as u16).to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    /// Parse from packet body bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Validator::validate_packet_size(data.len())?;
        let short = || PgpError::malformed("Truncated signature packet");
        let mut reader = data;

        let version = reader.read_u8().map_err(|_| short())?;
        if version != SIGNATURE_VERSION {
            return Err(PgpError::malformed(format!(
                "Unsupported signature version: {}",
                version
            )));
        }
        let sig_type = SignatureType::try_from(reader.read_u8().map_err(|_| short())?)?;
        let pk_algorithm = PublicKeyAlgorithm::try_from(reader.read_u8().map_err(|_| short())?)?;
        let hash_algorithm = HashAlgorithm::try_from(reader.read_u8().map_err(|_| short())?)?;

        let hashed_len = reader.read_u16::<BigEndian>().map_err(|_| short())? as usize;
        let hashed_area = read_vec(&mut reader, hashed_len, "signature")?;
        let hashed = parse_subpackets(&hashed_area)?;
        let unhashed_len = reader.read_u16::<BigEndian>().map_err(|_| short())? as usize;
        let unhashed = parse_subpackets(&read_vec(&mut reader, unhashed_len, "signature")?)?;

        let mut hash_prefix = [0u8; 2];
        hash_prefix.copy_from_slice(&read_vec(&mut reader, 2, "signature")?);

        let bit_len = reader.read_u16::<BigEndian>().map_err(|_| short())? as usize;
        let byte_len = bit_len.div_ceil(8);
        Validator::validate_signature_size(byte_len)?;
        let signature = read_vec(&mut reader, byte_len, "signature")?;
        if !reader.is_empty() {
            return Err(PgpError::malformed("Trailing data after signature"));
        }

        Ok(Self {
            sig_type,
            pk_algorithm,
            hash_algorithm,
            hashed,
            hashed_area,
            unhashed,
            hash_prefix,
            signature,
        })
    }
}

/// Builds and signs signature packets
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    sig_type: SignatureType,
    hash_algorithm: HashAlgorithm,
    hashed: Vec<Subpacket>,
}

impl SignatureBuilder {
    pub fn new(sig_type: SignatureType, hash_algorithm: HashAlgorithm) -> Self {
        Self {
            sig_type,
            hash_algorithm,
            hashed: Vec::new(),
        }
    }

    /// Adds a hashed subpacket
    pub fn subpacket(mut self, subpacket: Subpacket) -> Self {
        self.hashed.push(subpacket);
        self
    }

    pub fn key_flags(self, usage: KeyUsage) -> Self {
        self.subpacket(Subpacket::new(SubpacketData::KeyFlags(vec![
            usage.to_flags()
        ])))
    }

    /// Key lifetime in seconds; `None` or zero means no expiry
    pub fn key_lifetime(self, lifetime: Option<u32>) -> Self {
        match lifetime {
            Some(secs) if secs > 0 => {
                self.subpacket(Subpacket::new(SubpacketData::KeyExpirationTime(secs)))
            }
            _ => self,
        }
    }

    pub fn revocation_reason(self, code: u8, reason: &str) -> Self {
        self.subpacket(Subpacket::new(SubpacketData::RevocationReason {
            code,
            reason: reason.as_bytes().to_vec(),
        }))
    }

    /// Names `target` as the signature this one refers to
    pub fn signature_target(self, target: &SignaturePacket) -> Self {
        let digest = target.target_digest(self.hash_algorithm);
        let hash_algorithm = self.hash_algorithm as u8;
        self.subpacket(Subpacket::new(SubpacketData::SignatureTarget {
            pk_algorithm: target.pk_algorithm as u8,
            hash_algorithm,
            digest,
        }))
    }

    pub fn primary_user_id(self) -> Self {
        self.subpacket(Subpacket::new(SubpacketData::PrimaryUserId(true)))
    }

    /// Signs `context` as `issuer` at time `created`
    pub fn sign(
        self,
        issuer: &PublicKeyPacket,
        private: &PrivateKey,
        context: &[u8],
        created: u32,
    ) -> Result<SignaturePacket> {
        let fingerprint = issuer.fingerprint();
        let mut hashed = vec![Subpacket::new(SubpacketData::SignatureCreationTime(created))];
        hashed.extend(self.hashed);
        hashed.push(Subpacket::new(SubpacketData::IssuerFingerprint {
            version: 4,
            fingerprint: fingerprint.as_bytes().to_vec(),
        }));

        let mut packet = SignaturePacket {
            sig_type: self.sig_type,
            pk_algorithm: private.algorithm(),
            hash_algorithm: self.hash_algorithm,
            hashed_area: write_subpackets(&hashed),
            hashed,
            unhashed: vec![Subpacket::new(SubpacketData::Issuer(fingerprint.key_id()))],
            hash_prefix: [0, 0],
            signature: Vec::new(),
        };
        let digest = packet.digest(context);
        packet.hash_prefix = [digest[0], digest[1]];
        packet.signature = sign(private, &digest)?;
        debug!(
            sig_type = ?packet.sig_type,
            issuer = %fingerprint,
            "created signature"
        );
        Ok(packet)
    }
}

/// Converts line endings to CRLF for text signatures
pub fn canonicalize_text(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut previous = 0u8;
    for &byte in data {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        previous = byte;
    }
    out
}

/// Hash context for a document signature
pub fn document_context(sig_type: SignatureType, data: &[u8]) -> Vec<u8> {
    match sig_type {
        SignatureType::Text => canonicalize_text(data),
        _ => data.to_vec(),
    }
}

/// Hash context for direct-key signatures and key revocations
pub fn key_context(primary: &PublicKeyPacket) -> Vec<u8> {
    primary.hash_context()
}

/// Hash context for subkey bindings and subkey revocations
pub fn subkey_context(primary: &PublicKeyPacket, subkey: &PublicKeyPacket) -> Vec<u8> {
    let mut ctx = primary.hash_context();
    ctx.extend_from_slice(&subkey.hash_context());
    ctx
}

/// Hash context for user id certifications
pub fn user_id_context(primary: &PublicKeyPacket, user_id: &str) -> Vec<u8> {
    let mut ctx = primary.hash_context();
    ctx.push(0xB4);
    ctx.extend_from_slice(&(user_id.len() as u32).to_be_bytes());
    ctx.extend_from_slice(user_id.as_bytes());
    ctx
}
