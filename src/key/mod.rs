//! Key rings: a primary key with its user ids and subkeys.
//!
//! A [`KeyRing`] is built once by [`import_key`], [`generate`] or one of the
//! snapshot operations in [`maintenance`] and never changes afterwards.
//! Signatures that fail to verify against the primary key are dropped on
//! import, and so are subkeys left without any binding signature.

pub mod generate;
pub mod maintenance;
pub mod validity;

pub use generate::generate;
pub use maintenance::{rebind_subkey, reinstate_subkey, revoke, revoke_subkey};
pub use validity::{
    decryption_keys, is_revoked, select_encryption_key, select_signing_key, validate_binding,
};

use crate::armor::{self, ArmorKind};
use crate::crypto::{PrivateKey, PublicKeyAlgorithm};
use crate::crypto::Password;
use crate::error::{PgpError, Result};
use crate::packet::signature::{key_context, subkey_context, user_id_context};
use crate::packet::{
    self, Fingerprint, Packet, PublicKeyPacket, SecretKeyPacket, SignaturePacket, SignatureType,
};
use tracing::{debug, warn};

/// One key of a ring: the primary key or a subkey
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    public: PublicKeyPacket,
    secret: Option<SecretKeyPacket>,
    /// Bindings, revocations and reversals for subkeys; direct-key
    /// signatures and revocations for the primary key
    signatures: Vec<SignaturePacket>,
}

impl Key {
    pub(crate) fn new(
        public: PublicKeyPacket,
        secret: Option<SecretKeyPacket>,
        signatures: Vec<SignaturePacket>,
    ) -> Self {
        Self {
            public,
            secret,
            signatures,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }

    pub fn key_id(&self) -> u64 {
        self.public.key_id()
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.public.algorithm()
    }

    /// Creation time (Unix seconds)
    pub fn created(&self) -> u32 {
        self.public.created
    }

    pub fn public(&self) -> &PublicKeyPacket {
        &self.public
    }

    pub fn signatures(&self) -> &[SignaturePacket] {
        &self.signatures
    }

    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_protected(&self) -> bool {
        self.secret.as_ref().is_some_and(SecretKeyPacket::is_protected)
    }

    /// Unlocks the private material for one operation.
    ///
    /// The returned key zeroizes its buffer on drop; the ring itself only
    /// ever holds the stored (possibly sealed) form.
    pub fn unlock(&self, password: Option<&Password>) -> Result<PrivateKey> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            PgpError::no_valid_key(format!("No private material for key {}", self.fingerprint()))
        })?;
        secret.unlock(password).inspect_err(|e| {
            debug!(key = %self.fingerprint(), error = %e, "failed to unlock private key");
        })
    }

    pub(crate) fn with_signature(&self, signature: SignaturePacket) -> Self {
        let mut key = self.clone();
        key.signatures.push(signature);
        key
    }

    fn to_public(&self) -> Self {
        Self {
            public: self.public.clone(),
            secret: None,
            signatures: self.signatures.clone(),
        }
    }
}

/// A user id and its self-certifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId {
    value: String,
    certifications: Vec<SignaturePacket>,
}

impl UserId {
    pub(crate) fn new(value: String, certifications: Vec<SignaturePacket>) -> Self {
        Self {
            value,
            certifications,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn certifications(&self) -> &[SignaturePacket] {
        &self.certifications
    }
}

/// Immutable key ring: exactly one primary key plus bound subkeys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRing {
    primary: Key,
    user_ids: Vec<UserId>,
    subkeys: Vec<Key>,
}

impl KeyRing {
    pub(crate) fn from_parts(primary: Key, user_ids: Vec<UserId>, subkeys: Vec<Key>) -> Self {
        Self {
            primary,
            user_ids,
            subkeys,
        }
    }

    pub fn primary(&self) -> &Key {
        &self.primary
    }

    pub fn subkeys(&self) -> &[Key] {
        &self.subkeys
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.primary.fingerprint()
    }

    pub fn key_id(&self) -> u64 {
        self.primary.key_id()
    }

    /// Primary key first, then subkeys in ring order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        std::iter::once(&self.primary).chain(self.subkeys.iter())
    }

    pub fn has_private(&self) -> bool {
        self.keys().any(Key::has_private)
    }

    pub fn find_key(&self, fingerprint: &Fingerprint) -> Option<&Key> {
        self.keys().find(|k| k.fingerprint() == *fingerprint)
    }

    pub fn find_key_id(&self, key_id: u64) -> Option<&Key> {
        self.keys()
            .find(|k| crate::crypto::key_ids_equal(k.key_id(), key_id))
    }

    /// Copy of the ring with all private material removed
    pub fn to_public(&self) -> Self {
        Self {
            primary: self.primary.to_public(),
            user_ids: self.user_ids.clone(),
            subkeys: self.subkeys.iter().map(Key::to_public).collect(),
        }
    }

    pub(crate) fn with_primary(&self, primary: Key) -> Self {
        Self {
            primary,
            user_ids: self.user_ids.clone(),
            subkeys: self.subkeys.clone(),
        }
    }

    pub(crate) fn with_subkey(&self, index: usize, subkey: Key) -> Self {
        let mut subkeys = self.subkeys.clone();
        subkeys[index] = subkey;
        Self {
            primary: self.primary.clone(),
            user_ids: self.user_ids.clone(),
            subkeys,
        }
    }

    pub(crate) fn subkey_index(&self, fingerprint: &Fingerprint) -> Result<usize> {
        self.subkeys
            .iter()
            .position(|k| k.fingerprint() == *fingerprint)
            .ok_or_else(|| PgpError::no_valid_key(format!("No subkey {} in ring", fingerprint)))
    }

    /// Packet sequence of the ring in transferable key order
    pub fn to_packets(&self, include_private: bool) -> Vec<Packet> {
        let mut packets = Vec::new();
        match (&self.primary.secret, include_private) {
            (Some(secret), true) => packets.push(Packet::SecretKey(secret.clone())),
            _ => packets.push(Packet::PublicKey(self.primary.public.clone())),
        }
        packets.extend(self.primary.signatures.iter().cloned().map(Packet::Signature));

        for uid in &self.user_ids {
            packets.push(Packet::UserId(uid.value.clone()));
            packets.extend(uid.certifications.iter().cloned().map(Packet::Signature));
        }

        for subkey in &self.subkeys {
            match (&subkey.secret, include_private) {
                (Some(secret), true) => packets.push(Packet::SecretSubkey(secret.clone())),
                _ => packets.push(Packet::PublicSubkey(subkey.public.clone())),
            }
            packets.extend(subkey.signatures.iter().cloned().map(Packet::Signature));
        }
        packets
    }
}

/// Import exactly one key ring from binary or armored data
pub fn import_key(data: &[u8]) -> Result<KeyRing> {
    let mut rings = import_many(data)?;
    match rings.len() {
        1 => Ok(rings.remove(0)),
        0 => Err(PgpError::malformed("No primary key found in key data")),
        n => Err(PgpError::invalid_input(format!(
            "Expected one key ring, found {}",
            n
        ))),
    }
}

/// Import every key ring in binary or armored data
pub fn import_many(data: &[u8]) -> Result<Vec<KeyRing>> {
    let mut rings = Vec::new();
    let mut current: Option<RingBuilder> = None;

    for packet in packet::parse(data)? {
        match packet {
            Packet::PublicKey(public) => {
                rings.extend(current.take().map(RingBuilder::finish));
                current = Some(RingBuilder::new(public, None));
            }
            Packet::SecretKey(secret) => {
                rings.extend(current.take().map(RingBuilder::finish));
                current = Some(RingBuilder::new(secret.public.clone(), Some(secret)));
            }
            Packet::Marker => {}
            other => {
                let builder = current.as_mut().ok_or_else(|| {
                    PgpError::malformed("Key data does not start with a primary key")
                })?;
                builder.push(other)?;
            }
        }
    }
    rings.extend(current.map(RingBuilder::finish));
    debug!(count = rings.len(), "imported key rings");
    Ok(rings)
}

/// Serialize a key ring, optionally with its private material
pub fn export_key(ring: &KeyRing, include_private: bool) -> Result<Vec<u8>> {
    if include_private && !ring.has_private() {
        return Err(PgpError::invalid_input(
            "Key ring holds no private key material",
        ));
    }
    Ok(packet::serialize(&ring.to_packets(include_private)))
}

/// Armored form of [`export_key`]
pub fn export_key_armored(ring: &KeyRing, include_private: bool) -> Result<String> {
    let bytes = export_key(ring, include_private)?;
    let kind = if include_private {
        ArmorKind::PrivateKey
    } else {
        ArmorKind::PublicKey
    };
    Ok(armor::encode(kind, &bytes))
}

/// Where the next signature packet attaches
enum Slot {
    Primary,
    UserId,
    Subkey,
}

struct RingBuilder {
    primary: Key,
    user_ids: Vec<UserId>,
    subkeys: Vec<Key>,
    slot: Slot,
}

impl RingBuilder {
    fn new(public: PublicKeyPacket, secret: Option<SecretKeyPacket>) -> Self {
        Self {
            primary: Key::new(public, secret, Vec::new()),
            user_ids: Vec::new(),
            subkeys: Vec::new(),
            slot: Slot::Primary,
        }
    }

    fn push(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::UserId(value) => {
                self.user_ids.push(UserId::new(value, Vec::new()));
                self.slot = Slot::UserId;
            }
            Packet::PublicSubkey(public) => {
                self.subkeys.push(Key::new(public, None, Vec::new()));
                self.slot = Slot::Subkey;
            }
            Packet::SecretSubkey(secret) => {
                self.subkeys
                    .push(Key::new(secret.public.clone(), Some(secret), Vec::new()));
                self.slot = Slot::Subkey;
            }
            Packet::Signature(sig) => self.attach(sig),
            other => {
                return Err(PgpError::malformed(format!(
                    "Unexpected {:?} packet in key data",
                    other.packet_type()
                )))
            }
        }
        Ok(())
    }

    fn attach(&mut self, sig: SignaturePacket) {
        let primary = &self.primary.public;
        let issued_by_primary = sig.is_issued_by(&primary.fingerprint());
        let (target, context, expected): (&mut Vec<SignaturePacket>, Vec<u8>, bool) =
            match self.slot {
                Slot::Primary => (
                    &mut self.primary.signatures,
                    key_context(primary),
                    matches!(
                        sig.sig_type,
                        SignatureType::DirectKey
                            | SignatureType::KeyRevocation
                            | SignatureType::CertificationRevocation
                    ),
                ),
                Slot::UserId => match self.user_ids.last_mut() {
                    Some(uid) => {
                        let context = user_id_context(primary, &uid.value);
                        (
                            &mut uid.certifications,
                            context,
                            sig.sig_type.is_certification(),
                        )
                    }
                    None => return,
                },
                Slot::Subkey => match self.subkeys.last_mut() {
                    Some(subkey) => {
                        let context = subkey_context(primary, &subkey.public);
                        (
                            &mut subkey.signatures,
                            context,
                            matches!(
                                sig.sig_type,
                                SignatureType::SubkeyBinding
                                    | SignatureType::SubkeyRevocation
                                    | SignatureType::CertificationRevocation
                            ),
                        )
                    }
                    None => return,
                },
            };

        if !expected {
            warn!(sig_type = ?sig.sig_type, "dropping misplaced signature");
            return;
        }
        if !issued_by_primary {
            debug!(sig_type = ?sig.sig_type, "dropping third-party signature");
            return;
        }
        match sig.verify(&primary.key, &context) {
            Ok(()) => target.push(sig),
            Err(e) => warn!(sig_type = ?sig.sig_type, error = %e, "dropping invalid signature"),
        }
    }

    fn finish(self) -> KeyRing {
        let subkeys = self
            .subkeys
            .into_iter()
            .filter(|subkey| {
                let bound = subkey
                    .signatures
                    .iter()
                    .any(|s| s.sig_type == SignatureType::SubkeyBinding);
                if !bound {
                    warn!(subkey = %subkey.fingerprint(), "dropping subkey without binding");
                }
                bound
            })
            .collect();
        KeyRing::from_parts(self.primary, self.user_ids, subkeys)
    }
}
