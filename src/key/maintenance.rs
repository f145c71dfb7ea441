//! Snapshot operations: each returns a new ring with one more signature.

use super::validity::{context, is_hard_revocation, revocations};
use super::{Key, KeyRing};
use crate::crypto::{HashAlgorithm, KeyUsage, PrivateKey};
use crate::error::{PgpError, Result};
use crate::packet::{Fingerprint, SignatureBuilder, SignaturePacket, SignatureType};
use tracing::info;

fn timestamp(at: u64) -> Result<u32> {
    u32::try_from(at).map_err(|_| PgpError::invalid_input("Timestamp beyond 2106"))
}

/// Signs `builder` over `key` with the primary key and checks the result
/// against the ring, so a foreign private key is rejected.
fn certify(
    ring: &KeyRing,
    key: &Key,
    builder: SignatureBuilder,
    primary_key: &PrivateKey,
    at: u64,
) -> Result<SignaturePacket> {
    let primary = ring.primary();
    let context = context(key, primary);
    let sig = builder.sign(primary.public(), primary_key, &context, timestamp(at)?)?;
    sig.verify(&primary.public().key, &context).map_err(|_| {
        PgpError::invalid_input("Private key does not belong to the primary key of this ring")
    })?;
    Ok(sig)
}

/// Revokes the primary key and with it the whole ring
pub fn revoke(
    ring: &KeyRing,
    primary_key: &PrivateKey,
    code: u8,
    reason: &str,
    at: u64,
) -> Result<KeyRing> {
    let builder = SignatureBuilder::new(SignatureType::KeyRevocation, HashAlgorithm::Sha256)
        .revocation_reason(code, reason);
    let sig = certify(ring, ring.primary(), builder, primary_key, at)?;
    info!(key = %ring.fingerprint(), code, "revoked key");
    Ok(ring.with_primary(ring.primary().with_signature(sig)))
}

pub fn revoke_subkey(
    ring: &KeyRing,
    subkey: &Fingerprint,
    primary_key: &PrivateKey,
    code: u8,
    reason: &str,
    at: u64,
) -> Result<KeyRing> {
    let index = ring.subkey_index(subkey)?;
    let key = &ring.subkeys()[index];
    let builder = SignatureBuilder::new(SignatureType::SubkeyRevocation, HashAlgorithm::Sha256)
        .revocation_reason(code, reason);
    let sig = certify(ring, key, builder, primary_key, at)?;
    info!(subkey = %subkey, code, "revoked subkey");
    Ok(ring.with_subkey(index, key.with_signature(sig)))
}

/// Adds a fresh binding for `subkey`.
///
/// A new binding never overrides a revocation; see [`reinstate_subkey`].
pub fn rebind_subkey(
    ring: &KeyRing,
    subkey: &Fingerprint,
    primary_key: &PrivateKey,
    usage: KeyUsage,
    lifetime: Option<u32>,
    at: u64,
) -> Result<KeyRing> {
    let index = ring.subkey_index(subkey)?;
    let key = &ring.subkeys()[index];
    let builder = SignatureBuilder::new(SignatureType::SubkeyBinding, HashAlgorithm::Sha256)
        .key_flags(usage)
        .key_lifetime(lifetime);
    let sig = certify(ring, key, builder, primary_key, at)?;
    info!(subkey = %subkey, "rebound subkey");
    Ok(ring.with_subkey(index, key.with_signature(sig)))
}

/// Reverses every soft revocation of `subkey`.
///
/// Fails if the subkey is not revoked or if any revocation is hard. A
/// reversal only takes effect when `at` is later than the revocation.
pub fn reinstate_subkey(
    ring: &KeyRing,
    subkey: &Fingerprint,
    primary_key: &PrivateKey,
    at: u64,
) -> Result<KeyRing> {
    let index = ring.subkey_index(subkey)?;
    let mut key = ring.subkeys()[index].clone();

    let targets: Vec<SignaturePacket> = revocations(&key, ring.primary())
        .into_iter()
        .cloned()
        .collect();
    if targets.is_empty() {
        return Err(PgpError::invalid_input(format!(
            "Subkey {} is not revoked",
            subkey
        )));
    }
    if targets.iter().any(is_hard_revocation) {
        return Err(PgpError::invalid_input(format!(
            "Subkey {} has a revocation that cannot be reversed",
            subkey
        )));
    }

    for target in &targets {
        let builder =
            SignatureBuilder::new(SignatureType::CertificationRevocation, HashAlgorithm::Sha256)
                .signature_target(target);
        let sig = certify(ring, &key, builder, primary_key, at)?;
        key = key.with_signature(sig);
    }
    info!(subkey = %subkey, "reinstated subkey");
    Ok(ring.with_subkey(index, key))
}
