//! Binding, expiry and revocation rules, and key selection.
//!
//! A valid revocation always wins over any binding, whatever the timestamps
//! say. The only way back is a reversal: a certification-revocation
//! signature by the primary key, created strictly after the revocation,
//! whose signature target names that revocation. Revocations without a
//! reason, with reason "no reason" or with reason "key compromised" can
//! never be reversed. Anything ambiguous leaves the key revoked.

use super::{Key, KeyRing};
use crate::crypto::{bytes_equal, HashAlgorithm, KeyUsage};
use crate::error::{PgpError, Result};
use crate::packet::signature::{key_context, reason, subkey_context, user_id_context};
use crate::packet::{SignaturePacket, SignatureType};
use tracing::debug;

fn is_primary(key: &Key, primary: &Key) -> bool {
    key.fingerprint() == primary.fingerprint()
}

/// Hash context of signatures made by `primary` over `key`
pub(crate) fn context(key: &Key, primary: &Key) -> Vec<u8> {
    if is_primary(key, primary) {
        key_context(primary.public())
    } else {
        subkey_context(primary.public(), key.public())
    }
}

/// Issued by `primary` and verifies over `context`
fn is_authentic(sig: &SignaturePacket, primary: &Key, context: &[u8]) -> bool {
    sig.is_issued_by(&primary.fingerprint()) && sig.verify(&primary.public().key, context).is_ok()
}

pub(crate) fn is_hard_revocation(sig: &SignaturePacket) -> bool {
    match sig.revocation_reason() {
        None => true,
        Some((code, _)) => code == reason::NO_REASON || code == reason::KEY_COMPROMISED,
    }
}

/// True if `candidate` reverses `revocation`
fn reverses(
    candidate: &SignaturePacket,
    revocation: &SignaturePacket,
    primary: &Key,
    context: &[u8],
) -> bool {
    if candidate.sig_type != SignatureType::CertificationRevocation {
        return false;
    }
    let (Some(revoked_at), Some(reversed_at)) = (revocation.created(), candidate.created()) else {
        return false;
    };
    if reversed_at <= revoked_at {
        return false;
    }
    let Some((hash, digest)) = candidate.signature_target() else {
        return false;
    };
    let Ok(hash) = HashAlgorithm::try_from(hash) else {
        return false;
    };
    bytes_equal(&revocation.target_digest(hash), digest) && is_authentic(candidate, primary, context)
}

/// Authentic revocations of `key` issued by `primary`
pub(crate) fn revocations<'a>(key: &'a Key, primary: &Key) -> Vec<&'a SignaturePacket> {
    let revocation_type = if is_primary(key, primary) {
        SignatureType::KeyRevocation
    } else {
        SignatureType::SubkeyRevocation
    };
    let context = context(key, primary);
    key.signatures()
        .iter()
        .filter(|s| s.sig_type == revocation_type && is_authentic(s, primary, &context))
        .collect()
}

/// True if `key` carries a revocation by `primary` that has not been reversed
pub fn is_revoked(key: &Key, primary: &Key) -> bool {
    let context = context(key, primary);
    revocations(key, primary).into_iter().any(|revocation| {
        if is_hard_revocation(revocation) {
            return true;
        }
        let reversed = key
            .signatures()
            .iter()
            .any(|s| reverses(s, revocation, primary, &context));
        if reversed {
            debug!(key = %key.fingerprint(), "revocation reversed");
        }
        !reversed
    })
}

/// Newest authentic subkey binding created at or before `at`
fn current_binding<'a>(subkey: &'a Key, primary: &Key, at: u64) -> Option<&'a SignaturePacket> {
    let context = context(subkey, primary);
    subkey
        .signatures()
        .iter()
        .filter(|s| s.sig_type == SignatureType::SubkeyBinding)
        .filter(|s| s.created().is_some_and(|c| u64::from(c) <= at))
        .filter(|s| is_authentic(s, primary, &context))
        .max_by_key(|s| s.created())
}

/// Newest self-signature on the primary key created at or before `at`
fn current_self_signature(ring: &KeyRing, at: u64) -> Option<&SignaturePacket> {
    let primary = ring.primary();
    let direct = primary
        .signatures()
        .iter()
        .filter(|s| s.sig_type == SignatureType::DirectKey)
        .map(|s| (s, key_context(primary.public())));
    let certifications = ring.user_ids().iter().flat_map(move |uid| {
        uid.certifications()
            .iter()
            .filter(|s| s.sig_type.is_certification())
            .map(move |s| (s, user_id_context(primary.public(), uid.value())))
    });

    direct
        .chain(certifications)
        .filter(|(s, _)| s.created().is_some_and(|c| u64::from(c) <= at))
        .filter(|(s, _)| !s.is_expired_at(at))
        .filter(|(s, ctx)| is_authentic(s, primary, ctx))
        .max_by_key(|(s, _)| (s.is_primary_user_id(), s.created()))
        .map(|(s, _)| s)
}

fn expires_at(key: &Key, sig: &SignaturePacket) -> Option<u64> {
    sig.key_lifetime()
        .map(|lifetime| u64::from(key.created()) + u64::from(lifetime))
}

impl KeyRing {
    /// Signature that currently carries the flags and expiry of `key`
    fn governing_signature<'a>(&'a self, key: &'a Key, at: u64) -> Option<&'a SignaturePacket> {
        if is_primary(key, self.primary()) {
            current_self_signature(self, at)
        } else {
            current_binding(key, self.primary(), at)
        }
    }

    /// Usage flags of `key` at `at`.
    ///
    /// Without a key flags subpacket the algorithm decides: signing keys may
    /// certify and sign, KEM keys may encrypt.
    pub fn usage(&self, key: &Key, at: u64) -> KeyUsage {
        let flags = self
            .governing_signature(key, at)
            .and_then(SignaturePacket::key_flags);
        match flags {
            Some(flags) => flags,
            None if key.algorithm().can_sign() => KeyUsage::certify_and_sign(),
            None => KeyUsage::encrypt_only(),
        }
    }

    /// Expiration time of `key` at `at` (Unix seconds), `None` if it never expires
    pub fn expiration(&self, key: &Key, at: u64) -> Option<u64> {
        self.governing_signature(key, at)
            .and_then(|sig| expires_at(key, sig))
    }

    pub fn is_expired(&self, key: &Key, at: u64) -> bool {
        self.expiration(key, at).is_some_and(|exp| at >= exp)
    }

    /// Primary key validity at `at`
    fn check_primary(&self, at: u64) -> Result<()> {
        let primary = self.primary();
        if is_revoked(primary, primary) {
            return Err(PgpError::revoked_key(format!(
                "Primary key {} is revoked",
                primary.fingerprint()
            )));
        }
        if u64::from(primary.created()) > at {
            return Err(PgpError::no_valid_key(format!(
                "Primary key {} is not yet valid",
                primary.fingerprint()
            )));
        }
        if self.is_expired(primary, at) {
            return Err(PgpError::expired_key(format!(
                "Primary key {} is expired",
                primary.fingerprint()
            )));
        }
        Ok(())
    }
}

/// Checks that `subkey` is bound to `primary` at `at`.
///
/// The newest binding by `primary` must verify, must not have expired, must
/// not give the subkey an expiry at or before `at`, and neither key may be
/// revoked.
pub fn validate_binding(subkey: &Key, primary: &Key, at: u64) -> bool {
    if is_primary(subkey, primary) || u64::from(subkey.created()) > at {
        return false;
    }
    let Some(binding) = current_binding(subkey, primary, at) else {
        return false;
    };
    if binding.is_expired_at(at) {
        return false;
    }
    if expires_at(subkey, binding).is_some_and(|exp| at >= exp) {
        return false;
    }
    !is_revoked(subkey, primary) && !is_revoked(primary, primary)
}

/// Why a candidate key was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rejection {
    Unbound,
    Revoked,
    Expired,
}

fn rejection(ring: &KeyRing, key: &Key, at: u64) -> Rejection {
    if is_revoked(key, ring.primary()) {
        Rejection::Revoked
    } else if ring.is_expired(key, at) {
        Rejection::Expired
    } else {
        Rejection::Unbound
    }
}

fn select<'a>(
    ring: &'a KeyRing,
    at: u64,
    purpose: &str,
    capable: impl Fn(&KeyRing, &Key) -> bool,
    allow_primary: bool,
) -> Result<&'a Key> {
    ring.check_primary(at)?;

    let candidates: Vec<&Key> = ring.subkeys().iter().filter(|k| capable(ring, k)).collect();
    let newest_valid = candidates
        .iter()
        .copied()
        .filter(|k| validate_binding(k, ring.primary(), at))
        .max_by_key(|k| k.created());
    if let Some(key) = newest_valid {
        debug!(key = %key.fingerprint(), purpose, "selected subkey");
        return Ok(key);
    }
    if allow_primary && capable(ring, ring.primary()) {
        return Ok(ring.primary());
    }

    let fingerprint = ring.fingerprint();
    match candidates.iter().map(|k| rejection(ring, k, at)).max() {
        None => Err(PgpError::no_valid_key(format!(
            "Key {} has no {} key",
            fingerprint, purpose
        ))),
        Some(Rejection::Expired) => Err(PgpError::expired_key(format!(
            "All {} keys of {} are expired",
            purpose, fingerprint
        ))),
        Some(Rejection::Revoked) => Err(PgpError::revoked_key(format!(
            "All {} keys of {} are revoked",
            purpose, fingerprint
        ))),
        Some(Rejection::Unbound) => Err(PgpError::no_valid_key(format!(
            "No {} key of {} is validly bound",
            purpose, fingerprint
        ))),
    }
}

/// Newest encryption subkey valid at `at`
pub fn select_encryption_key(ring: &KeyRing, at: u64) -> Result<&Key> {
    select(
        ring,
        at,
        "encryption",
        |ring, key| key.algorithm().can_encrypt() && ring.usage(key, at).encrypt,
        false,
    )
}

/// Newest signing subkey valid at `at`, else the primary key if it may sign
pub fn select_signing_key(ring: &KeyRing, at: u64) -> Result<&Key> {
    select(
        ring,
        at,
        "signing",
        |ring, key| key.algorithm().can_sign() && ring.usage(key, at).sign,
        true,
    )
}

/// Keys with private material able to decrypt, primary first.
///
/// Expiry and revocation are not checked: old messages stay readable.
pub fn decryption_keys(ring: &KeyRing) -> Vec<&Key> {
    ring.keys()
        .filter(|k| k.has_private() && k.algorithm().can_encrypt())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::key::{generate, maintenance};
    use crate::crypto::Argon2Params;
    use rand::rngs::OsRng;

    const T0: u64 = 1_700_000_000;

    fn ring_with_lifetime(lifetime: Option<u32>) -> KeyRing {
        let config = Config {
            argon2: Argon2Params {
                iterations: 1,
                parallelism: 1,
                memory_exponent: 8,
            },
            key_lifetime: lifetime,
            now: Some(T0),
            ..Config::default()
        };
        generate("Erin", "erin@example.org", None, &config, &mut OsRng).unwrap()
    }

    #[test]
    fn test_generated_ring_selection() {
        let ring = ring_with_lifetime(None);
        let enc = select_encryption_key(&ring, T0).unwrap();
        assert_eq!(enc.fingerprint(), ring.subkeys()[0].fingerprint());
        assert!(validate_binding(enc, ring.primary(), T0));

        let sig = select_signing_key(&ring, T0).unwrap();
        assert_eq!(sig.fingerprint(), ring.fingerprint());
        assert!(ring.usage(ring.primary(), T0).certify);

        assert_eq!(decryption_keys(&ring).len(), 1);
        assert!(decryption_keys(&ring.to_public()).is_empty());
    }

    #[test]
    fn test_expired_key() {
        let ring = ring_with_lifetime(Some(3600));
        assert!(select_encryption_key(&ring, T0 + 10).is_ok());
        assert_eq!(ring.expiration(&ring.subkeys()[0], T0), Some(T0 + 3600));
        assert!(matches!(
            select_encryption_key(&ring, T0 + 3600),
            Err(PgpError::ExpiredKey(_))
        ));
    }

    #[test]
    fn test_before_creation() {
        let ring = ring_with_lifetime(None);
        assert!(matches!(
            select_encryption_key(&ring, T0 - 1),
            Err(PgpError::NoValidKey(_))
        ));
    }

    #[test]
    fn test_revocation_beats_newer_binding() {
        let ring = ring_with_lifetime(None);
        let primary_key = ring.primary().unlock(None).unwrap();
        let subkey = ring.subkeys()[0].fingerprint();

        let revoked = maintenance::revoke_subkey(
            &ring,
            &subkey,
            &primary_key,
            reason::KEY_RETIRED,
            "retired",
            T0 + 10,
        )
        .unwrap();
        let rebound = maintenance::rebind_subkey(
            &revoked,
            &subkey,
            &primary_key,
            KeyUsage::encrypt_only(),
            None,
            T0 + 100,
        )
        .unwrap();

        assert!(!validate_binding(&rebound.subkeys()[0], rebound.primary(), T0 + 200));
        assert!(matches!(
            select_encryption_key(&rebound, T0 + 200),
            Err(PgpError::RevokedKey(_))
        ));
    }

    #[test]
    fn test_soft_revocation_reversal() {
        let ring = ring_with_lifetime(None);
        let primary_key = ring.primary().unlock(None).unwrap();
        let subkey = ring.subkeys()[0].fingerprint();

        let revoked = maintenance::revoke_subkey(
            &ring,
            &subkey,
            &primary_key,
            reason::KEY_SUPERSEDED,
            "",
            T0 + 10,
        )
        .unwrap();
        let reinstated =
            maintenance::reinstate_subkey(&revoked, &subkey, &primary_key, T0 + 20).unwrap();
        assert!(!is_revoked(&reinstated.subkeys()[0], reinstated.primary()));
        assert!(select_encryption_key(&reinstated, T0 + 30).is_ok());
    }

    #[test]
    fn test_reversal_needs_strictly_later_timestamp() {
        let ring = ring_with_lifetime(None);
        let primary_key = ring.primary().unlock(None).unwrap();
        let subkey = ring.subkeys()[0].fingerprint();

        let revoked = maintenance::revoke_subkey(
            &ring,
            &subkey,
            &primary_key,
            reason::KEY_RETIRED,
            "",
            T0 + 10,
        )
        .unwrap();
        let same_second =
            maintenance::reinstate_subkey(&revoked, &subkey, &primary_key, T0 + 10).unwrap();
        assert!(is_revoked(&same_second.subkeys()[0], same_second.primary()));
    }

    #[test]
    fn test_hard_revocation_not_reversible() {
        let ring = ring_with_lifetime(None);
        let primary_key = ring.primary().unlock(None).unwrap();
        let subkey = ring.subkeys()[0].fingerprint();

        let revoked = maintenance::revoke_subkey(
            &ring,
            &subkey,
            &primary_key,
            reason::KEY_COMPROMISED,
            "leaked",
            T0 + 10,
        )
        .unwrap();
        assert!(matches!(
            maintenance::reinstate_subkey(&revoked, &subkey, &primary_key, T0 + 20),
            Err(PgpError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_primary_revocation() {
        let ring = ring_with_lifetime(None);
        let primary_key = ring.primary().unlock(None).unwrap();
        let revoked =
            maintenance::revoke(&ring, &primary_key, reason::KEY_RETIRED, "bye", T0 + 5).unwrap();
        assert!(matches!(
            select_encryption_key(&revoked, T0 + 10),
            Err(PgpError::RevokedKey(_))
        ));
        assert!(matches!(
            select_signing_key(&revoked, T0 + 10),
            Err(PgpError::RevokedKey(_))
        ));
        assert!(!validate_binding(&revoked.subkeys()[0], revoked.primary(), T0 + 10));
    }

    #[test]
    fn test_no_encryption_subkey() {
        let ring = ring_with_lifetime(None);
        let stripped = KeyRing::from_parts(
            ring.primary().clone(),
            ring.user_ids().to_vec(),
            Vec::new(),
        );
        assert!(matches!(
            select_encryption_key(&stripped, T0),
            Err(PgpError::NoValidKey(_))
        ));
    }
}
