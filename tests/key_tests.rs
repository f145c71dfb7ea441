//! Key management tests: expiry, revocation precedence and snapshots
//! surviving export and import.

use pgpcore::{
    crypto::{Argon2Params, KeyUsage},
    key::{self, maintenance},
    message,
    packet::signature::reason,
    Config, KeyRing, PgpError,
};
use rand::rngs::OsRng;

const T0: u64 = 1_700_000_000;

fn config_at(now: u64) -> Config {
    Config {
        now: Some(now),
        argon2: Argon2Params {
            iterations: 1,
            parallelism: 1,
            memory_exponent: 8,
        },
        ..Config::default()
    }
}

fn ring_with_lifetime(lifetime: Option<u32>) -> KeyRing {
    let config = Config {
        key_lifetime: lifetime,
        ..config_at(T0)
    };
    key::generate("Quinn", "quinn@example.org", None, &config, &mut OsRng)
        .expect("Failed to generate key")
}

/// Export and import, so every check below runs on a parsed ring
fn reimport(ring: &KeyRing) -> KeyRing {
    let bytes = key::export_key(ring, true).expect("export");
    key::import_key(&bytes).expect("import")
}

#[test]
fn test_expired_key_is_not_selected() {
    let ring = ring_with_lifetime(Some(3600));
    assert!(key::select_encryption_key(&ring, T0 + 3599).is_ok());
    assert!(matches!(
        key::select_encryption_key(&ring, T0 + 3601),
        Err(PgpError::ExpiredKey(_))
    ));
    assert!(matches!(
        key::select_signing_key(&ring, T0 + 3601),
        Err(PgpError::ExpiredKey(_))
    ));
    assert!(matches!(
        message::encrypt(&[&ring], b"late", &config_at(T0 + 3601), &mut OsRng),
        Err(PgpError::ExpiredKey(_))
    ));
}

#[test]
fn test_key_not_valid_before_creation() {
    let ring = ring_with_lifetime(None);
    assert!(matches!(
        key::select_encryption_key(&ring, T0 - 1),
        Err(PgpError::NoValidKey(_))
    ));
}

#[test]
fn test_expired_key_still_decrypts() {
    let ring = ring_with_lifetime(Some(60));
    let encrypted =
        message::encrypt(&[&ring], b"old mail", &config_at(T0), &mut OsRng).expect("encrypt");
    let decrypted = message::decrypt(&[&ring], None, &encrypted, &config_at(T0 + 86_400))
        .expect("decrypt");
    assert_eq!(decrypted.data, b"old mail");
}

#[test]
fn test_rebinding_extends_subkey_but_not_primary() {
    let ring = ring_with_lifetime(Some(3600));
    let primary_key = ring.primary().unlock(None).expect("unlock");
    let subkey = ring.subkeys()[0].fingerprint();

    let rebound = maintenance::rebind_subkey(
        &ring,
        &subkey,
        &primary_key,
        KeyUsage::encrypt_only(),
        None,
        T0 + 100,
    )
    .expect("rebind");
    let rebound = reimport(&rebound);
    assert_eq!(rebound.expiration(&rebound.subkeys()[0], T0 + 200), None);
    // The primary certification still expires
    assert!(matches!(
        key::select_encryption_key(&rebound, T0 + 4000),
        Err(PgpError::ExpiredKey(_))
    ));
}

#[test]
fn test_revoked_subkey_never_selected_despite_newer_binding() {
    let ring = ring_with_lifetime(None);
    let primary_key = ring.primary().unlock(None).expect("unlock");
    let subkey = ring.subkeys()[0].fingerprint();

    let revoked = maintenance::revoke_subkey(
        &ring,
        &subkey,
        &primary_key,
        reason::KEY_SUPERSEDED,
        "rotated",
        T0 + 10,
    )
    .expect("revoke");
    let rebound = maintenance::rebind_subkey(
        &revoked,
        &subkey,
        &primary_key,
        KeyUsage::encrypt_only(),
        None,
        T0 + 20,
    )
    .expect("rebind");
    let rebound = reimport(&rebound);

    // The revocation counts at any time, even before it was issued
    for at in [T0 + 5, T0 + 15, T0 + 30] {
        assert!(matches!(
            key::select_encryption_key(&rebound, at),
            Err(PgpError::RevokedKey(_))
        ));
    }
    assert!(message::encrypt(&[&rebound], b"x", &config_at(T0 + 30), &mut OsRng).is_err());
}

#[test]
fn test_soft_revocation_reversal() {
    let ring = ring_with_lifetime(None);
    let primary_key = ring.primary().unlock(None).expect("unlock");
    let subkey = ring.subkeys()[0].fingerprint();
    let revoked = maintenance::revoke_subkey(
        &ring,
        &subkey,
        &primary_key,
        reason::KEY_RETIRED,
        "",
        T0 + 10,
    )
    .expect("revoke");

    // A reversal with the same timestamp is ambiguous and keeps the key revoked
    let same_second =
        reimport(&maintenance::reinstate_subkey(&revoked, &subkey, &primary_key, T0 + 10).expect("reinstate"));
    assert!(matches!(
        key::select_encryption_key(&same_second, T0 + 20),
        Err(PgpError::RevokedKey(_))
    ));

    let later =
        reimport(&maintenance::reinstate_subkey(&revoked, &subkey, &primary_key, T0 + 11).expect("reinstate"));
    let selected = key::select_encryption_key(&later, T0 + 20).expect("select");
    assert_eq!(selected.fingerprint(), subkey);
}

#[test]
fn test_hard_revocation_is_final() {
    let ring = ring_with_lifetime(None);
    let primary_key = ring.primary().unlock(None).expect("unlock");
    let subkey = ring.subkeys()[0].fingerprint();
    let revoked = maintenance::revoke_subkey(
        &ring,
        &subkey,
        &primary_key,
        reason::KEY_COMPROMISED,
        "leaked",
        T0 + 10,
    )
    .expect("revoke");
    assert!(matches!(
        maintenance::reinstate_subkey(&revoked, &subkey, &primary_key, T0 + 20),
        Err(PgpError::InvalidInput(_))
    ));
}

#[test]
fn test_revoked_primary_blocks_everything() {
    let ring = ring_with_lifetime(None);
    let primary_key = ring.primary().unlock(None).expect("unlock");
    let revoked = reimport(
        &maintenance::revoke(&ring, &primary_key, reason::KEY_RETIRED, "bye", T0 + 10)
            .expect("revoke"),
    );
    assert!(matches!(
        key::select_encryption_key(&revoked, T0 + 20),
        Err(PgpError::RevokedKey(_))
    ));
    assert!(matches!(
        key::select_signing_key(&revoked, T0 + 20),
        Err(PgpError::RevokedKey(_))
    ));
    assert!(key::is_revoked(revoked.primary(), revoked.primary()));
}

#[test]
fn test_binding_validation() {
    let ring = ring_with_lifetime(Some(1000));
    let subkey = &ring.subkeys()[0];
    assert!(key::validate_binding(subkey, ring.primary(), T0 + 1));
    assert!(!key::validate_binding(subkey, ring.primary(), T0 + 2000));

    // A subkey checked against a foreign primary is not bound
    let other = ring_with_lifetime(None);
    assert!(!key::validate_binding(subkey, other.primary(), T0 + 1));
}

#[test]
fn test_import_rejects_garbage() {
    assert!(key::import_key(b"").is_err());
    assert!(key::import_key(b"\x00\x01\x02").is_err());
    assert!(key::import_key(b"-----BEGIN PGP PUBLIC KEY BLOCK-----\n\n!!!!\n-----END PGP PUBLIC KEY BLOCK-----\n").is_err());

    let ring = ring_with_lifetime(None);
    let mut two = key::export_key(&ring, false).expect("export");
    two.extend(key::export_key(&ring, false).expect("export"));
    assert!(matches!(key::import_key(&two), Err(PgpError::InvalidInput(_))));
}
