//! Key ring generation.

use super::{Key, KeyRing, UserId};
use crate::config::Config;
use crate::crypto::{Argon2Params, KeyPair, KeyUsage, Password, PrivateKey};
use crate::error::{PgpError, Result};
use crate::packet::signature::{subkey_context, user_id_context};
use crate::packet::{PublicKeyPacket, SecretKeyPacket, SignatureBuilder, SignatureType};
use crate::validation::Validator;
use rand::{CryptoRng, RngCore};
use tracing::{info, instrument};

/// Formats `Name <email>`, dropping whichever part is empty
pub fn format_user_id(name: &str, email: &str) -> Result<String> {
    let name = name.trim();
    let email = email.trim();
    let user_id = match (name.is_empty(), email.is_empty()) {
        (true, true) => {
            return Err(PgpError::invalid_input(
                "A user id needs a name or an email address",
            ))
        }
        (false, true) => name.to_string(),
        (true, false) => format!("<{}>", email),
        (false, false) => format!("{} <{}>", name, email),
    };
    Validator::validate_user_id(&user_id)?;
    Ok(user_id)
}

fn store_secret<R: CryptoRng + RngCore>(
    public: PublicKeyPacket,
    private: &PrivateKey,
    passphrase: Option<&Password>,
    params: Argon2Params,
    rng: &mut R,
) -> Result<SecretKeyPacket> {
    match passphrase.filter(|p| !p.is_empty()) {
        Some(password) => SecretKeyPacket::new_protected(public, private, password, params, rng),
        None => Ok(SecretKeyPacket::new_plain(public, private)),
    }
}

/// Generates a new key ring.
///
/// The primary key is ML-DSA-87 (certify and sign) with a positive
/// certification of the user id; one ML-KEM-1024 subkey is bound for
/// encryption. Both get `config.key_lifetime`. A missing or empty passphrase
/// stores the private material unprotected.
#[instrument(skip(passphrase, config, rng))]
pub fn generate<R: CryptoRng + RngCore>(
    name: &str,
    email: &str,
    passphrase: Option<&Password>,
    config: &Config,
    rng: &mut R,
) -> Result<KeyRing> {
    config.validate()?;
    let user_id = format_user_id(name, email)?;
    let created = config.timestamp();

    let primary_pair = KeyPair::generate_mldsa87();
    let primary_public = PublicKeyPacket::new(primary_pair.public.clone(), created);
    let certification = SignatureBuilder::new(SignatureType::PositiveCertification, config.hash)
        .key_flags(KeyUsage::certify_and_sign())
        .key_lifetime(config.key_lifetime)
        .primary_user_id()
        .sign(
            &primary_public,
            &primary_pair.private,
            &user_id_context(&primary_public, &user_id),
            created,
        )?;

    let subkey_pair = KeyPair::generate_mlkem1024();
    let subkey_public = PublicKeyPacket::new(subkey_pair.public.clone(), created);
    let binding = SignatureBuilder::new(SignatureType::SubkeyBinding, config.hash)
        .key_flags(KeyUsage::encrypt_only())
        .key_lifetime(config.key_lifetime)
        .sign(
            &primary_public,
            &primary_pair.private,
            &subkey_context(&primary_public, &subkey_public),
            created,
        )?;

    let primary_secret = store_secret(
        primary_public.clone(),
        &primary_pair.private,
        passphrase,
        config.argon2,
        rng,
    )?;
    let subkey_secret = store_secret(
        subkey_public.clone(),
        &subkey_pair.private,
        passphrase,
        config.argon2,
        rng,
    )?;

    let primary = Key::new(primary_public, Some(primary_secret), Vec::new());
    let subkey = Key::new(subkey_public, Some(subkey_secret), vec![binding]);
    let ring = KeyRing::from_parts(
        primary,
        vec![UserId::new(user_id, vec![certification])],
        vec![subkey],
    );
    info!(fingerprint = %ring.fingerprint(), "generated key ring");
    Ok(ring)
}
