//! Session key utilities.
//!
//! These work on the pieces of an encrypted message separately: the key
//! packets can be unwrapped (or re-wrapped for another key) without touching
//! the encrypted data, and the data packet can then be opened with a session
//! key obtained elsewhere.

use super::decrypt::{open_data, split_parts, unwrap_with_keys, unwrap_with_passwords};
use super::DecryptedMessage;
use crate::cancel::CancellationToken;
use crate::crypto::{Argon2Params, Password, SessionKey};
use crate::error::{PgpError, Result};
use crate::key::{select_encryption_key, KeyRing};
use crate::packet::{self, Packet, PkeskPacket, SkeskPacket};
use rand::{CryptoRng, RngCore};
use tracing::instrument;

/// Size of a default random token
pub const TOKEN_SIZE: usize = 32;

/// Upper bound for [`random_token_with`]
pub const MAX_TOKEN_SIZE: usize = 1024 * 1024;

/// A message split into its key packets and its encrypted data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitMessage {
    /// Serialized PKESK and SKESK packets
    pub key_packets: Vec<u8>,
    /// Serialized encrypted data packet
    pub data_packet: Vec<u8>,
}

/// 32 random bytes
pub fn random_token<R: CryptoRng + RngCore>(rng: &mut R) -> Vec<u8> {
    let mut token = vec![0u8; TOKEN_SIZE];
    rng.fill_bytes(&mut token);
    token
}

/// `size` random bytes
pub fn random_token_with<R: CryptoRng + RngCore>(size: usize, rng: &mut R) -> Result<Vec<u8>> {
    if size > MAX_TOKEN_SIZE {
        return Err(PgpError::validation(format!(
            "Token size {} exceeds maximum of {}",
            size, MAX_TOKEN_SIZE
        )));
    }
    let mut token = vec![0u8; size];
    rng.fill_bytes(&mut token);
    Ok(token)
}

fn pkesks(key_packets: &[u8]) -> Result<Vec<PkeskPacket>> {
    let mut out = Vec::new();
    for packet in packet::parse(key_packets)? {
        match packet {
            Packet::Pkesk(p) => out.push(p),
            Packet::Skesk(_) | Packet::Marker => {}
            other => {
                return Err(PgpError::malformed(format!(
                    "Unexpected {:?} packet among key packets",
                    other.packet_type()
                )))
            }
        }
    }
    Ok(out)
}

fn skesks(key_packets: &[u8]) -> Result<Vec<SkeskPacket>> {
    let mut out = Vec::new();
    for packet in packet::parse(key_packets)? {
        match packet {
            Packet::Skesk(p) => out.push(p),
            Packet::Pkesk(_) | Packet::Marker => {}
            other => {
                return Err(PgpError::malformed(format!(
                    "Unexpected {:?} packet among key packets",
                    other.packet_type()
                )))
            }
        }
    }
    Ok(out)
}

/// Recovers the session key from PKESK packets with the private keys of `rings`
#[instrument(skip_all, fields(rings = rings.len()))]
pub fn decrypt_session_key(
    key_packets: &[u8],
    rings: &[&KeyRing],
    passphrase: Option<&Password>,
) -> Result<SessionKey> {
    unwrap_with_keys(&pkesks(key_packets)?, rings, passphrase)
}

/// Wraps `session_key` for the encryption key of `recipient` valid at `now`
pub fn encrypt_session_key<R: CryptoRng + RngCore>(
    session_key: &SessionKey,
    recipient: &KeyRing,
    now: u64,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let key = select_encryption_key(recipient, now)?;
    let pkesk = PkeskPacket::wrap(key.public(), session_key, rng)?;
    Ok(Packet::Pkesk(pkesk).to_bytes())
}

/// Recovers the session key from SKESK packets
pub fn decrypt_session_key_with_password(
    key_packets: &[u8],
    password: &Password,
) -> Result<SessionKey> {
    unwrap_with_passwords(&skesks(key_packets)?, &[password])
}

/// Seals `session_key` under a password; an empty password is rejected
pub fn encrypt_session_key_with_password<R: CryptoRng + RngCore>(
    session_key: &SessionKey,
    password: &Password,
    params: Argon2Params,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let skesk = SkeskPacket::encrypt(session_key, password, params, rng)?;
    Ok(Packet::Skesk(skesk).to_bytes())
}

/// Splits a binary or armored message into key packets and data packet
pub fn split_message(message: &[u8]) -> Result<SplitMessage> {
    let parts = split_parts(packet::parse(message)?)?;
    let mut key_packets: Vec<Packet> = parts.pkesks.into_iter().map(Packet::Pkesk).collect();
    key_packets.extend(parts.skesks.into_iter().map(Packet::Skesk));
    Ok(SplitMessage {
        key_packets: packet::serialize(&key_packets),
        data_packet: Packet::EncryptedData(parts.data).to_bytes(),
    })
}

/// Opens a detached data packet with a known session key.
///
/// Signatures inside are checked against `verifiers` at time `now`.
pub fn decrypt_data_packet(
    data_packet: &[u8],
    session_key: &SessionKey,
    verifiers: &[&KeyRing],
    now: u64,
) -> Result<DecryptedMessage> {
    let parts = split_parts(packet::parse(data_packet)?)?;
    if !parts.pkesks.is_empty() || !parts.skesks.is_empty() {
        return Err(PgpError::invalid_input(
            "Expected a bare data packet; use split_message first",
        ));
    }
    open_data(
        &parts.data,
        session_key,
        verifiers,
        now,
        &CancellationToken::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crypto::SymmetricAlgorithm;
    use crate::key::generate;
    use crate::message::{encrypt, encrypt_with_password};
    use rand::rngs::OsRng;

    const T0: u64 = 1_700_000_000;

    fn config() -> Config {
        Config {
            now: Some(T0),
            argon2: Argon2Params {
                iterations: 1,
                parallelism: 1,
                memory_exponent: 8,
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_random_tokens() {
        let a = random_token(&mut OsRng);
        let b = random_token(&mut OsRng);
        assert_eq!(a.len(), TOKEN_SIZE);
        assert_ne!(a, b);
        assert_eq!(random_token_with(5, &mut OsRng).unwrap().len(), 5);
        assert!(random_token_with(0, &mut OsRng).unwrap().is_empty());
        assert!(random_token_with(MAX_TOKEN_SIZE + 1, &mut OsRng).is_err());
    }

    #[test]
    fn test_split_and_open() {
        let alice = generate("Alice", "", None, &config(), &mut OsRng).unwrap();
        let message = encrypt(&[&alice], b"split me", &config(), &mut OsRng).unwrap();

        let split = split_message(&message).unwrap();
        let mut joined = split.key_packets.clone();
        joined.extend_from_slice(&split.data_packet);
        assert_eq!(joined, message);

        let session_key = decrypt_session_key(&split.key_packets, &[&alice], None).unwrap();
        let opened = decrypt_data_packet(&split.data_packet, &session_key, &[], T0).unwrap();
        assert_eq!(opened.data, b"split me");

        assert!(matches!(
            decrypt_data_packet(&message, &session_key, &[], T0),
            Err(PgpError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rewrap_for_new_recipient() {
        let alice = generate("Alice", "", None, &config(), &mut OsRng).unwrap();
        let bob = generate("Bob", "", None, &config(), &mut OsRng).unwrap();
        let message = encrypt(&[&alice], b"forwarded", &config(), &mut OsRng).unwrap();
        let split = split_message(&message).unwrap();

        let session_key = decrypt_session_key(&split.key_packets, &[&alice], None).unwrap();
        let for_bob = encrypt_session_key(&session_key, &bob, T0, &mut OsRng).unwrap();
        let recovered = decrypt_session_key(&for_bob, &[&bob], None).unwrap();
        assert_eq!(recovered.as_bytes(), session_key.as_bytes());

        let opened = decrypt_data_packet(&split.data_packet, &recovered, &[], T0).unwrap();
        assert_eq!(opened.data, b"forwarded");
    }

    #[test]
    fn test_password_session_key() {
        let session_key = SessionKey::generate(SymmetricAlgorithm::Aes128, &mut OsRng);
        let password = Password::new("pw");
        let params = config().argon2;
        let packet =
            encrypt_session_key_with_password(&session_key, &password, params, &mut OsRng).unwrap();
        let recovered = decrypt_session_key_with_password(&packet, &password).unwrap();
        assert_eq!(recovered.algorithm(), SymmetricAlgorithm::Aes128);
        assert_eq!(recovered.as_bytes(), session_key.as_bytes());

        assert!(matches!(
            decrypt_session_key_with_password(&packet, &Password::new("other")),
            Err(PgpError::Passphrase(_))
        ));
        assert!(matches!(
            encrypt_session_key_with_password(&session_key, &Password::new(""), params, &mut OsRng),
            Err(PgpError::Passphrase(_))
        ));
    }

    #[test]
    fn test_password_message_key_packets() {
        let password = Password::new("pw");
        let message = encrypt_with_password(&password, b"x", &config(), &mut OsRng).unwrap();
        let split = split_message(&message).unwrap();
        assert!(decrypt_session_key_with_password(&split.key_packets, &password).is_ok());
        assert!(matches!(
            decrypt_session_key(&split.key_packets, &[], None),
            Err(PgpError::NoDecryptionKey(_))
        ));
    }
}
