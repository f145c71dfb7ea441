//! Decryption pipeline.
//!
//! `LocateSessionKeyPacket -> UnwrapSessionKey -> DecryptLiteralData ->
//! VerifyOptionalSignature -> Emit`. Candidate private keys are tried in
//! ring order, primary first; the first key that unwraps a session key wins.

use super::sign::evaluate;
use super::{read_content, DecryptedMessage};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::crypto::{Password, PrivateKey, SessionKey};
use crate::error::{PgpError, Result};
use crate::key::{decryption_keys, KeyRing};
use crate::packet::{self, EncryptedDataPacket, Packet, PkeskPacket, SkeskPacket};
use crate::validation::Validator;
use tracing::{debug, instrument, warn};

/// Session key packets and the encrypted data of one message
#[derive(Debug)]
pub(crate) struct Parts {
    pub pkesks: Vec<PkeskPacket>,
    pub skesks: Vec<SkeskPacket>,
    pub data: EncryptedDataPacket,
}

/// Splits a parsed message into its session key packets and the single
/// trailing encrypted data packet.
pub(crate) fn split_parts(packets: Vec<Packet>) -> Result<Parts> {
    Validator::validate_packet_count(packets.len())?;
    let mut pkesks = Vec::new();
    let mut skesks = Vec::new();
    let mut data = None;
    for packet in packets {
        if data.is_some() {
            return Err(PgpError::malformed("Data after the encrypted data packet"));
        }
        match packet {
            Packet::Pkesk(p) => pkesks.push(p),
            Packet::Skesk(p) => skesks.push(p),
            Packet::EncryptedData(p) => data = Some(p),
            Packet::Marker => {}
            other => {
                return Err(PgpError::malformed(format!(
                    "Unexpected {:?} packet in encrypted message",
                    other.packet_type()
                )))
            }
        }
    }
    let data = data.ok_or_else(|| PgpError::malformed("Message has no encrypted data packet"))?;
    Ok(Parts {
        pkesks,
        skesks,
        data,
    })
}

/// Tries every decryption key of `rings` against the PKESKs addressed to it.
///
/// A key that cannot be unlocked, or a matching packet that fails to unwrap,
/// does not stop the search. If nothing succeeds, the first such failure is
/// returned; when no packet was addressed to any key the result is
/// [`PgpError::NoDecryptionKey`].
pub(crate) fn unwrap_with_keys(
    pkesks: &[PkeskPacket],
    rings: &[&KeyRing],
    passphrase: Option<&Password>,
) -> Result<SessionKey> {
    let mut first_error = None;
    for key in rings.iter().flat_map(|ring| decryption_keys(ring)) {
        let candidates: Vec<&PkeskPacket> = pkesks
            .iter()
            .filter(|p| p.pk_algorithm == key.algorithm())
            .filter(|p| p.is_wildcard() || crate::crypto::key_ids_equal(p.key_id, key.key_id()))
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let private: PrivateKey = match key.unlock(passphrase) {
            Ok(private) => private,
            Err(e) => {
                first_error.get_or_insert(e);
                continue;
            }
        };
        for pkesk in candidates {
            match pkesk.unwrap(&private) {
                Ok(session_key) => {
                    debug!(key = %key.fingerprint(), "unwrapped session key");
                    return Ok(session_key);
                }
                // Wildcard packets are expected to fail for all but one key
                Err(_) if pkesk.is_wildcard() => {}
                Err(e) => {
                    warn!(key = %key.fingerprint(), error = %e, "session key packet failed to unwrap");
                    first_error.get_or_insert(e);
                }
            }
        }
    }
    Err(first_error.unwrap_or_else(|| {
        PgpError::no_decryption_key("No supplied private key matches the message recipients")
    }))
}

/// Tries every password against every SKESK
pub(crate) fn unwrap_with_passwords(
    skesks: &[SkeskPacket],
    passwords: &[&Password],
) -> Result<SessionKey> {
    if skesks.is_empty() {
        return Err(PgpError::no_decryption_key(
            "Message has no password-encrypted session key",
        ));
    }
    for password in passwords {
        for skesk in skesks {
            if let Ok(session_key) = skesk.decrypt(password) {
                return Ok(session_key);
            }
        }
    }
    Err(PgpError::passphrase("Password incorrect"))
}

/// Decrypts the SEIPD packet and verifies any signatures inside it
pub(crate) fn open_data(
    data: &EncryptedDataPacket,
    session_key: &SessionKey,
    verifiers: &[&KeyRing],
    now: u64,
    cancel: &CancellationToken,
) -> Result<DecryptedMessage> {
    debug!(stage = "decrypt_literal_data", len = data.ciphertext.len());
    let plaintext = data.decrypt(session_key, cancel)?;
    let content = read_content(packet::parse_reader(plaintext.as_slice())?)?;

    debug!(stage = "verify_signature", signatures = content.signatures.len());
    let (signature_status, signer) =
        match evaluate(&content.signatures, &content.literal.data, verifiers, now) {
            Some((status, signer)) => (Some(status), signer),
            None => (None, None),
        };
    Ok(DecryptedMessage {
        data: content.literal.data,
        file_name: content.literal.file_name,
        signature_status,
        signer,
    })
}

/// Configurable decryption of one message
pub struct Decryptor<'a> {
    config: &'a Config,
    keys: Vec<&'a KeyRing>,
    passphrase: Option<&'a Password>,
    passwords: Vec<&'a Password>,
    verifiers: Vec<&'a KeyRing>,
    cancel: CancellationToken,
}

impl<'a> Decryptor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            keys: Vec::new(),
            passphrase: None,
            passwords: Vec::new(),
            verifiers: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Adds a ring whose private keys are tried
    pub fn key(mut self, ring: &'a KeyRing) -> Self {
        self.keys.push(ring);
        self
    }

    pub fn keys(mut self, rings: impl IntoIterator<Item = &'a KeyRing>) -> Self {
        self.keys.extend(rings);
        self
    }

    /// Passphrase for protected private keys
    pub fn passphrase(mut self, passphrase: &'a Password) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    /// Password for password-encrypted messages
    pub fn password(mut self, password: &'a Password) -> Self {
        self.passwords.push(password);
        self
    }

    /// Adds a ring used to check signatures inside the message
    pub fn verifier(mut self, ring: &'a KeyRing) -> Self {
        self.verifiers.push(ring);
        self
    }

    pub fn verifiers(mut self, rings: impl IntoIterator<Item = &'a KeyRing>) -> Self {
        self.verifiers.extend(rings);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[instrument(skip_all, fields(keys = self.keys.len(), len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<DecryptedMessage> {
        Validator::validate_encrypted_size(ciphertext)?;
        if self.keys.is_empty() && self.passwords.is_empty() {
            return Err(PgpError::invalid_input(
                "At least one private key or password is required",
            ));
        }

        debug!(stage = "locate_session_key_packet");
        let parts = split_parts(packet::parse(ciphertext)?)?;

        debug!(
            stage = "unwrap_session_key",
            pkesks = parts.pkesks.len(),
            skesks = parts.skesks.len()
        );
        let session_key = self.session_key(&parts)?;
        self.cancel.check()?;

        let message = open_data(
            &parts.data,
            &session_key,
            &self.verifiers,
            self.config.now(),
            &self.cancel,
        )?;
        debug!(stage = "emit", len = message.data.len());
        Ok(message)
    }

    fn session_key(&self, parts: &Parts) -> Result<SessionKey> {
        let by_key = if self.keys.is_empty() {
            None
        } else {
            match unwrap_with_keys(&parts.pkesks, &self.keys, self.passphrase) {
                Ok(session_key) => return Ok(session_key),
                Err(e) => Some(e),
            }
        };
        if !self.passwords.is_empty() {
            match unwrap_with_passwords(&parts.skesks, &self.passwords) {
                Ok(session_key) => return Ok(session_key),
                Err(e) if by_key.is_none() => return Err(e),
                Err(_) => {}
            }
        }
        Err(by_key.unwrap_or_else(|| PgpError::no_decryption_key("No session key could be recovered")))
    }
}

/// Decrypts with the private keys of `rings`, checking signatures against
/// the same rings.
pub fn decrypt(
    rings: &[&KeyRing],
    passphrase: Option<&Password>,
    ciphertext: &[u8],
    config: &Config,
) -> Result<DecryptedMessage> {
    let mut decryptor = Decryptor::new(config)
        .keys(rings.iter().copied())
        .verifiers(rings.iter().copied());
    if let Some(passphrase) = passphrase {
        decryptor = decryptor.passphrase(passphrase);
    }
    decryptor.decrypt(ciphertext)
}

/// Decrypts a password-encrypted message
pub fn decrypt_with_password(
    password: &Password,
    ciphertext: &[u8],
    config: &Config,
) -> Result<DecryptedMessage> {
    Decryptor::new(config).password(password).decrypt(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Argon2Params;
    use crate::key::generate;
    use crate::message::{encrypt, encrypt_and_sign, encrypt_with_password, Encryptor, SignatureStatus};
    use crate::packet::CompressionAlgorithm;
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

    fn ring(name: &str) -> KeyRing {
        generate(name, "", None, &config(), &mut OsRng).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let alice = ring("Alice");
        let message = encrypt(&[&alice], b"attack at dawn", &config(), &mut OsRng).unwrap();
        let opened = decrypt(&[&alice], None, &message, &config()).unwrap();
        assert_eq!(opened.data, b"attack at dawn");
        assert_eq!(opened.signature_status, None);
    }

    #[test]
    fn test_wrong_key() {
        let alice = ring("Alice");
        let mallory = ring("Mallory");
        let message = encrypt(&[&alice], b"secret", &config(), &mut OsRng).unwrap();
        assert!(matches!(
            decrypt(&[&mallory], None, &message, &config()),
            Err(PgpError::NoDecryptionKey(_))
        ));
    }

    #[test]
    fn test_second_ring_wins() {
        let alice = ring("Alice");
        let bob = ring("Bob");
        let message = encrypt(&[&bob], b"for bob", &config(), &mut OsRng).unwrap();
        let opened = decrypt(&[&alice, &bob], None, &message, &config()).unwrap();
        assert_eq!(opened.data, b"for bob");
    }

    #[test]
    fn test_protected_key_needs_passphrase() {
        let passphrase = Password::new("correct horse");
        let carol = generate("Carol", "", Some(&passphrase), &config(), &mut OsRng).unwrap();
        let message = encrypt(&[&carol], b"locked", &config(), &mut OsRng).unwrap();

        assert!(matches!(
            decrypt(&[&carol], None, &message, &config()),
            Err(PgpError::Passphrase(_))
        ));
        let wrong = Password::new("battery staple");
        assert!(matches!(
            decrypt(&[&carol], Some(&wrong), &message, &config()),
            Err(PgpError::Passphrase(_))
        ));
        let opened = decrypt(&[&carol], Some(&passphrase), &message, &config()).unwrap();
        assert_eq!(opened.data, b"locked");
    }

    #[test]
    fn test_signed_and_compressed() {
        let alice = ring("Alice");
        let bob = ring("Bob");
        let config = Config {
            compression: CompressionAlgorithm::Zip,
            ..config()
        };
        let message =
            encrypt_and_sign(&[&bob], &alice, None, b"signed note", &config, &mut OsRng).unwrap();

        let opened = Decryptor::new(&config)
            .key(&bob)
            .verifier(&alice)
            .decrypt(&message)
            .unwrap();
        assert_eq!(opened.data, b"signed note");
        assert_eq!(opened.signature_status, Some(SignatureStatus::Valid));
        assert_eq!(opened.signer, Some(alice.fingerprint()));

        let unverified = decrypt(&[&bob], None, &message, &config).unwrap();
        assert_eq!(unverified.signature_status, Some(SignatureStatus::KeyNotFound));
    }

    #[test]
    fn test_password_roundtrip() {
        let password = Password::new("open sesame");
        let message = encrypt_with_password(&password, b"by password", &config(), &mut OsRng).unwrap();
        let opened = decrypt_with_password(&password, &message, &config()).unwrap();
        assert_eq!(opened.data, b"by password");

        assert!(matches!(
            decrypt_with_password(&Password::new("nope"), &message, &config()),
            Err(PgpError::Passphrase(_))
        ));
    }

    #[test]
    fn test_key_or_password() {
        let alice = ring("Alice");
        let password = Password::new("shared");
        let config = config();
        let message = Encryptor::new(&config)
            .recipient(&alice)
            .password(&password)
            .file_name("note.txt")
            .encrypt(b"either", &mut OsRng)
            .unwrap();

        let by_key = decrypt(&[&alice], None, &message, &config).unwrap();
        assert_eq!(by_key.file_name, b"note.txt");
        let by_password = decrypt_with_password(&password, &message, &config).unwrap();
        assert_eq!(by_password.data, b"either");
    }

    #[test]
    fn test_cancelled() {
        let alice = ring("Alice");
        let message = encrypt(&[&alice], &[7u8; 4096], &config(), &mut OsRng).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = Decryptor::new(&config())
            .key(&alice)
            .cancellation(token)
            .decrypt(&message);
        assert!(matches!(result, Err(PgpError::Cancelled)));
    }

    #[test]
    fn test_structure_errors() {
        let alice = ring("Alice");
        let config = config();
        assert!(matches!(
            decrypt(&[], None, b"", &config),
            Err(PgpError::InvalidInput(_))
        ));

        let message = encrypt(&[&alice], b"x", &config, &mut OsRng).unwrap();
        let mut trailing = message.clone();
        trailing.extend_from_slice(&Packet::Marker.to_bytes());
        assert!(matches!(
            decrypt(&[&alice], None, &trailing, &config),
            Err(PgpError::MalformedPacket(_))
        ));

        let packets = packet::parse(&message).unwrap();
        let keys_only = packet::serialize(&packets[..1]);
        assert!(matches!(
            decrypt(&[&alice], None, &keys_only, &config),
            Err(PgpError::MalformedPacket(_))
        ));
    }
}
