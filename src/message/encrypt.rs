//! Encryption pipeline.
//!
//! `GenerateSessionKey -> WrapSessionKeyPerRecipient -> EncryptLiteralData ->
//! Emit`. The session key is wrapped once per recipient on a scoped worker
//! group; the packets are emitted in recipient order no matter which worker
//! finishes first. The literal data is encrypted once.

use super::sign::make_signature;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::crypto::{Password, SessionKey};
use crate::error::{PgpError, Result};
use crate::key::{select_encryption_key, KeyRing};
use crate::packet::{
    self, CompressedDataPacket, CompressionAlgorithm, DataFormat, EncryptedDataPacket,
    LiteralDataPacket, Packet, PkeskPacket, PublicKeyPacket, SkeskPacket,
};
use crate::validation::{Validator, MAX_RECIPIENTS};
use rand::rngs::StdRng;
use rand::{CryptoRng, RngCore, SeedableRng};
use std::thread;
use tracing::{debug, instrument};

/// Configurable encryption of one message
pub struct Encryptor<'a> {
    config: &'a Config,
    recipients: Vec<&'a KeyRing>,
    passwords: Vec<&'a Password>,
    signer: Option<(&'a KeyRing, Option<&'a Password>)>,
    text: bool,
    file_name: Vec<u8>,
    cancel: CancellationToken,
}

impl<'a> Encryptor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            recipients: Vec::new(),
            passwords: Vec::new(),
            signer: None,
            text: false,
            file_name: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn recipient(mut self, ring: &'a KeyRing) -> Self {
        self.recipients.push(ring);
        self
    }

    pub fn recipients(mut self, rings: impl IntoIterator<Item = &'a KeyRing>) -> Self {
        self.recipients.extend(rings);
        self
    }

    /// Also lets the message be opened with `password`
    pub fn password(mut self, password: &'a Password) -> Self {
        self.passwords.push(password);
        self
    }

    /// Signs the literal data before encrypting it
    pub fn sign_with(mut self, signer: &'a KeyRing, passphrase: Option<&'a Password>) -> Self {
        self.signer = Some((signer, passphrase));
        self
    }

    /// Marks the data as text; signatures then use CRLF-canonical form
    pub fn text(mut self, text: bool) -> Self {
        self.text = text;
        self
    }

    pub fn file_name(mut self, name: impl Into<Vec<u8>>) -> Self {
        self.file_name = name.into();
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runs the pipeline and returns the binary message
    #[instrument(skip_all, fields(recipients = self.recipients.len(), len = plaintext.len()))]
    pub fn encrypt<R: CryptoRng + RngCore>(&self, plaintext: &[u8], rng: &mut R) -> Result<Vec<u8>> {
        self.config.validate()?;
        Validator::validate_message_size(plaintext)?;
        if self.file_name.len() > usize::from(u8::MAX) {
            return Err(PgpError::invalid_input("File name longer than 255 bytes"));
        }
        if self.recipients.is_empty() && self.passwords.is_empty() {
            return Err(PgpError::invalid_input(
                "At least one recipient or password is required",
            ));
        }
        if !self.recipients.is_empty() {
            Validator::validate_recipient_count(self.recipients.len())?;
        }

        let now = self.config.now();
        let keys = self
            .recipients
            .iter()
            .map(|ring| select_encryption_key(ring, now).map(|key| key.public().clone()))
            .collect::<Result<Vec<_>>>()?;

        debug!(stage = "generate_session_key", cipher = %self.config.cipher);
        let session_key = SessionKey::generate(self.config.cipher, rng);

        debug!(stage = "wrap_session_key", recipients = keys.len());
        let mut packets: Vec<Packet> =
            wrap_for_recipients(&keys, &session_key, self.config.wrap_workers, &self.cancel, rng)?
                .into_iter()
                .map(Packet::Pkesk)
                .collect();
        for password in &self.passwords {
            self.cancel.check()?;
            let skesk = SkeskPacket::encrypt(&session_key, password, self.config.argon2, rng)?;
            packets.push(Packet::Skesk(skesk));
        }

        debug!(stage = "encrypt_literal_data");
        let content = self.content(plaintext)?;
        let encrypted = EncryptedDataPacket::encrypt(
            &session_key,
            self.config.chunk_size_octet,
            &content,
            &self.cancel,
            rng,
        )?;
        packets.push(Packet::EncryptedData(encrypted));

        debug!(stage = "emit", packets = packets.len());
        Ok(packet::serialize(&packets))
    }

    /// Serialized plaintext packet stream: optional signature, literal data
    fn content(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut packets = Vec::with_capacity(2);
        if let Some((signer, passphrase)) = self.signer {
            let sig = make_signature(signer, passphrase, plaintext, self.text, self.config)?;
            packets.push(Packet::Signature(sig));
        }
        packets.push(Packet::LiteralData(LiteralDataPacket {
            format: if self.text {
                DataFormat::Text
            } else {
                DataFormat::Binary
            },
            file_name: self.file_name.clone(),
            date: self.config.timestamp(),
            data: plaintext.to_vec(),
        }));
        let stream = packet::serialize(&packets);

        match self.config.compression {
            CompressionAlgorithm::Uncompressed => Ok(stream),
            algorithm => {
                let compressed = CompressedDataPacket::compress(algorithm, &stream)?;
                Ok(Packet::CompressedData(compressed).to_bytes())
            }
        }
    }
}

/// Wraps `session_key` for every recipient key, preserving input order.
///
/// Each recipient gets its own generator seeded from `rng`, so the result
/// depends only on `rng` and not on thread scheduling.
pub(crate) fn wrap_for_recipients<R: CryptoRng + RngCore>(
    keys: &[PublicKeyPacket],
    session_key: &SessionKey,
    workers: usize,
    cancel: &CancellationToken,
    rng: &mut R,
) -> Result<Vec<PkeskPacket>> {
    if keys.len() > MAX_RECIPIENTS {
        return Err(PgpError::validation("Too many recipients"));
    }
    let jobs: Vec<(&PublicKeyPacket, [u8; 32])> = keys
        .iter()
        .map(|key| {
            let mut seed = [0u8; 32];
            rng.fill_bytes(&mut seed);
            (key, seed)
        })
        .collect();

    let wrap = |(key, seed): &(&PublicKeyPacket, [u8; 32])| -> Result<PkeskPacket> {
        cancel.check()?;
        PkeskPacket::wrap(key, session_key, &mut StdRng::from_seed(*seed))
    };

    let workers = workers.clamp(1, jobs.len().max(1));
    if workers == 1 {
        return jobs.iter().map(wrap).collect();
    }

    let per_worker = jobs.len().div_ceil(workers);
    let wrap = &wrap;
    let batches: Vec<Vec<Result<PkeskPacket>>> = thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .chunks(per_worker)
            .map(|batch| scope.spawn(move || batch.iter().map(wrap).collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });
    batches.into_iter().flatten().collect()
}

/// Encrypts `plaintext` to every ring in `recipients`
pub fn encrypt<R: CryptoRng + RngCore>(
    recipients: &[&KeyRing],
    plaintext: &[u8],
    config: &Config,
    rng: &mut R,
) -> Result<Vec<u8>> {
    Encryptor::new(config)
        .recipients(recipients.iter().copied())
        .encrypt(plaintext, rng)
}

/// Signs with `signer`, then encrypts to every ring in `recipients`
pub fn encrypt_and_sign<R: CryptoRng + RngCore>(
    recipients: &[&KeyRing],
    signer: &KeyRing,
    passphrase: Option<&Password>,
    plaintext: &[u8],
    config: &Config,
    rng: &mut R,
) -> Result<Vec<u8>> {
    Encryptor::new(config)
        .recipients(recipients.iter().copied())
        .sign_with(signer, passphrase)
        .encrypt(plaintext, rng)
}

/// Encrypts `plaintext` under a password only
pub fn encrypt_with_password<R: CryptoRng + RngCore>(
    password: &Password,
    plaintext: &[u8],
    config: &Config,
    rng: &mut R,
) -> Result<Vec<u8>> {
    Encryptor::new(config)
        .password(password)
        .encrypt(plaintext, rng)
}
