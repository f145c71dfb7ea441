//! Document signatures: detached and inline signing and verification.

use super::{read_content, SignatureStatus};
use crate::config::Config;
use crate::crypto::Password;
use crate::error::{PgpError, Result};
use crate::key::{is_revoked, select_signing_key, validate_binding, Key, KeyRing};
use crate::packet::signature::document_context;
use crate::packet::{
    self, CompressedDataPacket, CompressionAlgorithm, DataFormat, Fingerprint, LiteralDataPacket,
    Packet, SignatureBuilder, SignaturePacket, SignatureType,
};
use tracing::{debug, instrument};

/// Inline-signed data after verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMessage {
    pub data: Vec<u8>,
    pub status: SignatureStatus,
    pub signer: Option<Fingerprint>,
}

/// Signs `data` with the signing key of `signer`
pub(crate) fn make_signature(
    signer: &KeyRing,
    passphrase: Option<&Password>,
    data: &[u8],
    text: bool,
    config: &Config,
) -> Result<SignaturePacket> {
    let key = select_signing_key(signer, config.now())?;
    let private = key.unlock(passphrase)?;
    let sig_type = if text {
        SignatureType::Text
    } else {
        SignatureType::Binary
    };
    SignatureBuilder::new(sig_type, config.hash).sign(
        key.public(),
        &private,
        &document_context(sig_type, data),
        config.timestamp(),
    )
}

/// Detached signature over `data`, as a binary signature packet.
///
/// With `text` set, line endings are normalized to CRLF before hashing.
#[instrument(skip_all, fields(signer = %signer.fingerprint(), len = data.len()))]
pub fn sign_detached(
    signer: &KeyRing,
    passphrase: Option<&Password>,
    data: &[u8],
    text: bool,
    config: &Config,
) -> Result<Vec<u8>> {
    let sig = make_signature(signer, passphrase, data, text, config)?;
    Ok(Packet::Signature(sig).to_bytes())
}

/// Signature packet followed by the literal data, optionally compressed
#[instrument(skip_all, fields(signer = %signer.fingerprint(), len = data.len()))]
pub fn sign_inline(
    signer: &KeyRing,
    passphrase: Option<&Password>,
    data: &[u8],
    text: bool,
    config: &Config,
) -> Result<Vec<u8>> {
    let sig = make_signature(signer, passphrase, data, text, config)?;
    let literal = LiteralDataPacket {
        format: if text { DataFormat::Text } else { DataFormat::Binary },
        file_name: Vec::new(),
        date: config.timestamp(),
        data: data.to_vec(),
    };
    let packets = [Packet::Signature(sig), Packet::LiteralData(literal)];
    match config.compression {
        CompressionAlgorithm::Uncompressed => Ok(packet::serialize(&packets)),
        algorithm => {
            let compressed = CompressedDataPacket::compress(algorithm, &packet::serialize(&packets))?;
            Ok(Packet::CompressedData(compressed).to_bytes())
        }
    }
}

/// Finds the key that issued `sig` among `verifiers`
fn find_issuer<'a>(sig: &SignaturePacket, verifiers: &[&'a KeyRing]) -> Option<(&'a KeyRing, &'a Key)> {
    verifiers.iter().copied().find_map(|ring| {
        ring.keys()
            .find(|key| key.algorithm().can_sign() && sig.is_issued_by(&key.fingerprint()))
            .map(|key| (ring, key))
    })
}

/// Checks one document signature over `data`
pub(crate) fn check_signature(
    sig: &SignaturePacket,
    data: &[u8],
    verifiers: &[&KeyRing],
    now: u64,
) -> (SignatureStatus, Option<Fingerprint>) {
    let Some((ring, key)) = find_issuer(sig, verifiers) else {
        return (SignatureStatus::KeyNotFound, None);
    };
    let fingerprint = Some(key.fingerprint());

    if !matches!(sig.sig_type, SignatureType::Binary | SignatureType::Text) {
        return (SignatureStatus::Invalid, fingerprint);
    }
    if let Err(e) = sig.verify(&key.public().key, &document_context(sig.sig_type, data)) {
        debug!(error = %e, "signature does not verify");
        return (SignatureStatus::Invalid, fingerprint);
    }

    let Some(created) = sig.created().map(u64::from) else {
        return (SignatureStatus::Invalid, fingerprint);
    };
    if created > now {
        debug!(created, now, "signature created after verification time");
        return (SignatureStatus::Expired, fingerprint);
    }
    let primary = ring.primary();
    let is_subkey = key.fingerprint() != primary.fingerprint();
    if is_revoked(primary, primary)
        || is_revoked(key, primary)
        || (is_subkey && !validate_binding(key, primary, created) && !ring.is_expired(key, created))
        || u64::from(key.created()) > created
        || !ring.usage(key, created).sign
    {
        return (SignatureStatus::Invalid, fingerprint);
    }

    if sig.is_expired_at(now)
        || ring.is_expired(key, created)
        || ring.is_expired(primary, created)
    {
        return (SignatureStatus::Expired, fingerprint);
    }
    (SignatureStatus::Valid, fingerprint)
}

/// Best status over all signatures, `None` if there are none
pub(crate) fn evaluate(
    signatures: &[SignaturePacket],
    data: &[u8],
    verifiers: &[&KeyRing],
    now: u64,
) -> Option<(SignatureStatus, Option<Fingerprint>)> {
    signatures
        .iter()
        .map(|sig| check_signature(sig, data, verifiers, now))
        .max_by_key(|(status, _)| status.rank())
}

/// Verifies a detached signature over `data`.
///
/// Malformed signature data is an error; a signature that merely fails to
/// check is reported through the status.
pub fn verify_detached(
    verifiers: &[&KeyRing],
    data: &[u8],
    signature: &[u8],
    now: u64,
) -> Result<(SignatureStatus, Option<Fingerprint>)> {
    let mut signatures = Vec::new();
    for packet in packet::parse(signature)? {
        match packet {
            Packet::Signature(sig) => signatures.push(sig),
            Packet::Marker => {}
            other => {
                return Err(PgpError::malformed(format!(
                    "Unexpected {:?} packet in detached signature",
                    other.packet_type()
                )))
            }
        }
    }
    evaluate(&signatures, data, verifiers, now)
        .ok_or_else(|| PgpError::malformed("No signature packet found"))
}

/// Verifies an inline-signed message and returns its data
pub fn verify_inline(verifiers: &[&KeyRing], message: &[u8], now: u64) -> Result<VerifiedMessage> {
    let content = read_content(packet::parse(message)?)?;
    let (status, signer) = evaluate(&content.signatures, &content.literal.data, verifiers, now)
        .ok_or_else(|| PgpError::malformed("Message is not signed"))?;
    Ok(VerifiedMessage {
        data: content.literal.data,
        status,
        signer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{generate, maintenance};
    use crate::packet::signature::reason;
    use rand::rngs::OsRng;

    const T0: u64 = 1_700_000_000;

    fn config() -> Config {
        Config {
            now: Some(T0),
            ..Config::default()
        }
    }

    fn signer() -> KeyRing {
        generate("Ivan", "ivan@example.org", None, &config(), &mut OsRng).unwrap()
    }

    #[test]
    fn test_detached_roundtrip() {
        let ring = signer();
        let sig = sign_detached(&ring, None, b"payload", false, &config()).unwrap();
        let (status, who) = verify_detached(&[&ring], b"payload", &sig, T0).unwrap();
        assert_eq!(status, SignatureStatus::Valid);
        assert_eq!(who, Some(ring.fingerprint()));

        let (status, _) = verify_detached(&[&ring], b"payloaD", &sig, T0).unwrap();
        assert_eq!(status, SignatureStatus::Invalid);
    }

    #[test]
    fn test_text_signature_normalizes_line_endings() {
        let ring = signer();
        let sig = sign_detached(&ring, None, b"a\nb\n", true, &config()).unwrap();
        let (status, _) = verify_detached(&[&ring], b"a\r\nb\r\n", &sig, T0).unwrap();
        assert_eq!(status, SignatureStatus::Valid);
    }

    #[test]
    fn test_unknown_signer() {
        let ring = signer();
        let other = signer();
        let sig = sign_detached(&ring, None, b"data", false, &config()).unwrap();
        let (status, who) = verify_detached(&[&other], b"data", &sig, T0).unwrap();
        assert_eq!(status, SignatureStatus::KeyNotFound);
        assert_eq!(who, None);
    }

    #[test]
    fn test_expired_signing_key() {
        let config = Config {
            key_lifetime: Some(100),
            ..config()
        };
        let ring = generate("Judy", "", None, &config, &mut OsRng).unwrap();
        let sig = sign_detached(&ring, None, b"data", false, &config).unwrap();
        let (status, _) = verify_detached(&[&ring], b"data", &sig, T0 + 50).unwrap();
        assert_eq!(status, SignatureStatus::Valid);

        let late = Config {
            now: Some(T0 + 200),
            ..config
        };
        assert!(matches!(
            sign_detached(&ring, None, b"data", false, &late),
            Err(PgpError::ExpiredKey(_))
        ));
    }

    #[test]
    fn test_signer_clock_ahead_of_verifier() {
        let ring = signer();
        let ahead = Config {
            now: Some(T0 + 86_400),
            ..config()
        };
        let sig = sign_detached(&ring, None, b"data", false, &ahead).unwrap();

        let (status, who) = verify_detached(&[&ring], b"data", &sig, T0).unwrap();
        assert_eq!(status, SignatureStatus::Expired);
        assert_eq!(who, Some(ring.fingerprint()));

        let (status, _) = verify_detached(&[&ring], b"data", &sig, T0 + 86_400).unwrap();
        assert_eq!(status, SignatureStatus::Valid);
    }

    #[test]
    fn test_revoked_signer() {
        let ring = signer();
        let sig = sign_detached(&ring, None, b"data", false, &config()).unwrap();
        let primary_key = ring.primary().unlock(None).unwrap();
        let revoked =
            maintenance::revoke(&ring, &primary_key, reason::KEY_RETIRED, "", T0 + 1).unwrap();
        let (status, _) = verify_detached(&[&revoked], b"data", &sig, T0 + 2).unwrap();
        assert_eq!(status, SignatureStatus::Invalid);
    }

    #[test]
    fn test_inline_roundtrip() {
        let ring = signer();
        for compression in [CompressionAlgorithm::Uncompressed, CompressionAlgorithm::Zlib] {
            let config = Config {
                compression,
                ..config()
            };
            let message = sign_inline(&ring, None, b"inline body", false, &config).unwrap();
            let verified = verify_inline(&[&ring], &message, T0).unwrap();
            assert_eq!(verified.data, b"inline body");
            assert_eq!(verified.status, SignatureStatus::Valid);
        }
    }

    #[test]
    fn test_malformed_signature_input() {
        let ring = signer();
        assert!(verify_detached(&[&ring], b"data", b"\xC2\x05abc", T0).is_err());
        let literal = Packet::LiteralData(LiteralDataPacket::binary(b"x".to_vec(), 0)).to_bytes();
        assert!(verify_detached(&[&ring], b"data", &literal, T0).is_err());
        assert!(verify_inline(&[&ring], &literal, T0).is_err());
    }
}
