//! Property-based tests
//!
//! These tests check invariants across generated inputs: canonical packet
//! normalization, message round trips, and that hostile input never panics.

use pgpcore::{
    armor::{self, ArmorKind},
    crypto::Argon2Params,
    key, message,
    packet::{self, signature::canonicalize_text, Packet},
    Config, KeyRing,
};
use proptest::prelude::*;
use rand::rngs::OsRng;
use std::sync::OnceLock;

const USER_ID_TAG: u8 = 13;
const NOW: u64 = 1_700_000_000;

fn config() -> Config {
    Config {
        now: Some(NOW),
        chunk_size_octet: 0,
        argon2: Argon2Params {
            iterations: 1,
            parallelism: 1,
            memory_exponent: 8,
        },
        ..Config::default()
    }
}

fn shared_ring() -> &'static KeyRing {
    static RING: OnceLock<KeyRing> = OnceLock::new();
    RING.get_or_init(|| {
        key::generate("Prop", "prop@example.org", None, &config(), &mut OsRng)
            .expect("Failed to generate key")
    })
}

/// Frames `body` under tag 13 in one of several equivalent encodings.
///
/// Indeterminate length is only valid for the last packet of a stream.
fn frame(body: &[u8], framing: u8, last: bool) -> Vec<u8> {
    let len = body.len();
    let old = 0x80 | (USER_ID_TAG << 2);
    let mut out = match framing % 7 {
        0 => vec![0xC0 | USER_ID_TAG, len as u8],
        1 => {
            let mut h = vec![0xC0 | USER_ID_TAG, 0xFF];
            h.extend_from_slice(&(len as u32).to_be_bytes());
            h
        }
        2 => vec![old, len as u8],
        3 => vec![old | 1, 0, len as u8],
        4 => {
            let mut h = vec![old | 2];
            h.extend_from_slice(&(len as u32).to_be_bytes());
            h
        }
        5 => {
            // One-octet partial chunk, then the rest as a fixed length
            let mut h = vec![0xC0 | USER_ID_TAG, 0xE0, body[0], (len - 1) as u8];
            h.extend_from_slice(&body[1..]);
            return h;
        }
        _ if last => vec![old | 3],
        _ => vec![0xC0 | USER_ID_TAG, len as u8],
    };
    out.extend_from_slice(body);
    out
}

fn user_id() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 .@<>_-]{0,80}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn normalization_is_idempotent(
        packets in prop::collection::vec((user_id(), any::<u8>()), 1..6)
    ) {
        let mut input = Vec::new();
        for (i, (uid, framing)) in packets.iter().enumerate() {
            input.extend(frame(uid.as_bytes(), *framing, i == packets.len() - 1));
        }

        let parsed = packet::parse(&input).unwrap();
        let expected: Vec<Packet> = packets.iter().map(|(uid, _)| Packet::UserId(uid.clone())).collect();
        prop_assert_eq!(&parsed, &expected);

        let once = packet::serialize(&parsed);
        let twice = packet::serialize(&packet::parse(&once).unwrap());
        prop_assert_eq!(&once, &twice);

        // Canonical input is reproduced byte for byte
        let canonical: Vec<u8> = packets
            .iter()
            .flat_map(|(uid, _)| frame(uid.as_bytes(), 0, false))
            .collect();
        prop_assert_eq!(&once, &canonical);
    }

    #[test]
    fn parsing_arbitrary_bytes_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = packet::parse(&data);
        let _ = key::import_many(&data);
        let _ = armor::decode(&data);
    }

    #[test]
    fn text_canonicalization_is_idempotent(data in prop::collection::vec(
        prop::sample::select(vec![b'a', b'\n', b'\r', b' ']), 0..200)
    ) {
        let once = canonicalize_text(&data);
        prop_assert_eq!(canonicalize_text(&once), once.clone());
        prop_assert!(!once.windows(2).any(|w| w[0] != b'\r' && w[1] == b'\n'));
    }

    #[test]
    fn armor_preserves_bytes(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let armored = armor::encode(ArmorKind::Signature, &data);
        let (kind, decoded) = armor::decode(armored.as_bytes()).unwrap();
        prop_assert_eq!(kind, ArmorKind::Signature);
        prop_assert_eq!(decoded, data);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn encrypt_decrypt_roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..5000)) {
        let ring = shared_ring();
        let config = config();
        let encrypted = message::encrypt(&[ring], &plaintext, &config, &mut OsRng).unwrap();
        let decrypted = message::decrypt(&[ring], None, &encrypted, &config).unwrap();
        prop_assert_eq!(decrypted.data, plaintext);
    }

    #[test]
    fn sign_verify_roundtrip(data in prop::collection::vec(any::<u8>(), 0..2000), flip in any::<prop::sample::Index>()) {
        let ring = shared_ring();
        let config = config();
        let signature = message::sign_detached(ring, None, &data, false, &config).unwrap();
        let (status, _) = message::verify_detached(&[ring], &data, &signature, NOW).unwrap();
        prop_assert!(status.is_valid());

        if !data.is_empty() {
            let mut altered = data.clone();
            altered[flip.index(data.len())] ^= 0x80;
            let (status, _) = message::verify_detached(&[ring], &altered, &signature, NOW).unwrap();
            prop_assert!(!status.is_valid());
        }
    }
}
