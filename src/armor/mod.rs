//! ASCII armor encoding and decoding for PGP messages and keys.
//!
//! This module implements the ASCII armor format defined in RFC 4880,
//! which allows binary PGP data to be represented as printable text
//! for safe transmission through text-only channels like email.

use crate::error::{PgpError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::BTreeMap;
use tracing::debug;

/// Width of base64 body lines
const LINE_WIDTH: usize = 64;

/// ASCII armor block types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmorKind {
    /// PGP message (encrypted or signed data)
    Message,
    /// Public key block
    PublicKey,
    /// Private key block
    PrivateKey,
    /// Signature block
    Signature,
}

impl ArmorKind {
    /// Get the armor header string for this type
    pub fn header_string(&self) -> &'static str {
        match self {
            ArmorKind::Message => "PGP MESSAGE",
            ArmorKind::PublicKey => "PGP PUBLIC KEY BLOCK",
            ArmorKind::PrivateKey => "PGP PRIVATE KEY BLOCK",
            ArmorKind::Signature => "PGP SIGNATURE",
        }
    }

    /// Parse armor type from header string
    pub fn from_header_string(header: &str) -> Result<Self> {
        match header {
            "PGP MESSAGE" => Ok(ArmorKind::Message),
            "PGP PUBLIC KEY BLOCK" => Ok(ArmorKind::PublicKey),
            "PGP PRIVATE KEY BLOCK" => Ok(ArmorKind::PrivateKey),
            "PGP SIGNATURE" => Ok(ArmorKind::Signature),
            other => Err(PgpError::armor(format!("Unknown armor type '{}'", other))),
        }
    }
}

/// Decoded armor block with its headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmoredData {
    pub kind: ArmorKind,
    /// Armor headers such as `Comment` or `Version`
    pub headers: BTreeMap<String, String>,
    pub data: Vec<u8>,
}

/// CRC-24 checksum used in PGP armor
pub fn crc24(data: &[u8]) -> u32 {
    crc24::hash_raw(data)
}

/// True if `data` starts with an armor header line (leading whitespace allowed)
pub fn is_armored(data: &[u8]) -> bool {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    data[start..].starts_with(b"-----BEGIN ")
}

/// Encode binary data as ASCII armored text
pub fn encode(kind: ArmorKind, data: &[u8]) -> String {
    encode_with_headers(kind, data, &BTreeMap::new())
}

/// Encode binary data as ASCII armored text with custom headers
pub fn encode_with_headers(
    kind: ArmorKind,
    data: &[u8],
    headers: &BTreeMap<String, String>,
) -> String {
    let name = kind.header_string();
    let body = STANDARD.encode(data);
    let mut output = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 128);

    output.push_str(&format!("-----BEGIN {}-----\n", name));
    for (key, value) in headers {
        output.push_str(&format!("{}: {}\n", key, value));
    }
    output.push('\n');

    // base64 output is ASCII so byte chunks are valid char boundaries
    let mut rest = body.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(LINE_WIDTH));
        output.push_str(line);
        output.push('\n');
        rest = tail;
    }

    output.push('=');
    output.push_str(&STANDARD.encode(&crc24(data).to_be_bytes()[1..]));
    output.push('\n');
    output.push_str(&format!("-----END {}-----\n", name));
    output
}

/// Decode ASCII armored text to binary data
pub fn decode(armored: &[u8]) -> Result<(ArmorKind, Vec<u8>)> {
    let block = decode_block(armored)?;
    Ok((block.kind, block.data))
}

/// Decode ASCII armored text, keeping the armor headers
pub fn decode_block(armored: &[u8]) -> Result<ArmoredData> {
    let text = std::str::from_utf8(armored)
        .map_err(|_| PgpError::armor("Armored text is not valid UTF-8"))?;
    let mut lines = text.lines().map(str::trim);

    // Find the begin header
    let kind = loop {
        let line = lines
            .next()
            .ok_or_else(|| PgpError::armor("No armor header found"))?;
        if let Some(name) = line
            .strip_prefix("-----BEGIN ")
            .and_then(|rest| rest.strip_suffix("-----"))
        {
            break ArmorKind::from_header_string(name)?;
        }
    };

    // Headers end at a blank line; a header-less block may start with data
    let mut headers = BTreeMap::new();
    let mut base64_data = String::new();
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        match line.split_once(": ") {
            Some((key, value)) => {
                headers.insert(key.to_string(), value.to_string());
            }
            None => {
                base64_data.push_str(line);
                break;
            }
        }
    }

    let expected_end = format!("-----END {}-----", kind.header_string());
    let mut checksum = None;
    let mut terminated = false;
    for line in lines {
        if line == expected_end {
            terminated = true;
            break;
        }
        if line.starts_with("-----") {
            return Err(PgpError::armor(format!(
                "End header mismatch: expected '{}', got '{}'",
                expected_end, line
            )));
        }
        if let Some(crc) = line.strip_prefix('=') {
            checksum = Some(crc.to_string());
        } else if checksum.is_some() {
            return Err(PgpError::armor("Data after armor checksum"));
        } else {
            base64_data.push_str(line);
        }
    }
    if !terminated {
        return Err(PgpError::armor("Missing end header"));
    }

    let data = STANDARD
        .decode(base64_data.as_bytes())
        .map_err(|e| PgpError::armor(format!("Invalid base64 data: {}", e)))?;

    match checksum {
        Some(crc) => {
            let bytes = STANDARD
                .decode(crc.as_bytes())
                .map_err(|e| PgpError::armor(format!("Invalid checksum encoding: {}", e)))?;
            if bytes.len() != 3 {
                return Err(PgpError::armor("Invalid checksum length"));
            }
            let expected = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
            let actual = crc24(&data);
            if expected != actual {
                return Err(PgpError::ChecksumMismatch { expected, actual });
            }
        }
        None => debug!(kind = ?kind, "armor block without checksum"),
    }

    Ok(ArmoredData {
        kind,
        headers,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc24_known_value() {
        assert_eq!(crc24(b""), 0xB704CE);
        assert_eq!(crc24(b"123456789"), 0x21CF02);
    }

    #[test]
    fn test_armor_roundtrip() {
        let data: Vec<u8> = (0..=255).cycle().take(1000).collect();
        let armored = encode(ArmorKind::Message, &data);
        assert!(armored.starts_with("-----BEGIN PGP MESSAGE-----\n"));
        assert!(armored.ends_with("-----END PGP MESSAGE-----\n"));
        assert!(armored.lines().all(|l| l.len() <= LINE_WIDTH));
        assert!(is_armored(armored.as_bytes()));

        let (kind, decoded) = decode(armored.as_bytes()).unwrap();
        assert_eq!(kind, ArmorKind::Message);
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_headers_preserved() {
        let mut headers = BTreeMap::new();
        headers.insert("Comment".to_string(), "test key".to_string());
        let armored = encode_with_headers(ArmorKind::PublicKey, b"key", &headers);
        let block = decode_block(armored.as_bytes()).unwrap();
        assert_eq!(block.kind, ArmorKind::PublicKey);
        assert_eq!(block.headers.get("Comment").unwrap(), "test key");
        assert_eq!(block.data, b"key");
    }

    #[test]
    fn test_checksum_mismatch() {
        let armored = encode(ArmorKind::Signature, b"signature bytes");
        let crc_line = armored.lines().find(|l| l.starts_with('=')).unwrap();
        let tampered = armored.replace(crc_line, "=AAAA");
        assert!(matches!(
            decode(tampered.as_bytes()),
            Err(PgpError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_checksum_accepted() {
        let text = "-----BEGIN PGP MESSAGE-----\n\naGVsbG8=\n-----END PGP MESSAGE-----\n";
        assert_eq!(decode(text.as_bytes()).unwrap().1, b"hello");
    }

    #[test]
    fn test_malformed_armor() {
        assert!(!is_armored(b"\x99binary"));
        assert!(decode(b"no header here").is_err());
        let wrong_end = "-----BEGIN PGP MESSAGE-----\n\naGVsbG8=\n-----END PGP SIGNATURE-----\n";
        assert!(matches!(
            decode(wrong_end.as_bytes()),
            Err(PgpError::Armor(_))
        ));
        let unterminated = "-----BEGIN PGP MESSAGE-----\n\naGVsbG8=\n";
        assert!(decode(unterminated.as_bytes()).is_err());
        let bad_b64 = "-----BEGIN PGP MESSAGE-----\n\n!!!!\n-----END PGP MESSAGE-----\n";
        assert!(decode(bad_b64.as_bytes()).is_err());
    }
}
