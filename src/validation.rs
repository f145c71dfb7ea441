//! Input validation and resource limits for pgpcore.
//!
//! Every decoder in the packet codec consults these limits before allocating,
//! so that hostile length fields cannot force unbounded memory use.

use crate::crypto::Argon2Params;
use crate::error::{PgpError, Result};

/// Maximum allowed plaintext size (100MB)
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Maximum allowed encrypted message size (110MB to account for overhead)
pub const MAX_ENCRYPTED_SIZE: usize = 110 * 1024 * 1024;

/// Maximum allowed signature material size (10KB - generous for ML-DSA-87)
pub const MAX_SIGNATURE_SIZE: usize = 10 * 1024;

/// Maximum allowed key material size (10KB - generous for post-quantum keys)
pub const MAX_KEY_SIZE: usize = 10 * 1024;

/// Maximum allowed single packet body size
pub const MAX_PACKET_SIZE: usize = MAX_ENCRYPTED_SIZE;

/// Maximum allowed User ID length (1KB)
pub const MAX_USER_ID_LENGTH: usize = 1024;

/// Maximum allowed number of packets in one parse
pub const MAX_PACKETS_PER_MESSAGE: usize = 10_000;

/// Maximum allowed nesting depth for compressed data
pub const MAX_PACKET_NESTING_DEPTH: usize = 8;

/// Maximum number of recipients per encrypted message
pub const MAX_RECIPIENTS: usize = 1024;

/// Largest Argon2 memory exponent accepted from the wire (2^21 KiB = 2 GiB)
pub const MAX_ARGON2_MEMORY_EXPONENT: u8 = 21;

/// Largest Argon2 pass count accepted from the wire
pub const MAX_ARGON2_ITERATIONS: u8 = 16;

/// Largest Argon2 lane count accepted from the wire
pub const MAX_ARGON2_PARALLELISM: u8 = 16;

/// Size and count limits applied while decoding and building messages
pub struct Validator;

/// Fails with a `Validation` error naming `what` when `value` is over `max`.
fn within(what: &str, value: usize, max: usize, unit: &str) -> Result<()> {
    if value > max {
        return Err(PgpError::validation(format!(
            "{what} too large: {value}{unit} exceeds maximum of {max}{unit}"
        )));
    }
    Ok(())
}

impl Validator {
    pub fn validate_message_size(data: &[u8]) -> Result<()> {
        within("Message", data.len(), MAX_MESSAGE_SIZE, " bytes")
    }

    pub fn validate_encrypted_size(data: &[u8]) -> Result<()> {
        within("Encrypted message", data.len(), MAX_ENCRYPTED_SIZE, " bytes")
    }

    /// Signature material only, not the whole packet
    pub fn validate_signature_size(len: usize) -> Result<()> {
        within("Signature", len, MAX_SIGNATURE_SIZE, " bytes")
    }

    /// One public or secret key field
    pub fn validate_key_size(len: usize) -> Result<()> {
        within("Key material", len, MAX_KEY_SIZE, " bytes")
    }

    pub fn validate_packet_size(size: usize) -> Result<()> {
        within("Packet", size, MAX_PACKET_SIZE, " bytes")
    }

    /// User IDs are free-form UTF-8, but must be non-blank and free of
    /// control characters other than whitespace.
    pub fn validate_user_id(user_id: &str) -> Result<()> {
        within("User ID", user_id.len(), MAX_USER_ID_LENGTH, " bytes")?;

        let bad_control = |c: char| c.is_control() && !matches!(c, '\t' | '\n' | '\r');
        if user_id.chars().any(bad_control) {
            return Err(PgpError::validation("User ID contains control characters"));
        }
        if user_id.trim().is_empty() {
            return Err(PgpError::validation("User ID cannot be empty"));
        }
        Ok(())
    }

    /// Argon2 cost read from a packet, checked before any derivation runs
    pub fn validate_argon2_params(params: &Argon2Params) -> Result<()> {
        within(
            "Argon2 memory exponent",
            usize::from(params.memory_exponent),
            usize::from(MAX_ARGON2_MEMORY_EXPONENT),
            "",
        )?;
        within(
            "Argon2 iteration count",
            usize::from(params.iterations),
            usize::from(MAX_ARGON2_ITERATIONS),
            "",
        )?;
        within(
            "Argon2 parallelism",
            usize::from(params.parallelism),
            usize::from(MAX_ARGON2_PARALLELISM),
            "",
        )
    }

    pub fn validate_packet_count(count: usize) -> Result<()> {
        within("Packet count", count, MAX_PACKETS_PER_MESSAGE, "")
    }

    /// Compressed data inside compressed data
    pub fn validate_nesting_depth(depth: usize) -> Result<()> {
        within("Nesting depth", depth, MAX_PACKET_NESTING_DEPTH, "")
    }

    /// Validate recipient count
    pub fn validate_recipient_count(count: usize) -> Result<()> {
        if count == 0 {
            return Err(PgpError::invalid_input("At least one recipient is required"));
        }
        within("Recipient count", count, MAX_RECIPIENTS, "")
    }

    /// Validate slice extraction with bounds checking
    ///
    /// Out-of-bounds reads are reported as malformed packets, since every
    /// caller is decoding a packet body.
    pub fn validate_slice_extraction(data: &[u8], offset: usize, length: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| PgpError::malformed("Length field overflows"))?;
        if data.len() < end {
            return Err(PgpError::malformed(format!(
                "Truncated body: need {} bytes at offset {}, have {} bytes",
                length,
                offset,
                data.len()
            )));
        }

        Ok(&data[offset..end])
    }

    pub fn validate_nonce_size(nonce: &[u8], expected: usize) -> Result<()> {
        if nonce.len() != expected {
            return Err(PgpError::invalid_input(format!(
                "Nonce is {} bytes, expected {expected}",
                nonce.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_inclusive() {
        assert!(Validator::validate_key_size(MAX_KEY_SIZE).is_ok());
        assert!(Validator::validate_key_size(MAX_KEY_SIZE + 1).is_err());
        assert!(Validator::validate_nesting_depth(MAX_PACKET_NESTING_DEPTH).is_ok());

        let err = Validator::validate_message_size(&vec![0u8; MAX_MESSAGE_SIZE + 1]).unwrap_err();
        assert!(err.to_string().contains("Message too large"));
    }

    #[test]
    fn test_user_id_validation() {
        assert!(Validator::validate_user_id("Mallory <m@example.net>").is_ok());
        assert!(Validator::validate_user_id("tab\tseparated").is_ok());

        for bad in ["", " \t ", "nul\0byte", "bell\x07"] {
            assert!(Validator::validate_user_id(bad).is_err(), "{:?}", bad);
        }
        assert!(Validator::validate_user_id(&"u".repeat(MAX_USER_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_bounds_checking() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];

        assert_eq!(
            Validator::validate_slice_extraction(&data, 2, 3).unwrap(),
            &[3, 4, 5]
        );

        let err = Validator::validate_slice_extraction(&data, 6, 4).unwrap_err();
        assert!(matches!(err, PgpError::MalformedPacket(_)));
        assert!(Validator::validate_slice_extraction(&data, 5, 5).is_err());
        assert!(Validator::validate_slice_extraction(&data, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_argon2_cost_limits() {
        assert!(Validator::validate_argon2_params(&Argon2Params::default()).is_ok());
        let hostile = [
            (255, 1, 22),
            (1, 1, MAX_ARGON2_MEMORY_EXPONENT + 1),
            (MAX_ARGON2_ITERATIONS + 1, 1, 8),
            (1, MAX_ARGON2_PARALLELISM + 1, 8),
        ];
        for (iterations, parallelism, memory_exponent) in hostile {
            let params = Argon2Params {
                iterations,
                parallelism,
                memory_exponent,
            };
            assert!(matches!(
                Validator::validate_argon2_params(&params),
                Err(PgpError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_recipient_count() {
        assert!(Validator::validate_recipient_count(0).is_err());
        assert!(Validator::validate_recipient_count(3).is_ok());
        assert!(Validator::validate_recipient_count(MAX_RECIPIENTS + 1).is_err());
    }
}
