//! Error types for pgpcore operations.

use thiserror::Error;

/// Result type alias for pgpcore operations.
pub type Result<T> = std::result::Result<T, PgpError>;

/// Main error type for pgpcore operations.
#[derive(Error, Debug)]
pub enum PgpError {
    /// Truncated, inconsistent or otherwise undecodable packet data
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// A critical packet tag this implementation does not know
    #[error("Unknown packet tag: {0}")]
    UnknownPacketTag(u8),

    /// Armor CRC-24 did not match the decoded body
    #[error("Armor checksum mismatch: expected {expected:06X}, got {actual:06X}")]
    ChecksumMismatch {
        /// Checksum carried by the armor
        expected: u32,
        /// Checksum computed over the decoded body
        actual: u32,
    },

    /// Unregistered cipher, hash, AEAD or public-key algorithm id
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// AEAD tag verification failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Cryptographic signature verification failed
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// No key in the ring is usable for the requested operation
    #[error("No valid key: {0}")]
    NoValidKey(String),

    /// The selected key is expired at the requested time
    #[error("Key expired: {0}")]
    ExpiredKey(String),

    /// The selected key has been revoked
    #[error("Key revoked: {0}")]
    RevokedKey(String),

    /// None of the supplied private keys could unwrap a session key
    #[error("No decryption key: {0}")]
    NoDecryptionKey(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Passphrase missing or wrong for protected key material
    #[error("Passphrase error: {0}")]
    Passphrase(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Input validation limits exceeded
    #[error("Validation error: {0}")]
    Validation(String),

    /// Armor framing errors other than checksum failures
    #[error("Armor error: {0}")]
    Armor(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, binding-friendly classification of a [`PgpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedPacket,
    UnknownPacketTag,
    ChecksumMismatch,
    UnsupportedAlgorithm,
    Authentication,
    InvalidSignature,
    NoValidKey,
    ExpiredKey,
    RevokedKey,
    NoDecryptionKey,
    Cancelled,
    Passphrase,
    InvalidInput,
    Validation,
    Armor,
    Config,
    Io,
}

impl ErrorKind {
    /// Returns the stable kind string exposed across language bindings.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedPacket => "malformed_packet",
            ErrorKind::UnknownPacketTag => "unknown_packet_tag",
            ErrorKind::ChecksumMismatch => "checksum_mismatch",
            ErrorKind::UnsupportedAlgorithm => "unsupported_algorithm",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::InvalidSignature => "invalid_signature",
            ErrorKind::NoValidKey => "no_valid_key",
            ErrorKind::ExpiredKey => "expired_key",
            ErrorKind::RevokedKey => "revoked_key",
            ErrorKind::NoDecryptionKey => "no_decryption_key",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Passphrase => "passphrase_error",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Armor => "armor_error",
            ErrorKind::Config => "config_error",
            ErrorKind::Io => "io_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PgpError {
    /// Returns the stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PgpError::MalformedPacket(_) => ErrorKind::MalformedPacket,
            PgpError::UnknownPacketTag(_) => ErrorKind::UnknownPacketTag,
            PgpError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            PgpError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            PgpError::Authentication(_) => ErrorKind::Authentication,
            PgpError::InvalidSignature(_) => ErrorKind::InvalidSignature,
            PgpError::NoValidKey(_) => ErrorKind::NoValidKey,
            PgpError::ExpiredKey(_) => ErrorKind::ExpiredKey,
            PgpError::RevokedKey(_) => ErrorKind::RevokedKey,
            PgpError::NoDecryptionKey(_) => ErrorKind::NoDecryptionKey,
            PgpError::Cancelled => ErrorKind::Cancelled,
            PgpError::Passphrase(_) => ErrorKind::Passphrase,
            PgpError::InvalidInput(_) => ErrorKind::InvalidInput,
            PgpError::Validation(_) => ErrorKind::Validation,
            PgpError::Armor(_) => ErrorKind::Armor,
            PgpError::Config(_) => ErrorKind::Config,
            PgpError::Io(_) => ErrorKind::Io,
        }
    }

    /// Creates a new malformed packet error.
    pub fn malformed<T: ToString>(msg: T) -> Self {
        Self::MalformedPacket(msg.to_string())
    }

    /// Creates a new unsupported algorithm error.
    pub fn unsupported<T: ToString>(msg: T) -> Self {
        Self::UnsupportedAlgorithm(msg.to_string())
    }

    /// Creates a new AEAD authentication error.
    pub fn authentication<T: ToString>(msg: T) -> Self {
        Self::Authentication(msg.to_string())
    }

    /// Creates a new invalid signature error.
    pub fn invalid_signature<T: ToString>(msg: T) -> Self {
        Self::InvalidSignature(msg.to_string())
    }

    /// Creates a new "no valid key" error.
    pub fn no_valid_key<T: ToString>(msg: T) -> Self {
        Self::NoValidKey(msg.to_string())
    }

    /// Creates a new expired key error.
    pub fn expired_key<T: ToString>(msg: T) -> Self {
        Self::ExpiredKey(msg.to_string())
    }

    /// Creates a new revoked key error.
    pub fn revoked_key<T: ToString>(msg: T) -> Self {
        Self::RevokedKey(msg.to_string())
    }

    /// Creates a new "no decryption key" error.
    pub fn no_decryption_key<T: ToString>(msg: T) -> Self {
        Self::NoDecryptionKey(msg.to_string())
    }

    /// Creates a new passphrase error.
    pub fn passphrase<T: ToString>(msg: T) -> Self {
        Self::Passphrase(msg.to_string())
    }

    /// Creates a new invalid input error.
    pub fn invalid_input<T: ToString>(msg: T) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Creates a new validation error.
    pub fn validation<T: ToString>(msg: T) -> Self {
        Self::Validation(msg.to_string())
    }

    /// Creates a new armor error.
    pub fn armor<T: ToString>(msg: T) -> Self {
        Self::Armor(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Returns true for errors the codec may recover from by skipping a packet.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PgpError::UnknownPacketTag(_))
    }
}
