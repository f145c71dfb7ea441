//! # pgpcore
//!
//! A high-level OpenPGP-style library with a small, binding-friendly surface.
//!
//! Messages, keys and signatures use RFC 4880/9580 framing (packet tags,
//! length encodings, v4 key and signature packets, SEIPD v2 chunked AEAD,
//! ASCII armor with CRC-24) over a post-quantum algorithm suite:
//!
//! - **Key encapsulation**: ML-KEM-1024 (NIST FIPS 203)
//! - **Signatures**: ML-DSA-87 (NIST FIPS 204)
//! - **Symmetric encryption**: AES-128/192/256 in GCM mode
//! - **Hashing**: SHA-2 and SHA3-256
//! - **Passphrases**: Argon2id
//!
//! The library performs no disk or network I/O on its own.
//!
//! ## Layers
//!
//! - [`crypto`]: primitives (AEAD, hashes, KEM wrap, signatures, Argon2)
//! - [`packet`] and [`armor`]: the wire format
//! - [`key`]: key rings, bindings, revocation, expiry and key generation
//! - [`message`]: encrypt, decrypt, sign and verify pipelines
//! - [`facade`]: the same operations over plain byte buffers
//!
//! ## Example
//!
//! ```rust,no_run
//! use pgpcore::{facade, SignatureStatus};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let private = facade::generate_key("Alice", "alice@example.org", b"")?;
//! let public = facade::public_key(&private)?;
//!
//! let ciphertext = facade::encrypt(&[&public], b"hello")?;
//! assert_eq!(facade::decrypt(&[&private], b"", &ciphertext)?, b"hello");
//!
//! let signature = facade::sign(&private, b"", b"hello")?;
//! assert_eq!(
//!     facade::verify(&[&public], b"hello", &signature)?,
//!     SignatureStatus::Valid
//! );
//! # Ok(())
//! # }
//! ```

pub mod armor;
pub mod cancel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod facade;
pub mod key;
pub mod message;
pub mod packet;
pub mod validation;

pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{ErrorKind, PgpError, Result};
pub use facade::{Facade, FacadeError};
pub use key::{Key, KeyRing};
pub use message::{DecryptedMessage, SignatureStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
