//! xmlenc-rs - An XML Encryption (W3C XML-Enc) engine.
//!
//! The engine encrypts binary buffers, XML elements, element content, or
//! URI-addressed resources into `EncryptedData`/`EncryptedKey` structures
//! and decrypts them back, substituting plaintext in place where the `Type`
//! attribute asks for it. Key resolution goes through a simple keys manager
//! holding an in-memory key store and an X.509 trust store, persisted as an
//! XML `Keys` document.
//!
//! - [`enc::EncryptionContext`] drives one encrypt or decrypt operation
//! - [`keys::SimpleKeysManager`] resolves `KeyInfo` hints to keys
//! - [`transform::Pipeline`] chains the octet stages around the cipher
//! - [`xml::Document`] is the mutable tree the engine operates on

pub mod config;
pub mod enc;
pub mod error;
pub mod keys;
pub mod secret;
pub mod transform;
pub mod uri;
pub mod xml;

pub use error::{Result, XmlEncError};
