//! Error taxonomy for the XML Encryption engine.
//!
//! Every fallible operation in the crate returns [`XmlEncError`]. The variants
//! mirror the failure classes of the engine: DOM shape violations
//! (`InvalidNode`, `UnexpectedNode`, `InvalidNodeContent`), policy rejections
//! (`InvalidType`, `InvalidUriType`), key resolution (`KeyNotFound`), and
//! wrapped failures from transforms, XML parsing, and I/O.
//!
//! No error is recovered inside the engine except the non-strict branch of
//! the keys manager's `load`, which skips a single failing `KeyInfo` entry
//! and proceeds.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, XmlEncError>;

/// All failure classes surfaced by the engine.
#[derive(Debug, Error)]
pub enum XmlEncError {
    /// A buffer or record could not be allocated or sized.
    #[error("allocation failed: {0}")]
    Alloc(String),

    /// The DOM layer failed to parse or serialise a document.
    #[error("xml error: {0}")]
    Xml(String),

    /// A required position held the wrong element name or namespace.
    #[error("invalid node: expected '{expected}', found '{found}'")]
    InvalidNode { expected: String, found: String },

    /// Required text content was missing or empty.
    #[error("invalid content in node '{node}'")]
    InvalidNodeContent { node: String },

    /// An extra sibling appeared where the grammar permits none.
    #[error("unexpected node '{node}'")]
    UnexpectedNode { node: String },

    /// The `Type` attribute value is not recognised for the operation.
    #[error("invalid type '{value}'")]
    InvalidType { value: String },

    /// A `CipherReference` URI was rejected by the context's URI policy.
    #[error("cipher reference uri '{uri}' is not allowed")]
    InvalidUriType { uri: String },

    /// Malformed or missing data, e.g. no `EncryptionMethod` to resolve.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Key resolution returned nothing, or the resolved key failed the
    /// requirement match (algorithm class, key type, size).
    #[error("key not found")]
    KeyNotFound,

    /// A transform failed; carries the transform's name.
    #[error("transform '{transform}' failed: {message}")]
    Crypto { transform: String, message: String },

    /// A file or URI read failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl XmlEncError {
    /// Builds a [`XmlEncError::Crypto`] for the named transform.
    pub fn crypto(transform: &str, message: impl Into<String>) -> Self {
        Self::Crypto { transform: transform.to_owned(), message: message.into() }
    }
}

impl From<quick_xml::Error> for XmlEncError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for XmlEncError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(err.to_string())
    }
}
