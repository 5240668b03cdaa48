//! Classification and policy checks for `CipherReference` URIs.
//!
//! A context carries a [`UriPolicy`] bitset deciding which classes of URI a
//! `CipherReference` may name. Classification follows the reference rules of
//! the original engine: an absent or empty URI is *empty*, a leading `#` is
//! *same-document*, a `scheme://` form is *remote*, and everything else
//! (including `file://`) is a *local* path.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::path::PathBuf;

use crate::error::{Result, XmlEncError};
use crate::xml::Document;

/// The class a `CipherReference` URI falls into.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UriKind {
    /// No URI, or the empty string.
    Empty,

    /// `#fragment`, pointing at an element of the same document.
    SameDocument,

    /// A filesystem path, with or without the `file://` scheme.
    Local,

    /// Any other `scheme://` URI.
    Remote,
}

impl UriKind {
    /// Classifies an optional URI attribute value.
    #[must_use]
    pub fn classify(uri: Option<&str>) -> Self {
        match uri {
            None | Some("") => Self::Empty,
            Some(u) if u.starts_with('#') => Self::SameDocument,
            Some(u) if u.starts_with("file://") => Self::Local,
            Some(u) if u.contains("://") => Self::Remote,
            Some(_) => Self::Local,
        }
    }

    /// Short label used by diagnostics.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::SameDocument => "same-document",
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl Display for UriKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.label())
    }
}

/// Bitset over [`UriKind`] deciding which URI classes are acceptable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UriPolicy(u8);

impl UriPolicy {
    /// Rejects every URI, even an absent one.
    pub const NONE: Self = Self(0);

    /// Allows an absent or empty URI.
    pub const EMPTY: Self = Self(1);

    /// Allows `#fragment` references into the same document.
    pub const SAME_DOCUMENT: Self = Self(2);

    /// Allows local filesystem references.
    pub const LOCAL: Self = Self(4);

    /// Allows remote `scheme://` references.
    pub const REMOTE: Self = Self(8);

    /// Allows every class. This is the initial policy of a fresh context.
    pub const ANY: Self = Self(15);

    /// True when `kind` is included in the policy.
    #[must_use]
    pub fn allows(self, kind: UriKind) -> bool {
        let bit = match kind {
            UriKind::Empty => Self::EMPTY.0,
            UriKind::SameDocument => Self::SAME_DOCUMENT.0,
            UriKind::Local => Self::LOCAL.0,
            UriKind::Remote => Self::REMOTE.0,
        };
        self.0 & bit != 0
    }

    /// Classifies `uri` and checks it against the policy.
    #[must_use]
    pub fn check(self, uri: Option<&str>) -> bool {
        self.allows(UriKind::classify(uri))
    }
}

impl std::ops::BitOr for UriPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A resolved ciphertext input source for pull-mode pipeline execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UriSource {
    /// The registered ID of an element in the processed document; its text
    /// content is the input.
    SameDocument(String),

    /// A local file whose bytes are the input.
    Local(PathBuf),

    /// A remote resource. Classified for policy purposes but not fetched.
    Remote(String),
}

impl UriSource {
    /// Parses an accepted URI into a source.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidUriType`] for an empty URI, which names
    /// no retrievable input.
    pub fn parse(uri: &str) -> Result<Self> {
        match UriKind::classify(Some(uri)) {
            UriKind::Empty => Err(XmlEncError::InvalidUriType { uri: uri.to_owned() }),
            UriKind::SameDocument => Ok(Self::SameDocument(uri[1..].to_owned())),
            UriKind::Local => {
                let path = uri.strip_prefix("file://").unwrap_or(uri);
                Ok(Self::Local(PathBuf::from(path)))
            }
            UriKind::Remote => Ok(Self::Remote(uri.to_owned())),
        }
    }

    /// Fetches the referenced bytes.
    ///
    /// # Errors
    ///
    /// Local reads surface [`XmlEncError::Io`]; a same-document reference to
    /// an unregistered ID is [`XmlEncError::InvalidData`]; remote fetching is
    /// not implemented and fails as [`XmlEncError::Io`].
    pub fn fetch(&self, doc: &Document) -> Result<Vec<u8>> {
        match self {
            Self::SameDocument(id) => {
                let node = doc
                    .element_by_id(id)
                    .ok_or_else(|| XmlEncError::InvalidData(format!("no element with id '{id}'")))?;
                Ok(doc.text_content(node).into_bytes())
            }
            Self::Local(path) => Ok(fs::read(path)?),
            Self::Remote(uri) => Err(XmlEncError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("remote cipher reference '{uri}' cannot be fetched"),
            ))),
        }
    }
}
