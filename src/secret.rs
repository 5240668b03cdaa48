//! Zeroizing container for symmetric key material.

use std::fmt;

use secrecy::{ExposeSecret, SecretBox};

/// Owned secret bytes, zeroized on drop.
///
/// Key stores hand out duplicates of their contents, so unlike a bare
/// [`SecretBox`] this wrapper is cloneable; the clone re-boxes a fresh copy
/// of the bytes.
pub struct SecretBytes {
    inner: SecretBox<Vec<u8>>,
}

impl SecretBytes {
    /// Takes ownership of `data` and moves it behind the secret boundary.
    pub fn new(data: Vec<u8>) -> Self {
        Self { inner: SecretBox::new(Box::new(data)) }
    }

    /// Copies `data` into a new secret.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    /// Grants read access to the raw bytes.
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    /// Number of secret bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.expose_secret().len()
    }

    /// True when the secret holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self::from_slice(self.expose())
    }
}

impl From<SecretBox<Vec<u8>>> for SecretBytes {
    fn from(secret: SecretBox<Vec<u8>>) -> Self {
        Self { inner: secret }
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for SecretBytes {}

impl fmt::Debug for SecretBytes {
    /// Never prints the bytes, only their count.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes({} bytes redacted)", self.len())
    }
}
