//! Key model for the engine: key material, type and origin masks, and the
//! requirement descriptor that cipher transforms hand to key resolution.
//!
//! A [`Key`] owns its material. Symmetric bytes sit behind the zeroizing
//! [`SecretBytes`] container; asymmetric material uses the `rsa` crate's key
//! types. Keys are deliberately cloneable: stores hand out duplicates, so a
//! caller mutating a resolved key never reaches back into the store.

mod keyinfo;
mod manager;
mod store;
mod x509;

pub use keyinfo::{KeyInfoContext, KeyInfoMode, KeyValueSerialization, read_key_info, write_key_info};
pub use manager::{KeyProvider, Pkcs12Reader, SimpleKeysManager};
pub use store::KeyStore;
pub use x509::{CertificateData, X509FindCriteria, X509Store};

use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::secret::SecretBytes;

/// Algorithm class of a key, matched against a transform's requirement.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyAlgorithm {
    /// AES material, also used for AES key wrapping.
    Aes,

    /// RSA key transport material.
    Rsa,
}

impl KeyAlgorithm {
    /// Short identifier used in diagnostics and dumps.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Self::Aes => "aes",
            Self::Rsa => "rsa",
        }
    }
}

/// Bitset over the three key material classes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyTypeMask(u8);

impl KeyTypeMask {
    pub const NONE: Self = Self(0);
    pub const PUBLIC: Self = Self(1);
    pub const PRIVATE: Self = Self(2);
    pub const SYMMETRIC: Self = Self(4);
    pub const ANY: Self = Self(7);

    /// True when the two masks share at least one bit.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True when every bit of `other` is present in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for KeyTypeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Bitset recording which `KeyInfo` origins were consulted to materialise a
/// key, and which origins a read context accepts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyOriginMask(u8);

impl KeyOriginMask {
    pub const NONE: Self = Self(0);
    pub const KEY_MANAGER: Self = Self(1);
    pub const KEY_NAME: Self = Self(2);
    pub const KEY_VALUE: Self = Self(4);
    pub const RETRIEVAL_METHOD: Self = Self(8);
    pub const X509: Self = Self(16);
    pub const PKCS12: Self = Self(32);
    pub const ALL: Self = Self(63);

    /// True when the two masks share at least one bit.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for KeyOriginMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for KeyOriginMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// What a transform demands of the key it will be given.
///
/// A key satisfies the requirements iff the algorithm class is equal (when
/// one is demanded), the type masks intersect, and the bit size is equal
/// (when a nonzero size is demanded).
#[derive(Clone, Debug)]
pub struct KeyRequirements {
    /// Demanded algorithm class, `None` for any.
    pub algorithm: Option<KeyAlgorithm>,

    /// Acceptable key material classes.
    pub key_type: KeyTypeMask,

    /// Demanded key size in bits; 0 accepts any size.
    pub bits: usize,
}

impl Default for KeyRequirements {
    fn default() -> Self {
        Self { algorithm: None, key_type: KeyTypeMask::ANY, bits: 0 }
    }
}

/// The material a key holds.
#[derive(Clone)]
pub enum KeyValue {
    /// Symmetric bytes, zeroized on drop.
    Symmetric(SecretBytes),

    /// An RSA key pair; the private half is optional.
    Rsa { public: RsaPublicKey, private: Option<RsaPrivateKey> },
}

/// A key as resolved, loaded, or stored: optional name, material, attached
/// certificate chain (DER), and the origins that produced it.
///
/// Name uniqueness is not enforced anywhere; lookups walk insertion order
/// and the first match wins.
#[derive(Clone)]
pub struct Key {
    name: Option<String>,
    value: KeyValue,
    certificates: Vec<Vec<u8>>,
    origins: KeyOriginMask,
}

impl Key {
    /// Creates a symmetric key over owned bytes.
    #[must_use]
    pub fn new_symmetric(name: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.map(str::to_owned),
            value: KeyValue::Symmetric(SecretBytes::new(bytes)),
            certificates: Vec::new(),
            origins: KeyOriginMask::NONE,
        }
    }

    /// Creates an RSA key; pass the private half when it is available.
    #[must_use]
    pub fn new_rsa(name: Option<&str>, public: RsaPublicKey, private: Option<RsaPrivateKey>) -> Self {
        Self {
            name: name.map(str::to_owned),
            value: KeyValue::Rsa { public, private },
            certificates: Vec::new(),
            origins: KeyOriginMask::NONE,
        }
    }

    /// The key's name, when it has one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Renames the key.
    pub fn set_name(&mut self, name: Option<&str>) {
        self.name = name.map(str::to_owned);
    }

    /// The key material.
    #[must_use]
    pub fn value(&self) -> &KeyValue {
        &self.value
    }

    /// Attached certificates in DER form, leaf first by convention.
    #[must_use]
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    /// Attaches a certificate to the key.
    pub fn add_certificate(&mut self, der: Vec<u8>) {
        self.certificates.push(der);
    }

    /// The origins that produced this key.
    #[must_use]
    pub fn origins(&self) -> KeyOriginMask {
        self.origins
    }

    /// Marks an origin as having contributed to this key.
    pub fn add_origin(&mut self, origin: KeyOriginMask) {
        self.origins |= origin;
    }

    /// The algorithm class of the material.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        match &self.value {
            KeyValue::Symmetric(_) => KeyAlgorithm::Aes,
            KeyValue::Rsa { .. } => KeyAlgorithm::Rsa,
        }
    }

    /// The material classes this key can serve.
    #[must_use]
    pub fn key_type(&self) -> KeyTypeMask {
        match &self.value {
            KeyValue::Symmetric(_) => KeyTypeMask::SYMMETRIC,
            KeyValue::Rsa { private: Some(_), .. } => KeyTypeMask::PUBLIC | KeyTypeMask::PRIVATE,
            KeyValue::Rsa { private: None, .. } => KeyTypeMask::PUBLIC,
        }
    }

    /// Key size in bits: bit length of symmetric material, modulus size for
    /// RSA.
    #[must_use]
    pub fn bits(&self) -> usize {
        match &self.value {
            KeyValue::Symmetric(bytes) => bytes.len() * 8,
            KeyValue::Rsa { public, .. } => public.size() * 8,
        }
    }

    /// Requirement match: name (when asked for), algorithm class, key type,
    /// and size must all align.
    #[must_use]
    pub fn matches(&self, name: Option<&str>, requirements: &KeyRequirements) -> bool {
        if let Some(wanted) = name {
            if self.name.as_deref() != Some(wanted) {
                return false;
            }
        }
        if let Some(algorithm) = requirements.algorithm {
            if self.algorithm() != algorithm {
                return false;
            }
        }
        if !requirements.key_type.intersects(self.key_type()) {
            return false;
        }
        if requirements.bits != 0 && self.bits() != requirements.bits {
            return false;
        }
        true
    }
}

impl std::fmt::Debug for Key {
    /// Shows shape and identity, never material.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm().label())
            .field("bits", &self.bits())
            .field("certificates", &self.certificates.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aes_key(name: &str, bytes: usize) -> Key {
        Key::new_symmetric(Some(name), vec![0x42; bytes])
    }

    #[test]
    fn test_key_type_masks() {
        assert!(KeyTypeMask::ANY.contains(KeyTypeMask::PRIVATE));
        assert!((KeyTypeMask::PUBLIC | KeyTypeMask::PRIVATE).intersects(KeyTypeMask::PRIVATE));
        assert!(!KeyTypeMask::PUBLIC.intersects(KeyTypeMask::SYMMETRIC));
    }

    #[test]
    fn test_symmetric_key_shape() {
        let key = aes_key("k", 16);
        assert_eq!(key.algorithm(), KeyAlgorithm::Aes);
        assert_eq!(key.key_type(), KeyTypeMask::SYMMETRIC);
        assert_eq!(key.bits(), 128);
    }

    #[test]
    fn test_requirement_match() {
        let key = aes_key("bob", 16);
        let requirements = KeyRequirements {
            algorithm: Some(KeyAlgorithm::Aes),
            key_type: KeyTypeMask::SYMMETRIC,
            bits: 128,
        };
        assert!(key.matches(Some("bob"), &requirements));
        assert!(key.matches(None, &requirements));
        assert!(!key.matches(Some("alice"), &requirements));
        assert!(!aes_key("bob", 32).matches(Some("bob"), &requirements));
        assert!(!key.matches(None, &KeyRequirements { bits: 0, key_type: KeyTypeMask::PUBLIC, algorithm: None }));
    }

    #[test]
    fn test_origin_accumulation() {
        let mut key = aes_key("k", 16);
        assert!(!key.origins().intersects(KeyOriginMask::KEY_NAME));
        key.add_origin(KeyOriginMask::KEY_NAME);
        key.add_origin(KeyOriginMask::KEY_VALUE);
        assert!(key.origins().intersects(KeyOriginMask::KEY_NAME));
        assert!(key.origins().intersects(KeyOriginMask::KEY_VALUE));
        assert!(!key.origins().intersects(KeyOriginMask::X509));
    }

    #[test]
    fn test_debug_redacts_material() {
        let key = aes_key("seen", 16);
        let printed = format!("{key:?}");
        assert!(printed.contains("seen"));
        assert!(!printed.contains("66"));
        assert!(!printed.contains("0x42"));
    }
}
