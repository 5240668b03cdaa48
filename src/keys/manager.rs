//! The simple keys manager: the default [`KeyProvider`] implementation,
//! backed by a [`KeyStore`] and an optional [`X509Store`], with persistence
//! to and from an XML `Keys` document and PEM/PKCS#12 loading.

use std::fs;
use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, warn};

use super::keyinfo::{self, KeyInfoContext, KeyValueSerialization};
use super::{CertificateData, Key, KeyOriginMask, KeyRequirements, KeyStore, X509FindCriteria, X509Store};
use crate::config;
use crate::error::{Result, XmlEncError};
use crate::xml::{Document, NodeId};

/// Capability interface an encryption context uses to resolve keys.
///
/// The default implementation is [`SimpleKeysManager`]; tests and embedders
/// can substitute their own resolution strategy. A provider must outlive
/// every context that borrows it, which the borrow checker enforces.
pub trait KeyProvider {
    /// Resolves a key for the given `KeyInfo` node, or without a hint when
    /// the template carries none. `Ok(None)` means nothing resolved.
    ///
    /// # Errors
    ///
    /// Implementations surface malformed `KeyInfo` content as errors.
    fn get_key(&self, key_info: Option<(&Document, NodeId)>, ctx: &KeyInfoContext) -> Result<Option<Key>>;
}

/// Contract for an external PKCS#12 loader. The engine defines the calling
/// convention and store insertion; the ASN.1 parsing lives outside it.
pub trait Pkcs12Reader {
    /// Reads the key (and any accompanying certificates) from `path`.
    ///
    /// # Errors
    ///
    /// Implementations surface decode and password failures.
    fn read_key(&self, path: &Path, password: &str) -> Result<Key>;
}

/// In-memory key store plus X.509 trust store behind the [`KeyProvider`]
/// capability.
pub struct SimpleKeysManager {
    store: KeyStore,
    x509: Option<X509Store>,
}

impl Default for SimpleKeysManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleKeysManager {
    /// Creates a manager with an empty key store and an empty X.509 store.
    #[must_use]
    pub fn new() -> Self {
        Self { store: KeyStore::new(), x509: Some(X509Store::new()) }
    }

    /// Creates a manager without X.509 support; `X509Data` hints resolve to
    /// nothing.
    #[must_use]
    pub fn without_x509() -> Self {
        Self { store: KeyStore::new(), x509: None }
    }

    /// The key store.
    #[must_use]
    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// The key store, mutable.
    pub fn store_mut(&mut self) -> &mut KeyStore {
        &mut self.store
    }

    /// The X.509 store, when the manager carries one.
    #[must_use]
    pub fn x509_store(&self) -> Option<&X509Store> {
        self.x509.as_ref()
    }

    /// The X.509 store, mutable.
    pub fn x509_store_mut(&mut self) -> Option<&mut X509Store> {
        self.x509.as_mut()
    }

    /// Appends a key to the store.
    pub fn add_key(&mut self, key: Key) {
        self.store.add(key);
    }

    /// Duplicate-on-match lookup against the store.
    #[must_use]
    pub fn find_key(&self, name: Option<&str>, requirements: &KeyRequirements) -> Option<Key> {
        self.store.find(name, requirements)
    }

    /// Certificate lookup against the X.509 store.
    #[must_use]
    pub fn find_certificate(&self, criteria: &X509FindCriteria<'_>) -> Option<&CertificateData> {
        self.x509.as_ref().and_then(|store| store.find(criteria))
    }

    /// Chain verification against the X.509 store.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidData`] when the manager has no X.509
    /// store, and parse failures from the store itself.
    pub fn verify_certificate(&self, certificate: &CertificateData) -> Result<bool> {
        self.require_x509()?.verify(certificate)
    }

    /// Loads an XML `Keys` document into the store and returns the number
    /// of keys added.
    ///
    /// The root must be `Keys` in the xmlsec namespace, and every child a
    /// dsig `KeyInfo`, read with all origins allowed. A child that fails to
    /// produce a key aborts the whole load when `strict` is set and is
    /// skipped with a warning otherwise. A non-`KeyInfo` child is fatal
    /// either way.
    ///
    /// # Errors
    ///
    /// [`XmlEncError::Io`] on read failure, [`XmlEncError::Xml`] on parse
    /// failure, [`XmlEncError::InvalidNode`] on grammar violations, and in
    /// strict mode whatever error the failing entry produced.
    pub fn load(&mut self, path: &Path, strict: bool) -> Result<usize> {
        let text = fs::read_to_string(path)?;
        let doc = Document::parse(&text)?;
        let root = doc.root().ok_or_else(|| XmlEncError::Xml("keys document has no root".into()))?;
        if !doc.is_named(root, config::NODE_KEYS, config::XMLSEC_NS) {
            return Err(XmlEncError::InvalidNode {
                expected: config::NODE_KEYS.to_owned(),
                found: doc.name_of(root),
            });
        }

        let ctx = KeyInfoContext::read();
        let mut loaded = 0;
        let mut cursor = doc.first_element_child(root);
        while let Some(current) = cursor {
            if !doc.is_named(current, config::NODE_KEY_INFO, config::DSIG_NS) {
                return Err(XmlEncError::InvalidNode {
                    expected: config::NODE_KEY_INFO.to_owned(),
                    found: doc.name_of(current),
                });
            }
            let outcome = keyinfo::read_key_info(&doc, current, &self.store, self.x509.as_ref(), &ctx)
                .and_then(|key| key.ok_or(XmlEncError::KeyNotFound));
            match outcome {
                Ok(key) => {
                    self.store.add(key);
                    loaded += 1;
                }
                Err(error) if strict => return Err(error),
                Err(error) => warn!(%error, "skipping unreadable KeyInfo entry"),
            }
            cursor = doc.next_element_sibling(current);
        }
        debug!(path = %path.display(), loaded, "keys document loaded");
        Ok(loaded)
    }

    /// Writes the store as an XML `Keys` document: one `KeyInfo` per key
    /// with `KeyName`, `KeyValue`, and `X509Data` when certificates are
    /// attached. `serialization` gates private RSA material; symmetric
    /// material is always written, as that is the purpose of the document.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Io`] on write failure and [`XmlEncError::Xml`]
    /// on serialisation failure.
    pub fn save(&self, path: &Path, serialization: KeyValueSerialization) -> Result<()> {
        let mut doc = Document::new();
        let root = doc.create_element(None, config::NODE_KEYS, Some(config::XMLSEC_NS));
        doc.set_attribute(root, "xmlns", config::XMLSEC_NS);
        doc.set_root(root);

        let ctx = KeyInfoContext::write_unrestricted(serialization);
        for key in self.store.keys() {
            let key_info = doc.add_element_child(root, config::NODE_KEY_INFO, config::DSIG_NS);
            doc.add_element_child(key_info, config::NODE_KEY_NAME, config::DSIG_NS);
            doc.add_element_child(key_info, config::NODE_KEY_VALUE, config::DSIG_NS);
            if !key.certificates().is_empty() {
                doc.add_element_child(key_info, config::NODE_X509_DATA, config::DSIG_NS);
            }
            keyinfo::write_key_info(&mut doc, key_info, key, &ctx)?;
        }

        let body = doc.to_xml()?;
        fs::write(path, format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}"))?;
        Ok(())
    }

    /// Reads an RSA key from a PEM file, adds it to the store, and returns
    /// it. PKCS#8 and PKCS#1 encodings are accepted; password-protected
    /// PEM is not, so `password` only documents the caller's intent.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Io`] on read failure and
    /// [`XmlEncError::Crypto`] when no supported encoding decodes.
    pub fn load_pem_key(&mut self, path: &Path, password: Option<&str>, private: bool) -> Result<&Key> {
        let text = fs::read_to_string(path)?;
        if password.is_some() {
            warn!("encrypted PEM keys are not supported; attempting plain decode");
        }

        let key = if private {
            let decoded = RsaPrivateKey::from_pkcs8_pem(&text)
                .ok()
                .or_else(|| RsaPrivateKey::from_pkcs1_pem(&text).ok())
                .ok_or_else(|| {
                    XmlEncError::crypto("pem", format!("cannot decode a private key from '{}'", path.display()))
                })?;
            Key::new_rsa(None, decoded.to_public_key(), Some(decoded))
        } else {
            let decoded = RsaPublicKey::from_public_key_pem(&text)
                .ok()
                .or_else(|| RsaPublicKey::from_pkcs1_pem(&text).ok())
                .ok_or_else(|| {
                    XmlEncError::crypto("pem", format!("cannot decode a public key from '{}'", path.display()))
                })?;
            Key::new_rsa(None, decoded, None)
        };

        self.store.add(key);
        self.last_added()
    }

    /// Loads a PEM certificate file into the X.509 store.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidData`] when the manager has no X.509
    /// store, plus the store's own read and parse errors.
    pub fn load_pem_cert(&mut self, path: &Path, trusted: bool) -> Result<usize> {
        self.require_x509_mut()?.load_pem_cert(path, trusted)
    }

    /// Loads every certificate under `path` as trusted.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidData`] when the manager has no X.509
    /// store, plus the store's own errors.
    pub fn add_certs_dir(&mut self, path: &Path) -> Result<usize> {
        self.require_x509_mut()?.add_certs_dir(path)
    }

    /// Reads a key through an external PKCS#12 loader, applies the name
    /// override when one is given, and adds the key to the store.
    ///
    /// # Errors
    ///
    /// Propagates the loader's errors.
    pub fn load_pkcs12_with(
        &mut self,
        reader: &dyn Pkcs12Reader,
        name: Option<&str>,
        path: &Path,
        password: &str,
    ) -> Result<&Key> {
        let mut key = reader.read_key(path, password)?;
        if let Some(name) = name {
            key.set_name(Some(name));
        }
        key.add_origin(KeyOriginMask::PKCS12);
        self.store.add(key);
        self.last_added()
    }

    /// Replaces the X.509 store's verification flags.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidData`] when the manager has no X.509
    /// store.
    pub fn set_cert_flags(&mut self, flags: u32) -> Result<()> {
        self.require_x509_mut()?.set_flags(flags);
        Ok(())
    }

    fn last_added(&self) -> Result<&Key> {
        self.store.last().ok_or_else(|| XmlEncError::Alloc("key store insertion failed".into()))
    }

    fn require_x509(&self) -> Result<&X509Store> {
        self.x509.as_ref().ok_or_else(|| XmlEncError::InvalidData("keys manager has no X509 store".into()))
    }

    fn require_x509_mut(&mut self) -> Result<&mut X509Store> {
        self.x509.as_mut().ok_or_else(|| XmlEncError::InvalidData("keys manager has no X509 store".into()))
    }
}

impl KeyProvider for SimpleKeysManager {
    fn get_key(&self, key_info: Option<(&Document, NodeId)>, ctx: &KeyInfoContext) -> Result<Option<Key>> {
        match key_info {
            Some((doc, node)) => keyinfo::read_key_info(doc, node, &self.store, self.x509.as_ref(), ctx),
            None => Ok(self.store.find(None, &ctx.key_requirements).map(|mut key| {
                key.add_origin(KeyOriginMask::KEY_MANAGER);
                key
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    use super::*;
    use crate::keys::{KeyAlgorithm, KeyTypeMask, KeyValue};

    const KEYS_DOC: &str = concat!(
        r#"<Keys xmlns="http://www.aleksey.com/xmlsec/2002" xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#,
        r#"<ds:KeyInfo><ds:KeyName>alice</ds:KeyName><ds:KeyValue><AESKeyValue>AAAAAAAAAAAAAAAAAAAAAA==</AESKeyValue></ds:KeyValue></ds:KeyInfo>"#,
        r#"<ds:KeyInfo><ds:KeyName>bob</ds:KeyName><ds:KeyValue><AESKeyValue>EREREREREREREREREREREQ==</AESKeyValue></ds:KeyValue></ds:KeyInfo>"#,
        r#"<ds:KeyInfo><ds:KeyName>carol</ds:KeyName><ds:KeyValue><AESKeyValue>IiIiIiIiIiIiIiIiIiIiIg==</AESKeyValue></ds:KeyValue></ds:KeyInfo>"#,
        r#"</Keys>"#,
    );

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    /// Routes the manager's `tracing` output (lax-load skips and friends)
    /// into the test harness. Repeated installs are fine; the first wins.
    fn init_tracing() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn symmetric_128() -> KeyRequirements {
        KeyRequirements {
            algorithm: Some(KeyAlgorithm::Aes),
            key_type: KeyTypeMask::SYMMETRIC,
            bits: 128,
        }
    }

    #[test]
    fn test_load_and_find_by_name() {
        let file = write_temp(KEYS_DOC);
        let mut manager = SimpleKeysManager::new();
        assert_eq!(manager.load(file.path(), true).unwrap(), 3);

        let bob = manager.find_key(Some("bob"), &symmetric_128()).unwrap();
        let KeyValue::Symmetric(bytes) = bob.value() else { panic!("expected symmetric key") };
        assert_eq!(bytes.expose(), &[0x11; 16]);

        assert!(manager.find_key(Some("nobody"), &KeyRequirements::default()).is_none());
    }

    #[test]
    fn test_lax_load_skips_broken_entry() {
        init_tracing();
        let broken = KEYS_DOC.replace("EREREREREREREREREREREQ==", "*** broken ***");
        let file = write_temp(&broken);

        let mut manager = SimpleKeysManager::new();
        assert_eq!(manager.load(file.path(), false).unwrap(), 2);
        assert_eq!(manager.store().len(), 2);
        assert!(manager.find_key(Some("alice"), &symmetric_128()).is_some());
        assert!(manager.find_key(Some("carol"), &symmetric_128()).is_some());
        assert!(manager.find_key(Some("bob"), &symmetric_128()).is_none());
    }

    #[test]
    fn test_strict_load_fails_on_broken_entry() {
        init_tracing();
        let broken = KEYS_DOC.replace("EREREREREREREREREREREQ==", "*** broken ***");
        let file = write_temp(&broken);
        let mut manager = SimpleKeysManager::new();
        assert!(manager.load(file.path(), true).is_err());
    }

    #[test]
    fn test_load_rejects_foreign_child() {
        let file = write_temp(
            r#"<Keys xmlns="http://www.aleksey.com/xmlsec/2002"><Rogue/></Keys>"#,
        );
        let mut manager = SimpleKeysManager::new();
        let err = manager.load(file.path(), false).unwrap_err();
        assert!(matches!(err, XmlEncError::InvalidNode { .. }));
    }

    #[test]
    fn test_load_rejects_wrong_root() {
        let file = write_temp("<NotKeys/>");
        let mut manager = SimpleKeysManager::new();
        assert!(matches!(manager.load(file.path(), true).unwrap_err(), XmlEncError::InvalidNode { .. }));
    }

    #[test]
    fn test_save_load_round_trip() -> anyhow::Result<()> {
        let mut manager = SimpleKeysManager::new();
        manager.add_key(Key::new_symmetric(Some("first"), vec![1; 16]));
        manager.add_key(Key::new_symmetric(Some("second"), vec![2; 32]));

        let file = tempfile::NamedTempFile::new()?;
        manager.save(file.path(), KeyValueSerialization::WithPrivate)?;

        let mut reloaded = SimpleKeysManager::new();
        assert_eq!(reloaded.load(file.path(), true)?, 2);
        assert_eq!(reloaded.find_key(Some("first"), &KeyRequirements::default()).unwrap().bits(), 128);
        assert_eq!(reloaded.find_key(Some("second"), &KeyRequirements::default()).unwrap().bits(), 256);
        Ok(())
    }

    #[test]
    fn test_load_pem_private_key() -> anyhow::Result<()> {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 1024)?;
        let pem = private.to_pkcs8_pem(LineEnding::LF)?;
        let file = write_temp(&pem);

        let mut manager = SimpleKeysManager::new();
        let key = manager.load_pem_key(file.path(), None, true)?;
        assert_eq!(key.algorithm(), KeyAlgorithm::Rsa);
        assert!(key.key_type().contains(KeyTypeMask::PRIVATE));
        assert_eq!(manager.store().len(), 1);
        Ok(())
    }

    #[test]
    fn test_get_key_without_hint_matches_requirements() {
        let mut manager = SimpleKeysManager::new();
        manager.add_key(Key::new_symmetric(Some("only"), vec![5; 16]));

        let mut ctx = KeyInfoContext::read();
        ctx.key_requirements = symmetric_128();
        let key = manager.get_key(None, &ctx).unwrap().unwrap();
        assert_eq!(key.name(), Some("only"));
        assert!(key.origins().intersects(KeyOriginMask::KEY_MANAGER));

        ctx.key_requirements.bits = 256;
        assert!(manager.get_key(None, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_pkcs12_loader_contract() {
        struct FakeReader;
        impl Pkcs12Reader for FakeReader {
            fn read_key(&self, _path: &Path, password: &str) -> Result<Key> {
                if password == "letmein" {
                    Ok(Key::new_symmetric(None, vec![9; 16]))
                } else {
                    Err(XmlEncError::crypto("pkcs12", "bad password"))
                }
            }
        }

        let mut manager = SimpleKeysManager::new();
        let key = manager
            .load_pkcs12_with(&FakeReader, Some("imported"), Path::new("ignored.p12"), "letmein")
            .unwrap();
        assert_eq!(key.name(), Some("imported"));
        assert!(key.origins().intersects(KeyOriginMask::PKCS12));
        assert!(
            manager
                .load_pkcs12_with(&FakeReader, None, Path::new("ignored.p12"), "wrong")
                .is_err()
        );
    }
}
