//! The encryption context: the state machine driving XML Encryption.
//!
//! A context parses or synthesises one `EncryptedData`/`EncryptedKey`
//! subtree, assembles the transform pipeline, resolves the key through its
//! [`KeyProvider`], drives data through the pipeline in one of four input
//! modes, and on decryption substitutes the plaintext for the encrypted
//! subtree in place.
//!
//! A context is single-use per operation: every entry point requires that no
//! result is held. [`EncryptionContext::finalize`] releases the operation
//! state (returning a caller-supplied encryption method, which the context
//! never owns outright) and readies the context for the next operation.

mod dump;
mod reader;
mod writer;

pub use dump::DumpFormat;

use std::fmt::{Display, Formatter, Result as FmtResult};

use tracing::debug;

use crate::config;
use crate::error::{Result, XmlEncError};
use crate::keys::{Key, KeyInfoContext, KeyProvider};
use crate::transform::{CipherTransform, Operation, Pipeline};
use crate::uri::UriPolicy;
use crate::xml::{Document, NodeId};

/// Which top-level element the context processes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EncryptionMode {
    /// `EncryptedData`: the plaintext is application data.
    EncryptedData,

    /// `EncryptedKey`: the plaintext is another key.
    EncryptedKey,
}

impl EncryptionMode {
    /// The element name the mode expects at the subtree root.
    #[inline]
    pub fn node_name(self) -> &'static str {
        match self {
            Self::EncryptedData => config::NODE_ENCRYPTED_DATA,
            Self::EncryptedKey => config::NODE_ENCRYPTED_KEY,
        }
    }
}

impl Display for EncryptionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.node_name())
    }
}

/// The encryption-method slot: who provided the transform decides who keeps
/// it when the context is finalized.
pub(crate) enum MethodSlot {
    /// No method yet; resolution happens during template read.
    Empty,

    /// Read out of the template's `EncryptionMethod`; the context owns and
    /// drops it.
    FromTemplate(CipherTransform),

    /// Supplied by the caller; handed back at finalize.
    CallerSupplied(CipherTransform),
}

impl MethodSlot {
    pub(crate) fn as_mut(&mut self) -> Option<&mut CipherTransform> {
        match self {
            Self::Empty => None,
            Self::FromTemplate(method) | Self::CallerSupplied(method) => Some(method),
        }
    }

    pub(crate) fn as_ref(&self) -> Option<&CipherTransform> {
        match self {
            Self::Empty => None,
            Self::FromTemplate(method) | Self::CallerSupplied(method) => Some(method),
        }
    }
}

/// Session state for one encrypt or decrypt operation.
pub struct EncryptionContext<'a> {
    pub(crate) mode: EncryptionMode,
    pub(crate) operation: Operation,
    pub(crate) keys_manager: Option<&'a dyn KeyProvider>,

    pub(crate) key_info_read_ctx: KeyInfoContext,
    pub(crate) key_info_write_ctx: KeyInfoContext,
    pub(crate) pipeline: Pipeline,
    pub(crate) method: MethodSlot,
    pub(crate) enc_key: Option<Key>,

    pub(crate) id: Option<String>,
    pub(crate) data_type: Option<String>,
    pub(crate) mime_type: Option<String>,
    pub(crate) encoding: Option<String>,
    pub(crate) recipient: Option<String>,
    pub(crate) carried_key_name: Option<String>,

    pub(crate) enc_method_node: Option<NodeId>,
    pub(crate) key_info_node: Option<NodeId>,
    pub(crate) cipher_value_node: Option<NodeId>,

    pub(crate) result: Option<Vec<u8>>,
    pub(crate) result_base64_encoded: bool,
    pub(crate) result_replaced: bool,

    pub(crate) allowed_cipher_reference_uris: UriPolicy,
}

impl<'a> EncryptionContext<'a> {
    /// Creates a context in `EncryptedData` mode. The write-side `KeyInfo`
    /// context is restricted to public material, and every cipher reference
    /// URI class is allowed until narrowed.
    #[must_use]
    pub fn new(keys_manager: Option<&'a dyn KeyProvider>) -> Self {
        Self {
            mode: EncryptionMode::EncryptedData,
            operation: Operation::Decrypt,
            keys_manager,
            key_info_read_ctx: KeyInfoContext::read(),
            key_info_write_ctx: KeyInfoContext::write(),
            pipeline: Pipeline::new(),
            method: MethodSlot::Empty,
            enc_key: None,
            id: None,
            data_type: None,
            mime_type: None,
            encoding: None,
            recipient: None,
            carried_key_name: None,
            enc_method_node: None,
            key_info_node: None,
            cipher_value_node: None,
            result: None,
            result_base64_encoded: false,
            result_replaced: false,
            allowed_cipher_reference_uris: UriPolicy::ANY,
        }
    }

    /// Switches between `EncryptedData` and `EncryptedKey` processing.
    pub fn set_mode(&mut self, mode: EncryptionMode) {
        self.mode = mode;
    }

    /// The configured mode.
    #[must_use]
    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Supplies the encryption method directly instead of reading it from
    /// the template. A caller-supplied method is returned by
    /// [`Self::finalize`], never dropped by the context.
    pub fn set_encryption_method(&mut self, method: CipherTransform) {
        self.method = MethodSlot::CallerSupplied(method);
    }

    /// Presets the key, bypassing `KeyInfo` resolution. The key must still
    /// satisfy the method's requirements at template-read time.
    pub fn set_key(&mut self, key: Key) {
        self.enc_key = Some(key);
    }

    /// Narrows (or widens) the acceptable `CipherReference` URI classes.
    pub fn set_allowed_cipher_reference_uris(&mut self, policy: UriPolicy) {
        self.allowed_cipher_reference_uris = policy;
    }

    /// The operation result, present after a successful operation.
    #[must_use]
    pub fn result(&self) -> Option<&[u8]> {
        self.result.as_deref()
    }

    /// True when the result bytes are base64 text.
    #[must_use]
    pub fn result_base64_encoded(&self) -> bool {
        self.result_base64_encoded
    }

    /// True when the operation wrote into or substituted the document.
    #[must_use]
    pub fn result_replaced(&self) -> bool {
        self.result_replaced
    }

    /// The resolved key, present after template read succeeded.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.enc_key.as_ref()
    }

    /// `Id` attribute of the processed subtree.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// `Type` attribute of the processed subtree.
    #[must_use]
    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    /// `MimeType` attribute of the processed subtree.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// `Encoding` attribute of the processed subtree.
    #[must_use]
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// `Recipient` attribute (`EncryptedKey` only). Passed through without
    /// interpretation; callers wanting a recipient policy apply it here.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    /// `CarriedKeyName` content (`EncryptedKey` only). Passed through
    /// verbatim, not decoded; callers decide what the name means.
    #[must_use]
    pub fn carried_key_name(&self) -> Option<&str> {
        self.carried_key_name.as_deref()
    }

    /// Encrypts a binary buffer into the template: template read, push-mode
    /// pipeline execution, template write.
    ///
    /// # Errors
    ///
    /// Template grammar violations, key resolution failures, and transform
    /// failures; see the error taxonomy.
    pub fn binary_encrypt(&mut self, doc: &mut Document, tmpl: NodeId, data: &[u8]) -> Result<()> {
        self.ensure_unused()?;
        self.operation = Operation::Encrypt;
        doc.register_ids(tmpl, config::ENC_ID_ATTRIBUTES);

        self.template_read(doc, tmpl)?;
        let result = self.run_binary(data.to_vec())?;
        self.result = Some(result);
        self.template_write(doc)
    }

    /// Encrypts `node` of `doc` — the element itself when the template's
    /// `Type` is `#Element`, its children in document order when `#Content`
    /// — and replaces it with the filled-in template. The template subtree
    /// is imported from `tmpl_doc`, which stays untouched.
    ///
    /// # Errors
    ///
    /// [`XmlEncError::InvalidType`] for any other `Type`, plus the
    /// template-read, pipeline, and substitution failures.
    pub fn xml_encrypt(
        &mut self,
        tmpl_doc: &Document,
        tmpl: NodeId,
        doc: &mut Document,
        node: NodeId,
    ) -> Result<()> {
        self.ensure_unused()?;
        self.operation = Operation::Encrypt;
        let template = doc.import(tmpl_doc, tmpl);
        doc.register_ids(template, config::ENC_ID_ATTRIBUTES);

        self.template_read(doc, template)?;

        let input = match self.data_type.as_deref() {
            Some(config::TYPE_ELEMENT) => doc.serialize_node_with_scope(node)?,
            Some(config::TYPE_CONTENT) => {
                let mut buffer = Vec::new();
                for &child in doc.children(node) {
                    buffer.extend_from_slice(&doc.serialize_node_with_scope(child)?);
                }
                buffer
            }
            other => {
                return Err(XmlEncError::InvalidType { value: other.unwrap_or_default().to_owned() });
            }
        };

        let result = self.run_binary(input)?;
        self.result = Some(result);
        self.template_write(doc)?;

        match self.data_type.as_deref() {
            Some(config::TYPE_ELEMENT) => {
                doc.replace_node(node, template)?;
                self.result_replaced = true;
            }
            Some(config::TYPE_CONTENT) => {
                doc.replace_content(node, template);
                self.result_replaced = true;
            }
            other => {
                return Err(XmlEncError::InvalidType { value: other.unwrap_or_default().to_owned() });
            }
        }
        Ok(())
    }

    /// Encrypts the resource a URI names. The URI is installed as the
    /// pipeline input before the template is read, so the fetch sits at the
    /// head of the chain.
    ///
    /// # Errors
    ///
    /// URI parse and fetch failures, plus the template-read, pipeline, and
    /// write failures.
    pub fn uri_encrypt(&mut self, doc: &mut Document, tmpl: NodeId, uri: &str) -> Result<()> {
        self.ensure_unused()?;
        self.operation = Operation::Encrypt;
        self.pipeline.set_input_uri(uri)?;
        doc.register_ids(tmpl, config::ENC_ID_ATTRIBUTES);

        self.template_read(doc, tmpl)?;
        let result = self.run_uri(doc)?;
        self.result = Some(result);
        self.template_write(doc)
    }

    /// Decrypts `node` and substitutes the plaintext for it when the `Type`
    /// is `#Element` or `#Content`; other types leave the document alone
    /// and the bytes stay available through [`Self::result`].
    ///
    /// # Errors
    ///
    /// As [`Self::decrypt_to_buffer`], plus plaintext re-parse failures.
    pub fn decrypt(&mut self, doc: &mut Document, node: NodeId) -> Result<()> {
        let buffer = self.decrypt_to_buffer(doc, node)?.to_vec();

        match self.data_type.as_deref() {
            Some(config::TYPE_ELEMENT) => {
                doc.replace_node_with_fragment(node, &buffer)?;
                self.result_replaced = true;
            }
            Some(config::TYPE_CONTENT) => {
                // Content substitution is kept as its own branch; it may
                // diverge from the Element path (wrapping parse).
                doc.replace_node_with_fragment(node, &buffer)?;
                self.result_replaced = true;
            }
            _ => {}
        }
        Ok(())
    }

    /// Decrypts `node` to a buffer without touching the document. Inline
    /// `CipherValue` text runs through the pipeline in push mode with the
    /// base64 decoder at the head; a `CipherReference` runs in pull mode.
    ///
    /// # Errors
    ///
    /// Template grammar violations, key resolution failures, URI policy
    /// rejections, and transform failures.
    pub fn decrypt_to_buffer(&mut self, doc: &mut Document, node: NodeId) -> Result<&[u8]> {
        self.ensure_unused()?;
        self.operation = Operation::Decrypt;
        doc.register_ids(node, config::ENC_ID_ATTRIBUTES);

        self.template_read(doc, node)?;

        let result = match self.cipher_value_node {
            Some(cipher_value) => {
                let text = doc.text_content(cipher_value);
                self.run_binary(text.into_bytes())?
            }
            None => self.run_uri(doc)?,
        };
        self.result = Some(result);
        debug!(bytes = self.result.as_ref().map_or(0, Vec::len), "decryption produced plaintext");
        Ok(self.result.as_deref().unwrap_or_default())
    }

    /// Releases the operation state and readies the context for another
    /// operation. A caller-supplied encryption method is handed back; one
    /// read from a template is dropped. The mode, the keys manager binding,
    /// and the URI policy survive.
    pub fn finalize(&mut self) -> Option<CipherTransform> {
        let returned = match std::mem::replace(&mut self.method, MethodSlot::Empty) {
            MethodSlot::CallerSupplied(method) => Some(method),
            MethodSlot::FromTemplate(_) | MethodSlot::Empty => None,
        };

        self.operation = Operation::Decrypt;
        self.key_info_read_ctx = KeyInfoContext::read();
        self.key_info_write_ctx = KeyInfoContext::write();
        self.pipeline.reset();
        self.enc_key = None;
        self.id = None;
        self.data_type = None;
        self.mime_type = None;
        self.encoding = None;
        self.recipient = None;
        self.carried_key_name = None;
        self.enc_method_node = None;
        self.key_info_node = None;
        self.cipher_value_node = None;
        self.result = None;
        self.result_base64_encoded = false;
        self.result_replaced = false;
        returned
    }

    fn ensure_unused(&self) -> Result<()> {
        if self.result.is_some() {
            return Err(XmlEncError::InvalidData(
                "context already holds a result; finalize before the next operation".into(),
            ));
        }
        Ok(())
    }

    fn run_binary(&mut self, data: Vec<u8>) -> Result<Vec<u8>> {
        let method = self
            .method
            .as_mut()
            .ok_or_else(|| XmlEncError::InvalidData("encryption method not resolved".into()))?;
        self.pipeline.execute_binary(method, data)
    }

    fn run_uri(&mut self, doc: &Document) -> Result<Vec<u8>> {
        let method = self
            .method
            .as_mut()
            .ok_or_else(|| XmlEncError::InvalidData("encryption method not resolved".into()))?;
        self.pipeline.execute_uri(method, doc)
    }
}

#[cfg(test)]
mod tests {
    use aes::cipher::block_padding::Pkcs7;
    use aes::cipher::{BlockEncryptMut, KeyIvInit};

    use super::*;
    use crate::keys::{Key, SimpleKeysManager};
    use crate::transform::{EncryptionAlgorithm, base64_decode_tolerant, base64_encode};

    fn manager_with(name: &str, bytes: &[u8]) -> SimpleKeysManager {
        let mut manager = SimpleKeysManager::new();
        manager.add_key(Key::new_symmetric(Some(name), bytes.to_vec()));
        manager
    }

    fn data_template(algorithm: &str, key_name: &str, type_attr: Option<&str>) -> String {
        let type_part = type_attr.map_or_else(String::new, |t| format!(r#" Type="{t}""#));
        format!(
            concat!(
                r#"<xenc:EncryptedData xmlns:xenc="{enc}"{type_part}>"#,
                r#"<xenc:EncryptionMethod Algorithm="{algorithm}"/>"#,
                r#"<ds:KeyInfo xmlns:ds="{dsig}"><ds:KeyName>{key_name}</ds:KeyName></ds:KeyInfo>"#,
                r#"<xenc:CipherData><xenc:CipherValue/></xenc:CipherData>"#,
                r#"</xenc:EncryptedData>"#
            ),
            enc = config::XMLENC_NS,
            type_part = type_part,
            algorithm = algorithm,
            dsig = config::DSIG_NS,
            key_name = key_name,
        )
    }

    fn cipher_value_text(doc: &Document) -> String {
        let xml = doc.to_xml().unwrap();
        let start = xml.find("CipherValue>").unwrap() + "CipherValue>".len();
        let end = xml[start..].find('<').unwrap();
        xml[start..start + end].to_owned()
    }

    #[test]
    fn test_binary_encrypt_decrypt_round_trip() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let data = b"the quick brown fox";

        let mut doc = Document::parse(&data_template(config::HREF_AES128_CBC, "bob", None)).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.binary_encrypt(&mut doc, root, data).unwrap();
        assert!(ctx.result_base64_encoded());
        assert!(ctx.result_replaced());

        let mut reparsed = Document::parse(&doc.to_xml().unwrap()).unwrap();
        let node = reparsed.root().unwrap();
        let mut dec = EncryptionContext::new(Some(&manager));
        assert_eq!(dec.decrypt_to_buffer(&mut reparsed, node).unwrap(), data);
        assert!(!dec.result_replaced());
    }

    #[test]
    fn test_binary_round_trip_across_algorithms() {
        for (href, key_len) in [
            (config::HREF_AES128_CBC, 16),
            (config::HREF_AES192_CBC, 24),
            (config::HREF_AES256_CBC, 32),
            (config::HREF_AES128_GCM, 16),
            (config::HREF_AES256_GCM, 32),
        ] {
            let manager = manager_with("k", &vec![0x5C; key_len]);
            let data: Vec<u8> = (0u8..200).collect();

            let mut doc = Document::parse(&data_template(href, "k", None)).unwrap();
            let root = doc.root().unwrap();
            let mut ctx = EncryptionContext::new(Some(&manager));
            ctx.binary_encrypt(&mut doc, root, &data).unwrap();

            let mut reparsed = Document::parse(&doc.to_xml().unwrap()).unwrap();
            let node = reparsed.root().unwrap();
            let mut dec = EncryptionContext::new(Some(&manager));
            assert_eq!(dec.decrypt_to_buffer(&mut reparsed, node).unwrap(), data, "algorithm {href}");
        }
    }

    #[test]
    fn test_cipher_value_carries_canonical_ciphertext() {
        let key = [0x2A; 16];
        let manager = manager_with("s3", &key);
        let data: Vec<u8> = (0x00..=0x0F).collect();

        let mut doc = Document::parse(&data_template(config::HREF_AES128_CBC, "s3", None)).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.binary_encrypt(&mut doc, root, &data).unwrap();

        let text = cipher_value_text(&doc);
        let raw = base64_decode_tolerant(text.as_bytes()).unwrap();
        let (iv, ciphertext) = raw.split_at(16);

        let expected = cbc::Encryptor::<aes::Aes128>::new_from_slices(&key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(&data);
        assert_eq!(ciphertext, expected);
        assert_eq!(text, base64_encode(&raw));
    }

    #[test]
    fn test_xml_encrypt_element_and_restore() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let original = "<doc><p>hi</p></doc>";

        let tmpl_doc =
            Document::parse(&data_template(config::HREF_AES128_CBC, "bob", Some(config::TYPE_ELEMENT))).unwrap();
        let mut doc = Document::parse(original).unwrap();
        let target = doc.root().unwrap();

        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.xml_encrypt(&tmpl_doc, tmpl_doc.root().unwrap(), &mut doc, target).unwrap();
        assert!(ctx.result_replaced());

        let encrypted = doc.to_xml().unwrap();
        assert!(encrypted.starts_with("<xenc:EncryptedData"));
        assert!(!encrypted.contains("hi"));

        let mut round = Document::parse(&encrypted).unwrap();
        let node = round.root().unwrap();
        let mut dec = EncryptionContext::new(Some(&manager));
        dec.decrypt(&mut round, node).unwrap();
        assert!(dec.result_replaced());
        assert_eq!(round.to_xml().unwrap(), original);
    }

    #[test]
    fn test_xml_encrypt_content_and_restore() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let original = "<env><a/>between<b/></env>";

        let tmpl_doc =
            Document::parse(&data_template(config::HREF_AES128_CBC, "bob", Some(config::TYPE_CONTENT))).unwrap();
        let mut doc = Document::parse(original).unwrap();
        let target = doc.root().unwrap();

        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.xml_encrypt(&tmpl_doc, tmpl_doc.root().unwrap(), &mut doc, target).unwrap();

        let encrypted = doc.to_xml().unwrap();
        assert!(encrypted.starts_with("<env><xenc:EncryptedData"));
        assert!(!encrypted.contains("between"));

        let mut round = Document::parse(&encrypted).unwrap();
        let node = round.first_element_child(round.root().unwrap()).unwrap();
        let mut dec = EncryptionContext::new(Some(&manager));
        dec.decrypt(&mut round, node).unwrap();
        assert_eq!(round.to_xml().unwrap(), original);
    }

    #[test]
    fn test_xml_encrypt_rejects_other_types() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let tmpl_doc = Document::parse(&data_template(
            config::HREF_AES128_CBC,
            "bob",
            Some("http://www.w3.org/2001/04/xmlenc#EncryptedKey"),
        ))
        .unwrap();
        let mut doc = Document::parse("<doc/>").unwrap();
        let target = doc.root().unwrap();

        let mut ctx = EncryptionContext::new(Some(&manager));
        let err = ctx.xml_encrypt(&tmpl_doc, tmpl_doc.root().unwrap(), &mut doc, target).unwrap_err();
        assert!(matches!(err, XmlEncError::InvalidType { .. }));
    }

    #[test]
    fn test_context_is_single_use_until_finalized() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let mut doc = Document::parse(&data_template(config::HREF_AES128_CBC, "bob", None)).unwrap();
        let root = doc.root().unwrap();

        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.binary_encrypt(&mut doc, root, b"once").unwrap();
        let err = ctx.binary_encrypt(&mut doc, root, b"twice").unwrap_err();
        assert!(matches!(err, XmlEncError::InvalidData(_)));

        assert!(ctx.finalize().is_none());
        let mut doc2 = Document::parse(&data_template(config::HREF_AES128_CBC, "bob", None)).unwrap();
        let root2 = doc2.root().unwrap();
        ctx.binary_encrypt(&mut doc2, root2, b"twice").unwrap();
    }

    #[test]
    fn test_caller_supplied_method_is_returned_by_finalize() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let template = format!(
            concat!(
                r#"<xenc:EncryptedData xmlns:xenc="{enc}">"#,
                r#"<xenc:CipherData><xenc:CipherValue/></xenc:CipherData>"#,
                r#"</xenc:EncryptedData>"#
            ),
            enc = config::XMLENC_NS,
        );
        let mut doc = Document::parse(&template).unwrap();
        let root = doc.root().unwrap();

        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.set_encryption_method(CipherTransform::new(EncryptionAlgorithm::Aes128Cbc));
        ctx.binary_encrypt(&mut doc, root, b"payload").unwrap();

        let returned = ctx.finalize().expect("caller-supplied method comes back");
        assert_eq!(returned.algorithm(), EncryptionAlgorithm::Aes128Cbc);
    }

    #[test]
    fn test_missing_encryption_method_is_invalid_data() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let template = format!(
            r#"<xenc:EncryptedData xmlns:xenc="{}"><xenc:CipherData><xenc:CipherValue/></xenc:CipherData></xenc:EncryptedData>"#,
            config::XMLENC_NS,
        );
        let mut doc = Document::parse(&template).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        let err = ctx.binary_encrypt(&mut doc, root, b"data").unwrap_err();
        assert!(matches!(err, XmlEncError::InvalidData(_)));
    }

    #[test]
    fn test_wrong_root_for_mode() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let mut doc = Document::parse(&data_template(config::HREF_AES128_CBC, "bob", None)).unwrap();
        let root = doc.root().unwrap();

        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.set_mode(EncryptionMode::EncryptedKey);
        let err = ctx.binary_encrypt(&mut doc, root, b"data").unwrap_err();
        assert!(matches!(err, XmlEncError::InvalidNode { .. }));
    }

    #[test]
    fn test_unexpected_trailing_child() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let template = format!(
            concat!(
                r#"<xenc:EncryptedData xmlns:xenc="{enc}">"#,
                r#"<xenc:EncryptionMethod Algorithm="{alg}"/>"#,
                r#"<xenc:CipherData><xenc:CipherValue/></xenc:CipherData>"#,
                r#"<xenc:Rogue/>"#,
                r#"</xenc:EncryptedData>"#
            ),
            enc = config::XMLENC_NS,
            alg = config::HREF_AES128_CBC,
        );
        let mut doc = Document::parse(&template).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        let err = ctx.binary_encrypt(&mut doc, root, b"data").unwrap_err();
        assert!(matches!(err, XmlEncError::UnexpectedNode { .. }));
    }

    #[test]
    fn test_key_resolution_respects_size_requirement() {
        let mut manager = SimpleKeysManager::new();
        manager.add_key(Key::new_symmetric(Some("bob"), vec![1; 32]));

        let template = data_template(config::HREF_AES128_CBC, "bob", None);
        let mut doc = Document::parse(&template).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        let err = ctx.binary_encrypt(&mut doc, root, b"data").unwrap_err();
        assert!(matches!(err, XmlEncError::KeyNotFound));

        manager.add_key(Key::new_symmetric(Some("bob"), vec![2; 16]));
        let mut doc = Document::parse(&template).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.binary_encrypt(&mut doc, root, b"data").unwrap();
        assert_eq!(ctx.key().unwrap().bits(), 128);
    }

    fn reference_template(uri: &str, with_transforms: bool) -> String {
        let transforms = if with_transforms {
            format!(
                r#"<xenc:Transforms><ds:Transform xmlns:ds="{}" Algorithm="{}"/></xenc:Transforms>"#,
                config::DSIG_NS,
                config::HREF_BASE64,
            )
        } else {
            String::new()
        };
        format!(
            concat!(
                r#"<xenc:EncryptedData xmlns:xenc="{enc}">"#,
                r#"<xenc:EncryptionMethod Algorithm="{alg}"/>"#,
                r#"<xenc:CipherData><xenc:CipherReference URI="{uri}">{transforms}</xenc:CipherReference></xenc:CipherData>"#,
                r#"</xenc:EncryptedData>"#
            ),
            enc = config::XMLENC_NS,
            alg = config::HREF_AES128_CBC,
            uri = uri,
            transforms = transforms,
        )
    }

    #[test]
    fn test_cipher_reference_uri_policy() {
        let manager = manager_with("bob", &[0x0B; 16]);

        let mut doc = Document::parse(&reference_template("cid:blob", false)).unwrap();
        let node = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.set_allowed_cipher_reference_uris(UriPolicy::NONE);
        assert!(matches!(
            ctx.decrypt_to_buffer(&mut doc, node).unwrap_err(),
            XmlEncError::InvalidUriType { .. }
        ));

        let mut doc = Document::parse(&reference_template("cid:blob", false)).unwrap();
        let node = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.set_allowed_cipher_reference_uris(UriPolicy::REMOTE);
        assert!(matches!(
            ctx.decrypt_to_buffer(&mut doc, node).unwrap_err(),
            XmlEncError::InvalidUriType { .. }
        ));

        // "cid:blob" classifies as local; with local allowed the reference
        // parses and the failure moves to the fetch itself.
        let mut doc = Document::parse(&reference_template("cid:blob", false)).unwrap();
        let node = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.set_allowed_cipher_reference_uris(UriPolicy::REMOTE | UriPolicy::LOCAL);
        assert!(matches!(ctx.decrypt_to_buffer(&mut doc, node).unwrap_err(), XmlEncError::Io(_)));
    }

    #[test]
    fn test_cipher_reference_local_file_with_transforms() {
        use std::io::Write;

        let key = [0x0B; 16];
        let manager = manager_with("bob", &key);
        let data = b"externally stored secret";

        let mut enc_doc = Document::parse(&data_template(config::HREF_AES128_CBC, "bob", None)).unwrap();
        let enc_root = enc_doc.root().unwrap();
        let mut enc_ctx = EncryptionContext::new(Some(&manager));
        enc_ctx.binary_encrypt(&mut enc_doc, enc_root, data).unwrap();
        let base64_ciphertext = cipher_value_text(&enc_doc);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(base64_ciphertext.as_bytes()).unwrap();

        let mut doc =
            Document::parse(&reference_template(&file.path().display().to_string(), true)).unwrap();
        let node = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        assert_eq!(ctx.decrypt_to_buffer(&mut doc, node).unwrap(), data);
        assert!(!ctx.result_base64_encoded());
    }

    #[test]
    fn test_cipher_reference_same_document() {
        let key = [0x0B; 16];
        let manager = manager_with("bob", &key);
        let data = b"same doc payload";

        let mut enc_doc = Document::parse(&data_template(config::HREF_AES128_CBC, "bob", None)).unwrap();
        let enc_root = enc_doc.root().unwrap();
        let mut enc_ctx = EncryptionContext::new(Some(&manager));
        enc_ctx.binary_encrypt(&mut enc_doc, enc_root, data).unwrap();
        let base64_ciphertext = cipher_value_text(&enc_doc);

        let envelope = format!(
            r#"<envelope><blob Id="stash">{base64_ciphertext}</blob>{reference}</envelope>"#,
            reference = reference_template("#stash", true),
        );
        let mut doc = Document::parse(&envelope).unwrap();
        let root = doc.root().unwrap();
        doc.register_ids(root, config::ENC_ID_ATTRIBUTES);

        let blob = doc.first_element_child(root).unwrap();
        let node = doc.next_element_sibling(blob).unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        assert_eq!(ctx.decrypt_to_buffer(&mut doc, node).unwrap(), data);
    }

    fn key_template(algorithm: &str, kek_name: &str) -> String {
        format!(
            concat!(
                r#"<xenc:EncryptedKey xmlns:xenc="{enc}" Recipient="bob">"#,
                r#"<xenc:EncryptionMethod Algorithm="{algorithm}"/>"#,
                r#"<ds:KeyInfo xmlns:ds="{dsig}"><ds:KeyName>{kek_name}</ds:KeyName></ds:KeyInfo>"#,
                r#"<xenc:CipherData><xenc:CipherValue/></xenc:CipherData>"#,
                r#"<xenc:CarriedKeyName>session</xenc:CarriedKeyName>"#,
                r#"</xenc:EncryptedKey>"#
            ),
            enc = config::XMLENC_NS,
            algorithm = algorithm,
            dsig = config::DSIG_NS,
            kek_name = kek_name,
        )
    }

    #[test]
    fn test_encrypted_key_wrap_round_trip() {
        let manager = manager_with("kek", &[0x77; 16]);
        let session_key = [0xA5u8; 16];

        let mut doc = Document::parse(&key_template(config::HREF_KW_AES128, "kek")).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.set_mode(EncryptionMode::EncryptedKey);
        ctx.binary_encrypt(&mut doc, root, &session_key).unwrap();
        assert_eq!(ctx.recipient(), Some("bob"));
        assert_eq!(ctx.carried_key_name(), Some("session"));

        let mut reparsed = Document::parse(&doc.to_xml().unwrap()).unwrap();
        let node = reparsed.root().unwrap();
        let mut dec = EncryptionContext::new(Some(&manager));
        dec.set_mode(EncryptionMode::EncryptedKey);
        assert_eq!(dec.decrypt_to_buffer(&mut reparsed, node).unwrap(), session_key);
        assert_eq!(dec.carried_key_name(), Some("session"));
        assert!(!dec.result_replaced());
    }

    #[test]
    fn test_encrypted_key_rsa_round_trip() {
        let mut rng = rand::rngs::OsRng;
        let private = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let mut manager = SimpleKeysManager::new();
        manager.add_key(Key::new_rsa(Some("transport"), private.to_public_key(), Some(private)));

        let session_key = [0x3Cu8; 24];
        let mut doc = Document::parse(&key_template(config::HREF_RSA_OAEP_MGF1P, "transport")).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.set_mode(EncryptionMode::EncryptedKey);
        ctx.binary_encrypt(&mut doc, root, &session_key).unwrap();

        let mut reparsed = Document::parse(&doc.to_xml().unwrap()).unwrap();
        let node = reparsed.root().unwrap();
        let mut dec = EncryptionContext::new(Some(&manager));
        dec.set_mode(EncryptionMode::EncryptedKey);
        assert_eq!(dec.decrypt_to_buffer(&mut reparsed, node).unwrap(), session_key);
    }

    #[test]
    fn test_empty_carried_key_name_is_rejected() {
        let manager = manager_with("kek", &[0x77; 16]);
        let template = key_template(config::HREF_KW_AES128, "kek").replace("session", "");
        let mut doc = Document::parse(&template).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.set_mode(EncryptionMode::EncryptedKey);
        let err = ctx.binary_encrypt(&mut doc, root, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, XmlEncError::InvalidNodeContent { .. }));
    }

    #[test]
    fn test_template_write_fills_key_info_placeholders() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let template = format!(
            concat!(
                r#"<xenc:EncryptedData xmlns:xenc="{enc}">"#,
                r#"<xenc:EncryptionMethod Algorithm="{alg}"/>"#,
                r#"<ds:KeyInfo xmlns:ds="{dsig}"><ds:KeyName>bob</ds:KeyName></ds:KeyInfo>"#,
                r#"<xenc:CipherData><xenc:CipherValue/></xenc:CipherData>"#,
                r#"</xenc:EncryptedData>"#
            ),
            enc = config::XMLENC_NS,
            alg = config::HREF_AES128_CBC,
            dsig = config::DSIG_NS,
        );
        let mut doc = Document::parse(&template).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.binary_encrypt(&mut doc, root, b"data").unwrap();

        let xml = doc.to_xml().unwrap();
        assert!(xml.contains("<ds:KeyName>bob</ds:KeyName>"));
    }

    #[test]
    fn test_metadata_attributes_are_captured() {
        let manager = manager_with("bob", &[0x0B; 16]);
        let template = format!(
            concat!(
                r#"<xenc:EncryptedData xmlns:xenc="{enc}" Id="e1" Type="{element}" MimeType="text/xml" Encoding="utf-8">"#,
                r#"<xenc:EncryptionMethod Algorithm="{alg}"/>"#,
                r#"<xenc:CipherData><xenc:CipherValue/></xenc:CipherData>"#,
                r#"</xenc:EncryptedData>"#
            ),
            enc = config::XMLENC_NS,
            element = config::TYPE_ELEMENT,
            alg = config::HREF_AES128_CBC,
        );
        let tmpl_doc = Document::parse(&template).unwrap();
        let mut doc = Document::parse("<x/>").unwrap();
        let target = doc.root().unwrap();

        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.xml_encrypt(&tmpl_doc, tmpl_doc.root().unwrap(), &mut doc, target).unwrap();
        assert_eq!(ctx.id(), Some("e1"));
        assert_eq!(ctx.data_type(), Some(config::TYPE_ELEMENT));
        assert_eq!(ctx.mime_type(), Some("text/xml"));
        assert_eq!(ctx.encoding(), Some("utf-8"));
        assert_eq!(ctx.recipient(), None);
        assert_eq!(ctx.carried_key_name(), None);
    }
}
