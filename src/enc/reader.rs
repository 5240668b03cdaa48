//! Template parsing: the strict child grammar of `EncryptedData` and
//! `EncryptedKey`, the `CipherData` dispatch, and `CipherReference`
//! handling.
//!
//! Child order is fixed: `EncryptionMethod?`, `KeyInfo?`, `CipherData`
//! (required), `EncryptionProperties?`, and for `EncryptedKey` additionally
//! `ReferenceList?` and `CarriedKeyName?`. Anything left after that is an
//! error, and no DOM mutation happens on any failure path.

use tracing::{debug, warn};

use super::{EncryptionContext, EncryptionMode, MethodSlot};
use crate::config;
use crate::error::{Result, XmlEncError};
use crate::transform::{Base64Transform, CipherTransform, Operation};
use crate::xml::{Document, NodeId};

impl EncryptionContext<'_> {
    /// Parses the subtree at `node`, resolves the encryption method and the
    /// key, and finishes pipeline assembly for the configured direction.
    pub(super) fn template_read(&mut self, doc: &Document, node: NodeId) -> Result<()> {
        let expected = self.mode.node_name();
        if !doc.is_named(node, expected, config::XMLENC_NS) {
            return Err(XmlEncError::InvalidNode { expected: expected.to_owned(), found: doc.name_of(node) });
        }

        self.id = doc.attribute(node, config::ATTR_ID).map(str::to_owned);
        self.data_type = doc.attribute(node, config::ATTR_TYPE).map(str::to_owned);
        self.mime_type = doc.attribute(node, config::ATTR_MIME_TYPE).map(str::to_owned);
        self.encoding = doc.attribute(node, config::ATTR_ENCODING).map(str::to_owned);
        if self.mode == EncryptionMode::EncryptedKey {
            self.recipient = doc.attribute(node, config::ATTR_RECIPIENT).map(str::to_owned);
        }

        let mut cursor = doc.first_element_child(node);

        if let Some(current) = cursor {
            if doc.is_named(current, config::NODE_ENCRYPTION_METHOD, config::XMLENC_NS) {
                self.enc_method_node = Some(current);
                cursor = doc.next_element_sibling(current);
            }
        }

        if let Some(current) = cursor {
            if doc.is_named(current, config::NODE_KEY_INFO, config::DSIG_NS) {
                self.key_info_node = Some(current);
                cursor = doc.next_element_sibling(current);
            }
        }

        let Some(cipher_data) =
            cursor.filter(|&current| doc.is_named(current, config::NODE_CIPHER_DATA, config::XMLENC_NS))
        else {
            return Err(XmlEncError::InvalidNode {
                expected: config::NODE_CIPHER_DATA.to_owned(),
                found: cursor.map_or_else(|| "nothing".to_owned(), |current| doc.name_of(current)),
            });
        };
        self.cipher_data_read(doc, cipher_data)?;
        cursor = doc.next_element_sibling(cipher_data);

        if let Some(current) = cursor {
            if doc.is_named(current, config::NODE_ENCRYPTION_PROPERTIES, config::XMLENC_NS) {
                cursor = doc.next_element_sibling(current);
            }
        }

        if self.mode == EncryptionMode::EncryptedKey {
            if let Some(current) = cursor {
                if doc.is_named(current, config::NODE_REFERENCE_LIST, config::XMLENC_NS) {
                    cursor = doc.next_element_sibling(current);
                }
            }
            if let Some(current) = cursor {
                if doc.is_named(current, config::NODE_CARRIED_KEY_NAME, config::XMLENC_NS) {
                    let name = doc.text_content(current);
                    if name.is_empty() {
                        return Err(XmlEncError::InvalidNodeContent { node: doc.name_of(current) });
                    }
                    // Verbatim pass-through: not decoded, not checked
                    // against Recipient.
                    self.carried_key_name = Some(name);
                    cursor = doc.next_element_sibling(current);
                }
            }
        }

        if let Some(stray) = cursor {
            return Err(XmlEncError::UnexpectedNode { node: doc.name_of(stray) });
        }

        self.resolve_method(doc)?;
        self.resolve_key(doc)?;

        // Writing back into a CipherValue needs base64 text, so the encoder
        // joins the pipeline tail.
        if self.operation == Operation::Encrypt && self.cipher_value_node.is_some() {
            self.pipeline.append_tail(Box::new(Base64Transform::encoder()));
            self.result_base64_encoded = true;
        }
        Ok(())
    }

    fn resolve_method(&mut self, doc: &Document) -> Result<()> {
        if self.method.as_ref().is_none() {
            let Some(node) = self.enc_method_node else {
                return Err(XmlEncError::InvalidData("encryption method not specified".into()));
            };
            let method = CipherTransform::from_method_node(doc, node)?;
            debug!(algorithm = method.algorithm().name(), "encryption method read from template");
            self.method = MethodSlot::FromTemplate(method);
        }

        let operation = self.operation;
        let method = self
            .method
            .as_mut()
            .ok_or_else(|| XmlEncError::InvalidData("encryption method not resolved".into()))?;
        method.set_operation(operation);
        self.key_info_read_ctx.key_requirements = method.key_requirements();
        Ok(())
    }

    fn resolve_key(&mut self, doc: &Document) -> Result<()> {
        if self.enc_key.is_none() {
            if let Some(manager) = self.keys_manager {
                let hint = self.key_info_node.map(|node| (&*doc, node));
                self.enc_key = manager.get_key(hint, &self.key_info_read_ctx)?;
            }
        }

        let satisfied = self
            .enc_key
            .as_ref()
            .is_some_and(|key| key.matches(None, &self.key_info_read_ctx.key_requirements));
        if !satisfied {
            warn!("no key satisfied the encryption method's requirements");
            return Err(XmlEncError::KeyNotFound);
        }

        let key = self.enc_key.clone().ok_or(XmlEncError::KeyNotFound)?;
        let method = self
            .method
            .as_mut()
            .ok_or_else(|| XmlEncError::InvalidData("encryption method not resolved".into()))?;
        method.set_key(key)
    }

    fn cipher_data_read(&mut self, doc: &Document, node: NodeId) -> Result<()> {
        let mut cursor = doc.first_element_child(node);

        if let Some(current) = cursor {
            if doc.is_named(current, config::NODE_CIPHER_VALUE, config::XMLENC_NS) {
                // Inline ciphertext is base64 text; decryption needs the
                // decoder ahead of the cipher.
                if self.operation == Operation::Decrypt {
                    self.pipeline.prepend(Box::new(Base64Transform::decoder()));
                }
                self.cipher_value_node = Some(current);
                cursor = doc.next_element_sibling(current);
            } else if doc.is_named(current, config::NODE_CIPHER_REFERENCE, config::XMLENC_NS) {
                // The reference only matters when reading ciphertext back.
                if self.operation == Operation::Decrypt {
                    self.cipher_reference_read(doc, current)?;
                }
                cursor = doc.next_element_sibling(current);
            }
        }

        if let Some(stray) = cursor {
            return Err(XmlEncError::InvalidNode {
                expected: format!("{} or {}", config::NODE_CIPHER_VALUE, config::NODE_CIPHER_REFERENCE),
                found: doc.name_of(stray),
            });
        }
        Ok(())
    }

    fn cipher_reference_read(&mut self, doc: &Document, node: NodeId) -> Result<()> {
        let uri = doc.attribute(node, config::ATTR_URI);
        if !self.allowed_cipher_reference_uris.check(uri) {
            warn!(uri = ?uri, "cipher reference uri rejected by policy");
            return Err(XmlEncError::InvalidUriType { uri: uri.unwrap_or_default().to_owned() });
        }
        if let Some(uri) = uri.filter(|u| !u.is_empty()) {
            self.pipeline.set_input_uri(uri)?;
        }

        let mut cursor = doc.first_element_child(node);
        if let Some(current) = cursor {
            if doc.is_named(current, config::NODE_TRANSFORMS, config::XMLENC_NS) {
                self.pipeline.read_transforms_list(doc, current)?;
                cursor = doc.next_element_sibling(current);
            }
        }
        if let Some(stray) = cursor {
            return Err(XmlEncError::UnexpectedNode { node: doc.name_of(stray) });
        }
        Ok(())
    }
}
