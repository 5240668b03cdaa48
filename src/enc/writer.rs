//! Template write-back: ciphertext into `CipherValue`, the resolved key
//! into `KeyInfo`.
//!
//! This is the only place an encrypt operation mutates the document, and it
//! runs after the pipeline has already succeeded; a failing operation leaves
//! the template exactly as it was.

use crate::error::{Result, XmlEncError};
use crate::keys::write_key_info;
use crate::xml::Document;

use super::EncryptionContext;

impl EncryptionContext<'_> {
    /// Writes the result into the template's `CipherValue` (the bytes are
    /// already base64 text from the pipeline tail) and emits the resolved
    /// key through the `KeyInfo` writer with the write-side context.
    pub(super) fn template_write(&mut self, doc: &mut Document) -> Result<()> {
        if let Some(cipher_value) = self.cipher_value_node {
            let text = match self.result.as_ref() {
                Some(bytes) => String::from_utf8(bytes.clone())
                    .map_err(|_| XmlEncError::InvalidData("pipeline result is not text".into()))?,
                None => return Err(XmlEncError::InvalidData("no result to write into the template".into())),
            };
            doc.set_text_content(cipher_value, &text);
            self.result_replaced = true;
        }

        if let Some(key_info) = self.key_info_node {
            let key = self.enc_key.as_ref().ok_or(XmlEncError::KeyNotFound)?;
            write_key_info(doc, key_info, key, &self.key_info_write_ctx)?;
        }
        Ok(())
    }
}
