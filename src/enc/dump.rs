//! Diagnostic dumps of a context's state, text or XML-shaped.
//!
//! Dumps observe without mutating; secret material never appears (keys
//! print their redacting `Debug` form).

use std::io::{self, Write};

use crate::transform::Operation;

use super::{EncryptionContext, EncryptionMode};

/// Output shape of [`EncryptionContext::dump`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DumpFormat {
    /// Indented plain text.
    Text,

    /// XML-shaped, one element per field.
    Xml,
}

impl EncryptionContext<'_> {
    /// Writes a diagnostic snapshot of the context.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `out`.
    pub fn dump(&self, format: DumpFormat, out: &mut dyn Write) -> io::Result<()> {
        match format {
            DumpFormat::Text => self.dump_text(out),
            DumpFormat::Xml => self.dump_xml(out),
        }
    }

    fn headline(&self) -> &'static str {
        match (self.mode, self.operation) {
            (EncryptionMode::EncryptedData, Operation::Encrypt) => "DATA ENCRYPTION CONTEXT",
            (EncryptionMode::EncryptedData, Operation::Decrypt) => "DATA DECRYPTION CONTEXT",
            (EncryptionMode::EncryptedKey, Operation::Encrypt) => "KEY ENCRYPTION CONTEXT",
            (EncryptionMode::EncryptedKey, Operation::Decrypt) => "KEY DECRYPTION CONTEXT",
        }
    }

    fn status(&self) -> &'static str {
        if self.result_replaced { "replaced" } else { "not-replaced" }
    }

    fn dump_text(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "= {}", self.headline())?;
        writeln!(out, "== Status: {}", self.status())?;
        for (label, value) in [
            ("Id", self.id.as_deref()),
            ("Type", self.data_type.as_deref()),
            ("MimeType", self.mime_type.as_deref()),
            ("Encoding", self.encoding.as_deref()),
            ("Recipient", self.recipient.as_deref()),
            ("CarriedKeyName", self.carried_key_name.as_deref()),
        ] {
            if let Some(value) = value {
                writeln!(out, "== {label}: \"{value}\"")?;
            }
        }

        writeln!(out, "== Key Requirements: {:?}", self.key_info_read_ctx.key_requirements)?;
        if let Some(key) = &self.enc_key {
            writeln!(out, "== Key: {key:?}")?;
        }

        let (head, tail) = self.pipeline.stage_names();
        let method = self.method.as_ref().map_or("(none)", |m| m.algorithm().name());
        writeln!(out, "== Pipeline: {head:?} -> {method} -> {tail:?}")?;

        match &self.result {
            Some(bytes) if self.result_base64_encoded => {
                writeln!(out, "== Result - start buffer:")?;
                out.write_all(bytes)?;
                writeln!(out, "\n== Result - end buffer")?;
            }
            Some(bytes) => writeln!(out, "== Result: {} bytes", bytes.len())?,
            None => writeln!(out, "== Result: (none)")?,
        }
        Ok(())
    }

    fn dump_xml(&self, out: &mut dyn Write) -> io::Result<()> {
        let element = match (self.mode, self.operation) {
            (EncryptionMode::EncryptedData, Operation::Encrypt) => "DataEncryptionContext",
            (EncryptionMode::EncryptedData, Operation::Decrypt) => "DataDecryptionContext",
            (EncryptionMode::EncryptedKey, Operation::Encrypt) => "KeyEncryptionContext",
            (EncryptionMode::EncryptedKey, Operation::Decrypt) => "KeyDecryptionContext",
        };
        writeln!(out, "<{element} status=\"{}\">", self.status())?;
        for (label, value) in [
            ("Id", self.id.as_deref()),
            ("Type", self.data_type.as_deref()),
            ("MimeType", self.mime_type.as_deref()),
            ("Encoding", self.encoding.as_deref()),
            ("Recipient", self.recipient.as_deref()),
            ("CarriedKeyName", self.carried_key_name.as_deref()),
        ] {
            if let Some(value) = value {
                writeln!(out, "<{label}>{value}</{label}>")?;
            }
        }

        match &self.result {
            Some(bytes) if self.result_base64_encoded => {
                write!(out, "<Result>")?;
                out.write_all(bytes)?;
                writeln!(out, "</Result>")?;
            }
            Some(bytes) => writeln!(out, "<Result size=\"{}\"/>", bytes.len())?,
            None => writeln!(out, "<Result/>")?,
        }
        writeln!(out, "</{element}>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::keys::{Key, SimpleKeysManager};
    use crate::xml::Document;

    fn encrypted_context_dump(format: DumpFormat) -> String {
        let mut manager = SimpleKeysManager::new();
        manager.add_key(Key::new_symmetric(Some("bob"), vec![0x0B; 16]));

        let template = format!(
            concat!(
                r#"<xenc:EncryptedData xmlns:xenc="{enc}" Id="d1">"#,
                r#"<xenc:EncryptionMethod Algorithm="{alg}"/>"#,
                r#"<xenc:CipherData><xenc:CipherValue/></xenc:CipherData>"#,
                r#"</xenc:EncryptedData>"#
            ),
            enc = config::XMLENC_NS,
            alg = config::HREF_AES128_CBC,
        );
        let mut doc = Document::parse(&template).unwrap();
        let root = doc.root().unwrap();
        let mut ctx = EncryptionContext::new(Some(&manager));
        ctx.binary_encrypt(&mut doc, root, b"dump me").unwrap();

        let mut buffer = Vec::new();
        ctx.dump(format, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_text_dump_shape() {
        let dump = encrypted_context_dump(DumpFormat::Text);
        assert!(dump.contains("= DATA ENCRYPTION CONTEXT"));
        assert!(dump.contains("== Status: replaced"));
        assert!(dump.contains("== Id: \"d1\""));
        assert!(dump.contains("aes128-cbc"));
        assert!(!dump.contains("0x0B"));
    }

    #[test]
    fn test_xml_dump_shape() {
        let dump = encrypted_context_dump(DumpFormat::Xml);
        assert!(dump.starts_with("<DataEncryptionContext status=\"replaced\">"));
        assert!(dump.contains("<Id>d1</Id>"));
        assert!(dump.trim_end().ends_with("</DataEncryptionContext>"));
    }
}
