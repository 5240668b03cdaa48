//! X.509 trust store: trusted and intermediate certificate pools, lookup by
//! identity, and chain verification.
//!
//! Certificates are held as owned DER and re-parsed on demand, since the
//! parser borrows from the encoded bytes. Verification walks issuer links
//! through the intermediate pool until it reaches a trusted anchor, checking
//! every signature on the way; `Ok(true)` means trusted, `Ok(false)` not
//! trusted, and `Err` that the input could not be processed.

use std::fs;
use std::path::Path;

use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ParsedExtension;
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey as ParsedPublicKey;

use super::{Key, KeyOriginMask};
use crate::error::{Result, XmlEncError};

/// Upper bound on issuer-chain walks; beyond this the chain is rejected.
const MAX_CHAIN_DEPTH: usize = 16;

fn x509_error(message: impl std::fmt::Display) -> XmlEncError {
    XmlEncError::crypto("x509", message.to_string())
}

/// One certificate, owned DER.
#[derive(Clone)]
pub struct CertificateData {
    der: Vec<u8>,
}

impl CertificateData {
    /// Wraps DER bytes, validating that they parse as a certificate.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Crypto`] when the bytes are not a certificate.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let data = Self { der };
        data.parse()?;
        Ok(data)
    }

    /// The encoded certificate.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    fn parse(&self) -> Result<X509Certificate<'_>> {
        let (_, cert) = X509Certificate::from_der(&self.der).map_err(x509_error)?;
        Ok(cert)
    }

    /// Subject distinguished name, rendered.
    pub fn subject(&self) -> Result<String> {
        Ok(self.parse()?.subject().to_string())
    }

    /// Issuer distinguished name, rendered.
    pub fn issuer(&self) -> Result<String> {
        Ok(self.parse()?.issuer().to_string())
    }

    /// Serial number in decimal, the form `X509SerialNumber` carries.
    pub fn serial(&self) -> Result<String> {
        Ok(self.parse()?.tbs_certificate.serial.to_string())
    }

    /// Serial number as lowercase hex, for diagnostics.
    pub fn serial_hex(&self) -> Result<String> {
        Ok(hex::encode(self.parse()?.raw_serial()))
    }

    /// Subject key identifier extension, when present.
    pub fn ski(&self) -> Result<Option<Vec<u8>>> {
        let cert = self.parse()?;
        for extension in cert.extensions() {
            if let ParsedExtension::SubjectKeyIdentifier(identifier) = extension.parsed_extension() {
                return Ok(Some(identifier.0.to_vec()));
            }
        }
        Ok(None)
    }

    /// Extracts the subject public key as an engine [`Key`] with this
    /// certificate attached. Only RSA subject keys can become engine keys.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Crypto`] for non-RSA or malformed key material.
    pub fn public_key(&self) -> Result<Key> {
        let cert = self.parse()?;
        let parsed = cert.public_key().parsed().map_err(x509_error)?;
        match parsed {
            ParsedPublicKey::RSA(material) => {
                let modulus = rsa::BigUint::from_bytes_be(material.modulus);
                let exponent = rsa::BigUint::from_bytes_be(material.exponent);
                let public = rsa::RsaPublicKey::new(modulus, exponent).map_err(x509_error)?;
                let mut key = Key::new_rsa(None, public, None);
                key.add_certificate(self.der.clone());
                key.add_origin(KeyOriginMask::X509);
                Ok(key)
            }
            _ => Err(x509_error("certificate subject key is not RSA")),
        }
    }
}

impl std::fmt::Debug for CertificateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CertificateData({} DER bytes)", self.der.len())
    }
}

/// Search criteria for [`X509Store::find`]; every supplied field must match.
#[derive(Default, Clone, Copy)]
pub struct X509FindCriteria<'a> {
    pub subject: Option<&'a str>,
    pub issuer: Option<&'a str>,
    pub serial: Option<&'a str>,
    pub ski: Option<&'a [u8]>,
}

impl X509FindCriteria<'_> {
    fn is_empty(&self) -> bool {
        self.subject.is_none() && self.issuer.is_none() && self.serial.is_none() && self.ski.is_none()
    }
}

enum ChainStep {
    Trusted,
    NotTrusted,
    Next(CertificateData),
}

/// Trusted and intermediate certificate pools plus verification flags.
pub struct X509Store {
    trusted: Vec<CertificateData>,
    untrusted: Vec<CertificateData>,
    flags: u32,
}

impl Default for X509Store {
    fn default() -> Self {
        Self::new()
    }
}

impl X509Store {
    /// Skip certificate validity-period checks during verification.
    pub const SKIP_TIME_CHECKS: u32 = 1;

    /// Creates an empty store with no flags set.
    #[must_use]
    pub fn new() -> Self {
        Self { trusted: Vec::new(), untrusted: Vec::new(), flags: 0 }
    }

    /// Adds one DER certificate to the trusted or intermediate pool.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Crypto`] when the bytes do not parse.
    pub fn add_cert_der(&mut self, der: Vec<u8>, trusted: bool) -> Result<()> {
        let cert = CertificateData::from_der(der)?;
        if trusted {
            self.trusted.push(cert);
        } else {
            self.untrusted.push(cert);
        }
        Ok(())
    }

    /// Loads every PEM certificate block in `path` into one pool.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Io`] on read failure, [`XmlEncError::Crypto`]
    /// when the file holds no usable certificate.
    pub fn load_pem_cert(&mut self, path: &Path, trusted: bool) -> Result<usize> {
        let bytes = fs::read(path)?;
        let mut loaded = 0;
        for block in Pem::iter_from_buffer(&bytes) {
            let block = block.map_err(x509_error)?;
            if block.label == "CERTIFICATE" {
                self.add_cert_der(block.contents.clone(), trusted)?;
                loaded += 1;
            }
        }
        if loaded == 0 {
            return Err(x509_error(format!("no certificate in '{}'", path.display())));
        }
        debug!(path = %path.display(), loaded, trusted, "loaded pem certificates");
        Ok(loaded)
    }

    /// Loads every readable PEM certificate under `path` as trusted.
    /// Unreadable or non-certificate files are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Io`] when the directory cannot be listed.
    pub fn add_certs_dir(&mut self, path: &Path) -> Result<usize> {
        let mut loaded = 0;
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && self.load_pem_cert(&entry.path(), true).is_ok() {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// First certificate matching every supplied criterion, trusted pool
    /// first. Returns `None` when no criterion is supplied at all.
    #[must_use]
    pub fn find(&self, criteria: &X509FindCriteria<'_>) -> Option<&CertificateData> {
        if criteria.is_empty() {
            return None;
        }
        self.trusted
            .iter()
            .chain(&self.untrusted)
            .find(|cert| Self::matches(cert, criteria))
    }

    fn matches(cert: &CertificateData, criteria: &X509FindCriteria<'_>) -> bool {
        if let Some(subject) = criteria.subject {
            if !cert.subject().is_ok_and(|s| s == subject) {
                return false;
            }
        }
        if let Some(issuer) = criteria.issuer {
            if !cert.issuer().is_ok_and(|s| s == issuer) {
                return false;
            }
        }
        if let Some(serial) = criteria.serial {
            if !cert.serial().is_ok_and(|s| s == serial) {
                return false;
            }
        }
        if let Some(ski) = criteria.ski {
            if !cert.ski().is_ok_and(|s| s.as_deref() == Some(ski)) {
                return false;
            }
        }
        true
    }

    /// Verifies `certificate` against the store's pools.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Crypto`] when the certificate cannot be parsed.
    pub fn verify(&self, certificate: &CertificateData) -> Result<bool> {
        self.verify_with(certificate, &[])
    }

    /// Verifies with additional candidate issuers (e.g. the rest of an
    /// `X509Data` chain) treated as intermediates.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Crypto`] when the certificate cannot be parsed.
    pub fn verify_with(&self, certificate: &CertificateData, extra: &[CertificateData]) -> Result<bool> {
        let mut current = certificate.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            match self.chain_step(&current, extra)? {
                ChainStep::Trusted => return Ok(true),
                ChainStep::NotTrusted => return Ok(false),
                ChainStep::Next(next) => current = next,
            }
        }
        debug!("certificate chain exceeded maximum depth");
        Ok(false)
    }

    fn chain_step(&self, current: &CertificateData, extra: &[CertificateData]) -> Result<ChainStep> {
        let cert = current.parse()?;
        if !self.validity_ok(&cert) {
            return Ok(ChainStep::NotTrusted);
        }
        if self.trusted.iter().any(|anchor| anchor.der == current.der) {
            return Ok(ChainStep::Trusted);
        }

        let issuer = cert.issuer().to_string();
        for anchor in &self.trusted {
            let anchor_cert = anchor.parse()?;
            if anchor_cert.subject().to_string() == issuer
                && cert.verify_signature(Some(anchor_cert.public_key())).is_ok()
            {
                if !self.validity_ok(&anchor_cert) {
                    return Ok(ChainStep::NotTrusted);
                }
                return Ok(ChainStep::Trusted);
            }
        }

        for candidate in self.untrusted.iter().chain(extra) {
            if candidate.der == current.der {
                continue;
            }
            let candidate_cert = candidate.parse()?;
            if candidate_cert.subject().to_string() == issuer
                && cert.verify_signature(Some(candidate_cert.public_key())).is_ok()
            {
                return Ok(ChainStep::Next(candidate.clone()));
            }
        }
        Ok(ChainStep::NotTrusted)
    }

    fn validity_ok(&self, cert: &X509Certificate<'_>) -> bool {
        self.flags & Self::SKIP_TIME_CHECKS != 0 || cert.validity().is_valid()
    }

    /// Replaces the verification flags.
    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// Current verification flags.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Pool sizes `(trusted, untrusted)`, for diagnostics.
    #[must_use]
    pub fn pool_sizes(&self) -> (usize, usize) {
        (self.trusted.len(), self.untrusted.len())
    }
}
