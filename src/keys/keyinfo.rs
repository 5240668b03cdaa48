//! `KeyInfo` reading and writing.
//!
//! The reader walks a dsig `KeyInfo` element in document order and returns
//! the first key that satisfies the context's requirements, consulting the
//! key store for `KeyName` hints and the X.509 store for certificate
//! material. Children whose origin is not allowed by the context, and
//! children the engine does not understand, are skipped with a note rather
//! than failing the walk.
//!
//! The writer fills the placeholder children an existing `KeyInfo` element
//! carries (`KeyName`, `KeyValue`, `X509Data`); it never invents structure
//! the template did not ask for.

use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use tracing::{debug, warn};

use super::{Key, KeyOriginMask, KeyRequirements, KeyStore, KeyTypeMask, KeyValue, X509FindCriteria, X509Store};
use crate::config;
use crate::error::{Result, XmlEncError};
use crate::keys::CertificateData;
use crate::transform::base64_decode_tolerant;
use crate::transform::base64_encode;
use crate::xml::{Document, NodeId};

/// Whether a context reads keys out of `KeyInfo` or writes them into it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyInfoMode {
    Read,
    Write,
}

/// Gate for private material during `KeyValue` serialisation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyValueSerialization {
    /// Emit public halves only.
    PublicOnly,

    /// Emit private RSA components as well.
    WithPrivate,
}

/// Side-channel passed to the `KeyInfo` reader and writer: direction, the
/// key requirements to satisfy, the acceptable origins, and the
/// serialisation policy for private material.
#[derive(Clone, Debug)]
pub struct KeyInfoContext {
    pub mode: KeyInfoMode,
    pub key_requirements: KeyRequirements,
    pub allowed_origins: KeyOriginMask,
    pub key_value_serialization: KeyValueSerialization,
}

impl KeyInfoContext {
    /// A read context accepting every origin and any key.
    #[must_use]
    pub fn read() -> Self {
        Self {
            mode: KeyInfoMode::Read,
            key_requirements: KeyRequirements::default(),
            allowed_origins: KeyOriginMask::ALL,
            key_value_serialization: KeyValueSerialization::PublicOnly,
        }
    }

    /// A write context restricted to public material. This is the shape an
    /// encryption context forces on its write side.
    #[must_use]
    pub fn write() -> Self {
        Self {
            mode: KeyInfoMode::Write,
            key_requirements: KeyRequirements { key_type: KeyTypeMask::PUBLIC, ..KeyRequirements::default() },
            allowed_origins: KeyOriginMask::ALL,
            key_value_serialization: KeyValueSerialization::PublicOnly,
        }
    }

    /// A write context that may emit secret material, used by keys-document
    /// persistence where serialising symmetric bytes is the point.
    #[must_use]
    pub fn write_unrestricted(serialization: KeyValueSerialization) -> Self {
        Self {
            mode: KeyInfoMode::Write,
            key_requirements: KeyRequirements::default(),
            allowed_origins: KeyOriginMask::ALL,
            key_value_serialization: serialization,
        }
    }
}

/// Walks `KeyInfo` children in document order and returns the first key that
/// satisfies `ctx.key_requirements`, or `None` when nothing resolves.
///
/// # Errors
///
/// Malformed child content (bad base64, broken RSA components, unparsable
/// certificates) is an error; a child that simply resolves nothing is not.
pub fn read_key_info(
    doc: &Document,
    node: NodeId,
    store: &KeyStore,
    x509: Option<&X509Store>,
    ctx: &KeyInfoContext,
) -> Result<Option<Key>> {
    let mut recorded_name: Option<String> = None;
    let mut cursor = doc.first_element_child(node);

    while let Some(current) = cursor {
        if doc.is_named(current, config::NODE_KEY_NAME, config::DSIG_NS) {
            if ctx.allowed_origins.intersects(KeyOriginMask::KEY_NAME) {
                let name = doc.text_content(current);
                if !name.is_empty() {
                    if let Some(mut key) = store.find(Some(&name), &ctx.key_requirements) {
                        key.add_origin(KeyOriginMask::KEY_NAME | KeyOriginMask::KEY_MANAGER);
                        debug!(name, "key resolved by name");
                        return Ok(Some(key));
                    }
                    recorded_name = Some(name);
                }
            } else {
                warn!("KeyName origin not allowed, skipping");
            }
        } else if doc.is_named(current, config::NODE_KEY_VALUE, config::DSIG_NS) {
            if ctx.allowed_origins.intersects(KeyOriginMask::KEY_VALUE) {
                if let Some(mut key) = read_key_value(doc, current)? {
                    key.set_name(recorded_name.as_deref());
                    key.add_origin(KeyOriginMask::KEY_VALUE);
                    if recorded_name.is_some() {
                        key.add_origin(KeyOriginMask::KEY_NAME);
                    }
                    if key.matches(None, &ctx.key_requirements) {
                        debug!("key resolved from inline value");
                        return Ok(Some(key));
                    }
                    debug!("inline key value does not satisfy the requirements");
                }
            } else {
                warn!("KeyValue origin not allowed, skipping");
            }
        } else if doc.is_named(current, config::NODE_X509_DATA, config::DSIG_NS) {
            if !ctx.allowed_origins.intersects(KeyOriginMask::X509) {
                warn!("X509 origin not allowed, skipping");
            } else if let Some(x509) = x509 {
                if let Some(mut key) = read_x509_data(doc, current, x509)? {
                    key.set_name(recorded_name.as_deref());
                    if key.matches(None, &ctx.key_requirements) {
                        debug!("key resolved from X509Data");
                        return Ok(Some(key));
                    }
                    debug!("X509 key does not satisfy the requirements");
                }
            } else {
                warn!("no X509 store available for X509Data");
            }
        } else if doc.is_named(current, config::NODE_RETRIEVAL_METHOD, config::DSIG_NS) {
            warn!("RetrievalMethod dereferencing is not supported, skipping");
        } else {
            warn!(node = %doc.name_of(current), "unrecognised KeyInfo child skipped");
        }
        cursor = doc.next_element_sibling(current);
    }

    Ok(None)
}

fn read_key_value(doc: &Document, node: NodeId) -> Result<Option<Key>> {
    let mut cursor = doc.first_element_child(node);
    while let Some(current) = cursor {
        if doc.is_named(current, config::NODE_AES_KEY_VALUE, config::XMLSEC_NS) {
            let bytes = decode_node_base64(doc, current)?;
            return Ok(Some(Key::new_symmetric(None, bytes)));
        }
        if doc.is_named(current, config::NODE_RSA_KEY_VALUE, config::DSIG_NS) {
            return read_rsa_key_value(doc, current).map(Some);
        }
        warn!(node = %doc.name_of(current), "unrecognised KeyValue payload skipped");
        cursor = doc.next_element_sibling(current);
    }
    Ok(None)
}

fn read_rsa_key_value(doc: &Document, node: NodeId) -> Result<Key> {
    let modulus_node = find_child(doc, node, config::NODE_RSA_MODULUS, config::DSIG_NS)
        .ok_or_else(|| XmlEncError::InvalidNode {
            expected: config::NODE_RSA_MODULUS.to_owned(),
            found: doc.name_of(node),
        })?;
    let exponent_node = find_child(doc, node, config::NODE_RSA_EXPONENT, config::DSIG_NS)
        .ok_or_else(|| XmlEncError::InvalidNode {
            expected: config::NODE_RSA_EXPONENT.to_owned(),
            found: doc.name_of(node),
        })?;

    let modulus = BigUint::from_bytes_be(&decode_node_base64(doc, modulus_node)?);
    let exponent = BigUint::from_bytes_be(&decode_node_base64(doc, exponent_node)?);
    let public = RsaPublicKey::new(modulus.clone(), exponent.clone())
        .map_err(|e| XmlEncError::crypto("rsa-key-value", e.to_string()))?;

    let private = match find_child(doc, node, config::NODE_RSA_PRIVATE_EXPONENT, config::DSIG_NS) {
        Some(private_node) => {
            let d = BigUint::from_bytes_be(&decode_node_base64(doc, private_node)?);
            Some(
                RsaPrivateKey::from_components(modulus, exponent, d, Vec::new())
                    .map_err(|e| XmlEncError::crypto("rsa-key-value", e.to_string()))?,
            )
        }
        None => None,
    };

    Ok(Key::new_rsa(None, public, private))
}

fn read_x509_data(doc: &Document, node: NodeId, x509: &X509Store) -> Result<Option<Key>> {
    let mut inline: Vec<CertificateData> = Vec::new();
    let mut looked_up: Option<CertificateData> = None;

    let mut cursor = doc.first_element_child(node);
    while let Some(current) = cursor {
        if doc.is_named(current, config::NODE_X509_CERTIFICATE, config::DSIG_NS) {
            inline.push(CertificateData::from_der(decode_node_base64(doc, current)?)?);
        } else if doc.is_named(current, config::NODE_X509_SUBJECT_NAME, config::DSIG_NS) {
            let subject = doc.text_content(current);
            looked_up = looked_up
                .or_else(|| x509.find(&X509FindCriteria { subject: Some(&subject), ..Default::default() }).cloned());
        } else if doc.is_named(current, config::NODE_X509_ISSUER_SERIAL, config::DSIG_NS) {
            let issuer = find_child(doc, current, config::NODE_X509_ISSUER_NAME, config::DSIG_NS)
                .map(|n| doc.text_content(n));
            let serial = find_child(doc, current, config::NODE_X509_SERIAL_NUMBER, config::DSIG_NS)
                .map(|n| doc.text_content(n));
            looked_up = looked_up.or_else(|| {
                x509.find(&X509FindCriteria {
                    issuer: issuer.as_deref(),
                    serial: serial.as_deref(),
                    ..Default::default()
                })
                .cloned()
            });
        } else if doc.is_named(current, config::NODE_X509_SKI, config::DSIG_NS) {
            let ski = decode_node_base64(doc, current)?;
            looked_up =
                looked_up.or_else(|| x509.find(&X509FindCriteria { ski: Some(&ski), ..Default::default() }).cloned());
        } else {
            warn!(node = %doc.name_of(current), "unrecognised X509Data child skipped");
        }
        cursor = doc.next_element_sibling(current);
    }

    if let Some(cert) = looked_up {
        if x509.verify(&cert)? {
            return cert.public_key().map(Some);
        }
        warn!("certificate found by reference is not trusted");
        return Ok(None);
    }
    if let Some((leaf, rest)) = inline.split_first() {
        if x509.verify_with(leaf, rest)? {
            return leaf.public_key().map(Some);
        }
        warn!("inline certificate chain is not trusted");
        return Ok(None);
    }
    Ok(None)
}

/// Fills the placeholder children of an existing `KeyInfo` element from
/// `key`: `KeyName` gets the name, `KeyValue` the material permitted by the
/// context, `X509Data` the attached certificates. Children the template did
/// not include are not created.
///
/// # Errors
///
/// Propagates serialisation failures from the DOM layer.
pub fn write_key_info(doc: &mut Document, node: NodeId, key: &Key, ctx: &KeyInfoContext) -> Result<()> {
    let mut cursor = doc.first_element_child(node);
    while let Some(current) = cursor {
        cursor = doc.next_element_sibling(current);

        if doc.is_named(current, config::NODE_KEY_NAME, config::DSIG_NS) {
            if let Some(name) = key.name() {
                doc.set_text_content(current, name);
            }
        } else if doc.is_named(current, config::NODE_KEY_VALUE, config::DSIG_NS) {
            write_key_value(doc, current, key, ctx);
        } else if doc.is_named(current, config::NODE_X509_DATA, config::DSIG_NS) {
            write_x509_data(doc, current, key);
        } else {
            debug!(node = %doc.name_of(current), "KeyInfo child left untouched");
        }
    }
    Ok(())
}

fn write_key_value(doc: &mut Document, node: NodeId, key: &Key, ctx: &KeyInfoContext) {
    match key.value() {
        KeyValue::Symmetric(bytes) => {
            if !ctx.key_requirements.key_type.contains(KeyTypeMask::SYMMETRIC) {
                debug!("context forbids symmetric material, KeyValue left empty");
                return;
            }
            doc.clear_children(node);
            let payload = doc.add_element_child(node, config::NODE_AES_KEY_VALUE, config::XMLSEC_NS);
            doc.set_text_content(payload, &base64_encode(bytes.expose()));
        }
        KeyValue::Rsa { public, private } => {
            doc.clear_children(node);
            let payload = doc.add_element_child(node, config::NODE_RSA_KEY_VALUE, config::DSIG_NS);
            let modulus = doc.add_element_child(payload, config::NODE_RSA_MODULUS, config::DSIG_NS);
            doc.set_text_content(modulus, &base64_encode(&public.n().to_bytes_be()));
            let exponent = doc.add_element_child(payload, config::NODE_RSA_EXPONENT, config::DSIG_NS);
            doc.set_text_content(exponent, &base64_encode(&public.e().to_bytes_be()));

            if let Some(private) = private {
                if ctx.key_value_serialization == KeyValueSerialization::WithPrivate
                    && ctx.key_requirements.key_type.contains(KeyTypeMask::PRIVATE)
                {
                    let d = doc.add_element_child(payload, config::NODE_RSA_PRIVATE_EXPONENT, config::DSIG_NS);
                    doc.set_text_content(d, &base64_encode(&private.d().to_bytes_be()));
                }
            }
        }
    }
}

fn write_x509_data(doc: &mut Document, node: NodeId, key: &Key) {
    if key.certificates().is_empty() {
        return;
    }
    doc.clear_children(node);
    for der in key.certificates() {
        let cert = doc.add_element_child(node, config::NODE_X509_CERTIFICATE, config::DSIG_NS);
        doc.set_text_content(cert, &base64_encode(der));
    }
}

fn find_child(doc: &Document, node: NodeId, local_name: &str, namespace: &str) -> Option<NodeId> {
    let mut cursor = doc.first_element_child(node);
    while let Some(current) = cursor {
        if doc.is_named(current, local_name, namespace) {
            return Some(current);
        }
        cursor = doc.next_element_sibling(current);
    }
    None
}

fn decode_node_base64(doc: &Document, node: NodeId) -> Result<Vec<u8>> {
    base64_decode_tolerant(doc.text_content(node).as_bytes())
        .map_err(|_| XmlEncError::InvalidNodeContent { node: doc.name_of(node) })
}
