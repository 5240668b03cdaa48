//! Wire-format identifiers and engine defaults.
//!
//! This module defines the core constants used throughout the engine, including:
//! - XML namespaces and element/attribute names from W3C XML Encryption
//! - Algorithm identifier URIs for the supported cipher set
//! - `Type` attribute values that govern substitution behaviour
//! - Default configuration values
//!
//! These constants ensure consistency across the codebase and serve as the single
//! source of truth for the on-the-wire vocabulary.

/// The XML Encryption 1.0 namespace.
pub const XMLENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";

/// The XML Encryption 1.1 namespace (GCM algorithm identifiers).
pub const XMLENC11_NS: &str = "http://www.w3.org/2009/xmlenc11#";

/// The XML Digital Signature namespace (`KeyInfo` and its children).
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// The xmlsec project namespace used by the `Keys` persistence document.
pub const XMLSEC_NS: &str = "http://www.aleksey.com/xmlsec/2002";

/// Root element for encrypted application data.
pub const NODE_ENCRYPTED_DATA: &str = "EncryptedData";

/// Root element for an encrypted key.
pub const NODE_ENCRYPTED_KEY: &str = "EncryptedKey";

/// First optional child of the root: names the cipher algorithm.
pub const NODE_ENCRYPTION_METHOD: &str = "EncryptionMethod";

/// Key hint element, in the xmldsig namespace.
pub const NODE_KEY_INFO: &str = "KeyInfo";

/// Required child carrying either inline or referenced ciphertext.
pub const NODE_CIPHER_DATA: &str = "CipherData";

/// Inline base64 ciphertext.
pub const NODE_CIPHER_VALUE: &str = "CipherValue";

/// Reference to external ciphertext.
pub const NODE_CIPHER_REFERENCE: &str = "CipherReference";

/// Transform list inside a `CipherReference`.
pub const NODE_TRANSFORMS: &str = "Transforms";

/// A single transform inside `Transforms`, in the xmldsig namespace.
pub const NODE_TRANSFORM: &str = "Transform";

/// Optional, positionally parsed and ignored.
pub const NODE_ENCRYPTION_PROPERTIES: &str = "EncryptionProperties";

/// `EncryptedKey` only; positionally parsed and ignored.
pub const NODE_REFERENCE_LIST: &str = "ReferenceList";

/// `EncryptedKey` only; name to associate with the carried key.
pub const NODE_CARRIED_KEY_NAME: &str = "CarriedKeyName";

/// Root element of the keys manager persistence document.
pub const NODE_KEYS: &str = "Keys";

/// `KeyInfo` children understood by the key reader/writer.
pub const NODE_KEY_NAME: &str = "KeyName";
pub const NODE_KEY_VALUE: &str = "KeyValue";
pub const NODE_X509_DATA: &str = "X509Data";
pub const NODE_X509_CERTIFICATE: &str = "X509Certificate";
pub const NODE_X509_SUBJECT_NAME: &str = "X509SubjectName";
pub const NODE_X509_ISSUER_SERIAL: &str = "X509IssuerSerial";
pub const NODE_X509_ISSUER_NAME: &str = "X509IssuerName";
pub const NODE_X509_SERIAL_NUMBER: &str = "X509SerialNumber";
pub const NODE_X509_SKI: &str = "X509SKI";
pub const NODE_RETRIEVAL_METHOD: &str = "RetrievalMethod";

/// `KeyValue` payload elements. `RSAKeyValue` follows xmldsig; the symmetric
/// payload uses the xmlsec namespace.
pub const NODE_RSA_KEY_VALUE: &str = "RSAKeyValue";
pub const NODE_RSA_MODULUS: &str = "Modulus";
pub const NODE_RSA_EXPONENT: &str = "Exponent";
pub const NODE_RSA_PRIVATE_EXPONENT: &str = "PrivateExponent";
pub const NODE_AES_KEY_VALUE: &str = "AESKeyValue";

/// Attributes read from `EncryptedData`/`EncryptedKey` roots.
pub const ATTR_ID: &str = "Id";
pub const ATTR_TYPE: &str = "Type";
pub const ATTR_MIME_TYPE: &str = "MimeType";
pub const ATTR_ENCODING: &str = "Encoding";
pub const ATTR_RECIPIENT: &str = "Recipient";
pub const ATTR_URI: &str = "URI";
pub const ATTR_ALGORITHM: &str = "Algorithm";

/// `Type` value requesting whole-element substitution.
pub const TYPE_ELEMENT: &str = "http://www.w3.org/2001/04/xmlenc#Element";

/// `Type` value requesting element-content substitution.
pub const TYPE_CONTENT: &str = "http://www.w3.org/2001/04/xmlenc#Content";

/// Block cipher algorithm identifiers (XML Encryption 1.0).
pub const HREF_AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const HREF_AES192_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes192-cbc";
pub const HREF_AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";

/// AEAD algorithm identifiers (XML Encryption 1.1).
pub const HREF_AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
pub const HREF_AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

/// Symmetric key wrap identifiers (RFC 3394 wrapping).
pub const HREF_KW_AES128: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes128";
pub const HREF_KW_AES256: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes256";

/// RSA key transport identifiers.
pub const HREF_RSA_1_5: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
pub const HREF_RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";

/// The base64 transform identifier, from xmldsig.
pub const HREF_BASE64: &str = "http://www.w3.org/2000/09/xmldsig#base64";

/// ID attributes registered on a document before processing an
/// `EncryptedData`/`EncryptedKey` subtree. The XML Encryption ID attribute
/// is `Id`.
pub const ENC_ID_ATTRIBUTES: &[&str] = &["Id"];

/// Initial capacity of a key store's backing vector.
///
/// Growth beyond this doubles the capacity each time, so appends stay
/// amortised O(1).
pub const KEY_STORE_INITIAL_CAPACITY: usize = 16;

/// AES block size in bytes; CBC initialisation vectors have this length.
pub const AES_BLOCK_SIZE: usize = 16;

/// Size of the nonce for AES-GCM in bytes.
///
/// Standard 12 bytes (96 bits) as recommended by NIST SP 800-38D and
/// required by the XML Encryption 1.1 GCM algorithms.
pub const GCM_NONCE_SIZE: usize = 12;
