//! The encryption-method transform: the cipher stage sitting in the middle
//! of every pipeline.
//!
//! Ciphertext layouts follow XML Encryption: CBC and GCM prepend the fresh
//! random IV to the ciphertext, GCM appends its tag, key wrap and RSA
//! transport carry no framing of their own. CBC decryption strips padding by
//! the trailing count byte without inspecting the filler, since XML-Enc
//! permits arbitrary filler bytes.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit, Nonce};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use aes_kw::Kek;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::{Oaep, Pkcs1v15Encrypt};
use sha1::Sha1;

use super::{Operation, Transform};
use crate::config::{self, AES_BLOCK_SIZE, GCM_NONCE_SIZE};
use crate::error::{Result, XmlEncError};
use crate::keys::{Key, KeyAlgorithm, KeyRequirements, KeyTypeMask, KeyValue};
use crate::xml::{Document, NodeId};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// The cipher algorithms the engine can resolve from an
/// `EncryptionMethod/@Algorithm` identifier.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EncryptionAlgorithm {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes256Gcm,
    KwAes128,
    KwAes256,
    Rsa15,
    RsaOaepMgf1p,
}

impl EncryptionAlgorithm {
    /// Resolves a W3C algorithm identifier, `None` when unsupported.
    #[must_use]
    pub fn from_href(href: &str) -> Option<Self> {
        match href {
            config::HREF_AES128_CBC => Some(Self::Aes128Cbc),
            config::HREF_AES192_CBC => Some(Self::Aes192Cbc),
            config::HREF_AES256_CBC => Some(Self::Aes256Cbc),
            config::HREF_AES128_GCM => Some(Self::Aes128Gcm),
            config::HREF_AES256_GCM => Some(Self::Aes256Gcm),
            config::HREF_KW_AES128 => Some(Self::KwAes128),
            config::HREF_KW_AES256 => Some(Self::KwAes256),
            config::HREF_RSA_1_5 => Some(Self::Rsa15),
            config::HREF_RSA_OAEP_MGF1P => Some(Self::RsaOaepMgf1p),
            _ => None,
        }
    }

    /// The W3C algorithm identifier.
    #[must_use]
    pub fn href(self) -> &'static str {
        match self {
            Self::Aes128Cbc => config::HREF_AES128_CBC,
            Self::Aes192Cbc => config::HREF_AES192_CBC,
            Self::Aes256Cbc => config::HREF_AES256_CBC,
            Self::Aes128Gcm => config::HREF_AES128_GCM,
            Self::Aes256Gcm => config::HREF_AES256_GCM,
            Self::KwAes128 => config::HREF_KW_AES128,
            Self::KwAes256 => config::HREF_KW_AES256,
            Self::Rsa15 => config::HREF_RSA_1_5,
            Self::RsaOaepMgf1p => config::HREF_RSA_OAEP_MGF1P,
        }
    }

    /// Short name used in diagnostics and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Aes128Cbc => "aes128-cbc",
            Self::Aes192Cbc => "aes192-cbc",
            Self::Aes256Cbc => "aes256-cbc",
            Self::Aes128Gcm => "aes128-gcm",
            Self::Aes256Gcm => "aes256-gcm",
            Self::KwAes128 => "kw-aes128",
            Self::KwAes256 => "kw-aes256",
            Self::Rsa15 => "rsa-1_5",
            Self::RsaOaepMgf1p => "rsa-oaep-mgf1p",
        }
    }

    fn key_algorithm(self) -> KeyAlgorithm {
        match self {
            Self::Rsa15 | Self::RsaOaepMgf1p => KeyAlgorithm::Rsa,
            _ => KeyAlgorithm::Aes,
        }
    }

    fn key_bits(self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes128Gcm | Self::KwAes128 => 128,
            Self::Aes192Cbc => 192,
            Self::Aes256Cbc | Self::Aes256Gcm | Self::KwAes256 => 256,
            Self::Rsa15 | Self::RsaOaepMgf1p => 0,
        }
    }
}

/// The encryption-method stage. Direction and key are assigned by the
/// owning context after template parsing; `execute` then runs the cipher in
/// the configured direction.
pub struct CipherTransform {
    algorithm: EncryptionAlgorithm,
    operation: Operation,
    key: Option<Key>,
}

impl CipherTransform {
    /// Creates the transform for an algorithm; direction defaults to
    /// decrypt until the context decides.
    #[must_use]
    pub fn new(algorithm: EncryptionAlgorithm) -> Self {
        Self { algorithm, operation: Operation::Decrypt, key: None }
    }

    /// Reads an `EncryptionMethod` element into a transform.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidData`] when the `Algorithm` attribute
    /// is missing or names an unsupported algorithm.
    pub fn from_method_node(doc: &Document, node: NodeId) -> Result<Self> {
        let href = doc
            .attribute(node, config::ATTR_ALGORITHM)
            .ok_or_else(|| XmlEncError::InvalidData("EncryptionMethod has no Algorithm attribute".into()))?;
        let algorithm = EncryptionAlgorithm::from_href(href)
            .ok_or_else(|| XmlEncError::InvalidData(format!("unsupported encryption algorithm '{href}'")))?;
        Ok(Self::new(algorithm))
    }

    /// The algorithm this stage runs.
    #[must_use]
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    /// The configured direction.
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Sets the direction; this changes the key requirements for RSA.
    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    /// What the stage demands of its key: symmetric material of the exact
    /// size for AES, the public half on encrypt and the private half on
    /// decrypt for RSA.
    #[must_use]
    pub fn key_requirements(&self) -> KeyRequirements {
        match self.algorithm.key_algorithm() {
            KeyAlgorithm::Aes => KeyRequirements {
                algorithm: Some(KeyAlgorithm::Aes),
                key_type: KeyTypeMask::SYMMETRIC,
                bits: self.algorithm.key_bits(),
            },
            KeyAlgorithm::Rsa => KeyRequirements {
                algorithm: Some(KeyAlgorithm::Rsa),
                key_type: match self.operation {
                    Operation::Encrypt => KeyTypeMask::PUBLIC,
                    Operation::Decrypt => KeyTypeMask::PRIVATE,
                },
                bits: 0,
            },
        }
    }

    /// Installs the key after checking it against [`Self::key_requirements`].
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::KeyNotFound`] on a requirement mismatch.
    pub fn set_key(&mut self, key: Key) -> Result<()> {
        if !key.matches(None, &self.key_requirements()) {
            return Err(XmlEncError::KeyNotFound);
        }
        self.key = Some(key);
        Ok(())
    }

    /// True once a key is installed.
    #[must_use]
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    fn symmetric_key(&self) -> std::result::Result<&[u8], String> {
        match self.key.as_ref().map(Key::value) {
            Some(KeyValue::Symmetric(bytes)) => Ok(bytes.expose()),
            Some(KeyValue::Rsa { .. }) => Err("transform requires symmetric key material".into()),
            None => Err("no key assigned to the transform".into()),
        }
    }

    fn cbc<E, D>(&self, input: &[u8]) -> std::result::Result<Vec<u8>, String>
    where
        E: KeyIvInit + BlockEncryptMut,
        D: KeyIvInit + BlockDecryptMut,
    {
        let key = self.symmetric_key()?;
        match self.operation {
            Operation::Encrypt => {
                let mut iv = [0u8; AES_BLOCK_SIZE];
                OsRng.fill_bytes(&mut iv);
                let cipher = E::new_from_slices(key, &iv).map_err(|e| e.to_string())?;
                let mut out = iv.to_vec();
                out.extend_from_slice(&cipher.encrypt_padded_vec_mut::<Pkcs7>(input));
                Ok(out)
            }
            Operation::Decrypt => {
                if input.len() < 2 * AES_BLOCK_SIZE || input.len() % AES_BLOCK_SIZE != 0 {
                    return Err(format!("ciphertext length {} is not valid for cbc", input.len()));
                }
                let (iv, body) = input.split_at(AES_BLOCK_SIZE);
                let cipher = D::new_from_slices(key, iv).map_err(|e| e.to_string())?;
                let mut plain =
                    cipher.decrypt_padded_vec_mut::<NoPadding>(body).map_err(|e| e.to_string())?;
                // XML-Enc padding: the last byte is the count, filler is arbitrary.
                let pad = usize::from(*plain.last().ok_or_else(|| "empty plaintext".to_owned())?);
                if pad == 0 || pad > AES_BLOCK_SIZE || pad > plain.len() {
                    return Err("invalid block padding".into());
                }
                plain.truncate(plain.len() - pad);
                Ok(plain)
            }
        }
    }

    fn gcm<A>(&self, input: &[u8]) -> std::result::Result<Vec<u8>, String>
    where
        A: Aead + KeyInit,
    {
        let key = self.symmetric_key()?;
        let cipher = A::new_from_slice(key).map_err(|e| e.to_string())?;
        match self.operation {
            Operation::Encrypt => {
                let nonce = A::generate_nonce(&mut OsRng);
                let sealed = cipher.encrypt(&nonce, input).map_err(|e| e.to_string())?;
                let mut out = nonce.as_slice().to_vec();
                out.extend_from_slice(&sealed);
                Ok(out)
            }
            Operation::Decrypt => {
                if input.len() < GCM_NONCE_SIZE {
                    return Err(format!("ciphertext length {} is too short for gcm", input.len()));
                }
                let (nonce, body) = input.split_at(GCM_NONCE_SIZE);
                cipher
                    .decrypt(Nonce::<A>::from_slice(nonce), body)
                    .map_err(|_| "authentication failed".to_owned())
            }
        }
    }

    fn key_wrap(&self, input: &[u8]) -> std::result::Result<Vec<u8>, String> {
        let key = self.symmetric_key()?;
        match (self.algorithm, self.operation) {
            (EncryptionAlgorithm::KwAes128, Operation::Encrypt) => {
                Kek::<aes::Aes128>::try_from(key).map_err(|e| e.to_string())?.wrap_vec(input).map_err(|e| e.to_string())
            }
            (EncryptionAlgorithm::KwAes128, Operation::Decrypt) => {
                Kek::<aes::Aes128>::try_from(key).map_err(|e| e.to_string())?.unwrap_vec(input).map_err(|e| e.to_string())
            }
            (EncryptionAlgorithm::KwAes256, Operation::Encrypt) => {
                Kek::<aes::Aes256>::try_from(key).map_err(|e| e.to_string())?.wrap_vec(input).map_err(|e| e.to_string())
            }
            (EncryptionAlgorithm::KwAes256, Operation::Decrypt) => {
                Kek::<aes::Aes256>::try_from(key).map_err(|e| e.to_string())?.unwrap_vec(input).map_err(|e| e.to_string())
            }
            _ => Err("not a key wrap algorithm".into()),
        }
    }

    fn rsa(&self, input: &[u8]) -> std::result::Result<Vec<u8>, String> {
        let Some(key) = self.key.as_ref() else {
            return Err("no key assigned to the transform".into());
        };
        let KeyValue::Rsa { public, private } = key.value() else {
            return Err("transform requires rsa key material".into());
        };
        match self.operation {
            Operation::Encrypt => {
                let mut rng = OsRng;
                match self.algorithm {
                    EncryptionAlgorithm::Rsa15 => {
                        public.encrypt(&mut rng, Pkcs1v15Encrypt, input).map_err(|e| e.to_string())
                    }
                    EncryptionAlgorithm::RsaOaepMgf1p => {
                        public.encrypt(&mut rng, Oaep::new::<Sha1>(), input).map_err(|e| e.to_string())
                    }
                    _ => Err("not an rsa algorithm".into()),
                }
            }
            Operation::Decrypt => {
                let private = private.as_ref().ok_or_else(|| "private rsa key required".to_owned())?;
                match self.algorithm {
                    EncryptionAlgorithm::Rsa15 => {
                        private.decrypt(Pkcs1v15Encrypt, input).map_err(|e| e.to_string())
                    }
                    EncryptionAlgorithm::RsaOaepMgf1p => {
                        private.decrypt(Oaep::new::<Sha1>(), input).map_err(|e| e.to_string())
                    }
                    _ => Err("not an rsa algorithm".into()),
                }
            }
        }
    }
}

impl Transform for CipherTransform {
    fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    fn execute(&mut self, input: Vec<u8>) -> Result<Vec<u8>> {
        let outcome = match self.algorithm {
            EncryptionAlgorithm::Aes128Cbc => self.cbc::<Aes128CbcEnc, Aes128CbcDec>(&input),
            EncryptionAlgorithm::Aes192Cbc => self.cbc::<Aes192CbcEnc, Aes192CbcDec>(&input),
            EncryptionAlgorithm::Aes256Cbc => self.cbc::<Aes256CbcEnc, Aes256CbcDec>(&input),
            EncryptionAlgorithm::Aes128Gcm => self.gcm::<Aes128Gcm>(&input),
            EncryptionAlgorithm::Aes256Gcm => self.gcm::<Aes256Gcm>(&input),
            EncryptionAlgorithm::KwAes128 | EncryptionAlgorithm::KwAes256 => self.key_wrap(&input),
            EncryptionAlgorithm::Rsa15 | EncryptionAlgorithm::RsaOaepMgf1p => self.rsa(&input),
        };
        outcome.map_err(|message| XmlEncError::crypto(self.name(), message))
    }
}
