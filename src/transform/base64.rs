//! Base64 pipeline stage.
//!
//! XML text content is free to wrap base64 across lines, so the decoder
//! strips ASCII whitespace before decoding. The encoder emits a single
//! unwrapped line, which is what gets written into `CipherValue`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::Transform;
use crate::error::{Result, XmlEncError};

/// Encodes bytes as standard base64, unwrapped.
#[must_use]
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes standard base64, ignoring interleaved ASCII whitespace.
///
/// # Errors
///
/// Returns [`XmlEncError::Crypto`] naming the base64 transform on invalid
/// input.
pub fn base64_decode_tolerant(data: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    STANDARD.decode(&compact).map_err(|e| XmlEncError::crypto("base64", e.to_string()))
}

enum Base64Mode {
    Encode,
    Decode,
}

/// The base64 transform, prepended to decrypt pipelines reading
/// `CipherValue` and appended to encrypt pipelines writing it.
pub struct Base64Transform {
    mode: Base64Mode,
}

impl Base64Transform {
    /// An encoding stage.
    #[must_use]
    pub fn encoder() -> Self {
        Self { mode: Base64Mode::Encode }
    }

    /// A whitespace-tolerant decoding stage.
    #[must_use]
    pub fn decoder() -> Self {
        Self { mode: Base64Mode::Decode }
    }
}

impl Transform for Base64Transform {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn execute(&mut self, input: Vec<u8>) -> Result<Vec<u8>> {
        match self.mode {
            Base64Mode::Encode => Ok(base64_encode(&input).into_bytes()),
            Base64Mode::Decode => base64_decode_tolerant(&input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_single_line() {
        let mut encoder = Base64Transform::encoder();
        let out = encoder.execute(vec![0u8; 90]).unwrap();
        assert!(!out.contains(&b'\n'));
        assert_eq!(out.len(), 120);
    }

    #[test]
    fn test_decode_ignores_whitespace() {
        let mut decoder = Base64Transform::decoder();
        let out = decoder.execute(b"AAEC\n  AwQF\t\r\n".to_vec()).unwrap();
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_round_trip() {
        let data: Vec<u8> = (0u8..=255).collect();
        let encoded = Base64Transform::encoder().execute(data.clone()).unwrap();
        let decoded = Base64Transform::decoder().execute(encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_failure_names_the_transform() {
        let err = Base64Transform::decoder().execute(b"*definitely not base64*".to_vec()).unwrap_err();
        assert!(matches!(err, XmlEncError::Crypto { ref transform, .. } if transform == "base64"));
    }
}
