//! The transform pipeline: an ordered chain of octet-to-octet stages with
//! the encryption method in the middle.
//!
//! A pipeline runs in one of two modes. Push mode receives a binary buffer
//! (template data, serialised XML, or `CipherValue` text) and folds it
//! through every stage. Pull mode first resolves the configured input URI —
//! installed at the head of the chain, before anything else — and then
//! pushes the fetched bytes the same way. Stages before the method come from
//! `CipherReference/Transforms` and the base64 decoder; stages after it hold
//! the base64 encoder on the write-back path.

mod base64;
mod cipher;

pub use base64::{Base64Transform, base64_decode_tolerant, base64_encode};
pub use cipher::{CipherTransform, EncryptionAlgorithm};

use std::fmt::{Display, Formatter, Result as FmtResult};

use tracing::debug;

use crate::config;
use crate::error::{Result, XmlEncError};
use crate::uri::UriSource;
use crate::xml::{Document, NodeId};

/// Direction of a cipher stage and of the owning context.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl Operation {
    /// Human-readable label for diagnostics.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.label())
    }
}

/// One octet-to-octet pipeline stage.
pub trait Transform {
    /// Stage name, attached to failures.
    fn name(&self) -> &'static str;

    /// Consumes the input buffer and produces the stage output. Buffers are
    /// bounded by the input size; stages do not stream.
    ///
    /// # Errors
    ///
    /// Stage-specific; cipher and codec failures surface as
    /// [`XmlEncError::Crypto`] carrying the stage name.
    fn execute(&mut self, input: Vec<u8>) -> Result<Vec<u8>>;
}

/// The ordered stage chain around an [`CipherTransform`] encryption method.
///
/// The method itself is owned by the encryption context (ownership of a
/// caller-supplied method must survive the pipeline), so execution borrows
/// it as an explicit middle stage.
#[derive(Default)]
pub struct Pipeline {
    head: Vec<Box<dyn Transform>>,
    tail: Vec<Box<dyn Transform>>,
    input: Option<UriSource>,
}

impl Pipeline {
    /// An empty pipeline with no input URI.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a stage at the very head, before everything already there.
    pub fn prepend(&mut self, stage: Box<dyn Transform>) {
        self.head.insert(0, stage);
    }

    /// Appends a stage after the current pre-method stages, still ahead of
    /// the encryption method.
    pub fn append(&mut self, stage: Box<dyn Transform>) {
        self.head.push(stage);
    }

    /// Appends a stage behind the encryption method; this is where the
    /// base64 encoder goes on the write-back path.
    pub fn append_tail(&mut self, stage: Box<dyn Transform>) {
        self.tail.push(stage);
    }

    /// Sets the pull-mode input URI. Must happen before template parsing so
    /// the fetch conceptually sits at the head of the chain.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidUriType`] for an empty URI.
    pub fn set_input_uri(&mut self, uri: &str) -> Result<()> {
        self.input = Some(UriSource::parse(uri)?);
        Ok(())
    }

    /// The configured input source, when one is set.
    #[must_use]
    pub fn input(&self) -> Option<&UriSource> {
        self.input.as_ref()
    }

    /// Push-mode execution: folds `data` through head stages, the method,
    /// then tail stages.
    ///
    /// # Errors
    ///
    /// Propagates the first failing stage's error.
    pub fn execute_binary(&mut self, method: &mut CipherTransform, data: Vec<u8>) -> Result<Vec<u8>> {
        let mut data = data;
        for stage in &mut self.head {
            data = stage.execute(data)?;
        }
        data = method.execute(data)?;
        for stage in &mut self.tail {
            data = stage.execute(data)?;
        }
        Ok(data)
    }

    /// Pull-mode execution: fetches the input URI, then pushes the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidData`] when no input URI was set, the
    /// fetch errors of [`UriSource::fetch`], and stage failures.
    pub fn execute_uri(&mut self, method: &mut CipherTransform, doc: &Document) -> Result<Vec<u8>> {
        let source =
            self.input.as_ref().ok_or_else(|| XmlEncError::InvalidData("pipeline has no input uri".into()))?;
        debug!(source = ?source, "pulling pipeline input");
        let data = source.fetch(doc)?;
        self.execute_binary(method, data)
    }

    /// Reads a `CipherReference/Transforms` list into pre-method stages, in
    /// document order. Reference transforms admit base64 decoding only.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::InvalidNode`] for a child that is not a dsig
    /// `Transform` and [`XmlEncError::InvalidData`] for an unsupported or
    /// missing algorithm.
    pub fn read_transforms_list(&mut self, doc: &Document, node: NodeId) -> Result<()> {
        let mut cursor = doc.first_element_child(node);
        while let Some(current) = cursor {
            if !doc.is_named(current, config::NODE_TRANSFORM, config::DSIG_NS) {
                return Err(XmlEncError::InvalidNode {
                    expected: config::NODE_TRANSFORM.to_owned(),
                    found: doc.name_of(current),
                });
            }
            let href = doc
                .attribute(current, config::ATTR_ALGORITHM)
                .ok_or_else(|| XmlEncError::InvalidData("Transform has no Algorithm attribute".into()))?;
            if href != config::HREF_BASE64 {
                return Err(XmlEncError::InvalidData(format!(
                    "transform '{href}' is not allowed in a cipher reference"
                )));
            }
            self.append(Box::new(Base64Transform::decoder()));
            cursor = doc.next_element_sibling(current);
        }
        Ok(())
    }

    /// Names of the configured stages around the method, head to tail, for
    /// diagnostics.
    #[must_use]
    pub fn stage_names(&self) -> (Vec<&'static str>, Vec<&'static str>) {
        (self.head.iter().map(|s| s.name()).collect(), self.tail.iter().map(|s| s.name()).collect())
    }

    /// Drops every stage and the input URI.
    pub fn reset(&mut self) {
        self.head.clear();
        self.tail.clear();
        self.input = None;
    }
}
