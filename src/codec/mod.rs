//! Decode transforms applied to message slices and extracted values.
//!
//! A [`CodecChain`] is an ordered list of [`CodecType`]s. Each step replaces
//! the buffer with its decoded form; the first failing step aborts the chain
//! and its error is returned.

pub mod inflate;
pub mod text;

use crate::error::{ExtractError, Result};
use encoding_rs::Encoding;
use std::fmt;
use std::str::FromStr;

/// One decode transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    Gzip,
    Zlib,
    /// Handled as zlib-wrapped deflate.
    Deflate,
    Url,
    Base64,
    Unicode,
    Escape,
    Qp,
    Convert,
    Utf8,
}

impl CodecType {
    pub fn name(self) -> &'static str {
        match self {
            CodecType::Gzip => "GZIP",
            CodecType::Zlib => "ZLIB",
            CodecType::Deflate => "DEFLATE",
            CodecType::Url => "URL",
            CodecType::Base64 => "BASE64",
            CodecType::Unicode => "UNICODE",
            CodecType::Escape => "ESCAPE",
            CodecType::Qp => "QP",
            CodecType::Convert => "CONVERT",
            CodecType::Utf8 => "UTF-8",
        }
    }

    pub fn is_compression(self) -> bool {
        matches!(self, CodecType::Gzip | CodecType::Zlib | CodecType::Deflate)
    }

    /// Decode `input` with this transform.
    pub fn decode(self, input: &[u8], max_inflate_size: usize) -> Result<Vec<u8>> {
        match self {
            CodecType::Gzip => inflate::gunzip(input, max_inflate_size),
            CodecType::Zlib | CodecType::Deflate => inflate::zlib_inflate(input, max_inflate_size),
            CodecType::Url => Ok(text::url_decode(input)),
            CodecType::Base64 => text::base64_decode(input),
            CodecType::Unicode => text::utf16_decode(input),
            CodecType::Escape => Ok(text::escape_decode(input)),
            CodecType::Qp => Ok(text::qp_decode(input)),
            CodecType::Convert => Ok(input.iter().rev().copied().collect()),
            CodecType::Utf8 => Ok(input.to_vec()),
        }
    }
}

impl FromStr for CodecType {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GZIP" => Ok(CodecType::Gzip),
            "ZLIB" => Ok(CodecType::Zlib),
            "DEFLATE" => Ok(CodecType::Deflate),
            "URL" => Ok(CodecType::Url),
            "BASE64" => Ok(CodecType::Base64),
            "UNICODE" => Ok(CodecType::Unicode),
            "ESCAPE" => Ok(CodecType::Escape),
            "QP" => Ok(CodecType::Qp),
            "CONVERT" => Ok(CodecType::Convert),
            "UTF-8" | "UTF8" => Ok(CodecType::Utf8),
            other => Err(ExtractError::UndefinedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered decode pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecChain {
    steps: Vec<CodecType>,
}

impl CodecChain {
    pub fn new(steps: Vec<CodecType>) -> Self {
        Self { steps }
    }

    /// Parse a comma-separated list of codec names. Empty entries are
    /// ignored; an unknown name fails with [`ExtractError::UndefinedMethod`].
    ///
    /// ```rust
    /// use pie_extractor::codec::{CodecChain, CodecType};
    ///
    /// let chain = CodecChain::parse("GZIP,,URL").unwrap();
    /// assert_eq!(chain.steps(), &[CodecType::Gzip, CodecType::Url]);
    /// assert!(CodecChain::parse("ROT13").is_err());
    /// ```
    pub fn parse(list: &str) -> Result<Self> {
        let mut chain = Self::default();
        chain.extend_from_list(list)?;
        Ok(chain)
    }

    /// Append the codecs named in a comma-separated list.
    pub fn extend_from_list(&mut self, list: &str) -> Result<()> {
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            self.steps.push(name.parse()?);
        }
        Ok(())
    }

    pub fn push(&mut self, codec: CodecType) {
        self.steps.push(codec);
    }

    pub fn steps(&self) -> &[CodecType] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order over `input`.
    pub fn apply(&self, input: &[u8], max_inflate_size: usize) -> Result<Vec<u8>> {
        let mut buf = input.to_vec();
        for codec in &self.steps {
            buf = codec.decode(&buf, max_inflate_size).map_err(|err| {
                tracing::debug!(codec = %codec, error = %err, "codec step failed");
                err
            })?;
        }
        Ok(buf)
    }
}

impl fmt::Display for CodecChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.steps.iter().map(|c| c.name()).collect();
        f.write_str(&names.join(","))
    }
}

/// Resolve a `CharacterSet` label such as `GBK` or `UTF-16LE`.
pub fn charset_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Convert bytes in `encoding` to a UTF-8 string. Malformed input fails with
/// [`ExtractError::DecodeFailed`].
pub fn charset_to_utf8(input: &[u8], encoding: &'static Encoding) -> Result<String> {
    if encoding == encoding_rs::UTF_16BE || encoding == encoding_rs::UTF_16LE {
        let (decoded, had_errors) = encoding.decode_without_bom_handling(input);
        if had_errors {
            return Err(ExtractError::DecodeFailed);
        }
        return Ok(decoded.into_owned());
    }
    encoding
        .decode_without_bom_handling_and_without_replacement(input)
        .map(|s| s.into_owned())
        .ok_or(ExtractError::DecodeFailed)
}
