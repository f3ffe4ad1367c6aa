//! The FHMF capture container.
//!
//! ```text
//! "FHMF" | version u16 BE | field count u16 BE
//! field* = "\r\n\r\n----------------\r\n" | option count u8
//!          | { type u8 | len u8 | value }* | "\r\n\r\n" | payload
//! ```
//!
//! The payload length is carried as decimal text in option 3. A field
//! without that option has no payload.

use crate::error::{ExtractError, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;

pub const MAGIC: &[u8; 4] = b"FHMF";
pub const FIELD_SEPARATOR: &[u8; 22] = b"\r\n\r\n----------------\r\n";
pub const PAYLOAD_SEPARATOR: &[u8; 4] = b"\r\n\r\n";
pub const VERSION: u16 = 1;

/// Option tag of a container field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionType {
    MimeType,
    FileName,
    PayloadLen,
    Domain,
    ServIp,
    ServPort,
    Other(u8),
}

impl OptionType {
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => OptionType::MimeType,
            2 => OptionType::FileName,
            3 => OptionType::PayloadLen,
            4 => OptionType::Domain,
            5 => OptionType::ServIp,
            6 => OptionType::ServPort,
            other => OptionType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OptionType::MimeType => 1,
            OptionType::FileName => 2,
            OptionType::PayloadLen => 3,
            OptionType::Domain => 4,
            OptionType::ServIp => 5,
            OptionType::ServPort => 6,
            OptionType::Other(tag) => tag,
        }
    }
}

/// One captured payload and its metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FhmfField<'a> {
    pub options: BTreeMap<OptionType, Cow<'a, [u8]>>,
    pub payload: &'a [u8],
}

impl<'a> FhmfField<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option(mut self, kind: OptionType, value: &'a [u8]) -> Self {
        self.options.insert(kind, Cow::Borrowed(value));
        self
    }

    /// Set the payload and the matching payload-length option.
    pub fn with_payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        if payload.is_empty() {
            self.options.remove(&OptionType::PayloadLen);
        } else {
            self.options.insert(
                OptionType::PayloadLen,
                Cow::Owned(payload.len().to_string().into_bytes()),
            );
        }
        self
    }

    pub fn option(&self, kind: OptionType) -> &[u8] {
        self.options.get(&kind).map(|v| &**v).unwrap_or_default()
    }

    pub fn mime_type(&self) -> &[u8] {
        self.option(OptionType::MimeType)
    }

    pub fn file_name(&self) -> &[u8] {
        self.option(OptionType::FileName)
    }
}

/// A parsed container borrowing from its input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fhmf<'a> {
    pub version: u16,
    pub fields: Vec<FhmfField<'a>>,
}

impl Default for Fhmf<'_> {
    fn default() -> Self {
        Self {
            version: VERSION,
            fields: Vec::new(),
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16_be(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn expect(&mut self, literal: &[u8]) -> Option<()> {
        (self.take(literal.len())? == literal).then_some(())
    }
}

impl<'a> Fhmf<'a> {
    /// Parse a container. Any magic mismatch, unparsable payload length or
    /// overrun of `buf` rejects the whole input.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        let mut cur = Cursor { buf, pos: 0 };
        cur.expect(MAGIC)?;
        let version = cur.u16_be()?;
        let field_count = cur.u16_be()?;

        let mut fields = Vec::with_capacity(usize::from(field_count).min(64));
        for _ in 0..field_count {
            cur.expect(FIELD_SEPARATOR)?;
            let option_count = cur.u8()?;

            let mut field = FhmfField::new();
            let mut payload_len = 0usize;
            for _ in 0..option_count {
                let kind = OptionType::from_u8(cur.u8()?);
                let len = cur.u8()?;
                let value = cur.take(usize::from(len))?;
                if kind == OptionType::PayloadLen {
                    payload_len = std::str::from_utf8(value).ok()?.trim().parse().ok()?;
                }
                field.options.insert(kind, Cow::Borrowed(value));
            }

            cur.expect(PAYLOAD_SEPARATOR)?;
            if payload_len > 0 {
                field.payload = cur.take(payload_len)?;
            }
            fields.push(field);
        }

        Some(Self { version, fields })
    }

    /// Serialize the container. Options are written in tag order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let field_count = u16::try_from(self.fields.len())
            .map_err(|_| ExtractError::InvalidLayout("too many FHMF fields".to_string()))?;

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&field_count.to_be_bytes());

        for field in &self.fields {
            out.extend_from_slice(FIELD_SEPARATOR);
            let option_count = u8::try_from(field.options.len())
                .map_err(|_| ExtractError::InvalidLayout("too many FHMF options".to_string()))?;
            out.push(option_count);
            for (kind, value) in &field.options {
                let len = u8::try_from(value.len()).map_err(|_| {
                    ExtractError::InvalidLayout("FHMF option value exceeds 255 bytes".to_string())
                })?;
                out.push(kind.as_u8());
                out.push(len);
                out.extend_from_slice(value);
            }
            out.extend_from_slice(PAYLOAD_SEPARATOR);
            out.extend_from_slice(field.payload);
        }

        Ok(out)
    }
}
