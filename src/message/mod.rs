//! Normalization of captured bytes into a typed [`Message`].
//!
//! A message is a protocol tag plus a map of named [`Slice`]s. Input is
//! either an FHMF container or raw HTTP bytes; [`Message::probe`] decides
//! which.

pub mod fhmf;
pub mod http;

use crate::codec::CodecChain;
use crate::error::{ExtractError, Result};
use fhmf::{Fhmf, FhmfField, OptionType};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Transport protocol of an application or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Http,
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }

    /// Protocol carried by an FHMF MIME type option.
    pub fn from_mime_type(mime: &[u8]) -> Option<Self> {
        match mime {
            b"application/http" => Some(Protocol::Http),
            b"application/tcp" => Some(Protocol::Tcp),
            b"application/udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl FromStr for Protocol {
    type Err = ExtractError;

    /// Parse a rule `Protocol` attribute. Empty means HTTP.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "HTTP" => Ok(Protocol::Http),
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(ExtractError::UndefinedProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named part of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    HttpHost,
    /// Full request target, path plus query.
    HttpUrlOrigin,
    HttpUrl,
    HttpQuery,
    HttpCookie,
    HttpUserAgent,
    HttpReqHead,
    HttpReqBody,
    HttpResHead,
    HttpResBody,
    BinDomain,
    BinServIp,
    BinServPort,
    BinReqBody,
    BinResBody,
}

impl SliceType {
    /// Whether this slice type can exist on a message of `protocol`.
    pub fn belongs_to(self, protocol: Protocol) -> bool {
        let http = matches!(
            self,
            SliceType::HttpHost
                | SliceType::HttpUrlOrigin
                | SliceType::HttpUrl
                | SliceType::HttpQuery
                | SliceType::HttpCookie
                | SliceType::HttpUserAgent
                | SliceType::HttpReqHead
                | SliceType::HttpReqBody
                | SliceType::HttpResHead
                | SliceType::HttpResBody
        );
        http == (protocol == Protocol::Http)
    }
}

/// Bytes of one message part plus its decoded form, computed at most once.
#[derive(Debug, Clone, Default)]
pub struct Slice {
    raw: Vec<u8>,
    decoded: Option<Result<Vec<u8>>>,
}

impl Slice {
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: raw.into(),
            decoded: None,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded.is_some()
    }

    /// Decode with `chain` on first use. Later calls return the stored
    /// outcome, whatever chain they pass.
    pub fn decode(&mut self, chain: &CodecChain, max_inflate_size: usize) -> Result<&[u8]> {
        let raw = &self.raw;
        let outcome = self
            .decoded
            .get_or_insert_with(|| chain.apply(raw, max_inflate_size));
        match outcome {
            Ok(bytes) => Ok(bytes.as_slice()),
            Err(err) => Err(err.clone()),
        }
    }
}

/// A normalized capture.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub protocol: Protocol,
    slices: HashMap<SliceType, Slice>,
}

impl Message {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            slices: HashMap::new(),
        }
    }

    /// Classify and normalize one captured buffer.
    ///
    /// An FHMF container yields HTTP or binary slices per field; when no
    /// field is classified the result is [`ExtractError::UnknownMessage`].
    /// Anything that is not a valid container is parsed as a raw HTTP
    /// request.
    pub fn probe(buf: &[u8]) -> Result<Self> {
        match Fhmf::parse(buf) {
            Some(container) => Self::from_fhmf(&container),
            None => Ok(Self::http_pair(buf, None)),
        }
    }

    /// Build a message from a parsed container.
    pub fn from_fhmf(container: &Fhmf<'_>) -> Result<Self> {
        let mut msg = Message::default();
        let mut classified = false;

        for field in &container.fields {
            if field.payload.is_empty() {
                continue;
            }
            let Some(protocol) = Protocol::from_mime_type(field.mime_type()) else {
                continue;
            };
            msg.protocol = protocol;
            classified = true;
            match protocol {
                Protocol::Http => {
                    let upstream = field.file_name() == b"Request.http";
                    msg.add_http(field.payload, upstream);
                }
                Protocol::Tcp | Protocol::Udp => msg.add_binary(field),
            }
        }

        if !classified {
            return Err(ExtractError::UnknownMessage);
        }
        Ok(msg)
    }

    /// Build an HTTP message from a request and an optional response.
    pub fn http_pair(up: &[u8], down: Option<&[u8]>) -> Self {
        let mut msg = Message::new(Protocol::Http);
        if up.is_empty() {
            return msg;
        }
        msg.add_http(up, true);
        if let Some(down) = down.filter(|d| !d.is_empty()) {
            msg.add_http(down, false);
        }
        msg
    }

    fn add_http(&mut self, data: &[u8], upstream: bool) {
        let parsed = if upstream {
            http::parse_request(data)
        } else {
            http::parse_response(data)
        };
        let Some(parts) = parsed else {
            return;
        };

        if let Some(target) = parts.target {
            self.set(SliceType::HttpUrlOrigin, target);
        }
        if let Some(path) = parts.path() {
            self.set(SliceType::HttpUrl, path);
        }
        if let Some(query) = parts.query() {
            self.set(SliceType::HttpQuery, query);
        }
        if let Some(host) = parts.host {
            self.set(SliceType::HttpHost, host);
        }
        if let Some(cookie) = parts.cookie {
            self.set(SliceType::HttpCookie, cookie);
        }
        if let Some(user_agent) = parts.user_agent {
            self.set(SliceType::HttpUserAgent, user_agent);
        }

        let (head, body) = if upstream {
            (SliceType::HttpReqHead, SliceType::HttpReqBody)
        } else {
            (SliceType::HttpResHead, SliceType::HttpResBody)
        };
        self.set(head, parts.head);
        if let Some(content) = parts.body {
            self.set(body, content.into_owned());
        }
    }

    fn add_binary(&mut self, field: &FhmfField<'_>) {
        let upstream = matches!(field.file_name(), b"Request.tcp" | b"Request.udp");
        let body = if upstream {
            SliceType::BinReqBody
        } else {
            SliceType::BinResBody
        };
        self.set(body, field.payload);
        self.set(SliceType::BinDomain, field.option(OptionType::Domain));
        self.set(SliceType::BinServIp, field.option(OptionType::ServIp));
        self.set(SliceType::BinServPort, field.option(OptionType::ServPort));
    }

    /// Store a slice, replacing any previous one of the same type.
    pub fn set(&mut self, kind: SliceType, bytes: impl Into<Vec<u8>>) {
        self.slices.insert(kind, Slice::new(bytes));
    }

    /// Raw bytes of a slice; empty when absent or foreign to the protocol.
    pub fn raw(&self, kind: SliceType) -> &[u8] {
        if !kind.belongs_to(self.protocol) {
            return &[];
        }
        self.slices.get(&kind).map(Slice::raw).unwrap_or_default()
    }

    pub fn slice(&self, kind: SliceType) -> Option<&Slice> {
        if !kind.belongs_to(self.protocol) {
            return None;
        }
        self.slices.get(&kind)
    }

    pub fn slice_mut(&mut self, kind: SliceType) -> Option<&mut Slice> {
        if !kind.belongs_to(self.protocol) {
            return None;
        }
        self.slices.get_mut(&kind)
    }

    /// Raw bytes of a slice as lossy UTF-8.
    pub fn text(&self, kind: SliceType) -> String {
        String::from_utf8_lossy(self.raw(kind)).into_owned()
    }
}
