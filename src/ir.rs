//! Compiled rule tree.
//!
//! The tree has four levels: [`Application`] (one per `HOST`), [`Category`]
//! (one per `URL`), [`Rule`] and [`Step`]. It is built once by
//! [`crate::compiler::Compiler`] and never mutated afterwards; a reload
//! builds a fresh tree.

use crate::codec::{CodecChain, CodecType};
use crate::error::{ExtractError, Result};
use crate::matcher::{wildcard_match, CoordinateSystem, KeyType};
use crate::message::{Protocol, SliceType};
use aho_corasick::AhoCorasick;
use encoding_rs::Encoding;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Free-form attributes of a rule element, as written in the document.
pub type Attributes = HashMap<String, String>;

/// A literal byte pattern with a prebuilt searcher.
#[derive(Clone)]
pub struct Pattern {
    bytes: Vec<u8>,
    finder: AhoCorasick,
}

impl Pattern {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        let finder = AhoCorasick::new([&bytes])
            .map_err(|e| ExtractError::InvalidStep(format!("pattern: {e}")))?;
        Ok(Self { bytes, finder })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Start and end of the first occurrence in `haystack`.
    pub fn find(&self, haystack: &[u8]) -> Option<(usize, usize)> {
        self.finder.find(haystack).map(|m| (m.start(), m.end()))
    }

    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.finder.is_match(haystack)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", String::from_utf8_lossy(&self.bytes))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

/// Character class consumed by `Skip`/`RSkip` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipClass {
    Digit,
    LowLetter,
    HighLetter,
    Letter,
}

impl SkipClass {
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "all-Digit" => Some(SkipClass::Digit),
            "all-LowLetter" => Some(SkipClass::LowLetter),
            "all-HighLetter" => Some(SkipClass::HighLetter),
            "all-Letter" => Some(SkipClass::Letter),
            _ => None,
        }
    }

    pub fn matches(self, b: u8) -> bool {
        match self {
            SkipClass::Digit => b.is_ascii_digit(),
            SkipClass::LowLetter => b.is_ascii_lowercase(),
            SkipClass::HighLetter => b.is_ascii_uppercase(),
            SkipClass::Letter => b.is_ascii_alphabetic(),
        }
    }
}

/// One positional extraction step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Find `pattern` `count` times, dropping everything through each hit.
    Prefix { count: u32, pattern: Pattern },
    /// Truncate at the `count`-th occurrence of `pattern`.
    Suffix { count: u32, pattern: Pattern },
    StartPos(i32),
    EndPos(i32),
    Skip(SkipClass),
    RSkip(SkipClass),
    /// Read a TLV value whose length field is this many bytes wide.
    LenLength(u8),
    Split(u8),
}

/// Where a rule reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    Url,
    Cookie,
    ReqHead,
    ReqContent,
    ResHead,
    ResContent,
}

impl DataSource {
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "URI" | "URL" => Some(DataSource::Url),
            "COOKIE" => Some(DataSource::Cookie),
            "REQUESTHEAD" => Some(DataSource::ReqHead),
            "REQUESTCONTENT" | "UP" => Some(DataSource::ReqContent),
            "RESPONSEHEAD" => Some(DataSource::ResHead),
            "RESPONSECONTENT" | "DOWN" => Some(DataSource::ResContent),
            _ => None,
        }
    }

    pub fn is_content(self) -> bool {
        matches!(self, DataSource::ReqContent | DataSource::ResContent)
    }

    /// Message slice this source reads on a message of `protocol`.
    pub fn slice_type(self, protocol: Protocol) -> SliceType {
        match (self, protocol.is_binary()) {
            (DataSource::ReqContent, true) => SliceType::BinReqBody,
            (DataSource::ResContent, true) => SliceType::BinResBody,
            (DataSource::Url, _) => SliceType::HttpQuery,
            (DataSource::Cookie, _) => SliceType::HttpCookie,
            (DataSource::ReqHead, _) => SliceType::HttpReqHead,
            (DataSource::ResHead, _) => SliceType::HttpResHead,
            (DataSource::ReqContent, false) => SliceType::HttpReqBody,
            (DataSource::ResContent, false) => SliceType::HttpResBody,
        }
    }
}

/// Extraction strategy, chosen from the prefix of a rule's `Key` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RuleType {
    #[default]
    Positional,
    Json,
    Xml,
    F0,
    F1,
}

impl RuleType {
    pub fn from_rule_key(key: &str) -> Self {
        match key.split('-').next().unwrap_or_default() {
            "JSON" => RuleType::Json,
            "XML" => RuleType::Xml,
            "F0" => RuleType::F0,
            "F1" => RuleType::F1,
            _ => RuleType::Positional,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleType::Positional => "positional",
            RuleType::Json => "json",
            RuleType::Xml => "xml",
            RuleType::F0 => "f0",
            RuleType::F1 => "f1",
        }
    }
}

/// An output key of a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDesc {
    pub name: String,
    /// Field name in the source document (JSON/XML rules).
    pub mapped: Option<String>,
    pub key_type: KeyType,
}

impl KeyDesc {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let key_type = KeyType::from_key_name(&name);
        Self {
            name,
            mapped: None,
            key_type,
        }
    }

    /// Run the key's validator. Keys without one accept every value.
    pub fn accept(&self, value: &mut String) -> bool {
        match self.key_type.filter() {
            Some(filter) => filter(value),
            None => true,
        }
    }
}

/// A compiled `RULE` element.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    /// The `Key` attribute as written.
    pub rule_key: String,
    pub rule_type: RuleType,
    pub data_src: DataSource,
    pub steps: Vec<Step>,
    pub keys: Vec<KeyDesc>,
    /// Other members of this rule's group, when this rule heads one.
    pub sub_rules: Vec<Rule>,
    pub gid: Option<i32>,
    pub coordinate: CoordinateSystem,
    pub charset: Option<&'static Encoding>,
    pub value_encode: CodecChain,
    pub big_endian: bool,
    pub index: u32,
    pub tlv_type: Vec<u8>,
    pub type_len: usize,
    pub head: Vec<u8>,
    pub tail: Vec<u8>,
    pub group_split: Option<u8>,
    pub word_split: Option<u8>,
    pub priority: u32,
    pub confidence: u32,
    pub attributes: Attributes,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            id: String::new(),
            rule_key: String::new(),
            rule_type: RuleType::default(),
            data_src: DataSource::ReqContent,
            steps: Vec::new(),
            keys: Vec::new(),
            sub_rules: Vec::new(),
            gid: None,
            coordinate: CoordinateSystem::default(),
            charset: None,
            value_encode: CodecChain::default(),
            big_endian: false,
            index: 0,
            tlv_type: Vec::new(),
            type_len: 0,
            head: Vec::new(),
            tail: Vec::new(),
            group_split: None,
            word_split: None,
            priority: 1,
            confidence: 55,
            attributes: Attributes::new(),
        }
    }
}

impl Rule {
    pub fn attr(&self, name: &str) -> &str {
        attr(&self.attributes, name)
    }

    /// This rule followed by its group members.
    pub fn group(&self) -> impl Iterator<Item = &Rule> {
        std::iter::once(self).chain(self.sub_rules.iter())
    }
}

/// A compiled `URL` element.
#[derive(Debug, Clone, Default)]
pub struct Category {
    pub attributes: Attributes,
    pub rules: Vec<Rule>,
    /// Group id to the index of its head rule in `rules`.
    pub gids: HashMap<i32, usize>,
    pub req_codec: CodecChain,
    pub res_codec: CodecChain,
    /// The `Keyword` a binary category requires in its content slices.
    pub keyword: Option<Pattern>,
}

impl Category {
    pub fn attr(&self, name: &str) -> &str {
        attr(&self.attributes, name)
    }

    /// Codec chain for a data source; header sources are URL decoded.
    pub fn codec_for(&self, src: DataSource) -> Cow<'_, CodecChain> {
        match src {
            DataSource::ReqContent => Cow::Borrowed(&self.req_codec),
            DataSource::ResContent => Cow::Borrowed(&self.res_codec),
            _ => Cow::Owned(CodecChain::new(vec![CodecType::Url])),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.iter().map(|r| 1 + r.sub_rules.len()).sum()
    }
}

/// A compiled `HOST` element.
#[derive(Debug, Clone, Default)]
pub struct Application {
    pub protocol: Protocol,
    pub attributes: Attributes,
    pub categories: Vec<Category>,
    /// Exact `Url` (HTTP) or `Action` (binary) to category index.
    pub index: HashMap<String, usize>,
    /// Indices of categories whose `Url` holds a `*`, in declaration order.
    pub wild_index: Vec<usize>,
    /// Hex-decoded `CipherKey` of a binary application.
    pub cipher_key: Option<Pattern>,
    pub plaintext_feature: Option<Pattern>,
}

impl Application {
    pub fn attr(&self, name: &str) -> &str {
        attr(&self.attributes, name)
    }

    /// Category for a request path: exact match first, then wildcard
    /// categories in declaration order.
    pub fn find_category(&self, url: &str) -> Option<&Category> {
        if let Some(&idx) = self.index.get(url) {
            return self.categories.get(idx);
        }
        self.wild_index
            .iter()
            .filter_map(|&idx| self.categories.get(idx))
            .find(|cate| wildcard_match(url, cate.attr("Url")))
    }
}

/// Rule counts of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleTreeSummary {
    pub applications: usize,
    pub categories: usize,
    pub rules: usize,
    pub wildcard_applications: usize,
}

/// All applications of one rule document.
#[derive(Debug, Clone, Default)]
pub struct RuleTree {
    pub apps: Vec<Application>,
    /// Exact host (HTTP) or `Ip` + `Port` (binary) to application index.
    pub index: HashMap<String, usize>,
    /// Indices of applications whose `Host` holds a `*`.
    pub wild_index: Vec<usize>,
}

impl RuleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Application for an exact key only.
    pub fn find_exact(&self, key: &str) -> Option<&Application> {
        self.index.get(key).and_then(|&idx| self.apps.get(idx))
    }

    /// Application for an HTTP host: exact match first, then wildcard
    /// applications in declaration order.
    pub fn find_app(&self, host: &str) -> Option<&Application> {
        if let Some(app) = self.find_exact(host) {
            return Some(app);
        }
        self.wild_index
            .iter()
            .filter_map(|&idx| self.apps.get(idx))
            .find(|app| wildcard_match(host, app.attr("Host")))
    }

    pub fn summary(&self) -> RuleTreeSummary {
        RuleTreeSummary {
            applications: self.apps.len(),
            categories: self.apps.iter().map(|a| a.categories.len()).sum(),
            rules: self
                .apps
                .iter()
                .flat_map(|a| a.categories.iter())
                .map(Category::rule_count)
                .sum(),
            wildcard_applications: self.wild_index.len(),
        }
    }
}

fn attr<'a>(attributes: &'a Attributes, name: &str) -> &'a str {
    attributes.get(name).map(String::as_str).unwrap_or_default()
}
