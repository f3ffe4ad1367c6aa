//! # PIE Extractor
//!
//! A rule-driven deep content inspection engine. It pulls personal and
//! business fields (phone numbers, device ids, order codes, locations) out
//! of captured HTTP exchanges and raw TCP/UDP payloads, driven by an XML
//! rule document that nests `HOST > URL > RULE > STEP`.
//!
//! ## Quick Start
//!
//! ### Basic Usage
//!
//! ```rust
//! use pie_extractor::Extractor;
//!
//! let rules = br#"<pIE_RULES>
//!   <HOST HostId="1" Host="api.example.com">
//!     <URL UrlId="10" Url="/v1/profile" AppName="demo" ResCntEncode="UTF8">
//!       <RULE RuleId="100" Key="JSON-PROFILE" DataSource="RESPONSECONTENT">
//!         <STEP Key="PHONENUM" Json="mobile" />
//!         <STEP Key="EMAIL" Json="mail" />
//!       </RULE>
//!     </URL>
//!   </HOST>
//! </pIE_RULES>"#;
//!
//! let extractor = Extractor::from_rules(rules)?;
//!
//! let request = b"GET /v1/profile HTTP/1.1\r\nHost: api.example.com\r\n\r\n";
//! let response = b"HTTP/1.1 200 OK\r\n\r\n\
//! {\"user\":{\"mobile\":\"+86 138-0013-8000\",\"mail\":\"li@example.com\"}}";
//!
//! let out = extractor.extract_pair(request, Some(response))?;
//! assert_eq!(out.records[0]["PHONENUM"], "13800138000");
//! assert_eq!(out.attribute("HOST_ID"), Some("1"));
//! # Ok::<(), pie_extractor::ExtractError>(())
//! ```
//!
//! ### Statistics
//!
//! ```rust
//! use pie_extractor::{Extractor, ExtractorConfig};
//!
//! let extractor = Extractor::with_config(ExtractorConfig::with_stats());
//! // ... load rules, extract ...
//! let snapshot = extractor.stats();
//! assert_eq!(snapshot, "[]");
//! ```
//!
//! ## Layers
//!
//! - [`message`]: FHMF container parsing and HTTP normalization into typed
//!   slices.
//! - [`codec`]: the decode chain applied to a slice before rules read it.
//! - [`compiler`] and [`ir`]: the rule document and its compiled tree.
//! - [`extract`]: routing plus the positional, JSON, XML and delimited
//!   strategies.
//! - [`matcher`]: value validators, wildcard matching and coordinate
//!   transforms.
//! - [`stats`]: per-rule appear/hit/fail counters.

pub mod codec;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod ir;
pub mod matcher;
pub mod message;
pub mod stats;

// Primary interface
pub use engine::Extractor;
pub use extract::{Extraction, Record, RecordSet};

// Compiler and configuration
pub use compiler::Compiler;
pub use config::{ExtractorConfig, DEFAULT_MAX_INFLATE_SIZE};

// Core types and errors
pub use error::{ExtractError, Result};
pub use ir::{Application, Category, DataSource, Rule, RuleTree, RuleTreeSummary, RuleType, Step};

// Messages and decoding
pub use codec::{CodecChain, CodecType};
pub use message::{Message, Protocol, SliceType};

// Statistics
pub use stats::{RuleStat, StatsTable};
