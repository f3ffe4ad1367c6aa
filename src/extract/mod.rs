//! Rule evaluation over a normalized message.
//!
//! A message is routed to an application and category of the active
//! [`RuleTree`], then every rule of the category reads its slice, decodes it
//! once and runs its strategy. HTTP and binary messages are routed
//! differently; see [`Frontend`].

mod fields;
mod json;
mod positional;
mod xml;

use crate::config::ExtractorConfig;
use crate::error::{ExtractError, Result};
use crate::ir::{Application, Category, Rule, RuleTree, RuleType};
use crate::message::{Message, Protocol, SliceType};
use crate::stats::{RuleStat, StatsTable};
use serde::Serialize;
use std::collections::BTreeMap;

pub use positional::{extract_value, run_steps};

/// One extracted set of key/value pairs.
pub type Record = BTreeMap<String, String>;

pub type RecordSet = Vec<Record>;

/// Output of one extraction: the records plus descriptive attributes of
/// the matched application and category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub records: RecordSet,
    pub attributes: Record,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Narrow `data` to the part starting at `head` and ending before `tail`.
/// The head marker itself stays in the view. A configured marker that is
/// absent yields an empty view.
pub(crate) fn strip<'a>(data: &'a [u8], head: &[u8], tail: &[u8]) -> &'a [u8] {
    let mut view = data;
    if !head.is_empty() {
        match view.windows(head.len()).position(|w| w == head) {
            Some(at) => view = &view[at..],
            None => return &[],
        }
    }
    if !tail.is_empty() {
        match view.windows(tail.len()).position(|w| w == tail) {
            Some(at) => view = &view[..at],
            None => return &[],
        }
    }
    view
}

fn put(attributes: &mut Record, key: &str, value: impl Into<String>) {
    let value = value.into();
    if !value.is_empty() {
        attributes.insert(key.to_string(), value);
    }
}

/// Routing strategy for a message protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frontend {
    /// Host then URL path, each exact first and wildcard second.
    Http,
    /// `Ip` + `Port` exact lookup, then the first category that yields
    /// records.
    Binary,
}

impl Frontend {
    pub fn for_protocol(protocol: Protocol) -> Self {
        if protocol.is_binary() {
            Frontend::Binary
        } else {
            Frontend::Http
        }
    }

    /// Route `msg` through `tree` and run the matching rules.
    pub fn extract(
        self,
        tree: &RuleTree,
        msg: &mut Message,
        config: &ExtractorConfig,
        stats: Option<&StatsTable>,
    ) -> Result<Extraction> {
        match self {
            Frontend::Http => extract_http(tree, msg, config, stats),
            Frontend::Binary => extract_binary(tree, msg, config, stats),
        }
    }
}

/// Run the rules of `tree` against `msg`. Statistics are merged into
/// `stats` when given.
pub fn extract(
    tree: &RuleTree,
    msg: &mut Message,
    config: &ExtractorConfig,
    stats: Option<&StatsTable>,
) -> Result<Extraction> {
    Frontend::for_protocol(msg.protocol).extract(tree, msg, config, stats)
}

fn extract_http(
    tree: &RuleTree,
    msg: &mut Message,
    config: &ExtractorConfig,
    stats: Option<&StatsTable>,
) -> Result<Extraction> {
    let host = msg.text(SliceType::HttpHost);
    let url = msg.text(SliceType::HttpUrl);
    if host.is_empty() || url.is_empty() {
        return Err(ExtractError::IncompleteMessage);
    }

    let app = tree
        .find_app(&host)
        .filter(|app| app.protocol == Protocol::Http)
        .ok_or(ExtractError::NotFoundRule)?;
    let cate = app.find_category(&url).ok_or(ExtractError::NotFoundRule)?;

    let mut out = Extraction::default();
    put(&mut out.attributes, "HOST_ID", app.attr("HostId"));
    put(&mut out.attributes, "SPECIAL_LABLE", app.attr("EvilLabel"));
    put(&mut out.attributes, "HOST", host.as_str());
    put(&mut out.attributes, "PROTOCOL", Protocol::Http.as_str());
    put(&mut out.attributes, "URL_ID", cate.attr("UrlId"));
    put(&mut out.attributes, "URL", url.as_str());
    put(&mut out.attributes, "PROTOCOL_ACTION", cate.attr("ProtocolAction"));
    put(&mut out.attributes, "APP_NAME", cate.attr("AppName"));
    put(&mut out.attributes, "ACTION", cate.attr("Action"));
    put(&mut out.attributes, "USER_AGENT", msg.text(SliceType::HttpUserAgent));

    let pass = CategoryPass::new(app, cate, config).run(msg, stats)?;
    out.records = pass.records;
    if config.output_rule_id && !pass.hits.is_empty() {
        out.attributes.insert("RULE_ID".to_string(), pass.hits.join("|"));
    }

    tracing::debug!(
        host = %host,
        url = %url,
        records = out.records.len(),
        "http message extracted"
    );
    Ok(out)
}

fn extract_binary(
    tree: &RuleTree,
    msg: &mut Message,
    config: &ExtractorConfig,
    stats: Option<&StatsTable>,
) -> Result<Extraction> {
    let ip = msg.text(SliceType::BinServIp);
    let port = msg.text(SliceType::BinServPort);
    if ip.is_empty() || port.is_empty() {
        return Err(ExtractError::IncompleteMessage);
    }

    let protocol = msg.protocol;
    let app = tree
        .find_exact(&format!("{ip}{port}"))
        .filter(|app| app.protocol == protocol)
        .ok_or(ExtractError::NotFoundRule)?;

    let mut out = Extraction::default();
    put(&mut out.attributes, "HOST_ID", app.attr("HostId"));
    put(&mut out.attributes, "SPECIAL_LABLE", app.attr("EvilLabel"));
    put(&mut out.attributes, "HOST", msg.text(SliceType::BinDomain));
    put(&mut out.attributes, "PROTOCOL", protocol.as_str());

    let mut rejected = 0;
    for cate in &app.categories {
        let pass = match CategoryPass::new(app, cate, config).run(msg, stats) {
            Ok(pass) => pass,
            Err(err) => {
                tracing::trace!(action = cate.attr("Action"), error = %err, "category rejected");
                rejected += 1;
                continue;
            }
        };
        if pass.records.is_empty() {
            continue;
        }

        out.records = pass.records;
        put(&mut out.attributes, "URL_ID", cate.attr("UrlId"));
        put(&mut out.attributes, "URL", cate.attr("Url"));
        put(&mut out.attributes, "PROTOCOL_ACTION", cate.attr("ProtocolAction"));
        put(&mut out.attributes, "APP_NAME", cate.attr("AppName"));
        put(&mut out.attributes, "ACTION", cate.attr("Action"));
        if config.output_rule_id && !pass.hits.is_empty() {
            out.attributes.insert("RULE_ID".to_string(), pass.hits.join("|"));
        }
        break;
    }

    if rejected == app.categories.len() {
        return Err(ExtractError::NotFoundRule);
    }

    tracing::debug!(
        ip = %ip,
        port = %port,
        records = out.records.len(),
        "binary message extracted"
    );
    Ok(out)
}

/// Records and hit rule ids of one category evaluation.
#[derive(Debug, Default)]
struct PassOutput {
    records: RecordSet,
    hits: Vec<String>,
}

struct CategoryPass<'a> {
    app: &'a Application,
    cate: &'a Category,
    config: &'a ExtractorConfig,
}

impl<'a> CategoryPass<'a> {
    fn new(app: &'a Application, cate: &'a Category, config: &'a ExtractorConfig) -> Self {
        Self { app, cate, config }
    }

    /// Binary content must carry the application's cipher key or plaintext
    /// feature and the category keyword, whichever are configured.
    fn passes_gate(&self, raw: &[u8]) -> bool {
        if !self.app.protocol.is_binary() {
            return true;
        }
        [
            self.app.cipher_key.as_ref(),
            self.app.plaintext_feature.as_ref(),
            self.cate.keyword.as_ref(),
        ]
        .into_iter()
        .flatten()
        .all(|pattern| pattern.is_match(raw))
    }

    fn stat_for(&self, rule: &Rule) -> RuleStat {
        let mut stat = RuleStat {
            rule_id: rule.id.clone(),
            url_id: self.cate.attr("UrlId").to_string(),
            host_id: self.app.attr("HostId").to_string(),
            key: rule.rule_key.clone(),
            app_name: self.cate.attr("AppName").to_string(),
            appear: 1,
            ..RuleStat::default()
        };
        if self.app.protocol.is_binary() {
            stat.serv_ip = self.app.attr("Ip").to_string();
            stat.serv_port = self.app.attr("Port").to_string();
        } else {
            stat.host = self.app.attr("Host").to_string();
            stat.url = self.cate.attr("Url").to_string();
        }
        stat
    }

    fn run(&self, msg: &mut Message, stats: Option<&StatsTable>) -> Result<PassOutput> {
        let protocol = msg.protocol;
        let max_inflate = self.config.max_inflate_size;
        let mut out = PassOutput::default();
        let mut shared = Record::new();
        let mut collected = Vec::new();

        for rule in &self.cate.rules {
            let kind = rule.data_src.slice_type(protocol);
            let raw = msg.raw(kind);
            if raw.is_empty() {
                continue;
            }
            if !self.passes_gate(raw) {
                return Err(ExtractError::NotFoundRule);
            }

            let chain = self.cate.codec_for(rule.data_src);
            let decoded = match msg.slice_mut(kind) {
                Some(slice) => slice.decode(&chain, max_inflate),
                None => continue,
            };
            let hit = match decoded {
                Ok(data) => match rule.rule_type {
                    RuleType::Positional => positional::evaluate(
                        rule,
                        data,
                        &mut shared,
                        self.config.output_origin_lbs,
                        max_inflate,
                    ),
                    RuleType::Json => json::evaluate(rule, data, &mut out.records),
                    RuleType::Xml => xml::evaluate(rule, data, &mut out.records),
                    RuleType::F0 => fields::evaluate_f0(rule, data, &mut out.records),
                    RuleType::F1 => fields::evaluate_f1(rule, data, &mut out.records),
                },
                Err(err) => {
                    tracing::debug!(rule = %rule.id, error = %err, "slice decode failed");
                    false
                }
            };

            tracing::trace!(rule = %rule.id, key = %rule.rule_key, hit, "rule evaluated");
            if hit {
                out.hits.push(rule.id.clone());
            }
            if stats.is_some() {
                let mut stat = self.stat_for(rule);
                if hit {
                    stat.hit = 1;
                } else {
                    stat.fail = 1;
                }
                collected.push(stat);
            }
        }

        if !shared.is_empty() {
            out.records.push(shared);
        }
        if let Some(table) = stats {
            table.record_all(collected);
        }
        Ok(out)
    }
}
