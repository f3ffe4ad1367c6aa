//! Builders for the three rule-document layers.
//!
//! Each function receives the attributes of one element and appends the
//! compiled node to the last open parent in the tree.

use crate::codec::{charset_for_label, CodecChain};
use crate::error::{ExtractError, Result};
use crate::ir::{
    Application, Attributes, Category, DataSource, KeyDesc, Pattern, Rule, RuleTree, RuleType,
    SkipClass, Step,
};
use crate::matcher::wildcard::is_wildcard_pattern;
use crate::matcher::CoordinateSystem;
use crate::message::Protocol;

/// Marker for attribute values written as hex.
const PIE_HEX: &str = "#PIE_HEX#";

const DEFAULT_F_KEYS: [&str; 2] = ["RELATIONSHIP_NAME", "RELATIONSHIP_MOBILEPHONE"];

fn attr<'a>(attrs: &'a Attributes, name: &str) -> &'a str {
    attrs.get(name).map(String::as_str).unwrap_or_default()
}

/// Bytes of a step value, hex-decoding values tagged with `#PIE_HEX#`.
pub(crate) fn pie_hex(value: &str) -> Result<Vec<u8>> {
    match value.strip_prefix(PIE_HEX) {
        Some(digits) if !digits.is_empty() => hex::decode(digits)
            .map_err(|e| ExtractError::InvalidStep(format!("{value}: {e}"))),
        _ => Ok(value.as_bytes().to_vec()),
    }
}

fn codec_pair(attrs: &Attributes, compress: &str, encode: &str) -> Result<CodecChain> {
    let mut chain = CodecChain::parse(attr(attrs, compress))?;
    chain.extend_from_list(attr(attrs, encode))?;
    Ok(chain)
}

fn optional_pattern(bytes: Vec<u8>) -> Result<Option<Pattern>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    Pattern::new(bytes).map(Some)
}

/// Compile a `HOST` element.
pub fn append_application(tree: &mut RuleTree, attrs: Attributes) -> Result<()> {
    let protocol: Protocol = attr(&attrs, "Protocol").parse()?;
    let mut app = Application {
        protocol,
        ..Application::default()
    };
    let index = tree.apps.len();

    if protocol.is_binary() {
        let ip = attr(&attrs, "Ip");
        let port = attr(&attrs, "Port");
        if ip.is_empty() || port.is_empty() {
            return Err(ExtractError::InvalidRule("HOST needs Ip and Port".to_string()));
        }
        let cipher_key = hex::decode(attr(&attrs, "CipherKey"))
            .map_err(|e| ExtractError::InvalidRule(format!("CipherKey: {e}")))?;
        let plaintext = attr(&attrs, "PlaintextFeature").as_bytes().to_vec();
        if cipher_key.is_empty() && plaintext.is_empty() {
            return Err(ExtractError::InvalidRule(
                "HOST needs CipherKey or PlaintextFeature".to_string(),
            ));
        }
        app.cipher_key = optional_pattern(cipher_key)?;
        app.plaintext_feature = optional_pattern(plaintext)?;
        tree.index.entry(format!("{ip}{port}")).or_insert(index);
    } else {
        let host = attr(&attrs, "Host");
        if host.is_empty() {
            return Err(ExtractError::InvalidRule("HOST needs Host".to_string()));
        }
        if is_wildcard_pattern(host) {
            tree.wild_index.push(index);
        } else {
            tree.index.entry(host.to_string()).or_insert(index);
        }
    }

    app.attributes = attrs;
    tree.apps.push(app);
    Ok(())
}

/// Compile a `URL` element into the last application.
pub fn append_category(tree: &mut RuleTree, attrs: Attributes) -> Result<()> {
    let app = tree
        .apps
        .last_mut()
        .ok_or_else(|| ExtractError::InvalidLayout("URL outside HOST".to_string()))?;

    let mut cate = Category {
        req_codec: codec_pair(&attrs, "ReqCntCompress", "ReqCntEncode")?,
        res_codec: codec_pair(&attrs, "ResCntCompress", "ResCntEncode")?,
        ..Category::default()
    };
    let index = app.categories.len();

    if app.protocol.is_binary() {
        let action = attr(&attrs, "Action");
        if action.is_empty() {
            return Err(ExtractError::InvalidRule("URL needs Action".to_string()));
        }
        app.index.entry(action.to_string()).or_insert(index);
        cate.keyword = optional_pattern(attr(&attrs, "Keyword").as_bytes().to_vec())?;
    } else {
        let url = attr(&attrs, "Url");
        if url.is_empty() {
            return Err(ExtractError::InvalidRule("URL needs Url".to_string()));
        }
        if is_wildcard_pattern(url) {
            app.wild_index.push(index);
        } else {
            app.index.entry(url.to_string()).or_insert(index);
        }
    }

    cate.attributes = attrs;
    app.categories.push(cate);
    Ok(())
}

/// Leading signed decimal of `buf` and the offset just past it.
fn leading_int(buf: &[u8]) -> Option<(i64, usize)> {
    let sign_len = usize::from(matches!(buf.first(), Some(b'-' | b'+')));
    let digits = buf[sign_len..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let end = sign_len + digits;
    let value = std::str::from_utf8(&buf[..end]).ok()?.parse().ok()?;
    Some((value, end))
}

/// Parse a `Prefix`/`Suffix` value `"<count>-<pattern>"`. `None` means the
/// step is a no-op.
fn count_pattern(name: &str, value: &str) -> Result<Option<(u32, Pattern)>> {
    let invalid = || ExtractError::InvalidStep(format!("{name}={value}"));
    let buf = pie_hex(value)?;
    let (count, off) = leading_int(&buf).ok_or_else(invalid)?;
    if off + 1 == buf.len() {
        return Ok(None);
    }
    if buf.get(off) != Some(&b'-') {
        return Err(invalid());
    }
    let count = u32::try_from(count).map_err(|_| invalid())?;
    if count == 0 {
        return Ok(None);
    }
    Ok(Some((count, Pattern::new(&buf[off + 1..])?)))
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ExtractError::InvalidStep(format!("{name}={value}")))
}

fn first_byte(name: &str, value: &str) -> Result<u8> {
    value
        .bytes()
        .next()
        .ok_or_else(|| ExtractError::InvalidStep(format!("{name} is empty")))
}

/// Apply one `STEP` attribute to the rule under construction.
fn apply_step(rule: &mut Rule, name: &str, value: &str) -> Result<()> {
    match name {
        "Prefix" | "Suffix" => {
            if let Some((count, pattern)) = count_pattern(name, value)? {
                rule.steps.push(if name == "Prefix" {
                    Step::Prefix { count, pattern }
                } else {
                    Step::Suffix { count, pattern }
                });
            }
        }
        "StartPos" | "EndPos" => {
            let offset: i32 = parse_num(name, value)?;
            if offset != 0 {
                rule.steps.push(if name == "StartPos" {
                    Step::StartPos(offset)
                } else {
                    Step::EndPos(offset)
                });
            }
        }
        "Skip" | "RSkip" => {
            let class = SkipClass::from_attribute(value)
                .ok_or_else(|| ExtractError::InvalidStep(format!("{name}={value}")))?;
            rule.steps.push(if name == "Skip" {
                Step::Skip(class)
            } else {
                Step::RSkip(class)
            });
        }
        "ValueEncode" => rule.value_encode.extend_from_list(value)?,
        "Endian" => rule.big_endian = value.starts_with('1'),
        "TLen" => rule.type_len = parse_num(name, value)?,
        "LLen" => {
            let width: u8 = parse_num(name, value)?;
            if !matches!(width, 1 | 2 | 4 | 8) {
                return Err(ExtractError::InvalidStep(format!("{name}={value}")));
            }
            rule.steps.push(Step::LenLength(width));
        }
        "Index" => {
            rule.index = parse_num(name, value)?;
            if rule.index == 0 {
                return Err(ExtractError::InvalidRule("Index must be positive".to_string()));
            }
        }
        "Type" => rule.tlv_type = pie_hex(value)?,
        "Split" => rule.steps.push(Step::Split(first_byte(name, value)?)),
        "Key" => rule.keys.push(KeyDesc::new(value)),
        "Json" | "Xml" => {
            let key = rule.keys.last_mut().ok_or_else(|| {
                ExtractError::InvalidRule(format!("{name}={value} before any Key"))
            })?;
            if key.mapped.is_some() {
                return Err(ExtractError::InvalidRule(format!(
                    "{} is already mapped",
                    key.name
                )));
            }
            key.mapped = Some(value.to_string());
        }
        "Head" | "JsonHead" | "XmlHead" => rule.head = pie_hex(value)?,
        "Tail" | "XmlEnd" => rule.tail = pie_hex(value)?,
        "GroupSplit" => rule.group_split = Some(first_byte(name, value)?),
        "WordSplit" => rule.word_split = Some(first_byte(name, value)?),
        "Format" | "Unify" => {}
        other => return Err(ExtractError::UndefinedStep(other.to_string())),
    }
    Ok(())
}

fn parse_attr<T: std::str::FromStr>(attrs: &Attributes, name: &str, default: T) -> Result<T> {
    let value = attr(attrs, name);
    if value.is_empty() {
        return Ok(default);
    }
    value
        .trim()
        .parse()
        .map_err(|_| ExtractError::InvalidRule(format!("{name}={value}")))
}

/// Build a rule from its attributes and the ordered attributes of its steps.
pub fn build_rule(attrs: Attributes, step_attrs: &[(String, String)]) -> Result<Rule> {
    let effect = attr(&attrs, "IsEffect");
    if !matches!(effect, "" | "ACTIVE" | "AUTO") {
        return Err(ExtractError::NegativeRule);
    }

    let mut rule = Rule::default();
    for (name, value) in step_attrs {
        if !value.is_empty() {
            apply_step(&mut rule, name, value)?;
        }
    }

    rule.rule_key = attr(&attrs, "Key").to_string();
    if rule.rule_key.is_empty() {
        return Err(ExtractError::InvalidRule("RULE needs Key".to_string()));
    }
    rule.rule_type = RuleType::from_rule_key(&rule.rule_key);
    match rule.rule_type {
        RuleType::Json | RuleType::Xml => {
            if let Some(key) = rule.keys.iter().find(|k| k.mapped.is_none()) {
                return Err(ExtractError::InvalidRule(format!(
                    "{} has no source field",
                    key.name
                )));
            }
        }
        RuleType::F0 | RuleType::F1 => {
            if rule.rule_type == RuleType::F0
                && (rule.group_split.is_none() || rule.word_split.is_none())
            {
                return Err(ExtractError::InvalidRule(
                    "F0 needs GroupSplit and WordSplit".to_string(),
                ));
            }
            if rule.keys.is_empty() {
                rule.keys = DEFAULT_F_KEYS.iter().map(|k| KeyDesc::new(*k)).collect();
            }
            if rule.rule_type == RuleType::F1 && rule.keys.len() != 2 {
                return Err(ExtractError::InvalidRule("F1 takes exactly two keys".to_string()));
            }
        }
        RuleType::Positional => rule.keys = vec![KeyDesc::new(rule.rule_key.clone())],
    }
    if rule.keys.is_empty() {
        return Err(ExtractError::InvalidRule(format!("{} has no keys", rule.rule_key)));
    }

    let source = attr(&attrs, "DataSource");
    rule.data_src = DataSource::from_attribute(source)
        .ok_or_else(|| ExtractError::InvalidRule(format!("DataSource={source}")))?;

    rule.coordinate = CoordinateSystem::from_attribute(attr(&attrs, "Coordinate"));
    rule.confidence = parse_attr(&attrs, "Confidence", rule.confidence)?;
    rule.priority = parse_attr(&attrs, "Priority", rule.priority)?;
    let gid: i32 = parse_attr(&attrs, "Group", -1)?;
    rule.gid = (gid >= 0).then_some(gid);

    let charset = attr(&attrs, "CharacterSet");
    if !charset.is_empty() {
        rule.charset = Some(
            charset_for_label(charset)
                .ok_or_else(|| ExtractError::InvalidRule(format!("CharacterSet={charset}")))?,
        );
    }

    rule.id = attr(&attrs, "RuleId").to_string();
    rule.attributes = attrs;
    Ok(rule)
}

/// Compile a `RULE` element into the last category.
pub fn append_rule(
    tree: &mut RuleTree,
    attrs: Attributes,
    step_attrs: &[(String, String)],
) -> Result<()> {
    let app = tree
        .apps
        .last_mut()
        .ok_or_else(|| ExtractError::InvalidLayout("RULE outside HOST".to_string()))?;
    let binary = app.protocol.is_binary();
    let cate = app
        .categories
        .last_mut()
        .ok_or_else(|| ExtractError::InvalidLayout("RULE outside URL".to_string()))?;

    let rule = build_rule(attrs, step_attrs)?;
    if binary && !rule.data_src.is_content() {
        return Err(ExtractError::InvalidRule(format!(
            "{} reads headers on a binary application",
            rule.rule_key
        )));
    }

    match rule.gid {
        None => cate.rules.push(rule),
        Some(gid) => match cate.gids.get(&gid) {
            Some(&head) => cate.rules[head].sub_rules.push(rule),
            None => {
                cate.gids.insert(gid, cate.rules.len());
                cate.rules.push(rule);
            }
        },
    }
    Ok(())
}
