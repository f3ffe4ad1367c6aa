//! JSON extraction.
//!
//! Every object in the document is searched for the rule's mapped field
//! names. An object holding all of them yields a record on its own. An
//! object holding only some of them opens a record that its descendants
//! fill in; the record is kept once every key is present. Siblings never
//! complete each other, and nothing merges into a complete record. An
//! array is walked until its first scalar element.

use super::{strip, Record};
use crate::ir::{KeyDesc, Rule};
use serde_json::{Map, Value};

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn read_object(object: &Map<String, Value>, keys: &[KeyDesc]) -> Record {
    let mut record = Record::new();
    for key in keys {
        let Some(field) = key.mapped.as_deref() else {
            continue;
        };
        let Some(mut value) = object.get(field).and_then(scalar_text) else {
            continue;
        };
        if value.is_empty() || value == "null" {
            continue;
        }
        if key.accept(&mut value) {
            record.insert(key.name.clone(), value);
        }
    }
    record
}

fn walk_members(
    object: &Map<String, Value>,
    keys: &[KeyDesc],
    mut open: Option<&mut Record>,
    out: &mut Vec<Record>,
) {
    for member in object.values().filter(|v| is_container(v)) {
        walk(member, keys, open.as_deref_mut(), out);
    }
}

/// `open` is the partial record of the nearest ancestor still waiting for
/// keys, if any.
fn walk(value: &Value, keys: &[KeyDesc], mut open: Option<&mut Record>, out: &mut Vec<Record>) {
    match value {
        Value::Object(object) => {
            let found = read_object(object, keys);
            if !found.is_empty() && found.len() == keys.len() {
                out.push(found);
                walk_members(object, keys, None, out);
            } else if let Some(record) = open {
                for (k, v) in found {
                    record.entry(k).or_insert(v);
                }
                walk_members(object, keys, Some(record), out);
            } else if found.is_empty() {
                walk_members(object, keys, None, out);
            } else {
                let mut record = found;
                walk_members(object, keys, Some(&mut record), out);
                if record.len() == keys.len() {
                    out.push(record);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if !is_container(item) {
                    break;
                }
                walk(item, keys, open.as_deref_mut(), out);
            }
        }
        _ => {}
    }
}

/// Parse the first JSON value after the rule's head marker. Trailing bytes
/// after that value are ignored.
fn parse_document(data: &[u8]) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_slice(data).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some(value),
        Some(Err(err)) => {
            tracing::trace!(error = %err, "json document rejected");
            None
        }
        None => None,
    }
}

/// Append the complete records found in `data` to `out`. Returns whether
/// any record was added.
pub fn evaluate(rule: &Rule, data: &[u8], out: &mut Vec<Record>) -> bool {
    let view = strip(data, &rule.head, &[]);
    if view.is_empty() {
        return false;
    }
    let Some(root) = parse_document(view) else {
        return false;
    };

    let before = out.len();
    walk(&root, &rule.keys, None, out);
    out.len() > before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_rule(head: &str, pairs: &[(&str, &str)]) -> Rule {
        Rule {
            head: head.as_bytes().to_vec(),
            keys: pairs
                .iter()
                .map(|(name, field)| KeyDesc {
                    mapped: Some(field.to_string()),
                    ..KeyDesc::new(*name)
                })
                .collect(),
            ..Rule::default()
        }
    }

    #[test]
    fn test_complete_objects_in_array() {
        let rule = json_rule("", &[("RELATIONSHIP_NAME", "name"), ("PHONENUM", "tel")]);
        let body = br#"{"list":[{"name":"Li","tel":"13800138000"},{"name":"Wu","tel":"1"},{"name":"Xu","tel":"+86 139-0013-9000"}]}"#;
        let mut out = Vec::new();
        assert!(evaluate(&rule, body, &mut out));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["PHONENUM"], "13800138000");
        assert_eq!(out[1]["RELATIONSHIP_NAME"], "Xu");
        assert_eq!(out[1]["PHONENUM"], "13900139000");
    }

    #[test]
    fn test_descendants_complete_an_open_record() {
        let rule = json_rule("", &[("APP_IMEI", "imei"), ("APP_IMSI", "imsi")]);
        let body = br#"{"imei":"990087495038271","sim":{"card":{"imsi":"460001234567890"}}}"#;
        let mut out = Vec::new();
        assert!(evaluate(&rule, body, &mut out));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["APP_IMEI"], "990087495038271");
        assert_eq!(out[0]["APP_IMSI"], "460001234567890");

        let lonely = br#"{"device":{"imei":"990087495038271"}}"#;
        let mut out = Vec::new();
        assert!(!evaluate(&rule, lonely, &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn test_siblings_do_not_complete_each_other() {
        let rule = json_rule("", &[("RELATIONSHIP_NAME", "name"), ("PHONENUM", "tel")]);
        let mut out = Vec::new();
        assert!(!evaluate(&rule, br#"[{"name":"Li"},{"tel":"13800138000"}]"#, &mut out));
        assert!(!evaluate(
            &rule,
            br#"{"x":{"name":"Wu"},"y":{"tel":"13900139000"}}"#,
            &mut out
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_nothing_merges_below_a_complete_record() {
        let rule = json_rule("", &[("RELATIONSHIP_NAME", "name"), ("PHONENUM", "tel")]);
        let body = br#"{"name":"Li","tel":"13800138000","x":{"name":"Wu"},"y":{"tel":"13900139000"}}"#;
        let mut out = Vec::new();
        assert!(evaluate(&rule, body, &mut out));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["RELATIONSHIP_NAME"], "Li");

        // a descendant that stands on its own is still kept
        let body = br#"{"name":"Li","tel":"13800138000","kid":{"name":"Xu","tel":"13700137000"}}"#;
        let mut out = Vec::new();
        assert!(evaluate(&rule, body, &mut out));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["RELATIONSHIP_NAME"], "Xu");
    }

    #[test]
    fn test_head_marker_and_trailing_text() {
        let rule = json_rule("{\"user\"", &[("EMAIL", "mail")]);
        let body = br#"callback({"user":{"mail":"a.b@example.com"}});"#;
        let mut out = Vec::new();
        assert!(evaluate(&rule, body, &mut out));
        assert_eq!(out[0]["EMAIL"], "a.b@example.com");

        let mut out = Vec::new();
        assert!(!evaluate(&rule, br#"{"other":1}"#, &mut out));
    }

    #[test]
    fn test_scalars_and_nulls() {
        let rule = json_rule("", &[("UID", "uid"), ("VIP", "vip")]);
        let body = br#"[{"uid": 42, "vip": true}, {"uid": null, "vip": "null"}, {"uid": {"n":1}, "vip": false}]"#;
        let mut out = Vec::new();
        assert!(evaluate(&rule, body, &mut out));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["UID"], "42");
        assert_eq!(out[0]["VIP"], "true");
    }

    #[test]
    fn test_array_walk_stops_at_first_scalar() {
        let rule = json_rule("", &[("UID", "uid")]);
        let body = br#"{"list":[{"uid":1},{"uid":2},"end",{"uid":3}]}"#;
        let mut out = Vec::new();
        assert!(evaluate(&rule, body, &mut out));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["UID"], "2");

        let mut out = Vec::new();
        assert!(!evaluate(&rule, br#"[0, {"uid":9}]"#, &mut out));
    }

    #[test]
    fn test_malformed_document() {
        let rule = json_rule("", &[("UID", "uid")]);
        let mut out = Vec::new();
        assert!(!evaluate(&rule, br#"{"uid": "#, &mut out));
        assert!(!evaluate(&rule, b"", &mut out));
    }
}
