//! Delimited (F0) and digit-pair (F1) extraction.

use super::{strip, Record};
use crate::ir::{KeyDesc, Rule};

/// Build a record from one value per key. Every value must be non-empty
/// and accepted by its key.
fn record_from(keys: &[KeyDesc], values: Vec<Vec<u8>>) -> Option<Record> {
    if values.len() != keys.len() {
        return None;
    }
    let mut record = Record::new();
    for (key, raw) in keys.iter().zip(values) {
        if raw.is_empty() {
            return None;
        }
        let mut value = String::from_utf8_lossy(&raw).into_owned();
        if !key.accept(&mut value) {
            return None;
        }
        record.insert(key.name.clone(), value);
    }
    Some(record)
}

/// F0: fields separated by the word delimiter, groups closed by the group
/// delimiter. A trailing group without a closing delimiter is evaluated too.
pub fn evaluate_f0(rule: &Rule, data: &[u8], out: &mut Vec<Record>) -> bool {
    let (Some(group_split), Some(word_split)) = (rule.group_split, rule.word_split) else {
        return false;
    };
    let view = strip(data, &rule.head, &rule.tail);
    if view.is_empty() {
        return false;
    }

    let before = out.len();
    let mut fields: Vec<Vec<u8>> = Vec::new();
    let mut buf = Vec::new();
    let mut close_group = |fields: &mut Vec<Vec<u8>>, buf: &mut Vec<u8>| {
        fields.push(std::mem::take(buf));
        if let Some(record) = record_from(&rule.keys, std::mem::take(fields)) {
            out.push(record);
        }
    };

    for &b in view {
        if b == word_split {
            fields.push(std::mem::take(&mut buf));
        } else if b == group_split {
            close_group(&mut fields, &mut buf);
        } else {
            buf.push(b);
        }
    }
    if !buf.is_empty() || !fields.is_empty() {
        close_group(&mut fields, &mut buf);
    }

    out.len() > before
}

/// F1: alternating runs of non-digits and digits read as name/number
/// pairs. Pairs missing either side are skipped.
pub fn evaluate_f1(rule: &Rule, data: &[u8], out: &mut Vec<Record>) -> bool {
    if rule.keys.len() != 2 {
        return false;
    }
    let view = strip(data, &rule.head, &rule.tail);
    if view.is_empty() {
        return false;
    }

    let before = out.len();
    let mut pos = 0;
    while pos < view.len() {
        let name_len = view[pos..].iter().take_while(|b| !b.is_ascii_digit()).count();
        let digits_at = pos + name_len;
        let digit_len = view[digits_at..].iter().take_while(|b| b.is_ascii_digit()).count();
        let name = &view[pos..digits_at];
        let number = &view[digits_at..digits_at + digit_len];
        pos = digits_at + digit_len;

        if name.is_empty() || number.is_empty() {
            continue;
        }
        if let Some(record) = record_from(&rule.keys, vec![name.to_vec(), number.to_vec()]) {
            out.push(record);
        }
    }

    out.len() > before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_rule() -> Rule {
        Rule {
            keys: vec![
                KeyDesc::new("RELATIONSHIP_NAME"),
                KeyDesc::new("RELATIONSHIP_MOBILEPHONE"),
            ],
            group_split: Some(b';'),
            word_split: Some(b','),
            ..Rule::default()
        }
    }

    #[test]
    fn test_f0_groups() {
        let rule = contact_rule();
        let mut out = Vec::new();
        assert!(evaluate_f0(
            &rule,
            b"Li,13800138000;Wu,12;,13900139000;Xu,a,b;Ma,13700137000",
            &mut out
        ));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["RELATIONSHIP_NAME"], "Li");
        assert_eq!(out[1]["RELATIONSHIP_NAME"], "Ma");
        assert_eq!(out[1]["RELATIONSHIP_MOBILEPHONE"], "13700137000");
    }

    #[test]
    fn test_f0_head_tail() {
        let mut rule = contact_rule();
        rule.head = b"[".to_vec();
        rule.tail = b"]".to_vec();
        let mut out = Vec::new();
        assert!(evaluate_f0(&rule, b"x=[Li,13800138000;]Wu,13900139000;", &mut out));
        // the head marker stays in front of the first field
        assert_eq!(out[0]["RELATIONSHIP_NAME"], "[Li");
        assert_eq!(out.len(), 1);

        let mut out = Vec::new();
        assert!(!evaluate_f0(&rule, b"no markers", &mut out));
    }

    #[test]
    fn test_f1_keys_follow_pair_position() {
        let rule = contact_rule();
        let mut out = Vec::new();
        assert!(evaluate_f1(&rule, "张三13800138000李四13900139000王五12".as_bytes(), &mut out));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["RELATIONSHIP_NAME"], "张三");
        assert_eq!(out[1]["RELATIONSHIP_MOBILEPHONE"], "13900139000");
    }

    #[test]
    fn test_f1_edges() {
        let rule = contact_rule();
        let mut out = Vec::new();
        assert!(!evaluate_f1(&rule, b"13800138000", &mut out));
        assert!(!evaluate_f1(&rule, b"only text", &mut out));
        assert!(!evaluate_f1(&rule, b"", &mut out));
        assert!(out.is_empty());

        let mut one_key = contact_rule();
        one_key.keys.pop();
        assert!(!evaluate_f1(&one_key, b"Li13800138000", &mut out));
    }
}
