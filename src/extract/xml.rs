//! XML extraction over element attributes.
//!
//! Attributes of opened elements collect in a scratch map until the next
//! closing tag. On each close the rule's mapped names are looked up in the
//! scratch map and a record is kept when every key was found and accepted.

use super::{strip, Record};
use crate::ir::Rule;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

fn collect_attributes(
    e: &BytesStart<'_>,
    scratch: &mut HashMap<String, String>,
) -> Result<(), quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        scratch.entry(key).or_insert(value);
    }
    Ok(())
}

fn close_element(rule: &Rule, scratch: &mut HashMap<String, String>, out: &mut Vec<Record>) {
    if scratch.is_empty() {
        return;
    }
    let mut record = Record::new();
    for key in &rule.keys {
        let Some(value) = key.mapped.as_deref().and_then(|name| scratch.get(name)) else {
            continue;
        };
        if value.is_empty() {
            record.clear();
            break;
        }
        let mut value = value.clone();
        if key.accept(&mut value) {
            record.insert(key.name.clone(), value);
        }
    }
    if record.len() == rule.keys.len() {
        out.push(record);
    }
    scratch.clear();
}

/// Append the records found in `data` to `out`. A malformed document stops
/// the walk; records produced before the error are kept.
pub fn evaluate(rule: &Rule, data: &[u8], out: &mut Vec<Record>) -> bool {
    let view = strip(data, &rule.head, &rule.tail);
    if view.is_empty() {
        return false;
    }

    let mut reader = Reader::from_reader(view);
    reader.trim_text(true).expand_empty_elements(true);
    let mut scratch = HashMap::new();
    let before = out.len();

    loop {
        let step = match reader.read_event() {
            Ok(Event::Start(e)) => collect_attributes(&e, &mut scratch),
            Ok(Event::End(_)) => {
                close_element(rule, &mut scratch, out);
                Ok(())
            }
            Ok(Event::Eof) => break,
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = step {
            tracing::trace!(
                error = %err,
                position = reader.buffer_position(),
                "xml walk stopped"
            );
            break;
        }
    }

    out.len() > before
}
