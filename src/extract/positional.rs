//! Positional extraction: a pipeline of steps that narrows a borrowed view
//! of the decoded slice down to one value.

use super::Record;
use crate::codec::charset_to_utf8;
use crate::ir::{Rule, SkipClass, Step};
use crate::matcher::{convert_str, CoordinateSystem, KeyType};
use std::borrow::Cow;

/// Unsigned integer of `width` bytes at the start of `bytes`.
fn read_length(bytes: &[u8], width: u8, big_endian: bool) -> Option<u64> {
    let field = bytes.get(..usize::from(width))?;
    let mut buf = [0u8; 8];
    let value = if big_endian {
        buf[8 - field.len()..].copy_from_slice(field);
        u64::from_be_bytes(buf)
    } else {
        buf[..field.len()].copy_from_slice(field);
        u64::from_le_bytes(buf)
    };
    Some(value)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Resolve a signed offset against `len`. Negative offsets count from the
/// end, one byte short of it.
fn resolve_offset(offset: i32, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let mut offset = i64::from(offset);
    if offset < 0 {
        offset += len - 1;
    }
    if offset < 0 || offset >= len {
        return None;
    }
    usize::try_from(offset).ok()
}

fn skip_front(view: &[u8], class: SkipClass) -> &[u8] {
    let n = view.iter().take_while(|&&b| class.matches(b)).count();
    &view[n..]
}

fn skip_back(view: &[u8], class: SkipClass) -> &[u8] {
    let n = view.iter().rev().take_while(|&&b| class.matches(b)).count();
    &view[..view.len() - n]
}

/// Length-prefixed value addressed by the rule's TLV tag, or by its index
/// when no tag is configured.
fn tlv_value<'a>(rule: &Rule, view: &'a [u8], width: u8) -> Option<&'a [u8]> {
    let width_len = usize::from(width);
    if !rule.tlv_type.is_empty() {
        let at = find_subslice(view, &rule.tlv_type)? + rule.tlv_type.len();
        let len = usize::try_from(read_length(view.get(at..)?, width, rule.big_endian)?).ok()?;
        let start = at + width_len;
        return view.get(start..start.checked_add(len)?);
    }

    let mut pos = 0usize;
    let mut value = None;
    for _ in 0..rule.index {
        pos = pos.checked_add(rule.type_len)?;
        let len = usize::try_from(read_length(view.get(pos..)?, width, rule.big_endian)?).ok()?;
        pos += width_len;
        let end = pos.checked_add(len)?;
        value = Some(view.get(pos..end)?);
        pos = end;
    }
    value
}

/// The `index`-th `sep`-delimited segment, ignoring one leading separator.
fn split_segment(view: &[u8], sep: u8, index: u32) -> &[u8] {
    let mut view = view.strip_prefix(&[sep]).unwrap_or(view);
    for _ in 0..index {
        match view.iter().position(|&b| b == sep) {
            Some(p) => view = &view[p + 1..],
            None => return &[],
        }
    }
    match view.iter().position(|&b| b == sep) {
        Some(p) => &view[..p],
        None => view,
    }
}

/// Run the step pipeline. `None` means the rule did not match.
pub fn run_steps<'a>(rule: &Rule, data: &'a [u8]) -> Option<&'a [u8]> {
    let mut view = data;
    for step in &rule.steps {
        if view.is_empty() {
            return None;
        }
        view = match step {
            Step::Prefix { count, pattern } => {
                for _ in 0..*count {
                    let (_, end) = pattern.find(view)?;
                    view = &view[end..];
                }
                view
            }
            Step::Suffix { count, pattern } => {
                let mut searched = 0;
                let mut cut = 0;
                for _ in 0..*count {
                    let (start, end) = pattern.find(&view[searched..])?;
                    cut = searched + start;
                    searched += end.max(start + 1).min(view.len() - searched);
                }
                &view[..cut]
            }
            Step::StartPos(offset) => &view[resolve_offset(*offset, view.len())?..],
            Step::EndPos(offset) => &view[..resolve_offset(*offset, view.len())?],
            Step::Skip(class) => skip_front(view, *class),
            Step::RSkip(class) => skip_back(view, *class),
            Step::LenLength(width) => tlv_value(rule, view, *width)?,
            Step::Split(sep) => split_segment(view, *sep, rule.index),
        };
    }
    Some(view)
}

/// Extract, decode and validate the single value of a positional rule.
pub fn extract_value(rule: &Rule, data: &[u8], max_inflate_size: usize) -> Option<String> {
    let view = run_steps(rule, data).filter(|v| !v.is_empty())?;

    let bytes: Cow<'_, [u8]> = if rule.value_encode.is_empty() {
        Cow::Borrowed(view)
    } else {
        Cow::Owned(rule.value_encode.apply(view, max_inflate_size).ok()?)
    };
    let mut value = match rule.charset {
        Some(encoding) => charset_to_utf8(&bytes, encoding).ok()?,
        None => String::from_utf8_lossy(&bytes).into_owned(),
    };

    let key = rule.keys.first()?;
    if value.is_empty() || !key.accept(&mut value) || value.is_empty() {
        return None;
    }
    Some(value)
}

/// Convert a group's lon/lat pair to BD09 in place. Returns `false` when
/// the group must be dropped.
fn normalize_coordinates(rule: &Rule, values: &mut Record) -> bool {
    let axis = |wanted: KeyType| {
        rule.group()
            .find(|r| r.keys.first().map(|k| k.key_type) == Some(wanted))
    };
    let lon_rule = axis(KeyType::Longitude);
    let lat_rule = axis(KeyType::Latitude);
    let Some(source) = lon_rule.or(lat_rule) else {
        return true;
    };
    let system = source.coordinate;
    if matches!(system, CoordinateSystem::Bd09 | CoordinateSystem::Unknown) {
        return true;
    }

    let (Some(lon_rule), Some(lat_rule)) = (lon_rule, lat_rule) else {
        tracing::trace!(rule_id = %rule.id, "coordinate without its partner axis");
        return false;
    };
    let lon_key = &lon_rule.keys[0].name;
    let lat_key = &lat_rule.keys[0].name;
    let (Some(lon), Some(lat)) = (values.get(lon_key), values.get(lat_key)) else {
        return false;
    };
    match convert_str(system, CoordinateSystem::Bd09, lon, lat) {
        Some((lon, lat)) => {
            values.insert(lon_key.clone(), lon);
            values.insert(lat_key.clone(), lat);
            true
        }
        None => false,
    }
}

/// Evaluate a positional rule and its group members against `data`,
/// merging the values into `shared` without overwriting earlier keys.
pub fn evaluate(
    rule: &Rule,
    data: &[u8],
    shared: &mut Record,
    output_origin_lbs: bool,
    max_inflate_size: usize,
) -> bool {
    let mut values = Record::new();
    for member in rule.group() {
        let Some(key) = member.keys.first() else {
            return false;
        };
        match extract_value(member, data, max_inflate_size) {
            Some(value) => {
                values.insert(key.name.clone(), value);
            }
            None => return false,
        }
    }

    if !output_origin_lbs && !normalize_coordinates(rule, &mut values) {
        return false;
    }
    for (key, value) in values {
        shared.entry(key).or_insert(value);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecChain;
    use crate::ir::{KeyDesc, Pattern};

    fn rule(key: &str, steps: Vec<Step>) -> Rule {
        Rule {
            rule_key: key.to_string(),
            keys: vec![KeyDesc::new(key)],
            steps,
            ..Rule::default()
        }
    }

    fn prefix(count: u32, p: &str) -> Step {
        Step::Prefix {
            count,
            pattern: Pattern::new(p.as_bytes()).unwrap(),
        }
    }

    fn suffix(count: u32, p: &str) -> Step {
        Step::Suffix {
            count,
            pattern: Pattern::new(p.as_bytes()).unwrap(),
        }
    }

    #[test]
    fn test_prefix_suffix() {
        let r = rule("ORDER_NUM", vec![prefix(1, "<orderCode>"), suffix(1, "<")]);
        assert_eq!(
            extract_value(&r, b"foo=<orderCode>ABC123</orderCode>", 1024).as_deref(),
            Some("ABC123")
        );
        assert_eq!(extract_value(&r, b"nothing here", 1024), None);

        let r = rule("K", vec![prefix(2, "="), suffix(2, ";")]);
        assert_eq!(extract_value(&r, b"a=b=c;d;e", 1024).as_deref(), Some("c;d"));
    }

    #[test]
    fn test_offsets() {
        let r = rule("K", vec![Step::StartPos(2), Step::EndPos(3)]);
        assert_eq!(extract_value(&r, b"abcdefgh", 1024).as_deref(), Some("cde"));

        // negative offsets count from one short of the end
        let r = rule("K", vec![Step::StartPos(-3)]);
        assert_eq!(extract_value(&r, b"abcdefgh", 1024).as_deref(), Some("efgh"));
        let r = rule("K", vec![Step::EndPos(-2)]);
        assert_eq!(extract_value(&r, b"abcdefgh", 1024).as_deref(), Some("abcde"));

        let r = rule("K", vec![Step::StartPos(8)]);
        assert_eq!(extract_value(&r, b"abcdefgh", 1024), None);
        let r = rule("K", vec![Step::EndPos(-9)]);
        assert_eq!(extract_value(&r, b"abcdefgh", 1024), None);
    }

    #[test]
    fn test_skip() {
        let r = rule(
            "K",
            vec![Step::Skip(SkipClass::Digit), Step::RSkip(SkipClass::LowLetter)],
        );
        assert_eq!(extract_value(&r, b"123ABCdef", 1024).as_deref(), Some("ABC"));
        let r = rule("K", vec![Step::Skip(SkipClass::Letter)]);
        assert_eq!(extract_value(&r, b"abcXYZ", 1024), None);
    }

    #[test]
    fn test_tlv_by_type() {
        let mut r = rule("K", vec![Step::LenLength(2)]);
        r.tlv_type = vec![0xAA];
        r.big_endian = true;
        let data = [0x00, 0xAA, 0x00, 0x03, b'x', b'y', b'z', b'!'];
        assert_eq!(extract_value(&r, &data, 1024).as_deref(), Some("xyz"));

        r.big_endian = false;
        // little-endian 0x0300 runs past the buffer
        assert_eq!(extract_value(&r, &data, 1024), None);
        // length field cut short
        assert_eq!(extract_value(&r, &[0xAA, 0x01], 1024), None);
    }

    #[test]
    fn test_tlv_by_index() {
        let mut r = rule("K", vec![Step::LenLength(1)]);
        r.type_len = 1;
        r.index = 2;
        let data = [0x01, 2, b'a', b'b', 0x02, 3, b'c', b'd', b'e'];
        assert_eq!(extract_value(&r, &data, 1024).as_deref(), Some("cde"));

        r.index = 3;
        assert_eq!(extract_value(&r, &data, 1024), None);
        r.index = 0;
        assert_eq!(extract_value(&r, &data, 1024), None);
    }

    #[test]
    fn test_split() {
        let mut r = rule("K", vec![Step::Split(b'|')]);
        assert_eq!(extract_value(&r, b"|a|b|c", 1024).as_deref(), Some("a"));
        r.index = 2;
        assert_eq!(extract_value(&r, b"|a|b|c", 1024).as_deref(), Some("c"));
        r.index = 3;
        assert_eq!(extract_value(&r, b"|a|b|c", 1024), None);
    }

    #[test]
    fn test_value_encode_charset_and_filter() {
        let mut r = rule("APP_IMEI", vec![prefix(1, "imei=")]);
        r.value_encode = CodecChain::parse("BASE64").unwrap();
        // "990087495038271" base64 encoded
        assert_eq!(
            extract_value(&r, b"imei=OTkwMDg3NDk1MDM4Mjcx", 1024).as_deref(),
            Some("990087495038271")
        );
        assert_eq!(extract_value(&r, b"imei=MTIz", 1024), None);

        let mut r = rule("NAME", vec![prefix(1, "n=")]);
        r.charset = Some(encoding_rs::GBK);
        assert_eq!(extract_value(&r, b"n=\xd6\xd0", 1024).as_deref(), Some("中"));
    }

    #[test]
    fn test_group_all_or_nothing() {
        let mut head = rule("APP_IMEI", vec![prefix(1, "imei="), suffix(1, "&")]);
        head.sub_rules.push(rule("APP_IMSI", vec![prefix(1, "imsi="), suffix(1, "&")]));
        let mut shared = Record::new();

        assert!(!evaluate(&head, b"imei=990087495038271&", &mut shared, false, 1024));
        assert!(shared.is_empty());

        let body = b"imei=990087495038271&imsi=460001234567890&";
        assert!(evaluate(&head, body, &mut shared, false, 1024));
        assert_eq!(shared["APP_IMEI"], "990087495038271");
        assert_eq!(shared["APP_IMSI"], "460001234567890");
    }

    #[test]
    fn test_shared_record_keeps_first_value() {
        let r = rule("K", vec![prefix(1, "k=")]);
        let mut shared = Record::new();
        shared.insert("K".to_string(), "first".to_string());
        assert!(evaluate(&r, b"k=second", &mut shared, false, 1024));
        assert_eq!(shared["K"], "first");
    }

    fn lonlat_group(system: CoordinateSystem) -> Rule {
        let mut lon = rule("APP_LONGITUDE", vec![prefix(1, "lon="), suffix(1, "&")]);
        lon.coordinate = system;
        let mut lat = rule("APP_LATITUDE", vec![prefix(1, "lat="), suffix(1, "&")]);
        lat.coordinate = system;
        lon.sub_rules.push(lat);
        lon
    }

    #[test]
    fn test_coordinates_converted_jointly() {
        let body = b"lon=116.397128&lat=39.916527&";
        let mut shared = Record::new();
        assert!(evaluate(&lonlat_group(CoordinateSystem::Gcj02), body, &mut shared, false, 1024));
        let lon: f64 = shared["APP_LONGITUDE"].parse().unwrap();
        let lat: f64 = shared["APP_LATITUDE"].parse().unwrap();
        assert!((lon - 116.403).abs() < 0.01, "{lon}");
        assert!((lat - 39.922).abs() < 0.01, "{lat}");

        let mut origin = Record::new();
        assert!(evaluate(&lonlat_group(CoordinateSystem::Gcj02), body, &mut origin, true, 1024));
        assert_eq!(origin["APP_LONGITUDE"], "116.397128");

        let mut bd = Record::new();
        assert!(evaluate(&lonlat_group(CoordinateSystem::Bd09), body, &mut bd, false, 1024));
        assert_eq!(bd["APP_LATITUDE"], "39.916527");
    }

    #[test]
    fn test_coordinate_without_partner_is_dropped() {
        let mut lon = rule("APP_LONGITUDE", vec![prefix(1, "lon="), suffix(1, "&")]);
        lon.coordinate = CoordinateSystem::Wgs84;
        let mut shared = Record::new();
        assert!(!evaluate(&lon, b"lon=116.39&", &mut shared, false, 1024));
        assert!(shared.is_empty());

        lon.coordinate = CoordinateSystem::Unknown;
        assert!(evaluate(&lon, b"lon=116.39&", &mut shared, false, 1024));
        assert_eq!(shared["APP_LONGITUDE"], "116.39");
    }
}
