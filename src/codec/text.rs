//! Text-level decoders: percent-encoding, base64, UTF-16, escape sequences
//! and quoted-printable.

use crate::error::{ExtractError, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

/// Standard alphabet, padding optional on decode, trailing bits ignored.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    Some(hex_val(hi)? << 4 | hex_val(lo)?)
}

fn hex_quad(digits: &[u8]) -> Option<u32> {
    if digits.len() != 4 {
        return None;
    }
    digits
        .iter()
        .try_fold(0u32, |acc, &b| Some(acc << 4 | u32::from(hex_val(b)?)))
}

/// Percent-decoding with `+` as space. A `%` not followed by two hex digits
/// is copied through together with the two bytes after it; a `%` too close
/// to the end is copied alone.
pub fn url_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let b = input[i];
        if b == b'%' && i + 2 < input.len() {
            match hex_pair(input[i + 1], input[i + 2]) {
                Some(v) => out.push(v),
                None => out.extend_from_slice(&input[i..i + 3]),
            }
            i += 3;
            continue;
        }
        out.push(if b == b'+' { b' ' } else { b });
        i += 1;
    }
    out
}

/// Standard-alphabet base64 with zero, one or two `=` pads.
pub fn base64_decode(input: &[u8]) -> Result<Vec<u8>> {
    BASE64.decode(input).map_err(|_| ExtractError::DecodeFailed)
}

pub fn base64_encode(input: &[u8]) -> String {
    BASE64.encode(input)
}

/// UTF-16 to UTF-8. A leading UTF-16 BOM selects the byte order; without
/// one the input is read big-endian. Other BOMs are plain data.
pub fn utf16_decode(input: &[u8]) -> Result<Vec<u8>> {
    let (encoding, body) = match input {
        [0xFF, 0xFE, rest @ ..] => (encoding_rs::UTF_16LE, rest),
        [0xFE, 0xFF, rest @ ..] => (encoding_rs::UTF_16BE, rest),
        _ => (encoding_rs::UTF_16BE, input),
    };
    let (decoded, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        return Err(ExtractError::DecodeFailed);
    }
    Ok(decoded.into_owned().into_bytes())
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Decode a `uHHHH` escape at `input[pos..]` where `pos` points at the four
/// hex digits. Returns the character and the number of bytes consumed after
/// `pos`, pairing a high surrogate with a following `\uHHHH`/`%uHHHH` low one.
fn utf16_escape(input: &[u8], pos: usize) -> Option<(char, usize)> {
    let unit = hex_quad(input.get(pos..pos + 4)?)?;
    if (0xD800..0xDC00).contains(&unit) {
        let next = input.get(pos + 4..pos + 10)?;
        if !(next[0] == b'\\' || next[0] == b'%') || next[1] != b'u' {
            return None;
        }
        let low = hex_quad(&next[2..6])?;
        if !(0xDC00..0xE000).contains(&low) {
            return None;
        }
        let code = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
        return char::from_u32(code).map(|c| (c, 10));
    }
    char::from_u32(unit).map(|c| (c, 4))
}

/// Decode backslash escapes, `%uHHHH` and `&#DDDDD` references to UTF-8.
/// Anything unrecognized is copied one byte at a time.
pub fn escape_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let rest = &input[i..];
        match rest {
            [b'\\', b'\\', ..] => {
                out.push(b'\\');
                i += 2;
            }
            [b'\\', b'\'', ..] => {
                out.push(b'\'');
                i += 2;
            }
            [b'\\', b'"', ..] => {
                out.push(b'"');
                i += 2;
            }
            [b'\\', b'x', hi, lo, ..] if hex_pair(*hi, *lo).is_some() => {
                out.extend(hex_pair(*hi, *lo));
                i += 4;
            }
            [b'\\' | b'%', b'u', ..] => match utf16_escape(input, i + 2) {
                Some((c, used)) => {
                    push_char(&mut out, c);
                    i += 2 + used;
                }
                None => {
                    out.push(rest[0]);
                    i += 1;
                }
            },
            [b'&', b'#', digits @ ..]
                if digits.len() >= 5 && digits[..5].iter().all(u8::is_ascii_digit) =>
            {
                let code = digits[..5]
                    .iter()
                    .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
                match char::from_u32(code) {
                    Some(c) => {
                        push_char(&mut out, c);
                        i += 7;
                        if input.get(i) == Some(&b';') {
                            i += 1;
                        }
                    }
                    None => {
                        out.push(b'&');
                        i += 1;
                    }
                }
            }
            _ => {
                out.push(rest[0]);
                i += 1;
            }
        }
    }
    out
}

/// Quoted-printable decoding. Soft line breaks are dropped and malformed
/// `=` sequences are copied through.
pub fn qp_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match &input[i..] {
            [b'=', b'\r', b'\n', ..] => i += 3,
            [b'=', hi, lo, ..] if hex_pair(*hi, *lo).is_some() => {
                out.extend(hex_pair(*hi, *lo));
                i += 3;
            }
            rest => {
                out.push(rest[0]);
                i += 1;
            }
        }
    }
    out
}

/// Quoted-printable encoding with soft line breaks every 76 columns.
pub fn qp_encode(input: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = Vec::with_capacity(input.len() * 3 / 2);
    let mut column = 0;
    for &b in input {
        let literal = (b' '..=b'~').contains(&b) && b != b'=';
        let width = if literal { 1 } else { 3 };
        if column + width > 75 {
            out.extend_from_slice(b"=\r\n");
            column = 0;
        }
        if literal {
            out.push(b);
        } else {
            out.extend_from_slice(&[b'=', HEX[usize::from(b >> 4)], HEX[usize::from(b & 0x0F)]]);
        }
        column += width;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode(b"a%20b+c"), b"a b c");
        assert_eq!(url_decode(b"%E4%B8%AD"), "中".as_bytes());
        assert_eq!(url_decode(b"100%zz!"), b"100%zz!");
        assert_eq!(url_decode(b"50%"), b"50%");
        assert_eq!(url_decode(b"%4"), b"%4");
        assert_eq!(url_decode(b""), b"");
    }

    #[test]
    fn test_base64_decode() {
        assert_eq!(base64_decode(b"aGVsbG8=").unwrap(), b"hello");
        assert_eq!(base64_decode(b"aGVsbG8").unwrap(), b"hello");
        assert_eq!(base64_decode(b"aGVsbA==").unwrap(), b"hell");
        assert_eq!(base64_decode(b"aGVsbA").unwrap(), b"hell");
        assert_eq!(base64_decode(b"aGVs").unwrap(), b"hel");
        assert_eq!(base64_decode(b"aGVsb"), Err(ExtractError::DecodeFailed));
        assert_eq!(base64_decode(b"aGV*bG8="), Err(ExtractError::DecodeFailed));
    }

    #[test]
    fn test_base64_round_trip_printable() {
        let printable: Vec<u8> = (b' '..=b'~').collect();
        for end in 0..printable.len() {
            let slice = &printable[..end];
            let encoded = base64_encode(slice);
            assert_eq!(base64_decode(encoded.as_bytes()).unwrap(), slice);
        }
    }

    #[test]
    fn test_utf16_decode() {
        assert_eq!(utf16_decode(&[0x4E, 0x2D, 0x00, 0x41]).unwrap(), "中A".as_bytes());
        // little-endian with BOM
        assert_eq!(utf16_decode(&[0xFF, 0xFE, 0x2D, 0x4E]).unwrap(), "中".as_bytes());
        assert_eq!(utf16_decode(&[0xFE, 0xFF, 0x4E, 0x2D]).unwrap(), "中".as_bytes());
        // a UTF-8 BOM is read as UTF-16 code units, never as UTF-8
        assert_eq!(
            utf16_decode(&[0xEF, 0xBB, 0xBF, 0x00, 0x00, 0x41]).unwrap(),
            "\u{EFBB}\u{BF00}A".as_bytes()
        );
        assert_eq!(utf16_decode(&[0x00, 0x41, 0x00]), Err(ExtractError::DecodeFailed));
        // lone surrogate
        assert_eq!(utf16_decode(&[0xD8, 0x00, 0x00, 0x41]), Err(ExtractError::DecodeFailed));
    }

    #[test]
    fn test_escape_backslash_forms() {
        assert_eq!(escape_decode(br#"a\\b\'c\"d"#), br#"a\b'c"d"#);
        assert_eq!(escape_decode(br"\x41\x4g"), br"A\x4g");
        assert_eq!(escape_decode(br"\u4e2d\u6587"), "中文".as_bytes());
        assert_eq!(escape_decode(br"\ud83d\ude00"), "😀".as_bytes());
        assert_eq!(escape_decode(br"\u12"), br"\u12");
        assert_eq!(escape_decode(br"\n"), br"\n");
    }

    #[test]
    fn test_escape_percent_and_entities() {
        assert_eq!(escape_decode(b"%u4e2d!"), "中!".as_bytes());
        assert_eq!(escape_decode(b"&#20013;&#25991;"), "中文".as_bytes());
        assert_eq!(escape_decode(b"&#00065B"), b"AB");
        assert_eq!(escape_decode(b"&#123"), b"&#123");
        assert_eq!(escape_decode(b"100%"), b"100%");
    }

    #[test]
    fn test_qp_decode() {
        assert_eq!(qp_decode(b"caf=C3=A9"), "café".as_bytes());
        assert_eq!(qp_decode(b"soft=\r\nbreak"), b"softbreak");
        assert_eq!(qp_decode(b"a=zzb="), b"a=zzb=");
    }

    #[test]
    fn test_qp_round_trip_printable() {
        let printable: Vec<u8> = (b' '..=b'~').collect();
        let long = printable.repeat(3);
        for input in [&printable[..], &long[..], b"=\t\x00\xff"] {
            let encoded = qp_encode(input);
            assert!(encoded.split(|&b| b == b'\n').all(|line| line.len() <= 77));
            assert_eq!(qp_decode(&encoded), input);
        }
    }
}
