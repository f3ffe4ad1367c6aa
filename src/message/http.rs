//! HTTP/1.x head parsing into the parts the engine slices on.

use std::borrow::Cow;

const MAX_HEADERS: usize = 64;

/// Borrowed pieces of one HTTP request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpParts<'a> {
    /// Request target as sent, path plus query.
    pub target: Option<&'a [u8]>,
    pub host: Option<&'a [u8]>,
    pub cookie: Option<&'a [u8]>,
    pub user_agent: Option<&'a [u8]>,
    /// Bytes before the body, or the whole buffer when there is no body.
    pub head: &'a [u8],
    pub body: Option<Cow<'a, [u8]>>,
}

impl<'a> HttpParts<'a> {
    /// Path part of the target, before the first `?`.
    pub fn path(&self) -> Option<&'a [u8]> {
        let target = self.target?;
        Some(match target.iter().position(|&b| b == b'?') {
            Some(q) => &target[..q],
            None => target,
        })
    }

    /// Query part of the target, after the first `?`.
    pub fn query(&self) -> Option<&'a [u8]> {
        let target = self.target?;
        target
            .iter()
            .position(|&b| b == b'?')
            .map(|q| &target[q + 1..])
    }
}

#[derive(Default)]
struct HeaderScan<'a> {
    host: Option<&'a [u8]>,
    cookie: Option<&'a [u8]>,
    user_agent: Option<&'a [u8]>,
    content_length: Option<usize>,
    chunked: bool,
}

fn scan_headers<'a>(headers: &[httparse::Header<'a>]) -> HeaderScan<'a> {
    let mut scan = HeaderScan::default();
    let non_empty = |v: &'a [u8]| (!v.is_empty()).then_some(v);
    for header in headers {
        let name = header.name;
        if name.eq_ignore_ascii_case("host") {
            scan.host = non_empty(header.value);
        } else if name.eq_ignore_ascii_case("cookie") {
            scan.cookie = non_empty(header.value);
        } else if name.eq_ignore_ascii_case("user-agent") {
            scan.user_agent = non_empty(header.value);
        } else if name.eq_ignore_ascii_case("content-length") {
            scan.content_length = std::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse().ok());
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            scan.chunked = header
                .value
                .split(|&b| b == b',')
                .any(|v| String::from_utf8_lossy(v).trim().eq_ignore_ascii_case("chunked"));
        }
    }
    scan
}

fn split_body<'a>(data: &'a [u8], header_len: usize, scan: &HeaderScan<'a>) -> (&'a [u8], Option<Cow<'a, [u8]>>) {
    let rest = &data[header_len.min(data.len())..];
    if rest.is_empty() {
        return (data, None);
    }
    let head = &data[..header_len];
    let body = if scan.chunked {
        Cow::Owned(decode_chunked(rest))
    } else {
        match scan.content_length {
            Some(len) if len < rest.len() => Cow::Borrowed(&rest[..len]),
            _ => Cow::Borrowed(rest),
        }
    };
    (head, (!body.is_empty()).then_some(body))
}

/// Head read line by line, for captures httparse will not finish: cut
/// before the blank line, or carrying more than `MAX_HEADERS` headers.
struct LooseHead<'a> {
    start_line: &'a [u8],
    headers: Vec<httparse::Header<'a>>,
    len: usize,
}

fn trim_ows(mut v: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = v {
        v = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = v {
        v = rest;
    }
    v
}

fn loose_head(data: &[u8]) -> LooseHead<'_> {
    let len = data
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or(data.len(), |at| at + 4);
    let mut lines = data[..len]
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));
    let start_line = lines.next().unwrap_or_default();
    let headers = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| {
            let colon = line.iter().position(|&b| b == b':')?;
            let name = std::str::from_utf8(trim_ows(&line[..colon])).ok()?;
            Some(httparse::Header {
                name,
                value: trim_ows(&line[colon + 1..]),
            })
        })
        .collect();
    LooseHead {
        start_line,
        headers,
        len,
    }
}

fn request_parts<'a>(data: &'a [u8], target: &'a [u8], scan: HeaderScan<'a>, header_len: usize) -> Option<HttpParts<'a>> {
    scan.host?;
    let (head, body) = split_body(data, header_len, &scan);
    Some(HttpParts {
        target: Some(target),
        host: scan.host,
        cookie: scan.cookie,
        user_agent: scan.user_agent,
        head,
        body,
    })
}

/// Parse an HTTP request. A head cut before the blank line is read as far
/// as it goes, with the whole buffer as head. Returns `None` when the
/// request line is malformed, or when there is no target or `Host` header.
pub fn parse_request(data: &[u8]) -> Option<HttpParts<'_>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(data) {
        Ok(httparse::Status::Complete(len)) => {
            let target = req.path.map(str::as_bytes).filter(|t| !t.is_empty())?;
            request_parts(data, target, scan_headers(req.headers), len)
        }
        Ok(httparse::Status::Partial) | Err(httparse::Error::TooManyHeaders) => {
            let loose = loose_head(data);
            let target = loose
                .start_line
                .split(|&b| b == b' ')
                .filter(|part| !part.is_empty())
                .nth(1)?;
            request_parts(data, target, scan_headers(&loose.headers), loose.len)
        }
        Err(_) => None,
    }
}

/// Parse an HTTP response. An incomplete head yields the whole buffer as
/// head and no body.
pub fn parse_response(data: &[u8]) -> Option<HttpParts<'_>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    let (scan, header_len) = match resp.parse(data) {
        Ok(httparse::Status::Complete(len)) => (scan_headers(resp.headers), len),
        Ok(httparse::Status::Partial) | Err(httparse::Error::TooManyHeaders) => {
            let loose = loose_head(data);
            (scan_headers(&loose.headers), loose.len)
        }
        Err(_) => return None,
    };

    let (head, body) = split_body(data, header_len, &scan);
    Some(HttpParts {
        cookie: scan.cookie,
        user_agent: scan.user_agent,
        head,
        body,
        ..HttpParts::default()
    })
}

/// Reassemble a chunked body. Decoding stops at the terminating chunk or at
/// the first malformed size line; a truncated final chunk keeps what arrived.
pub fn decode_chunked(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;

    while pos < data.len() {
        let Some(line_len) = data[pos..].windows(2).position(|w| w == b"\r\n") else {
            break;
        };
        let line = &data[pos..pos + line_len];
        let size_field = line.split(|&b| b == b';').next().unwrap_or_default();
        let Some(size) = std::str::from_utf8(size_field)
            .ok()
            .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
        else {
            break;
        };
        pos += line_len + 2;
        if size == 0 {
            break;
        }

        let end = pos.saturating_add(size);
        if end > data.len() {
            out.extend_from_slice(&data[pos..]);
            break;
        }
        out.extend_from_slice(&data[pos..end]);
        pos = end;
        if data.get(pos..pos + 2) != Some(&b"\r\n"[..]) {
            break;
        }
        pos += 2;
    }

    out
}
