//! Message normalization and content decoding seen from the extractor.

use flate2::write::GzEncoder;
use flate2::Compression;
use pie_extractor::message::fhmf::{Fhmf, FhmfField, OptionType, VERSION};
use pie_extractor::{Extractor, ExtractorConfig, Message, Protocol, SliceType};
use std::io::Write;

const RULES: &[u8] = br#"<pIE_RULES>
  <HOST HostId="5" Host="m.example.com">
    <URL UrlId="50" Url="/inbox" AppName="mail" ResCntCompress="GZIP">
      <RULE RuleId="500" Key="EMAIL" DataSource="RESPONSECONTENT">
        <STEP Prefix="1-&quot;owner&quot;:&quot;" />
        <STEP Suffix="1-&quot;" />
      </RULE>
    </URL>
    <URL UrlId="51" Url="/gb" ReqCntEncode="URL">
      <RULE RuleId="510" Key="NICK" DataSource="REQUESTCONTENT" CharacterSet="GBK">
        <STEP Prefix="1-nick=" />
      </RULE>
    </URL>
  </HOST>
</pIE_RULES>"#;

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn chunked(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in body.chunks(7) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

#[test]
fn test_chunked_gzip_response() {
    let extractor = Extractor::from_rules(RULES).unwrap();
    let body = gzip(br#"{"owner":"box@example.com","count":3}"#);

    let mut response =
        b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    response.extend_from_slice(&chunked(&body));

    let out = extractor
        .extract_pair(
            b"GET /inbox HTTP/1.1\r\nHost: m.example.com\r\n\r\n",
            Some(&response),
        )
        .unwrap();
    assert_eq!(out.records[0]["EMAIL"], "box@example.com");
}

#[test]
fn test_fhmf_http_pair() {
    let extractor = Extractor::from_rules(RULES).unwrap();
    let request = b"GET /inbox HTTP/1.1\r\nHost: m.example.com\r\n\r\n";
    let body = gzip(br#"{"owner":"a@example.com"}"#);
    let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    response.extend_from_slice(&body);

    let capture = Fhmf {
        version: VERSION,
        fields: vec![
            FhmfField::new()
                .with_option(OptionType::MimeType, b"application/http")
                .with_option(OptionType::FileName, b"Request.http")
                .with_payload(request),
            FhmfField::new()
                .with_option(OptionType::MimeType, b"application/http")
                .with_option(OptionType::FileName, b"Response.http")
                .with_payload(&response),
        ],
    }
    .encode()
    .unwrap();

    let out = extractor.extract(&capture).unwrap();
    assert_eq!(out.records[0]["EMAIL"], "a@example.com");
    assert_eq!(out.attribute("HOST_ID"), Some("5"));
}

#[test]
fn test_charset_conversion() {
    let extractor = Extractor::from_rules(RULES).unwrap();
    // "中文" in GBK, percent-encoded
    let body = b"nick=%D6%D0%CE%C4";
    let mut req = format!(
        "POST /gb HTTP/1.1\r\nHost: m.example.com\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    req.extend_from_slice(body);

    let out = extractor.extract(&req).unwrap();
    assert_eq!(out.records[0]["NICK"], "中文");
}

#[test]
fn test_corrupt_content_fails_only_the_rule() {
    let extractor = Extractor::with_config(ExtractorConfig::with_stats());
    extractor.load_rules(RULES).unwrap();

    let out = extractor
        .extract_pair(
            b"GET /inbox HTTP/1.1\r\nHost: m.example.com\r\n\r\n",
            Some(b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\nnot gzip!"),
        )
        .unwrap();
    assert!(out.is_empty());

    let stats: serde_json::Value = serde_json::from_str(&extractor.stats()).unwrap();
    assert_eq!(stats[0]["fail"], 1);
}

#[test]
fn test_message_slices() {
    let mut msg = Message::new(Protocol::Udp);
    msg.set(SliceType::BinReqBody, b"payload".to_vec());
    msg.set(SliceType::HttpHost, b"ignored".to_vec());

    assert_eq!(msg.raw(SliceType::BinReqBody), b"payload");
    assert!(msg.raw(SliceType::HttpHost).is_empty());

    let extractor = Extractor::from_rules(RULES).unwrap();
    assert_eq!(
        extractor.extract_message(&mut msg),
        Err(pie_extractor::ExtractError::IncompleteMessage)
    );
}
