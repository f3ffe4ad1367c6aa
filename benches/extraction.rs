//! Extraction benchmarks.
//!
//! Measures rule document compilation at several tree sizes, single
//! message extraction against a large tree, and batch extraction with and
//! without the rayon fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pie_extractor::{Compiler, Extractor, ExtractorConfig};
use std::fmt::Write;

/// A rule document with `hosts` applications of four categories each.
fn rule_document(hosts: usize) -> String {
    let mut doc = String::from("<pIE_RULES>\n");
    for h in 0..hosts {
        let _ = writeln!(doc, r#"<HOST HostId="{h}" Host="app{h}.example.com">"#);
        let _ = writeln!(
            doc,
            r#"<URL UrlId="{h}0" Url="/order" AppName="app{h}" ReqCntEncode="URL">
  <RULE RuleId="{h}00" Key="ORDER_NUM" DataSource="REQUESTCONTENT">
    <STEP Prefix="1-orderCode=" /><STEP Suffix="1-&amp;" />
  </RULE>
  <RULE RuleId="{h}01" Key="PHONENUM" DataSource="REQUESTCONTENT">
    <STEP Prefix="1-tel=" /><STEP Suffix="1-&amp;" />
  </RULE>
</URL>
<URL UrlId="{h}1" Url="/profile">
  <RULE RuleId="{h}10" Key="JSON-PROFILE" DataSource="RESPONSECONTENT">
    <STEP Key="PHONENUM" Json="mobile" /><STEP Key="EMAIL" Json="mail" />
  </RULE>
</URL>
<URL UrlId="{h}2" Url="/contacts">
  <RULE RuleId="{h}20" Key="F0-CONTACTS" DataSource="REQUESTCONTENT">
    <STEP GroupSplit=";" WordSplit="," />
  </RULE>
</URL>
<URL UrlId="{h}3" Url="/static/*">
  <RULE RuleId="{h}30" Key="APP_IMEI" DataSource="URL"><STEP Prefix="1-imei=" /></RULE>
</URL>
</HOST>"#
        );
    }
    doc.push_str("</pIE_RULES>\n");
    doc
}

fn order_request(host: usize) -> Vec<u8> {
    let body = "orderCode=ABC123&tel=13800138000&qty=2";
    format!(
        "POST /order HTTP/1.1\r\nHost: app{host}.example.com\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

fn profile_response() -> Vec<u8> {
    let mut body = String::from(r#"{"items":["#);
    for i in 0..50 {
        if i > 0 {
            body.push(',');
        }
        let _ = write!(body, r#"{{"mobile":"1380013{i:04}","mail":"u{i}@example.com"}}"#);
    }
    body.push_str("]}");
    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for hosts in [10, 100, 1000] {
        let doc = rule_document(hosts);
        group.throughput(Throughput::Bytes(doc.len() as u64));
        group.bench_with_input(BenchmarkId::new("hosts", hosts), &doc, |b, doc| {
            b.iter(|| Compiler::compile(black_box(doc.as_bytes())))
        });
    }
    group.finish();
}

fn bench_single_message(c: &mut Criterion) {
    let extractor = Extractor::from_rules(rule_document(1000).as_bytes()).unwrap();
    let request = order_request(517);
    let profile = b"GET /profile HTTP/1.1\r\nHost: app3.example.com\r\n\r\n".to_vec();
    let response = profile_response();
    let wildcard = b"GET /static/a.js?imei=990087495038271 HTTP/1.1\r\nHost: app9.example.com\r\n\r\n";

    let mut group = c.benchmark_group("single_message");
    group.bench_function("positional", |b| {
        b.iter(|| extractor.extract(black_box(&request)))
    });
    group.bench_function("json_response", |b| {
        b.iter(|| extractor.extract_pair(black_box(&profile), Some(black_box(&response))))
    });
    group.bench_function("wildcard_url", |b| {
        b.iter(|| extractor.extract(black_box(wildcard)))
    });
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let doc = rule_document(200);
    let captures: Vec<Vec<u8>> = (0..512).map(|i| order_request(i % 200)).collect();

    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(captures.len() as u64));
    for (name, threshold) in [("sequential", usize::MAX), ("parallel", 1)] {
        let extractor = Extractor::with_config(ExtractorConfig {
            parallel_batch_threshold: threshold,
            collect_stats: true,
            ..ExtractorConfig::default()
        });
        extractor.load_rules(doc.as_bytes()).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| {
                let results = extractor.extract_batch(black_box(&captures));
                let _ = extractor.stats();
                results
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_single_message, bench_batch);
criterion_main!(benches);
