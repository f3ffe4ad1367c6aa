//! Rule document compiler.
//!
//! A rule document nests `HOST > URL > RULE > STEP` under a `pIE_RULES`
//! root. The compiler walks the document as a stream of element events,
//! enforcing the nesting with three open/closed flags, and builds a
//! [`RuleTree`]. Elements with other names (`KEY_TYPE`, `MAP`,
//! `RULES_COUNTER`, ...) are ignored.
//!
//! The per-layer builders live in [`ops`].
//!
//! # Examples
//!
//! ```rust
//! use pie_extractor::compiler::Compiler;
//!
//! let doc = br#"<pIE_RULES>
//!   <HOST HostId="1" Host="shop.example.com">
//!     <URL UrlId="10" Url="/order">
//!       <RULE RuleId="100" Key="ORDER_NUM" DataSource="REQUESTCONTENT">
//!         <STEP Prefix="1-orderCode=" />
//!         <STEP Suffix="1-&amp;" />
//!       </RULE>
//!     </URL>
//!   </HOST>
//! </pIE_RULES>"#;
//!
//! let tree = Compiler::compile(doc)?;
//! assert_eq!(tree.summary().rules, 1);
//! # Ok::<(), pie_extractor::ExtractError>(())
//! ```

pub mod ops;

use crate::error::{ExtractError, Result};
use crate::ir::{Attributes, RuleTree};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Element layers the compiler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Application,
    Category,
    Rule,
    Step,
}

impl Layer {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"HOST" => Some(Layer::Application),
            b"URL" => Some(Layer::Category),
            b"RULE" => Some(Layer::Rule),
            b"STEP" => Some(Layer::Step),
            _ => None,
        }
    }
}

/// Incremental 1-based line counter over the document.
struct LineCounter<'a> {
    doc: &'a [u8],
    pos: usize,
    line: u64,
}

impl<'a> LineCounter<'a> {
    fn new(doc: &'a [u8]) -> Self {
        Self { doc, pos: 0, line: 1 }
    }

    fn line_at(&mut self, offset: usize) -> u64 {
        let offset = offset.min(self.doc.len());
        if offset > self.pos {
            let newlines = self.doc[self.pos..offset].iter().filter(|&&b| b == b'\n').count();
            self.line += newlines as u64;
            self.pos = offset;
        }
        self.line
    }
}

/// Builds a [`RuleTree`] from one rule document.
///
/// The compiler is single use; [`Compiler::compile`] is the usual entry
/// point.
#[derive(Debug, Default)]
pub struct Compiler {
    tree: RuleTree,
    app_closed: bool,
    cate_closed: bool,
    rule_closed: bool,
    rule_attrs: Attributes,
    step_attrs: Vec<(String, String)>,
    negative_rules: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            app_closed: true,
            cate_closed: true,
            rule_closed: true,
            ..Self::default()
        }
    }

    /// Compile a complete rule document.
    ///
    /// Structural errors abort the build and are wrapped in
    /// [`ExtractError::AtLine`] with the line of the offending element.
    /// Rules disabled through `IsEffect` are skipped.
    pub fn compile(doc: &[u8]) -> Result<RuleTree> {
        Self::new().run(doc)
    }

    fn run(mut self, doc: &[u8]) -> Result<RuleTree> {
        let mut reader = Reader::from_reader(doc);
        reader
            .trim_text(true)
            .expand_empty_elements(true)
            .check_end_names(false);
        let mut lines = LineCounter::new(doc);

        loop {
            let before = reader.buffer_position();
            let event = reader.read_event();
            let start = before
                + doc
                    .get(before..)
                    .unwrap_or_default()
                    .iter()
                    .take_while(|b| b.is_ascii_whitespace())
                    .count();
            let line = lines.line_at(start);

            let outcome = match event {
                Ok(Event::Start(e)) => self.on_begin(&e),
                Ok(Event::End(e)) => match Layer::from_name(e.name().as_ref()) {
                    Some(layer) => self.on_end(layer),
                    None => Ok(()),
                },
                Ok(Event::Eof) => {
                    if !(self.app_closed && self.cate_closed && self.rule_closed) {
                        return Err(ExtractError::Xml("unclosed element at end of document".into())
                            .at_line(line));
                    }
                    break;
                }
                Ok(_) => Ok(()),
                Err(e) => Err(ExtractError::Xml(e.to_string())),
            };
            outcome.map_err(|err| err.at_line(line))?;
        }

        let summary = self.tree.summary();
        tracing::debug!(
            applications = summary.applications,
            categories = summary.categories,
            rules = summary.rules,
            skipped = self.negative_rules,
            "rule tree compiled"
        );
        Ok(self.tree)
    }

    fn on_begin(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let Some(layer) = Layer::from_name(e.name().as_ref()) else {
            return Ok(());
        };
        let attrs = read_attributes(e)?;
        let layout = |what: &str| Err(ExtractError::InvalidLayout(what.to_string()));

        match layer {
            Layer::Application => {
                if !(self.app_closed && self.cate_closed && self.rule_closed) {
                    return layout("HOST inside another element");
                }
                self.app_closed = false;
                ops::append_application(&mut self.tree, attrs.into_iter().collect())
            }
            Layer::Category => {
                if self.app_closed || !(self.cate_closed && self.rule_closed) {
                    return layout("URL outside HOST");
                }
                self.cate_closed = false;
                ops::append_category(&mut self.tree, attrs.into_iter().collect())
            }
            Layer::Rule => {
                if self.app_closed || self.cate_closed || !self.rule_closed {
                    return layout("RULE outside URL");
                }
                self.rule_closed = false;
                self.rule_attrs = attrs.into_iter().collect();
                Ok(())
            }
            Layer::Step => {
                if self.app_closed || self.cate_closed || self.rule_closed {
                    return layout("STEP outside RULE");
                }
                self.step_attrs.extend(attrs);
                Ok(())
            }
        }
    }

    fn on_end(&mut self, layer: Layer) -> Result<()> {
        let layout = |what: &str| Err(ExtractError::InvalidLayout(what.to_string()));

        match layer {
            Layer::Application => {
                if self.app_closed || !(self.cate_closed && self.rule_closed) {
                    return layout("unbalanced HOST");
                }
                self.app_closed = true;
            }
            Layer::Category => {
                if self.app_closed || self.cate_closed || !self.rule_closed {
                    return layout("unbalanced URL");
                }
                self.cate_closed = true;
            }
            Layer::Rule => {
                if self.app_closed || self.cate_closed || self.rule_closed {
                    return layout("unbalanced RULE");
                }
                self.rule_closed = true;
                let attrs = std::mem::take(&mut self.rule_attrs);
                let steps = std::mem::take(&mut self.step_attrs);
                match ops::append_rule(&mut self.tree, attrs, &steps) {
                    Err(ExtractError::NegativeRule) => self.negative_rules += 1,
                    other => other?,
                }
            }
            Layer::Step => {
                if self.app_closed || self.cate_closed || self.rule_closed {
                    return layout("unbalanced STEP");
                }
            }
        }
        Ok(())
    }
}

/// Attributes of an element in document order, entities resolved.
fn read_attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ExtractError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| ExtractError::Xml(err.to_string()))?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}
