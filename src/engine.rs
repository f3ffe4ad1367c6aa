//! Primary extraction interface.
//!
//! [`Extractor`] owns the active rule tree, the configuration and the
//! statistics table. It is `Send + Sync`; share it behind an `Arc` and call
//! [`Extractor::extract`] from any number of threads while another thread
//! reloads rules.

use crate::compiler::Compiler;
use crate::config::ExtractorConfig;
use crate::error::{ExtractError, Result};
use crate::extract::{self, Extraction};
use crate::ir::RuleTree;
use crate::message::Message;
use crate::stats::StatsTable;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;

/// Rule-driven extraction engine.
///
/// Readers take a snapshot of the rule tree and release the lock before
/// evaluating, so a reload never waits on running extractions and an
/// extraction never sees a half-built tree.
///
/// # Usage Patterns
///
/// ## Single Message
/// ```rust
/// use pie_extractor::Extractor;
///
/// let rules = br#"<pIE_RULES>
///   <HOST HostId="1" Host="shop.example.com">
///     <URL UrlId="10" Url="/order" AppName="shop" Action="ORDER">
///       <RULE RuleId="100" Key="ORDER_NUM" DataSource="REQUESTCONTENT">
///         <STEP Prefix="1-orderCode=" />
///         <STEP Suffix="1-&amp;" />
///       </RULE>
///     </URL>
///   </HOST>
/// </pIE_RULES>"#;
///
/// let extractor = Extractor::from_rules(rules)?;
/// let request = b"POST /order HTTP/1.1\r\nHost: shop.example.com\r\n\
/// Content-Length: 22\r\n\r\norderCode=ABC123&qty=1";
///
/// let out = extractor.extract(request)?;
/// assert_eq!(out.records[0]["ORDER_NUM"], "ABC123");
/// assert_eq!(out.attribute("APP_NAME"), Some("shop"));
/// # Ok::<(), pie_extractor::ExtractError>(())
/// ```
///
/// ## Batch Processing
/// ```rust,ignore
/// let results = extractor.extract_batch(&captures);
/// let hits = results.iter().filter(|r| matches!(r, Ok(out) if !out.is_empty())).count();
/// ```
///
/// ## Hot Reload
/// ```rust,ignore
/// // A rejected document leaves the previous rules active.
/// if let Err(err) = extractor.load_rules(&new_rules) {
///     eprintln!("reload rejected at line {:?}: {err}", err.line());
/// }
/// ```
#[derive(Debug)]
pub struct Extractor {
    tree: RwLock<Arc<RuleTree>>,
    config: ExtractorConfig,
    stats: StatsTable,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    /// An extractor with no rules and the default configuration. Every
    /// message is answered with [`ExtractError::NotFoundRule`] until rules
    /// are loaded.
    pub fn new() -> Self {
        Self::with_config(ExtractorConfig::default())
    }

    pub fn with_config(config: ExtractorConfig) -> Self {
        Self {
            tree: RwLock::new(Arc::new(RuleTree::new())),
            config,
            stats: StatsTable::new(),
        }
    }

    /// Compile `rules` and build an extractor with the default
    /// configuration.
    pub fn from_rules(rules: &[u8]) -> Result<Self> {
        let extractor = Self::new();
        extractor.load_rules(rules)?;
        Ok(extractor)
    }

    /// Compile `rules` and make them the active tree.
    ///
    /// Compilation happens before the lock is taken. On failure the error
    /// carries the line of the offending element and the previous tree stays
    /// active.
    pub fn load_rules(&self, rules: &[u8]) -> Result<()> {
        let tree = match Compiler::compile(rules) {
            Ok(tree) => tree,
            Err(err) => {
                tracing::warn!(error = %err, line = ?err.line(), "rule reload rejected");
                return Err(err);
            }
        };

        let summary = tree.summary();
        *self.tree.write() = Arc::new(tree);
        tracing::debug!(
            applications = summary.applications,
            categories = summary.categories,
            rules = summary.rules,
            "rule tree swapped"
        );
        Ok(())
    }

    /// Read a rule document from disk and load it.
    pub fn load_rules_from_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let doc = std::fs::read(path)
            .map_err(|e| ExtractError::Io(format!("{}: {e}", path.display())))?;
        self.load_rules(&doc)
    }

    /// Snapshot of the active rule tree.
    pub fn rule_tree(&self) -> Arc<RuleTree> {
        Arc::clone(&self.tree.read())
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract from one captured buffer: an FHMF container or a raw HTTP
    /// request.
    pub fn extract(&self, capture: &[u8]) -> Result<Extraction> {
        let mut msg = Message::probe(capture)?;
        self.run(&mut msg)
    }

    /// Extract from an HTTP request and its optional response.
    pub fn extract_pair(&self, request: &[u8], response: Option<&[u8]>) -> Result<Extraction> {
        let mut msg = Message::http_pair(request, response);
        self.run(&mut msg)
    }

    /// Extract from an already normalized message.
    pub fn extract_message(&self, msg: &mut Message) -> Result<Extraction> {
        self.run(msg)
    }

    /// Extract from many captures, in input order. Large batches are spread
    /// over the rayon pool.
    pub fn extract_batch<B>(&self, captures: &[B]) -> Vec<Result<Extraction>>
    where
        B: AsRef<[u8]> + Sync,
    {
        if captures.len() >= self.config.parallel_batch_threshold {
            captures
                .par_iter()
                .map(|capture| self.extract(capture.as_ref()))
                .collect()
        } else {
            captures
                .iter()
                .map(|capture| self.extract(capture.as_ref()))
                .collect()
        }
    }

    /// Drain the statistics table into a JSON array ordered by rule id.
    pub fn stats(&self) -> String {
        self.stats.drain_json()
    }

    /// The statistics table, for callers that want typed entries.
    pub fn stats_table(&self) -> &StatsTable {
        &self.stats
    }

    fn run(&self, msg: &mut Message) -> Result<Extraction> {
        let tree = self.rule_tree();
        let stats = self.config.collect_stats.then_some(&self.stats);
        let outcome = extract::extract(&tree, msg, &self.config, stats);
        if let Err(err) = &outcome {
            tracing::debug!(error = %err, protocol = %msg.protocol, "message not extracted");
        }
        outcome
    }
}
