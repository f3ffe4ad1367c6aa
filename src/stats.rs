//! Per-rule evaluation counters.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome counters for one rule plus the attributes identifying it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStat {
    pub rule_id: String,
    pub url_id: String,
    pub host_id: String,
    /// The rule's `Key` attribute.
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serv_ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serv_port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_name: String,
    pub appear: u64,
    pub hit: u64,
    pub fail: u64,
}

impl RuleStat {
    fn absorb(&mut self, other: &RuleStat) {
        self.appear += other.appear;
        self.hit += other.hit;
        self.fail += other.fail;
    }
}

/// Shared statistics table keyed by rule id.
///
/// Entries for the same rule id are merged by adding their counters; the
/// identifying attributes of the first entry are kept.
#[derive(Debug, Default)]
pub struct StatsTable {
    inner: Mutex<BTreeMap<String, RuleStat>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stat: RuleStat) {
        let mut table = self.inner.lock();
        match table.get_mut(&stat.rule_id) {
            Some(existing) => existing.absorb(&stat),
            None => {
                table.insert(stat.rule_id.clone(), stat);
            }
        }
    }

    /// Merge a batch under a single lock acquisition.
    pub fn record_all(&self, stats: impl IntoIterator<Item = RuleStat>) {
        let mut table = self.inner.lock();
        for stat in stats {
            match table.get_mut(&stat.rule_id) {
                Some(existing) => existing.absorb(&stat),
                None => {
                    table.insert(stat.rule_id.clone(), stat);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Take every entry, leaving the table empty. Entries come out ordered
    /// by rule id.
    pub fn drain(&self) -> Vec<RuleStat> {
        let taken = std::mem::take(&mut *self.inner.lock());
        taken.into_values().collect()
    }

    /// Drain the table into a JSON array.
    pub fn drain_json(&self) -> String {
        let stats = self.drain();
        serde_json::to_string(&stats).unwrap_or_else(|_| "[]".to_string())
    }
}
