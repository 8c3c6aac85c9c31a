//! Content flowing through a run: research, draft sections and publish data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Structured facts about one item, as returned by the research provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub item_id: String,
    pub locale: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ResearchRecord {
    pub fn new(item_id: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            locale: locale.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field insert
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Number of populated leaf values.
    ///
    /// Nested objects are walked; `null`, blank strings and empty arrays do
    /// not count.
    pub fn populated_fields(&self) -> usize {
        self.fields.values().map(count_populated).sum()
    }

    /// Flattened string rendering of every leaf value, used for fact checks.
    pub fn facts(&self) -> Vec<String> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            collect_leaves(value, &mut out);
        }
        out
    }
}

fn count_populated(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) if s.trim().is_empty() => 0,
        Value::Array(items) if items.is_empty() => 0,
        Value::Object(map) => map.values().map(count_populated).sum(),
        _ => 1,
    }
}

fn collect_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_leaves(v, out)),
        other => out.push(other.to_string()),
    }
}

/// Named draft sections produced by the content generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftSections(pub BTreeMap<String, String>);

impl DraftSections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.0.insert(name.into(), body.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.0.insert(name.into(), body.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All sections joined with blank lines
    pub fn full_text(&self) -> String {
        self.0.values().cloned().collect::<Vec<_>>().join("\n\n")
    }

    pub fn word_count(&self) -> usize {
        self.0.values().map(|s| s.split_whitespace().count()).sum()
    }
}

/// A branch stage's contribution to the merged draft assets.
pub type BranchDelta = Map<String, Value>;

/// Draft plus merged branch assets, handed to the publisher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalDraft {
    pub sections: DraftSections,
    #[serde(default)]
    pub assets: Map<String, Value>,
}

/// Metadata the publisher receives alongside the draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMetadata {
    pub run_id: Uuid,
    /// Stable per run; publishers use it to make retries idempotent
    pub idempotency_key: String,
    pub tenant_id: String,
    pub item_id: String,
    pub locale: String,
    /// CMS post status (e.g. "draft", "publish")
    pub status: String,
    pub overall_score: Option<f64>,
}

/// Returned by the publisher once the content exists externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub external_id: String,
    pub url: String,
}
