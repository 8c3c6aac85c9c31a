//! Three-level configuration resolution.
//!
//! Each chain (a stage's config namespace) is resolved by starting from the
//! global defaults, deep-merging the tenant defaults and then the
//! tenant+item override.
//!
//! ## Merge semantics
//!
//! - **Objects**: merged key-wise, recursively
//! - **Scalars and arrays**: the higher layer replaces the lower one wholesale
//! - **Malformed values** (`null`, a non-object chain entry, a non-object
//!   replacing an object) are dropped and reported as warnings
//!
//! Type changes are one-directional: a scalar never replaces a lower
//! layer's object (dropped with a warning), while an object may replace a
//! lower layer's scalar, e.g. `retries: 3` becoming `retries: { attempts: 5 }`.
//!
//! Resolution never fails: a missing layer contributes nothing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::TenantConfig;

/// Chains resolved for every run, in stage order
pub const STANDARD_CHAINS: [&str; 7] = [
    "research",
    "content",
    "seo",
    "media",
    "compliance",
    "publish",
    "review",
];

/// Which level a layer sits at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Global,
    TenantDefault,
    ItemOverride,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Global => "global",
            Self::TenantDefault => "tenant-default",
            Self::ItemOverride => "item-override",
        };
        f.write_str(name)
    }
}

/// One layer: chain name -> config object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigLayer {
    pub chains: BTreeMap<String, Value>,
}

impl ConfigLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, chain: impl Into<String>, value: Value) -> Self {
        self.chains.insert(chain.into(), value);
        self
    }

    pub fn chain(&self, name: &str) -> Option<&Value> {
        self.chains.get(name)
    }

    /// Defaults used when no global config file exists
    pub fn builtin_defaults() -> Self {
        Self::new()
            .with_chain(
                "research",
                json!({
                    "min_populated_fields": 5,
                    "timeout_ms": 120_000,
                    "retries": { "attempts": 3, "base_ms": 400 }
                }),
            )
            .with_chain(
                "content",
                json!({
                    "pattern": "write_review_section",
                    "min_word_count": 1500,
                    "required_sections": ["intro", "licensing", "games", "bonus", "payments", "verdict"],
                    "timeout_ms": 600_000,
                    "retries": { "attempts": 3, "base_ms": 1000 }
                }),
            )
            .with_chain(
                "seo",
                json!({
                    "title_pattern": "{primary_kw} Review {year}",
                    "title_max_length": 60,
                    "meta_description_max_length": 158,
                    "schema_types": ["Review", "Organization"],
                    "timeout_ms": 120_000,
                    "retries": { "attempts": 3, "base_ms": 400 }
                }),
            )
            .with_chain(
                "media",
                json!({
                    "viewport": { "width": 1920, "height": 1080 },
                    "variants": [
                        { "name": "hero", "width": 1200, "height": 630 },
                        { "name": "thumbnail", "width": 400, "height": 300 }
                    ],
                    "format": "webp",
                    "timeout_ms": 180_000,
                    "retries": { "attempts": 3, "base_ms": 500 }
                }),
            )
            .with_chain(
                "compliance",
                json!({
                    "weights": { "affiliate": 0.30, "factual": 0.25, "brand": 0.20, "structure": 0.25 },
                    "publish_threshold": 8.0,
                    "review_threshold": 6.0,
                    "timeout_ms": 60_000
                }),
            )
            .with_chain(
                "publish",
                json!({
                    "default_status": "draft",
                    "timeout_ms": 120_000,
                    "retries": { "attempts": 5, "base_ms": 1000 }
                }),
            )
            .with_chain("review", json!({}))
    }
}

/// Snapshot of every layer one run may read.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub global: ConfigLayer,
    pub tenants: BTreeMap<String, TenantConfig>,
    pub items: BTreeMap<(String, String), ConfigLayer>,
}

impl ConfigLayers {
    pub fn new(global: ConfigLayer) -> Self {
        Self {
            global,
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant: TenantConfig) -> Self {
        self.tenants.insert(tenant.id.clone(), tenant);
        self
    }

    pub fn with_item_override(
        mut self,
        tenant_id: impl Into<String>,
        item_id: impl Into<String>,
        layer: ConfigLayer,
    ) -> Self {
        self.items.insert((tenant_id.into(), item_id.into()), layer);
        self
    }

    pub fn tenant(&self, tenant_id: &str) -> Option<&TenantConfig> {
        self.tenants.get(tenant_id)
    }

    fn item(&self, tenant_id: &str, item_id: &str) -> Option<&ConfigLayer> {
        self.items.get(&(tenant_id.to_string(), item_id.to_string()))
    }
}

/// A malformed value found (and dropped) during resolution
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{layer} layer, chain '{chain}', key '{key}': {reason}")]
pub struct ConfigResolutionWarning {
    pub layer: LayerKind,
    pub chain: String,
    /// Dotted path of the dropped key ("" for the whole chain entry)
    pub key: String,
    pub reason: String,
}

/// Fully merged config for one (tenant, item, chain)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub chain: String,
    pub values: Map<String, Value>,
    #[serde(default)]
    pub warnings: Vec<ConfigResolutionWarning>,
}

impl EffectiveConfig {
    pub fn empty(chain: &str) -> Self {
        Self {
            chain: chain.to_string(),
            values: Map::new(),
            warnings: Vec::new(),
        }
    }

    /// Build directly from a JSON object (tests, ad-hoc callers)
    pub fn from_value(chain: &str, value: Value) -> Self {
        let values = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            chain: chain.to_string(),
            values,
            warnings: Vec::new(),
        }
    }

    /// Dotted-path lookup, e.g. `retries.attempts`
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn u64_or(&self, path: &str, default: u64) -> u64 {
        self.get(path).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn f64_or(&self, path: &str, default: f64) -> f64 {
        self.get(path).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn bool_or(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// String array at `path`; non-string entries are skipped
    pub fn str_list(&self, path: &str) -> Vec<String> {
        self.get(path)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Resolves effective configs from a layer snapshot.
///
/// Owned by a single run; results are cached per (tenant, item, chain).
pub struct ConfigResolver {
    layers: ConfigLayers,
    cache: HashMap<(String, String, String), EffectiveConfig>,
}

impl ConfigResolver {
    pub fn new(layers: ConfigLayers) -> Self {
        Self {
            layers,
            cache: HashMap::new(),
        }
    }

    pub fn layers(&self) -> &ConfigLayers {
        &self.layers
    }

    /// Effective config for one chain
    pub fn resolve(&mut self, tenant_id: &str, item_id: &str, chain: &str) -> EffectiveConfig {
        let key = (tenant_id.to_string(), item_id.to_string(), chain.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let resolved = resolve_chain(&self.layers, tenant_id, item_id, chain);
        for warning in &resolved.warnings {
            warn!(tenant = tenant_id, item = item_id, %warning, "Dropped malformed config value");
        }
        debug!(
            tenant = tenant_id,
            item = item_id,
            chain,
            keys = resolved.values.len(),
            "Resolved effective config"
        );

        self.cache.insert(key, resolved.clone());
        resolved
    }

    /// Resolve the standard chain set
    pub fn resolve_all(&mut self, tenant_id: &str, item_id: &str) -> BTreeMap<String, EffectiveConfig> {
        STANDARD_CHAINS
            .iter()
            .map(|chain| (chain.to_string(), self.resolve(tenant_id, item_id, chain)))
            .collect()
    }
}

fn resolve_chain(layers: &ConfigLayers, tenant_id: &str, item_id: &str, chain: &str) -> EffectiveConfig {
    let mut effective = EffectiveConfig::empty(chain);

    let stack = [
        (LayerKind::Global, Some(&layers.global)),
        (
            LayerKind::TenantDefault,
            layers.tenant(tenant_id).map(|t| &t.chains),
        ),
        (LayerKind::ItemOverride, layers.item(tenant_id, item_id)),
    ];

    for (kind, layer) in stack {
        let Some(entry) = layer.and_then(|l| l.chain(chain)) else {
            continue;
        };
        match entry {
            Value::Object(overlay) => {
                let mut ctx = MergeContext {
                    layer: kind,
                    chain,
                    warnings: &mut effective.warnings,
                };
                deep_merge(&mut effective.values, overlay, "", &mut ctx);
            }
            other => effective.warnings.push(ConfigResolutionWarning {
                layer: kind,
                chain: chain.to_string(),
                key: String::new(),
                reason: format!("chain entry must be an object, found {}", value_kind(other)),
            }),
        }
    }

    effective
}

struct MergeContext<'a> {
    layer: LayerKind,
    chain: &'a str,
    warnings: &'a mut Vec<ConfigResolutionWarning>,
}

impl MergeContext<'_> {
    fn drop_key(&mut self, key: String, reason: String) {
        self.warnings.push(ConfigResolutionWarning {
            layer: self.layer,
            chain: self.chain.to_string(),
            key,
            reason,
        });
    }
}

/// Deep merge `overlay` into `base`
fn deep_merge(
    base: &mut Map<String, Value>,
    overlay: &Map<String, Value>,
    prefix: &str,
    ctx: &mut MergeContext<'_>,
) {
    for (key, value) in overlay {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let base_is_object = matches!(base.get(key), Some(Value::Object(_)));

        match value {
            Value::Null => ctx.drop_key(path, "null values are not allowed".to_string()),
            Value::Object(nested) if base_is_object => {
                if let Some(Value::Object(base_nested)) = base.get_mut(key) {
                    deep_merge(base_nested, nested, &path, ctx);
                }
            }
            Value::Object(nested) => {
                let mut fresh = Map::new();
                deep_merge(&mut fresh, nested, &path, ctx);
                base.insert(key.clone(), Value::Object(fresh));
            }
            other if base_is_object => ctx.drop_key(
                path,
                format!("cannot replace an object with {}", value_kind(other)),
            ),
            other => {
                base.insert(key.clone(), other.clone());
            }
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
