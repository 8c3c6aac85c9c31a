//! YAML-backed config store.
//!
//! Layout under the store root:
//!
//! ```text
//! global.yaml                   # global defaults (built-ins when absent)
//! tenants/<tenant>.yaml         # TenantConfig, `chains` is the tenant layer
//! overrides/<tenant>/<item>.yaml
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::debug;

use crate::core::{ConfigLayer, ConfigLayers};
use crate::domain::TenantConfig;

use super::{classify_io, ConfigStore, StageError, StageResult};

/// Config layers stored as YAML files
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn global_path(&self) -> PathBuf {
        self.root.join("global.yaml")
    }

    pub fn tenant_path(&self, tenant_id: &str) -> PathBuf {
        self.root.join("tenants").join(format!("{}.yaml", tenant_id))
    }

    pub fn override_path(&self, tenant_id: &str, item_id: &str) -> PathBuf {
        self.root
            .join("overrides")
            .join(tenant_id)
            .join(format!("{}.yaml", item_id))
    }

    /// Set one key in a tenant+item override, creating the file if needed.
    ///
    /// `key` is dotted (`retries.attempts`). The file is rewritten through a
    /// temporary file so concurrent loads never see a partial document.
    pub async fn write_override(
        &self,
        tenant_id: &str,
        item_id: &str,
        chain: &str,
        key: &str,
        value: Value,
    ) -> Result<PathBuf> {
        let path = self.override_path(tenant_id, item_id);
        let mut layer: ConfigLayer = read_yaml(&path).await?.unwrap_or_default();

        let entry = layer.chains.entry(chain.to_string()).or_insert(Value::Null);
        set_dotted(entry, key, value);

        let yaml = serde_yaml::to_string(&layer).context("Failed to serialize override")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(path)
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load_layers(&self, tenant_id: &str, item_id: &str) -> StageResult<ConfigLayers> {
        let global = read_yaml::<ConfigLayer>(&self.global_path())
            .await?
            .unwrap_or_else(ConfigLayer::builtin_defaults);
        let mut layers = ConfigLayers::new(global);

        if let Some(mut tenant) = read_yaml::<TenantConfig>(&self.tenant_path(tenant_id)).await? {
            if tenant.id.is_empty() {
                tenant.id = tenant_id.to_string();
            }
            if tenant.id != tenant_id {
                return Err(StageError::Fatal(format!(
                    "tenant file for '{}' declares id '{}'",
                    tenant_id, tenant.id
                )));
            }
            layers = layers.with_tenant(tenant);
        }

        if let Some(layer) = read_yaml::<ConfigLayer>(&self.override_path(tenant_id, item_id)).await? {
            layers = layers.with_item_override(tenant_id, item_id, layer);
        }

        debug!(tenant_id, item_id, root = %self.root.display(), "Config layers loaded");
        Ok(layers)
    }
}

/// Missing or empty files are `None`; unparseable files are permanent failures
async fn read_yaml<T: DeserializeOwned>(path: &Path) -> StageResult<Option<T>> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(classify_io(&e, &format!("read {}", path.display()))),
    };

    if text.trim().is_empty() {
        return Ok(None);
    }

    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|e| StageError::Fatal(format!("invalid config {}: {}", path.display(), e)))
}

/// Assign `value` at a dotted path, replacing non-object intermediates
fn set_dotted(target: &mut Value, key: &str, value: Value) {
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    set_path(target, &parts, value);
}

fn set_path(target: &mut Value, parts: &[&str], value: Value) {
    match parts.split_first() {
        None => *target = value,
        Some((head, rest)) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                let child = map.entry(head.to_string()).or_insert(Value::Null);
                set_path(child, rest, value);
            }
        }
    }
}
