//! Tenant configuration.

use serde::{Deserialize, Serialize};

use crate::core::ConfigLayer;

/// A brand the pipeline produces content for.
///
/// Stored as `config/tenants/<id>.yaml`; `chains` is the tenant-default
/// config layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Defaults to the file stem when omitted
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub display_name: String,

    /// Locales this tenant publishes in (empty = any)
    #[serde(default)]
    pub locales: Vec<String>,

    #[serde(default)]
    pub voice: VoiceProfile,

    #[serde(default)]
    pub chains: ConfigLayer,
}

impl TenantConfig {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            ..Default::default()
        }
    }

    pub fn supports_locale(&self, locale: &str) -> bool {
        self.locales.is_empty() || self.locales.iter().any(|l| l.eq_ignore_ascii_case(locale))
    }
}

/// Brand voice checked by the brand/style validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    #[serde(default = "default_tone")]
    pub tone: String,

    #[serde(default)]
    pub required_terms: Vec<String>,

    #[serde(default)]
    pub banned_phrases: Vec<String>,

    #[serde(default = "default_max_exclamations")]
    pub max_exclamations_per_1000_words: f64,
}

fn default_tone() -> String {
    "neutral".to_string()
}

fn default_max_exclamations() -> f64 {
    5.0
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            required_terms: Vec::new(),
            banned_phrases: Vec::new(),
            max_exclamations_per_1000_words: default_max_exclamations(),
        }
    }
}
