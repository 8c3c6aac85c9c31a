//! Template SEO producer.
//!
//! Fills the configured title pattern and trims the intro into a meta
//! description. Keywords and schema types are passed through from config.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::{json, Value};

use crate::core::EffectiveConfig;
use crate::domain::{BranchDelta, DraftSections};

use super::{BranchProducer, StageError, StageResult};

pub const SEO_KEY: &str = "seo";

#[derive(Debug, Clone, Default)]
pub struct TemplateSeoProducer;

impl TemplateSeoProducer {
    pub fn new() -> Self {
        Self
    }
}

/// Cut at a char boundary, preferring the last word break
fn truncate_words(text: &str, max_chars: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= max_chars {
        return text;
    }

    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(idx) if idx > 0 => cut[..idx].to_string(),
        _ => cut,
    }
}

#[async_trait]
impl BranchProducer for TemplateSeoProducer {
    fn name(&self) -> &str {
        SEO_KEY
    }

    fn output_keys(&self) -> Vec<String> {
        vec![SEO_KEY.to_string()]
    }

    async fn produce(
        &self,
        draft: &DraftSections,
        config: &EffectiveConfig,
    ) -> StageResult<BranchDelta> {
        let primary_kw = config
            .str("primary_keyword")
            .ok_or_else(|| StageError::Fatal("seo.primary_keyword is not configured".to_string()))?;

        let pattern = config.str("title_pattern").unwrap_or("{primary_kw} Review {year}");
        let title = pattern
            .replace("{primary_kw}", primary_kw)
            .replace("{year}", &Utc::now().year().to_string());
        let title = truncate_words(&title, config.u64_or("title_max_length", 60) as usize);

        let intro = draft.get("intro").unwrap_or_default();
        let meta_description =
            truncate_words(intro, config.u64_or("meta_description_max_length", 158) as usize);

        let mut keywords = vec![primary_kw.to_string()];
        keywords.extend(config.str_list("secondary_keywords"));

        let schema_types = config
            .get("schema_types")
            .cloned()
            .unwrap_or_else(|| json!(["Review"]));

        let mut delta = BranchDelta::new();
        delta.insert(
            SEO_KEY.to_string(),
            json!({
                "title": title,
                "meta_description": meta_description,
                "keywords": keywords,
                "schema_types": schema_types,
                "slug": slugify(primary_kw),
            }),
        );
        Ok(delta)
    }
}

fn slugify(text: &str) -> Value {
    let slug = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    Value::String(slug)
}
