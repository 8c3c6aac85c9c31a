//! Media plan producer.
//!
//! Capturing and processing images is left to downstream tooling; this
//! branch only describes which assets the post needs, derived from the
//! media chain config.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::EffectiveConfig;
use crate::domain::{BranchDelta, DraftSections};

use super::{BranchProducer, StageError, StageResult};

pub const MEDIA_KEY: &str = "media";

/// One requested image size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaVariant {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MediaPlanProducer;

impl MediaPlanProducer {
    pub fn new() -> Self {
        Self
    }
}

fn variants(config: &EffectiveConfig) -> StageResult<Vec<MediaVariant>> {
    match config.get("variants") {
        None => Ok(vec![MediaVariant {
            name: "hero".to_string(),
            width: 1200,
            height: 630,
        }]),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| StageError::Fatal(format!("invalid media.variants: {}", e))),
    }
}

#[async_trait]
impl BranchProducer for MediaPlanProducer {
    fn name(&self) -> &str {
        MEDIA_KEY
    }

    fn output_keys(&self) -> Vec<String> {
        vec![MEDIA_KEY.to_string()]
    }

    async fn produce(
        &self,
        draft: &DraftSections,
        config: &EffectiveConfig,
    ) -> StageResult<BranchDelta> {
        let format = config.str("format").unwrap_or("webp");
        let assets: Vec<_> = variants(config)?
            .into_iter()
            .map(|v| {
                json!({
                    "file": format!("{}.{}", v.name, format),
                    "name": v.name,
                    "width": v.width,
                    "height": v.height,
                })
            })
            .collect();

        let mut delta = BranchDelta::new();
        delta.insert(
            MEDIA_KEY.to_string(),
            json!({
                "source_url": config.str("source_url"),
                "viewport": config.get("viewport").cloned(),
                "format": format,
                "assets": assets,
                // One inline image slot per section
                "inline_slots": draft.sections().map(|(name, _)| name.clone()).collect::<Vec<_>>(),
            }),
        );
        Ok(delta)
    }
}
