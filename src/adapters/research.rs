//! File-backed research store.
//!
//! Looks for `<root>/<item>/<locale>.json` first, then `<root>/<item>.json`.
//! The file holds the research fields as one JSON object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::debug;

use crate::domain::ResearchRecord;

use super::{classify_io, ResearchProvider, StageError, StageResult};

#[derive(Debug, Clone)]
pub struct FileResearchProvider {
    root: PathBuf,
}

impl FileResearchProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, item_id: &str, locale: &str) -> [PathBuf; 2] {
        [
            self.root.join(item_id).join(format!("{}.json", locale)),
            self.root.join(format!("{}.json", item_id)),
        ]
    }
}

#[async_trait]
impl ResearchProvider for FileResearchProvider {
    async fn fetch(&self, item_id: &str, locale: &str) -> StageResult<ResearchRecord> {
        for path in self.candidates(item_id, locale) {
            let text = match fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(classify_io(&e, &format!("read {}", path.display()))),
            };

            let fields = match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(fields)) => fields,
                Ok(_) => {
                    return Err(StageError::Fatal(format!(
                        "research file {} is not a JSON object",
                        path.display()
                    )))
                }
                Err(e) => {
                    return Err(StageError::Fatal(format!(
                        "invalid research file {}: {}",
                        path.display(),
                        e
                    )))
                }
            };

            debug!(item_id, locale, path = %path.display(), fields = fields.len(), "Research loaded");
            return Ok(ResearchRecord {
                item_id: item_id.to_string(),
                locale: locale.to_string(),
                fields,
            });
        }

        Err(StageError::Fatal(format!(
            "no research found for item '{}' ({})",
            item_id, locale
        )))
    }
}
