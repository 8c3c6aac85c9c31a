//! Fabric content generator.
//!
//! Generates the draft one section at a time by calling the `fabric` CLI
//! in subprocess mode. Each call receives a JSON brief on stdin (section
//! name, research fields, locale, word target) and returns the section
//! body on stdout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::core::compliance::structure::DEFAULT_REQUIRED_SECTIONS;
use crate::core::EffectiveConfig;
use crate::domain::{DraftSections, ResearchRecord};

use super::{ContentGenerator, StageError, StageResult};

const DEFAULT_PATTERN: &str = "write_review_section";
const DEFAULT_SECTION_TIMEOUT_MS: u64 = 180_000;

/// Content generator using Fabric in subprocess mode
pub struct FabricContentGenerator {
    /// Path to the fabric binary (default: "fabric")
    binary_path: String,
}

impl Default for FabricContentGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl FabricContentGenerator {
    /// Looks for fabric-ai first (Homebrew install), falls back to fabric
    pub fn new() -> Self {
        let binary_path = if std::process::Command::new("fabric-ai")
            .arg("--help")
            .output()
            .is_ok()
        {
            "fabric-ai".to_string()
        } else {
            "fabric".to_string()
        };

        Self { binary_path }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }

    /// Spawn `fabric -p <pattern>`, pipe the brief to stdin and collect stdout
    async fn execute_subprocess(
        &self,
        pattern: &str,
        input: &str,
        section_timeout: Duration,
    ) -> StageResult<String> {
        let mut child = Command::new(&self.binary_path)
            .args(["-p", pattern])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StageError::Fatal(format!(
                    "failed to spawn {} for pattern '{}': {}",
                    self.binary_path, pattern, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await.map_err(|e| {
                StageError::Retryable(format!("failed to write to fabric stdin: {}", e))
            })?;
            // Drop stdin to signal EOF
        }

        let output = timeout(section_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                StageError::Retryable(format!(
                    "fabric pattern '{}' timed out after {:?}",
                    pattern, section_timeout
                ))
            })?
            .map_err(|e| StageError::Retryable(format!("failed to wait for fabric: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(StageError::Retryable(format!(
                "fabric pattern '{}' failed with exit code {}: {}",
                pattern,
                exit_code,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| StageError::Fatal("fabric output is not valid UTF-8".to_string()))
    }
}

/// Pattern for one section: `patterns.<section>`, then `pattern`
fn pattern_for<'a>(config: &'a EffectiveConfig, section: &str) -> &'a str {
    config
        .str(&format!("patterns.{}", section))
        .or_else(|| config.str("pattern"))
        .unwrap_or(DEFAULT_PATTERN)
}

fn sections_for(config: &EffectiveConfig) -> Vec<String> {
    let configured = config.str_list("required_sections");
    if configured.is_empty() {
        DEFAULT_REQUIRED_SECTIONS.iter().map(|s| s.to_string()).collect()
    } else {
        configured
    }
}

#[async_trait]
impl ContentGenerator for FabricContentGenerator {
    #[instrument(skip(self, research, config), fields(item = %research.item_id))]
    async fn generate(
        &self,
        research: &ResearchRecord,
        config: &EffectiveConfig,
    ) -> StageResult<DraftSections> {
        let sections = sections_for(config);
        let word_target = config.u64_or("min_word_count", 1500) / sections.len().max(1) as u64;
        let section_timeout = Duration::from_millis(
            config.u64_or("section_timeout_ms", DEFAULT_SECTION_TIMEOUT_MS),
        );

        let mut draft = DraftSections::new();
        for section in &sections {
            let pattern = pattern_for(config, section);
            let brief = json!({
                "section": section,
                "item_id": research.item_id,
                "locale": research.locale,
                "word_target": word_target,
                "research": research.fields,
            });

            debug!(section = %section, pattern, "Generating section");
            let body = self
                .execute_subprocess(pattern, &brief.to_string(), section_timeout)
                .await?;
            if body.trim().is_empty() {
                return Err(StageError::Retryable(format!(
                    "fabric returned an empty '{}' section",
                    section
                )));
            }
            draft.insert(section.clone(), body.trim().to_string());
        }

        Ok(draft)
    }
}
