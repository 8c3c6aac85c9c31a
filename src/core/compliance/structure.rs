//! Structure/quality validator.
//!
//! Required sections must be present and non-empty (blocking otherwise);
//! a word count below `min_word_count` is a warning with a proportional
//! penalty.

use async_trait::async_trait;

use crate::domain::{ValidationResult, ValidatorCategory};

use super::{ComplianceInput, Validator, ValidatorError};

pub const DEFAULT_REQUIRED_SECTIONS: [&str; 6] =
    ["intro", "licensing", "games", "bonus", "payments", "verdict"];
pub const DEFAULT_MIN_WORD_COUNT: u64 = 1500;

const MISSING_SECTION_PENALTY: f64 = 2.0;
const MAX_LENGTH_PENALTY: f64 = 4.0;

/// Required sections from the content chain, or the defaults
pub fn required_sections(input: &ComplianceInput) -> Vec<String> {
    let configured = input.content.str_list("required_sections");
    if configured.is_empty() {
        DEFAULT_REQUIRED_SECTIONS.iter().map(|s| s.to_string()).collect()
    } else {
        configured
    }
}

pub struct StructureValidator;

#[async_trait]
impl Validator for StructureValidator {
    fn category(&self) -> ValidatorCategory {
        ValidatorCategory::Structure
    }

    async fn validate(&self, input: &ComplianceInput) -> Result<ValidationResult, ValidatorError> {
        let mut score = 10.0;
        let mut blocking = Vec::new();
        let mut warnings = Vec::new();

        for section in required_sections(input) {
            let present = input
                .draft
                .get(&section)
                .map(|body| !body.trim().is_empty())
                .unwrap_or(false);
            if !present {
                score -= MISSING_SECTION_PENALTY;
                blocking.push(format!("missing required section: {}", section));
            }
        }

        let min_words = input.content.u64_or("min_word_count", DEFAULT_MIN_WORD_COUNT);
        let words = input.draft.word_count() as u64;
        if min_words > 0 && words < min_words {
            let shortfall = 1.0 - words as f64 / min_words as f64;
            score -= MAX_LENGTH_PENALTY * shortfall;
            warnings.push(format!("word count {} is below the minimum of {}", words, min_words));
        }

        let mut result = ValidationResult::new(self.category(), score);
        result.blocking_issues = blocking;
        result.warnings = warnings;
        Ok(result)
    }
}
