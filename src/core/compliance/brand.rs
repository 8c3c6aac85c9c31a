//! Brand/style validator. Produces warnings only, never blocking issues.

use async_trait::async_trait;

use crate::domain::{ValidationResult, ValidatorCategory};

use super::{contains_term, ComplianceInput, Validator, ValidatorError};

const BANNED_PHRASE_PENALTY: f64 = 1.5;
const MISSING_TERM_PENALTY: f64 = 1.0;
const EXCLAMATION_PENALTY: f64 = 1.0;

pub struct BrandValidator;

#[async_trait]
impl Validator for BrandValidator {
    fn category(&self) -> ValidatorCategory {
        ValidatorCategory::Brand
    }

    async fn validate(&self, input: &ComplianceInput) -> Result<ValidationResult, ValidatorError> {
        let text = input.draft.full_text();
        let lower = text.to_lowercase();
        let voice = &input.voice;

        let mut score = 10.0;
        let mut warnings = Vec::new();

        let banned = voice
            .banned_phrases
            .iter()
            .cloned()
            .chain(input.compliance.str_list("brand.banned_phrases"));
        for phrase in banned {
            if contains_term(&lower, &phrase) {
                score -= BANNED_PHRASE_PENALTY;
                warnings.push(format!("banned phrase used: \"{}\"", phrase));
            }
        }

        for term in &voice.required_terms {
            if !contains_term(&lower, term) {
                score -= MISSING_TERM_PENALTY;
                warnings.push(format!("required brand term missing: \"{}\"", term));
            }
        }

        let words = input.draft.word_count();
        if words > 0 {
            let exclamations = text.matches('!').count();
            let per_thousand = exclamations as f64 * 1000.0 / words as f64;
            if per_thousand > voice.max_exclamations_per_1000_words {
                score -= EXCLAMATION_PENALTY;
                warnings.push(format!(
                    "{:.1} exclamation marks per 1000 words (limit {:.1} for a {} voice)",
                    per_thousand, voice.max_exclamations_per_1000_words, voice.tone
                ));
            }
        }

        let mut result = ValidationResult::new(self.category(), score);
        result.warnings = warnings;
        Ok(result)
    }
}
