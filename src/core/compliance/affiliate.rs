//! Affiliate/regulatory validator.
//!
//! Required disclaimers (age gate, responsible gambling, affiliate
//! disclosure, plus jurisdiction and tenant extras) cost 2 points each when
//! missing. Prohibited claims are blocking and cost 3 points each.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::domain::{ValidationResult, ValidatorCategory};

use super::{contains_term, ComplianceInput, Validator, ValidatorError};

const MISSING_DISCLAIMER_PENALTY: f64 = 2.0;
const PROHIBITED_CLAIM_PENALTY: f64 = 3.0;

const DISCLAIMER_PATTERNS: &[(&str, &str)] = &[
    ("age verification", r"(?i)\b(18|21)\+|\bover (18|21)\b|\badults only\b"),
    (
        "responsible gambling",
        r"(?i)gamble responsibly|responsible (gambling|gaming)|problem gambling|begambleaware|gambleaware",
    ),
    (
        "affiliate disclosure",
        r"(?i)\baffiliate\b|\bcommission\b|\bpartner links?\b",
    ),
];

const PROHIBITED_PATTERNS: &[(&str, &str)] = &[
    ("guaranteed win", r"(?i)\bguaranteed (to )?wins?\b|\bsure (thing|wins?)\b"),
    ("cannot lose", r"(?i)\b(cannot|can't|can not|won't) lose\b"),
    ("risk-free", r"(?i)\brisk[- ]free\b"),
    (
        "guaranteed profit",
        r"(?i)\bguaranteed (profits?|returns?|income|money)\b",
    ),
];

type Patterns = Vec<(&'static str, Regex)>;

fn compile(patterns: &'static [(&'static str, &'static str)]) -> Result<Patterns, String> {
    patterns
        .iter()
        .map(|(name, pattern)| {
            Regex::new(pattern)
                .map(|re| (*name, re))
                .map_err(|e| format!("pattern '{}': {}", name, e))
        })
        .collect()
}

fn disclaimer_patterns() -> Result<&'static Patterns, ValidatorError> {
    static CELL: OnceLock<Result<Patterns, String>> = OnceLock::new();
    CELL.get_or_init(|| compile(DISCLAIMER_PATTERNS))
        .as_ref()
        .map_err(|e| ValidatorError::Config(e.clone()))
}

fn prohibited_patterns() -> Result<&'static Patterns, ValidatorError> {
    static CELL: OnceLock<Result<Patterns, String>> = OnceLock::new();
    CELL.get_or_init(|| compile(PROHIBITED_PATTERNS))
        .as_ref()
        .map_err(|e| ValidatorError::Config(e.clone()))
}

/// Extra rules derived from the locale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jurisdiction {
    pub code: &'static str,
    pub required: &'static [&'static str],
    pub prohibited: &'static [&'static str],
}

const UK: Jurisdiction = Jurisdiction {
    code: "UK",
    required: &["gambleaware"],
    prohibited: &["free money"],
};

const DE: Jurisdiction = Jurisdiction {
    code: "DE",
    required: &["18+"],
    prohibited: &["sicher gewinnen", "garantierter gewinn"],
};

const US: Jurisdiction = Jurisdiction {
    code: "US",
    required: &["21+"],
    prohibited: &["sure bet"],
};

/// Jurisdiction for a locale like `en-GB`, if one applies
pub fn jurisdiction_for(locale: &str) -> Option<Jurisdiction> {
    let lower = locale.to_lowercase();
    let mut parts = lower.split('-');
    let language = parts.next().unwrap_or_default();
    let region = parts.next().unwrap_or_default();

    match (language, region) {
        (_, "gb") | (_, "uk") => Some(UK),
        ("de", _) => Some(DE),
        (_, "us") => Some(US),
        _ => None,
    }
}

pub struct AffiliateValidator;

#[async_trait]
impl Validator for AffiliateValidator {
    fn category(&self) -> ValidatorCategory {
        ValidatorCategory::Affiliate
    }

    async fn validate(&self, input: &ComplianceInput) -> Result<ValidationResult, ValidatorError> {
        let text = input.draft.full_text();
        let lower = text.to_lowercase();
        let jurisdiction = jurisdiction_for(&input.locale);

        let mut missing: Vec<String> = Vec::new();
        let mut violations: Vec<String> = Vec::new();

        for (name, pattern) in disclaimer_patterns()? {
            if !pattern.is_match(&text) {
                missing.push(name.to_string());
            }
        }

        let extra_required = jurisdiction
            .iter()
            .flat_map(|j| j.required.iter().map(|t| t.to_string()))
            .chain(input.compliance.str_list("required_disclaimers"));
        for term in extra_required {
            if !contains_term(&lower, &term) {
                missing.push(term);
            }
        }

        for (name, pattern) in prohibited_patterns()? {
            if let Some(found) = pattern.find(&text) {
                violations.push(format!("{} (\"{}\")", name, found.as_str()));
            }
        }

        let extra_prohibited = jurisdiction
            .iter()
            .flat_map(|j| j.prohibited.iter().map(|t| t.to_string()))
            .chain(input.compliance.str_list("prohibited_terms"));
        for term in extra_prohibited {
            if contains_term(&lower, &term) {
                violations.push(format!("prohibited term (\"{}\")", term));
            }
        }

        let score = 10.0
            - MISSING_DISCLAIMER_PENALTY * missing.len() as f64
            - PROHIBITED_CLAIM_PENALTY * violations.len() as f64;

        let mut result = ValidationResult::new(self.category(), score);
        for name in missing {
            result = result.with_warning(format!("missing disclaimer: {}", name));
        }
        for violation in violations {
            result = result.with_blocking(format!("prohibited claim: {}", violation));
        }

        Ok(result)
    }
}
