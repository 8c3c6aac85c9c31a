//! Factual accuracy validator.
//!
//! Extracts numeric claims (money amounts, percentages, licence numbers)
//! from the draft and checks each against the research record. Every
//! unsupported claim is a blocking issue.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::domain::{ValidationResult, ValidatorCategory};

use super::{ComplianceInput, Validator, ValidatorError};

const MONEY_PREFIX: &str = r"[€£$]\s?(\d[\d,]*(?:\.\d+)?)";
const MONEY_SUFFIX: &str = r"(?i)\b(\d[\d,]*(?:\.\d+)?)\s?(?:eur|euros?|gbp|usd|pounds?|dollars?)\b";
const PERCENT: &str = r"(\d[\d,]*(?:\.\d+)?)\s?%";
const LICENCE: &str = r"(?i)\blicen[cs]e\s+(?:no\.?|number|#)\s*:?\s*([a-z0-9][a-z0-9/\-]{2,})";
const NUMBER: &str = r"\d[\d,]*(?:\.\d+)?";

struct Extractors {
    money_prefix: Regex,
    money_suffix: Regex,
    percent: Regex,
    licence: Regex,
    number: Regex,
}

fn extractors() -> Result<&'static Extractors, ValidatorError> {
    static CELL: OnceLock<Result<Extractors, String>> = OnceLock::new();
    CELL.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).map_err(|e| e.to_string());
        Ok(Extractors {
            money_prefix: compile(MONEY_PREFIX)?,
            money_suffix: compile(MONEY_SUFFIX)?,
            percent: compile(PERCENT)?,
            licence: compile(LICENCE)?,
            number: compile(NUMBER)?,
        })
    })
    .as_ref()
    .map_err(|e| ValidatorError::Config(e.clone()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClaimKind {
    Amount,
    Percentage,
    Licence,
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Amount => "bonus amount",
            Self::Percentage => "percentage",
            Self::Licence => "licence number",
        };
        f.write_str(name)
    }
}

/// A checkable statement found in the draft
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Claim {
    pub kind: ClaimKind,
    pub normalized: String,
    pub text: String,
}

/// "1,000.00" -> "1000", "12.50" -> "12.5"
fn normalize_number(raw: &str) -> String {
    let plain: String = raw.chars().filter(|c| *c != ',').collect();
    if let Some((whole, frac)) = plain.split_once('.') {
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, frac)
        }
    } else {
        plain
    }
}

/// Claims in `text`, deduplicated by kind and normalized value
pub fn extract_claims(text: &str) -> Result<Vec<Claim>, ValidatorError> {
    let ex = extractors()?;
    let mut seen = BTreeSet::new();
    let mut claims = Vec::new();

    let mut push = |kind: ClaimKind, normalized: String, matched: &str| {
        if seen.insert((kind, normalized.clone())) {
            claims.push(Claim {
                kind,
                normalized,
                text: matched.trim().to_string(),
            });
        }
    };

    for regex in [&ex.money_prefix, &ex.money_suffix] {
        for caps in regex.captures_iter(text) {
            if let (Some(all), Some(value)) = (caps.get(0), caps.get(1)) {
                push(ClaimKind::Amount, normalize_number(value.as_str()), all.as_str());
            }
        }
    }
    for caps in ex.percent.captures_iter(text) {
        if let (Some(all), Some(value)) = (caps.get(0), caps.get(1)) {
            push(ClaimKind::Percentage, normalize_number(value.as_str()), all.as_str());
        }
    }
    for caps in ex.licence.captures_iter(text) {
        if let (Some(all), Some(value)) = (caps.get(0), caps.get(1)) {
            push(ClaimKind::Licence, value.as_str().to_uppercase(), all.as_str());
        }
    }

    Ok(claims)
}

pub struct FactualValidator;

#[async_trait]
impl Validator for FactualValidator {
    fn category(&self) -> ValidatorCategory {
        ValidatorCategory::Factual
    }

    async fn validate(&self, input: &ComplianceInput) -> Result<ValidationResult, ValidatorError> {
        let claims = extract_claims(&input.draft.full_text())?;
        if claims.is_empty() {
            return Ok(ValidationResult::new(self.category(), 10.0));
        }

        let ex = extractors()?;
        let facts = input.research.facts();
        let known_numbers: BTreeSet<String> = facts
            .iter()
            .flat_map(|fact| ex.number.find_iter(fact).map(|m| normalize_number(m.as_str())))
            .collect();
        let facts_upper: Vec<String> = facts.iter().map(|f| f.to_uppercase()).collect();

        let mut supported = 0usize;
        let mut result = ValidationResult::new(self.category(), 0.0);

        for claim in &claims {
            let is_supported = match claim.kind {
                ClaimKind::Amount | ClaimKind::Percentage => known_numbers.contains(&claim.normalized),
                ClaimKind::Licence => facts_upper.iter().any(|f| f.contains(&claim.normalized)),
            };
            if is_supported {
                supported += 1;
            } else {
                result = result.with_blocking(format!(
                    "unsupported {} claim: \"{}\"",
                    claim.kind, claim.text
                ));
            }
        }

        result.score = 10.0 * supported as f64 / claims.len() as f64;
        Ok(result)
    }
}
