//! Pre-execution input screening and output shape checks.
//!
//! `check` scans request input for blocked terms and PII-shaped substrings
//! before any provider is contacted. `validate_schema` verifies that a
//! generation parses as JSON and carries a set of required top-level keys.

use once_cell::sync::Lazy;
use regex::Regex;

/// Email-shaped substring.
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

/// US-style phone number: 3-3-4 digit groups with optional separators.
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap());

/// Outcome of a guardrail check. A passing result carries no reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailResult {
    pub passed: bool,
    pub reason: Option<String>,
}

impl GuardrailResult {
    fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Scan `input` for blocked terms and PII patterns.
///
/// Term matching is case-insensitive and word-bounded. The first violation
/// found is returned; later violations are not enumerated.
pub fn check(input: &str, blocked_terms: &[String]) -> GuardrailResult {
    if !blocked_terms.is_empty() {
        // Terms come from config, so the pattern is rebuilt per call rather
        // than compiled once like the PII patterns.
        let alternation = blocked_terms
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        match Regex::new(&format!(r"(?i)\b({})\b", alternation)) {
            Ok(re) => {
                if re.is_match(input) {
                    return GuardrailResult::fail("Blocked term detected.");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid blocked-term pattern, skipping term check");
            }
        }
    }

    if EMAIL_RE.is_match(input) {
        return GuardrailResult::fail("PII detected (email format).");
    }

    if PHONE_RE.is_match(input) {
        return GuardrailResult::fail("PII detected (phone format).");
    }

    GuardrailResult::pass()
}

/// Check that `output` parses as a JSON object containing every key in
/// `required_keys` at the top level.
///
/// An empty key set always passes. Parse failures fail the check.
pub fn validate_schema(output: &str, required_keys: &[String]) -> bool {
    if required_keys.is_empty() {
        return true;
    }

    let parsed: serde_json::Value = match serde_json::from_str(output) {
        Ok(v) => v,
        Err(_) => return false,
    };

    let Some(obj) = parsed.as_object() else {
        return false;
    };

    required_keys.iter().all(|key| obj.contains_key(key))
}
