//! Tier routing, prompt assembly, and cost accounting.
//!
//! Pure decision logic: renders the template, picks a capability tier, and
//! prices token usage. Provider calls happen elsewhere.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::RoutingConfig;

/// Rendered-prompt length above which a request routes to the deep tier.
const DEEP_TIER_LENGTH_THRESHOLD: usize = 4000;

/// Capability tier a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Cheap, low-latency model.
    Fast,
    /// Higher-capability reasoning model at materially higher rates.
    Deep,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Deep => "deep",
        }
    }
}

/// Outcome of routing: the assembled prompt and the chosen tier.
#[derive(Debug, Clone)]
pub struct RoutedPrompt {
    pub final_prompt: String,
    pub tier: Tier,
}

/// Render the template and choose a tier.
///
/// Every `{{name}}` occurrence is replaced with the matching variable value.
/// Placeholders with no matching variable are left verbatim; that is a
/// template-authoring signal, not an execution error.
///
/// Tier heuristic: a rendered prompt over 4000 characters, a "step-by-step"
/// cue in the system prompt, or a `<think>` tag in the template routes to
/// the deep tier. Everything else stays on the fast tier.
pub fn select(
    system_prompt: &str,
    template: &str,
    variables: &HashMap<String, String>,
) -> RoutedPrompt {
    let mut final_prompt = template.to_string();
    for (name, value) in variables {
        final_prompt = final_prompt.replace(&format!("{{{{{}}}}}", name), value);
    }

    let is_massive = final_prompt.len() > DEEP_TIER_LENGTH_THRESHOLD;
    let requires_deep_logic = system_prompt.to_lowercase().contains("step-by-step")
        || template.to_lowercase().contains("<think>");

    let tier = if is_massive || requires_deep_logic {
        Tier::Deep
    } else {
        Tier::Fast
    };

    RoutedPrompt { final_prompt, tier }
}

/// Price a generation in integer micro-USD.
///
/// `rates` carries per-token micro-USD rates per tier; the total is rounded
/// to the nearest integer micro-unit.
pub fn cost_micro_usd(tier: Tier, tokens_in: u32, tokens_out: u32, rates: &RoutingConfig) -> i64 {
    let (input_rate, output_rate) = match tier {
        Tier::Fast => (rates.fast_input_rate, rates.fast_output_rate),
        Tier::Deep => (rates.deep_input_rate, rates.deep_output_rate),
    };

    (tokens_in as f64 * input_rate + tokens_out as f64 * output_rate).round() as i64
}

/// Heuristic inspection of a prompt, with improvement suggestions.
#[derive(Debug, Clone, Serialize)]
pub struct PromptAnalysis {
    pub length: usize,
    pub has_redundancy: bool,
    pub has_schema: bool,
    pub suggestions: Vec<String>,
}

/// Analyze a prompt for common authoring issues.
pub fn analyze(prompt: &str) -> PromptAnalysis {
    let lower = prompt.to_lowercase();
    let has_redundancy = lower.contains("please") || lower.contains("kindly");
    let has_schema =
        lower.contains("json") || lower.contains("schema") || lower.contains("format");

    let mut suggestions = Vec::new();
    if has_redundancy {
        suggestions.push(
            "Remove polite filler words (e.g., 'please', 'kindly') to save tokens.".to_string(),
        );
    }
    if !has_schema {
        suggestions.push(
            "Consider defining a strict output schema for more predictable formatting."
                .to_string(),
        );
    }
    if prompt.len() > DEEP_TIER_LENGTH_THRESHOLD {
        suggestions
            .push("Prompt is massive. Consider splitting into a multi-step pipeline.".to_string());
    } else if prompt.len() < 50 {
        suggestions.push(
            "Prompt is very short. Provide more context to reduce LLM hallucinations.".to_string(),
        );
    }

    PromptAnalysis {
        length: prompt.len(),
        has_redundancy,
        has_schema,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitution_replaces_all_occurrences() {
        let routed = select(
            "You are concise.",
            "Write about {{topic}}. More on {{topic}} please.",
            &vars(&[("topic", "AI")]),
        );
        assert_eq!(routed.final_prompt, "Write about AI. More on AI please.");
    }

    #[test]
    fn test_unmatched_placeholder_left_verbatim() {
        let routed = select(
            "You are concise.",
            "Write about {{topic}} in {{language}}.",
            &vars(&[("topic", "AI")]),
        );
        assert_eq!(routed.final_prompt, "Write about AI in {{language}}.");
    }

    #[test]
    fn test_short_prompt_routes_fast() {
        let routed = select("You are concise.", "Summarize {{topic}}.", &vars(&[("topic", "AI")]));
        assert_eq!(routed.tier, Tier::Fast);
    }

    #[test]
    fn test_massive_prompt_routes_deep() {
        let big_value = "x".repeat(4100);
        let routed = select(
            "You are concise.",
            "Summarize {{doc}}",
            &vars(&[("doc", &big_value)]),
        );
        assert_eq!(routed.tier, Tier::Deep);
    }

    #[test]
    fn test_step_by_step_system_prompt_routes_deep() {
        let routed = select(
            "Work through this Step-By-Step.",
            "Solve {{problem}}.",
            &vars(&[("problem", "2+2")]),
        );
        assert_eq!(routed.tier, Tier::Deep);
    }

    #[test]
    fn test_think_tag_in_template_routes_deep() {
        let routed = select(
            "You are concise.",
            "<THINK>reason here</THINK> then answer {{q}}",
            &vars(&[("q", "why")]),
        );
        assert_eq!(routed.tier, Tier::Deep);
    }

    #[test]
    fn test_exact_threshold_stays_fast() {
        // Threshold is strictly greater-than
        let template = "y".repeat(4000);
        let routed = select("You are concise.", &template, &HashMap::new());
        assert_eq!(routed.tier, Tier::Fast);
    }

    #[test]
    fn test_cost_fast_tier() {
        let rates = RoutingConfig::default();
        // 100 * 0.075 + 200 * 0.30 = 7.5 + 60 = 67.5 -> 68
        assert_eq!(cost_micro_usd(Tier::Fast, 100, 200, &rates), 68);
    }

    #[test]
    fn test_cost_deep_tier_materially_higher() {
        let rates = RoutingConfig::default();
        let fast = cost_micro_usd(Tier::Fast, 1000, 1000, &rates);
        let deep = cost_micro_usd(Tier::Deep, 1000, 1000, &rates);
        assert!(deep > fast * 10);
    }

    #[test]
    fn test_cost_rounds_to_nearest() {
        let rates = RoutingConfig {
            fast_input_rate: 0.3,
            fast_output_rate: 0.0,
            deep_input_rate: 1.0,
            deep_output_rate: 1.0,
        };
        // 1 * 0.3 = 0.3 -> 0; 2 * 0.3 = 0.6 -> 1
        assert_eq!(cost_micro_usd(Tier::Fast, 1, 0, &rates), 0);
        assert_eq!(cost_micro_usd(Tier::Fast, 2, 0, &rates), 1);
    }

    #[test]
    fn test_cost_zero_tokens() {
        let rates = RoutingConfig::default();
        assert_eq!(cost_micro_usd(Tier::Deep, 0, 0, &rates), 0);
    }

    #[test]
    fn test_analyze_flags_redundancy() {
        let analysis = analyze("Please kindly write a long essay about distributed systems");
        assert!(analysis.has_redundancy);
        assert!(analysis
            .suggestions
            .iter()
            .any(|s| s.contains("filler words")));
    }

    #[test]
    fn test_analyze_flags_missing_schema() {
        let analysis = analyze("Write a long essay about distributed systems consensus");
        assert!(!analysis.has_schema);
        assert!(analysis.suggestions.iter().any(|s| s.contains("schema")));
    }

    #[test]
    fn test_analyze_short_prompt_suggestion() {
        let analysis = analyze("help me");
        assert!(analysis.suggestions.iter().any(|s| s.contains("short")));
    }
}
