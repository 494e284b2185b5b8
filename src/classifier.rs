//! Intent Classifier
//!
//! Maps a sanitized goal to an intent plus extracted slots:
//! - Keyword scoring over per-intent term families (deterministic)
//! - Optional LLM classification that degrades to the keyword rules

use crate::error::{OrchestrationError, ProviderErrorKind};
use crate::gemini::GeminiClient;
use crate::models::{Intent, IntentClassification, Slots};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const KEYWORD_MODEL: &str = "keyword-rules";

/// Keyword families in priority order; earlier entries win ties
const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (
        Intent::RunwayCalculation,
        &["runway", "cash", "survive", "run out", "months left", "extend"],
    ),
    (
        Intent::BurnRateAnalysis,
        &["burn rate", "burn", "spending", "expenses", "spend"],
    ),
    (
        Intent::HiringImpact,
        &["hire", "hiring", "headcount", "engineer", "employee", "recruit"],
    ),
    (
        Intent::RevenueForecast,
        &["revenue", "forecast", "sales", "grow", "scale", "projection", "mrr"],
    ),
    (
        Intent::FundraisingStrategy,
        &["raise", "fundrais", "investor", "funding", "valuation", "series"],
    ),
    (
        Intent::CostOptimization,
        &["cut", "reduce", "save", "savings", "cost", "optimiz", "profit", "margin"],
    ),
];

/// Trait for goal classification
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, goal: &str) -> Result<IntentClassification>;
}

/// Deterministic keyword classifier
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn classify_text(goal: &str) -> IntentClassification {
        let lowered = goal.to_lowercase();
        let tokens = tokenize(&lowered);

        let mut best: Option<(Intent, usize)> = None;
        for (intent, keywords) in INTENT_KEYWORDS {
            let score = keywords
                .iter()
                .filter(|kw| contains_term(&lowered, &tokens, kw))
                .count();
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((*intent, score));
            }
        }

        let (intent, confidence) = match best {
            Some((intent, score)) => (intent, (0.5 + 0.15 * score as f64).min(0.95)),
            None => (Intent::StrategyRecommendation, 0.45),
        };

        IntentClassification {
            intent,
            slots: extract_slots(&lowered),
            confidence,
            fallback_used: false,
            model_used: KEYWORD_MODEL.to_string(),
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, goal: &str) -> Result<IntentClassification> {
        Ok(Self::classify_text(goal))
    }
}

/// LLM classifier; any provider or parse failure falls back to keywords
pub struct LlmIntentClassifier {
    client: Arc<GeminiClient>,
}

impl LlmIntentClassifier {
    pub fn new(client: Arc<GeminiClient>) -> Self {
        Self { client }
    }

    fn build_prompt(goal: &str) -> String {
        let intents: Vec<&str> = Intent::ALL.iter().map(Intent::as_str).collect();
        format!(
            r#"Classify the financial goal below.

GOAL:
{}

Allowed intents: {}

Return ONLY valid JSON:
{{"intent": "<one allowed intent>", "confidence": <0..1>, "slots": {{"months": <number?>, "hire_count": <number?>, "amount": <number?>, "growth_rate": <fraction?>}}}}
"#,
            goal,
            intents.join(", ")
        )
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, goal: &str) -> Result<IntentClassification> {
        let attempt = async {
            let completion = self
                .client
                .generate(&Self::build_prompt(goal), CLASSIFIER_SYSTEM_PROMPT, true)
                .await?;
            parse_classification(&completion.text, self.client.model())
        };

        match attempt.await {
            Ok(mut classification) => {
                // Regex-style slots fill anything the model left out
                for (key, value) in extract_slots(&goal.to_lowercase()) {
                    classification.slots.entry(key).or_insert(value);
                }
                Ok(classification)
            }
            Err(e) => {
                warn!(error = %e, "LLM intent classification failed, using keyword rules");
                let mut classification = KeywordIntentClassifier::classify_text(goal);
                classification.fallback_used = true;
                Ok(classification)
            }
        }
    }
}

const CLASSIFIER_SYSTEM_PROMPT: &str =
    "You are an intent classifier for a CFO assistant. Respond with JSON only.";

fn parse_classification(response: &str, model: &str) -> Result<IntentClassification> {
    let json: Value = serde_json::from_str(strip_fences(response)).map_err(|e| {
        OrchestrationError::llm(
            ProviderErrorKind::MalformedResponse,
            format!("Failed to parse classification: {}", e),
        )
    })?;

    let intent = json
        .get("intent")
        .and_then(Value::as_str)
        .and_then(Intent::parse)
        .ok_or_else(|| {
            OrchestrationError::llm(ProviderErrorKind::MalformedResponse, "Unknown intent")
        })?;

    let confidence = json
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    let slots: Slots = json
        .get("slots")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    Ok(IntentClassification {
        intent,
        slots,
        confidence,
        fallback_used: false,
        model_used: model.to_string(),
    })
}

pub(crate) fn strip_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

//
// ================= Slot Extraction =================
//

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Multi-word terms match as substrings, single words as token prefixes
fn contains_term(text: &str, tokens: &[&str], term: &str) -> bool {
    if term.contains(' ') {
        text.contains(term)
    } else {
        tokens.iter().any(|t| t.starts_with(term))
    }
}

/// Parse `$50k`, `2.5m`, `1,000,000`, `15%`; percentages become fractions
pub(crate) fn parse_number(token: &str) -> Option<f64> {
    let cleaned: String = token
        .trim_matches(|c: char| matches!(c, '.' | ',' | '?' | '!' | ')' | '(' | ':' | ';'))
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    if let Some(pct) = cleaned.strip_suffix('%') {
        return pct.parse::<f64>().ok().map(|v| v / 100.0);
    }

    let (digits, multiplier) = match cleaned.chars().last() {
        Some('k') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('m') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        Some('b') => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };

    digits.parse::<f64>().ok().map(|v| v * multiplier)
}

pub fn extract_slots(lowered: &str) -> Slots {
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let mut slots = Slots::new();

    for (i, word) in words.iter().enumerate() {
        let next = words.get(i + 1).copied().unwrap_or("");

        if word.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '%').ends_with('%') {
            if let Some(rate) = parse_number(word) {
                slots.entry("growth_rate".to_string()).or_insert(json!(rate));
            }
            continue;
        }

        if matches!(*word, "hire" | "hiring" | "add" | "recruit") {
            if let Some(count) = parse_number(next).filter(|n| n.fract() == 0.0 && *n > 0.0) {
                slots.entry("hire_count".to_string()).or_insert(json!(count as u64));
                if let Some(role) = words.get(i + 2) {
                    let role = role.trim_matches(|c: char| !c.is_alphanumeric());
                    if !role.is_empty() {
                        slots.entry("role".to_string()).or_insert(json!(role));
                    }
                }
            }
            continue;
        }

        let Some(value) = parse_number(word) else {
            continue;
        };

        if next.starts_with("month") {
            slots.entry("months".to_string()).or_insert(json!(value));
        } else if next.starts_with("year") {
            slots.entry("months".to_string()).or_insert(json!(value * 12.0));
        } else if next.starts_with("engineer")
            || next.starts_with("people")
            || next.starts_with("employee")
            || next.starts_with("developer")
        {
            slots.entry("hire_count".to_string()).or_insert(json!(value as u64));
        } else if word.starts_with('$') || value >= 1_000.0 {
            slots.entry("amount".to_string()).or_insert(json!(value));
        }
    }

    debug!(slot_count = slots.len(), "Slots extracted");
    slots
}
