//! LLM-backed recommendation generator and its anti-hallucination gate
//!
//! The provider is only consulted when the classification and the grounding
//! are both trustworthy. Provider failures surface as errors to the caller
//! of `recommend`, which degrades to the fallback analyzer.

pub mod prompts;

pub use prompts::{InMemoryPromptStore, PromptStore};

use crate::classifier::strip_fences;
use crate::config::GateConfig;
use crate::error::{OrchestrationError, ProviderErrorKind};
use crate::gemini::GeminiClient;
use crate::models::{Evidence, GroundingContext, Impact, Intent, Priority, Recommendation};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

// ===== Gate =====

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub open: bool,
    /// Every failed condition, empty when the gate is open
    pub reasons: Vec<String>,
}

pub struct AntiHallucinationGate {
    config: GateConfig,
}

impl AntiHallucinationGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        provider_configured: bool,
        intent_confidence: f64,
        grounding: &GroundingContext,
    ) -> GateDecision {
        let mut reasons = Vec::new();

        if !provider_configured {
            reasons.push("language model provider not configured".to_string());
        }
        if intent_confidence < self.config.min_intent_confidence {
            reasons.push(format!(
                "intent confidence {:.2} below {:.2}",
                intent_confidence, self.config.min_intent_confidence
            ));
        }
        if grounding.confidence < self.config.min_grounding_confidence {
            reasons.push(format!(
                "grounding confidence {:.2} below {:.2}",
                grounding.confidence, self.config.min_grounding_confidence
            ));
        }
        if grounding.evidence.len() < self.config.min_evidence {
            reasons.push(format!(
                "{} evidence items, need {}",
                grounding.evidence.len(),
                self.config.min_evidence
            ));
        }

        GateDecision {
            open: reasons.is_empty(),
            reasons,
        }
    }
}

// ===== Recommender =====

/// Inputs for one recommendation call
#[derive(Debug, Clone)]
pub struct RecommendationRequest<'a> {
    pub goal: &'a str,
    pub intent: Intent,
    pub calculations: &'a BTreeMap<String, f64>,
    pub evidence: &'a [Evidence],
}

/// Parsed provider output plus the exchange that produced it
#[derive(Debug, Clone)]
pub struct LlmRecommendations {
    pub natural_text: String,
    pub recommendations: Vec<Recommendation>,
    pub prompt: String,
    pub raw_response: String,
}

#[async_trait]
pub trait Recommender: Send + Sync {
    fn is_configured(&self) -> bool;
    fn model_name(&self) -> &str;
    async fn recommend(&self, request: &RecommendationRequest<'_>) -> Result<LlmRecommendations>;
}

pub struct GeminiRecommender {
    client: Arc<GeminiClient>,
}

impl GeminiRecommender {
    pub fn new(client: Arc<GeminiClient>) -> Self {
        Self { client }
    }
}

const RECOMMENDER_SYSTEM_PROMPT: &str = "You are a careful startup CFO. Use only the figures and evidence provided. Never invent numbers. Respond with JSON only.";

pub fn build_prompt(request: &RecommendationRequest<'_>) -> String {
    let calculations = if request.calculations.is_empty() {
        "(none)".to_string()
    } else {
        request
            .calculations
            .iter()
            .map(|(k, v)| format!("- {}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let evidence = request
        .evidence
        .iter()
        .map(|e| format!("- [{}] {}", e.id, e.summary))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"GOAL:
{}

INTENT: {}

CALCULATIONS:
{}

EVIDENCE (cite ids in data_sources):
{}

Return ONLY valid JSON:
{{
  "natural_text": "<short explanation>",
  "recommendations": [
    {{
      "type": "<snake_case>",
      "category": "<snake_case>",
      "action": "<what to do>",
      "impact": {{"<metric>": <number>}},
      "priority": "critical|high|medium|low",
      "timeline": "<when>",
      "confidence": <0..1>,
      "reasoning": "<why, citing figures>",
      "assumptions": ["..."],
      "warnings": ["..."],
      "evidence": ["<quoted figures>"],
      "data_sources": ["<evidence id>"]
    }}
  ]
}}
"#,
        request.goal, request.intent, calculations, evidence
    )
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    natural_text: String,
    #[serde(default)]
    recommendations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawRecommendation {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    category: Option<String>,
    action: String,
    #[serde(default)]
    impact: BTreeMap<String, Value>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    timeline: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    assumptions: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    data_sources: Vec<String>,
}

impl RawRecommendation {
    fn into_recommendation(self) -> Recommendation {
        // non-numeric impact values are dropped rather than guessed
        let impact: Impact = self
            .impact
            .into_iter()
            .filter_map(|(k, v)| v.as_f64().filter(|n| n.is_finite()).map(|n| (k, n)))
            .collect();

        Recommendation {
            category: self.category.unwrap_or_else(|| self.kind.clone()),
            kind: self.kind,
            action: self.action,
            impact,
            priority: self
                .priority
                .as_deref()
                .map(Priority::parse)
                .unwrap_or(Priority::Medium),
            timeline: self.timeline.unwrap_or_else(|| "Next 30 days".to_string()),
            confidence: self.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
            reasoning: self.reasoning,
            assumptions: self.assumptions,
            warnings: self.warnings,
            evidence: self.evidence,
            data_sources: self.data_sources,
            prompt_id: None,
        }
    }
}

/// Parse the provider's JSON; malformed items are skipped
pub fn parse_recommendations(response: &str) -> Result<(String, Vec<Recommendation>)> {
    let json: Value = serde_json::from_str(strip_fences(response)).map_err(|e| {
        OrchestrationError::llm(
            ProviderErrorKind::MalformedResponse,
            format!("Failed to parse recommendations: {}", e),
        )
    })?;

    let raw = match json {
        Value::Array(items) => RawResponse {
            natural_text: String::new(),
            recommendations: items,
        },
        other => serde_json::from_value::<RawResponse>(other).map_err(|e| {
            OrchestrationError::llm(
                ProviderErrorKind::MalformedResponse,
                format!("Unexpected recommendation shape: {}", e),
            )
        })?,
    };

    let total = raw.recommendations.len();
    let recommendations: Vec<Recommendation> = raw
        .recommendations
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawRecommendation>(v).ok())
        .map(RawRecommendation::into_recommendation)
        .collect();

    if recommendations.len() < total {
        debug!(
            skipped = total - recommendations.len(),
            "Skipped malformed LLM recommendations"
        );
    }

    Ok((raw.natural_text, recommendations))
}

#[async_trait]
impl Recommender for GeminiRecommender {
    fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    fn model_name(&self) -> &str {
        self.client.model()
    }

    async fn recommend(&self, request: &RecommendationRequest<'_>) -> Result<LlmRecommendations> {
        let prompt = build_prompt(request);
        let completion = self
            .client
            .generate(&prompt, RECOMMENDER_SYSTEM_PROMPT, true)
            .await?;

        let (natural_text, recommendations) = parse_recommendations(&completion.text)?;

        info!(
            model = %self.client.model(),
            count = recommendations.len(),
            "LLM recommendations received"
        );

        Ok(LlmRecommendations {
            natural_text,
            recommendations,
            prompt,
            raw_response: completion.text,
        })
    }
}

/// Keep only data sources that grounding actually supplied; a recommendation
/// left with none cites every grounding id.
pub fn restrict_data_sources(recommendations: &mut [Recommendation], grounding_ids: &[String]) {
    for rec in recommendations {
        rec.data_sources.retain(|s| grounding_ids.contains(s));
        if rec.data_sources.is_empty() {
            rec.data_sources = grounding_ids.to_vec();
        }
    }
}
