//! Verification engine for the structured response schema
//!
//! Rules-based checks run on the assembled response before it is persisted.
//! Any failing rule is a pipeline defect and is raised to the caller.

use crate::error::OrchestrationError;
use crate::models::{RecommendationSignature, StructuredResponse};
use crate::Result;
use std::collections::HashSet;
use tracing::{error, info};

/// Trait for verification rules
pub trait VerificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, response: &StructuredResponse) -> VerificationCheckResult;
}

pub struct VerificationCheckResult {
    pub passed: bool,
    pub details: String,
}

impl VerificationCheckResult {
    fn pass() -> Self {
        Self {
            passed: true,
            details: String::new(),
        }
    }

    fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

/// Verification engine that enforces rules
pub struct VerificationEngine {
    rules: Vec<Box<dyn VerificationRule>>,
}

impl VerificationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn VerificationRule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, response: &StructuredResponse) -> Result<()> {
        let issues: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let result = rule.verify(response);
                (!result.passed).then(|| format!("{}: {}", rule.name(), result.details))
            })
            .collect();

        if !issues.is_empty() {
            error!(?issues, "Structured response failed schema validation");
            return Err(OrchestrationError::SchemaValidation(issues));
        }

        info!(rule_count = self.rules.len(), "Response verification passed");
        Ok(())
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

//
// ========== Response Rules ==========
//

fn is_sentinel_response(response: &StructuredResponse) -> bool {
    response.recommendations.len() == 1 && response.recommendations[0].is_setup_required()
}

/// Rule: at least `minimum` recommendations, or the lone setup sentinel
pub struct MinimumRecommendationsRule {
    pub minimum: usize,
}

impl VerificationRule for MinimumRecommendationsRule {
    fn name(&self) -> &'static str {
        "minimum_recommendations"
    }

    fn verify(&self, response: &StructuredResponse) -> VerificationCheckResult {
        let count = response.recommendations.len();
        if is_sentinel_response(response) || count >= self.minimum {
            VerificationCheckResult::pass()
        } else {
            VerificationCheckResult::fail(format!("{} recommendations, need {}", count, self.minimum))
        }
    }
}

/// Rule: the setup sentinel never appears alongside other advice
pub struct SentinelAloneRule;

impl VerificationRule for SentinelAloneRule {
    fn name(&self) -> &'static str {
        "setup_required_alone"
    }

    fn verify(&self, response: &StructuredResponse) -> VerificationCheckResult {
        let sentinels = response
            .recommendations
            .iter()
            .filter(|r| r.is_setup_required())
            .count();

        if sentinels == 0 || is_sentinel_response(response) {
            VerificationCheckResult::pass()
        } else {
            VerificationCheckResult::fail("setup_required mixed with other recommendations")
        }
    }
}

/// Rule: no two recommendations share a signature
pub struct UniqueSignatureRule;

impl VerificationRule for UniqueSignatureRule {
    fn name(&self) -> &'static str {
        "unique_signatures"
    }

    fn verify(&self, response: &StructuredResponse) -> VerificationCheckResult {
        let mut seen: HashSet<RecommendationSignature> = HashSet::new();
        let duplicates: Vec<&str> = response
            .recommendations
            .iter()
            .filter(|r| !seen.insert(r.signature()))
            .map(|r| r.kind.as_str())
            .collect();

        if duplicates.is_empty() {
            VerificationCheckResult::pass()
        } else {
            VerificationCheckResult::fail(format!("duplicate recommendations: {}", duplicates.join(", ")))
        }
    }
}

/// Rule: every confidence lies in [0, 1]
pub struct ConfidenceRangeRule;

impl VerificationRule for ConfidenceRangeRule {
    fn name(&self) -> &'static str {
        "confidence_range"
    }

    fn verify(&self, response: &StructuredResponse) -> VerificationCheckResult {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        let meta = &response.metadata;

        let mut bad: Vec<String> = response
            .recommendations
            .iter()
            .filter(|r| !in_range(r.confidence))
            .map(|r| format!("{}={}", r.kind, r.confidence))
            .collect();
        if !in_range(meta.intent_confidence) {
            bad.push(format!("intent_confidence={}", meta.intent_confidence));
        }
        if !in_range(meta.grounding_confidence) {
            bad.push(format!("grounding_confidence={}", meta.grounding_confidence));
        }

        if bad.is_empty() {
            VerificationCheckResult::pass()
        } else {
            VerificationCheckResult::fail(bad.join(", "))
        }
    }
}

/// Rule: numeric impact must be traceable to evidence or data sources
pub struct ImpactTraceabilityRule;

impl VerificationRule for ImpactTraceabilityRule {
    fn name(&self) -> &'static str {
        "impact_traceability"
    }

    fn verify(&self, response: &StructuredResponse) -> VerificationCheckResult {
        let untraced: Vec<&str> = response
            .recommendations
            .iter()
            .filter(|r| !r.is_setup_required() && !r.impact.is_empty())
            .filter(|r| r.evidence.is_empty() && r.data_sources.is_empty())
            .map(|r| r.kind.as_str())
            .collect();

        if untraced.is_empty() {
            VerificationCheckResult::pass()
        } else {
            VerificationCheckResult::fail(format!("impact without evidence: {}", untraced.join(", ")))
        }
    }
}

/// Rule: calculations and impacts are finite numbers
pub struct FiniteNumbersRule;

impl VerificationRule for FiniteNumbersRule {
    fn name(&self) -> &'static str {
        "finite_numbers"
    }

    fn verify(&self, response: &StructuredResponse) -> VerificationCheckResult {
        let calc_ok = response.calculations.values().all(|v| v.is_finite());
        let impact_ok = response
            .recommendations
            .iter()
            .all(|r| r.impact.values().all(|v| v.is_finite()));

        if calc_ok && impact_ok {
            VerificationCheckResult::pass()
        } else {
            VerificationCheckResult::fail("non-finite calculation or impact value")
        }
    }
}

/// Rule: the explanation is present
pub struct NaturalTextRule;

impl VerificationRule for NaturalTextRule {
    fn name(&self) -> &'static str {
        "natural_text_present"
    }

    fn verify(&self, response: &StructuredResponse) -> VerificationCheckResult {
        if response.natural_text.trim().is_empty() {
            VerificationCheckResult::fail("natural_text is empty")
        } else {
            VerificationCheckResult::pass()
        }
    }
}

/// Create a verification engine with the standard response rules
pub fn create_default_verification_engine(min_recommendations: usize) -> VerificationEngine {
    let mut engine = VerificationEngine::new();
    engine.add_rule(Box::new(MinimumRecommendationsRule {
        minimum: min_recommendations,
    }));
    engine.add_rule(Box::new(SentinelAloneRule));
    engine.add_rule(Box::new(UniqueSignatureRule));
    engine.add_rule(Box::new(ConfidenceRangeRule));
    engine.add_rule(Box::new(ImpactTraceabilityRule));
    engine.add_rule(Box::new(FiniteNumbersRule));
    engine.add_rule(Box::new(NaturalTextRule));
    engine
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::setup_required;
    use crate::test_support::sample_response;

    #[test]
    fn test_sentinel_response_passes() {
        let engine = create_default_verification_engine(3);
        let response = sample_response(vec![setup_required()]);
        assert!(engine.verify(&response).is_ok());
    }

    #[test]
    fn test_violations_are_collected() {
        let engine = create_default_verification_engine(3);

        let mut rec = setup_required();
        rec.kind = "cost_reduction".to_string();
        rec.impact.insert("monthlySavings".to_string(), 100.0);
        rec.evidence.clear();
        rec.confidence = 1.5;
        let mut response = sample_response(vec![rec.clone(), rec]);
        response.natural_text = " ".to_string();

        match engine.verify(&response) {
            Err(OrchestrationError::SchemaValidation(issues)) => {
                let names: Vec<&str> = issues
                    .iter()
                    .map(|i| i.split(':').next().unwrap_or_default())
                    .collect();
                assert_eq!(
                    names,
                    vec![
                        "minimum_recommendations",
                        "unique_signatures",
                        "confidence_range",
                        "impact_traceability",
                        "natural_text_present",
                    ]
                );
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }
}
