//! Pipeline configuration
//!
//! Thresholds and numeric defaults are injected into the orchestrator
//! rather than embedded in branch logic. `from_env` reads overrides from
//! the process environment (populated from `.env` by the binaries).

use std::env;
use std::str::FromStr;
use tracing::warn;

/// Values the fallback analyzer assumes when a metric is missing from the data
#[derive(Debug, Clone, PartialEq)]
pub struct FinancialDefaults {
    pub cash_balance: f64,
    pub monthly_burn: f64,
    pub annual_salary: f64,
    pub benefits_load: f64,
}

impl Default for FinancialDefaults {
    fn default() -> Self {
        Self {
            cash_balance: 500_000.0,
            monthly_burn: 50_000.0,
            annual_salary: 120_000.0,
            benefits_load: 0.25,
        }
    }
}

/// Anti-hallucination gate thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub min_intent_confidence: f64,
    pub min_grounding_confidence: f64,
    pub min_evidence: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_intent_confidence: 0.5,
            min_grounding_confidence: 0.6,
            min_evidence: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub goal_min_chars: usize,
    pub goal_max_chars: usize,
    pub gate: GateConfig,
    /// Below this intent confidence the fallback analyzer always answers
    pub fallback_intent_confidence: f64,
    pub min_recommendations: usize,
    pub defaults: FinancialDefaults,
    pub approval_hire_threshold: u32,
    pub approval_amount_threshold: f64,
    pub transaction_evidence_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            goal_min_chars: 5,
            goal_max_chars: 500,
            gate: GateConfig::default(),
            fallback_intent_confidence: 0.5,
            min_recommendations: 3,
            defaults: FinancialDefaults::default(),
            approval_hire_threshold: 5,
            approval_amount_threshold: 1_000_000.0,
            transaction_evidence_limit: 10,
        }
    }
}

impl PipelineConfig {
    /// Load configuration, falling back to defaults for unset or invalid values
    pub fn from_env() -> Self {
        let base = Self::default();

        Self {
            goal_min_chars: env_or("GOAL_MIN_CHARS", base.goal_min_chars),
            goal_max_chars: env_or("GOAL_MAX_CHARS", base.goal_max_chars),
            gate: GateConfig {
                min_intent_confidence: env_or(
                    "LLM_MIN_INTENT_CONFIDENCE",
                    base.gate.min_intent_confidence,
                ),
                min_grounding_confidence: env_or(
                    "LLM_MIN_GROUNDING_CONFIDENCE",
                    base.gate.min_grounding_confidence,
                ),
                min_evidence: env_or("LLM_MIN_EVIDENCE", base.gate.min_evidence),
            },
            fallback_intent_confidence: base.fallback_intent_confidence,
            min_recommendations: env_or(
                "FALLBACK_MIN_RECOMMENDATIONS",
                base.min_recommendations,
            ),
            defaults: FinancialDefaults {
                cash_balance: env_or("ASSUMED_CASH_BALANCE", base.defaults.cash_balance),
                monthly_burn: env_or("ASSUMED_MONTHLY_BURN", base.defaults.monthly_burn),
                annual_salary: env_or("ASSUMED_ANNUAL_SALARY", base.defaults.annual_salary),
                benefits_load: base.defaults.benefits_load,
            },
            approval_hire_threshold: env_or(
                "PLAN_APPROVAL_HIRE_THRESHOLD",
                base.approval_hire_threshold,
            ),
            approval_amount_threshold: env_or(
                "PLAN_APPROVAL_AMOUNT_THRESHOLD",
                base.approval_amount_threshold,
            ),
            transaction_evidence_limit: env_or(
                "GROUNDING_TRANSACTION_LIMIT",
                base.transaction_evidence_limit,
            ),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparseable configuration value");
                default
            }
        },
        Err(_) => default,
    }
}
