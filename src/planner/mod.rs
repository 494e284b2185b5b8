//! Action planner
//!
//! Translates a classified intent and its slots into an ordered list of
//! deterministic calculations, a validation verdict and an approval flag.
//! No LLM is involved in planning.

use crate::config::PipelineConfig;
use crate::models::{Action, Intent, IntentClassification, Operation, Plan, PlanValidation, Slots};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

const MAX_ACTIONS_PER_PLAN: usize = 10;
const MAX_MONTHS: f64 = 120.0;
const MAX_HIRES: f64 = 100.0;

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(
        &self,
        classification: &IntentClassification,
        has_baseline: bool,
    ) -> Result<Plan>;
}

/// Deterministic intent → operations planner
pub struct RulePlanner {
    approval_hire_threshold: u32,
    approval_amount_threshold: f64,
}

impl RulePlanner {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            approval_hire_threshold: config.approval_hire_threshold,
            approval_amount_threshold: config.approval_amount_threshold,
        }
    }

    fn operations_for(intent: Intent) -> &'static [Operation] {
        match intent {
            Intent::BurnRateAnalysis => &[Operation::ComputeBurnRate],
            Intent::RunwayCalculation | Intent::CostOptimization => {
                &[Operation::ComputeBurnRate, Operation::ComputeRunway]
            }
            Intent::RevenueForecast => &[Operation::ForecastRevenue],
            Intent::HiringImpact => &[Operation::ComputeHireImpact, Operation::ComputeRunway],
            Intent::FundraisingStrategy | Intent::StrategyRecommendation => &[
                Operation::ComputeBurnRate,
                Operation::ComputeRunway,
                Operation::ForecastRevenue,
            ],
        }
    }

    fn params_for(operation: Operation, slots: &Slots) -> Slots {
        let keys: &[&str] = match operation {
            Operation::ComputeBurnRate => &[],
            Operation::ComputeRunway => &[],
            Operation::ForecastRevenue => &["months", "growth_rate"],
            Operation::ComputeHireImpact => &["hire_count", "annual_salary"],
        };

        keys.iter()
            .filter_map(|k| slots.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    fn validate(actions: &[Action], has_baseline: bool) -> PlanValidation {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        if actions.is_empty() {
            issues.push("Plan contains no operations".to_string());
        }
        if actions.len() > MAX_ACTIONS_PER_PLAN {
            issues.push(format!(
                "Plan exceeds {} operations",
                MAX_ACTIONS_PER_PLAN
            ));
        }

        for action in actions {
            let op = action.operation.as_str();
            for (key, value) in &action.params {
                if value.as_f64().is_some_and(|v| v < 0.0) {
                    issues.push(format!("{}: '{}' must be non-negative", op, key));
                }
            }
            if let Some(months) = action.params.get("months").and_then(Value::as_f64) {
                if !(1.0..=MAX_MONTHS).contains(&months) {
                    issues.push(format!("{}: months must be between 1 and {}", op, MAX_MONTHS));
                }
            }
            if let Some(count) = action.params.get("hire_count").and_then(Value::as_f64) {
                if !(1.0..=MAX_HIRES).contains(&count) {
                    issues.push(format!("{}: hire_count must be between 1 and {}", op, MAX_HIRES));
                }
            }
        }

        if !has_baseline {
            warnings.push(
                "No baseline financial data; calculations rely on goal-provided figures only"
                    .to_string(),
            );
        }

        PlanValidation {
            ok: issues.is_empty(),
            issues,
            warnings,
        }
    }

    fn requires_approval(&self, slots: &Slots) -> bool {
        let hires = slots.get("hire_count").and_then(Value::as_f64).unwrap_or(0.0);
        let amount = slots.get("amount").and_then(Value::as_f64).unwrap_or(0.0);

        hires > self.approval_hire_threshold as f64 || amount >= self.approval_amount_threshold
    }
}

#[async_trait]
impl Planner for RulePlanner {
    async fn create_plan(
        &self,
        classification: &IntentClassification,
        has_baseline: bool,
    ) -> Result<Plan> {
        let actions: Vec<Action> = Self::operations_for(classification.intent)
            .iter()
            .enumerate()
            .map(|(i, op)| Action {
                order: i as u32 + 1,
                operation: *op,
                params: Self::params_for(*op, &classification.slots),
            })
            .collect();

        let validation = Self::validate(&actions, has_baseline);
        let requires_approval = self.requires_approval(&classification.slots);

        debug!(
            intent = %classification.intent,
            action_count = actions.len(),
            valid = validation.ok,
            requires_approval,
            "Plan created"
        );

        Ok(Plan {
            actions,
            validation,
            requires_approval,
        })
    }
}

/// Operation names for metadata
pub fn operation_names(plan: &Plan) -> Vec<String> {
    plan.actions
        .iter()
        .map(|a| a.operation.as_str().to_string())
        .collect()
}

/// Plan used when the planning stage fails: nothing to execute
pub fn failed_plan(reason: &str) -> Plan {
    Plan {
        actions: Vec::new(),
        validation: PlanValidation {
            ok: false,
            issues: vec![reason.to_string()],
            warnings: Vec::new(),
        },
        requires_approval: false,
    }
}
