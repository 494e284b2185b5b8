//! Execution engine for deterministic plan execution
//!
//! Runs validated actions against the calculation tools. LLM is NOT
//! allowed here. A failing operation yields a null result rather than
//! aborting the run.

use crate::error::OrchestrationError;
use crate::grounding::summary_aliases;
use crate::models::{DashboardOverview, ExecutionResult, ModelRun, Operation, Plan, Slots};
use crate::tools::{ToolInput, ToolRegistry};
use crate::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

const MAX_ACTIONS_PER_RUN: usize = 10;

/// Real baseline figures available to the calculations.
///
/// Only values observed in a model run summary or the dashboard overview are
/// present; nothing is filled from assumed defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    pub cash: Option<f64>,
    pub monthly_burn: Option<f64>,
    pub monthly_revenue: Option<f64>,
    pub revenue_growth: Option<f64>,
}

impl Baseline {
    pub fn from_sources(run: Option<&ModelRun>, overview: Option<&DashboardOverview>) -> Self {
        let from_run = |metric: &str| run.and_then(|r| r.summary_metric(summary_aliases(metric)));
        let nonzero = |v: f64| (v != 0.0).then_some(v);

        Self {
            cash: from_run("cash").or_else(|| overview.and_then(|o| nonzero(o.cash_balance))),
            monthly_burn: from_run("monthly_burn")
                .or_else(|| overview.and_then(|o| nonzero(o.monthly_burn))),
            monthly_revenue: from_run("monthly_revenue")
                .or_else(|| overview.and_then(|o| nonzero(o.monthly_revenue))),
            revenue_growth: from_run("revenue_growth")
                .or_else(|| overview.and_then(|o| nonzero(o.revenue_growth))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cash.is_none()
            && self.monthly_burn.is_none()
            && self.monthly_revenue.is_none()
            && self.revenue_growth.is_none()
    }
}

/// Executes a plan action-by-action
pub struct ExecutionEngine {
    tool_registry: ToolRegistry,
}

impl ExecutionEngine {
    pub fn new(tool_registry: ToolRegistry) -> Self {
        Self { tool_registry }
    }

    pub async fn execute_plan(&self, plan: &Plan, baseline: &Baseline) -> Result<Vec<ExecutionResult>> {
        if plan.actions.len() > MAX_ACTIONS_PER_RUN {
            return Err(OrchestrationError::ExecutionError(format!(
                "Plan exceeds maximum allowed operations ({})",
                MAX_ACTIONS_PER_RUN
            )));
        }

        let mut results = Vec::with_capacity(plan.actions.len());
        let mut carried_burn: Option<f64> = None;

        for action in &plan.actions {
            let params = inject_baseline(action.operation, &action.params, baseline, carried_burn);
            let tool_name = action.operation.as_str();
            let start = Instant::now();

            let output = match self.tool_registry.get(tool_name) {
                Some(tool) => {
                    let input = ToolInput {
                        tool_name: tool_name.to_string(),
                        parameters: params.clone(),
                    };
                    match tool.execute(&input).await {
                        Ok(output) if output.success => Some(output.data),
                        Ok(output) => {
                            warn!(operation = tool_name, error = ?output.error, "Operation reported failure");
                            None
                        }
                        Err(e) => {
                            warn!(operation = tool_name, error = %e, "Operation failed");
                            None
                        }
                    }
                }
                None => {
                    warn!(operation = tool_name, "Tool not registered");
                    None
                }
            };

            debug!(
                order = action.order,
                operation = tool_name,
                elapsed_ms = start.elapsed().as_millis() as u64,
                ok = output.is_some(),
                "Operation executed"
            );

            let mut merged = params;
            let mut result = None;
            if let Some(Value::Object(data)) = output {
                result = data.get("result").and_then(Value::as_f64);
                for key in ["calculated_monthly_burn", "new_monthly_burn"] {
                    if let Some(burn) = data.get(key).and_then(Value::as_f64) {
                        carried_burn = Some(burn);
                    }
                }
                merged.extend(data.into_iter().filter(|(k, _)| k != "result"));
            }

            results.push(ExecutionResult {
                operation: tool_name.to_string(),
                result,
                params: merged,
            });
        }

        Ok(results)
    }
}

fn inject_baseline(
    operation: Operation,
    params: &Slots,
    baseline: &Baseline,
    carried_burn: Option<f64>,
) -> Slots {
    let mut out = params.clone();
    let burn = carried_burn.or(baseline.monthly_burn);

    let mut set = |key: &str, value: Option<f64>| {
        if let Some(v) = value {
            out.entry(key.to_string()).or_insert_with(|| json!(v));
        }
    };

    match operation {
        Operation::ComputeBurnRate => {
            set("monthly_burn", baseline.monthly_burn);
            set("monthly_revenue", baseline.monthly_revenue);
        }
        Operation::ComputeRunway | Operation::ComputeHireImpact => {
            set("cash", baseline.cash);
            set("monthly_burn", burn);
        }
        Operation::ForecastRevenue => {
            set("monthly_revenue", baseline.monthly_revenue);
            set("growth_rate", baseline.revenue_growth);
        }
    }

    out
}

/// Calculation name and the preferred detailed field for an operation name
fn calculation_key(operation: &str) -> Option<(&'static str, &'static str)> {
    if operation.contains("burn_rate") {
        Some(("burnRate", "calculated_monthly_burn"))
    } else if operation.contains("runway") {
        Some(("runway", "runway_months"))
    } else if operation.contains("revenue") {
        Some(("futureRevenue", "projected_revenue"))
    } else if operation.contains("hire") {
        Some(("monthlyCost", "monthly_cost"))
    } else {
        None
    }
}

/// Named numeric calculations from execution results
pub fn extract_calculations(results: &[ExecutionResult]) -> BTreeMap<String, f64> {
    let mut calculations = BTreeMap::new();

    for r in results {
        let Some(raw) = r.result else { continue };
        let Some((name, detailed)) = calculation_key(&r.operation) else {
            continue;
        };
        let value = r.params.get(detailed).and_then(Value::as_f64).unwrap_or(raw);
        if value.is_finite() {
            calculations.insert(name.to_string(), value);
        }
    }

    calculations
}
