//! Calculation tools and registry
//!
//! Tools are deterministic, side-effect-free financial calculations
//! (burn rate, runway, revenue forecast, hire impact). The pipeline treats
//! them as a black-box engine looked up by operation name.

use crate::config::FinancialDefaults;
use crate::error::OrchestrationError;
use crate::models::{Operation, Slots};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: Slots,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
}

impl ToolOutput {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

/// Trait for a single tool (deterministic execution)
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn param_f64(input: &ToolInput, key: &str) -> Option<f64> {
    input.parameters.get(key).and_then(Value::as_f64)
}

fn require_f64(input: &ToolInput, key: &str) -> Result<f64> {
    param_f64(input, key).ok_or_else(|| {
        OrchestrationError::InvalidToolInput(format!(
            "{} requires numeric '{}'",
            input.tool_name, key
        ))
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct BurnRateTool;

#[async_trait::async_trait]
impl Tool for BurnRateTool {
    fn name(&self) -> &'static str {
        Operation::ComputeBurnRate.as_str()
    }

    fn description(&self) -> &'static str {
        "Gross and net monthly burn from expenses and revenue"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let revenue = param_f64(input, "monthly_revenue").unwrap_or(0.0);

        let (gross, net) = match param_f64(input, "monthly_expenses") {
            Some(expenses) => (expenses, (expenses - revenue).max(0.0)),
            None => {
                let burn = require_f64(input, "monthly_burn")?;
                (burn, burn)
            }
        };

        Ok(ToolOutput::ok(json!({
            "result": round2(gross),
            "gross_monthly_burn": round2(gross),
            "calculated_monthly_burn": round2(net),
        })))
    }
}

pub struct RunwayTool;

#[async_trait::async_trait]
impl Tool for RunwayTool {
    fn name(&self) -> &'static str {
        Operation::ComputeRunway.as_str()
    }

    fn description(&self) -> &'static str {
        "Months of runway from cash balance and net monthly burn"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let cash = require_f64(input, "cash")?;
        let burn = require_f64(input, "monthly_burn")?;

        if burn <= 0.0 {
            return Err(OrchestrationError::ToolError(
                "Runway is undefined when monthly burn is not positive".to_string(),
            ));
        }

        let months = round2(cash / burn);
        Ok(ToolOutput::ok(json!({
            "result": months,
            "runway_months": months,
        })))
    }
}

pub struct ForecastRevenueTool;

#[async_trait::async_trait]
impl Tool for ForecastRevenueTool {
    fn name(&self) -> &'static str {
        Operation::ForecastRevenue.as_str()
    }

    fn description(&self) -> &'static str {
        "Compound monthly revenue projection"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let revenue = require_f64(input, "monthly_revenue")?;
        let growth = param_f64(input, "growth_rate").unwrap_or(0.0);
        let months = param_f64(input, "months").unwrap_or(12.0).round().max(1.0) as i32;

        let projected = revenue * (1.0 + growth).powi(months);
        let total: f64 = (1..=months).map(|m| revenue * (1.0 + growth).powi(m)).sum();

        Ok(ToolOutput::ok(json!({
            "result": round2(projected),
            "projected_revenue": round2(projected),
            "total_revenue": round2(total),
            "months": months,
        })))
    }
}

pub struct HireImpactTool {
    defaults: FinancialDefaults,
}

impl HireImpactTool {
    pub fn new(defaults: FinancialDefaults) -> Self {
        Self { defaults }
    }
}

#[async_trait::async_trait]
impl Tool for HireImpactTool {
    fn name(&self) -> &'static str {
        Operation::ComputeHireImpact.as_str()
    }

    fn description(&self) -> &'static str {
        "Loaded monthly cost of new hires and the resulting runway"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let count = param_f64(input, "hire_count").unwrap_or(1.0);
        let salary = param_f64(input, "annual_salary").unwrap_or(self.defaults.annual_salary);
        let monthly_cost = round2(count * salary * (1.0 + self.defaults.benefits_load) / 12.0);

        let mut data = json!({
            "result": monthly_cost,
            "monthly_cost": monthly_cost,
            "annual_cost": round2(monthly_cost * 12.0),
            "annual_salary": salary,
        });

        if let (Some(cash), Some(burn)) = (param_f64(input, "cash"), param_f64(input, "monthly_burn")) {
            let new_burn = burn + monthly_cost;
            data["new_monthly_burn"] = json!(round2(new_burn));
            if new_burn > 0.0 {
                data["new_runway_months"] = json!(round2(cash / new_burn));
            }
        }

        Ok(ToolOutput::ok(data))
    }
}

/// Registry with every calculation the planner can emit
pub fn create_default_registry(defaults: &FinancialDefaults) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(BurnRateTool));
    registry.register(Arc::new(RunwayTool));
    registry.register(Arc::new(ForecastRevenueTool));
    registry.register(Arc::new(HireImpactTool::new(defaults.clone())));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(tool: &str, params: Value) -> ToolInput {
        ToolInput {
            tool_name: tool.to_string(),
            parameters: params
                .as_object()
                .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        }
    }

    #[test]
    fn test_registry_covers_operations() {
        let registry = create_default_registry(&FinancialDefaults::default());
        for op in [
            Operation::ComputeBurnRate,
            Operation::ComputeRunway,
            Operation::ForecastRevenue,
            Operation::ComputeHireImpact,
        ] {
            assert!(registry.get(op.as_str()).is_some(), "{}", op.as_str());
        }
        assert_eq!(registry.list().len(), 4);
    }

    #[test]
    fn test_burn_rate_net_of_revenue() {
        let out = tokio_test::block_on(BurnRateTool.execute(&input(
            "compute_burn_rate",
            json!({"monthly_expenses": 120000.0, "monthly_revenue": 40000.0}),
        )))
        .unwrap();
        assert_eq!(out.data["result"], json!(120000.0));
        assert_eq!(out.data["calculated_monthly_burn"], json!(80000.0));
    }

    #[tokio::test]
    async fn test_runway_requires_positive_burn() {
        let ok = RunwayTool
            .execute(&input("compute_runway", json!({"cash": 360000.0, "monthly_burn": 80000.0})))
            .await
            .unwrap();
        assert_eq!(ok.data["runway_months"], json!(4.5));

        let err = RunwayTool
            .execute(&input("compute_runway", json!({"cash": 360000.0, "monthly_burn": 0.0})))
            .await;
        assert!(err.is_err());

        let missing = RunwayTool
            .execute(&input("compute_runway", json!({"monthly_burn": 10.0})))
            .await;
        assert!(matches!(missing, Err(OrchestrationError::InvalidToolInput(_))));
    }

    #[tokio::test]
    async fn test_forecast_and_hire_impact() {
        let forecast = ForecastRevenueTool
            .execute(&input(
                "forecast_revenue",
                json!({"monthly_revenue": 10000.0, "growth_rate": 0.1, "months": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(forecast.data["projected_revenue"], json!(12100.0));
        assert_eq!(forecast.data["total_revenue"], json!(23100.0));

        let hire = HireImpactTool::new(FinancialDefaults::default())
            .execute(&input(
                "compute_hire_impact",
                json!({"hire_count": 2, "cash": 300000.0, "monthly_burn": 25000.0}),
            ))
            .await
            .unwrap();
        assert_eq!(hire.data["monthly_cost"], json!(25000.0));
        assert_eq!(hire.data["new_runway_months"], json!(6.0));
    }
}
