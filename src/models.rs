//! Core data models for the plan orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type Slots = BTreeMap<String, Value>;
pub type Impact = BTreeMap<String, f64>;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Finance,
    Viewer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BurnRateAnalysis,
    RunwayCalculation,
    RevenueForecast,
    HiringImpact,
    CostOptimization,
    FundraisingStrategy,
    StrategyRecommendation,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Intent::BurnRateAnalysis,
        Intent::RunwayCalculation,
        Intent::RevenueForecast,
        Intent::HiringImpact,
        Intent::CostOptimization,
        Intent::FundraisingStrategy,
        Intent::StrategyRecommendation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::BurnRateAnalysis => "burn_rate_analysis",
            Intent::RunwayCalculation => "runway_calculation",
            Intent::RevenueForecast => "revenue_forecast",
            Intent::HiringImpact => "hiring_impact",
            Intent::CostOptimization => "cost_optimization",
            Intent::FundraisingStrategy => "fundraising_strategy",
            Intent::StrategyRecommendation => "strategy_recommendation",
        }
    }

    pub fn parse(value: &str) -> Option<Intent> {
        let lowered = value.trim().to_lowercase();
        Intent::ALL.into_iter().find(|i| i.as_str() == lowered)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn parse(value: &str) -> Priority {
        match value.trim().to_lowercase().as_str() {
            "critical" | "urgent" => Priority::Critical,
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Draft,
    Applied,
    Approved,
    Rejected,
    Archived,
}

impl PlanStatus {
    /// Transitions are one-way out of `Draft`.
    pub fn can_transition_to(&self, next: PlanStatus) -> bool {
        *self == next || (*self == PlanStatus::Draft && next != PlanStatus::Draft)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Transaction,
    ModelRun,
    Aggregate,
    Assumption,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Baseline,
    Scenario,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Llm,
    Fallback,
}

//
// ================= Requests =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePlanRequest {
    pub goal: String,
    #[serde(default)]
    pub model_run_id: Option<String>,
    #[serde(default)]
    pub constraints: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyPlanRequest {
    pub plan_id: String,
    #[serde(default)]
    pub changes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyPlanResponse {
    pub model_run_id: Uuid,
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePlanRequest {
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub constraints: Option<Value>,
    #[serde(default)]
    pub staged_changes: Option<Vec<Recommendation>>,
    #[serde(default)]
    pub status: Option<PlanStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPlansQuery {
    #[serde(default)]
    pub status: Option<PlanStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

//
// ================= Classification =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentClassification {
    pub intent: Intent,
    pub slots: Slots,
    pub confidence: f64,
    pub fallback_used: bool,
    pub model_used: String,
}

impl IntentClassification {
    /// Deterministic answer when the classifier itself fails
    pub fn default_fallback() -> Self {
        Self {
            intent: Intent::StrategyRecommendation,
            slots: Slots::new(),
            confidence: 0.5,
            fallback_used: true,
            model_used: "default".to_string(),
        }
    }

    pub fn slot_f64(&self, key: &str) -> Option<f64> {
        self.slots.get(key).and_then(Value::as_f64)
    }
}

//
// ================= Grounding =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub id: String,
    pub kind: EvidenceKind,
    pub summary: String,
    #[serde(default)]
    pub value: Option<f64>,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroundingContext {
    pub evidence: Vec<Evidence>,
    pub confidence: f64,
}

impl GroundingContext {
    pub fn evidence_ids(&self) -> Vec<String> {
        self.evidence.iter().map(|e| e.id.clone()).collect()
    }
}

/// Independent signals behind the "has real financial data" decision
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DataSignals {
    pub has_model_run_data: bool,
    pub has_transaction_data: bool,
    pub has_overview_data: bool,
    pub transaction_count: u64,
}

impl DataSignals {
    pub fn has_financial_data(&self, evidence_count: usize) -> bool {
        self.has_model_run_data
            || self.has_transaction_data
            || self.has_overview_data
            || evidence_count > 0
    }
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ComputeBurnRate,
    ComputeRunway,
    ForecastRevenue,
    ComputeHireImpact,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ComputeBurnRate => "compute_burn_rate",
            Operation::ComputeRunway => "compute_runway",
            Operation::ForecastRevenue => "forecast_revenue",
            Operation::ComputeHireImpact => "compute_hire_impact",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub order: u32,
    pub operation: Operation,
    pub params: Slots,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanValidation {
    pub ok: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

/// Internal, pre-persistence bundle of proposed operations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub validation: PlanValidation,
    pub requires_approval: bool,
}

impl Plan {
    pub fn is_executable(&self) -> bool {
        self.validation.ok && !self.requires_approval
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub operation: String,
    pub result: Option<f64>,
    pub params: Slots,
}

//
// ================= Recommendation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub action: String,
    #[serde(default)]
    pub impact: Impact,
    pub priority: Priority,
    pub timeline: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<Uuid>,
}

pub const SETUP_REQUIRED: &str = "setup_required";

impl Recommendation {
    pub fn is_setup_required(&self) -> bool {
        self.kind == SETUP_REQUIRED
    }

    pub fn signature(&self) -> RecommendationSignature {
        RecommendationSignature::of(self)
    }
}

/// Canonical identity of a recommendation for deduplication:
/// `(type, category, impact pairs sorted by key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecommendationSignature {
    kind: String,
    category: String,
    impact: Vec<(String, u64)>,
}

impl RecommendationSignature {
    pub fn of(rec: &Recommendation) -> Self {
        // BTreeMap iteration is already key-sorted; -0.0 folds into 0.0
        let impact = rec
            .impact
            .iter()
            .map(|(k, v)| (k.clone(), (*v + 0.0).to_bits()))
            .collect();

        Self {
            kind: rec.kind.clone(),
            category: rec.category.clone(),
            impact,
        }
    }
}

//
// ================= Response =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    pub intent: Intent,
    pub intent_confidence: f64,
    pub slots: Slots,
    pub classification_model: String,
    pub classification_fallback_used: bool,

    pub grounding_confidence: f64,
    pub evidence_count: usize,
    pub evidence_ids: Vec<String>,
    pub grounding_sufficient: bool,

    pub plan_valid: bool,
    pub plan_issues: Vec<String>,
    pub plan_warnings: Vec<String>,
    pub requires_approval: bool,
    pub operations: Vec<String>,
    pub execution_skipped: bool,

    pub llm_gate_open: bool,
    pub llm_gate_reasons: Vec<String>,
    pub llm_invoked: bool,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<Uuid>,
    pub recommendation_source: RecommendationSource,

    pub has_financial_data: bool,
    pub has_connected_accounting: bool,
    pub data_check: String,
    #[serde(default)]
    pub model_run_id: Option<Uuid>,

    pub stage_errors: Vec<String>,
    pub stage_latencies_ms: BTreeMap<String, u64>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredResponse {
    pub natural_text: String,
    pub calculations: BTreeMap<String, f64>,
    pub recommendations: Vec<Recommendation>,
    pub metadata: ResponseMetadata,
}

//
// ================= Plan Record =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanRecord {
    pub plan_id: Uuid,
    pub org_id: Uuid,
    pub goal: String,
    pub constraints: Value,
    pub staged_changes: Vec<Recommendation>,
    pub structured_response: StructuredResponse,
    pub metadata: ResponseMetadata,
    pub status: PlanStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptRecord {
    pub prompt_id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub model: String,
    pub prompt: String,
    pub response: String,
    pub data_sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

//
// ================= Financial Data =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRun {
    pub run_id: Uuid,
    pub org_id: Uuid,
    pub run_type: RunType,
    pub status: RunStatus,
    #[serde(default)]
    pub overrides: Value,
    #[serde(default)]
    pub summary: Option<Value>,
    #[serde(default)]
    pub parent_run_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ModelRun {
    pub fn has_summary(&self) -> bool {
        match &self.summary {
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// First numeric summary value among `keys`
    pub fn summary_metric(&self, keys: &[&str]) -> Option<f64> {
        let summary = self.summary.as_ref()?;
        keys.iter().find_map(|k| summary.get(*k).and_then(Value::as_f64))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub org_id: Uuid,
    pub date: DateTime<Utc>,
    pub amount: f64,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub is_duplicate: bool,
}

/// Dashboard overview aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DashboardOverview {
    #[serde(default)]
    pub cash_balance: f64,
    #[serde(default)]
    pub monthly_burn: f64,
    #[serde(default)]
    pub runway_months: f64,
    #[serde(default)]
    pub monthly_revenue: f64,
    #[serde(default)]
    pub revenue_growth: f64,
    #[serde(default)]
    pub gross_margin: f64,
    #[serde(default)]
    pub active_customers: f64,
    #[serde(default)]
    pub cac: f64,
    #[serde(default)]
    pub ltv: f64,
    #[serde(default)]
    pub churn_rate: f64,
}

impl DashboardOverview {
    pub fn has_values(&self) -> bool {
        [
            self.cash_balance,
            self.monthly_burn,
            self.runway_months,
            self.monthly_revenue,
            self.active_customers,
        ]
        .iter()
        .any(|v| *v != 0.0)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Applied => "applied",
            PlanStatus::Approved => "approved",
            PlanStatus::Rejected => "rejected",
            PlanStatus::Archived => "archived",
        };
        write!(f, "{}", s)
    }
}
