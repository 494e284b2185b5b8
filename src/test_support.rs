//! Shared fixtures for unit tests

use crate::access::InMemoryOrgDirectory;
use crate::agent::{Collaborators, PlanOrchestrator};
use crate::audit::AuditLog;
use crate::classifier::{IntentClassifier, KeywordIntentClassifier};
use crate::config::PipelineConfig;
use crate::error::{OrchestrationError, ProviderErrorKind};
use crate::jobs::InMemoryJobQueue;
use crate::models::{
    DashboardOverview, Intent, IntentClassification, ModelRun, PlanRecord, PlanStatus, Priority,
    Recommendation, RecommendationSource, ResponseMetadata, Role, RunStatus, RunType, Slots,
    StructuredResponse, Transaction,
};
use crate::recommender::{InMemoryPromptStore, LlmRecommendations, RecommendationRequest, Recommender};
use crate::state::{InMemoryFinanceStore, InMemoryPlanStore, ModelRunStore};
use crate::Result;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ===== Finance fixtures =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinanceFixture {
    /// No runs, transactions or overview
    Empty,
    /// Completed run with runway 4.5 / burn 80000, 12 transactions, overview
    CriticalRunway,
    /// Completed run only
    ModelRunOnly,
    /// Transactions only
    TransactionsOnly,
}

pub fn critical_summary() -> serde_json::Value {
    json!({
        "cash": 360000.0,
        "burnRate": 80000.0,
        "runwayMonths": 4.5,
        "revenue": 40000.0,
        "revenueGrowth": 0.05,
        "grossMargin": 0.6,
        "customers": 120.0,
        "cac": 1500.0,
        "ltv": 3000.0,
        "churnRate": 0.07
    })
}

pub fn baseline_run(org_id: Uuid) -> ModelRun {
    ModelRun {
        run_id: Uuid::new_v4(),
        org_id,
        run_type: RunType::Baseline,
        status: RunStatus::Completed,
        overrides: json!({"costs": {"growth": 0.05}}),
        summary: Some(critical_summary()),
        parent_run_id: None,
        created_by: None,
        created_at: Utc::now() - Duration::days(1),
    }
}

fn transactions(org_id: Uuid, count: usize) -> Vec<Transaction> {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
    (0..count)
        .map(|i| {
            let (amount, category, description) = match i % 3 {
                0 => (-45_000.0, "Payroll", "Monthly payroll"),
                1 => (-12_000.0, "Software", "Cloud hosting"),
                _ => (13_000.0, "Revenue", "Subscription revenue"),
            };
            Transaction {
                transaction_id: Uuid::new_v4(),
                org_id,
                date: start + Duration::days(i as i64 * 7),
                amount,
                category: category.to_string(),
                description: description.to_string(),
                is_duplicate: false,
            }
        })
        .collect()
}

pub async fn seeded_finance(fixture: FinanceFixture) -> (Arc<InMemoryFinanceStore>, Uuid) {
    let store = Arc::new(InMemoryFinanceStore::new());
    let org_id = Uuid::new_v4();

    match fixture {
        FinanceFixture::Empty => {}
        FinanceFixture::CriticalRunway => {
            store.create_run(baseline_run(org_id)).await.unwrap();
            store.add_transactions(transactions(org_id, 12)).await;
            store
                .set_overview(
                    org_id,
                    DashboardOverview {
                        cash_balance: 360_000.0,
                        monthly_burn: 80_000.0,
                        runway_months: 4.5,
                        monthly_revenue: 40_000.0,
                        ..DashboardOverview::default()
                    },
                )
                .await;
        }
        FinanceFixture::ModelRunOnly => {
            store.create_run(baseline_run(org_id)).await.unwrap();
        }
        FinanceFixture::TransactionsOnly => {
            store.add_transactions(transactions(org_id, 12)).await;
        }
    }

    (store, org_id)
}

// ===== Records =====

pub fn sample_recommendation(kind: &str, savings: f64) -> Recommendation {
    Recommendation {
        kind: kind.to_string(),
        category: "cost_management".to_string(),
        action: "Reduce vendor spend".to_string(),
        impact: [("monthlySavings".to_string(), savings)].into_iter().collect(),
        priority: Priority::High,
        timeline: "Next 30 days".to_string(),
        confidence: 0.8,
        reasoning: "Burn exceeds revenue".to_string(),
        assumptions: vec![],
        warnings: vec![],
        evidence: vec!["Monthly burn: $80000 (model run)".to_string()],
        data_sources: vec!["overview:monthly_burn".to_string()],
        prompt_id: None,
    }
}

pub fn sample_metadata() -> ResponseMetadata {
    let mut slots = Slots::new();
    slots.insert("months".to_string(), json!(18));

    ResponseMetadata {
        intent: Intent::RunwayCalculation,
        intent_confidence: 0.8,
        slots,
        classification_model: "keyword-rules".to_string(),
        classification_fallback_used: false,
        grounding_confidence: 0.7,
        evidence_count: 2,
        evidence_ids: vec!["overview:cash".to_string(), "overview:monthly_burn".to_string()],
        grounding_sufficient: true,
        plan_valid: true,
        plan_issues: vec![],
        plan_warnings: vec![],
        requires_approval: false,
        operations: vec!["compute_burn_rate".to_string(), "compute_runway".to_string()],
        execution_skipped: false,
        llm_gate_open: false,
        llm_gate_reasons: vec!["language model provider not configured".to_string()],
        llm_invoked: false,
        llm_model: None,
        prompt_id: None,
        recommendation_source: RecommendationSource::Fallback,
        has_financial_data: true,
        has_connected_accounting: false,
        data_check: "success_path".to_string(),
        model_run_id: None,
        stage_errors: vec![],
        stage_latencies_ms: [("classification".to_string(), 1u64)].into_iter().collect(),
        generated_at: Utc::now(),
    }
}

pub fn sample_response(recommendations: Vec<Recommendation>) -> StructuredResponse {
    StructuredResponse {
        natural_text: "Runway is 4.5 months.".to_string(),
        calculations: [("runway".to_string(), 4.5), ("burnRate".to_string(), 80_000.1)]
            .into_iter()
            .collect::<BTreeMap<_, _>>(),
        recommendations,
        metadata: sample_metadata(),
    }
}

pub fn sample_plan_record(org_id: Uuid) -> PlanRecord {
    let recommendations = vec![
        sample_recommendation("cost_reduction", 16_000.0),
        sample_recommendation("cost_optimization", 0.1 + 0.2),
        sample_recommendation("operational_efficiency", 4_000.0),
    ];
    let now = Utc::now();

    PlanRecord {
        plan_id: Uuid::new_v4(),
        org_id,
        goal: "What is my cash runway?".to_string(),
        constraints: json!({"max_burn": 75000, "notes": "keep hiring plan"}),
        staged_changes: recommendations.clone(),
        structured_response: sample_response(recommendations),
        metadata: sample_metadata(),
        status: PlanStatus::Draft,
        created_by: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
    }
}

// ===== Collaborator doubles =====

/// Classifier that always errors
pub struct FailingClassifier;

#[async_trait]
impl IntentClassifier for FailingClassifier {
    async fn classify(&self, _goal: &str) -> Result<IntentClassification> {
        Err(OrchestrationError::ClassificationError("classifier offline".to_string()))
    }
}

/// Classifier returning a fixed intent and confidence
pub struct FixedClassifier {
    pub intent: Intent,
    pub confidence: f64,
}

#[async_trait]
impl IntentClassifier for FixedClassifier {
    async fn classify(&self, _goal: &str) -> Result<IntentClassification> {
        Ok(IntentClassification {
            intent: self.intent,
            slots: Slots::new(),
            confidence: self.confidence,
            fallback_used: false,
            model_used: "fixed".to_string(),
        })
    }
}

/// Recommender that counts calls and returns canned output
pub struct CountingRecommender {
    pub calls: AtomicUsize,
    pub configured: bool,
    pub fail_with: Option<ProviderErrorKind>,
    /// Replaces the canned recommendations when set
    pub output: Option<Vec<Recommendation>>,
}

impl CountingRecommender {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            configured: true,
            fail_with: None,
            output: None,
        }
    }

    pub fn returning(recommendations: Vec<Recommendation>) -> Self {
        Self {
            output: Some(recommendations),
            ..Self::new()
        }
    }

    pub fn failing(kind: ProviderErrorKind) -> Self {
        Self {
            fail_with: Some(kind),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recommender for CountingRecommender {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }

    async fn recommend(&self, _request: &RecommendationRequest<'_>) -> Result<LlmRecommendations> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(kind) = self.fail_with {
            return Err(OrchestrationError::llm(kind, "provider unavailable"));
        }

        let mut invented = sample_recommendation("cost_reduction", 16_000.0);
        invented.data_sources = vec!["made-up-source".to_string()];

        let recommendations = self.output.clone().unwrap_or_else(|| {
            vec![
                sample_recommendation("cost_reduction", 16_000.0),
                invented,
                sample_recommendation("hiring_freeze", 8_000.0),
            ]
        });

        Ok(LlmRecommendations {
            natural_text: "Runway is short; cut costs now.".to_string(),
            recommendations,
            prompt: "prompt".to_string(),
            raw_response: "{}".to_string(),
        })
    }
}

// ===== Orchestrator harness =====

pub struct Harness {
    pub orchestrator: PlanOrchestrator,
    pub org_id: Uuid,
    pub admin: Uuid,
    pub finance_user: Uuid,
    pub viewer: Uuid,
    pub finance: Arc<InMemoryFinanceStore>,
    pub directory: Arc<InMemoryOrgDirectory>,
    pub jobs: Arc<InMemoryJobQueue>,
    pub audit: Arc<AuditLog>,
    pub prompts: Arc<InMemoryPromptStore>,
}

pub async fn harness(
    fixture: FinanceFixture,
    classifier: Arc<dyn IntentClassifier>,
    recommender: Option<Arc<dyn Recommender>>,
) -> Harness {
    let (finance, org_id) = seeded_finance(fixture).await;

    let directory = Arc::new(InMemoryOrgDirectory::new());
    let admin = Uuid::new_v4();
    let finance_user = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    directory.add_member(org_id, admin, Role::Admin).await;
    directory.add_member(org_id, finance_user, Role::Finance).await;
    directory.add_member(org_id, viewer, Role::Viewer).await;

    let jobs = Arc::new(InMemoryJobQueue::new());
    let audit = Arc::new(AuditLog::new());
    let prompts = Arc::new(InMemoryPromptStore::new());

    let orchestrator = PlanOrchestrator::new(
        Collaborators {
            classifier,
            recommender,
            plans: Arc::new(InMemoryPlanStore::new()),
            runs: finance.clone(),
            finance: finance.clone(),
            directory: directory.clone(),
            prompts: prompts.clone(),
            jobs: jobs.clone(),
            audit: audit.clone(),
        },
        PipelineConfig::default(),
    );

    Harness {
        orchestrator,
        org_id,
        admin,
        finance_user,
        viewer,
        finance,
        directory,
        jobs,
        audit,
        prompts,
    }
}

/// Harness with keyword classification and no language model
pub async fn keyword_harness(fixture: FinanceFixture) -> Harness {
    harness(fixture, Arc::new(KeywordIntentClassifier), None).await
}
