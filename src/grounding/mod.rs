//! Grounding / retrieval
//!
//! Collects evidence for a goal from the organization's real data:
//! model run summaries, non-duplicate transactions and the dashboard
//! overview aggregate. Nothing here invents values.

use crate::models::{
    DashboardOverview, DataSignals, Evidence, EvidenceKind, GroundingContext, Intent, ModelRun,
    Slots, Transaction,
};
use crate::state::ModelRunStore;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ledger-side collaborator (transactions and aggregates)
#[async_trait]
pub trait FinancialDataSource: Send + Sync {
    /// Most recent non-duplicate transactions, newest first
    async fn recent_transactions(&self, org_id: Uuid, limit: usize) -> Result<Vec<Transaction>>;
    /// Count of non-duplicate transactions
    async fn transaction_count(&self, org_id: Uuid) -> Result<u64>;
    async fn dashboard_overview(&self, org_id: Uuid) -> Result<DashboardOverview>;
}

/// Canonical summary metrics and the keys they appear under in run summaries
pub const SUMMARY_METRICS: &[(&str, &[&str])] = &[
    ("cash", &["cash", "cashBalance", "cash_balance"]),
    ("monthly_burn", &["burnRate", "monthlyBurn", "burn_rate", "monthly_burn"]),
    ("runway_months", &["runwayMonths", "runway", "runway_months"]),
    ("monthly_revenue", &["revenue", "monthlyRevenue", "monthly_revenue", "mrr"]),
    ("revenue_growth", &["revenueGrowth", "growthRate", "growth", "revenue_growth"]),
    ("gross_margin", &["grossMargin", "margin", "gross_margin"]),
    ("customers", &["customers", "customerCount", "activeCustomers", "customer_count"]),
    ("cac", &["cac", "CAC"]),
    ("ltv", &["ltv", "LTV"]),
    ("churn_rate", &["churnRate", "churn", "churn_rate"]),
];

pub fn summary_aliases(metric: &str) -> &'static [&'static str] {
    SUMMARY_METRICS
        .iter()
        .find(|(name, _)| *name == metric)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

fn relevant_metrics(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::RunwayCalculation
        | Intent::BurnRateAnalysis
        | Intent::CostOptimization
        | Intent::HiringImpact => &["cash", "monthly_burn", "runway_months", "monthly_revenue"],
        Intent::RevenueForecast => &[
            "monthly_revenue",
            "revenue_growth",
            "customers",
            "churn_rate",
            "gross_margin",
        ],
        Intent::FundraisingStrategy => &[
            "cash",
            "monthly_burn",
            "runway_months",
            "monthly_revenue",
            "revenue_growth",
        ],
        Intent::StrategyRecommendation => &[
            "cash",
            "monthly_burn",
            "runway_months",
            "monthly_revenue",
            "revenue_growth",
            "gross_margin",
            "customers",
            "cac",
            "ltv",
            "churn_rate",
        ],
    }
}

/// Everything the grounding stage learned about the organization
#[derive(Debug, Clone, Default)]
pub struct GroundingOutcome {
    pub context: GroundingContext,
    pub signals: DataSignals,
    pub model_run: Option<ModelRun>,
    pub overview: Option<DashboardOverview>,
    /// Non-duplicate transaction history, newest first
    pub transactions: Vec<Transaction>,
    pub sufficient: bool,
}

/// Transactions read for burn and revenue estimates; evidence uses only the
/// newest `transaction_limit` of them
const TRANSACTION_HISTORY_LIMIT: usize = 500;

pub struct GroundingService {
    runs: Arc<dyn ModelRunStore>,
    data: Arc<dyn FinancialDataSource>,
    transaction_limit: usize,
}

impl GroundingService {
    pub fn new(
        runs: Arc<dyn ModelRunStore>,
        data: Arc<dyn FinancialDataSource>,
        transaction_limit: usize,
    ) -> Self {
        Self {
            runs,
            data,
            transaction_limit,
        }
    }

    /// Retrieve evidence. A failing signal is read as absent; the stage only
    /// fails when every signal query it attempted failed.
    pub async fn retrieve(
        &self,
        org_id: Uuid,
        intent: Intent,
        slots: &Slots,
        explicit_run: Option<ModelRun>,
    ) -> Result<GroundingOutcome> {
        let mut failures = Vec::new();
        let mut attempted = 0usize;

        let model_run = match explicit_run {
            Some(run) => Some(run),
            None => {
                attempted += 1;
                match self.runs.latest_completed_run(org_id).await {
                    Ok(run) => run,
                    Err(e) => {
                        warn!(org_id = %org_id, error = %e, "Model run lookup failed");
                        failures.push(e);
                        None
                    }
                }
            }
        };

        attempted += 1;
        let transaction_count = match self.data.transaction_count(org_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(org_id = %org_id, error = %e, "Transaction count lookup failed");
                failures.push(e);
                0
            }
        };

        let transactions = if transaction_count > 0 {
            self.data
                .recent_transactions(org_id, self.transaction_limit.max(TRANSACTION_HISTORY_LIMIT))
                .await
                .unwrap_or_else(|e| {
                    warn!(org_id = %org_id, error = %e, "Transaction lookup failed");
                    Vec::new()
                })
        } else {
            Vec::new()
        };

        attempted += 1;
        let overview = match self.data.dashboard_overview(org_id).await {
            Ok(overview) => Some(overview),
            Err(e) => {
                warn!(org_id = %org_id, error = %e, "Dashboard overview lookup failed");
                failures.push(e);
                None
            }
        };

        if failures.len() == attempted {
            if let Some(e) = failures.into_iter().next() {
                return Err(crate::error::OrchestrationError::GroundingError(format!(
                    "All grounding signals unavailable: {}",
                    e
                )));
            }
        }

        let signals = DataSignals {
            has_model_run_data: model_run.as_ref().is_some_and(ModelRun::has_summary),
            has_transaction_data: transaction_count > 0,
            has_overview_data: overview.as_ref().is_some_and(DashboardOverview::has_values),
            transaction_count,
        };

        let mut evidence = Vec::new();
        if let Some(run) = model_run.as_ref().filter(|r| r.has_summary()) {
            evidence.extend(run_evidence(run, intent));
        }
        let transactions: Vec<Transaction> =
            transactions.into_iter().filter(|t| !t.is_duplicate).collect();
        let recent = transactions.iter().take(self.transaction_limit).cloned().collect();
        evidence.extend(transaction_evidence(recent, intent, slots));
        if let Some(ov) = overview.as_ref().filter(|o| o.has_values()) {
            evidence.extend(overview_evidence(ov, intent));
        }

        let confidence = grounding_confidence(&signals, evidence.len());
        let context = GroundingContext {
            evidence,
            confidence,
        };
        let sufficient = is_sufficient(&context);

        if !sufficient {
            info!(
                org_id = %org_id,
                confidence = context.confidence,
                evidence = context.evidence.len(),
                "Grounding insufficient for LLM recommendations"
            );
        }

        debug!(
            org_id = %org_id,
            has_model_run = signals.has_model_run_data,
            transactions = signals.transaction_count,
            has_overview = signals.has_overview_data,
            "Grounding complete"
        );

        Ok(GroundingOutcome {
            context,
            signals,
            model_run,
            overview,
            transactions,
            sufficient,
        })
    }

    /// Data check used when the grounding stage itself failed: a direct
    /// re-query of transaction count and model run existence.
    pub async fn recovery_has_data(&self, org_id: Uuid) -> bool {
        let has_transactions = self
            .data
            .transaction_count(org_id)
            .await
            .map(|c| c > 0)
            .unwrap_or(false);
        let has_run = self
            .runs
            .latest_completed_run(org_id)
            .await
            .map(|r| r.is_some())
            .unwrap_or(false);

        has_transactions || has_run
    }
}

pub fn is_sufficient(context: &GroundingContext) -> bool {
    context.confidence >= 0.6 && context.evidence.len() >= 2
}

fn grounding_confidence(signals: &DataSignals, evidence_count: usize) -> f64 {
    let mut confidence = 0.0;
    if signals.has_model_run_data {
        confidence += 0.4;
    }
    if signals.has_transaction_data {
        confidence += 0.3 * (signals.transaction_count.min(10) as f64 / 10.0);
    }
    if signals.has_overview_data {
        confidence += 0.2;
    }
    if evidence_count >= 5 {
        confidence += 0.1;
    }
    (confidence * 1000.0).round().min(1000.0) / 1000.0
}

fn run_evidence(run: &ModelRun, intent: Intent) -> Vec<Evidence> {
    let short_id: String = run.run_id.to_string().chars().take(8).collect();

    relevant_metrics(intent)
        .iter()
        .filter_map(|metric| {
            let value = run.summary_metric(summary_aliases(metric))?;
            Some(Evidence {
                id: format!("run:{}:{}", run.run_id, metric),
                kind: EvidenceKind::ModelRun,
                summary: format!("Model run {}: {} = {}", short_id, metric, format_value(value)),
                value: Some(value),
                source: "model_run".to_string(),
            })
        })
        .collect()
}

fn transaction_evidence(
    mut transactions: Vec<Transaction>,
    intent: Intent,
    slots: &Slots,
) -> Vec<Evidence> {
    let focus = match intent {
        Intent::HiringImpact => Some("payroll"),
        _ if slots.contains_key("hire_count") => Some("payroll"),
        Intent::RevenueForecast => Some("revenue"),
        _ => None,
    };

    if let Some(focus) = focus {
        // stable: keeps recency order inside each group
        transactions.sort_by_key(|t| !t.category.to_lowercase().contains(focus));
    }

    transactions
        .into_iter()
        .filter(|t| !t.is_duplicate)
        .map(|t| Evidence {
            id: format!("txn:{}", t.transaction_id),
            kind: EvidenceKind::Transaction,
            summary: format!(
                "{} {}: {:.2} ({})",
                t.date.format("%Y-%m-%d"),
                t.category,
                t.amount,
                t.description
            ),
            value: Some(t.amount),
            source: "transactions".to_string(),
        })
        .collect()
}

fn overview_evidence(overview: &DashboardOverview, intent: Intent) -> Vec<Evidence> {
    let fields = [
        ("cash", overview.cash_balance),
        ("monthly_burn", overview.monthly_burn),
        ("runway_months", overview.runway_months),
        ("monthly_revenue", overview.monthly_revenue),
        ("revenue_growth", overview.revenue_growth),
        ("gross_margin", overview.gross_margin),
        ("customers", overview.active_customers),
        ("cac", overview.cac),
        ("ltv", overview.ltv),
        ("churn_rate", overview.churn_rate),
    ];
    let relevant = relevant_metrics(intent);

    fields
        .into_iter()
        .filter(|(name, value)| *value != 0.0 && relevant.contains(name))
        .map(|(name, value)| Evidence {
            id: format!("overview:{}", name),
            kind: EvidenceKind::Aggregate,
            summary: format!("Dashboard overview: {} = {}", name, format_value(value)),
            value: Some(value),
            source: "dashboard_overview".to_string(),
        })
        .collect()
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::test_support::{baseline_run, seeded_finance, FinanceFixture};

    #[tokio::test]
    async fn test_empty_org_has_no_evidence() {
        let (store, org_id) = seeded_finance(FinanceFixture::Empty).await;
        let service = GroundingService::new(store.clone(), store, 10);

        let outcome = service
            .retrieve(org_id, Intent::RunwayCalculation, &Slots::new(), None)
            .await
            .unwrap();

        assert!(outcome.context.evidence.is_empty());
        assert_eq!(outcome.context.confidence, 0.0);
        assert!(!outcome.signals.has_financial_data(0));
        assert!(!outcome.sufficient);
        assert!(!service.recovery_has_data(org_id).await);
    }

    #[tokio::test]
    async fn test_full_org_is_sufficient() {
        let (store, org_id) = seeded_finance(FinanceFixture::CriticalRunway).await;
        let service = GroundingService::new(store.clone(), store, 10);

        let outcome = service
            .retrieve(org_id, Intent::RunwayCalculation, &Slots::new(), None)
            .await
            .unwrap();

        assert!(outcome.signals.has_model_run_data);
        assert!(outcome.signals.has_transaction_data);
        assert!(outcome.context.confidence >= 0.6);
        assert!(outcome.sufficient);
        assert!(outcome
            .context
            .evidence
            .iter()
            .any(|e| e.id.ends_with(":runway_months") && e.value == Some(4.5)));
        assert!(service.recovery_has_data(org_id).await);
    }

    struct OfflineLedger;

    #[async_trait]
    impl FinancialDataSource for OfflineLedger {
        async fn recent_transactions(&self, _: Uuid, _: usize) -> Result<Vec<Transaction>> {
            Err(OrchestrationError::DatabaseError("ledger offline".to_string()))
        }

        async fn transaction_count(&self, _: Uuid) -> Result<u64> {
            Err(OrchestrationError::DatabaseError("ledger offline".to_string()))
        }

        async fn dashboard_overview(&self, _: Uuid) -> Result<DashboardOverview> {
            Err(OrchestrationError::DatabaseError("ledger offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_explicit_run_with_ledger_offline_fails() {
        let (store, org_id) = seeded_finance(FinanceFixture::Empty).await;
        let service = GroundingService::new(store, Arc::new(OfflineLedger), 10);

        let result = service
            .retrieve(
                org_id,
                Intent::RunwayCalculation,
                &Slots::new(),
                Some(baseline_run(org_id)),
            )
            .await;

        assert!(matches!(result, Err(OrchestrationError::GroundingError(_))));
    }

    #[tokio::test]
    async fn test_partial_outage_still_grounds() {
        let (store, org_id) = seeded_finance(FinanceFixture::ModelRunOnly).await;
        let service = GroundingService::new(store, Arc::new(OfflineLedger), 10);

        let outcome = service
            .retrieve(org_id, Intent::RunwayCalculation, &Slots::new(), None)
            .await
            .unwrap();

        assert!(outcome.signals.has_model_run_data);
        assert!(!outcome.signals.has_transaction_data);
    }

    #[test]
    fn test_confidence_weights() {
        let signals = DataSignals {
            has_model_run_data: true,
            has_transaction_data: true,
            has_overview_data: false,
            transaction_count: 5,
        };
        assert_eq!(grounding_confidence(&signals, 3), 0.55);
        assert_eq!(grounding_confidence(&signals, 6), 0.65);
    }
}
