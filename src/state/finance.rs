//! In-memory finance store
//!
//! Holds model runs, transactions and dashboard overviews per org.
//! Serves both the grounding data source and the model run store; can be
//! seeded from a JSON fixture for local runs.

use crate::grounding::FinancialDataSource;
use crate::models::{DashboardOverview, ModelRun, Role, RunStatus, RunType, Transaction};
use crate::state::ModelRunStore;
use crate::Result;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureMember {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
}

/// Fixture file layout for `FINANCE_FIXTURE_PATH`
#[derive(Debug, Default, Deserialize)]
pub struct FinanceFixtureFile {
    #[serde(default)]
    pub model_runs: Vec<ModelRun>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub overviews: HashMap<Uuid, DashboardOverview>,
    #[serde(default)]
    pub members: Vec<FixtureMember>,
    #[serde(default)]
    pub connected_orgs: Vec<Uuid>,
}

impl FinanceFixtureFile {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let fixture = serde_json::from_str(&raw)?;
        info!(path = %path.as_ref().display(), "Finance fixture loaded");
        Ok(fixture)
    }

    /// One organization with a completed baseline run and a dashboard
    /// overview, administered by `user_id`
    pub fn demo(org_id: Uuid, user_id: Uuid) -> Self {
        let run = ModelRun {
            run_id: Uuid::new_v4(),
            org_id,
            run_type: RunType::Baseline,
            status: RunStatus::Completed,
            overrides: json!({ "costs": { "growth": 0.03 } }),
            summary: Some(json!({
                "cash": 420000.0,
                "burnRate": 85000.0,
                "runwayMonths": 4.94,
                "revenue": 52000.0,
                "revenueGrowth": 0.08,
                "grossMargin": 0.7,
                "customers": 140.0,
                "cac": 1200.0,
                "ltv": 4800.0,
                "churnRate": 0.03
            })),
            parent_run_id: None,
            created_by: Some(user_id),
            created_at: Utc::now() - Duration::days(2),
        };
        let overview = DashboardOverview {
            cash_balance: 420_000.0,
            monthly_burn: 85_000.0,
            runway_months: 4.94,
            monthly_revenue: 52_000.0,
            ..DashboardOverview::default()
        };

        Self {
            model_runs: vec![run],
            transactions: Vec::new(),
            overviews: HashMap::from([(org_id, overview)]),
            members: vec![FixtureMember {
                org_id,
                user_id,
                role: Role::Admin,
            }],
            connected_orgs: Vec::new(),
        }
    }
}

pub struct InMemoryFinanceStore {
    runs: Arc<RwLock<HashMap<Uuid, ModelRun>>>,
    transactions: Arc<RwLock<Vec<Transaction>>>,
    overviews: Arc<RwLock<HashMap<Uuid, DashboardOverview>>>,
}

impl InMemoryFinanceStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            transactions: Arc::new(RwLock::new(Vec::new())),
            overviews: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn from_fixture(path: impl AsRef<Path>) -> Result<Self> {
        Self::seeded(&FinanceFixtureFile::load(path).await?).await
    }

    pub async fn seeded(fixture: &FinanceFixtureFile) -> Result<Self> {
        let store = Self::new();
        for run in &fixture.model_runs {
            store.create_run(run.clone()).await?;
        }
        store.add_transactions(fixture.transactions.iter().cloned()).await;
        for (org_id, overview) in &fixture.overviews {
            store.set_overview(*org_id, overview.clone()).await;
        }

        info!(
            runs = fixture.model_runs.len(),
            transactions = fixture.transactions.len(),
            "Finance store seeded"
        );
        Ok(store)
    }

    pub async fn add_transactions(&self, items: impl IntoIterator<Item = Transaction>) {
        self.transactions.write().await.extend(items);
    }

    pub async fn set_overview(&self, org_id: Uuid, overview: DashboardOverview) {
        self.overviews.write().await.insert(org_id, overview);
    }

    pub async fn runs_for_org(&self, org_id: Uuid) -> Vec<ModelRun> {
        self.runs
            .read()
            .await
            .values()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryFinanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ModelRunStore for InMemoryFinanceStore {
    async fn get_run(&self, org_id: Uuid, run_id: Uuid) -> Result<Option<ModelRun>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).filter(|r| r.org_id == org_id).cloned())
    }

    async fn latest_completed_run(&self, org_id: Uuid) -> Result<Option<ModelRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .filter(|r| r.org_id == org_id && r.status == RunStatus::Completed)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn create_run(&self, run: ModelRun) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run);
        Ok(())
    }
}

#[async_trait::async_trait]
impl FinancialDataSource for InMemoryFinanceStore {
    async fn recent_transactions(&self, org_id: Uuid, limit: usize) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;

        let mut items: Vec<Transaction> = transactions
            .iter()
            .filter(|t| t.org_id == org_id && !t.is_duplicate)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.date.cmp(&a.date));
        items.truncate(limit);

        Ok(items)
    }

    async fn transaction_count(&self, org_id: Uuid) -> Result<u64> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .iter()
            .filter(|t| t.org_id == org_id && !t.is_duplicate)
            .count() as u64)
    }

    async fn dashboard_overview(&self, org_id: Uuid) -> Result<DashboardOverview> {
        let overviews = self.overviews.read().await;
        Ok(overviews.get(&org_id).cloned().unwrap_or_default())
    }
}
