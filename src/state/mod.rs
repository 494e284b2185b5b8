//! State persistence layer
//!
//! Plan records and model runs. In-memory stores back development and
//! tests; `PgPlanStore` persists plan records in Postgres.

use crate::error::OrchestrationError;
use crate::models::{ModelRun, PlanRecord, PlanStatus};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod finance;
pub mod postgres;

pub use finance::{FinanceFixtureFile, FixtureMember, InMemoryFinanceStore};
pub use postgres::PgPlanStore;

/// Trait for plan record persistence. Every lookup is scoped to the owning org.
#[async_trait::async_trait]
pub trait PlanStore: Send + Sync {
    async fn insert(&self, record: &PlanRecord) -> Result<()>;
    async fn get(&self, org_id: Uuid, plan_id: Uuid) -> Result<Option<PlanRecord>>;
    /// Newest first
    async fn list(
        &self,
        org_id: Uuid,
        status: Option<PlanStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PlanRecord>>;
    async fn update(&self, record: &PlanRecord) -> Result<()>;
    async fn delete(&self, org_id: Uuid, plan_id: Uuid) -> Result<bool>;
}

/// Trait for model run lookup and creation
#[async_trait::async_trait]
pub trait ModelRunStore: Send + Sync {
    async fn get_run(&self, org_id: Uuid, run_id: Uuid) -> Result<Option<ModelRun>>;
    async fn latest_completed_run(&self, org_id: Uuid) -> Result<Option<ModelRun>>;
    async fn create_run(&self, run: ModelRun) -> Result<()>;
}

/// In-memory plan store for development
pub struct InMemoryPlanStore {
    plans: Arc<RwLock<HashMap<Uuid, PlanRecord>>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self {
            plans: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryPlanStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn insert(&self, record: &PlanRecord) -> Result<()> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&record.plan_id) {
            return Err(OrchestrationError::Conflict(format!(
                "Plan {} already exists",
                record.plan_id
            )));
        }
        plans.insert(record.plan_id, record.clone());
        Ok(())
    }

    async fn get(&self, org_id: Uuid, plan_id: Uuid) -> Result<Option<PlanRecord>> {
        let plans = self.plans.read().await;
        Ok(plans
            .get(&plan_id)
            .filter(|p| p.org_id == org_id)
            .cloned())
    }

    async fn list(
        &self,
        org_id: Uuid,
        status: Option<PlanStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PlanRecord>> {
        let plans = self.plans.read().await;

        let mut items: Vec<&PlanRecord> = plans
            .values()
            .filter(|p| p.org_id == org_id)
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(items
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, record: &PlanRecord) -> Result<()> {
        let mut plans = self.plans.write().await;
        match plans.get_mut(&record.plan_id) {
            Some(existing) if existing.org_id == record.org_id => {
                *existing = record.clone();
                Ok(())
            }
            _ => Err(OrchestrationError::NotFound(format!(
                "Plan {} not found",
                record.plan_id
            ))),
        }
    }

    async fn delete(&self, org_id: Uuid, plan_id: Uuid) -> Result<bool> {
        let mut plans = self.plans.write().await;
        if plans.get(&plan_id).is_some_and(|p| p.org_id == org_id) {
            plans.remove(&plan_id);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_plan_record;

    #[tokio::test]
    async fn test_plan_store_is_org_scoped() {
        let store = InMemoryPlanStore::new();
        let record = sample_plan_record(Uuid::new_v4());
        store.insert(&record).await.unwrap();

        assert!(store.get(record.org_id, record.plan_id).await.unwrap().is_some());
        assert!(store.get(Uuid::new_v4(), record.plan_id).await.unwrap().is_none());
        assert!(!store.delete(Uuid::new_v4(), record.plan_id).await.unwrap());
        assert!(store.delete(record.org_id, record.plan_id).await.unwrap());
        assert!(store.get(record.org_id, record.plan_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_is_byte_identical() {
        let store = InMemoryPlanStore::new();
        let record = sample_plan_record(Uuid::new_v4());
        store.insert(&record).await.unwrap();

        let fetched = store.get(record.org_id, record.plan_id).await.unwrap().unwrap();
        assert_eq!(
            serde_json::to_vec(&record.staged_changes).unwrap(),
            serde_json::to_vec(&fetched.staged_changes).unwrap()
        );
        assert_eq!(
            serde_json::to_vec(&record.metadata).unwrap(),
            serde_json::to_vec(&fetched.metadata).unwrap()
        );

        // Through JSON as well, the way the Postgres store persists it
        let json = serde_json::to_string(&record).unwrap();
        let decoded: PlanRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&decoded).unwrap(), json);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = InMemoryPlanStore::new();
        let org_id = Uuid::new_v4();

        for i in 0..5 {
            let mut record = sample_plan_record(org_id);
            record.created_at = record.created_at + chrono::Duration::seconds(i);
            if i == 0 {
                record.status = PlanStatus::Archived;
            }
            store.insert(&record).await.unwrap();
        }

        let drafts = store
            .list(org_id, Some(PlanStatus::Draft), 10, 0)
            .await
            .unwrap();
        assert_eq!(drafts.len(), 4);
        assert!(drafts.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let page = store.list(org_id, None, 2, 4).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].status, PlanStatus::Archived);
    }
}
