//! Audit logging
//!
//! Every plan mutation is recorded with an integrity hash over the goal and
//! staged changes, so a stored plan can later be checked against its trail.

use crate::models::{PlanRecord, Recommendation};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PlanGenerated,
    PlanApplied,
    PlanUpdated,
    PlanDeleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub audit_id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub action: AuditAction,
    pub plan_id: Uuid,
    pub context_hash: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn for_plan(action: AuditAction, user_id: Uuid, record: &PlanRecord, details: Value) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            org_id: record.org_id,
            user_id,
            action,
            plan_id: record.plan_id,
            context_hash: compute_context_hash(&record.goal, &record.staged_changes),
            details,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<Uuid>;
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, AuditEvent>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<AuditEvent>> {
        let records = self.records.read().await;
        Ok(records.get(&audit_id).cloned())
    }

    /// Events for one plan, oldest first
    pub async fn list_for_plan(&self, plan_id: Uuid) -> Result<Vec<AuditEvent>> {
        let records = self.records.read().await;

        let mut items: Vec<AuditEvent> = records
            .values()
            .filter(|e| e.plan_id == plan_id)
            .cloned()
            .collect();
        items.sort_by_key(|e| e.created_at);

        Ok(items)
    }

    /// True when the stored plan still matches the hash on the audit event
    pub async fn verify_integrity(&self, audit_id: Uuid, record: &PlanRecord) -> Result<bool> {
        let records = self.records.read().await;

        Ok(records.get(&audit_id).is_some_and(|event| {
            event.plan_id == record.plan_id
                && event.context_hash == compute_context_hash(&record.goal, &record.staged_changes)
        }))
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn record(&self, event: AuditEvent) -> Result<Uuid> {
        let audit_id = event.audit_id;
        self.records.write().await.insert(audit_id, event);
        Ok(audit_id)
    }
}

/// SHA256 over the goal and staged changes, streamed straight into the hasher
pub fn compute_context_hash(goal: &str, staged_changes: &[Recommendation]) -> String {
    let mut hasher = Sha256::new();

    hasher.update(goal.as_bytes());
    hasher.update([0u8]);
    if serde_json::to_writer(&mut HashWriter(&mut hasher), staged_changes).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<H: Digest> Write for HashWriter<'_, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
