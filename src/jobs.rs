//! Job queue for derived scenario runs
//!
//! Workers live outside this crate; the orchestrator only enqueues.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub org_id: Uuid,
    pub job_type: String,
    pub payload: Value,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

pub const MODEL_RUN_JOB: &str = "model_run";

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<Uuid>;
}

pub struct InMemoryJobQueue {
    jobs: Arc<RwLock<Vec<Job>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn jobs_for_org(&self, org_id: Uuid) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|j| j.org_id == org_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<Uuid> {
        let job_id = job.job_id;
        self.jobs.write().await.push(job);
        Ok(job_id)
    }
}
