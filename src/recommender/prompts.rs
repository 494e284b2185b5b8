//! Prompt storage for LLM call traceability

use crate::models::PromptRecord;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn save(&self, record: PromptRecord) -> Result<Uuid>;
    /// Org-scoped lookup; a prompt owned by another org is reported absent
    async fn get(&self, org_id: Uuid, prompt_id: Uuid) -> Result<Option<PromptRecord>>;
}

pub struct InMemoryPromptStore {
    prompts: Arc<RwLock<HashMap<Uuid, PromptRecord>>>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self {
            prompts: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryPromptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptStore for InMemoryPromptStore {
    async fn save(&self, record: PromptRecord) -> Result<Uuid> {
        let prompt_id = record.prompt_id;
        self.prompts.write().await.insert(prompt_id, record);
        Ok(prompt_id)
    }

    async fn get(&self, org_id: Uuid, prompt_id: Uuid) -> Result<Option<PromptRecord>> {
        let prompts = self.prompts.read().await;
        Ok(prompts
            .get(&prompt_id)
            .filter(|p| p.org_id == org_id)
            .cloned())
    }
}
