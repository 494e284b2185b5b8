//! Organization membership and connector status

use crate::error::OrchestrationError;
use crate::models::Role;
use crate::state::FinanceFixtureFile;
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// Role of `user_id` in `org_id`, `None` when not a member
    async fn role_of(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<Role>>;
    /// Whether an external accounting connector is linked
    async fn has_connected_accounting(&self, org_id: Uuid) -> Result<bool>;
}

/// Check membership and that the caller holds one of `allowed`
pub async fn require_role(
    directory: &dyn OrgDirectory,
    org_id: Uuid,
    user_id: Uuid,
    allowed: &[Role],
) -> Result<Role> {
    match directory.role_of(org_id, user_id).await? {
        Some(role) if allowed.contains(&role) => Ok(role),
        Some(role) => Err(OrchestrationError::Forbidden(format!(
            "Role '{:?}' may not perform this operation",
            role
        ))),
        None => Err(OrchestrationError::Forbidden(
            "User is not a member of this organization".to_string(),
        )),
    }
}

pub const WRITERS: &[Role] = &[Role::Admin, Role::Finance];
pub const ADMINS: &[Role] = &[Role::Admin];
pub const MEMBERS: &[Role] = &[Role::Admin, Role::Finance, Role::Viewer];

pub struct InMemoryOrgDirectory {
    members: Arc<RwLock<HashMap<(Uuid, Uuid), Role>>>,
    connected: Arc<RwLock<HashSet<Uuid>>>,
}

impl InMemoryOrgDirectory {
    pub fn new() -> Self {
        Self {
            members: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Directory holding the fixture's members and connector flags
    pub async fn from_fixture(fixture: &FinanceFixtureFile) -> Self {
        let directory = Self::new();
        for member in &fixture.members {
            directory
                .add_member(member.org_id, member.user_id, member.role)
                .await;
        }
        for org_id in &fixture.connected_orgs {
            directory.set_connected(*org_id, true).await;
        }
        directory
    }

    pub async fn add_member(&self, org_id: Uuid, user_id: Uuid, role: Role) {
        self.members.write().await.insert((org_id, user_id), role);
    }

    pub async fn set_connected(&self, org_id: Uuid, connected: bool) {
        let mut orgs = self.connected.write().await;
        if connected {
            orgs.insert(org_id);
        } else {
            orgs.remove(&org_id);
        }
    }
}

impl Default for InMemoryOrgDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrgDirectory for InMemoryOrgDirectory {
    async fn role_of(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<Role>> {
        Ok(self.members.read().await.get(&(org_id, user_id)).copied())
    }

    async fn has_connected_accounting(&self, org_id: Uuid) -> Result<bool> {
        Ok(self.connected.read().await.contains(&org_id))
    }
}
