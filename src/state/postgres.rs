//! Postgres-backed plan store
//!
//! Plan records are written once at the end of the pipeline and updated in
//! place afterwards. Structured fields live in JSONB columns.

use crate::error::OrchestrationError;
use crate::models::{PlanRecord, PlanStatus, Recommendation, ResponseMetadata, StructuredResponse};
use crate::state::PlanStore;
use crate::Result;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

pub struct PgPlanStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgPlanStore {
    /// Lazily connecting pool; the schema is created on first use
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;

        info!("Plan store backend: postgres");
        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS plan_records (
                      plan_id UUID PRIMARY KEY,
                      org_id UUID NOT NULL,
                      goal TEXT NOT NULL,
                      constraints JSONB NOT NULL,
                      staged_changes JSONB NOT NULL,
                      structured_response JSONB NOT NULL,
                      metadata JSONB NOT NULL,
                      status TEXT NOT NULL,
                      created_by UUID NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_plan_records_org_time
                    ON plan_records (org_id, created_at DESC);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize plan record schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

fn status_to_db(status: PlanStatus) -> String {
    status.to_string()
}

fn status_from_db(raw: &str) -> Result<PlanStatus> {
    match raw {
        "draft" => Ok(PlanStatus::Draft),
        "applied" => Ok(PlanStatus::Applied),
        "approved" => Ok(PlanStatus::Approved),
        "rejected" => Ok(PlanStatus::Rejected),
        "archived" => Ok(PlanStatus::Archived),
        other => Err(OrchestrationError::DatabaseError(format!(
            "Unknown plan status '{}'",
            other
        ))),
    }
}

fn record_from_row(row: &PgRow) -> Result<PlanRecord> {
    let status: String = row.try_get("status")?;
    let Json(staged_changes): Json<Vec<Recommendation>> = row.try_get("staged_changes")?;
    let Json(structured_response): Json<StructuredResponse> =
        row.try_get("structured_response")?;
    let Json(metadata): Json<ResponseMetadata> = row.try_get("metadata")?;
    let Json(constraints): Json<serde_json::Value> = row.try_get("constraints")?;

    Ok(PlanRecord {
        plan_id: row.try_get("plan_id")?,
        org_id: row.try_get("org_id")?,
        goal: row.try_get("goal")?,
        constraints,
        staged_changes,
        structured_response,
        metadata,
        status: status_from_db(&status)?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_COLUMNS: &str = "plan_id, org_id, goal, constraints, staged_changes, \
     structured_response, metadata, status, created_by, created_at, updated_at";

#[async_trait::async_trait]
impl PlanStore for PgPlanStore {
    async fn insert(&self, record: &PlanRecord) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO plan_records
              (plan_id, org_id, goal, constraints, staged_changes, structured_response,
               metadata, status, created_by, created_at, updated_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.plan_id)
        .bind(record.org_id)
        .bind(&record.goal)
        .bind(Json(&record.constraints))
        .bind(Json(&record.staged_changes))
        .bind(Json(&record.structured_response))
        .bind(Json(&record.metadata))
        .bind(status_to_db(record.status))
        .bind(record.created_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, org_id: Uuid, plan_id: Uuid) -> Result<Option<PlanRecord>> {
        self.ensure_schema().await?;

        let query = format!(
            "SELECT {} FROM plan_records WHERE org_id = $1 AND plan_id = $2",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(org_id)
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(
        &self,
        org_id: Uuid,
        status: Option<PlanStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PlanRecord>> {
        self.ensure_schema().await?;

        let query = format!(
            "SELECT {} FROM plan_records \
             WHERE org_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(org_id)
            .bind(status.map(status_to_db))
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn update(&self, record: &PlanRecord) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query(
            r#"
            UPDATE plan_records
            SET goal = $3, constraints = $4, staged_changes = $5, structured_response = $6,
                metadata = $7, status = $8, updated_at = $9
            WHERE org_id = $1 AND plan_id = $2
            "#,
        )
        .bind(record.org_id)
        .bind(record.plan_id)
        .bind(&record.goal)
        .bind(Json(&record.constraints))
        .bind(Json(&record.staged_changes))
        .bind(Json(&record.structured_response))
        .bind(Json(&record.metadata))
        .bind(status_to_db(record.status))
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestrationError::NotFound(format!(
                "Plan {} not found",
                record.plan_id
            )));
        }
        Ok(())
    }

    async fn delete(&self, org_id: Uuid, plan_id: Uuid) -> Result<bool> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM plan_records WHERE org_id = $1 AND plan_id = $2")
            .bind(org_id)
            .bind(plan_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
