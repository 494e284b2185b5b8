use cfo_plan_orchestrator::{
    access::InMemoryOrgDirectory,
    audit::AuditLog,
    classifier::KeywordIntentClassifier,
    jobs::InMemoryJobQueue,
    recommender::InMemoryPromptStore,
    state::{FinanceFixtureFile, InMemoryFinanceStore, InMemoryPlanStore},
    Collaborators, GeneratePlanRequest, PipelineConfig, PlanOrchestrator,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Run a single goal against a seeded in-memory organization and print
/// the stored plan record.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let goal = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let goal = if goal.trim().is_empty() {
        "What is my cash runway?".to_string()
    } else {
        goal
    };

    let org_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let fixture = FinanceFixtureFile::demo(org_id, user_id);

    let finance = Arc::new(InMemoryFinanceStore::seeded(&fixture).await?);
    let orchestrator = PlanOrchestrator::new(
        Collaborators {
            classifier: Arc::new(KeywordIntentClassifier),
            recommender: None,
            plans: Arc::new(InMemoryPlanStore::new()),
            runs: finance.clone(),
            finance,
            directory: Arc::new(InMemoryOrgDirectory::from_fixture(&fixture).await),
            prompts: Arc::new(InMemoryPromptStore::new()),
            jobs: Arc::new(InMemoryJobQueue::new()),
            audit: Arc::new(AuditLog::new()),
        },
        PipelineConfig::from_env(),
    );

    info!(org_id = %org_id, goal = %goal, "Running orchestrator");

    let record = orchestrator
        .generate_plan(
            org_id,
            user_id,
            GeneratePlanRequest {
                goal,
                model_run_id: None,
                constraints: None,
            },
        )
        .await?;

    println!("\n=== PLAN RECORD ===");
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}
