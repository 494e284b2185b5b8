use cfo_plan_orchestrator::{
    access::InMemoryOrgDirectory,
    api::start_server,
    audit::AuditLog,
    classifier::{IntentClassifier, KeywordIntentClassifier, LlmIntentClassifier},
    gemini::GeminiClient,
    jobs::InMemoryJobQueue,
    recommender::{GeminiRecommender, InMemoryPromptStore, Recommender},
    state::{FinanceFixtureFile, InMemoryFinanceStore, InMemoryPlanStore, PgPlanStore, PlanStore},
    Collaborators, PipelineConfig, PlanOrchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let config = PipelineConfig::from_env();

    let fixture = match std::env::var("FINANCE_FIXTURE_PATH") {
        Ok(path) => FinanceFixtureFile::load(path).await?,
        Err(_) => {
            let org_id = Uuid::new_v4();
            let user_id = Uuid::new_v4();
            warn!("FINANCE_FIXTURE_PATH not set; serving a demo organization");
            info!(org_id = %org_id, user_id = %user_id, "Demo organization (send user id as x-user-id)");
            FinanceFixtureFile::demo(org_id, user_id)
        }
    };
    let finance = Arc::new(InMemoryFinanceStore::seeded(&fixture).await?);
    let directory = Arc::new(InMemoryOrgDirectory::from_fixture(&fixture).await);

    let plans: Arc<dyn PlanStore> = match std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("POSTGRES_URL"))
    {
        Ok(url) => Arc::new(PgPlanStore::connect_lazy(&url)?),
        Err(_) => {
            info!("Plan store backend: in-memory");
            Arc::new(InMemoryPlanStore::new())
        }
    };

    let (classifier, recommender): (Arc<dyn IntentClassifier>, Option<Arc<dyn Recommender>>) =
        match GeminiClient::from_env() {
            Some(client) => {
                let client = Arc::new(client);
                info!(model = client.model(), "Language model provider configured");
                (
                    Arc::new(LlmIntentClassifier::new(client.clone())) as Arc<dyn IntentClassifier>,
                    Some(Arc::new(GeminiRecommender::new(client)) as Arc<dyn Recommender>),
                )
            }
            None => {
                warn!("GEMINI_API_KEY not set; using keyword classification and fallback recommendations");
                (Arc::new(KeywordIntentClassifier) as Arc<dyn IntentClassifier>, None)
            }
        };

    let orchestrator = Arc::new(PlanOrchestrator::new(
        Collaborators {
            classifier,
            recommender,
            plans,
            runs: finance.clone(),
            finance,
            directory,
            prompts: Arc::new(InMemoryPromptStore::new()),
            jobs: Arc::new(InMemoryJobQueue::new()),
            audit: Arc::new(AuditLog::new()),
        },
        config,
    ));

    info!(port = api_port, "Orchestrator initialized; starting API server");

    start_server(orchestrator, api_port).await?;

    Ok(())
}
