//! Plan orchestrator - implements the recommendation pipeline
//!
//! CLASSIFY → GROUND → PLAN → EXECUTE? → GATE → RECOMMEND? → REDUCE
//! → ASSEMBLE → VERIFY → PERSIST
//!
//! Every stage returns `Result<T, StageError>`. A failed stage is recorded
//! in the response metadata and replaced by its degraded value; the terminal
//! reducer then picks the LLM path or the deterministic fallback path. Only
//! input validation, access control and schema verification reach the caller.

use crate::access::{require_role, OrgDirectory, ADMINS, MEMBERS, WRITERS};
use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::classifier::IntentClassifier;
use crate::config::PipelineConfig;
use crate::error::{at_stage, OrchestrationError, Stage, StageError};
use crate::execution::{extract_calculations, Baseline, ExecutionEngine};
use crate::fallback::{CfoBrain, FinancialContext};
use crate::grounding::{FinancialDataSource, GroundingOutcome, GroundingService};
use crate::jobs::{Job, JobQueue, MODEL_RUN_JOB};
use crate::models::{
    ApplyPlanRequest, ApplyPlanResponse, GeneratePlanRequest, IntentClassification,
    ListPlansQuery, ModelRun, PlanRecord, PlanStatus, PromptRecord, Recommendation,
    RecommendationSource, ResponseMetadata, RunStatus, RunType, UpdatePlanRequest,
};
use crate::planner::{failed_plan, operation_names, Planner, RulePlanner};
use crate::recommender::{
    restrict_data_sources, AntiHallucinationGate, PromptStore, RecommendationRequest, Recommender,
};
use crate::response;
use crate::state::{ModelRunStore, PlanStore};
use crate::tools::create_default_registry;
use crate::verification::{create_default_verification_engine, VerificationEngine};
use crate::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// External collaborators the orchestrator depends on
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn IntentClassifier>,
    /// `None` when no language model provider is available
    pub recommender: Option<Arc<dyn Recommender>>,
    pub plans: Arc<dyn PlanStore>,
    pub runs: Arc<dyn ModelRunStore>,
    pub finance: Arc<dyn FinancialDataSource>,
    pub directory: Arc<dyn OrgDirectory>,
    pub prompts: Arc<dyn PromptStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub audit: Arc<dyn AuditSink>,
}

/// Parse a caller-supplied identifier
pub fn parse_id(field: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| OrchestrationError::Validation(format!("Invalid {}: '{}'", field, raw)))
}

/// Trim, strip control characters and bound the goal length (in characters)
pub fn sanitize_goal(raw: &str, config: &PipelineConfig) -> Result<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .take(config.goal_max_chars)
        .collect();
    let goal = cleaned.trim().to_string();

    if goal.is_empty() {
        return Err(OrchestrationError::Validation("Goal is required".to_string()));
    }
    if goal.chars().count() < config.goal_min_chars {
        return Err(OrchestrationError::Validation(format!(
            "Goal must be at least {} characters",
            config.goal_min_chars
        )));
    }

    Ok(goal)
}

/// Objects merge recursively; every other value replaces
pub fn deep_merge(base: &mut Value, changes: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (&mut *base, changes) {
        for (key, value) in patch {
            match target.get_mut(key) {
                Some(existing) if existing.is_object() && value.is_object() => {
                    deep_merge(existing, value)
                }
                _ => {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        return;
    }
    *base = changes.clone();
}

/// Per-stage latency and failure record for one request
#[derive(Debug, Default)]
struct StageTrace {
    latencies: BTreeMap<String, u64>,
    errors: Vec<StageError>,
}

impl StageTrace {
    async fn run<T, F>(&mut self, stage: Stage, fut: F) -> std::result::Result<T, StageError>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let outcome = fut.await.map_err(at_stage(stage));
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.latencies.insert(stage.to_string(), elapsed_ms);

        debug!(stage = %stage, elapsed_ms, ok = outcome.is_ok(), "Stage finished");
        if let Err(e) = &outcome {
            warn!(error = %e, "Stage failed; degrading");
            self.errors.push(e.clone());
        }
        outcome
    }
}

/// Output of a successful, traceable LLM call
#[derive(Debug, Clone)]
struct LlmOutcome {
    natural_text: String,
    recommendations: Vec<Recommendation>,
    prompt_id: Uuid,
    model: String,
}

#[derive(Debug)]
enum RecommendationPath {
    Llm(LlmOutcome),
    Fallback,
}

/// Terminal reducer: LLM output is used only when it produced
/// recommendations and the intent is trusted. A `setup_required` from the
/// provider is never trusted; only the fallback decides data is missing.
fn reduce(llm: Option<LlmOutcome>, intent_confidence: f64, min_confidence: f64) -> RecommendationPath {
    let llm = llm.map(|mut outcome| {
        outcome.recommendations.retain(|r| !r.is_setup_required());
        outcome
    });

    match llm {
        Some(outcome) if !outcome.recommendations.is_empty() && intent_confidence >= min_confidence => {
            RecommendationPath::Llm(outcome)
        }
        _ => RecommendationPath::Fallback,
    }
}

/// Main orchestrator that coordinates the pipeline and plan lifecycle
pub struct PlanOrchestrator {
    config: PipelineConfig,
    services: Collaborators,
    grounding: GroundingService,
    planner: Box<dyn Planner>,
    execution_engine: ExecutionEngine,
    verification_engine: VerificationEngine,
    gate: AntiHallucinationGate,
    brain: CfoBrain,
}

impl PlanOrchestrator {
    pub fn new(services: Collaborators, config: PipelineConfig) -> Self {
        let grounding = GroundingService::new(
            services.runs.clone(),
            services.finance.clone(),
            config.transaction_evidence_limit,
        );

        Self {
            grounding,
            planner: Box::new(RulePlanner::new(&config)),
            execution_engine: ExecutionEngine::new(create_default_registry(&config.defaults)),
            verification_engine: create_default_verification_engine(config.min_recommendations),
            gate: AntiHallucinationGate::new(config.gate.clone()),
            brain: CfoBrain::new(config.min_recommendations),
            services,
            config,
        }
    }

    pub fn with_planner(mut self, planner: Box<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ===== Generate =====

    pub async fn generate_plan(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        request: GeneratePlanRequest,
    ) -> Result<PlanRecord> {
        let goal = sanitize_goal(&request.goal, &self.config)?;
        let model_run_id = request
            .model_run_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|raw| parse_id("model_run_id", raw))
            .transpose()?;

        require_role(self.services.directory.as_ref(), org_id, user_id, WRITERS).await?;

        let explicit_run = match model_run_id {
            Some(run_id) => Some(
                self.services
                    .runs
                    .get_run(org_id, run_id)
                    .await?
                    .ok_or_else(|| {
                        OrchestrationError::NotFound(format!("Model run {} not found", run_id))
                    })?,
            ),
            None => None,
        };

        let started = Instant::now();
        info!(org_id = %org_id, user_id = %user_id, "Generating plan");

        let mut trace = StageTrace::default();

        // === CLASSIFY ===
        let classification = trace
            .run(Stage::Classification, self.services.classifier.classify(&goal))
            .await
            .unwrap_or_else(|_| IntentClassification::default_fallback());

        // === GROUND ===
        let grounded = trace
            .run(
                Stage::Grounding,
                self.grounding.retrieve(
                    org_id,
                    classification.intent,
                    &classification.slots,
                    explicit_run,
                ),
            )
            .await;

        let (grounding, has_financial_data, data_check) = match grounded {
            Ok(outcome) => {
                let has_data = outcome
                    .signals
                    .has_financial_data(outcome.context.evidence.len());
                (outcome, has_data, "success_path")
            }
            Err(_) => {
                let has_data = self.grounding.recovery_has_data(org_id).await;
                (GroundingOutcome::default(), has_data, "recovery_path")
            }
        };

        // === PLAN ===
        let baseline = Baseline::from_sources(grounding.model_run.as_ref(), grounding.overview.as_ref());
        let plan = trace
            .run(
                Stage::Planning,
                self.planner.create_plan(&classification, !baseline.is_empty()),
            )
            .await
            .unwrap_or_else(|e| failed_plan(&e.message));

        // === EXECUTE ===
        let execution_skipped = !plan.is_executable();
        let results = if execution_skipped {
            debug!(
                valid = plan.validation.ok,
                requires_approval = plan.requires_approval,
                "Execution skipped"
            );
            Vec::new()
        } else {
            trace
                .run(
                    Stage::Execution,
                    self.execution_engine.execute_plan(&plan, &baseline),
                )
                .await
                .unwrap_or_default()
        };
        let calculations = extract_calculations(&results);

        // === GATE + RECOMMEND ===
        let recommender = self.services.recommender.as_ref();
        let gate = self.gate.evaluate(
            recommender.is_some_and(|r| r.is_configured()),
            classification.confidence,
            &grounding.context,
        );

        let mut llm_invoked = false;
        let llm = match (gate.open, recommender) {
            (true, Some(recommender)) => {
                llm_invoked = true;
                trace
                    .run(
                        Stage::Recommendation,
                        self.recommend(
                            recommender.as_ref(),
                            org_id,
                            user_id,
                            &goal,
                            &classification,
                            &calculations,
                            &grounding,
                        ),
                    )
                    .await
                    .ok()
            }
            _ => {
                debug!(reasons = ?gate.reasons, "LLM gate closed");
                None
            }
        };

        // === REDUCE ===
        let path = reduce(
            llm,
            classification.confidence,
            self.config.fallback_intent_confidence,
        );

        let (llm_text, recommendations, source, llm_model, prompt_id) = match path {
            RecommendationPath::Llm(outcome) => {
                let evidence: Vec<String> = grounding
                    .context
                    .evidence
                    .iter()
                    .take(3)
                    .map(|e| e.summary.clone())
                    .collect();
                let recs = self.brain.finalize(outcome.recommendations, &evidence);
                (
                    Some(outcome.natural_text),
                    recs,
                    RecommendationSource::Llm,
                    Some(outcome.model),
                    Some(outcome.prompt_id),
                )
            }
            RecommendationPath::Fallback => {
                let ctx = FinancialContext::build(
                    grounding.model_run.as_ref(),
                    grounding.overview.as_ref(),
                    &grounding.transactions,
                    has_financial_data,
                    &self.config.defaults,
                );
                let recs = self.brain.analyze(&goal, &ctx);
                (None, recs, RecommendationSource::Fallback, None, None)
            }
        };

        // === ASSEMBLE ===
        let has_connected_accounting = self
            .services
            .directory
            .has_connected_accounting(org_id)
            .await
            .unwrap_or_else(|e| {
                warn!(org_id = %org_id, error = %e, "Connector status lookup failed");
                false
            });

        let natural_text = response::natural_text(
            llm_text.as_deref(),
            &calculations,
            &recommendations,
            has_financial_data,
            has_connected_accounting,
        );

        let mut latencies = trace.latencies;
        latencies.insert("total".to_string(), started.elapsed().as_millis() as u64);

        let metadata = ResponseMetadata {
            intent: classification.intent,
            intent_confidence: classification.confidence,
            slots: classification.slots.clone(),
            classification_model: classification.model_used.clone(),
            classification_fallback_used: classification.fallback_used,

            grounding_confidence: grounding.context.confidence,
            evidence_count: grounding.context.evidence.len(),
            evidence_ids: grounding.context.evidence_ids(),
            grounding_sufficient: grounding.sufficient,

            plan_valid: plan.validation.ok,
            plan_issues: plan.validation.issues.clone(),
            plan_warnings: plan.validation.warnings.clone(),
            requires_approval: plan.requires_approval,
            operations: operation_names(&plan),
            execution_skipped,

            llm_gate_open: gate.open,
            llm_gate_reasons: gate.reasons.clone(),
            llm_invoked,
            llm_model,
            prompt_id,
            recommendation_source: source,

            has_financial_data,
            has_connected_accounting,
            data_check: data_check.to_string(),
            model_run_id: grounding.model_run.as_ref().map(|r| r.run_id),

            stage_errors: trace.errors.iter().map(ToString::to_string).collect(),
            stage_latencies_ms: latencies,
            generated_at: Utc::now(),
        };

        let structured = response::assemble(
            natural_text,
            calculations,
            recommendations.clone(),
            metadata.clone(),
        );

        // === VERIFY ===
        self.verification_engine.verify(&structured)?;

        // === PERSIST ===
        let now = Utc::now();
        let record = PlanRecord {
            plan_id: Uuid::new_v4(),
            org_id,
            goal,
            constraints: request.constraints.unwrap_or_else(|| json!({})),
            staged_changes: recommendations,
            structured_response: structured,
            metadata,
            status: PlanStatus::Draft,
            created_by: user_id,
            created_at: now,
            updated_at: now,
        };

        self.services.plans.insert(&record).await?;
        self.services
            .audit
            .record(AuditEvent::for_plan(
                AuditAction::PlanGenerated,
                user_id,
                &record,
                json!({
                    "intent": record.metadata.intent,
                    "recommendation_source": record.metadata.recommendation_source,
                    "recommendations": record.staged_changes.len(),
                }),
            ))
            .await?;

        info!(
            org_id = %org_id,
            plan_id = %record.plan_id,
            source = ?record.metadata.recommendation_source,
            recommendations = record.staged_changes.len(),
            stage_errors = record.metadata.stage_errors.len(),
            "Plan generated"
        );

        Ok(record)
    }

    /// Call the provider and store the exchange. Recommendations without a
    /// stored prompt are not traceable, so a storage failure fails the stage.
    #[allow(clippy::too_many_arguments)]
    async fn recommend(
        &self,
        recommender: &dyn Recommender,
        org_id: Uuid,
        user_id: Uuid,
        goal: &str,
        classification: &IntentClassification,
        calculations: &BTreeMap<String, f64>,
        grounding: &GroundingOutcome,
    ) -> Result<LlmOutcome> {
        let request = RecommendationRequest {
            goal,
            intent: classification.intent,
            calculations,
            evidence: &grounding.context.evidence,
        };

        let output = recommender.recommend(&request).await.map_err(|e| {
            if let OrchestrationError::LlmError { kind, .. } = &e {
                warn!(provider_error = %kind, "LLM provider call failed");
            }
            e
        })?;

        let grounding_ids = grounding.context.evidence_ids();
        let mut recommendations = output.recommendations;
        restrict_data_sources(&mut recommendations, &grounding_ids);

        let mut data_sources: Vec<String> = recommendations
            .iter()
            .flat_map(|r| r.data_sources.iter().cloned())
            .collect();
        data_sources.sort();
        data_sources.dedup();

        let prompt_id = self
            .services
            .prompts
            .save(PromptRecord {
                prompt_id: Uuid::new_v4(),
                org_id,
                user_id,
                model: recommender.model_name().to_string(),
                prompt: output.prompt,
                response: output.raw_response,
                data_sources,
                created_at: Utc::now(),
            })
            .await?;

        for rec in &mut recommendations {
            rec.prompt_id = Some(prompt_id);
        }

        Ok(LlmOutcome {
            natural_text: output.natural_text,
            recommendations,
            prompt_id,
            model: recommender.model_name().to_string(),
        })
    }

    // ===== Apply =====

    pub async fn apply_plan(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        request: ApplyPlanRequest,
    ) -> Result<ApplyPlanResponse> {
        let plan_id = parse_id("plan_id", &request.plan_id)?;
        if !request.changes.is_object() {
            return Err(OrchestrationError::Validation(
                "changes must be a JSON object".to_string(),
            ));
        }

        require_role(self.services.directory.as_ref(), org_id, user_id, WRITERS).await?;

        let mut record = self.load_plan(org_id, plan_id).await?;
        if record.status != PlanStatus::Draft {
            return Err(OrchestrationError::Conflict(format!(
                "Plan {} is {}; only draft plans can be applied",
                plan_id, record.status
            )));
        }

        let base_run = match record.metadata.model_run_id {
            Some(run_id) => self.services.runs.get_run(org_id, run_id).await?,
            None => self.services.runs.latest_completed_run(org_id).await?,
        };

        let mut overrides = base_run
            .as_ref()
            .map(|r| r.overrides.clone())
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));
        deep_merge(&mut overrides, &request.changes);

        let run = ModelRun {
            run_id: Uuid::new_v4(),
            org_id,
            run_type: RunType::Scenario,
            status: RunStatus::Queued,
            overrides,
            summary: None,
            parent_run_id: base_run.as_ref().map(|r| r.run_id),
            created_by: Some(user_id),
            created_at: Utc::now(),
        };
        let model_run_id = run.run_id;
        let parent_run_id = run.parent_run_id;
        self.services.runs.create_run(run).await?;

        let job_id = self
            .services
            .jobs
            .enqueue(Job {
                job_id: Uuid::new_v4(),
                org_id,
                job_type: MODEL_RUN_JOB.to_string(),
                payload: json!({
                    "model_run_id": model_run_id,
                    "parent_run_id": parent_run_id,
                    "plan_id": plan_id,
                }),
                created_by: user_id,
                created_at: Utc::now(),
            })
            .await?;

        record.status = PlanStatus::Applied;
        record.updated_at = Utc::now();
        self.services.plans.update(&record).await?;

        self.services
            .audit
            .record(AuditEvent::for_plan(
                AuditAction::PlanApplied,
                user_id,
                &record,
                json!({ "model_run_id": model_run_id, "job_id": job_id }),
            ))
            .await?;

        info!(org_id = %org_id, plan_id = %plan_id, model_run_id = %model_run_id, "Plan applied");

        Ok(ApplyPlanResponse {
            model_run_id,
            job_id,
        })
    }

    // ===== CRUD =====

    async fn load_plan(&self, org_id: Uuid, plan_id: Uuid) -> Result<PlanRecord> {
        self.services
            .plans
            .get(org_id, plan_id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("Plan {} not found", plan_id)))
    }

    pub async fn list_plans(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        query: ListPlansQuery,
    ) -> Result<Vec<PlanRecord>> {
        require_role(self.services.directory.as_ref(), org_id, user_id, MEMBERS).await?;

        let limit = query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let offset = query.offset.unwrap_or(0);

        self.services
            .plans
            .list(org_id, query.status, limit, offset)
            .await
    }

    pub async fn get_plan(&self, org_id: Uuid, user_id: Uuid, plan_id: Uuid) -> Result<PlanRecord> {
        require_role(self.services.directory.as_ref(), org_id, user_id, MEMBERS).await?;
        self.load_plan(org_id, plan_id).await
    }

    pub async fn update_plan(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        plan_id: Uuid,
        update: UpdatePlanRequest,
    ) -> Result<PlanRecord> {
        let goal = update
            .goal
            .as_deref()
            .map(|g| sanitize_goal(g, &self.config))
            .transpose()?;

        require_role(self.services.directory.as_ref(), org_id, user_id, WRITERS).await?;

        let mut record = self.load_plan(org_id, plan_id).await?;

        if let Some(next) = update.status {
            if next == PlanStatus::Applied && record.status != PlanStatus::Applied {
                return Err(OrchestrationError::Conflict(
                    "Plans are marked applied only by applying them".to_string(),
                ));
            }
            if !record.status.can_transition_to(next) {
                return Err(OrchestrationError::Conflict(format!(
                    "Cannot move plan from {} to {}",
                    record.status, next
                )));
            }
            record.status = next;
        }
        if let Some(goal) = goal {
            record.goal = goal;
        }
        if let Some(constraints) = update.constraints {
            record.constraints = constraints;
        }
        if let Some(changes) = update.staged_changes {
            record.staged_changes = changes;
        }
        record.updated_at = Utc::now();

        self.services.plans.update(&record).await?;
        self.services
            .audit
            .record(AuditEvent::for_plan(
                AuditAction::PlanUpdated,
                user_id,
                &record,
                json!({ "status": record.status }),
            ))
            .await?;

        Ok(record)
    }

    pub async fn delete_plan(&self, org_id: Uuid, user_id: Uuid, plan_id: Uuid) -> Result<()> {
        require_role(self.services.directory.as_ref(), org_id, user_id, ADMINS).await?;

        let record = self.load_plan(org_id, plan_id).await?;
        if !self.services.plans.delete(org_id, plan_id).await? {
            return Err(OrchestrationError::NotFound(format!("Plan {} not found", plan_id)));
        }

        self.services
            .audit
            .record(AuditEvent::for_plan(
                AuditAction::PlanDeleted,
                user_id,
                &record,
                json!({}),
            ))
            .await?;

        Ok(())
    }

    pub async fn get_prompt(&self, org_id: Uuid, user_id: Uuid, prompt_id: Uuid) -> Result<PromptRecord> {
        require_role(self.services.directory.as_ref(), org_id, user_id, MEMBERS).await?;

        self.services
            .prompts
            .get(org_id, prompt_id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("Prompt {} not found", prompt_id)))
    }
}
