//! REST API server for the plan orchestrator
//!
//! Plans are nested under their organization. The caller is identified by
//! the `x-user-id` header; membership and role checks happen in the
//! orchestrator.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::agent::{parse_id, PlanOrchestrator};
use crate::error::OrchestrationError;
use crate::models::{ApplyPlanRequest, GeneratePlanRequest, ListPlansQuery, UpdatePlanRequest};

pub const USER_HEADER: &str = "x-user-id";

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

/// Map an orchestrator error to a status code. Server-side failures never
/// leak their detail to the caller.
fn error_response(err: OrchestrationError) -> ApiResult {
    let status = match &err {
        OrchestrationError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::Forbidden(_) => StatusCode::FORBIDDEN,
        OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestrationError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if err.is_client_error() {
        (status, Json(ApiResponse::error(err.to_string())))
    } else {
        error!(error = %err, "Request failed");
        (status, Json(ApiResponse::error("Internal server error".to_string())))
    }
}

fn respond<T: Serialize>(status: StatusCode, result: crate::Result<T>) -> ApiResult {
    match result {
        Ok(data) => (status, Json(ApiResponse::success(data))),
        Err(e) => error_response(e),
    }
}

fn user_id(headers: &HeaderMap) -> crate::Result<Uuid> {
    let raw = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            OrchestrationError::Validation(format!("Missing {} header", USER_HEADER))
        })?;
    parse_id(USER_HEADER, raw)
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<PlanOrchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Plan Endpoints
/// =============================

async fn generate_plan(
    State(state): State<ApiState>,
    Path(org_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<GeneratePlanRequest>,
) -> ApiResult {
    let result = async {
        let org_id = parse_id("org_id", &org_id)?;
        let user_id = user_id(&headers)?;
        info!(org_id = %org_id, "Received plan request");
        state.orchestrator.generate_plan(org_id, user_id, req).await
    }
    .await;

    respond(StatusCode::CREATED, result)
}

async fn list_plans(
    State(state): State<ApiState>,
    Path(org_id): Path<String>,
    Query(query): Query<ListPlansQuery>,
    headers: HeaderMap,
) -> ApiResult {
    let result = async {
        let org_id = parse_id("org_id", &org_id)?;
        let user_id = user_id(&headers)?;
        state.orchestrator.list_plans(org_id, user_id, query).await
    }
    .await;

    respond(StatusCode::OK, result)
}

async fn get_plan(
    State(state): State<ApiState>,
    Path((org_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let result = async {
        let org_id = parse_id("org_id", &org_id)?;
        let plan_id = parse_id("plan_id", &plan_id)?;
        let user_id = user_id(&headers)?;
        state.orchestrator.get_plan(org_id, user_id, plan_id).await
    }
    .await;

    respond(StatusCode::OK, result)
}

async fn update_plan(
    State(state): State<ApiState>,
    Path((org_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(update): Json<UpdatePlanRequest>,
) -> ApiResult {
    let result = async {
        let org_id = parse_id("org_id", &org_id)?;
        let plan_id = parse_id("plan_id", &plan_id)?;
        let user_id = user_id(&headers)?;
        state
            .orchestrator
            .update_plan(org_id, user_id, plan_id, update)
            .await
    }
    .await;

    respond(StatusCode::OK, result)
}

async fn delete_plan(
    State(state): State<ApiState>,
    Path((org_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let result = async {
        let org_id = parse_id("org_id", &org_id)?;
        let plan_id = parse_id("plan_id", &plan_id)?;
        let user_id = user_id(&headers)?;
        state.orchestrator.delete_plan(org_id, user_id, plan_id).await?;
        Ok::<_, OrchestrationError>(serde_json::json!({ "deleted": plan_id }))
    }
    .await;

    respond(StatusCode::OK, result)
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplyBody {
    #[serde(default)]
    pub changes: serde_json::Value,
}

async fn apply_plan(
    State(state): State<ApiState>,
    Path((org_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ApplyBody>,
) -> ApiResult {
    let result = async {
        let org_id = parse_id("org_id", &org_id)?;
        let user_id = user_id(&headers)?;
        let changes = if body.changes.is_null() {
            serde_json::json!({})
        } else {
            body.changes
        };
        state
            .orchestrator
            .apply_plan(org_id, user_id, ApplyPlanRequest { plan_id, changes })
            .await
    }
    .await;

    respond(StatusCode::ACCEPTED, result)
}

async fn get_prompt(
    State(state): State<ApiState>,
    Path((org_id, prompt_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let result = async {
        let org_id = parse_id("org_id", &org_id)?;
        let prompt_id = parse_id("prompt_id", &prompt_id)?;
        let user_id = user_id(&headers)?;
        state.orchestrator.get_prompt(org_id, user_id, prompt_id).await
    }
    .await;

    respond(StatusCode::OK, result)
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<PlanOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/orgs/:org_id/plans",
            post(generate_plan).get(list_plans),
        )
        .route(
            "/api/v1/orgs/:org_id/plans/:plan_id",
            get(get_plan).patch(update_plan).delete(delete_plan),
        )
        .route("/api/v1/orgs/:org_id/plans/:plan_id/apply", post(apply_plan))
        .route("/api/v1/orgs/:org_id/prompts/:prompt_id", get(get_prompt))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<PlanOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keyword_harness, FinanceFixture};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Client {
        router: Router,
        org_id: Uuid,
        admin: Uuid,
        viewer: Uuid,
    }

    async fn client(fixture: FinanceFixture) -> Client {
        let h = keyword_harness(fixture).await;
        Client {
            router: create_router(Arc::new(h.orchestrator)),
            org_id: h.org_id,
            admin: h.admin,
            viewer: h.viewer,
        }
    }

    impl Client {
        async fn send(
            &self,
            method: Method,
            path: &str,
            user: Option<Uuid>,
            body: Option<Value>,
        ) -> (StatusCode, ApiResponse) {
            let mut builder = Request::builder()
                .method(method)
                .uri(path)
                .header("content-type", "application/json");
            if let Some(user) = user {
                builder = builder.header(USER_HEADER, user.to_string());
            }
            let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));

            let response = self
                .router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        fn plans_path(&self) -> String {
            format!("/api/v1/orgs/{}/plans", self.org_id)
        }
    }

    #[tokio::test]
    async fn test_generate_then_fetch() {
        let c = client(FinanceFixture::CriticalRunway).await;

        let (status, created) = c
            .send(
                Method::POST,
                &c.plans_path(),
                Some(c.admin),
                Some(json!({"goal": "What is my cash runway?"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.success);
        let data = created.data.unwrap();
        assert_eq!(data["status"], "draft");
        assert_eq!(data["staged_changes"][0]["type"], "cost_reduction");

        let plan_id = data["plan_id"].as_str().unwrap().to_string();
        let (status, fetched) = c
            .send(
                Method::GET,
                &format!("{}/{}", c.plans_path(), plan_id),
                Some(c.viewer),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched.data.unwrap()["plan_id"], plan_id.as_str());

        let (status, listed) = c
            .send(Method::GET, &format!("{}?limit=5", c.plans_path()), Some(c.viewer), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.data.unwrap().as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let c = client(FinanceFixture::CriticalRunway).await;

        let (status, body) = c
            .send(Method::POST, &c.plans_path(), None, Some(json!({"goal": "runway please"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);

        let (status, _) = c
            .send(Method::POST, &c.plans_path(), Some(c.admin), Some(json!({"goal": "abc"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = c
            .send(
                Method::POST,
                &c.plans_path(),
                Some(c.viewer),
                Some(json!({"goal": "What is my cash runway?"})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = c
            .send(
                Method::GET,
                &format!("{}/{}", c.plans_path(), Uuid::new_v4()),
                Some(c.viewer),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = c
            .send(Method::GET, "/api/v1/orgs/not-an-org/plans", Some(c.viewer), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_apply_twice_conflicts() {
        let c = client(FinanceFixture::CriticalRunway).await;

        let (_, created) = c
            .send(
                Method::POST,
                &c.plans_path(),
                Some(c.admin),
                Some(json!({"goal": "What is my cash runway?"})),
            )
            .await;
        let plan_id = created.data.unwrap()["plan_id"].as_str().unwrap().to_string();
        let apply_path = format!("{}/{}/apply", c.plans_path(), plan_id);

        let (status, applied) = c
            .send(
                Method::POST,
                &apply_path,
                Some(c.admin),
                Some(json!({"changes": {"revenue": {"growth": 0.1}}})),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(applied.data.unwrap()["job_id"].is_string());

        let (status, _) = c
            .send(Method::POST, &apply_path, Some(c.admin), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let (status, Json(body)) =
            error_response(OrchestrationError::DatabaseError("password=hunter2".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.as_deref(), Some("Internal server error"));

        let (status, _) = error_response(OrchestrationError::SchemaValidation(vec![]));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health() {
        let c = client(FinanceFixture::Empty).await;
        let response = c
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
