use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::alerts::{AlertPattern, RawAlert};
use crate::correlation::{ActiveCorrelation, RuleDefinition, RuleError};
use crate::engine::{AlertEngine, EngineStats, SubmitOutcome};
use crate::escalation::{AlertInstance, EscalationStatus, LifecycleError};

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<AlertEngine>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Alerts
// ============================================================================

/// Accepts `{"type": ..., "data": {...}}`. Any JSON body is taken; missing
/// or mistyped fields are coerced, never rejected.
pub async fn submit_alert(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<SubmitOutcome> {
    Json(state.engine.process_alert(RawAlert::from_json(body)).await)
}

pub async fn active_alerts(State(state): State<Arc<AppState>>) -> Json<Vec<AlertInstance>> {
    Json(state.engine.get_active_alerts())
}

pub async fn alert_history(State(state): State<Arc<AppState>>) -> Json<Vec<AlertInstance>> {
    Json(state.engine.get_alert_history())
}

pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AlertInstance>, ApiError> {
    state
        .engine
        .get_alert(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Alert '{}' not found", id)))
}

pub async fn escalation_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EscalationStatus>, ApiError> {
    state
        .engine
        .get_escalation_status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Alert '{}' not found", id)))
}

pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AlertInstance>, ApiError> {
    Ok(Json(state.engine.acknowledge(&id).await?))
}

pub async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AlertInstance>, ApiError> {
    Ok(Json(state.engine.resolve(&id).await?))
}

// ============================================================================
// Rules & Correlations
// ============================================================================

#[derive(Serialize)]
pub struct RulesResponse {
    pub rules: Vec<String>,
}

pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<RulesResponse> {
    Json(RulesResponse {
        rules: state.engine.rule_names(),
    })
}

#[derive(Serialize)]
pub struct CreateRuleResponse {
    pub name: String,
    pub created: bool,
}

pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<RuleDefinition>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.add_definition(&definition)?;
    tracing::info!(rule = %definition.name, "Registered rule via API");

    Ok((
        StatusCode::CREATED,
        Json(CreateRuleResponse {
            name: definition.name.trim().to_string(),
            created: true,
        }),
    ))
}

pub async fn active_correlations(State(state): State<Arc<AppState>>) -> Json<Vec<ActiveCorrelation>> {
    Json(state.engine.get_active_correlations())
}

pub async fn patterns(State(state): State<Arc<AppState>>) -> Json<Vec<AlertPattern>> {
    Json(state.engine.get_alert_patterns())
}

// ============================================================================
// Stats
// ============================================================================

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<EngineStats> {
    Json(state.engine.stats())
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotFound(_) => ApiError::NotFound(e.to_string()),
            LifecycleError::AlreadyResolved(_) => ApiError::Conflict(e.to_string()),
        }
    }
}

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::Duplicate(_) => ApiError::Conflict(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
