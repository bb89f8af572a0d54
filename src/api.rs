// src/api.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::calendar::MonthKey;
use crate::clock::Clock;
use crate::error::QuotaError;
use crate::ledger::LedgerStats;
use crate::model::{PermissionSpan, QuotaType, Request, RequestId, RequestStatus, Span, WfhSpan};
use crate::reconciler::{BatchOutcome, QuotaEngine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QuotaEngine>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Quota(e) => {
                let status = match e {
                    QuotaError::Validation { .. } => StatusCode::BAD_REQUEST,
                    QuotaError::NotFound(_) => StatusCode::NOT_FOUND,
                    QuotaError::DuplicateRequest { .. }
                    | QuotaError::NotPending { .. }
                    | QuotaError::EditWindowExpired { .. }
                    | QuotaError::InactiveRequest { .. }
                    | QuotaError::IllegalTransition { .. } => StatusCode::CONFLICT,
                    QuotaError::LedgerConsistency { .. } | QuotaError::Storage(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.code())
            }
        };

        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            "Internal server error. Check logs.".to_string()
        } else {
            warn!("Request refused ({}): {}", code, self);
            self.to_string()
        };
        (
            status,
            Json(ErrorBody {
                code: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequestBody {
    pub employee_id: String,
    pub month: String,
    #[serde(flatten)]
    pub span: PermissionSpan,
}

#[derive(Debug, Deserialize)]
pub struct WfhRequestBody {
    pub employee_id: String,
    pub month: String,
    #[serde(flatten)]
    pub span: WfhSpan,
}

#[derive(Debug, Deserialize)]
pub struct ActorBody {
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub ids: Vec<RequestId>,
    pub actor_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchFailure {
    pub request_id: RequestId,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub succeeded: Vec<Request>,
    pub failed: Vec<BatchFailure>,
}

impl From<BatchOutcome> for BatchResponse {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            succeeded: outcome.succeeded,
            failed: outcome
                .failed
                .into_iter()
                .map(|(request_id, e)| BatchFailure {
                    request_id,
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .collect(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/permissions", post(handle_create_permission))
        .route("/permissions/{id}", put(handle_edit_permission))
        .route("/wfh", post(handle_create_wfh))
        .route("/wfh/{id}", put(handle_edit_wfh))
        .route("/requests/approve", post(handle_approve_batch))
        .route("/requests/reject", post(handle_reject_batch))
        .route("/requests/{id}", get(handle_get_request))
        .route("/requests/{id}/cancel", post(handle_cancel))
        .route("/employees/{employee_id}/requests", get(handle_list_requests))
        .route(
            "/ledgers/{employee_id}/{month}/{quota_type}",
            get(handle_get_ledger),
        );

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn handle_create_permission(
    State(state): State<AppState>,
    Json(body): Json<PermissionRequestBody>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    info!("Handling permission request for Emp={}", body.employee_id);
    let request = state
        .engine
        .validate_and_request(
            &body.employee_id,
            Span::Permission(body.span),
            &body.month,
            QuotaType::PermissionMinutes,
            state.clock.now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn handle_create_wfh(
    State(state): State<AppState>,
    Json(body): Json<WfhRequestBody>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    info!("Handling WFH request for Emp={}", body.employee_id);
    let request = state
        .engine
        .validate_and_request(
            &body.employee_id,
            Span::Wfh(body.span),
            &body.month,
            QuotaType::WfhDays,
            state.clock.now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn handle_edit_permission(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(span): Json<PermissionSpan>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    info!("Handling permission edit for request {}", id);
    let request = state
        .engine
        .edit(RequestId(id), Span::Permission(span), state.clock.now())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}

async fn handle_edit_wfh(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(span): Json<WfhSpan>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    info!("Handling WFH edit for request {}", id);
    let request = state
        .engine
        .edit(RequestId(id), Span::Wfh(span), state.clock.now())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}

async fn handle_get_request(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Request>, ApiError> {
    Ok(Json(state.engine.load_request(RequestId(id)).await?))
}

async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<ActorBody>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    info!("Handling cancel for request {} by {}", id, body.actor_id);
    let request = state
        .engine
        .transition(
            RequestId(id),
            RequestStatus::Cancelled,
            &body.actor_id,
            state.clock.now(),
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}

async fn run_batch(state: &AppState, body: BatchBody, target: RequestStatus) -> (StatusCode, Json<BatchResponse>) {
    info!(
        "Handling batch {} of {} request(s) by {}",
        target,
        body.ids.len(),
        body.actor_id
    );
    let outcome = state
        .engine
        .transition_batch(&body.ids, target, &body.actor_id, state.clock.now())
        .await;
    (StatusCode::ACCEPTED, Json(BatchResponse::from(outcome)))
}

async fn handle_approve_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> (StatusCode, Json<BatchResponse>) {
    run_batch(&state, body, RequestStatus::Approved).await
}

async fn handle_reject_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> (StatusCode, Json<BatchResponse>) {
    run_batch(&state, body, RequestStatus::Rejected).await
}

async fn handle_list_requests(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
) -> Result<Json<Vec<Request>>, ApiError> {
    Ok(Json(state.engine.requests_for_employee(&employee_id).await?))
}

async fn handle_get_ledger(
    State(state): State<AppState>,
    Path((employee_id, month, quota_type)): Path<(String, String, String)>,
) -> Result<Json<LedgerStats>, ApiError> {
    let month: MonthKey = month.parse().map_err(QuotaError::from)?;
    let quota_type: QuotaType = quota_type.parse().map_err(ApiError::BadRequest)?;
    let ledger = state
        .engine
        .get_ledger(&employee_id, month, quota_type)
        .await?;
    Ok(Json(LedgerStats::from(&ledger)))
}
