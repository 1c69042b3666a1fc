//! Payment endpoints: start, gateway callback, reconciliation and the
//! development-only callback simulator.

use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::health::{HealthChecker, HealthState};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::{IntentOptions, TransactionStatus};
use crate::services::callback_simulator::{CallbackSimulator, SimulationRequest};
use crate::services::payment_orchestrator::{
    CallbackDisposition, PaymentOrchestrator, Principal, SettlementState,
};
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct PaymentsState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    /// Present only when simulation is enabled.
    pub simulator: Option<Arc<CallbackSimulator>>,
    pub health: HealthChecker,
}

impl PaymentsState {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, health: HealthChecker) -> Self {
        Self {
            orchestrator,
            simulator: None,
            health,
        }
    }

    pub fn with_simulation(mut self) -> Self {
        self.simulator = Some(Arc::new(CallbackSimulator::new(self.orchestrator.clone())));
        self
    }
}

pub fn router(state: PaymentsState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/payments", post(start_payment))
        .route("/api/payments/callback", post(handle_callback))
        .route("/api/payments/{reference}/reconcile", post(reconcile_payment));

    if state.simulator.is_some() {
        info!("callback simulator mounted at /api/payments/simulate");
        router = router.route("/api/payments/simulate", post(simulate_callback));
    }

    router.with_state(state)
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// The principal is established upstream; this only reads what the
/// authentication layer forwarded.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = get_request_id_from_headers(&parts.headers);
        let read = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| Uuid::parse_str(v.trim()).ok())
        };

        match (read(TENANT_ID_HEADER), read(USER_ID_HEADER)) {
            (Some(tenant_id), Some(user_id)) => Ok(Principal { tenant_id, user_id }),
            _ => {
                let err = AppError::unauthenticated("missing or invalid caller identity");
                Err(match request_id {
                    Some(id) => err.with_request_id(id),
                    None => err,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartPaymentRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

/// POST /api/payments
pub async fn start_payment(
    State(state): State<PaymentsState>,
    principal: Principal,
    headers: HeaderMap,
    body: Result<Json<StartPaymentRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let tag = |err: AppError| match request_id.clone() {
        Some(id) => err.with_request_id(id),
        None => err,
    };

    let Json(request) = body.map_err(|e| {
        tag(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidField {
                field: "body".to_string(),
                reason: e.body_text(),
            },
        )))
    })?;

    let intent = state
        .orchestrator
        .start_payment(
            &principal,
            request.amount,
            request.currency.as_deref(),
            IntentOptions {
                redirect_url: request.redirect_url,
            },
        )
        .await
        .map_err(|e| tag(e.into()))?;

    Ok((StatusCode::CREATED, Json(intent)).into_response())
}

/// POST /api/payments/callback
///
/// Always acknowledged with 200 so the gateway stops redelivering; the
/// disposition is only logged.
pub async fn handle_callback(State(state): State<PaymentsState>, body: String) -> Response {
    let payload: JsonValue = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "callback body is not JSON");
            return ok_ack();
        }
    };

    match state.orchestrator.handle_callback(&payload).await {
        CallbackDisposition::Applied {
            reference,
            status,
            settlement,
        } => info!(reference = %reference, status = %status, settlement = ?settlement, "callback applied"),
        other => debug!(disposition = ?other, "callback acknowledged without changes"),
    }
    ok_ack()
}

fn ok_ack() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    pub reference: String,
    pub status: TransactionStatus,
    pub external_id: Option<String>,
    pub settlement: SettlementState,
}

/// POST /api/payments/{reference}/reconcile
pub async fn reconcile_payment(
    State(state): State<PaymentsState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ReconciliationResponse>, AppError> {
    let result = state.orchestrator.reconcile(&reference).await.map_err(|e| {
        let err: AppError = e.into();
        match get_request_id_from_headers(&headers) {
            Some(id) => err.with_request_id(id),
            None => err,
        }
    })?;

    Ok(Json(ReconciliationResponse {
        reference: result.transaction.reference,
        status: result.transaction.status,
        external_id: result.transaction.external_id,
        settlement: result.settlement,
    }))
}

/// POST /api/payments/simulate
pub async fn simulate_callback(
    State(state): State<PaymentsState>,
    Json(request): Json<SimulationRequest>,
) -> Result<Json<JsonValue>, AppError> {
    let Some(simulator) = state.simulator.as_ref() else {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidField {
                field: "simulation".to_string(),
                reason: "callback simulation is disabled".to_string(),
            },
        )));
    };

    let simulated = simulator.simulate(request).await?;
    Ok(Json(json!({
        "disposition": format!("{:?}", simulated.disposition),
        "payload": simulated.payload,
    })))
}

/// GET /health
pub async fn health(State(state): State<PaymentsState>) -> Response {
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(status)).into_response()
}
