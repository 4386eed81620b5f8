use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth::{Authenticator, UserId, bearer_token};
use crate::error::{SwapError, ValidationError};
use crate::swap::SwapRequest;
use crate::swap::service::SwapService;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Clone)]
pub struct AppState {
    pub service: SwapService,
    pub auth: Arc<dyn Authenticator>,
}

/// JSON error response; the status code follows the error kind.
#[derive(Debug)]
pub struct ApiError(SwapError);

impl From<SwapError> for ApiError {
    fn from(err: SwapError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(SwapError::Validation(ValidationError::InvalidRequest(
            message.into(),
        )))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SwapError::Validation(_) | SwapError::PaymentMismatch { .. } => StatusCode::BAD_REQUEST,
            SwapError::NotFound(_) | SwapError::Forbidden(_) => StatusCode::NOT_FOUND,
            SwapError::Authentication(_) => StatusCode::UNAUTHORIZED,
            SwapError::InvalidTransition { .. } | SwapError::Expired { .. } => StatusCode::CONFLICT,
            SwapError::Integration(_) => StatusCode::BAD_GATEWAY,
            SwapError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Ownership is not disclosed.
        let message = match &self.0 {
            SwapError::Forbidden(id) => SwapError::NotFound(id.clone()).to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<UserId> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(header).map_err(SwapError::from)?;
    state
        .auth
        .authenticate(token)
        .await
        .map_err(|e| ApiError(e.into()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/lightning/quote", post(post_quote))
        .route("/lightning/swap", post(post_swap))
        .route("/lightning/swap/{swap_id}", get(get_swap))
        .route("/lightning/swap/{swap_id}/deposit", post(post_deposit))
        .route("/lightning/swaps", get(get_swaps))
        .route("/lightning/verify-payment", post(post_verify_payment))
        .route("/lightning/gas-reserve", post(post_gas_reserve))
        .route("/lightning/config", get(get_config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn post_quote(
    State(state): State<AppState>,
    body: Result<Json<SwapRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = json_body(body)?;
    let quote = state.service.quote(&request)?;
    Ok(Json(json!({ "quote": quote })))
}

async fn post_swap(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SwapRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let owner = authenticate(&state, &headers).await?;
    let request = json_body(body)?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);

    let transaction = state
        .service
        .create_swap(&owner, &request, idempotency_key)
        .await?;
    Ok(Json(json!({ "transaction": transaction })))
}

async fn get_swap(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(swap_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // Callers that identify themselves only see their own records.
    let transaction = if headers.contains_key(header::AUTHORIZATION) {
        let owner = authenticate(&state, &headers).await?;
        state.service.get_swap_for_user(&owner, &swap_id)?
    } else {
        state.service.get_swap(&swap_id)?
    };
    Ok(Json(json!({ "transaction": transaction })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepositBody {
    transaction_hash: String,
}

async fn post_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(swap_id): Path<String>,
    body: Result<Json<DepositBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let owner = authenticate(&state, &headers).await?;
    let body = json_body(body)?;
    let transaction = state
        .service
        .submit_deposit(&owner, &swap_id, &body.transaction_hash)
        .await?;
    Ok(Json(json!({ "transaction": transaction })))
}

async fn get_swaps(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let owner = authenticate(&state, &headers).await?;
    let swaps = state.service.list_swaps_for_user(&owner)?;
    Ok(Json(json!({ "swaps": swaps })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentBody {
    payment_hash: String,
}

async fn post_verify_payment(
    State(state): State<AppState>,
    body: Result<Json<VerifyPaymentBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    if body.payment_hash.trim().is_empty() {
        return Err(ApiError::bad_request("paymentHash is required"));
    }
    let verification = state.service.verify_payment(&body.payment_hash).await?;
    Ok(Json(verification))
}

#[derive(Debug, Deserialize)]
struct GasReserveBody {
    amount: u64,
}

async fn post_gas_reserve(
    State(state): State<AppState>,
    body: Result<Json<GasReserveBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    let info = state.service.gas_reserve(body.amount);
    Ok(Json(json!({
        "reserveAmount": info.reserve_amount.to_string(),
        "percentage": info.percentage,
        "wbtcAmount": info.wbtc_amount.to_string(),
    })))
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "config": state.service.public_config() }))
}
