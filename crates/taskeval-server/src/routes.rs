use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use taskeval_core::UnlockError;
use taskeval_core::app::RateDecision;
use taskeval_core::domain::{
    GatewayPaymentId, NewTask, OrderId, TaskFilter, TaskId, TaskStatus, UserId,
};
use tower_http::trace::TraceLayer;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::State;

/// Header carrying the webhook body signature.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-razorpay-signature";

type AppState = axum::extract::State<State>;

pub fn build_router(state: State) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/tasks", post(create_task_handler).get(list_tasks_handler))
        .route("/api/tasks/:id", get(task_handler))
        .route("/api/tasks/:id/status", get(task_status_handler))
        .route("/api/evaluate", post(evaluate_handler))
        .route("/api/payment/create-order", post(create_order_handler))
        .route("/api/payment/verify", post(verify_payment_handler))
        .route("/api/payments", get(list_payments_handler))
        .route("/api/razorpay/webhook", post(webhook_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn rate_limit(state: &State, user: UserId) -> Result<(), ApiError> {
    match state.app.rate_limiter.check(user) {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Limited { retry_after } => Err(ApiError::RateLimited { retry_after }),
    }
}

/// Unparsable ids cannot name an existing task.
fn task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| UnlockError::not_found(format!("task {raw}")).into())
}

fn required(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(UnlockError::InvalidInput(format!("{name} is required")).into());
    }
    Ok(())
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskBody {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(alias = "codeText")]
    code: String,
    #[serde(default)]
    language: Option<String>,
}

pub async fn create_task_handler(
    axum::extract::State(state): AppState,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateTaskBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    rate_limit(&state, user)?;
    let Json(body) = payload?;
    let task = state
        .app
        .pipeline
        .submit_task(
            user,
            NewTask {
                title: body.title,
                description: body.description,
                code_text: body.code,
                language: body.language,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

pub async fn list_tasks_handler(
    axum::extract::State(state): AppState,
    AuthUser(user): AuthUser,
    query: Result<Query<ListTasksQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(UnlockError::InvalidInput)?;
    let defaults = TaskFilter::default();
    let filter = TaskFilter {
        status,
        limit: query.limit.unwrap_or(defaults.limit),
        offset: query.offset.unwrap_or(defaults.offset),
    };
    let tasks = state.app.pipeline.list_tasks(user, filter).await?;
    Ok(Json(tasks))
}

pub async fn task_handler(
    axum::extract::State(state): AppState,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state.app.pipeline.task_details(user, task_id(&id)?).await?;
    Ok(Json(details))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    wait_ms: Option<u64>,
}

pub async fn task_status_handler(
    axum::extract::State(state): AppState,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let outcome = state
        .app
        .pipeline
        .watch_status(user, task_id(&id)?, query.wait_ms.map(Duration::from_millis))
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
    task_id: TaskId,
}

pub async fn evaluate_handler(
    axum::extract::State(state): AppState,
    AuthUser(user): AuthUser,
    payload: Result<Json<EvaluateBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    rate_limit(&state, user)?;
    let Json(body) = payload?;
    let evaluation = state
        .app
        .pipeline
        .trigger_evaluation(user, body.task_id)
        .await?;
    Ok(Json(evaluation))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    task_id: TaskId,
    #[serde(default)]
    amount: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    order_id: OrderId,
    amount: u64,
    currency: String,
    /// Public key id for the checkout widget.
    key: String,
}

pub async fn create_order_handler(
    axum::extract::State(state): AppState,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateOrderBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    rate_limit(&state, user)?;
    let Json(body) = payload?;
    let order = state
        .app
        .coordinator
        .create_order(user, body.task_id, body.amount)
        .await?;
    Ok(Json(CreateOrderResponse {
        order_id: order.order_id,
        amount: order.amount,
        currency: order.currency,
        key: state.key_id.to_string(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBody {
    order_id: String,
    payment_id: String,
    signature: String,
    task_id: TaskId,
}

pub async fn verify_payment_handler(
    axum::extract::State(state): AppState,
    AuthUser(user): AuthUser,
    payload: Result<Json<VerifyBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    rate_limit(&state, user)?;
    let Json(body) = payload?;
    required(&body.order_id, "orderId")?;
    required(&body.payment_id, "paymentId")?;
    required(&body.signature, "signature")?;

    state
        .app
        .coordinator
        .verify_client_payment(
            user,
            body.task_id,
            &OrderId::new(body.order_id),
            &GatewayPaymentId::new(body.payment_id),
            &body.signature,
        )
        .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_payments_handler(
    axum::extract::State(state): AppState,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let payments = state.app.pipeline.list_payments(user).await?;
    Ok(Json(payments))
}

/// Gateway deliveries are authenticated by signature, not by user.
pub async fn webhook_handler(
    axum::extract::State(state): AppState,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let ack = state
        .app
        .coordinator
        .handle_gateway_event(&body, signature)
        .await?;
    Ok(Json(json!({
        "received": true,
        "event": ack.event,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
