use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use grelay_core::Gateway;
use grelay_provider_core::{ErrorKind, ModelAttemptResult, PoolError};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cli::ServeArgs;

const BODY_LIMIT: usize = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct GenerateBody {
    prompt: String,
    model: Option<String>,
    #[serde(default)]
    return_stats: bool,
}

#[derive(Debug, Deserialize)]
struct StructuredBody {
    prompt: String,
    schema: JsonValue,
    model: Option<String>,
    #[serde(default)]
    return_stats: bool,
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/generate", post(generate))
        .route("/v1/generate/structured", post(generate_structured))
        .route("/v1/credentials", get(all_credentials))
        .route("/v1/credentials/{index}", get(one_credential))
        .route("/v1/egress", get(egress))
        .route("/v1/egress/rotate", post(rotate_egress))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Runs until Ctrl-C, then stops the egress maintenance loops.
pub async fn serve(gateway: Arc<Gateway>, args: ServeArgs) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = gateway.spawn_maintenance(shutdown_rx);

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(event = "listening", addr = %bind);
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in maintenance {
        if let Err(err) = handle.await {
            warn!(event = "maintenance_join_failed", error = %err);
        }
    }
    info!(event = "stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(event = "signal_listen_failed", error = %err);
        std::future::pending::<()>().await;
    }
    info!(event = "shutdown_requested");
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<JsonValue> {
    let available = gateway
        .credential_stats(None)
        .map(|table| table.iter().filter(|row| row.available).count())
        .unwrap_or_default();
    Json(json!({
        "status": "ok",
        "strategy": gateway.strategy().as_str(),
        "default_model": gateway.default_model(),
        "models": gateway.models(),
        "available_credentials": available,
    }))
}

async fn generate(
    State(gateway): State<Arc<Gateway>>,
    Json(body): Json<GenerateBody>,
) -> Response {
    let result = gateway.generate(&body.prompt, body.model.as_deref()).await;
    respond(&gateway, result, body.return_stats)
}

async fn generate_structured(
    State(gateway): State<Arc<Gateway>>,
    Json(body): Json<StructuredBody>,
) -> Response {
    let result = gateway
        .generate_structured(&body.prompt, body.schema, body.model.as_deref())
        .await;
    respond(&gateway, result, body.return_stats)
}

fn respond(gateway: &Gateway, result: ModelAttemptResult, return_stats: bool) -> Response {
    let status = status_for(&result);
    let result = if return_stats {
        gateway.with_stats(result)
    } else {
        result
    };
    (status, Json(result)).into_response()
}

fn status_for(result: &ModelAttemptResult) -> StatusCode {
    match result.kind() {
        None => StatusCode::OK,
        Some(ErrorKind::SafetyBlocked | ErrorKind::ParseFailure) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::RateLimited | ErrorKind::AllCredentialsBusy) => StatusCode::TOO_MANY_REQUESTS,
        Some(ErrorKind::Configuration) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(ErrorKind::Connection) => StatusCode::GATEWAY_TIMEOUT,
        Some(ErrorKind::AuthPermission | ErrorKind::Unknown) => StatusCode::BAD_GATEWAY,
    }
}

async fn all_credentials(State(gateway): State<Arc<Gateway>>) -> Response {
    credentials_response(&gateway, None)
}

async fn one_credential(State(gateway): State<Arc<Gateway>>, Path(index): Path<usize>) -> Response {
    credentials_response(&gateway, Some(index))
}

fn credentials_response(gateway: &Gateway, index: Option<usize>) -> Response {
    match gateway.credential_stats(index) {
        Ok(table) => Json(table).into_response(),
        Err(err @ PoolError::UnknownCredential { .. }) => {
            error_response(StatusCode::NOT_FOUND, err.to_string())
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn egress(State(gateway): State<Arc<Gateway>>) -> Json<JsonValue> {
    Json(json!({
        "stats": gateway.egress_stats(),
        "history": gateway.egress_history(),
    }))
}

async fn rotate_egress(State(gateway): State<Arc<Gateway>>) -> Json<JsonValue> {
    let selected = gateway.rotate_egress().map(|descriptor| descriptor.to_string());
    Json(json!({ "egress": selected }))
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
