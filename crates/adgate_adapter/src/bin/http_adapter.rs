#![forbid(unsafe_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use adgate_adapter::{
    bearer_token, AdSourceRequest, AdapterRejection, AdapterRuntime, PlayerRequest,
    PolicyUpdateRequest, SetModeRequest,
};
use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

type SharedRuntime = Arc<Mutex<AdapterRuntime>>;

#[derive(Debug, Deserialize)]
struct PlayerQuery {
    player_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = AdapterRuntime::default_from_env()?;
    let addr: SocketAddr = runtime.config().http_bind.parse()?;
    let tick_ms = runtime.config().gate.tick_ms;
    let checkpoint_every_ms = runtime.config().gate.checkpoint_every_ms;
    let runtime: SharedRuntime = Arc::new(Mutex::new(runtime));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/gate/state", get(gate_state))
        .route("/v1/gate/mode", post(set_mode))
        .route("/v1/playback/start", post(playback_start))
        .route("/v1/playback/pause", post(playback_pause))
        .route("/v1/playback/reset", post(playback_reset))
        .route("/v1/playback/ad-watched", post(playback_ad_watched))
        .route("/v1/playback/close", post(playback_close))
        .route("/v1/batch/record", post(batch_record))
        .route("/v1/batch/switch-mode", post(batch_switch_mode))
        .route("/v1/admin/policy", get(admin_policy).post(admin_update_policy))
        .route("/v1/admin/ad-sources", post(admin_ad_sources))
        .route("/v1/vip/activate", post(vip_activate))
        .with_state(runtime.clone());

    info!(%addr, tick_ms, checkpoint_every_ms, "adgate_http listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match runtime.lock() {
        Ok(mut runtime) => runtime.shutdown(),
        Err(_) => error!("adapter runtime lock poisoned during shutdown"),
    }
    info!("adgate_http stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    bearer_token(value).map(str::to_string)
}

fn with_runtime<T>(
    runtime: &SharedRuntime,
    f: impl FnOnce(&mut AdapterRuntime) -> Result<T, AdapterRejection>,
) -> Result<T, AdapterRejection> {
    let mut runtime = runtime
        .lock()
        .map_err(|_| AdapterRejection::Internal("adapter runtime lock poisoned".to_string()))?;
    f(&mut runtime)
}

fn respond<T: Serialize>(result: Result<T, AdapterRejection>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(rejection) => {
            let status = StatusCode::from_u16(rejection.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                error!(reason = rejection.reason().as_str(), "request failed");
            }
            (status, Json(rejection.to_response())).into_response()
        }
    }
}

async fn healthz(State(runtime): State<SharedRuntime>) -> Response {
    respond(with_runtime(&runtime, |rt| Ok(rt.health_report())))
}

async fn gate_state(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Query(query): Query<PlayerQuery>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| {
        rt.gate_state(token.as_deref(), &query.player_id)
    }))
}

async fn set_mode(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<SetModeRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| rt.set_mode(token.as_deref(), request)))
}

async fn playback_start(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<PlayerRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| {
        rt.start_playback(token.as_deref(), request)
    }))
}

async fn playback_pause(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<PlayerRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| {
        rt.pause_playback(token.as_deref(), request)
    }))
}

async fn playback_reset(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<PlayerRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| {
        rt.reset_playback(token.as_deref(), request)
    }))
}

async fn playback_ad_watched(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<PlayerRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| rt.ad_watched(token.as_deref(), request)))
}

async fn playback_close(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<PlayerRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| rt.close_player(token.as_deref(), request)))
}

async fn batch_record(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<PlayerRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| {
        rt.record_batch_ad(token.as_deref(), request)
    }))
}

async fn batch_switch_mode(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<PlayerRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| {
        rt.switch_mode_from_batch(token.as_deref(), request)
    }))
}

async fn admin_policy(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| rt.policy(token.as_deref())))
}

async fn admin_update_policy(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<PolicyUpdateRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| {
        rt.update_policy(token.as_deref(), request)
    }))
}

async fn admin_ad_sources(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<AdSourceRequest>,
) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| {
        rt.upsert_ad_source(token.as_deref(), request)
    }))
}

async fn vip_activate(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let token = bearer(&headers);
    respond(with_runtime(&runtime, |rt| rt.activate_vip(token.as_deref())))
}
