use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use super::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "comments-rs",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn health_ready(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let db_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: store unreachable");
            false
        }
    };
    state.metrics.set_dep_up("db", db_ok);

    let broker_ok = state.nats.as_ref().map_or(true, |client| {
        client.connection_state() == async_nats::connection::State::Connected
    });
    state.metrics.set_dep_up("broker", broker_ok);

    let consumers_ok =
        state.consumer_workers == 0 || state.metrics.consumer_workers_running.get() > 0;
    if !consumers_ok {
        tracing::warn!("Readiness: no comment consumer worker running");
    }
    state.metrics.set_dep_up("consumer", consumers_ok);

    let ready = db_ok && broker_ok && consumers_ok;
    state.metrics.set_dep_up("ready", ready);

    if !ready {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(json!({
        "status": "ready",
        "database": "connected",
        "broker": "connected"
    })))
}
