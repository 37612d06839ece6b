//! api.rs — Rutas HTTP: /health, /markers, /simulate, /simulate/stream,
//! /simulate/live y /results.
//!
//! Los dos endpoints de streaming son SSE (`data: <json>\n\n`). El de
//! `/simulate/live` emite los frames etiquetados del hub; el de
//! `/simulate/stream` mantiene el formato antiguo de lineas de estado
//! `{message}` y cierre `{done:true, response}`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, services::ServeDir};
use tracing::warn;

use crate::error::SimError;
use crate::models::types::{AppCfg, LngLat, MarkerKind, SimOptions};
use crate::orquestador::{run_simulation, SimDeps};
use crate::storage::Storage;
use crate::stream::{StreamEvent, StreamHub};

#[derive(Clone)]
pub struct ApiState {
    pub storage: Arc<RwLock<Storage>>,
    pub deps: Arc<SimDeps>,
    pub cfg: AppCfg,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/markers",
            get(list_markers).post(create_marker).delete(clear_markers),
        )
        .route("/simulate", post(simulate))
        .route("/simulate/stream", get(simulate_stream))
        .route("/simulate/live", get(simulate_live))
        .route("/results", get(list_results))
        .fallback_service(ServeDir::new("web"))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}

async fn list_markers(State(st): State<ApiState>) -> impl IntoResponse {
    let s = st.storage.read().await;
    Json(s.list_markers().to_vec())
}

async fn create_marker(
    State(st): State<ApiState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let kind = match body.get("type").and_then(|v| v.as_str()) {
        Some("construction") => MarkerKind::Construction,
        Some("facility") => MarkerKind::Facility,
        _ => {
            let e = SimError::InvalidMarker("type must be construction or facility".into());
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": e.to_string()})),
            )
                .into_response();
        }
    };
    let coords = body.get("coordinates");
    let lng = coords.and_then(|c| c.get("lng")).and_then(|v| v.as_f64());
    let lat = coords.and_then(|c| c.get("lat")).and_then(|v| v.as_f64());
    let (lng, lat) = match (lng, lat) {
        (Some(lng), Some(lat))
            if lng.is_finite() && lat.is_finite() && lng.abs() <= 180.0 && lat.abs() <= 90.0 =>
        {
            (lng, lat)
        }
        _ => {
            let e = SimError::InvalidMarker("malformed coordinates".into());
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": e.to_string()})),
            )
                .into_response();
        }
    };

    let stored = st
        .storage
        .write()
        .await
        .insert_marker(kind, LngLat { lng, lat });
    (StatusCode::OK, Json(serde_json::to_value(stored).unwrap_or_default())).into_response()
}

async fn clear_markers(State(st): State<ApiState>) -> impl IntoResponse {
    let n = st.storage.write().await.clear_markers();
    Json(json!({"message": format!("{n} markers cleared")}))
}

async fn list_results(State(st): State<ApiState>) -> impl IntoResponse {
    let s = st.storage.read().await;
    Json(s.list_results().to_vec())
}

#[derive(Debug, Deserialize, Default)]
struct SimParams {
    /// Duracion simulada en minutos (default 60)
    duration: Option<u32>,
    /// Radio de extraccion en km (default 3)
    radius: Option<f64>,
}

fn sim_options(cfg: &AppCfg, p: &SimParams) -> SimOptions {
    SimOptions {
        // acotado: un dia simulado como maximo, el motor multiplica por 60
        duration_minutes: p.duration.unwrap_or(60).clamp(1, 1440),
        radius_km: p.radius.unwrap_or(3.0).clamp(1.0, 4.0),
        seed: cfg.seed,
        ..Default::default()
    }
}

async fn simulate(
    State(st): State<ApiState>,
    body: Option<Json<SimParams>>,
) -> impl IntoResponse {
    let params = body.map(|Json(p)| p).unwrap_or_default();
    let markers = st.storage.read().await.markers_core();
    if markers.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "No markers placed for simulation"})),
        );
    }
    let opts = sim_options(&st.cfg, &params);
    match run_simulation(&st.deps, &markers, &opts, None).await {
        Ok(resp) => {
            let value = serde_json::to_value(&resp).unwrap_or_default();
            st.storage.write().await.insert_result(value.clone());
            (StatusCode::OK, Json(value))
        }
        Err(e) => {
            warn!("simulate: {e}");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": e.to_string()})),
            )
        }
    }
}

/// Guarda del suscriptor: al soltarse el stream SSE (desconexion del
/// cliente o fin normal) cancela el hub y con ello el bucle del motor.
struct SubscriberGuard(Arc<StreamHub>);

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn spawn_run(st: &ApiState, opts: SimOptions, hub: Arc<StreamHub>) {
    let deps = st.deps.clone();
    let storage = st.storage.clone();
    tokio::spawn(async move {
        let task = {
            let hub = hub.clone();
            let storage = storage.clone();
            tokio::spawn(async move {
                let markers = storage.read().await.markers_core();
                match run_simulation(&deps, &markers, &opts, Some(hub)).await {
                    Ok(resp) => {
                        let value = serde_json::to_value(&resp).unwrap_or_default();
                        storage.write().await.insert_result(value);
                    }
                    Err(e) => warn!("simulacion en stream: {e}"),
                }
            })
        };
        // un panico interno dentro de la simulacion no debe dejar al
        // suscriptor colgado: el stream cierra siempre con un terminal
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!("simulacion en stream: panico interno");
                hub.error("simulation aborted");
            }
        }
    });
}

async fn simulate_live(
    State(st): State<ApiState>,
    Query(params): Query<SimParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let hub = StreamHub::new();
    spawn_run(&st, sim_options(&st.cfg, &params), hub.clone());

    let stream = futures::stream::unfold(SubscriberGuard(hub), |g| async move {
        let ev = g.0.recv().await?;
        let json = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".into());
        Some((Ok(Event::default().data(json)), g))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn simulate_stream(
    State(st): State<ApiState>,
    Query(params): Query<SimParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let hub = StreamHub::new();
    spawn_run(&st, sim_options(&st.cfg, &params), hub.clone());

    // formato antiguo: lineas {message} y cierre {done:true, response}
    let stream = futures::stream::unfold(SubscriberGuard(hub), |g| async move {
        loop {
            let ev = g.0.recv().await?;
            let frame = match ev {
                StreamEvent::Status { message } => json!({"message": message}),
                StreamEvent::LiveData { .. } => continue,
                StreamEvent::Complete { response } => json!({"done": true, "response": response}),
                StreamEvent::Error { message } => {
                    json!({"message": format!("Simulation failed: {message}")})
                }
            };
            return Some((Ok(Event::default().data(frame.to_string())), g));
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
