use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{info, Level};

use simtrafico::data::{fetch, osm::OverpassProvider, poblacion::HttpPopulationProvider, trafico::TomTomProvider};
use simtrafico::models::types::{AppCfg, SimOptions};
use simtrafico::orquestador::SimDeps;
use simtrafico::server::api::{self, ApiState};
use simtrafico::storage::Storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_max_level(Level::INFO)
        .init();

    let cfg = app_cfg_from_env();
    fetch::init(Duration::from_secs(
        env::var("ROAD_CACHE_TTL_S")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(SimOptions::default().road_cache_ttl_s),
    ));

    // HTTP client con compresion, compartido por los proveedores
    let client = Client::builder()
        .brotli(true)
        .gzip(true)
        .deflate(true)
        .timeout(Duration::from_secs(cfg.http_timeout_s))
        .build()?;

    let deps = Arc::new(SimDeps {
        roads: Arc::new(OverpassProvider {
            client: client.clone(),
            url: cfg.overpass_url.clone(),
            synthetic_fallback: cfg.synthetic_fallback,
        }),
        traffic: Arc::new(TomTomProvider {
            client: client.clone(),
            base_url: cfg.traffic_url.clone(),
            key: cfg.tomtom_key.clone(),
        }),
        population: Arc::new(HttpPopulationProvider {
            client,
            url: cfg.population_url.clone(),
        }),
    });

    let storage = Arc::new(RwLock::new(Storage::default()));
    let app = api::router(ApiState {
        storage,
        deps,
        cfg: cfg.clone(),
    });

    info!("Escuchando en http://{}", cfg.bind);
    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    let serve = axum::serve(listener, app);
    tokio::select! {
        r = serve => { r?; },
        _ = signal::ctrl_c() => { info!("Señal de salida recibida"); }
    }

    Ok(())
}

fn app_cfg_from_env() -> AppCfg {
    let mut c = AppCfg::default();
    if let Ok(v) = env::var("BIND") { c.bind = v; }
    if let Ok(v) = env::var("OVERPASS_URL") { c.overpass_url = v; }
    if let Ok(v) = env::var("TRAFFIC_URL") { c.traffic_url = v; }
    if let Ok(v) = env::var("TOMTOM_KEY") { c.tomtom_key = Some(v); }
    if let Ok(v) = env::var("POPULATION_URL") { c.population_url = Some(v); }
    if let Ok(v) = env::var("SYNTHETIC_FALLBACK") { c.synthetic_fallback = v == "1" || v.eq_ignore_ascii_case("true"); }
    if let Ok(v) = env::var("HTTP_TIMEOUT_S") { c.http_timeout_s = v.parse().unwrap_or(c.http_timeout_s); }
    if let Ok(v) = env::var("SIM_SEED") { c.seed = v.parse().ok(); }
    c
}
