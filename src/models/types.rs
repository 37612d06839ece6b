//! types.rs
//! Modelos de datos compartidos por el servicio: entradas (marcadores,
//! red vial, trafico, poblacion), configuracion y salidas (metricas)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coordenada [lng, lat] en WGS84, orden GeoJSON.
pub type Coord = [f64; 2];

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn to_coord(self) -> Coord {
        [self.lng, self.lat]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Construction,
    Facility,
}

/// Marcador colocado por el usuario. El nucleo nunca lo persiste,
/// lo recibe ya validado desde la capa HTTP.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Marker {
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    pub coordinates: LngLat,
}

/// Bounding box [min_lng, min_lat] x [max_lng, max_lat].
#[derive(Clone, Copy, Debug, Serialize)]
pub struct BBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BBox {
    pub fn from_markers(markers: &[Marker], margin_deg: f64) -> Self {
        let mut b = BBox {
            min_lng: f64::INFINITY,
            min_lat: f64::INFINITY,
            max_lng: f64::NEG_INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for m in markers {
            b.min_lng = b.min_lng.min(m.coordinates.lng);
            b.min_lat = b.min_lat.min(m.coordinates.lat);
            b.max_lng = b.max_lng.max(m.coordinates.lng);
            b.max_lat = b.max_lat.max(m.coordinates.lat);
        }
        b.min_lng -= margin_deg;
        b.min_lat -= margin_deg;
        b.max_lng += margin_deg;
        b.max_lat += margin_deg;
        b
    }

    pub fn center(&self) -> Coord {
        [
            (self.min_lng + self.max_lng) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        ]
    }
}

/// Via cruda tal y como llega del proveedor (Overpass o sintetica).
/// Inmutable tras la ingesta.
#[derive(Clone, Debug)]
pub struct Road {
    pub id: String,
    pub node_ids: Vec<i64>,
    pub tags: HashMap<String, String>,
    pub geometry: Vec<Coord>,
}

#[derive(Clone, Debug, Default)]
pub struct NetworkData {
    pub roads: Vec<Road>,
    /// "overpass", "cache", "synthetic" o "empty_fallback"
    pub source: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
    Severe,
}

impl CongestionLevel {
    /// Multiplicador de demanda segun el nivel global.
    pub fn demand_multiplier(self) -> f64 {
        match self {
            CongestionLevel::Severe => 1.3,
            CongestionLevel::High => 1.2,
            CongestionLevel::Medium => 1.1,
            CongestionLevel::Low => 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub coordinates: Coord,
    pub delay_s: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Flow {
    pub road_name: String,
    pub current_speed: f64,
    pub free_flow_speed: f64,
    pub confidence: f64,
    pub coordinates: Vec<Coord>,
}

/// Foto de trafico en tiempo real para el bbox. Solo lectura durante
/// la simulacion.
#[derive(Clone, Debug, Serialize)]
pub struct TrafficData {
    pub incidents: Vec<Incident>,
    pub flows: Vec<Flow>,
    pub average_delay_s: f64,
    pub congestion_level: CongestionLevel,
    pub source: String,
}

impl Default for TrafficData {
    fn default() -> Self {
        Self {
            incidents: Vec::new(),
            flows: Vec::new(),
            average_delay_s: 0.0,
            congestion_level: CongestionLevel::Low,
            source: "estimate".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PopulationData {
    pub total: f64,
    /// habitantes por km2
    pub density: f64,
    pub estimated_vehicles: f64,
    pub peak_hour_factor: f64,
    pub age_distribution: HashMap<String, f64>,
    pub working_population: f64,
    /// "primary", "regional_fallback" o "estimate"
    pub source: String,
}

/// Parametros de una ejecucion de simulacion.
#[derive(Clone, Debug)]
pub struct SimOptions {
    pub duration_minutes: u32,
    pub radius_km: f64,
    pub max_vehicles: usize,
    pub live_sample_size: usize,
    pub live_tick_seconds: u32,
    pub road_cache_ttl_s: u64,
    pub seed: Option<u64>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            duration_minutes: 60,
            radius_km: 3.0,
            max_vehicles: 500,
            live_sample_size: 50,
            live_tick_seconds: 10,
            road_cache_ttl_s: 600,
            seed: None,
        }
    }
}

/// Registro de reduccion por obras sobre una arista. Log append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConstructionImpact {
    pub edge_id: String,
    pub original_speed: f64,
    pub reduced_speed: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct VehicleSummary {
    pub id: String,
    pub route_edges: usize,
    pub distance_km: f64,
    pub co2_g: f64,
    pub arrived: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct PopulationSummary {
    pub total: f64,
    pub density: f64,
    pub estimated_vehicles: f64,
    pub source: String,
}

/// Metricas finales de una ejecucion, ya formateadas para el cliente.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsReport {
    /// "N km"
    pub driving_distance_km: String,
    /// "N.N km"
    pub congestion_length: String,
    /// "N kg"
    pub co2_emissions: String,
    pub roads_count: usize,
    pub nodes_count: usize,
    pub incidents_count: usize,
    pub affected_edges: usize,
    pub vehicle_sample: Vec<VehicleSummary>,
    pub construction_impacts: Vec<ConstructionImpact>,
    pub population_summary: PopulationSummary,
}

/// Respuesta completa del endpoint sincrono y del evento `complete`.
#[derive(Clone, Debug, Serialize)]
pub struct SimulateResponse {
    pub metrics: MetricsReport,
    pub ai_summary: String,
    pub risk_assessment: String,
    pub recommendations: Vec<String>,
}

/// Configuracion del proceso, cargada desde env en el arranque.
#[derive(Clone, Debug)]
pub struct AppCfg {
    pub bind: String,
    pub overpass_url: String,
    pub traffic_url: String,
    pub tomtom_key: Option<String>,
    pub population_url: Option<String>,
    /// Si true, el proveedor vial degrada a la red sintetica en vez de
    /// a una red vacia cuando Overpass no responde.
    pub synthetic_fallback: bool,
    pub http_timeout_s: u64,
    pub seed: Option<u64>,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            overpass_url: "https://overpass-api.de/api/interpreter".into(),
            traffic_url: "https://api.tomtom.com".into(),
            tomtom_key: None,
            population_url: None,
            synthetic_fallback: false,
            http_timeout_s: 25,
            seed: None,
        }
    }
}
