//! trafico.rs
//!
//! Proveedor de trafico en tiempo real (flujos e incidencias) para el
//! bbox de la simulacion.
//!
//! - `TomTomProvider`: muestrea flowSegmentData en cinco puntos del
//!   bbox y pide incidencias del area; deriva el nivel global de
//!   congestion del ratio velocidad actual / velocidad libre.
//! - Sin clave o con el upstream caido degrada a una estimacion
//!   determinista (MEDIUM, sin incidencias ni flujos).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::types::{BBox, CongestionLevel, Coord, Flow, Incident, TrafficData};

#[async_trait]
pub trait TrafficProvider: Send + Sync {
    async fn fetch_traffic(&self, bbox: &BBox) -> TrafficData;
}

pub struct TomTomProvider {
    pub client: Client,
    pub base_url: String,
    pub key: Option<String>,
}

#[derive(Deserialize)]
struct FlowResponse {
    #[serde(rename = "flowSegmentData")]
    segment: FlowSegment,
}

#[derive(Deserialize)]
struct FlowSegment {
    #[serde(rename = "frc", default)]
    road_class: String,
    #[serde(rename = "currentSpeed")]
    current_speed: f64,
    #[serde(rename = "freeFlowSpeed")]
    free_flow_speed: f64,
    #[serde(default)]
    confidence: f64,
    coordinates: FlowCoords,
}

#[derive(Deserialize)]
struct FlowCoords {
    coordinate: Vec<FlowPoint>,
}

#[derive(Deserialize)]
struct FlowPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct IncidentsResponse {
    #[serde(default)]
    incidents: Vec<IncidentFeature>,
}

#[derive(Deserialize)]
struct IncidentFeature {
    #[serde(default)]
    properties: IncidentProps,
    geometry: IncidentGeom,
}

#[derive(Deserialize, Default)]
struct IncidentProps {
    #[serde(default)]
    id: String,
    #[serde(rename = "iconCategory", default)]
    icon_category: i64,
    #[serde(default)]
    delay: f64,
    #[serde(default)]
    events: Vec<IncidentEvent>,
}

#[derive(Deserialize)]
struct IncidentEvent {
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct IncidentGeom {
    coordinates: serde_json::Value,
}

impl TomTomProvider {
    async fn flow_at(&self, key: &str, p: Coord) -> anyhow::Result<Flow> {
        let url = format!(
            "{}/traffic/services/4/flowSegmentData/absolute/10/json?point={:.6},{:.6}&key={}",
            self.base_url, p[1], p[0], key
        );
        let resp: FlowResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let s = resp.segment;
        Ok(Flow {
            road_name: s.road_class,
            current_speed: s.current_speed,
            free_flow_speed: s.free_flow_speed.max(1.0),
            confidence: s.confidence,
            coordinates: s
                .coordinates
                .coordinate
                .iter()
                .map(|c| [c.longitude, c.latitude])
                .collect(),
        })
    }

    async fn incidents_in(&self, key: &str, bbox: &BBox) -> anyhow::Result<Vec<Incident>> {
        let url = format!(
            "{}/traffic/services/5/incidentDetails?bbox={:.6},{:.6},{:.6},{:.6}&key={}",
            self.base_url, bbox.min_lng, bbox.min_lat, bbox.max_lng, bbox.max_lat, key
        );
        let resp: IncidentsResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let out = resp
            .incidents
            .into_iter()
            .filter_map(|f| {
                let coord = first_coord(&f.geometry.coordinates)?;
                Some(Incident {
                    id: f.properties.id,
                    kind: format!("category_{}", f.properties.icon_category),
                    description: f
                        .properties
                        .events
                        .first()
                        .map(|e| e.description.clone())
                        .unwrap_or_default(),
                    coordinates: coord,
                    delay_s: f.properties.delay,
                })
            })
            .collect();
        Ok(out)
    }
}

/// Primer [lng, lat] de una geometria Point o LineString.
fn first_coord(v: &serde_json::Value) -> Option<Coord> {
    let as_pair = |p: &serde_json::Value| -> Option<Coord> {
        Some([p.get(0)?.as_f64()?, p.get(1)?.as_f64()?])
    };
    as_pair(v).or_else(|| v.get(0).and_then(as_pair))
}

/// Nivel global a partir del ratio de velocidades y las incidencias.
fn derive_level(flows: &[Flow], incidents: &[Incident]) -> CongestionLevel {
    if flows.is_empty() {
        return CongestionLevel::Medium;
    }
    let ratio: f64 = flows
        .iter()
        .map(|f| f.current_speed / f.free_flow_speed)
        .sum::<f64>()
        / flows.len() as f64;
    let base = if ratio >= 0.8 {
        CongestionLevel::Low
    } else if ratio >= 0.6 {
        CongestionLevel::Medium
    } else if ratio >= 0.4 {
        CongestionLevel::High
    } else {
        CongestionLevel::Severe
    };
    if incidents.len() >= 10 {
        match base {
            CongestionLevel::Low => CongestionLevel::Medium,
            CongestionLevel::Medium => CongestionLevel::High,
            _ => CongestionLevel::Severe,
        }
    } else {
        base
    }
}

/// Estimacion determinista cuando no hay upstream.
pub fn estimated_traffic() -> TrafficData {
    TrafficData {
        incidents: Vec::new(),
        flows: Vec::new(),
        average_delay_s: 90.0,
        congestion_level: CongestionLevel::Medium,
        source: "estimate".into(),
    }
}

#[async_trait]
impl TrafficProvider for TomTomProvider {
    async fn fetch_traffic(&self, bbox: &BBox) -> TrafficData {
        let key = match &self.key {
            Some(k) => k.clone(),
            None => {
                debug!("trafico: sin clave TomTom, usando estimacion");
                return estimated_traffic();
            }
        };

        let center = bbox.center();
        let samples: [Coord; 5] = [
            center,
            [bbox.min_lng, center[1]],
            [bbox.max_lng, center[1]],
            [center[0], bbox.min_lat],
            [center[0], bbox.max_lat],
        ];

        let mut flows = Vec::new();
        for p in samples {
            match self.flow_at(&key, p).await {
                Ok(f) => flows.push(f),
                Err(e) => debug!("trafico: flujo en {:?} fallo: {e:?}", p),
            }
        }
        let incidents = match self.incidents_in(&key, bbox).await {
            Ok(v) => v,
            Err(e) => {
                warn!("trafico: incidencias caidas: {e:?}");
                Vec::new()
            }
        };

        if flows.is_empty() && incidents.is_empty() {
            return estimated_traffic();
        }

        let level = derive_level(&flows, &incidents);
        let average_delay_s = if incidents.is_empty() {
            let ratio: f64 = flows
                .iter()
                .map(|f| f.current_speed / f.free_flow_speed)
                .sum::<f64>()
                / flows.len() as f64;
            (1.0 - ratio).max(0.0) * 300.0
        } else {
            incidents.iter().map(|i| i.delay_s).sum::<f64>() / incidents.len() as f64
        };

        TrafficData {
            incidents,
            flows,
            average_delay_s,
            congestion_level: level,
            source: "tomtom".into(),
        }
    }
}

/// Proveedor determinista para pruebas.
pub struct EstimatedTrafficProvider;

#[async_trait]
impl TrafficProvider for EstimatedTrafficProvider {
    async fn fetch_traffic(&self, _bbox: &BBox) -> TrafficData {
        estimated_traffic()
    }
}
