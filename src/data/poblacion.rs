//! poblacion.rs
//!
//! Proveedor de poblacion para el bbox: total, densidad y estimacion
//! de vehiculos, de los que el generador de demanda deriva los viajes.
//!
//! Con upstream caido o sin endpoint configurado se estima desde el
//! area del bbox con una densidad urbana tipica. Determinista.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::geoutil::bbox_area_km2;
use crate::models::types::{BBox, PopulationData};

/// Densidad urbana por defecto (hab/km2) para la estimacion.
const FALLBACK_DENSITY: f64 = 5000.0;
/// Vehiculos por habitante.
const VEHICLE_RATIO: f64 = 0.35;
/// Fraccion de la flota activa en la ventana punta.
const PEAK_HOUR_FACTOR: f64 = 0.1;

#[async_trait]
pub trait PopulationProvider: Send + Sync {
    async fn fetch_population(&self, bbox: &BBox) -> PopulationData;
}

fn age_distribution() -> HashMap<String, f64> {
    let mut m = HashMap::new();
    m.insert("0-14".to_string(), 0.14);
    m.insert("15-64".to_string(), 0.65);
    m.insert("65+".to_string(), 0.21);
    m
}

/// Estimacion determinista desde el area del bbox.
pub fn estimated_population(bbox: &BBox) -> PopulationData {
    let area = bbox_area_km2(bbox).max(0.1);
    let total = FALLBACK_DENSITY * area;
    PopulationData {
        total,
        density: FALLBACK_DENSITY,
        estimated_vehicles: total * VEHICLE_RATIO,
        peak_hour_factor: PEAK_HOUR_FACTOR,
        age_distribution: age_distribution(),
        working_population: total * 0.48,
        source: "estimate".into(),
    }
}

pub struct HttpPopulationProvider {
    pub client: Client,
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct CensusResponse {
    #[serde(default)]
    total_population: Option<f64>,
    #[serde(default)]
    density_per_km2: Option<f64>,
}

#[async_trait]
impl PopulationProvider for HttpPopulationProvider {
    async fn fetch_population(&self, bbox: &BBox) -> PopulationData {
        let url = match &self.url {
            Some(u) => u.clone(),
            None => return estimated_population(bbox),
        };

        let req = self.client.get(&url).query(&[
            ("min_lng", bbox.min_lng),
            ("min_lat", bbox.min_lat),
            ("max_lng", bbox.max_lng),
            ("max_lat", bbox.max_lat),
        ]);
        let resp: Result<CensusResponse, reqwest::Error> = async {
            req.send().await?.error_for_status()?.json().await
        }
        .await;
        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!("poblacion caida, estimando: {e:?}");
                return estimated_population(bbox);
            }
        };

        let area = bbox_area_km2(bbox).max(0.1);
        match (resp.total_population, resp.density_per_km2) {
            (Some(total), density) => {
                let density = density.unwrap_or(total / area);
                PopulationData {
                    total,
                    density,
                    estimated_vehicles: total * VEHICLE_RATIO,
                    peak_hour_factor: PEAK_HOUR_FACTOR,
                    age_distribution: age_distribution(),
                    working_population: total * 0.48,
                    source: "primary".into(),
                }
            }
            (None, Some(density)) => {
                // solo densidad regional: extrapolamos al area
                let total = density * area;
                PopulationData {
                    total,
                    density,
                    estimated_vehicles: total * VEHICLE_RATIO,
                    peak_hour_factor: PEAK_HOUR_FACTOR,
                    age_distribution: age_distribution(),
                    working_population: total * 0.48,
                    source: "regional_fallback".into(),
                }
            }
            (None, None) => estimated_population(bbox),
        }
    }
}

/// Proveedor determinista para pruebas.
pub struct EstimatedPopulationProvider;

#[async_trait]
impl PopulationProvider for EstimatedPopulationProvider {
    async fn fetch_population(&self, bbox: &BBox) -> PopulationData {
        estimated_population(bbox)
    }
}
