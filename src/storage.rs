//! storage.rs
//!
//! Almacen en memoria de las dos colecciones persistidas: marcadores y
//! resultados de simulacion. Ids asignados por el servidor, JSON con
//! valores anidados y sin integridad referencial. Escritor unico via
//! el `RwLock` que lo envuelve en el estado de la API.

use chrono::Utc;
use serde::Serialize;

use crate::models::types::{LngLat, Marker, MarkerKind};

#[derive(Clone, Debug, Serialize)]
pub struct StoredMarker {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    pub coordinates: LngLat,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct StoredResult {
    pub id: u64,
    pub result: serde_json::Value,
    pub created_at: String,
}

#[derive(Default)]
pub struct Storage {
    markers: Vec<StoredMarker>,
    results: Vec<StoredResult>,
    next_marker_id: u64,
    next_result_id: u64,
}

impl Storage {
    pub fn insert_marker(&mut self, kind: MarkerKind, coordinates: LngLat) -> StoredMarker {
        self.next_marker_id += 1;
        let m = StoredMarker {
            id: self.next_marker_id,
            kind,
            coordinates,
            created_at: Utc::now().to_rfc3339(),
        };
        self.markers.push(m.clone());
        m
    }

    pub fn list_markers(&self) -> &[StoredMarker] {
        &self.markers
    }

    /// Marcadores en la forma que consume el nucleo.
    pub fn markers_core(&self) -> Vec<Marker> {
        self.markers
            .iter()
            .map(|m| Marker {
                kind: m.kind,
                coordinates: m.coordinates,
            })
            .collect()
    }

    pub fn clear_markers(&mut self) -> usize {
        let n = self.markers.len();
        self.markers.clear();
        n
    }

    pub fn insert_result(&mut self, result: serde_json::Value) -> u64 {
        self.next_result_id += 1;
        self.results.push(StoredResult {
            id: self.next_result_id,
            result,
            created_at: Utc::now().to_rfc3339(),
        });
        self.next_result_id
    }

    pub fn list_results(&self) -> &[StoredResult] {
        &self.results
    }
}
