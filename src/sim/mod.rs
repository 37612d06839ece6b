//! Nucleo de simulacion: demanda, rutas, impactos de marcadores y el
//! bucle de microsimulacion en tiempo discreto.

pub mod demanda;
pub mod impacto;
pub mod motor;
pub mod rng;
pub mod rutas;
pub mod snapshot;

use crate::geoutil::{concat_polylines, densify, polyline_length_m};
use crate::graph::RoadGraph;
use crate::models::types::Coord;

/// Paso de densificacion de polilineas de ruta (m).
pub const DENSIFY_STEP_M: f64 = 5.0;

/// Vehiculo simulado. Creado una vez en la generacion de demanda,
/// nunca re-ruteado. Ciclo: SCHEDULED -> ACTIVE -> ARRIVED.
#[derive(Clone, Debug)]
pub struct Vehicle {
    pub id: String,
    /// Ids de arista de la ruta completa, en orden.
    pub route: Vec<String>,
    /// Indices de arista paralelos a `route`.
    pub route_idx: Vec<usize>,
    /// Posicion actual dentro de la ruta.
    pub route_pos: usize,
    /// Polilinea densificada de la ruta completa.
    pub polyline: Vec<Coord>,
    pub polyline_len_m: f64,
    /// Suma de longitudes de arista.
    pub route_length_m: f64,
    pub depart_time_s: u32,
    pub arrival_time_s: Option<u32>,
    /// km/h
    pub speed: f64,
    /// Avance sobre la arista actual, [0, 0.95].
    pub edge_progress: f64,
    pub distance_m: f64,
    pub emissions_g: f64,
}

impl Vehicle {
    /// Construye el vehiculo a partir de una ruta por indices. Devuelve
    /// `None` si la ruta queda por debajo de `min_length_m`.
    pub fn from_route(
        id: String,
        graph: &RoadGraph,
        route_idx: Vec<usize>,
        depart_time_s: u32,
        initial_speed: f64,
        min_length_m: f64,
    ) -> Option<Vehicle> {
        if route_idx.is_empty() {
            return None;
        }
        let route_length_m: f64 = route_idx.iter().map(|&i| graph.edges[i].length_m).sum();
        if route_length_m < min_length_m {
            return None;
        }
        let parts: Vec<&[Coord]> = route_idx
            .iter()
            .map(|&i| graph.edges[i].geometry.as_slice())
            .collect();
        let polyline = densify(&concat_polylines(&parts), DENSIFY_STEP_M);
        let polyline_len_m = polyline_length_m(&polyline);
        Some(Vehicle {
            id,
            route: route_idx.iter().map(|&i| graph.edges[i].id.clone()).collect(),
            route_idx,
            route_pos: 0,
            polyline,
            polyline_len_m,
            route_length_m,
            depart_time_s,
            arrival_time_s: None,
            speed: initial_speed,
            edge_progress: 0.0,
            distance_m: 0.0,
            emissions_g: 0.0,
        })
    }

    #[inline]
    pub fn is_active(&self, t: u32) -> bool {
        self.depart_time_s <= t
            && self.arrival_time_s.is_none()
            && self.route_pos < self.route_idx.len()
    }

    #[inline]
    pub fn current_edge(&self) -> Option<usize> {
        self.route_idx.get(self.route_pos).copied()
    }
}
