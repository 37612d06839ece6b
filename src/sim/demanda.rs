//! demanda.rs
//!
//! Convierte poblacion y nivel de congestion en vehiculos con hora de
//! salida y ruta asignada.

use rand::Rng;
use tracing::info;

use crate::graph::RoadGraph;
use crate::models::types::{PopulationData, SimOptions, TrafficData};
use crate::sim::rng::SimRng;
use crate::sim::rutas::{pick_distant_edge, RouteBuilder};
use crate::sim::Vehicle;

/// Distancia minima origen-destino (m).
const DEST_MIN_DIST_M: f64 = 2000.0;
/// Rutas mas cortas que esto se descartan (m).
const MIN_ROUTE_M: f64 = 200.0;
/// Ventana de salidas (s).
const DEPART_WINDOW_S: u32 = 2400;

pub fn vehicle_demand(population: &PopulationData, traffic: &TrafficData, max_vehicles: usize) -> usize {
    let raw = (population.estimated_vehicles
        * population.peak_hour_factor
        * traffic.congestion_level.demand_multiplier())
    .round();
    (raw.max(0.0) as usize).min(max_vehicles)
}

pub fn generate_trips(
    graph: &RoadGraph,
    population: &PopulationData,
    traffic: &TrafficData,
    opts: &SimOptions,
    rng: &mut SimRng,
    builder: &mut RouteBuilder,
) -> Vec<Vehicle> {
    let demand = vehicle_demand(population, traffic, opts.max_vehicles);
    let mut out = Vec::with_capacity(demand);

    for i in 0..demand {
        let depart = rng.0.gen_range(0..DEPART_WINDOW_S);
        let origin = rng.0.gen_range(0..graph.edges.len());
        let dest = pick_distant_edge(
            graph,
            rng,
            graph.edges[origin].head(),
            DEST_MIN_DIST_M,
            Some(origin),
        );
        let route = if dest != origin {
            builder.build_route(graph, rng, origin, dest)
        } else {
            vec![origin]
        };
        let speed0 = (graph.edges[origin].speed * (0.6 + rng.0.gen::<f64>() * 0.4)).max(15.0);
        if let Some(v) =
            Vehicle::from_route(format!("veh_{i}"), graph, route, depart, speed0, MIN_ROUTE_M)
        {
            out.push(v);
        }
    }

    info!(
        "demanda: {} viajes generados de {} previstos (cache rutas: {})",
        out.len(),
        demand,
        builder.cache_len()
    );
    out
}
