//! snapshot.rs
//!
//! Construye la foto periodica para los suscriptores en vivo: posicion
//! interpolada de una muestra estable de vehiculos activos mas los
//! tramos congestionados. Dimensionada para viajar barata por la red.

use serde::Serialize;

use crate::geoutil::{bearing_deg, point_at_distance};
use crate::graph::RoadGraph;
use crate::models::types::Coord;
use crate::sim::Vehicle;

/// Maximo de tramos congestionados por foto.
const MAX_SEGMENTS: usize = 20;

#[derive(Clone, Debug, Serialize)]
pub struct VehiclePosition {
    pub id: String,
    pub coordinates: Coord,
    pub speed: f64,
    /// Grados, 0 = norte, horario.
    pub bearing: f64,
    /// [0, 1] sobre la ruta completa.
    pub progress: f64,
    /// Ids de arista de la ruta (compatibilidad con clientes antiguos).
    pub route: Vec<String>,
    /// Polilinea densificada para suavizado en cliente.
    pub route_coordinates: Vec<Coord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CongestionSegment {
    pub coordinates: Vec<Coord>,
    pub level: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LiveSnapshot {
    pub timestamp: u32,
    pub vehicles: Vec<VehiclePosition>,
    pub congestion_segments: Vec<CongestionSegment>,
    /// Activos totales, sin recortar por la muestra.
    pub total_vehicles: usize,
    pub average_speed: f64,
}

fn vehicle_position(v: &Vehicle) -> VehiclePosition {
    let progress = if v.route_length_m > 0.0 {
        (v.distance_m / v.route_length_m).min(1.0)
    } else {
        1.0
    };
    let coordinates = point_at_distance(&v.polyline, progress * v.polyline_len_m);
    let ahead = (progress + 0.001).min(1.0);
    let bearing = if ahead > progress {
        bearing_deg(coordinates, point_at_distance(&v.polyline, ahead * v.polyline_len_m))
    } else {
        let behind = (progress - 0.001).max(0.0);
        bearing_deg(point_at_distance(&v.polyline, behind * v.polyline_len_m), coordinates)
    };
    VehiclePosition {
        id: v.id.clone(),
        coordinates,
        speed: v.speed,
        bearing,
        progress,
        route: v.route.clone(),
        route_coordinates: v.polyline.clone(),
    }
}

pub fn congestion_segments(graph: &RoadGraph, counts: &[u32]) -> Vec<CongestionSegment> {
    let mut out = Vec::new();
    for (idx, edge) in graph.edges.iter().enumerate() {
        if out.len() >= MAX_SEGMENTS {
            break;
        }
        let utilization = counts[idx] as f64 / (edge.capacity / 3600.0).max(1.0);
        let level = if utilization > 0.8 {
            "high"
        } else if utilization > 0.5 {
            "medium"
        } else if utilization > 0.3 {
            "low"
        } else {
            continue;
        };
        out.push(CongestionSegment {
            coordinates: edge.geometry.clone(),
            level: level.to_string(),
        });
    }
    out
}

/// Muestra estable: activos ordenados por id, recortados a
/// `sample_size` para que la animacion no salte entre ticks.
pub fn build_snapshot(
    graph: &RoadGraph,
    vehicles: &[Vehicle],
    active: &[usize],
    counts: &[u32],
    timestamp: u32,
    sample_size: usize,
) -> LiveSnapshot {
    let mut act: Vec<&Vehicle> = active.iter().map(|&i| &vehicles[i]).collect();
    act.sort_by(|a, b| a.id.cmp(&b.id));

    let average_speed = if act.is_empty() {
        0.0
    } else {
        let s: f64 = act.iter().map(|v| v.speed).sum();
        ((s / act.len() as f64) * 10.0).round() / 10.0
    };

    LiveSnapshot {
        timestamp,
        vehicles: act.iter().take(sample_size).map(|v| vehicle_position(v)).collect(),
        congestion_segments: congestion_segments(graph, counts),
        total_vehicles: act.len(),
        average_speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::synthetic_network;
    use crate::geoutil::haversine_m;
    use crate::sim::rng::SimRng;
    use crate::sim::rutas::{pick_distant_edge, RouteBuilder};

    fn vehicle_on(graph: &RoadGraph, seed: u64) -> Vehicle {
        let mut rng = SimRng::from_seed_u64(seed);
        let mut b = RouteBuilder::new();
        let dest = pick_distant_edge(graph, &mut rng, graph.edges[0].head(), 2000.0, Some(0));
        let route = b.build_route(graph, &mut rng, 0, dest);
        Vehicle::from_route("veh_0".into(), graph, route, 0, 30.0, 200.0).unwrap()
    }

    #[test]
    fn polyline_endpoints_match_route() {
        let graph = RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 2.0));
        let v = vehicle_on(&graph, 31);
        let first_edge = &graph.edges[v.route_idx[0]];
        let last_edge = &graph.edges[*v.route_idx.last().unwrap()];
        assert!(haversine_m(v.polyline[0], first_edge.geometry[0]) < 1.0);
        assert!(haversine_m(*v.polyline.last().unwrap(), *last_edge.geometry.last().unwrap()) < 1.0);
    }

    #[test]
    fn snapshot_caps_sample_and_orders_by_id() {
        let graph = RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 2.0));
        let mut vehicles = Vec::new();
        for i in 0..8 {
            let mut v = vehicle_on(&graph, 100 + i);
            v.id = format!("veh_{i}");
            v.distance_m = 50.0 * i as f64;
            vehicles.push(v);
        }
        let active: Vec<usize> = (0..vehicles.len()).collect();
        let counts = vec![0u32; graph.edges.len()];
        let snap = build_snapshot(&graph, &vehicles, &active, &counts, 120, 5);
        assert_eq!(snap.vehicles.len(), 5);
        assert_eq!(snap.total_vehicles, 8);
        assert_eq!(snap.timestamp, 120);
        let ids: Vec<&str> = snap.vehicles.iter().map(|v| v.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        for v in &snap.vehicles {
            assert!((0.0..=1.0).contains(&v.progress));
            assert!((0.0..360.0).contains(&v.bearing));
        }
    }

    #[test]
    fn finished_vehicle_sits_at_route_end() {
        let graph = RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 2.0));
        let mut v = vehicle_on(&graph, 77);
        v.distance_m = v.route_length_m + 10.0;
        let pos = vehicle_position(&v);
        assert_eq!(pos.progress, 1.0);
        assert!(haversine_m(pos.coordinates, *v.polyline.last().unwrap()) < 1.0);
        assert!(pos.bearing.is_finite());
    }

    #[test]
    fn congestion_levels_by_utilization() {
        let graph = RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 1.0));
        let mut counts = vec![0u32; graph.edges.len()];
        // residencial: capacidad 400 -> capacidad/3600 < 1 -> divisor 1
        let idx = graph
            .edges
            .iter()
            .position(|e| e.capacity == 400.0)
            .unwrap();
        counts[idx] = 1;
        let segs = congestion_segments(&graph, &counts);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].level, "high");
        assert!(segs.len() <= 20);
    }
}
