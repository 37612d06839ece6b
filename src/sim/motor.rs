//! motor.rs
//!
//! Bucle de microsimulacion en tiempo discreto (segundos enteros).
//!
//! Por iteracion: paso adaptativo (1 s con mas de 100 activos, 10 s en
//! otro caso), avance de cada vehiculo activo, muestreo periodico de
//! congestion, foto en vivo si hay suscriptor y linea de progreso.
//!
//! El bucle posee en exclusiva la coleccion de vehiculos y los campos
//! mutables de arista; nunca bloquea en E/S: el hub entrega sin
//! bloquear y la cancelacion se observa en frontera de tick.

use tracing::info;

use crate::error::SimError;
use crate::geoutil::haversine_m;
use crate::graph::RoadGraph;
use crate::models::types::{Flow, SimOptions, TrafficData};
use crate::sim::snapshot::build_snapshot;
use crate::sim::Vehicle;
use crate::stream::StreamHub;

/// Umbral de utilizacion a partir del cual una arista cuenta como
/// congestionada y el objetivo de velocidad se penaliza.
const CONGESTION_THRESHOLD: f64 = 0.7;
/// Radio de emparejamiento flujo-arista (m).
const FLOW_MATCH_M: f64 = 1000.0;
/// Tope de avance sobre la arista para garantizar progreso.
const PROGRESS_CAP: f64 = 0.95;

#[derive(Clone, Copy, Debug)]
pub struct SimTotals {
    pub driving_distance_km: f64,
    pub congestion_km: f64,
    pub co2_kg: f64,
}

pub struct Motor {
    pub graph: RoadGraph,
    pub traffic: TrafficData,
    pub vehicles: Vec<Vehicle>,
    pub opts: SimOptions,
    /// Velocidad de flujo en tiempo real emparejada por arista.
    flow_speed: Vec<Option<f64>>,
    pub congestion_samples: Vec<f64>,
}

/// Velocidad minima de los flujos cuyo primer punto queda a menos de
/// 1000 m de la cabecera de cada arista.
fn match_flows(graph: &RoadGraph, flows: &[Flow]) -> Vec<Option<f64>> {
    graph
        .edges
        .iter()
        .map(|e| {
            flows
                .iter()
                .filter(|f| {
                    !f.coordinates.is_empty()
                        && haversine_m(f.coordinates[0], e.head()) <= FLOW_MATCH_M
                })
                .map(|f| f.current_speed)
                .fold(None, |acc: Option<f64>, s| {
                    Some(acc.map_or(s, |a| a.min(s)))
                })
        })
        .collect()
}

fn emission_factor(speed: f64) -> f64 {
    let mult = if speed < 20.0 {
        1.6
    } else if speed < 40.0 {
        1.2
    } else if speed > 80.0 {
        1.3
    } else {
        1.0
    };
    120.0 * mult
}

#[inline]
fn utilization(count: u32, capacity: f64) -> f64 {
    count as f64 / (capacity / 3600.0).max(1.0)
}

fn active_indices(vehicles: &[Vehicle], t: u32) -> Vec<usize> {
    vehicles
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_active(t))
        .map(|(i, _)| i)
        .collect()
}

fn edge_counts(vehicles: &[Vehicle], active: &[usize], n_edges: usize) -> Vec<u32> {
    let mut counts = vec![0u32; n_edges];
    for &i in active {
        if let Some(e) = vehicles[i].current_edge() {
            counts[e] += 1;
        }
    }
    counts
}

/// Avanza un vehiculo un tick: objetivo de velocidad (via + flujo real
/// + realimentacion de congestion), suavizado, progreso sobre la
/// arista y traspaso a la siguiente, emisiones cada 10 s simulados.
pub fn advance_vehicle(
    graph: &RoadGraph,
    v: &mut Vehicle,
    flow_speed: Option<f64>,
    count_on_edge: u32,
    t: u32,
    dt: u32,
    accrue_emissions: bool,
) {
    let Some(edge_idx) = v.current_edge() else {
        return;
    };
    let (edge_speed, edge_capacity, edge_length) = {
        let e = &graph.edges[edge_idx];
        (e.speed, e.capacity, e.length_m)
    };

    let mut target = edge_speed;
    if let Some(fs) = flow_speed {
        target = target.min(fs);
    }
    let u = utilization(count_on_edge, edge_capacity);
    if u > CONGESTION_THRESHOLD {
        target *= (1.0 - (u - CONGESTION_THRESHOLD) * 0.5).max(0.1);
    }

    v.speed += 0.2 * (target - v.speed);
    if v.speed < 0.0 {
        v.speed = 0.0;
    }
    // anti-atasco: nunca por debajo de 5 km/h con objetivo positivo
    if target > 0.0 && v.speed < 5.0 {
        v.speed = (target * 0.3).max(5.0);
    }

    let d = v.speed * dt as f64 / 3.6;
    let remaining = edge_length * (1.0 - v.edge_progress);
    if d >= remaining {
        v.distance_m += remaining;
        v.route_pos += 1;
        match v.route_idx.get(v.route_pos) {
            None => {
                v.arrival_time_s = Some(t);
                v.edge_progress = 0.0;
            }
            Some(&next) => {
                let carry = d - remaining;
                v.edge_progress = (carry / graph.edges[next].length_m).clamp(0.0, PROGRESS_CAP);
            }
        }
    } else {
        v.distance_m += d;
        v.edge_progress = (v.edge_progress + d / edge_length).min(PROGRESS_CAP);
    }

    if accrue_emissions {
        v.emissions_g += emission_factor(v.speed) * (v.speed / 3600.0);
    }
}

impl Motor {
    pub fn new(
        graph: RoadGraph,
        traffic: TrafficData,
        vehicles: Vec<Vehicle>,
        opts: SimOptions,
    ) -> Self {
        let flow_speed = match_flows(&graph, &traffic.flows);
        Self {
            graph,
            traffic,
            vehicles,
            opts,
            flow_speed,
            congestion_samples: Vec::new(),
        }
    }

    /// Longitud congestionada instantanea (km).
    pub fn congestion_length_km(&self, counts: &[u32]) -> f64 {
        self.graph
            .edges
            .iter()
            .enumerate()
            .filter(|(i, e)| utilization(counts[*i], e.capacity) > CONGESTION_THRESHOLD)
            .map(|(_, e)| e.length_m)
            .sum::<f64>()
            / 1000.0
    }

    pub fn run(&mut self, hub: Option<&StreamHub>) -> Result<SimTotals, SimError> {
        let end = self.opts.duration_minutes * 60;
        let live_tick = self.opts.live_tick_seconds.max(1);
        let mut t: u32 = 0;
        let mut next_live: u32 = 0;
        let mut next_cong: u32 = 300;
        let mut next_log: u32 = 600;
        let mut next_emis: u32 = 10;

        while t < end {
            if let Some(h) = hub {
                if h.is_cancelled() {
                    info!("motor: cancelado por el suscriptor en t={t}s");
                    return Err(SimError::SimulationAborted);
                }
            }

            let active = active_indices(&self.vehicles, t);
            let dt: u32 = if active.len() > 100 { 1 } else { 10 };

            let counts = edge_counts(&self.vehicles, &active, self.graph.edges.len());
            let accrue = t >= next_emis;
            if accrue {
                next_emis += 10;
            }
            for &vi in &active {
                let edge_idx = match self.vehicles[vi].current_edge() {
                    Some(e) => e,
                    None => continue,
                };
                advance_vehicle(
                    &self.graph,
                    &mut self.vehicles[vi],
                    self.flow_speed[edge_idx],
                    counts[edge_idx],
                    t,
                    dt,
                    accrue,
                );
            }

            if t >= next_cong {
                let act = active_indices(&self.vehicles, t);
                let counts = edge_counts(&self.vehicles, &act, self.graph.edges.len());
                let km = self.congestion_length_km(&counts);
                self.congestion_samples.push(km);
                next_cong += 300;
            }

            if let Some(h) = hub {
                if t >= next_live {
                    let act = active_indices(&self.vehicles, t);
                    let counts = edge_counts(&self.vehicles, &act, self.graph.edges.len());
                    let snap = build_snapshot(
                        &self.graph,
                        &self.vehicles,
                        &act,
                        &counts,
                        t,
                        self.opts.live_sample_size,
                    );
                    h.live(snap, format!("Simulation at {t}s"));
                    next_live += live_tick;
                }
            }

            if t >= next_log {
                let arrived = self.vehicles.iter().filter(|v| v.arrival_time_s.is_some()).count();
                info!(
                    "motor: t={t}s activos={} llegados={}/{}",
                    active.len(),
                    arrived,
                    self.vehicles.len()
                );
                if let Some(h) = hub {
                    h.status(format!(
                        "Simulated {t}s: {} active, {arrived} arrived",
                        active.len()
                    ));
                }
                next_log += 600;
            }

            t += dt;
        }

        Ok(self.totals())
    }

    pub fn totals(&self) -> SimTotals {
        let driving_distance_km =
            self.vehicles.iter().map(|v| v.distance_m).sum::<f64>() / 1000.0;
        let co2_kg = self.vehicles.iter().map(|v| v.emissions_g).sum::<f64>() / 1000.0;
        let divisor = (self.opts.duration_minutes as f64 / 5.0).max(1.0);
        let congestion_km = self.congestion_samples.iter().sum::<f64>() / divisor;
        SimTotals {
            driving_distance_km,
            congestion_km,
            co2_kg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::synthetic_network;
    use crate::data::poblacion::estimated_population;
    use crate::data::trafico::estimated_traffic;
    use crate::models::types::BBox;
    use crate::sim::demanda::generate_trips;
    use crate::sim::rng::SimRng;
    use crate::sim::rutas::RouteBuilder;

    fn small_world(max_vehicles: usize, seed: u64) -> Motor {
        let graph = RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 2.0));
        let bbox = BBox {
            min_lng: -3.73,
            min_lat: 40.40,
            max_lng: -3.68,
            max_lat: 40.44,
        };
        let mut rng = SimRng::from_seed_u64(seed);
        let mut builder = RouteBuilder::new();
        let opts = SimOptions {
            duration_minutes: 15,
            max_vehicles,
            ..Default::default()
        };
        let vehicles = generate_trips(
            &graph,
            &estimated_population(&bbox),
            &estimated_traffic(),
            &opts,
            &mut rng,
            &mut builder,
        );
        Motor::new(graph, estimated_traffic(), vehicles, opts)
    }

    #[test]
    fn run_holds_vehicle_invariants() {
        let mut motor = small_world(40, 101);
        let totals = motor.run(None).unwrap();
        assert!(totals.driving_distance_km > 0.0);
        assert!(totals.co2_kg >= 0.0);
        assert!(totals.congestion_km >= 0.0);
        for v in &motor.vehicles {
            assert!((0.0..=PROGRESS_CAP).contains(&v.edge_progress), "{}", v.id);
            assert!(v.speed >= 0.0);
            assert!(v.distance_m >= 0.0);
            assert!(v.distance_m <= v.route_length_m + 1.0);
            if let Some(at) = v.arrival_time_s {
                assert!(at < 15 * 60);
                assert!(v.route_pos >= v.route_idx.len());
            }
        }
    }

    #[test]
    fn advance_hands_off_between_edges() {
        let graph = RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 1.0));
        // ruta corta de dos aristas consecutivas
        let first = 0usize;
        let to = graph.edges[first].to_node;
        let second = graph.outgoing[&to][0];
        let v0 = Vehicle::from_route(
            "veh_t".into(),
            &graph,
            vec![first, second],
            0,
            30.0,
            0.0,
        )
        .unwrap();
        let mut v = v0.clone();
        let mut last_distance = 0.0;
        let mut t = 0;
        while v.arrival_time_s.is_none() && t < 600 {
            advance_vehicle(&graph, &mut v, None, 1, t, 10, t % 10 == 0);
            assert!(v.distance_m >= last_distance);
            assert!(v.edge_progress <= PROGRESS_CAP);
            last_distance = v.distance_m;
            t += 10;
        }
        assert!(v.arrival_time_s.is_some(), "no llego en 600s");
        assert!((v.distance_m - v.route_length_m).abs() < 1.0);
        assert!(v.emissions_g > 0.0);
    }

    #[test]
    fn congestion_slows_target_speed() {
        let graph = RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 1.0));
        let idx = 0usize;
        let mk = || Vehicle::from_route("v".into(), &graph, vec![idx], 0, 30.0, 0.0).unwrap();
        let mut free = mk();
        let mut jammed = mk();
        for t in 0..12 {
            advance_vehicle(&graph, &mut free, None, 0, t * 10, 10, false);
            advance_vehicle(&graph, &mut jammed, None, 40, t * 10, 10, false);
        }
        assert!(jammed.speed < free.speed);
        assert!(jammed.speed >= 5.0 * 0.3, "anti-atasco: {}", jammed.speed);
    }

    #[test]
    fn flow_speed_caps_target() {
        let graph = RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 1.0));
        let mut v = Vehicle::from_route("v".into(), &graph, vec![0], 0, 60.0, 0.0).unwrap();
        for t in 0..30 {
            advance_vehicle(&graph, &mut v, Some(12.0), 0, t, 1, false);
            if v.arrival_time_s.is_some() {
                break;
            }
        }
        assert!(v.arrival_time_s.is_none(), "no deberia llegar tan pronto");
        assert!(v.speed <= 13.0, "speed={}", v.speed);
    }

    #[test]
    fn emission_factor_bands() {
        assert_eq!(emission_factor(10.0), 120.0 * 1.6);
        assert_eq!(emission_factor(30.0), 120.0 * 1.2);
        assert_eq!(emission_factor(60.0), 120.0);
        assert_eq!(emission_factor(100.0), 120.0 * 1.3);
    }

    #[test]
    fn congestion_length_counts_loaded_edges() {
        let motor = small_world(0, 5);
        let mut counts = vec![0u32; motor.graph.edges.len()];
        assert_eq!(motor.congestion_length_km(&counts), 0.0);
        counts[0] = 50;
        let km = motor.congestion_length_km(&counts);
        assert!((km - motor.graph.edges[0].length_m / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let mut motor = small_world(20, 7);
        let hub = crate::stream::StreamHub::new();
        hub.cancel();
        match motor.run(Some(&*hub)) {
            Err(SimError::SimulationAborted) => {}
            other => panic!("esperaba cancelacion, llego {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_snapshots_have_monotone_timestamps() {
        let mut motor = small_world(15, 9);
        let hub = crate::stream::StreamHub::new();
        motor.run(Some(&*hub)).unwrap();
        hub.complete(serde_json::json!({}));
        let mut last = 0u32;
        while let Some(ev) = hub.recv().await {
            if let crate::stream::StreamEvent::LiveData { data, .. } = ev {
                assert!(data.timestamp >= last);
                last = data.timestamp;
            }
        }
    }
}
