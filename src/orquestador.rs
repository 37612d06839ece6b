//! orquestador.rs
//!
//! Punto de entrada de una ejecucion: proveedores en paralelo, grafo,
//! impactos, demanda, microsimulacion y ensamblado de metricas.
//!
//! Los proveedores degradan internamente y nunca tumban la ejecucion;
//! un fallo fatal (grafo vacio, panico interno) cae al estimador
//! cerrado determinista con la misma forma de respuesta.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use crate::data::osm::RoadNetworkProvider;
use crate::data::poblacion::PopulationProvider;
use crate::data::trafico::TrafficProvider;
use crate::error::SimError;
use crate::graph::RoadGraph;
use crate::models::types::{
    BBox, ConstructionImpact, Coord, Marker, MarkerKind, MetricsReport, PopulationData,
    PopulationSummary, SimOptions, SimulateResponse, VehicleSummary,
};
use crate::sim::demanda::generate_trips;
use crate::sim::impacto::apply_markers;
use crate::sim::motor::{Motor, SimTotals};
use crate::sim::rng::SimRng;
use crate::sim::rutas::RouteBuilder;
use crate::stream::StreamHub;

/// Margen del bbox sobre los marcadores (grados).
const BBOX_MARGIN_DEG: f64 = 0.01;

pub struct SimDeps {
    pub roads: Arc<dyn RoadNetworkProvider>,
    pub traffic: Arc<dyn TrafficProvider>,
    pub population: Arc<dyn PopulationProvider>,
}

fn marker_center(markers: &[Marker]) -> Coord {
    let n = markers.len() as f64;
    let (sx, sy) = markers.iter().fold((0.0, 0.0), |(sx, sy), m| {
        (sx + m.coordinates.lng, sy + m.coordinates.lat)
    });
    [sx / n, sy / n]
}

/// Ruido uniforme de ±5% para no aparentar una precision que el modelo
/// no tiene.
fn vary(rng: &mut SimRng, x: f64) -> f64 {
    x * (0.95 + 0.1 * rng.0.gen::<f64>())
}

pub async fn run_simulation(
    deps: &SimDeps,
    markers: &[Marker],
    opts: &SimOptions,
    hub: Option<Arc<StreamHub>>,
) -> Result<SimulateResponse, SimError> {
    let hub_ref = hub.as_deref();
    if markers.is_empty() {
        if let Some(h) = hub_ref {
            h.error("No markers placed for simulation");
        }
        return Err(SimError::EmptyInput);
    }

    let mut rng = SimRng::new(opts.seed);
    match simulate_inner(deps, markers, opts, &mut rng, hub_ref).await {
        Ok(resp) => {
            if let Some(h) = hub_ref {
                h.complete(serde_json::to_value(&resp).unwrap_or_default());
            }
            Ok(resp)
        }
        Err(SimError::SimulationAborted) => {
            if let Some(h) = hub_ref {
                h.error("simulation aborted");
            }
            Err(SimError::SimulationAborted)
        }
        Err(e) => {
            warn!("simulacion caida ({e}), usando estimador cerrado");
            if let Some(h) = hub_ref {
                h.error(format!("Simulation failed: {e}"));
            }
            let report = fallback_estimate(markers, &mut rng);
            Ok(build_response(report, markers))
        }
    }
}

async fn simulate_inner(
    deps: &SimDeps,
    markers: &[Marker],
    opts: &SimOptions,
    rng: &mut SimRng,
    hub: Option<&StreamHub>,
) -> Result<SimulateResponse, SimError> {
    let bbox = BBox::from_markers(markers, BBOX_MARGIN_DEG);
    let center = marker_center(markers);

    if let Some(h) = hub {
        h.status("Fetching road network, traffic and population data...");
    }
    let (network, traffic, population) = tokio::join!(
        deps.roads.fetch_road_network(center, opts.radius_km),
        deps.traffic.fetch_traffic(&bbox),
        deps.population.fetch_population(&bbox),
    );
    info!(
        "proveedores: {} vias ({}), trafico {}, poblacion {}",
        network.roads.len(),
        network.source,
        traffic.source,
        population.source
    );
    if let Some(h) = hub {
        // la degradacion de proveedores no es fallo: se informa y sigue
        if network.source != "overpass" && network.source != "cache" {
            h.status(format!(
                "{}; road data degraded (source: {})",
                SimError::ProviderUnavailable("road network".into()),
                network.source
            ));
        }
        if traffic.source == "estimate" {
            h.status("Live traffic unavailable, using estimated conditions");
        }
    }

    let mut graph = RoadGraph::build(&network);
    if graph.is_empty() {
        return Err(SimError::GraphEmpty);
    }
    if let Some(h) = hub {
        h.status(format!(
            "Road graph built: {} edges, {} nodes",
            graph.edges.len(),
            graph.nodes_count
        ));
    }

    let mut builder = RouteBuilder::new();
    let impact = apply_markers(&mut graph, markers, population.density, rng, &mut builder);

    let mut vehicles = generate_trips(&graph, &population, &traffic, opts, rng, &mut builder);
    vehicles.extend(impact.extra_vehicles);
    if let Some(h) = hub {
        h.status(format!(
            "Generated {} vehicles, {} edges affected by construction",
            vehicles.len(),
            impact.affected_edges
        ));
        h.status("Starting microsimulation...");
    }

    let roads_count = graph.edges.len();
    let nodes_count = graph.nodes_count;
    let incidents_count = traffic.incidents.len();

    let mut motor = Motor::new(graph, traffic, vehicles, opts.clone());
    let totals = motor.run(hub)?;

    let report = build_report(
        totals,
        &motor,
        roads_count,
        nodes_count,
        incidents_count,
        impact.affected_edges,
        impact.construction_log,
        &population,
        rng,
    );
    Ok(build_response(report, markers))
}

#[allow(clippy::too_many_arguments)]
fn build_report(
    totals: SimTotals,
    motor: &Motor,
    roads_count: usize,
    nodes_count: usize,
    incidents_count: usize,
    affected_edges: usize,
    construction_impacts: Vec<ConstructionImpact>,
    population: &PopulationData,
    rng: &mut SimRng,
) -> MetricsReport {
    let distance = vary(rng, totals.driving_distance_km);
    let congestion = vary(rng, totals.congestion_km);
    let co2 = vary(rng, totals.co2_kg);

    let vehicle_sample = motor
        .vehicles
        .iter()
        .take(5)
        .map(|v| VehicleSummary {
            id: v.id.clone(),
            route_edges: v.route.len(),
            distance_km: (v.distance_m / 10.0).round() / 100.0,
            co2_g: (v.emissions_g * 10.0).round() / 10.0,
            arrived: v.arrival_time_s.is_some(),
        })
        .collect();

    MetricsReport {
        driving_distance_km: format!("{:.0} km", distance),
        congestion_length: format!("{:.1} km", congestion),
        co2_emissions: format!("{:.0} kg", co2),
        roads_count,
        nodes_count,
        incidents_count,
        affected_edges,
        vehicle_sample,
        construction_impacts,
        population_summary: PopulationSummary {
            total: population.total.round(),
            density: population.density,
            estimated_vehicles: population.estimated_vehicles.round(),
            source: population.source.clone(),
        },
    }
}

/// Estimador cerrado: base 385 km / 0.8 km / 72 kg, mas 15/0.8/12 por
/// obra y 8/0.3/6 por equipamiento, con ruido de ±5%.
pub fn fallback_estimate(markers: &[Marker], rng: &mut SimRng) -> MetricsReport {
    let nc = markers
        .iter()
        .filter(|m| m.kind == MarkerKind::Construction)
        .count() as f64;
    let nf = markers
        .iter()
        .filter(|m| m.kind == MarkerKind::Facility)
        .count() as f64;

    let distance = vary(rng, 385.0 + 15.0 * nc + 8.0 * nf);
    let congestion = vary(rng, 0.8 + 0.8 * nc + 0.3 * nf);
    let co2 = vary(rng, 72.0 + 12.0 * nc + 6.0 * nf);

    MetricsReport {
        driving_distance_km: format!("{:.0} km", distance),
        congestion_length: format!("{:.1} km", congestion),
        co2_emissions: format!("{:.0} kg", co2),
        roads_count: 0,
        nodes_count: 0,
        incidents_count: 0,
        affected_edges: 0,
        vehicle_sample: Vec::new(),
        construction_impacts: Vec::new(),
        population_summary: PopulationSummary {
            total: 0.0,
            density: 0.0,
            estimated_vehicles: 0.0,
            source: "estimate".into(),
        },
    }
}

fn build_response(metrics: MetricsReport, markers: &[Marker]) -> SimulateResponse {
    let nc = markers
        .iter()
        .filter(|m| m.kind == MarkerKind::Construction)
        .count();
    let nf = markers.len() - nc;

    let ai_summary = format!(
        "Simulated traffic around {} marker(s): {} driven in total, {} of congested roads and {} of CO2 emitted. {} road segment(s) affected by construction.",
        markers.len(),
        metrics.driving_distance_km,
        metrics.congestion_length,
        metrics.co2_emissions,
        metrics.affected_edges
    );

    let risk_assessment = if metrics.affected_edges >= 10 {
        "High: construction work disrupts a significant part of the surrounding network.".to_string()
    } else if metrics.affected_edges >= 3 {
        "Moderate: localized slowdowns expected around the construction zones.".to_string()
    } else {
        "Low: the network absorbs the planned changes with minor delays.".to_string()
    };

    let mut recommendations = Vec::new();
    if nc > 0 {
        recommendations.push("Schedule construction work outside peak hours.".to_string());
        recommendations
            .push("Publish detour routes for the affected road segments.".to_string());
    }
    if nf > 0 {
        recommendations
            .push("Review access road capacity around the new facilities.".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("No immediate action required.".to_string());
    }

    SimulateResponse {
        metrics,
        ai_summary,
        risk_assessment,
        recommendations,
    }
}
