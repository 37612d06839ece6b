//! graph.rs
//!
//! Grafo vial dirigido construido a partir de las vias crudas.
//!
//! - Una arista por via con >= 2 puntos de geometria.
//! - Velocidad libre y capacidad base por clase `highway`, capacidad
//!   escalada por carriles.
//! - Indices `edge_by_id` y `outgoing` (por nodo origen), mas un RTree
//!   de cabeceras de arista para consultas por radio.
//!
//! Inmutable tras la construccion salvo los campos canonicos
//! `speed`/`capacity`, que solo muta el aplicador de obras.

use std::collections::{HashMap, HashSet};

use rstar::{RTree, RTreeObject, AABB};

use crate::geoutil::{haversine_m, polyline_length_m};
use crate::models::types::{Coord, NetworkData};

/// Clases excluidas por completo en la ingesta.
const EXCLUDED_CLASSES: [&str; 5] = ["footway", "cycleway", "path", "steps", "service"];

/// (velocidad libre km/h, capacidad base veh/h) por clase highway.
pub fn class_speed_capacity(class: &str) -> (f64, f64) {
    match class {
        "motorway" => (110.0, 2000.0),
        "trunk" => (90.0, 1500.0),
        "primary" => (70.0, 1200.0),
        "secondary" => (60.0, 800.0),
        "tertiary" => (50.0, 600.0),
        "residential" => (30.0, 400.0),
        "unclassified" => (40.0, 300.0),
        _ => (40.0, 300.0),
    }
}

#[derive(Clone, Debug)]
pub struct Edge {
    pub id: String,
    pub from_node: i64,
    pub to_node: i64,
    pub lanes: u32,
    /// Velocidad libre canonica (km/h). La reducen las obras.
    pub speed: f64,
    /// Capacidad canonica (veh/h). La reducen las obras.
    pub capacity: f64,
    pub length_m: f64,
    pub geometry: Vec<Coord>,
}

impl Edge {
    #[inline]
    pub fn head(&self) -> Coord {
        self.geometry[0]
    }
}

#[derive(Clone, Copy)]
struct EdgeHead {
    idx: usize,
    pos: Coord,
}

impl RTreeObject for EdgeHead {
    type Envelope = AABB<Coord>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos)
    }
}

pub struct RoadGraph {
    pub edges: Vec<Edge>,
    pub edge_by_id: HashMap<String, usize>,
    /// Aristas salientes por nodo origen.
    pub outgoing: HashMap<i64, Vec<usize>>,
    pub nodes_count: usize,
    tree: RTree<EdgeHead>,
}

impl RoadGraph {
    pub fn build(network: &NetworkData) -> Self {
        let mut edges: Vec<Edge> = Vec::new();
        let mut nodes: HashSet<i64> = HashSet::new();

        for road in &network.roads {
            if road.geometry.len() < 2 || road.node_ids.len() < 2 {
                continue;
            }
            let class = road
                .tags
                .get("highway")
                .map(String::as_str)
                .unwrap_or("unclassified");
            if EXCLUDED_CLASSES.contains(&class) {
                continue;
            }
            let length_m = polyline_length_m(&road.geometry);
            if length_m <= 0.0 {
                continue;
            }
            let lanes = road
                .tags
                .get("lanes")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1)
                .max(1);
            let (speed, base_cap) = class_speed_capacity(class);
            nodes.extend(road.node_ids.iter().copied());
            edges.push(Edge {
                id: road.id.clone(),
                from_node: road.node_ids[0],
                to_node: *road.node_ids.last().unwrap(),
                lanes,
                speed,
                capacity: base_cap * lanes as f64,
                length_m,
                geometry: road.geometry.clone(),
            });
        }

        let mut edge_by_id = HashMap::with_capacity(edges.len());
        let mut outgoing: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut heads = Vec::with_capacity(edges.len());
        for (idx, e) in edges.iter().enumerate() {
            edge_by_id.insert(e.id.clone(), idx);
            outgoing.entry(e.from_node).or_default().push(idx);
            heads.push(EdgeHead { idx, pos: e.head() });
        }
        let tree = RTree::bulk_load(heads);

        RoadGraph {
            edges,
            edge_by_id,
            outgoing,
            nodes_count: nodes.len(),
            tree,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Indices de aristas cuya cabecera cae a menos de `radius_m` del
    /// punto. Filtro por envelope y verificacion exacta haversine.
    pub fn edges_near(&self, p: Coord, radius_m: f64) -> Vec<usize> {
        let dlat = radius_m / 111_320.0;
        let dlon = radius_m / (111_320.0 * p[1].to_radians().cos().abs().max(1e-6));
        let env = AABB::from_corners([p[0] - dlon, p[1] - dlat], [p[0] + dlon, p[1] + dlat]);
        let mut out: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&env)
            .filter(|h| haversine_m(h.pos, p) <= radius_m)
            .map(|h| h.idx)
            .collect();
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::Road;
    use std::collections::HashMap;

    fn road(id: &str, class: &str, lanes: Option<&str>, geom: Vec<Coord>, nodes: Vec<i64>) -> Road {
        let mut tags = HashMap::new();
        tags.insert("highway".to_string(), class.to_string());
        if let Some(l) = lanes {
            tags.insert("lanes".to_string(), l.to_string());
        }
        Road {
            id: id.to_string(),
            node_ids: nodes,
            tags,
            geometry: geom,
        }
    }

    #[test]
    fn build_skips_excluded_and_degenerate() {
        let network = NetworkData {
            roads: vec![
                road("a", "residential", None, vec![[0.0, 0.0], [0.01, 0.0]], vec![1, 2]),
                road("b", "footway", None, vec![[0.0, 0.0], [0.01, 0.0]], vec![3, 4]),
                road("c", "primary", None, vec![[0.0, 0.0]], vec![5]),
                road("d", "primary", None, vec![[0.0, 0.0], [0.0, 0.0]], vec![6, 7]),
            ],
            source: "test".into(),
        };
        let g = RoadGraph::build(&network);
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].id, "a");
        assert_eq!(g.nodes_count, 2);
    }

    #[test]
    fn capacity_scales_with_lanes() {
        let network = NetworkData {
            roads: vec![
                road("p2", "primary", Some("2"), vec![[0.0, 0.0], [0.01, 0.0]], vec![1, 2]),
                road("r", "residential", None, vec![[0.01, 0.0], [0.02, 0.0]], vec![2, 3]),
                road("x", "rarity", None, vec![[0.02, 0.0], [0.03, 0.0]], vec![3, 4]),
            ],
            source: "test".into(),
        };
        let g = RoadGraph::build(&network);
        let p2 = &g.edges[g.edge_by_id["p2"]];
        assert_eq!(p2.speed, 70.0);
        assert_eq!(p2.capacity, 2400.0);
        assert_eq!(p2.lanes, 2);
        let r = &g.edges[g.edge_by_id["r"]];
        assert_eq!((r.speed, r.capacity), (30.0, 400.0));
        // clase desconocida cae en el default
        let x = &g.edges[g.edge_by_id["x"]];
        assert_eq!((x.speed, x.capacity), (40.0, 300.0));
    }

    #[test]
    fn outgoing_index_and_near_query() {
        let network = NetworkData {
            roads: vec![
                road("a", "residential", None, vec![[0.0, 0.0], [0.005, 0.0]], vec![1, 2]),
                road("b", "residential", None, vec![[0.005, 0.0], [0.01, 0.0]], vec![2, 3]),
                road("c", "residential", None, vec![[0.1, 0.1], [0.11, 0.1]], vec![4, 5]),
            ],
            source: "test".into(),
        };
        let g = RoadGraph::build(&network);
        assert_eq!(g.outgoing[&2], vec![g.edge_by_id["b"]]);
        let near = g.edges_near([0.0, 0.0], 1000.0);
        assert!(near.contains(&g.edge_by_id["a"]));
        assert!(near.contains(&g.edge_by_id["b"]));
        assert!(!near.contains(&g.edge_by_id["c"]));
    }
}
