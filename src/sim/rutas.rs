//! rutas.rs
//!
//! Constructor de rutas: paseo aleatorio dirigido con longitud
//! objetivo. Las rutas son deliberadamente estocasticas, no optimas.
//!
//! - Longitud minima 4000 + U(0,4000) m, tope de 200 pasos.
//! - Escape de callejon sin salida hacia una arista lejana.
//! - Un reintento con extremos intercambiados si queda corta.
//! - Cache memoizada por par "origen→destino".

use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::geoutil::haversine_m;
use crate::graph::RoadGraph;
use crate::models::types::Coord;
use crate::sim::rng::SimRng;

const STEP_CAP: usize = 200;
const DEAD_END_MIN_DIST_M: f64 = 1000.0;

/// Arista al azar cuyo primer punto de geometria queda a una distancia
/// >= `min_dist_m` de `from`. Reintentos acotados; agotado el tope vale
/// cualquier arista distinta de `exclude`.
pub fn pick_distant_edge(
    graph: &RoadGraph,
    rng: &mut SimRng,
    from: Coord,
    min_dist_m: f64,
    exclude: Option<usize>,
) -> usize {
    let n = graph.edges.len();
    debug_assert!(n > 0);
    let cap = 10 * n;
    for _ in 0..cap {
        let i = rng.0.gen_range(0..n);
        if Some(i) != exclude && haversine_m(graph.edges[i].head(), from) >= min_dist_m {
            return i;
        }
    }
    // sin candidato lejano en el tope de reintentos
    for _ in 0..cap {
        let i = rng.0.gen_range(0..n);
        if Some(i) != exclude {
            return i;
        }
    }
    0
}

#[derive(Default)]
pub struct RouteBuilder {
    cache: HashMap<String, Vec<usize>>,
}

impl RouteBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn build_route(
        &mut self,
        graph: &RoadGraph,
        rng: &mut SimRng,
        origin: usize,
        dest: usize,
    ) -> Vec<usize> {
        let key = format!("{}→{}", graph.edges[origin].id, graph.edges[dest].id);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let route = walk(graph, rng, origin, dest, true);
        self.cache.insert(key, route.clone());
        route
    }
}

fn walk(graph: &RoadGraph, rng: &mut SimRng, origin: usize, dest: usize, retry: bool) -> Vec<usize> {
    let l_min = 4000.0 + rng.0.gen::<f64>() * 4000.0;

    let mut route = vec![origin];
    let mut visited: HashSet<usize> = HashSet::from([origin]);
    let mut cursor = graph.edges[origin].to_node;
    let mut cum = graph.edges[origin].length_m;

    while cum < l_min && route.len() < STEP_CAP {
        let candidates: Vec<usize> = graph
            .outgoing
            .get(&cursor)
            .map(|v| v.iter().copied().filter(|i| !visited.contains(i)).collect())
            .unwrap_or_default();

        let next = if candidates.is_empty() {
            // callejon sin salida: saltar a una arista lejana
            let last = *route.last().unwrap();
            pick_distant_edge(
                graph,
                rng,
                graph.edges[last].head(),
                DEAD_END_MIN_DIST_M,
                Some(last),
            )
        } else {
            candidates[rng.0.gen_range(0..candidates.len())]
        };

        route.push(next);
        visited.insert(next);
        cum += graph.edges[next].length_m;
        cursor = graph.edges[next].to_node;
    }

    if *route.last().unwrap() != dest {
        route.push(dest);
        cum += graph.edges[dest].length_m;
    }

    if cum < l_min && retry {
        return walk(graph, rng, dest, origin, false);
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::synthetic_network;
    use crate::graph::RoadGraph;

    fn grid() -> RoadGraph {
        RoadGraph::build(&synthetic_network([-3.7038, 40.4168], 2.0))
    }

    #[test]
    fn route_reaches_target_or_cap() {
        let g = grid();
        let mut rng = SimRng::from_seed_u64(11);
        let mut b = RouteBuilder::new();
        let origin = 0;
        let dest = pick_distant_edge(&g, &mut rng, g.edges[origin].head(), 2000.0, Some(origin));
        let route = b.build_route(&g, &mut rng, origin, dest);
        assert!(!route.is_empty());
        assert_eq!(route[0], origin);
        let len: f64 = route.iter().map(|&i| g.edges[i].length_m).sum();
        assert!(
            len >= 4000.0 || route.len() >= STEP_CAP,
            "len={len} pasos={}",
            route.len()
        );
        assert!(route.len() <= STEP_CAP + 1);
    }

    #[test]
    fn route_ends_at_destination() {
        let g = grid();
        let mut rng = SimRng::from_seed_u64(23);
        let mut b = RouteBuilder::new();
        let dest = pick_distant_edge(&g, &mut rng, g.edges[5].head(), 2000.0, Some(5));
        let route = b.build_route(&g, &mut rng, 5, dest);
        assert_eq!(*route.last().unwrap(), dest);
    }

    #[test]
    fn cache_returns_same_route() {
        let g = grid();
        let mut rng = SimRng::from_seed_u64(3);
        let mut b = RouteBuilder::new();
        let first = b.build_route(&g, &mut rng, 2, 40);
        let second = b.build_route(&g, &mut rng, 2, 40);
        assert_eq!(first, second);
        assert_eq!(b.cache_len(), 1);
    }

    #[test]
    fn distant_edge_respects_min_distance() {
        let g = grid();
        let mut rng = SimRng::from_seed_u64(9);
        let from = g.edges[0].head();
        for _ in 0..20 {
            let i = pick_distant_edge(&g, &mut rng, from, 2000.0, Some(0));
            assert_ne!(i, 0);
            assert!(haversine_m(g.edges[i].head(), from) >= 2000.0);
        }
    }

    #[test]
    fn distant_edge_falls_back_when_impossible() {
        // red de radio minimo: nadie queda a 1e6 m, el tope debe saltar
        let g = RoadGraph::build(&synthetic_network([0.0, 0.0], 0.5));
        let mut rng = SimRng::from_seed_u64(4);
        let i = pick_distant_edge(&g, &mut rng, g.edges[0].head(), 1.0e6, Some(0));
        assert!(i < g.edges.len());
        assert_ne!(i, 0);
    }
}
